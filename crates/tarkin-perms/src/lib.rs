//! # Tarkin Permissions
//!
//! Group key sharing, sealed item secrets and the access predicate.
//!
//! ## Encryption Model
//!
//! Every group has an X25519 key pair.
//!
//! 1. **Member key shares**: the group private key is wrapped once per member
//!    for that member's public key ([`MemberKeyShare`]).
//! 2. **Sealed secrets**: an item secret is sealed to the group public key
//!    with a fresh ephemeral key ([`SealedSecret`]).
//!
//! Reading a secret takes a member's private key to open their share, then
//! the group private key to open the secret. Writing a secret takes only the
//! group public key.
//!
//! ## Visibility
//!
//! [`AccessView`] decides what a user can list from their memberships alone.

pub mod access;
pub mod envelope;
pub mod error;
pub mod keyshare;

pub use access::AccessView;
pub use envelope::{SealFormat, SealedSecret};
pub use error::{PermsError, Result};
pub use keyshare::{MemberKeyShare, SHARE_VERSION};
