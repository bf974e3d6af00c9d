//! # Tarkin Core
//!
//! Pure primitives for Tarkin: identifiers, records, key material and the
//! password-protected key vault.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Credential`] - A password held only for the duration of an operation
//! - [`SecretKey`] / [`PublicKey`] - X25519 key material (secret zeroized on drop)
//! - [`WrappedPrivateKey`] - A private key encrypted under a password-derived key
//! - [`User`], [`Group`], [`Membership`], [`Item`], [`Directory`] - Persisted records
//! - [`Principal`] - A user record paired with the credential that claims it
//! - [`Pattern`] - `*`-wildcard matcher used by listings and searches
//!
//! ## Vault
//!
//! User private keys never leave this crate in plaintext form except as a
//! scoped [`SecretKey`]. See the [`vault`] module.

pub mod credential;
pub mod crypto;
pub mod error;
pub mod pattern;
pub mod principal;
pub mod records;
pub mod types;
pub mod validation;
pub mod vault;

pub use credential::{
    Credential, REWRAP_MIN_PASSWORD_LEN, USER_MAX_PASSWORD_LEN, USER_MIN_PASSWORD_LEN,
};
pub use crypto::{EncryptionKey, EncryptionNonce, EphemeralKeyPair, PublicKey, SecretKey, SharedKey};
pub use error::{CoreError, ValidationError};
pub use pattern::Pattern;
pub use principal::Principal;
pub use records::{
    child_path, Directory, Favorite, Group, Item, Membership, NewUser, User, ROOT_NAME, ROOT_PATH,
};
pub use types::{DirectoryId, GroupId, ItemId, UserId};
pub use validation::{normalize_email, validate_directory_name, validate_email, validate_name};
pub use vault::{KdfParams, WrappedPrivateKey};

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
