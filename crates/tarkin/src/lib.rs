//! # Tarkin
//!
//! Hierarchical secret keeping. Users organize secrets (items) in a tree of
//! directories and share them through groups. Reading a secret requires
//! the right chain of keys, not a flag in a table:
//!
//! ```text
//! password ──unwraps──▶ user private key
//! user private key ──opens──▶ member key share ──▶ group private key
//! group private key ──opens──▶ sealed item secret
//! ```
//!
//! A lost password can not be recovered.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secrecy::ExposeSecret;
//! use tarkin::{Keeper, KeeperConfig, NewItem};
//! use tarkin::core::{Credential, KdfParams, NewUser};
//! use tarkin::store::SqliteStore;
//!
//! async fn example() -> tarkin::Result<()> {
//!     let store = SqliteStore::open("tarkin.db")?;
//!     let keeper = Keeper::new(store, KeeperConfig::default());
//!
//!     let new_user = NewUser::create(
//!         "Alice",
//!         "alice@example.com",
//!         &Credential::new("correct horse"),
//!         &keeper.config().kdf,
//!     )?;
//!     keeper.register_user(new_user).await?;
//!
//!     let alice = keeper
//!         .authenticate("alice@example.com", Credential::new("correct horse"))
//!         .await?;
//!     let group = keeper.create_group(&alice, "ops").await?;
//!     let item = keeper
//!         .create_item(NewItem::new(group.id, "root", "s3cr3t"))
//!         .await?;
//!
//!     let secret = keeper.decrypt_item(item.id, &alice).await?;
//!     assert_eq!(secret.expose_secret(), "s3cr3t");
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `tarkin::core` - Ids, records, credentials and the key vault
//! - `tarkin::perms` - Key shares, sealed secrets and the access predicate
//! - `tarkin::store` - Storage abstraction, in-memory and SQLite stores

pub mod config;
pub mod directories;
pub mod error;
pub mod groups;
pub mod keeper;
pub mod listing;
pub mod secrets;

// Re-export component crates
pub use tarkin_core as core;
pub use tarkin_perms as perms;
pub use tarkin_store as store;

// Re-export main types for convenience
pub use config::KeeperConfig;
pub use error::{KeeperError, Result};
pub use keeper::Keeper;
pub use listing::Listing;
pub use secrets::NewItem;

// Re-export commonly used core types
pub use tarkin_core::{
    Credential, Directory, DirectoryId, Favorite, Group, GroupId, Item, ItemId, NewUser, Pattern,
    Principal, User, UserId,
};
pub use tarkin_store::InsertResult;
