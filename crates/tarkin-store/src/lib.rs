//! # Tarkin Store
//!
//! Storage abstraction for Tarkin. Provides a trait-based interface for
//! record persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`GroupRotation`] - A prepared key rotation, committed atomically
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tarkin_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("tarkin.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let root = store.root_directory().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Epoch checks**: writes carrying key material are rejected if the group
//!   key was rotated since they were prepared
//! - **Uniqueness**: one membership edge per (user, group), one email per user,
//!   unique directory names among siblings

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    DirectoryFilter, GroupRotation, GroupedDirectory, InsertResult, ItemFilter, ResealedItem,
    Store,
};
