//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Every fixture uses the
//! insecure KDF profile so a test run does not spend seconds in Argon2.

use tarkin::{Keeper, KeeperConfig, Principal};
use tarkin_core::{Credential, NewUser, User};
use tarkin_store::{MemoryStore, SqliteStore, Store};

/// A keeper over a fresh store.
pub struct TestFixture<S: Store = MemoryStore> {
    pub keeper: Keeper<S>,
}

impl TestFixture<MemoryStore> {
    /// A fixture over an empty in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl TestFixture<SqliteStore> {
    /// A fixture over an in-memory SQLite database.
    pub fn sqlite() -> Self {
        Self::with_store(SqliteStore::open_memory().expect("open in-memory sqlite"))
    }
}

impl Default for TestFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> TestFixture<S> {
    pub fn with_store(store: S) -> Self {
        Self::with_config(store, KeeperConfig::insecure_fast())
    }

    /// A fixture with a custom config. The KDF is still forced to the fast
    /// profile.
    pub fn with_config(store: S, config: KeeperConfig) -> Self {
        let config = KeeperConfig {
            kdf: KeeperConfig::insecure_fast().kdf,
            ..config
        };
        Self {
            keeper: Keeper::new(store, config),
        }
    }

    /// Create (but do not register) a user named `name`.
    pub fn new_user(&self, name: &str) -> NewUser {
        NewUser::create(name, &email(name), &password(name), &self.keeper.config().kdf)
            .expect("valid fixture user")
    }

    /// Register `name` and return them as an authenticated principal.
    pub async fn register(&self, name: &str) -> Principal {
        let user = self
            .keeper
            .register_user(self.new_user(name))
            .await
            .expect("register fixture user");
        Principal::new(user, password(name))
    }

    /// Register several users.
    pub async fn register_all(&self, names: &[&str]) -> Vec<Principal> {
        let mut principals = Vec::with_capacity(names.len());
        for name in names {
            principals.push(self.register(name).await);
        }
        principals
    }
}

/// The fixture email for `name`.
pub fn email(name: &str) -> String {
    format!("{}@example.com", name.to_lowercase())
}

/// The fixture password for `name`.
pub fn password(name: &str) -> Credential {
    Credential::new(format!("{}-password", name.to_lowercase()))
}

/// A principal claiming `user` with the wrong password.
pub fn impostor(user: &User) -> Principal {
    Principal::new(user.clone(), Credential::new("not-the-password"))
}

/// A fixture over the in-memory store with `count` registered users named
/// `user0`, `user1`, and so on.
pub async fn multi_user_fixture(count: usize) -> (TestFixture, Vec<Principal>) {
    let fixture = TestFixture::new();
    let mut principals = Vec::with_capacity(count);
    for i in 0..count {
        principals.push(fixture.register(&format!("user{i}")).await);
    }
    (fixture, principals)
}
