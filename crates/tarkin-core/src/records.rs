//! Persisted records.
//!
//! These are the shapes the store reads and writes. Loading a record is pure
//! deserialization: keys are only ever generated by the explicit factories
//! ([`NewUser::create`], and group creation in the `tarkin` crate).
//!
//! Wrapped key material is kept as opaque CBOR [`Bytes`]; it is parsed only
//! at the moment it is unlocked.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::crypto::{PublicKey, SecretKey};
use crate::error::CoreError;
use crate::now_millis;
use crate::types::{DirectoryId, GroupId, ItemId, UserId};
use crate::validation::{validate_directory_name, validate_email, validate_name};
use crate::vault::{self, KdfParams, WrappedPrivateKey};

/// Name of the root directory.
pub const ROOT_NAME: &str = "root";

/// Path of the root directory.
pub const ROOT_PATH: &str = "/";

/// A user: an identity with a key pair whose private half is password-wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Lowercase, unique.
    pub email: String,
    pub public_key: PublicKey,
    /// CBOR-encoded [`WrappedPrivateKey`].
    pub wrapped_private_key: Bytes,
    pub created_at: i64,
}

impl User {
    /// Parse the wrapped private key.
    pub fn wrapped_key(&self) -> Result<WrappedPrivateKey, CoreError> {
        WrappedPrivateKey::from_bytes(&self.wrapped_private_key)
    }

    /// Unlock the private key with `credential`.
    ///
    /// Fails with [`CoreError::WrongPassword`] if the credential is missing or
    /// wrong, or if the stored blob is unreadable or belongs to another key.
    pub fn unlock(&self, credential: Option<&Credential>) -> Result<SecretKey, CoreError> {
        let wrapped = self.wrapped_key().map_err(|_| {
            CoreError::WrongPassword(format!("can't read {}'s private key", self.name))
        })?;

        let secret = vault::unwrap(&wrapped, credential).map_err(|e| match e {
            CoreError::WrongPassword(reason) => {
                CoreError::WrongPassword(format!("{reason} for {}", self.name))
            }
            other => other,
        })?;

        if secret.public_key() != self.public_key {
            return Err(CoreError::WrongPassword(format!(
                "{}'s private key does not match the public key",
                self.name
            )));
        }
        Ok(secret)
    }

    /// Return a copy of this record with the private key re-wrapped under
    /// `new_credential`. The key pair itself is unchanged.
    pub fn with_password(
        &self,
        secret: &SecretKey,
        new_credential: &Credential,
        kdf: &KdfParams,
    ) -> Result<User, CoreError> {
        new_credential.validate_for_user()?;
        let wrapped = vault::rewrap(secret, new_credential, kdf)?;
        Ok(User {
            wrapped_private_key: Bytes::from(wrapped.to_bytes()?),
            ..self.clone()
        })
    }
}

/// A user that has been created but not persisted yet.
///
/// Its keys exist and can be unlocked, but it is not authenticated until
/// the store has accepted it.
#[derive(Debug, Clone)]
pub struct NewUser {
    user: User,
}

impl NewUser {
    /// Validate the fields and generate the user's key pair.
    pub fn create(
        name: &str,
        email: &str,
        credential: &Credential,
        kdf: &KdfParams,
    ) -> Result<Self, CoreError> {
        let name = validate_name(name)?;
        let email = validate_email(email)?;
        credential.validate_for_user()?;

        let (public_key, wrapped) = vault::generate(credential, kdf)?;

        Ok(Self {
            user: User {
                id: UserId::generate(),
                name,
                email,
                public_key,
                wrapped_private_key: Bytes::from(wrapped.to_bytes()?),
                created_at: now_millis(),
            },
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn into_user(self) -> User {
        self.user
    }
}

/// A sharing unit with its own key pair.
///
/// The group private key is never stored here. Each member holds a wrapped
/// copy in their [`Membership`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub public_key: PublicKey,
    /// Key generation, bumped on every rotation.
    pub key_epoch: u32,
    pub created_at: i64,
}

/// A membership edge: one member's wrapped copy of a group private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub group_id: GroupId,
    /// Group key generation the share was made from.
    pub key_epoch: u32,
    /// CBOR-encoded member key share.
    pub share: Bytes,
    /// Who extended the membership; `None` for the group's creator.
    pub granted_by: Option<UserId>,
    pub created_at: i64,
}

/// A stored secret belonging to exactly one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub group_id: GroupId,
    pub directory_id: Option<DirectoryId>,
    /// Plaintext label, e.g. the login the secret belongs to.
    pub username: String,
    /// Group key generation the secret is sealed to.
    pub key_epoch: u32,
    /// CBOR-encoded sealed secret.
    pub secret: Bytes,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A node in the directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: DirectoryId,
    pub name: String,
    pub path: String,
    pub parent_id: Option<DirectoryId>,
}

impl Directory {
    /// A new root directory.
    pub fn root() -> Self {
        Self {
            id: DirectoryId::generate(),
            name: ROOT_NAME.to_string(),
            path: ROOT_PATH.to_string(),
            parent_id: None,
        }
    }

    /// A new child of `parent`.
    pub fn child(parent: &Directory, name: &str) -> Result<Self, CoreError> {
        let name = validate_directory_name(name)?;
        Ok(Self {
            id: DirectoryId::generate(),
            path: child_path(&parent.path, &name),
            name,
            parent_id: Some(parent.id),
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this directory lies strictly beneath `ancestor`.
    pub fn is_beneath(&self, ancestor: &Directory) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.path
            .strip_prefix(ancestor.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Join a parent path and a child name.
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

/// An entry on a user's shortlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Favorite {
    Directory(DirectoryId),
    Item(ItemId),
}
