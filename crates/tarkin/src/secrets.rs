//! Item secrets.
//!
//! Writing a secret needs only the group's public key, so creating and
//! updating items requires no principal. Reading one goes through the
//! reader's own key share on every call.

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use tarkin_core::{now_millis, DirectoryId, GroupId, Item, ItemId, Principal};
use tarkin_perms::SealedSecret;
use tarkin_store::Store;
use tracing::{debug, info};

use crate::error::{KeeperError, Result};
use crate::keeper::Keeper;

/// An item to be created.
#[derive(Debug)]
pub struct NewItem {
    pub group_id: GroupId,
    pub directory_id: Option<DirectoryId>,
    pub username: String,
    pub secret: SecretString,
}

impl NewItem {
    /// An unfiled item of `group_id`.
    pub fn new(group_id: GroupId, username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            group_id,
            directory_id: None,
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Place the item in a directory.
    pub fn in_directory(mut self, directory_id: DirectoryId) -> Self {
        self.directory_id = Some(directory_id);
        self
    }
}

impl<S: Store> Keeper<S> {
    /// Seal a new item to its group's current key.
    pub async fn create_item(&self, new_item: NewItem) -> Result<Item> {
        let group = self.get_group(new_item.group_id).await?;
        if let Some(directory_id) = new_item.directory_id {
            self.get_directory(directory_id).await?;
        }

        let id = ItemId::generate();
        let sealed = SealedSecret::seal(
            id,
            new_item.secret.expose_secret().as_bytes(),
            &group.public_key,
        )?;

        let now = now_millis();
        let item = Item {
            id,
            group_id: group.id,
            directory_id: new_item.directory_id,
            username: new_item.username,
            key_epoch: group.key_epoch,
            secret: Bytes::from(sealed.to_bytes()?),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_item(&item).await?;

        info!(item_id = %item.id, group_id = %group.id, username = %item.username, "created item");
        Ok(item)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.store
            .get_item(id)
            .await?
            .ok_or(KeeperError::ItemNotFound(id))
    }

    /// Re-seal an item with a new plaintext.
    pub async fn update_item_secret(&self, id: ItemId, secret: &str) -> Result<Item> {
        let item = self.get_item(id).await?;
        let group = self.get_group(item.group_id).await?;

        let sealed = SealedSecret::seal(id, secret.as_bytes(), &group.public_key)?;
        let sealed = Bytes::from(sealed.to_bytes()?);
        let now = now_millis();
        self.store
            .update_item_secret(id, group.key_epoch, &sealed, now)
            .await?;

        info!(item_id = %id, group_id = %group.id, "updated item secret");
        Ok(Item {
            key_epoch: group.key_epoch,
            secret: sealed,
            updated_at: now,
            ..item
        })
    }

    /// Recover an item's plaintext through the principal's key share.
    ///
    /// Fails with `NotAuthorized` if the principal is not authenticated and
    /// with `ItemNotAccessible` if they are not a member of the item's group.
    pub async fn decrypt_item(&self, id: ItemId, principal: &Principal) -> Result<SecretString> {
        let item = self.get_item(id).await?;

        let access = match self.open_group(item.group_id, principal).await {
            Ok(access) => access,
            Err(KeeperError::GroupNotAccessible(_)) => {
                return Err(KeeperError::ItemNotAccessible(id));
            }
            Err(e) => return Err(e),
        };

        let sealed = SealedSecret::from_bytes(&item.secret)?;
        let plaintext = sealed.open_string(id, &access.secret)?;

        debug!(item_id = %id, user_id = %principal.id(), "decrypted item");
        Ok(SecretString::from(plaintext))
    }

    /// Move an item into a directory, or out of every directory.
    pub async fn move_item(&self, id: ItemId, directory_id: Option<DirectoryId>) -> Result<Item> {
        let item = self.get_item(id).await?;
        if let Some(directory_id) = directory_id {
            self.get_directory(directory_id).await?;
        }

        self.store.set_item_directory(id, directory_id).await?;

        debug!(item_id = %id, directory_id = ?directory_id, "moved item");
        Ok(Item {
            directory_id,
            ..item
        })
    }

    /// Delete an item, authorized by a member of its group.
    pub async fn delete_item(&self, id: ItemId, principal: &Principal) -> Result<()> {
        let item = self.get_item(id).await?;

        match self.require_member(item.group_id, principal).await {
            Ok(_) => {}
            Err(KeeperError::GroupNotAccessible(_)) => {
                return Err(KeeperError::ItemNotAccessible(id));
            }
            Err(e) => return Err(e),
        }

        if !self.store.delete_item(id).await? {
            return Err(KeeperError::ItemNotFound(id));
        }

        info!(item_id = %id, deleted_by = %principal.id(), "deleted item");
        Ok(())
    }
}
