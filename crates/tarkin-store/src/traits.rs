//! Store trait: the abstract interface for record persistence.
//!
//! This trait keeps the keeper storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use tarkin_core::{
    Directory, DirectoryId, Favorite, Group, GroupId, Item, ItemId, Membership, Pattern,
    PublicKey, User, UserId,
};

use crate::error::{Result, StoreError};

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// A new record was written.
    Inserted,
    /// An existing record was overwritten.
    Replaced,
}

/// A group key rotation, applied as one atomic commit.
///
/// The rotation is prepared against a snapshot of the group: its epoch,
/// its member set, its item set and each item's sealed secret. The store
/// refuses it if any of those moved in the meantime.
#[derive(Debug, Clone)]
pub struct GroupRotation {
    pub group_id: GroupId,
    /// The epoch the rotation was prepared against.
    pub expected_epoch: u32,
    /// The new group public key.
    pub public_key: PublicKey,
    /// One new share per remaining member, at `expected_epoch + 1`.
    pub memberships: Vec<Membership>,
    /// Every item of the group, re-sealed under `public_key`.
    pub items: Vec<ResealedItem>,
    pub rotated_at: i64,
}

/// One item's secret, re-sealed for a rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResealedItem {
    pub id: ItemId,
    /// The sealed secret the re-seal was made from. The item must still hold
    /// it when the rotation commits.
    pub previous: Bytes,
    pub secret: Bytes,
}

impl GroupRotation {
    pub fn new_epoch(&self) -> u32 {
        self.expected_epoch + 1
    }

    /// Check the rotation against the group's state inside the commit.
    pub(crate) fn check_against(
        &self,
        current_epoch: u32,
        members: &BTreeSet<UserId>,
        items: &BTreeSet<ItemId>,
    ) -> Result<()> {
        if current_epoch != self.expected_epoch {
            return Err(StoreError::Conflict(format!(
                "group {} is at epoch {current_epoch}, rotation expected {}",
                self.group_id, self.expected_epoch
            )));
        }

        let new_epoch = self.new_epoch();
        if let Some(m) = self
            .memberships
            .iter()
            .find(|m| m.group_id != self.group_id || m.key_epoch != new_epoch)
        {
            return Err(StoreError::InvalidData(format!(
                "rotation share for {} is not at {} epoch {new_epoch}",
                m.user_id, self.group_id
            )));
        }

        let rotated: BTreeSet<UserId> = self.memberships.iter().map(|m| m.user_id).collect();
        if rotated.len() != self.memberships.len() || &rotated != members {
            return Err(StoreError::Conflict(format!(
                "members of {} changed during rotation",
                self.group_id
            )));
        }

        let resealed: BTreeSet<ItemId> = self.items.iter().map(|i| i.id).collect();
        if resealed.len() != self.items.len() || &resealed != items {
            return Err(StoreError::Conflict(format!(
                "items of {} changed during rotation",
                self.group_id
            )));
        }

        Ok(())
    }
}

/// A directory with the groups associated with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedDirectory {
    pub directory: Directory,
    pub groups: Vec<GroupId>,
}

/// Which directories to list. Results are ordered by path.
#[derive(Debug, Clone, Copy)]
pub enum DirectoryFilter<'a> {
    All,
    ChildrenOf(DirectoryId),
    PathMatches(&'a Pattern),
    NameMatches(&'a Pattern),
}

/// Which items to list. Results are ordered by username, then id.
#[derive(Debug, Clone, Copy)]
pub enum ItemFilter<'a> {
    All,
    /// Items placed in a directory; `None` selects unfiled items.
    InDirectory(Option<DirectoryId>),
    Group(GroupId),
    UsernameMatches(&'a Pattern),
}

/// The Store trait: async interface for record persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the runtime.
///
/// # Atomicity
///
/// Each method is one commit. The ones that carry key material also check
/// the group's key epoch inside that commit, so a write prepared against a
/// rotated-away key is rejected with `StaleKeyEpoch` rather than stored.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new user. Fails with `Duplicate` if the id or the
    /// (case-insensitive) email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Look up a user by email, case-insensitively.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Replace a user's wrapped private key.
    ///
    /// Compare-and-swap: fails with `Conflict` if the stored key is no longer
    /// `previous`, e.g. after a concurrent password change.
    async fn update_user_key(&self, id: UserId, previous: &Bytes, wrapped: &Bytes) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Groups and memberships
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a group together with its creator's membership edge.
    async fn create_group(&self, group: &Group, creator: &Membership) -> Result<()>;

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Insert or replace the edge for `(membership.user_id, membership.group_id)`.
    ///
    /// Fails with `NotFound` if the user or group does not exist, and with
    /// `StaleKeyEpoch` if the edge's epoch differs from the group's.
    async fn upsert_membership(&self, membership: &Membership) -> Result<InsertResult>;

    async fn get_membership(&self, user_id: UserId, group_id: GroupId)
        -> Result<Option<Membership>>;

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>>;

    async fn list_group_memberships(&self, group_id: GroupId) -> Result<Vec<Membership>>;

    /// Remove an edge, optionally rotating the group key in the same commit.
    ///
    /// Fails with `NotFound` if there is no such edge and with `Conflict` if
    /// it is the group's last one. With a rotation, its member set must be
    /// exactly the remaining members.
    async fn revoke_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
        rotation: Option<&GroupRotation>,
    ) -> Result<()>;

    /// Apply a key rotation. Fails with `Conflict` if the epoch, the member
    /// set or the item set moved since the rotation was prepared, or if an
    /// item's secret was replaced since.
    async fn rotate_group(&self, rotation: &GroupRotation) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an item. Fails with `NotFound` if its group or directory does
    /// not exist and with `StaleKeyEpoch` if it is sealed to an old key.
    async fn insert_item(&self, item: &Item) -> Result<()>;

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>>;

    /// Replace an item's sealed secret.
    async fn update_item_secret(
        &self,
        id: ItemId,
        key_epoch: u32,
        secret: &Bytes,
        updated_at: i64,
    ) -> Result<()>;

    /// Move an item to a directory, or out of every directory.
    async fn set_item_directory(&self, id: ItemId, directory_id: Option<DirectoryId>)
        -> Result<()>;

    /// Delete an item and any favorites naming it. Returns whether it existed.
    async fn delete_item(&self, id: ItemId) -> Result<bool>;

    async fn list_items(&self, filter: ItemFilter<'_>) -> Result<Vec<Item>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a directory associated with `groups`.
    ///
    /// Fails with `NotFound` if the parent or a group is missing and with
    /// `Duplicate` if a sibling has the same name or a root exists.
    async fn insert_directory(&self, directory: &Directory, groups: &[GroupId]) -> Result<()>;

    async fn get_directory(&self, id: DirectoryId) -> Result<Option<GroupedDirectory>>;

    async fn root_directory(&self) -> Result<Option<Directory>>;

    async fn list_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<GroupedDirectory>>;

    /// Delete a directory with its group associations and favorites.
    ///
    /// Fails with `Conflict` if it still has children or items.
    async fn delete_directory(&self, id: DirectoryId) -> Result<bool>;

    /// Associate a group with a directory. Returns `false` if it already was.
    async fn attach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool>;

    /// Remove an association. Returns whether it existed.
    async fn detach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Favorites
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns `false` if it was already a favorite.
    async fn add_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool>;

    async fn remove_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool>;

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>>;
}
