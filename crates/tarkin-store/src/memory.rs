//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. Every method takes
//! a single lock, which makes each call one atomic commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use tarkin_core::{
    normalize_email, Directory, DirectoryId, Favorite, Group, GroupId, Item, ItemId, Membership,
    User, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    DirectoryFilter, GroupRotation, GroupedDirectory, InsertResult, ItemFilter, Store,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<UserId, User>,

    /// Email index: lowercase email -> user id.
    emails: HashMap<String, UserId>,

    groups: HashMap<GroupId, Group>,

    /// Membership edges keyed by (group, user).
    memberships: BTreeMap<(GroupId, UserId), Membership>,

    items: HashMap<ItemId, Item>,

    directories: HashMap<DirectoryId, Directory>,

    directory_groups: BTreeSet<(DirectoryId, GroupId)>,

    /// Favorites per user, in insertion order.
    favorites: HashMap<UserId, Vec<Favorite>>,
}

impl MemoryStoreInner {
    fn group_members(&self, group_id: GroupId) -> BTreeSet<UserId> {
        let lo = (group_id, UserId::from_bytes([0; 16]));
        let hi = (group_id, UserId::from_bytes([0xff; 16]));
        self.memberships
            .range(lo..=hi)
            .map(|((_, user_id), _)| *user_id)
            .collect()
    }

    fn group_items(&self, group_id: GroupId) -> BTreeSet<ItemId> {
        self.items
            .values()
            .filter(|item| item.group_id == group_id)
            .map(|item| item.id)
            .collect()
    }

    fn grouped(&self, directory: &Directory) -> GroupedDirectory {
        let groups = self
            .directory_groups
            .iter()
            .filter(|(d, _)| *d == directory.id)
            .map(|(_, g)| *g)
            .collect();
        GroupedDirectory {
            directory: directory.clone(),
            groups,
        }
    }

    fn apply_rotation(&mut self, rotation: &GroupRotation) -> Result<()> {
        let group = self
            .groups
            .get(&rotation.group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {}", rotation.group_id)))?;

        let members = self.group_members(rotation.group_id);
        let items = self.group_items(rotation.group_id);
        rotation.check_against(group.key_epoch, &members, &items)?;
        if let Some(stale) = rotation
            .items
            .iter()
            .find(|r| self.items.get(&r.id).map_or(true, |i| i.secret != r.previous))
        {
            return Err(StoreError::Conflict(format!(
                "item {} changed during rotation",
                stale.id
            )));
        }

        let new_epoch = rotation.new_epoch();
        if let Some(group) = self.groups.get_mut(&rotation.group_id) {
            group.public_key = rotation.public_key;
            group.key_epoch = new_epoch;
        }
        for membership in &rotation.memberships {
            self.memberships
                .insert((membership.group_id, membership.user_id), membership.clone());
        }
        for resealed in &rotation.items {
            if let Some(item) = self.items.get_mut(&resealed.id) {
                item.secret = resealed.secret.clone();
                item.key_epoch = new_epoch;
                item.updated_at = rotation.rotated_at;
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {e}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.write()?;

        let email = normalize_email(&user.email);
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(format!("user {}", user.id)));
        }
        if inner.emails.contains_key(&email) {
            return Err(StoreError::Duplicate(format!("email {email}")));
        }

        inner.emails.insert(email, user.id);
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.read()?;
        Ok(inner
            .emails
            .get(&normalize_email(email))
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn update_user_key(&self, id: UserId, previous: &Bytes, wrapped: &Bytes) -> Result<()> {
        let mut inner = self.write()?;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

        if &user.wrapped_private_key != previous {
            return Err(StoreError::Conflict(format!("key of user {id} changed")));
        }
        user.wrapped_private_key = wrapped.clone();
        Ok(())
    }

    async fn create_group(&self, group: &Group, creator: &Membership) -> Result<()> {
        let mut inner = self.write()?;

        if inner.groups.contains_key(&group.id) {
            return Err(StoreError::Duplicate(format!("group {}", group.id)));
        }
        if !inner.users.contains_key(&creator.user_id) {
            return Err(StoreError::NotFound(format!("user {}", creator.user_id)));
        }
        if creator.group_id != group.id {
            return Err(StoreError::InvalidData(format!(
                "creator edge is for {}, not {}",
                creator.group_id, group.id
            )));
        }
        if creator.key_epoch != group.key_epoch {
            return Err(StoreError::StaleKeyEpoch {
                expected: group.key_epoch,
                actual: creator.key_epoch,
            });
        }

        inner.groups.insert(group.id, group.clone());
        inner
            .memberships
            .insert((group.id, creator.user_id), creator.clone());
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.read()?.groups.get(&id).cloned())
    }

    async fn upsert_membership(&self, membership: &Membership) -> Result<InsertResult> {
        let mut inner = self.write()?;

        let group = inner
            .groups
            .get(&membership.group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {}", membership.group_id)))?;
        if !inner.users.contains_key(&membership.user_id) {
            return Err(StoreError::NotFound(format!("user {}", membership.user_id)));
        }
        if membership.key_epoch != group.key_epoch {
            return Err(StoreError::StaleKeyEpoch {
                expected: group.key_epoch,
                actual: membership.key_epoch,
            });
        }

        let previous = inner
            .memberships
            .insert((membership.group_id, membership.user_id), membership.clone());
        Ok(match previous {
            Some(_) => InsertResult::Replaced,
            None => InsertResult::Inserted,
        })
    }

    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<Option<Membership>> {
        Ok(self.read()?.memberships.get(&(group_id, user_id)).cloned())
    }

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_group_memberships(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        let inner = self.read()?;
        Ok(inner
            .group_members(group_id)
            .into_iter()
            .filter_map(|user_id| inner.memberships.get(&(group_id, user_id)).cloned())
            .collect())
    }

    async fn revoke_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
        rotation: Option<&GroupRotation>,
    ) -> Result<()> {
        let mut inner = self.write()?;

        let mut members = inner.group_members(group_id);
        if !members.remove(&user_id) {
            return Err(StoreError::NotFound(format!(
                "membership of {user_id} in {group_id}"
            )));
        }
        if members.is_empty() {
            return Err(StoreError::Conflict(format!(
                "{user_id} is the last member of {group_id}"
            )));
        }

        if let Some(rotation) = rotation {
            if rotation.group_id != group_id {
                return Err(StoreError::InvalidData(format!(
                    "rotation is for {}, not {group_id}",
                    rotation.group_id
                )));
            }
            // Validate against the post-revoke member set before touching anything.
            let epoch = inner
                .groups
                .get(&group_id)
                .map(|g| g.key_epoch)
                .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
            rotation.check_against(epoch, &members, &inner.group_items(group_id))?;

            inner.memberships.remove(&(group_id, user_id));
            inner.apply_rotation(rotation)?;
        } else {
            inner.memberships.remove(&(group_id, user_id));
        }
        Ok(())
    }

    async fn rotate_group(&self, rotation: &GroupRotation) -> Result<()> {
        self.write()?.apply_rotation(rotation)
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let mut inner = self.write()?;

        if inner.items.contains_key(&item.id) {
            return Err(StoreError::Duplicate(format!("item {}", item.id)));
        }
        let group = inner
            .groups
            .get(&item.group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {}", item.group_id)))?;
        if item.key_epoch != group.key_epoch {
            return Err(StoreError::StaleKeyEpoch {
                expected: group.key_epoch,
                actual: item.key_epoch,
            });
        }
        if let Some(dir) = item.directory_id {
            if !inner.directories.contains_key(&dir) {
                return Err(StoreError::NotFound(format!("directory {dir}")));
            }
        }

        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    async fn update_item_secret(
        &self,
        id: ItemId,
        key_epoch: u32,
        secret: &Bytes,
        updated_at: i64,
    ) -> Result<()> {
        let mut inner = self.write()?;

        let group_id = inner
            .items
            .get(&id)
            .map(|item| item.group_id)
            .ok_or_else(|| StoreError::NotFound(format!("item {id}")))?;
        let current = inner
            .groups
            .get(&group_id)
            .map(|g| g.key_epoch)
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        if key_epoch != current {
            return Err(StoreError::StaleKeyEpoch {
                expected: current,
                actual: key_epoch,
            });
        }

        if let Some(item) = inner.items.get_mut(&id) {
            item.secret = secret.clone();
            item.key_epoch = key_epoch;
            item.updated_at = updated_at;
        }
        Ok(())
    }

    async fn set_item_directory(
        &self,
        id: ItemId,
        directory_id: Option<DirectoryId>,
    ) -> Result<()> {
        let mut inner = self.write()?;

        if let Some(dir) = directory_id {
            if !inner.directories.contains_key(&dir) {
                return Err(StoreError::NotFound(format!("directory {dir}")));
            }
        }
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("item {id}")))?;
        item.directory_id = directory_id;
        Ok(())
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool> {
        let mut inner = self.write()?;

        let existed = inner.items.remove(&id).is_some();
        for favorites in inner.favorites.values_mut() {
            favorites.retain(|f| *f != Favorite::Item(id));
        }
        Ok(existed)
    }

    async fn list_items(&self, filter: ItemFilter<'_>) -> Result<Vec<Item>> {
        let inner = self.read()?;

        let mut items: Vec<Item> = inner
            .items
            .values()
            .filter(|item| match filter {
                ItemFilter::All => true,
                ItemFilter::InDirectory(dir) => item.directory_id == dir,
                ItemFilter::Group(group_id) => item.group_id == group_id,
                ItemFilter::UsernameMatches(pattern) => pattern.matches(&item.username),
            })
            .cloned()
            .collect();
        sort_items(&mut items);
        Ok(items)
    }

    async fn insert_directory(&self, directory: &Directory, groups: &[GroupId]) -> Result<()> {
        let mut inner = self.write()?;

        if inner.directories.contains_key(&directory.id) {
            return Err(StoreError::Duplicate(format!("directory {}", directory.id)));
        }
        match directory.parent_id {
            None => {
                if inner.directories.values().any(Directory::is_root) {
                    return Err(StoreError::Duplicate("root directory".into()));
                }
            }
            Some(parent) => {
                if !inner.directories.contains_key(&parent) {
                    return Err(StoreError::NotFound(format!("directory {parent}")));
                }
                if inner
                    .directories
                    .values()
                    .any(|d| d.parent_id == Some(parent) && d.name == directory.name)
                {
                    return Err(StoreError::Duplicate(format!(
                        "directory {} in {parent}",
                        directory.name
                    )));
                }
            }
        }

        if let Some(missing) = groups.iter().find(|g| !inner.groups.contains_key(*g)) {
            return Err(StoreError::NotFound(format!("group {missing}")));
        }

        inner.directories.insert(directory.id, directory.clone());
        inner
            .directory_groups
            .extend(groups.iter().map(|g| (directory.id, *g)));
        Ok(())
    }

    async fn get_directory(&self, id: DirectoryId) -> Result<Option<GroupedDirectory>> {
        let inner = self.read()?;
        Ok(inner.directories.get(&id).map(|d| inner.grouped(d)))
    }

    async fn root_directory(&self) -> Result<Option<Directory>> {
        Ok(self
            .read()?
            .directories
            .values()
            .find(|d| d.is_root())
            .cloned())
    }

    async fn list_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<GroupedDirectory>> {
        let inner = self.read()?;

        let mut dirs: Vec<GroupedDirectory> = inner
            .directories
            .values()
            .filter(|d| match filter {
                DirectoryFilter::All => true,
                DirectoryFilter::ChildrenOf(parent) => d.parent_id == Some(parent),
                DirectoryFilter::PathMatches(pattern) => pattern.matches(&d.path),
                DirectoryFilter::NameMatches(pattern) => pattern.matches(&d.name),
            })
            .map(|d| inner.grouped(d))
            .collect();
        dirs.sort_by(|a, b| a.directory.path.cmp(&b.directory.path));
        Ok(dirs)
    }

    async fn delete_directory(&self, id: DirectoryId) -> Result<bool> {
        let mut inner = self.write()?;

        if !inner.directories.contains_key(&id) {
            return Ok(false);
        }
        if inner.directories.values().any(|d| d.parent_id == Some(id))
            || inner.items.values().any(|i| i.directory_id == Some(id))
        {
            return Err(StoreError::Conflict(format!("directory {id} is not empty")));
        }

        inner.directories.remove(&id);
        inner.directory_groups.retain(|(d, _)| *d != id);
        for favorites in inner.favorites.values_mut() {
            favorites.retain(|f| *f != Favorite::Directory(id));
        }
        Ok(true)
    }

    async fn attach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        let mut inner = self.write()?;

        if !inner.directories.contains_key(&directory_id) {
            return Err(StoreError::NotFound(format!("directory {directory_id}")));
        }
        if !inner.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        Ok(inner.directory_groups.insert((directory_id, group_id)))
    }

    async fn detach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        Ok(self
            .write()?
            .directory_groups
            .remove(&(directory_id, group_id)))
    }

    async fn add_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        let mut inner = self.write()?;

        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        let exists = match favorite {
            Favorite::Directory(id) => inner.directories.contains_key(&id),
            Favorite::Item(id) => inner.items.contains_key(&id),
        };
        if !exists {
            return Err(StoreError::NotFound(format!("{favorite:?}")));
        }

        let favorites = inner.favorites.entry(user_id).or_default();
        if favorites.contains(&favorite) {
            return Ok(false);
        }
        favorites.push(favorite);
        Ok(true)
    }

    async fn remove_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(favorites) = inner.favorites.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = favorites.len();
        favorites.retain(|f| *f != favorite);
        Ok(favorites.len() != before)
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        Ok(self
            .read()?
            .favorites
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
