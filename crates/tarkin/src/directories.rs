//! The directory tree and per-user favorites.

use tarkin_core::{Directory, DirectoryId, Favorite, GroupId, Principal, UserId, ValidationError};
use tarkin_store::{GroupedDirectory, Store, StoreError};
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result};
use crate::keeper::Keeper;

impl<S: Store> Keeper<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────

    /// The root directory, created on first use.
    pub async fn root_directory(&self) -> Result<Directory> {
        if let Some(root) = self.store.root_directory().await? {
            return Ok(root);
        }

        let root = Directory::root();
        match self.store.insert_directory(&root, &[]).await {
            Ok(()) => {
                info!(directory_id = %root.id, "created root directory");
                Ok(root)
            }
            // Created concurrently.
            Err(StoreError::Duplicate(_)) => self
                .store
                .root_directory()
                .await?
                .ok_or_else(|| StoreError::NotFound("root directory".into()).into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_directory(&self, id: DirectoryId) -> Result<GroupedDirectory> {
        self.store
            .get_directory(id)
            .await?
            .ok_or(KeeperError::DirectoryNotFound(id))
    }

    /// Create `name` under `parent` (the root by default), associated with
    /// `group_id`. The principal must be an authenticated member of the group.
    pub async fn create_directory(
        &self,
        parent: Option<DirectoryId>,
        name: &str,
        group_id: GroupId,
        principal: &Principal,
    ) -> Result<Directory> {
        self.get_group(group_id).await?;
        self.require_member(group_id, principal).await?;

        let parent = self.resolve_directory(parent).await?;
        let directory = Directory::child(&parent, name)?;

        match self.store.insert_directory(&directory, &[group_id]).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(ValidationError::DirectoryNameTaken(directory.name).into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            directory_id = %directory.id,
            path = %directory.path,
            %group_id,
            created_by = %principal.id(),
            "created directory"
        );
        Ok(directory)
    }

    /// Associate a group with a directory. Returns `false` if it already was.
    pub async fn attach_group(
        &self,
        directory_id: DirectoryId,
        group_id: GroupId,
        principal: &Principal,
    ) -> Result<bool> {
        self.editable_directory(directory_id).await?;
        self.get_group(group_id).await?;
        self.require_member(group_id, principal).await?;

        let added = self.store.attach_group(directory_id, group_id).await?;
        info!(%directory_id, %group_id, added, "attached group");
        Ok(added)
    }

    /// Remove an association. Returns whether it existed.
    pub async fn detach_group(
        &self,
        directory_id: DirectoryId,
        group_id: GroupId,
        principal: &Principal,
    ) -> Result<bool> {
        self.editable_directory(directory_id).await?;
        self.require_member(group_id, principal).await?;

        let removed = self.store.detach_group(directory_id, group_id).await?;
        info!(%directory_id, %group_id, removed, "detached group");
        Ok(removed)
    }

    /// Delete an empty directory. The principal must be an authenticated
    /// member of one of its groups.
    pub async fn delete_directory(
        &self,
        directory_id: DirectoryId,
        principal: &Principal,
    ) -> Result<()> {
        let directory = self.editable_directory(directory_id).await?;

        let (user, _) = self.authorize(principal).await?;
        let view = self.access_view(user.id).await?;
        if !directory.groups.iter().any(|g| view.is_member(*g)) {
            warn!(user_id = %user.id, %directory_id, "not a member of any directory group");
            return Err(KeeperError::DirectoryNotAccessible(directory_id));
        }

        match self.store.delete_directory(directory_id).await {
            Ok(true) => {}
            Ok(false) => return Err(KeeperError::DirectoryNotFound(directory_id)),
            Err(StoreError::Conflict(_)) => return Err(ValidationError::DirectoryNotEmpty.into()),
            Err(e) => return Err(e.into()),
        }

        info!(
            %directory_id,
            path = %directory.directory.path,
            deleted_by = %user.id,
            "deleted directory"
        );
        Ok(())
    }

    /// A directory other than the root.
    async fn editable_directory(&self, id: DirectoryId) -> Result<GroupedDirectory> {
        let directory = self.get_directory(id).await?;
        if directory.directory.is_root() {
            return Err(ValidationError::RootDirectory.into());
        }
        Ok(directory)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Favorites
    // ─────────────────────────────────────────────────────────────────────────

    /// Put something the user can list on their shortlist. Returns `false`
    /// if it already was.
    pub async fn add_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        let view = self.access_view(user_id).await?;
        match favorite {
            Favorite::Directory(id) => {
                let directory = self.get_directory(id).await?;
                if !view.can_list_directory(&directory.directory, &directory.groups) {
                    return Err(KeeperError::DirectoryNotAccessible(id));
                }
            }
            Favorite::Item(id) => {
                let item = self.get_item(id).await?;
                if !view.can_list_item(&item) {
                    return Err(KeeperError::ItemNotAccessible(id));
                }
            }
        }

        let added = self.store.add_favorite(user_id, favorite).await?;
        debug!(%user_id, ?favorite, added, "added favorite");
        Ok(added)
    }

    pub async fn remove_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        Ok(self.store.remove_favorite(user_id, favorite).await?)
    }

    pub async fn is_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        Ok(self.favorites(user_id).await?.contains(&favorite))
    }

    /// The user's favorites that they can still list, in the order added.
    pub async fn favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        let view = self.access_view(user_id).await?;
        let mut visible = Vec::new();

        for favorite in self.store.list_favorites(user_id).await? {
            let listable = match favorite {
                Favorite::Directory(id) => match self.store.get_directory(id).await? {
                    Some(d) => view.can_list_directory(&d.directory, &d.groups),
                    None => false,
                },
                Favorite::Item(id) => match self.store.get_item(id).await? {
                    Some(item) => view.can_list_item(&item),
                    None => false,
                },
            };
            if listable {
                visible.push(favorite);
            }
        }
        Ok(visible)
    }
}
