//! Listing and search.
//!
//! Visibility comes from membership edges alone, so these methods take a
//! [`UserId`] and never a credential.

use std::collections::HashSet;

use tarkin_core::{Directory, DirectoryId, GroupId, Item, Pattern, UserId};
use tarkin_perms::AccessView;
use tarkin_store::{DirectoryFilter, GroupedDirectory, ItemFilter, Store};
use tracing::debug;

use crate::error::{KeeperError, Result};
use crate::keeper::Keeper;

/// The visible content of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<Directory>,
    pub items: Vec<Item>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.items.is_empty()
    }
}

impl<S: Store> Keeper<S> {
    /// What `user_id` can see, built from their memberships.
    pub async fn access_view(&self, user_id: UserId) -> Result<AccessView> {
        let (user, memberships) = tokio::try_join!(
            self.store.get_user(user_id),
            self.store.list_user_memberships(user_id),
        )?;
        if user.is_none() {
            return Err(KeeperError::UserNotFound(user_id));
        }
        Ok(AccessView::from_memberships(user_id, &memberships))
    }

    pub async fn is_member(&self, user_id: UserId, group_id: GroupId) -> Result<bool> {
        Ok(self
            .store
            .get_membership(user_id, group_id)
            .await?
            .is_some())
    }

    /// The visible children and items of `directory` (the root by default).
    ///
    /// `pattern` filters directories by path and items by username.
    pub async fn ls(
        &self,
        user_id: UserId,
        directory: Option<DirectoryId>,
        pattern: Option<&Pattern>,
    ) -> Result<Listing> {
        let (directories, items) = tokio::try_join!(
            self.ls_dirs(user_id, directory, pattern),
            self.ls_items(user_id, directory, pattern),
        )?;
        Ok(Listing { directories, items })
    }

    /// Like [`ls`](Self::ls), directories only.
    pub async fn ls_dirs(
        &self,
        user_id: UserId,
        directory: Option<DirectoryId>,
        pattern: Option<&Pattern>,
    ) -> Result<Vec<Directory>> {
        let view = self.access_view(user_id).await?;
        let parent = self.resolve_directory(directory).await?;

        let children = self
            .store
            .list_directories(DirectoryFilter::ChildrenOf(parent.id))
            .await?;
        let dirs = visible_directories(&view, children)
            .filter(|d| pattern.map_or(true, |p| p.matches(&d.path)))
            .collect::<Vec<_>>();

        debug!(%user_id, path = %parent.path, count = dirs.len(), "listed directories");
        Ok(dirs)
    }

    /// Like [`ls`](Self::ls), items only. Unfiled items are listed at the root.
    pub async fn ls_items(
        &self,
        user_id: UserId,
        directory: Option<DirectoryId>,
        pattern: Option<&Pattern>,
    ) -> Result<Vec<Item>> {
        let view = self.access_view(user_id).await?;
        let parent = self.resolve_directory(directory).await?;

        let mut items = self
            .store
            .list_items(ItemFilter::InDirectory(Some(parent.id)))
            .await?;
        if parent.is_root() {
            items.extend(self.store.list_items(ItemFilter::InDirectory(None)).await?);
            sort_items(&mut items);
        }
        items.retain(|item| {
            view.can_list_item(item) && pattern.map_or(true, |p| p.matches(&item.username))
        });

        debug!(%user_id, path = %parent.path, count = items.len(), "listed items");
        Ok(items)
    }

    /// Visible directories whose path matches `pattern`, optionally only
    /// those strictly beneath `under`.
    pub async fn search_dirs(
        &self,
        user_id: UserId,
        pattern: &Pattern,
        under: Option<DirectoryId>,
    ) -> Result<Vec<Directory>> {
        self.search_directories(user_id, DirectoryFilter::PathMatches(pattern), under)
            .await
    }

    /// Like [`search_dirs`](Self::search_dirs), matching the name only.
    pub async fn search_dir_names(
        &self,
        user_id: UserId,
        pattern: &Pattern,
        under: Option<DirectoryId>,
    ) -> Result<Vec<Directory>> {
        self.search_directories(user_id, DirectoryFilter::NameMatches(pattern), under)
            .await
    }

    /// Visible items whose username matches `pattern`, optionally only those
    /// placed in `under` or beneath it.
    pub async fn search_items(
        &self,
        user_id: UserId,
        pattern: &Pattern,
        under: Option<DirectoryId>,
    ) -> Result<Vec<Item>> {
        let view = self.access_view(user_id).await?;
        let mut items = self
            .store
            .list_items(ItemFilter::UsernameMatches(pattern))
            .await?;
        items.retain(|item| view.can_list_item(item));

        if let Some(under) = under {
            let subtree = self.subtree(under).await?;
            items.retain(|item| match item.directory_id {
                Some(id) => subtree.ids.contains(&id),
                None => subtree.root,
            });
        }

        debug!(%user_id, pattern = pattern.as_str(), count = items.len(), "searched items");
        Ok(items)
    }

    /// Every item the user can list.
    pub async fn user_items(&self, user_id: UserId) -> Result<Vec<Item>> {
        let view = self.access_view(user_id).await?;
        let mut items = self.store.list_items(ItemFilter::All).await?;
        items.retain(|item| view.can_list_item(item));
        Ok(items)
    }

    /// Every directory the user can list, the root included.
    pub async fn user_directories(&self, user_id: UserId) -> Result<Vec<Directory>> {
        let view = self.access_view(user_id).await?;
        let all = self.store.list_directories(DirectoryFilter::All).await?;
        Ok(visible_directories(&view, all).collect())
    }

    async fn search_directories(
        &self,
        user_id: UserId,
        filter: DirectoryFilter<'_>,
        under: Option<DirectoryId>,
    ) -> Result<Vec<Directory>> {
        let view = self.access_view(user_id).await?;
        let found = self.store.list_directories(filter).await?;
        let mut dirs: Vec<Directory> = visible_directories(&view, found).collect();

        if let Some(under) = under {
            let ancestor = self.get_directory(under).await?.directory;
            dirs.retain(|d| d.is_beneath(&ancestor));
        }

        debug!(%user_id, ?filter, count = dirs.len(), "searched directories");
        Ok(dirs)
    }

    /// The directory `id`, or the root when `None`.
    pub(crate) async fn resolve_directory(&self, id: Option<DirectoryId>) -> Result<Directory> {
        match id {
            Some(id) => Ok(self.get_directory(id).await?.directory),
            None => self.root_directory().await,
        }
    }

    /// `under` and every directory beneath it.
    async fn subtree(&self, under: DirectoryId) -> Result<Subtree> {
        let ancestor = self.get_directory(under).await?.directory;
        let all = self.store.list_directories(DirectoryFilter::All).await?;
        let ids = all
            .into_iter()
            .map(|d| d.directory)
            .filter(|d| d.id == ancestor.id || d.is_beneath(&ancestor))
            .map(|d| d.id)
            .collect();
        Ok(Subtree {
            ids,
            root: ancestor.is_root(),
        })
    }
}

struct Subtree {
    ids: HashSet<DirectoryId>,
    /// Whether the subtree starts at the root, which also holds unfiled items.
    root: bool,
}

fn visible_directories(
    view: &AccessView,
    dirs: Vec<GroupedDirectory>,
) -> impl Iterator<Item = Directory> + '_ {
    dirs.into_iter()
        .filter(move |d| view.can_list_directory(&d.directory, &d.groups))
        .map(|d| d.directory)
}

fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
}
