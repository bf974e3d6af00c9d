//! Writes that land between a keeper operation's reads and its commit.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::ExposeSecret;
use tarkin::core::Membership;
use tarkin::perms::SealedSecret;
use tarkin::store::{
    DirectoryFilter, GroupRotation, GroupedDirectory, InsertResult, ItemFilter, MemoryStore,
    Result, Store, StoreError,
};
use tarkin::{
    Directory, DirectoryId, Favorite, Group, GroupId, Item, ItemId, KeeperConfig, KeeperError,
    NewItem, User, UserId,
};
use tarkin_testkit::TestFixture;

/// A write to apply right before the next commit of the matching kind.
enum Interference {
    UpdateItem { id: ItemId, key_epoch: u32, secret: Bytes },
    Revoke { group_id: GroupId, user_id: UserId },
}

/// A [`MemoryStore`] that commits one competing write just before a
/// rotation or a revocation.
#[derive(Default)]
struct InterleavedStore {
    inner: MemoryStore,
    pending: Mutex<Option<Interference>>,
}

impl InterleavedStore {
    fn interfere(&self, interference: Interference) {
        *self.pending.lock().unwrap() = Some(interference);
    }

    async fn apply_pending(&self) -> Result<()> {
        let pending = self.pending.lock().unwrap().take();
        match pending {
            Some(Interference::UpdateItem { id, key_epoch, secret }) => {
                self.inner.update_item_secret(id, key_epoch, &secret, 1).await
            }
            Some(Interference::Revoke { group_id, user_id }) => {
                self.inner.revoke_membership(group_id, user_id, None).await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Store for InterleavedStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.inner.insert_user(user).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn update_user_key(&self, id: UserId, previous: &Bytes, wrapped: &Bytes) -> Result<()> {
        self.inner.update_user_key(id, previous, wrapped).await
    }

    async fn create_group(&self, group: &Group, creator: &Membership) -> Result<()> {
        self.inner.create_group(group, creator).await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.inner.get_group(id).await
    }

    async fn upsert_membership(&self, membership: &Membership) -> Result<InsertResult> {
        self.inner.upsert_membership(membership).await
    }

    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<Option<Membership>> {
        self.inner.get_membership(user_id, group_id).await
    }

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        self.inner.list_user_memberships(user_id).await
    }

    async fn list_group_memberships(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        self.inner.list_group_memberships(group_id).await
    }

    async fn revoke_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
        rotation: Option<&GroupRotation>,
    ) -> Result<()> {
        self.apply_pending().await?;
        self.inner.revoke_membership(group_id, user_id, rotation).await
    }

    async fn rotate_group(&self, rotation: &GroupRotation) -> Result<()> {
        self.apply_pending().await?;
        self.inner.rotate_group(rotation).await
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        self.inner.insert_item(item).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        self.inner.get_item(id).await
    }

    async fn update_item_secret(
        &self,
        id: ItemId,
        key_epoch: u32,
        secret: &Bytes,
        updated_at: i64,
    ) -> Result<()> {
        self.inner
            .update_item_secret(id, key_epoch, secret, updated_at)
            .await
    }

    async fn set_item_directory(
        &self,
        id: ItemId,
        directory_id: Option<DirectoryId>,
    ) -> Result<()> {
        self.inner.set_item_directory(id, directory_id).await
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool> {
        self.inner.delete_item(id).await
    }

    async fn list_items(&self, filter: ItemFilter<'_>) -> Result<Vec<Item>> {
        self.inner.list_items(filter).await
    }

    async fn insert_directory(&self, directory: &Directory, groups: &[GroupId]) -> Result<()> {
        self.inner.insert_directory(directory, groups).await
    }

    async fn get_directory(&self, id: DirectoryId) -> Result<Option<GroupedDirectory>> {
        self.inner.get_directory(id).await
    }

    async fn root_directory(&self) -> Result<Option<Directory>> {
        self.inner.root_directory().await
    }

    async fn list_directories(
        &self,
        filter: DirectoryFilter<'_>,
    ) -> Result<Vec<GroupedDirectory>> {
        self.inner.list_directories(filter).await
    }

    async fn delete_directory(&self, id: DirectoryId) -> Result<bool> {
        self.inner.delete_directory(id).await
    }

    async fn attach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        self.inner.attach_group(directory_id, group_id).await
    }

    async fn detach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        self.inner.detach_group(directory_id, group_id).await
    }

    async fn add_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        self.inner.add_favorite(user_id, favorite).await
    }

    async fn remove_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        self.inner.remove_favorite(user_id, favorite).await
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        self.inner.list_favorites(user_id).await
    }
}

#[tokio::test]
async fn test_rotation_does_not_overwrite_concurrent_update() {
    let fx = TestFixture::with_store(InterleavedStore::default());
    let alice = fx.register("Alice").await;
    let group = fx.keeper.create_group(&alice, "ops").await.unwrap();
    let item = fx
        .keeper
        .create_item(NewItem::new(group.id, "root", "old-secret"))
        .await
        .unwrap();

    let sealed = SealedSecret::seal(item.id, b"new-secret", &group.public_key).unwrap();
    fx.keeper.store().interfere(Interference::UpdateItem {
        id: item.id,
        key_epoch: group.key_epoch,
        secret: Bytes::from(sealed.to_bytes().unwrap()),
    });

    let err = fx.keeper.rotate_group_key(group.id, &alice).await.unwrap_err();
    assert!(matches!(err, KeeperError::Store(StoreError::Conflict(_))));
    assert_eq!(fx.keeper.get_group(group.id).await.unwrap().key_epoch, 0);
    let secret = fx.keeper.decrypt_item(item.id, &alice).await.unwrap();
    assert_eq!(secret.expose_secret(), "new-secret");

    // A retry starts from the updated secret.
    assert_eq!(fx.keeper.rotate_group_key(group.id, &alice).await.unwrap(), 1);
    let secret = fx.keeper.decrypt_item(item.id, &alice).await.unwrap();
    assert_eq!(secret.expose_secret(), "new-secret");
}

async fn concurrent_revoke(rotate_on_revoke: bool) {
    let config = KeeperConfig {
        rotate_on_revoke,
        ..KeeperConfig::default()
    };
    let fx = TestFixture::with_config(InterleavedStore::default(), config);
    let alice = fx.register("Alice").await;
    let bob = fx.register("Bob").await;
    let carol = fx.register("Carol").await;
    let group = fx.keeper.create_group(&alice, "ops").await.unwrap();
    for member in [&bob, &carol] {
        fx.keeper
            .grant_membership(group.id, member.id(), &alice)
            .await
            .unwrap();
    }

    fx.keeper.store().interfere(Interference::Revoke {
        group_id: group.id,
        user_id: bob.id(),
    });

    let err = fx
        .keeper
        .revoke_membership(group.id, bob.id(), &alice)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            KeeperError::MembershipNotFound { user_id, group_id }
                if user_id == bob.id() && group_id == group.id
        ),
        "unexpected error: {err:?}"
    );
    assert!(!fx.keeper.is_member(bob.id(), group.id).await.unwrap());
    assert!(fx.keeper.is_member(carol.id(), group.id).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_revoke_reports_missing_membership() {
    concurrent_revoke(false).await;
}

#[tokio::test]
async fn test_concurrent_revoke_with_rotation_reports_missing_membership() {
    concurrent_revoke(true).await;
}
