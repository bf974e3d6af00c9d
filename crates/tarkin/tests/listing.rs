//! Listing, search, directories and favorites.
//!
//! None of the listing calls take a credential: visibility is computed from
//! membership edges alone.

use proptest::prelude::*;
use secrecy::ExposeSecret;
use tarkin::core::ValidationError;
use tarkin::store::{SqliteStore, Store};
use tarkin::{
    Directory, Favorite, Group, Item, Keeper, KeeperConfig, KeeperError, NewItem, Pattern,
    Principal,
};
use tarkin_testkit::fixtures::{impostor, TestFixture};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two teams sharing one tree.
///
/// ```text
/// /                 (root)
/// /servers          ops
/// /servers/db       ops
/// /dev              dev
/// ```
struct Tree {
    ops_member: Principal,
    dev_member: Principal,
    ops: Group,
    dev: Group,
    root: Directory,
    servers: Directory,
    db: Directory,
    dev_dir: Directory,
    web: Item,
    postgres: Item,
    laptop: Item,
    unfiled: Item,
}

async fn tree<S: Store>(fx: &TestFixture<S>) -> Tree {
    let ops_member = fx.register("Olga").await;
    let dev_member = fx.register("Dmitri").await;
    let ops = fx.keeper.create_group(&ops_member, "ops").await.unwrap();
    let dev = fx.keeper.create_group(&dev_member, "dev").await.unwrap();

    let root = fx.keeper.root_directory().await.unwrap();
    let servers = fx
        .keeper
        .create_directory(None, "servers", ops.id, &ops_member)
        .await
        .unwrap();
    let db = fx
        .keeper
        .create_directory(Some(servers.id), "db", ops.id, &ops_member)
        .await
        .unwrap();
    let dev_dir = fx
        .keeper
        .create_directory(Some(root.id), "dev", dev.id, &dev_member)
        .await
        .unwrap();

    let k = &fx.keeper;
    let web = k
        .create_item(NewItem::new(ops.id, "www-admin", "w").in_directory(servers.id))
        .await
        .unwrap();
    let postgres = k
        .create_item(NewItem::new(ops.id, "postgres", "p").in_directory(db.id))
        .await
        .unwrap();
    let laptop = k
        .create_item(NewItem::new(dev.id, "laptop-admin", "l").in_directory(dev_dir.id))
        .await
        .unwrap();
    let unfiled = k
        .create_item(NewItem::new(ops.id, "backup", "b"))
        .await
        .unwrap();

    Tree {
        ops_member,
        dev_member,
        ops,
        dev,
        root,
        servers,
        db,
        dev_dir,
        web,
        postgres,
        laptop,
        unfiled,
    }
}

fn paths(dirs: &[Directory]) -> Vec<&str> {
    dirs.iter().map(|d| d.path.as_str()).collect()
}

fn usernames(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.username.as_str()).collect()
}

async fn test_ls_root<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let ops = t.ops_member.id();

    let listing = fx.keeper.ls(ops, None, None).await.unwrap();
    assert_eq!(paths(&listing.directories), vec!["/servers"]);
    // Unfiled items are listed at the root.
    assert_eq!(usernames(&listing.items), vec!["backup"]);

    let listing = fx.keeper.ls(t.dev_member.id(), Some(t.root.id), None).await.unwrap();
    assert_eq!(paths(&listing.directories), vec!["/dev"]);
    assert!(listing.items.is_empty());
}

async fn test_ls_children_and_pattern<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let ops = t.ops_member.id();

    let listing = fx.keeper.ls(ops, Some(t.servers.id), None).await.unwrap();
    assert_eq!(paths(&listing.directories), vec!["/servers/db"]);
    assert_eq!(listing.items, vec![t.web.clone()]);

    let pattern = Pattern::new("nothing*here");
    assert!(fx
        .keeper
        .ls(ops, Some(t.servers.id), Some(&pattern))
        .await
        .unwrap()
        .is_empty());

    let pattern = Pattern::new("WWW");
    let items = fx.keeper.ls_items(ops, Some(t.servers.id), Some(&pattern)).await.unwrap();
    assert_eq!(items, vec![t.web.clone()]);

    let pattern = Pattern::new("s*db");
    let dirs = fx.keeper.ls_dirs(ops, Some(t.servers.id), Some(&pattern)).await.unwrap();
    assert_eq!(dirs, vec![t.db.clone()]);

    // Another team's directory lists nothing of theirs.
    let listing = fx.keeper.ls(t.dev_member.id(), Some(t.servers.id), None).await.unwrap();
    assert!(listing.is_empty());

    assert!(matches!(
        fx.keeper
            .ls(ops, Some(tarkin::DirectoryId::generate()), None)
            .await,
        Err(KeeperError::DirectoryNotFound(_))
    ));
}

async fn test_search<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let ops = t.ops_member.id();

    let found = fx.keeper.search_dirs(ops, &Pattern::new("/s*"), None).await.unwrap();
    assert_eq!(paths(&found), vec!["/servers", "/servers/db"]);

    let found = fx.keeper.search_dir_names(ops, &Pattern::new("db"), None).await.unwrap();
    assert_eq!(paths(&found), vec!["/servers/db"]);
    let found = fx.keeper.search_dir_names(ops, &Pattern::new("servers/db"), None).await.unwrap();
    assert!(found.is_empty());

    let found = fx.keeper.search_items(ops, &Pattern::new("admin"), None).await.unwrap();
    assert_eq!(found, vec![t.web.clone()]);
    let found = fx
        .keeper
        .search_items(t.dev_member.id(), &Pattern::new("admin"), None)
        .await
        .unwrap();
    assert_eq!(found, vec![t.laptop.clone()]);

    let found = fx
        .keeper
        .search_dirs(ops, &Pattern::new(""), Some(t.servers.id))
        .await
        .unwrap();
    assert_eq!(paths(&found), vec!["/servers/db"]);

    let found = fx
        .keeper
        .search_items(ops, &Pattern::new(""), Some(t.servers.id))
        .await
        .unwrap();
    assert_eq!(usernames(&found), vec!["postgres", "www-admin"]);

    let found = fx
        .keeper
        .search_items(ops, &Pattern::new(""), Some(t.root.id))
        .await
        .unwrap();
    assert_eq!(usernames(&found), vec!["backup", "postgres", "www-admin"]);
}

async fn test_user_items_and_directories<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;

    let items = fx.keeper.user_items(t.ops_member.id()).await.unwrap();
    assert_eq!(usernames(&items), vec!["backup", "postgres", "www-admin"]);
    let dirs = fx.keeper.user_directories(t.ops_member.id()).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/", "/servers", "/servers/db"]);

    let dirs = fx.keeper.user_directories(t.dev_member.id()).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/", "/dev"]);

    assert!(matches!(
        fx.keeper.user_items(tarkin::UserId::generate()).await,
        Err(KeeperError::UserNotFound(_))
    ));
}

async fn test_listing_follows_membership<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let dev = t.dev_member.id();

    assert!(!fx.keeper.is_member(dev, t.ops.id).await.unwrap());
    assert!(fx.keeper.user_items(dev).await.unwrap().iter().all(|i| i.group_id == t.dev.id));

    fx.keeper
        .grant_membership(t.ops.id, dev, &t.ops_member)
        .await
        .unwrap();
    assert!(fx.keeper.is_member(dev, t.ops.id).await.unwrap());
    let dirs = fx.keeper.user_directories(dev).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/", "/dev", "/servers", "/servers/db"]);
    assert_eq!(fx.keeper.user_items(dev).await.unwrap().len(), 4);

    fx.keeper
        .revoke_membership(t.ops.id, dev, &t.ops_member)
        .await
        .unwrap();
    let dirs = fx.keeper.user_directories(dev).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/", "/dev"]);
    assert_eq!(fx.keeper.user_items(dev).await.unwrap(), vec![t.laptop.clone()]);
}

async fn test_directory_rules<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let ops = &t.ops_member;

    assert!(matches!(
        fx.keeper.create_directory(None, "servers", t.ops.id, ops).await,
        Err(KeeperError::Validation(ValidationError::DirectoryNameTaken(name))) if name == "servers"
    ));
    assert!(matches!(
        fx.keeper.create_directory(None, "a/b", t.ops.id, ops).await,
        Err(KeeperError::Validation(ValidationError::DirectoryNameInvalid(_)))
    ));
    assert!(matches!(
        fx.keeper.create_directory(None, "infra", t.dev.id, ops).await,
        Err(KeeperError::GroupNotAccessible(_))
    ));
    assert!(matches!(
        fx.keeper.create_directory(None, "infra", t.ops.id, &impostor(ops.user())).await,
        Err(KeeperError::NotAuthorized(_))
    ));

    assert!(matches!(
        fx.keeper.delete_directory(t.root.id, ops).await,
        Err(KeeperError::Validation(ValidationError::RootDirectory))
    ));
    assert!(matches!(
        fx.keeper.delete_directory(t.servers.id, ops).await,
        Err(KeeperError::Validation(ValidationError::DirectoryNotEmpty))
    ));
    assert!(matches!(
        fx.keeper.delete_directory(t.db.id, &t.dev_member).await,
        Err(KeeperError::DirectoryNotAccessible(_))
    ));

    fx.keeper.move_item(t.postgres.id, Some(t.servers.id)).await.unwrap();
    fx.keeper.delete_directory(t.db.id, ops).await.unwrap();
    assert!(matches!(
        fx.keeper.get_directory(t.db.id).await,
        Err(KeeperError::DirectoryNotFound(_))
    ));
}

async fn test_attach_and_detach_groups<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let dev = &t.dev_member;

    assert!(matches!(
        fx.keeper.attach_group(t.root.id, t.dev.id, dev).await,
        Err(KeeperError::Validation(ValidationError::RootDirectory))
    ));
    assert!(matches!(
        fx.keeper.attach_group(t.servers.id, t.ops.id, dev).await,
        Err(KeeperError::GroupNotAccessible(_))
    ));

    assert!(fx.keeper.attach_group(t.servers.id, t.dev.id, dev).await.unwrap());
    assert!(!fx.keeper.attach_group(t.servers.id, t.dev.id, dev).await.unwrap());
    let dirs = fx.keeper.ls_dirs(dev.id(), None, None).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/dev", "/servers"]);

    // Seeing the directory does not reveal the other group's items in it.
    assert!(fx.keeper.ls_items(dev.id(), Some(t.servers.id), None).await.unwrap().is_empty());

    assert!(fx.keeper.detach_group(t.servers.id, t.dev.id, dev).await.unwrap());
    assert!(!fx.keeper.detach_group(t.servers.id, t.dev.id, dev).await.unwrap());
    let dirs = fx.keeper.ls_dirs(dev.id(), None, None).await.unwrap();
    assert_eq!(paths(&dirs), vec!["/dev"]);
}

async fn test_favorites<S: Store>(fx: TestFixture<S>) {
    let t = tree(&fx).await;
    let ops = t.ops_member.id();

    assert!(fx.keeper.add_favorite(ops, Favorite::Item(t.postgres.id)).await.unwrap());
    assert!(!fx.keeper.add_favorite(ops, Favorite::Item(t.postgres.id)).await.unwrap());
    assert!(fx.keeper.add_favorite(ops, Favorite::Directory(t.root.id)).await.unwrap());
    assert!(fx.keeper.add_favorite(ops, Favorite::Directory(t.db.id)).await.unwrap());

    assert!(matches!(
        fx.keeper.add_favorite(ops, Favorite::Item(t.laptop.id)).await,
        Err(KeeperError::ItemNotAccessible(_))
    ));
    assert!(matches!(
        fx.keeper.add_favorite(ops, Favorite::Directory(t.dev_dir.id)).await,
        Err(KeeperError::DirectoryNotAccessible(_))
    ));

    assert!(fx.keeper.is_favorite(ops, Favorite::Item(t.postgres.id)).await.unwrap());
    assert!(!fx.keeper.is_favorite(ops, Favorite::Item(t.web.id)).await.unwrap());
    assert_eq!(
        fx.keeper.favorites(ops).await.unwrap(),
        vec![
            Favorite::Item(t.postgres.id),
            Favorite::Directory(t.root.id),
            Favorite::Directory(t.db.id),
        ]
    );

    // Deleting the item drops it from the shortlist.
    fx.keeper.delete_item(t.postgres.id, &t.ops_member).await.unwrap();
    assert!(fx.keeper.remove_favorite(ops, Favorite::Directory(t.root.id)).await.unwrap());
    assert_eq!(
        fx.keeper.favorites(ops).await.unwrap(),
        vec![Favorite::Directory(t.db.id)]
    );

    // A favorite the user can no longer list is hidden.
    fx.keeper
        .grant_membership(t.ops.id, t.dev_member.id(), &t.ops_member)
        .await
        .unwrap();
    let dev = t.dev_member.id();
    assert!(fx.keeper.add_favorite(dev, Favorite::Item(t.unfiled.id)).await.unwrap());
    fx.keeper
        .revoke_membership(t.ops.id, dev, &t.ops_member)
        .await
        .unwrap();
    assert!(fx.keeper.favorites(dev).await.unwrap().is_empty());
}

macro_rules! keeper_tests {
    ($($name:ident),* $(,)?) => {
        mod memory {
            $(
                #[tokio::test]
                async fn $name() {
                    super::init_tracing();
                    super::$name(tarkin_testkit::TestFixture::new()).await
                }
            )*
        }

        mod sqlite {
            $(
                #[tokio::test]
                async fn $name() {
                    super::init_tracing();
                    super::$name(tarkin_testkit::TestFixture::sqlite()).await
                }
            )*
        }
    };
}

keeper_tests!(
    test_ls_root,
    test_ls_children_and_pattern,
    test_search,
    test_user_items_and_directories,
    test_listing_follows_membership,
    test_directory_rules,
    test_attach_and_detach_groups,
    test_favorites,
);

#[tokio::test]
async fn test_sqlite_file_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tarkin.db");
    let config = KeeperConfig::insecure_fast();

    let (item_id, ops_id) = {
        let fx = TestFixture::with_store(SqliteStore::open(&path)?);
        let t = tree(&fx).await;
        (t.postgres.id, t.ops_member.id())
    };

    let keeper = Keeper::new(SqliteStore::open(&path)?, config);
    let olga = keeper
        .authenticate("olga@example.com", tarkin_testkit::fixtures::password("Olga"))
        .await?;
    assert_eq!(olga.id(), ops_id);
    assert_eq!(keeper.decrypt_item(item_id, &olga).await?.expose_secret(), "p");

    let dirs = keeper.user_directories(ops_id).await?;
    assert_eq!(paths(&dirs), vec!["/", "/servers", "/servers/db"]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_search_items_agrees_with_pattern(
        names in prop::collection::btree_set("[a-z_%]{1,8}", 1..6),
        pattern in "[a-z_%*]{0,4}",
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let fx = TestFixture::sqlite();
            let alice = fx.register("Alice").await;
            let group = fx.keeper.create_group(&alice, "g").await.unwrap();
            for name in &names {
                fx.keeper.create_item(NewItem::new(group.id, name.as_str(), "x")).await.unwrap();
            }

            let pattern = Pattern::new(pattern);
            let found = fx.keeper.search_items(alice.id(), &pattern, None).await.unwrap();
            let expected: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|n| pattern.matches(n))
                .collect();
            assert_eq!(usernames(&found), expected);
        });
    }
}
