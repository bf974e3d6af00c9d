//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Tarkin. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking. Every
//! multi-statement method runs in one transaction.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use tarkin_core::{
    normalize_email, Directory, DirectoryId, Favorite, Group, GroupId, Item, ItemId, Membership,
    PublicKey, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    DirectoryFilter, GroupRotation, GroupedDirectory, InsertResult, ItemFilter, Store,
};

const ITEM_COLUMNS: &str =
    "id, group_id, directory_id, username, key_epoch, secret, created_at, updated_at";

const MEMBERSHIP_COLUMNS: &str = "user_id, group_id, key_epoch, share, granted_by, created_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the connection in a blocking task.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn fixed<const N: usize>(row: &Row<'_>, col: &str) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(col)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, col.into(), Type::Blob))
}

fn fixed_opt<const N: usize>(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<[u8; N]>> {
    let bytes: Option<Vec<u8>> = row.get(col)?;
    bytes
        .map(|b| {
            b.try_into()
                .map_err(|_| rusqlite::Error::InvalidColumnType(0, col.into(), Type::Blob))
        })
        .transpose()
}

fn blob(row: &Row<'_>, col: &str) -> rusqlite::Result<Bytes> {
    let bytes: Vec<u8> = row.get(col)?;
    Ok(Bytes::from(bytes))
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from_bytes(fixed(row, "id")?),
        name: row.get("name")?,
        email: row.get("email")?,
        public_key: PublicKey::from_bytes(fixed(row, "public_key")?),
        wrapped_private_key: blob(row, "wrapped_private_key")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId::from_bytes(fixed(row, "id")?),
        name: row.get("name")?,
        public_key: PublicKey::from_bytes(fixed(row, "public_key")?),
        key_epoch: row.get("key_epoch")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_membership(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        user_id: UserId::from_bytes(fixed(row, "user_id")?),
        group_id: GroupId::from_bytes(fixed(row, "group_id")?),
        key_epoch: row.get("key_epoch")?,
        share: blob(row, "share")?,
        granted_by: fixed_opt(row, "granted_by")?.map(UserId::from_bytes),
        created_at: row.get("created_at")?,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: ItemId::from_bytes(fixed(row, "id")?),
        group_id: GroupId::from_bytes(fixed(row, "group_id")?),
        directory_id: fixed_opt(row, "directory_id")?.map(DirectoryId::from_bytes),
        username: row.get("username")?,
        key_epoch: row.get("key_epoch")?,
        secret: blob(row, "secret")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_directory(row: &Row<'_>) -> rusqlite::Result<Directory> {
    Ok(Directory {
        id: DirectoryId::from_bytes(fixed(row, "id")?),
        name: row.get("name")?,
        path: row.get("path")?,
        parent_id: fixed_opt(row, "parent_id")?.map(DirectoryId::from_bytes),
    })
}

fn favorite_parts(favorite: Favorite) -> (i64, [u8; 16]) {
    match favorite {
        Favorite::Directory(id) => (0, id.0),
        Favorite::Item(id) => (1, id.0),
    }
}

/// Map a uniqueness violation to `Duplicate`, anything else to `Database`.
fn duplicate(err: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(what())
        }
        _ => StoreError::Database(err),
    }
}

fn exists(conn: &Connection, sql: &str, id: &[u8]) -> Result<bool> {
    Ok(conn
        .query_row(sql, params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn group_epoch(conn: &Connection, group_id: GroupId) -> Result<u32> {
    conn.query_row(
        "SELECT key_epoch FROM access_groups WHERE id = ?1",
        params![group_id.as_bytes().as_slice()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))
}

fn directory_groups(conn: &Connection, id: DirectoryId) -> Result<Vec<GroupId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT group_id FROM directory_groups WHERE directory_id = ?1 ORDER BY group_id",
    )?;
    let groups = stmt
        .query_map(params![id.as_bytes().as_slice()], |row| {
            fixed(row, "group_id").map(GroupId::from_bytes)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(groups)
}

fn query_memberships(conn: &Connection, sql: &str, id: &[u8]) -> Result<Vec<Membership>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![id], row_to_membership)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Check and apply a rotation on an open transaction.
fn apply_rotation(conn: &Connection, rotation: &GroupRotation) -> Result<()> {
    let group_id = rotation.group_id.as_bytes().as_slice();
    let epoch = group_epoch(conn, rotation.group_id)?;

    let members: BTreeSet<UserId> = conn
        .prepare("SELECT user_id FROM memberships WHERE group_id = ?1")?
        .query_map(params![group_id], |row| {
            fixed(row, "user_id").map(UserId::from_bytes)
        })?
        .collect::<rusqlite::Result<_>>()?;

    let items: BTreeSet<ItemId> = conn
        .prepare("SELECT id FROM items WHERE group_id = ?1")?
        .query_map(params![group_id], |row| fixed(row, "id").map(ItemId::from_bytes))?
        .collect::<rusqlite::Result<_>>()?;

    rotation.check_against(epoch, &members, &items)?;

    let new_epoch = rotation.new_epoch();
    conn.execute(
        "UPDATE access_groups SET public_key = ?2, key_epoch = ?3 WHERE id = ?1",
        params![group_id, rotation.public_key.as_bytes().as_slice(), new_epoch],
    )?;

    for m in &rotation.memberships {
        conn.execute(
            "UPDATE memberships SET key_epoch = ?3, share = ?4
             WHERE user_id = ?1 AND group_id = ?2",
            params![
                m.user_id.as_bytes().as_slice(),
                group_id,
                m.key_epoch,
                m.share.as_ref()
            ],
        )?;
    }

    for resealed in &rotation.items {
        let changed = conn.execute(
            "UPDATE items SET secret = ?2, key_epoch = ?3, updated_at = ?4
             WHERE id = ?1 AND secret = ?5",
            params![
                resealed.id.as_bytes().as_slice(),
                resealed.secret.as_ref(),
                new_epoch,
                rotation.rotated_at,
                resealed.previous.as_ref()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "item {} changed during rotation",
                resealed.id
            )));
        }
    }

    tracing::debug!(
        group = %rotation.group_id,
        epoch = new_epoch,
        members = rotation.memberships.len(),
        items = rotation.items.len(),
        "applied group rotation"
    );
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_user(&self, user: &User) -> Result<()> {
        let user = user.clone();

        self.run(move |conn| {
            let email = normalize_email(&user.email);
            conn.execute(
                "INSERT INTO users (id, name, email, public_key, wrapped_private_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.as_bytes().as_slice(),
                    user.name,
                    email,
                    user.public_key.as_bytes().as_slice(),
                    user.wrapped_private_key.as_ref(),
                    user.created_at,
                ],
            )
            .map_err(|e| duplicate(e, || format!("user {} <{}>", user.id, email)))?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);

        self.run(move |conn| {
            conn.query_row(
                "SELECT * FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn update_user_key(&self, id: UserId, previous: &Bytes, wrapped: &Bytes) -> Result<()> {
        let previous = previous.clone();
        let wrapped = wrapped.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let current: Vec<u8> = tx
                .query_row(
                    "SELECT wrapped_private_key FROM users WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

            if current.as_slice() != previous.as_ref() {
                return Err(StoreError::Conflict(format!("key of user {id} changed")));
            }

            tx.execute(
                "UPDATE users SET wrapped_private_key = ?2 WHERE id = ?1",
                params![id.as_bytes().as_slice(), wrapped.as_ref()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups and memberships
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_group(&self, group: &Group, creator: &Membership) -> Result<()> {
        let group = group.clone();
        let creator = creator.clone();

        self.run(move |conn| {
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

            let tx = conn.transaction()?;

            if !exists(
                &tx,
                "SELECT 1 FROM users WHERE id = ?1",
                creator.user_id.as_bytes(),
            )? {
                return Err(StoreError::NotFound(format!("user {}", creator.user_id)));
            }

            tx.execute(
                "INSERT INTO access_groups (id, name, public_key, key_epoch, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group.id.as_bytes().as_slice(),
                    group.name,
                    group.public_key.as_bytes().as_slice(),
                    group.key_epoch,
                    group.created_at,
                ],
            )
            .map_err(|e| duplicate(e, || format!("group {}", group.id)))?;

            tx.execute(
                "INSERT INTO memberships (user_id, group_id, key_epoch, share, granted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    creator.user_id.as_bytes().as_slice(),
                    group.id.as_bytes().as_slice(),
                    creator.key_epoch,
                    creator.share.as_ref(),
                    creator.created_at,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT * FROM access_groups WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                row_to_group,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn upsert_membership(&self, membership: &Membership) -> Result<InsertResult> {
        let m = membership.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let epoch = group_epoch(&tx, m.group_id)?;
            if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", m.user_id.as_bytes())? {
                return Err(StoreError::NotFound(format!("user {}", m.user_id)));
            }
            if m.key_epoch != epoch {
                return Err(StoreError::StaleKeyEpoch {
                    expected: epoch,
                    actual: m.key_epoch,
                });
            }

            let existed = tx
                .query_row(
                    "SELECT 1 FROM memberships WHERE user_id = ?1 AND group_id = ?2",
                    params![m.user_id.as_bytes().as_slice(), m.group_id.as_bytes().as_slice()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                "INSERT INTO memberships (user_id, group_id, key_epoch, share, granted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id, group_id) DO UPDATE SET
                    key_epoch = excluded.key_epoch,
                    share = excluded.share,
                    granted_by = excluded.granted_by,
                    created_at = excluded.created_at",
                params![
                    m.user_id.as_bytes().as_slice(),
                    m.group_id.as_bytes().as_slice(),
                    m.key_epoch,
                    m.share.as_ref(),
                    m.granted_by.as_ref().map(|id| id.as_bytes().as_slice()),
                    m.created_at,
                ],
            )?;

            tx.commit()?;
            Ok(if existed {
                InsertResult::Replaced
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<Option<Membership>> {
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
                     WHERE user_id = ?1 AND group_id = ?2"
                ),
                params![user_id.as_bytes().as_slice(), group_id.as_bytes().as_slice()],
                row_to_membership,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        self.run(move |conn| {
            query_memberships(
                conn,
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
                     WHERE user_id = ?1 ORDER BY group_id"
                ),
                user_id.as_bytes(),
            )
        })
        .await
    }

    async fn list_group_memberships(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        self.run(move |conn| {
            query_memberships(
                conn,
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
                     WHERE group_id = ?1 ORDER BY user_id"
                ),
                group_id.as_bytes(),
            )
        })
        .await
    }

    async fn revoke_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
        rotation: Option<&GroupRotation>,
    ) -> Result<()> {
        let rotation = rotation.cloned();

        self.run(move |conn| {
            if let Some(rotation) = &rotation {
                if rotation.group_id != group_id {
                    return Err(StoreError::InvalidData(format!(
                        "rotation is for {}, not {group_id}",
                        rotation.group_id
                    )));
                }
            }

            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM memberships WHERE user_id = ?1 AND group_id = ?2",
                params![user_id.as_bytes().as_slice(), group_id.as_bytes().as_slice()],
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!(
                    "membership of {user_id} in {group_id}"
                )));
            }

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM memberships WHERE group_id = ?1",
                params![group_id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                return Err(StoreError::Conflict(format!(
                    "{user_id} is the last member of {group_id}"
                )));
            }

            if let Some(rotation) = &rotation {
                apply_rotation(&tx, rotation)?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn rotate_group(&self, rotation: &GroupRotation) -> Result<()> {
        let rotation = rotation.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            apply_rotation(&tx, &rotation)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let item = item.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let epoch = group_epoch(&tx, item.group_id)?;
            if item.key_epoch != epoch {
                return Err(StoreError::StaleKeyEpoch {
                    expected: epoch,
                    actual: item.key_epoch,
                });
            }
            if let Some(dir) = item.directory_id {
                if !exists(&tx, "SELECT 1 FROM directories WHERE id = ?1", dir.as_bytes())? {
                    return Err(StoreError::NotFound(format!("directory {dir}")));
                }
            }

            tx.execute(
                &format!("INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    item.id.as_bytes().as_slice(),
                    item.group_id.as_bytes().as_slice(),
                    item.directory_id.as_ref().map(|d| d.as_bytes().as_slice()),
                    item.username,
                    item.key_epoch,
                    item.secret.as_ref(),
                    item.created_at,
                    item.updated_at,
                ],
            )
            .map_err(|e| duplicate(e, || format!("item {}", item.id)))?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id.as_bytes().as_slice()],
                row_to_item,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn update_item_secret(
        &self,
        id: ItemId,
        key_epoch: u32,
        secret: &Bytes,
        updated_at: i64,
    ) -> Result<()> {
        let secret = secret.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let group_id: [u8; 16] = tx
                .query_row(
                    "SELECT group_id FROM items WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| fixed(row, "group_id"),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("item {id}")))?;

            let epoch = group_epoch(&tx, GroupId::from_bytes(group_id))?;
            if key_epoch != epoch {
                return Err(StoreError::StaleKeyEpoch {
                    expected: epoch,
                    actual: key_epoch,
                });
            }

            tx.execute(
                "UPDATE items SET secret = ?2, key_epoch = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.as_bytes().as_slice(), secret.as_ref(), key_epoch, updated_at],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_item_directory(
        &self,
        id: ItemId,
        directory_id: Option<DirectoryId>,
    ) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;

            if let Some(dir) = directory_id {
                if !exists(&tx, "SELECT 1 FROM directories WHERE id = ?1", dir.as_bytes())? {
                    return Err(StoreError::NotFound(format!("directory {dir}")));
                }
            }

            let changed = tx.execute(
                "UPDATE items SET directory_id = ?2 WHERE id = ?1",
                params![
                    id.as_bytes().as_slice(),
                    directory_id.as_ref().map(|d| d.as_bytes().as_slice())
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("item {id}")));
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (kind, target) = favorite_parts(Favorite::Item(id));
            tx.execute(
                "DELETE FROM favorites WHERE kind = ?1 AND target_id = ?2",
                params![kind, target.as_slice()],
            )?;
            let removed = tx.execute(
                "DELETE FROM items WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_items(&self, filter: ItemFilter<'_>) -> Result<Vec<Item>> {
        let (clause, values): (&str, Vec<Value>) = match filter {
            ItemFilter::All => ("1 = 1", vec![]),
            ItemFilter::InDirectory(None) => ("directory_id IS NULL", vec![]),
            ItemFilter::InDirectory(Some(dir)) => {
                ("directory_id = ?1", vec![Value::Blob(dir.0.to_vec())])
            }
            ItemFilter::Group(group_id) => ("group_id = ?1", vec![Value::Blob(group_id.0.to_vec())]),
            ItemFilter::UsernameMatches(pattern) => (
                "username LIKE ?1 ESCAPE '\\'",
                vec![Value::Text(pattern.to_like())],
            ),
        };
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE {clause} ORDER BY username, id");

        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_from_iter(values), row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_directory(&self, directory: &Directory, groups: &[GroupId]) -> Result<()> {
        let dir = directory.clone();
        let groups = groups.to_vec();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            match dir.parent_id {
                None => {
                    let root = tx
                        .query_row("SELECT 1 FROM directories WHERE parent_id IS NULL", [], |_| {
                            Ok(())
                        })
                        .optional()?;
                    if root.is_some() {
                        return Err(StoreError::Duplicate("root directory".into()));
                    }
                }
                Some(parent) => {
                    if !exists(&tx, "SELECT 1 FROM directories WHERE id = ?1", parent.as_bytes())? {
                        return Err(StoreError::NotFound(format!("directory {parent}")));
                    }
                }
            }

            tx.execute(
                "INSERT INTO directories (id, name, path, parent_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    dir.id.as_bytes().as_slice(),
                    dir.name,
                    dir.path,
                    dir.parent_id.as_ref().map(|p| p.as_bytes().as_slice()),
                ],
            )
            .map_err(|e| duplicate(e, || format!("directory {}", dir.path)))?;

            for group_id in &groups {
                if !exists(&tx, "SELECT 1 FROM access_groups WHERE id = ?1", group_id.as_bytes())? {
                    return Err(StoreError::NotFound(format!("group {group_id}")));
                }
                tx.execute(
                    "INSERT OR IGNORE INTO directory_groups (directory_id, group_id) VALUES (?1, ?2)",
                    params![dir.id.as_bytes().as_slice(), group_id.as_bytes().as_slice()],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_directory(&self, id: DirectoryId) -> Result<Option<GroupedDirectory>> {
        self.run(move |conn| {
            let directory = conn
                .query_row(
                    "SELECT * FROM directories WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    row_to_directory,
                )
                .optional()?;

            directory
                .map(|directory| {
                    Ok(GroupedDirectory {
                        groups: directory_groups(conn, directory.id)?,
                        directory,
                    })
                })
                .transpose()
        })
        .await
    }

    async fn root_directory(&self) -> Result<Option<Directory>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT * FROM directories WHERE parent_id IS NULL",
                [],
                row_to_directory,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<GroupedDirectory>> {
        let (clause, values): (&str, Vec<Value>) = match filter {
            DirectoryFilter::All => ("1 = 1", vec![]),
            DirectoryFilter::ChildrenOf(parent) => {
                ("parent_id = ?1", vec![Value::Blob(parent.0.to_vec())])
            }
            DirectoryFilter::PathMatches(pattern) => (
                "path LIKE ?1 ESCAPE '\\'",
                vec![Value::Text(pattern.to_like())],
            ),
            DirectoryFilter::NameMatches(pattern) => (
                "name LIKE ?1 ESCAPE '\\'",
                vec![Value::Text(pattern.to_like())],
            ),
        };
        let sql = format!("SELECT * FROM directories WHERE {clause} ORDER BY path");

        self.run(move |conn| {
            let dirs = conn
                .prepare(&sql)?
                .query_map(params_from_iter(values), row_to_directory)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            dirs.into_iter()
                .map(|directory| {
                    Ok(GroupedDirectory {
                        groups: directory_groups(conn, directory.id)?,
                        directory,
                    })
                })
                .collect()
        })
        .await
    }

    async fn delete_directory(&self, id: DirectoryId) -> Result<bool> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let id_bytes = id.as_bytes().as_slice();

            if !exists(&tx, "SELECT 1 FROM directories WHERE id = ?1", id_bytes)? {
                return Ok(false);
            }
            if exists(&tx, "SELECT 1 FROM directories WHERE parent_id = ?1", id_bytes)?
                || exists(&tx, "SELECT 1 FROM items WHERE directory_id = ?1", id_bytes)?
            {
                return Err(StoreError::Conflict(format!("directory {id} is not empty")));
            }

            let (kind, target) = favorite_parts(Favorite::Directory(id));
            tx.execute(
                "DELETE FROM favorites WHERE kind = ?1 AND target_id = ?2",
                params![kind, target.as_slice()],
            )?;
            tx.execute(
                "DELETE FROM directory_groups WHERE directory_id = ?1",
                params![id_bytes],
            )?;
            tx.execute("DELETE FROM directories WHERE id = ?1", params![id_bytes])?;

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn attach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        self.run(move |conn| {
            let tx = conn.transaction()?;

            if !exists(
                &tx,
                "SELECT 1 FROM directories WHERE id = ?1",
                directory_id.as_bytes(),
            )? {
                return Err(StoreError::NotFound(format!("directory {directory_id}")));
            }
            if !exists(&tx, "SELECT 1 FROM access_groups WHERE id = ?1", group_id.as_bytes())? {
                return Err(StoreError::NotFound(format!("group {group_id}")));
            }

            let added = tx.execute(
                "INSERT OR IGNORE INTO directory_groups (directory_id, group_id) VALUES (?1, ?2)",
                params![
                    directory_id.as_bytes().as_slice(),
                    group_id.as_bytes().as_slice()
                ],
            )?;

            tx.commit()?;
            Ok(added > 0)
        })
        .await
    }

    async fn detach_group(&self, directory_id: DirectoryId, group_id: GroupId) -> Result<bool> {
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM directory_groups WHERE directory_id = ?1 AND group_id = ?2",
                params![
                    directory_id.as_bytes().as_slice(),
                    group_id.as_bytes().as_slice()
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Favorites
    // ─────────────────────────────────────────────────────────────────────────

    async fn add_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        self.run(move |conn| {
            let tx = conn.transaction()?;

            if !exists(&tx, "SELECT 1 FROM users WHERE id = ?1", user_id.as_bytes())? {
                return Err(StoreError::NotFound(format!("user {user_id}")));
            }
            let (kind, target) = favorite_parts(favorite);
            let target_sql = match favorite {
                Favorite::Directory(_) => "SELECT 1 FROM directories WHERE id = ?1",
                Favorite::Item(_) => "SELECT 1 FROM items WHERE id = ?1",
            };
            if !exists(&tx, target_sql, &target)? {
                return Err(StoreError::NotFound(format!("{favorite:?}")));
            }

            let added = tx.execute(
                "INSERT OR IGNORE INTO favorites (user_id, kind, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user_id.as_bytes().as_slice(),
                    kind,
                    target.as_slice(),
                    tarkin_core::now_millis()
                ],
            )?;

            tx.commit()?;
            Ok(added > 0)
        })
        .await
    }

    async fn remove_favorite(&self, user_id: UserId, favorite: Favorite) -> Result<bool> {
        self.run(move |conn| {
            let (kind, target) = favorite_parts(favorite);
            let removed = conn.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND kind = ?2 AND target_id = ?3",
                params![user_id.as_bytes().as_slice(), kind, target.as_slice()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, target_id FROM favorites WHERE user_id = ?1 ORDER BY rowid",
            )?;
            let favorites = stmt
                .query_map(params![user_id.as_bytes().as_slice()], |row| {
                    let kind: i64 = row.get("kind")?;
                    let target: [u8; 16] = fixed(row, "target_id")?;
                    match kind {
                        0 => Ok(Favorite::Directory(DirectoryId::from_bytes(target))),
                        1 => Ok(Favorite::Item(ItemId::from_bytes(target))),
                        _ => Err(rusqlite::Error::InvalidColumnType(
                            0,
                            "kind".into(),
                            Type::Integer,
                        )),
                    }
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(favorites)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        User {
            id: UserId::generate(),
            name: "name".into(),
            email: email.into(),
            public_key: PublicKey::from_bytes([7; 32]),
            wrapped_private_key: Bytes::from_static(b"wrapped"),
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tarkin.db");
        let alice = user("alice@example.com");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_user(&alice).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_user(alice.id).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn test_email_unique_ignoring_case() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_user(&user("alice@example.com")).await.unwrap();

        let err = store.insert_user(&user("ALICE@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        assert!(store
            .find_user_by_email("Alice@Example.COM")
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_like_escaping_is_literal() {
        let conn = Connection::open_in_memory().unwrap();
        let like = |value: &str, pattern: &str| -> bool {
            conn.query_row(
                "SELECT ?1 LIKE ?2 ESCAPE '\\'",
                params![value, tarkin_core::Pattern::new(pattern).to_like()],
                |row| row.get(0),
            )
            .unwrap()
        };

        assert!(like("100%", "100%"));
        assert!(!like("1000", "100%"));
        assert!(like("a_b", "a_b"));
        assert!(!like("axb", "a_b"));
        assert!(like("/Servers/DB", "servers*db"));
    }
}
