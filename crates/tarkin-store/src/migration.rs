//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use tarkin_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {current}, newer than supported {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            id BLOB PRIMARY KEY,                  -- 16 bytes
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            public_key BLOB NOT NULL,             -- 32 bytes, X25519
            wrapped_private_key BLOB NOT NULL,    -- CBOR WrappedPrivateKey
            created_at INTEGER NOT NULL
        );

        CREATE TABLE access_groups (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            public_key BLOB NOT NULL,
            key_epoch INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- One wrapped copy of the group key per member
        CREATE TABLE memberships (
            user_id BLOB NOT NULL REFERENCES users(id),
            group_id BLOB NOT NULL REFERENCES access_groups(id),
            key_epoch INTEGER NOT NULL,
            share BLOB NOT NULL,                  -- CBOR MemberKeyShare
            granted_by BLOB,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, group_id)
        );

        CREATE TABLE directories (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            parent_id BLOB REFERENCES directories(id),
            UNIQUE (parent_id, name)
        );

        CREATE TABLE directory_groups (
            directory_id BLOB NOT NULL REFERENCES directories(id),
            group_id BLOB NOT NULL REFERENCES access_groups(id),
            PRIMARY KEY (directory_id, group_id)
        );

        CREATE TABLE items (
            id BLOB PRIMARY KEY,
            group_id BLOB NOT NULL REFERENCES access_groups(id),
            directory_id BLOB REFERENCES directories(id),
            username TEXT NOT NULL,
            key_epoch INTEGER NOT NULL,
            secret BLOB NOT NULL,                 -- CBOR SealedSecret
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE favorites (
            user_id BLOB NOT NULL REFERENCES users(id),
            kind INTEGER NOT NULL,                -- 0=directory, 1=item
            target_id BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, kind, target_id)
        );

        CREATE INDEX idx_memberships_group ON memberships(group_id);
        CREATE INDEX idx_directories_path ON directories(path);
        CREATE INDEX idx_directory_groups_group ON directory_groups(group_id);
        CREATE INDEX idx_items_group ON items(group_id);
        CREATE INDEX idx_items_directory ON items(directory_id);
        CREATE INDEX idx_items_username ON items(username);
        "#,
    )?;

    Ok(())
}
