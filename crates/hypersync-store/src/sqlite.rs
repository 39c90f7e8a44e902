//! SQLite implementation of the content index traits.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use hypersync_core::{BlobId, DiscoveryKey, Item, Iri, SpaceId, Version};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    now_millis, Blob, BlobIndex, ItemSource, ScopedItem, Subscription, SubscriptionStore,
};

/// SQLite-backed content index.
///
/// Thread-safe via internal Mutex. Every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Timestamps are u64; SQLite integers are i64. Store the bit pattern.
fn ts_to_sql(ts: u64) -> i64 {
    ts as i64
}

fn ts_from_sql(ts: i64) -> u64 {
    ts as u64
}

/// Escape LIKE wildcards in a resource prefix.
fn like_prefix(iri: &Iri) -> String {
    let mut out = String::with_capacity(iri.as_str().len() + 2);
    for c in iri.as_str().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push_str("/%");
    out
}

fn parse_resource(raw: String) -> rusqlite::Result<Iri> {
    Iri::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn insert_blob(conn: &Connection, blob: &Blob, now: i64) -> Result<bool> {
    blob.validate()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO blobs (id, resource, ts, data, inserted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            blob.id.as_bytes(),
            blob.resource.as_str(),
            ts_to_sql(blob.timestamp),
            &blob.data[..],
            now
        ],
    )?;
    if inserted == 0 {
        return Ok(false);
    }
    for space in &blob.private_to {
        conn.execute(
            "INSERT OR IGNORE INTO blob_visibility (id, space) VALUES (?1, ?2)",
            params![blob.id.as_bytes(), space.as_str()],
        )?;
    }
    Ok(true)
}

fn load_visibility(conn: &Connection, id: &[u8]) -> Result<Vec<SpaceId>> {
    let mut stmt =
        conn.prepare_cached("SELECT space FROM blob_visibility WHERE id = ?1 ORDER BY space")?;
    let spaces = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .map(|r| r.map(SpaceId::new))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(spaces)
}

#[async_trait]
impl BlobIndex for SqliteIndex {
    async fn put(&self, blob: Blob) -> Result<()> {
        self.blocking(move |conn| insert_blob(conn, &blob, now_millis()).map(|_| ()))
            .await
    }

    async fn put_many(&self, blobs: Vec<Blob>) -> Result<usize> {
        self.blocking(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for blob in &blobs {
                if insert_blob(&tx, blob, now)? {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn has_blob(&self, id: &BlobId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blobs WHERE id = ?1",
                    params![id.as_bytes()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get_blob(&self, id: &BlobId) -> Result<Option<Blob>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT resource, ts, data FROM blobs WHERE id = ?1",
                    params![id.as_bytes()],
                    |row| {
                        Ok((
                            parse_resource(row.get(0)?)?,
                            ts_from_sql(row.get(1)?),
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((resource, timestamp, data)) = row else {
                return Ok(None);
            };
            let private_to = load_visibility(conn, id.as_bytes())?;
            Ok(Some(Blob {
                id,
                resource,
                timestamp,
                private_to,
                data: Bytes::from(data),
            }))
        })
        .await
    }

    async fn resource_version(&self, iri: &Iri) -> Result<Option<Version>> {
        let iri = iri.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, ts FROM blobs WHERE resource = ?1")?;
            let newest = stmt
                .query_map(params![iri.as_str()], |row| {
                    Ok(Item {
                        id: BlobId::from_bytes(row.get::<_, Vec<u8>>(0)?),
                        timestamp: ts_from_sql(row.get(1)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .max();
            Ok(newest.map(|item| Version::new(item.id.to_hex())))
        })
        .await
    }
}

#[async_trait]
impl ItemSource for SqliteIndex {
    async fn load_items_for_scope(&self, scope: &[DiscoveryKey]) -> Result<Vec<ScopedItem>> {
        let scope = scope.to_vec();
        self.blocking(move |conn| {
            let mut found: BTreeMap<Item, Vec<SpaceId>> = BTreeMap::new();
            let mut stmt = conn.prepare_cached(
                "SELECT b.id, b.ts, v.space
                 FROM blobs b LEFT JOIN blob_visibility v ON v.id = b.id
                 WHERE b.resource = ?1 OR (?2 AND b.resource LIKE ?3 ESCAPE '\\')",
            )?;
            for key in &scope {
                let rows = stmt.query_map(
                    params![key.iri.as_str(), key.recursive, like_prefix(&key.iri)],
                    |row| {
                        Ok((
                            Item {
                                id: BlobId::from_bytes(row.get::<_, Vec<u8>>(0)?),
                                timestamp: ts_from_sql(row.get(1)?),
                            },
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )?;
                for row in rows {
                    let (item, space) = row?;
                    let spaces = found.entry(item).or_default();
                    if let Some(space) = space.map(SpaceId::new) {
                        if !spaces.contains(&space) {
                            spaces.push(space);
                        }
                    }
                }
            }
            Ok(found
                .into_iter()
                .map(|(item, private_to)| ScopedItem { item, private_to })
                .collect())
        })
        .await
    }
}

#[async_trait]
impl SubscriptionStore for SqliteIndex {
    async fn subscribe(&self, iri: &Iri, recursive: bool) -> Result<()> {
        let iri = iri.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO subscriptions (iri, recursive, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(iri) DO UPDATE SET recursive = excluded.recursive",
                params![iri.as_str(), recursive, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn unsubscribe(&self, iri: &Iri) -> Result<()> {
        let iri = iri.clone();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE iri = ?1",
                params![iri.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT iri, recursive, created_at FROM subscriptions ORDER BY iri",
            )?;
            let subs = stmt
                .query_map([], |row| {
                    Ok(Subscription {
                        iri: parse_resource(row.get(0)?)?,
                        recursive: row.get(1)?,
                        since: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(subs)
        })
        .await
    }
}
