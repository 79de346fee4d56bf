use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::models::{Category, ClusterLabel};

/// Durable text-key -> vector map consulted before any network fetch.
/// Writes are idempotent: the same key always maps to the same vector.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>>;
    async fn put(&self, key: &str, vector: &[f32]) -> Result<()>;
}

/// Remembers model-produced cluster names by membership signature.
#[async_trait]
pub trait ClusterNameStore: Send + Sync {
    async fn get_label(&self, signature: &str) -> Result<Option<ClusterLabel>>;
    async fn put_label(&self, signature: &str, label: &ClusterLabel) -> Result<()>;
}

const CURRENT_SCHEMA_VERSION: i32 = 2;

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;
    Ok(())
}

fn apply_migration(tx: &Transaction, version: i32) -> Result<()> {
    match version {
        1 => tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS embeddings (
                key TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?,
        2 => tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS cluster_names (
                signature TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?,
        other => bail!("unknown migration version {other}"),
    }
    Ok(())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        bail!(
            "stored vector has {} bytes, expected {} for dimension {}",
            bytes.len(),
            dimension * 4,
            dimension
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// SQLite-backed cache and name history sharing one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            log::warn!("Failed to enable WAL mode: {err}");
        }
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn).context("failed to run database migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("database connection lock poisoned"))?;
            task(&mut guard)
        })
        .await
        .map_err(|err| anyhow!("database task panicked: {err}"))?
    }
}

#[async_trait]
impl EmbeddingCache for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let row: Option<(Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT vector, dimension FROM embeddings WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("failed to read cached embedding")?;
            match row {
                Some((bytes, dimension)) => {
                    let dimension = usize::try_from(dimension)
                        .map_err(|_| anyhow!("negative dimension {dimension} for '{key}'"))?;
                    Ok(Some(decode_vector(&bytes, dimension)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, vector: &[f32]) -> Result<()> {
        let key = key.to_string();
        let bytes = encode_vector(vector);
        let dimension = vector.len() as i64;
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO embeddings (key, vector, dimension, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, bytes, dimension, Utc::now().to_rfc3339()],
            )
            .context("failed to write cached embedding")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ClusterNameStore for SqliteStore {
    async fn get_label(&self, signature: &str) -> Result<Option<ClusterLabel>> {
        let signature = signature.to_string();
        self.execute(move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT name, description, category FROM cluster_names WHERE signature = ?1",
                    params![signature],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .context("failed to read cluster name")?;
            Ok(row.map(|(name, description, category)| ClusterLabel {
                name,
                description,
                category: Category::parse(&category).unwrap_or(Category::Other),
            }))
        })
        .await
    }

    async fn put_label(&self, signature: &str, label: &ClusterLabel) -> Result<()> {
        let signature = signature.to_string();
        let label = label.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cluster_names (signature, name, description, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    signature,
                    label.name,
                    label.description,
                    label.category.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .context("failed to write cluster name")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("node server.js").await.unwrap().is_none());

        store.put("node server.js", &[0.25, -1.0, 3.5]).await.unwrap();
        let v = store.get("node server.js").await.unwrap().unwrap();
        assert_eq!(v, vec![0.25, -1.0, 3.5]);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("k", &[1.0, 2.0]).await.unwrap();
        store.put("k", &[1.0, 2.0]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn cluster_labels_persist() {
        let store = SqliteStore::open_in_memory().unwrap();
        let label = ClusterLabel {
            name: "Build tooling".into(),
            description: "compilers and watchers".into(),
            category: Category::Development,
        };
        store.put_label("sig-1", &label).await.unwrap();
        assert_eq!(store.get_label("sig-1").await.unwrap(), Some(label));
        assert_eq!(store.get_label("sig-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reopening_file_keeps_schema() {
        let dir = std::env::temp_dir().join(format!("pc-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("cache.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("k", &[0.5]).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![0.5]));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        assert!(decode_vector(&[0, 0, 0], 1).is_err());
    }
}
