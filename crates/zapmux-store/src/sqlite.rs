//! SQLite-backed stores, shared by every session in the process.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use zapmux_core::traits::{CredentialStore, GroupStore};
use zapmux_core::types::{Credentials, GroupRecord};
use zapmux_core::ZapError;

fn db_err(e: sqlx::Error) -> ZapError {
    ZapError::Store(e.to_string())
}

/// Credential and group snapshot store backed by SQLite via sqlx.
///
/// Credentials are a single BLOB row per connection id, written with
/// `INSERT OR REPLACE`: atomic per key, last write wins, which is exactly
/// what concurrent key-rotation saves need. Group snapshots are replaced
/// wholesale inside a transaction.
#[derive(Clone)]
pub struct SqlxStore {
    pool: SqlitePool,
}

impl SqlxStore {
    /// Connect and initialize the schema.
    pub async fn connect(url: &str) -> Result<Self, ZapError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| ZapError::Store(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| ZapError::Store(format!("failed to connect to {url}: {e}")))?;

        Self::init_schema(&pool).await?;
        info!("store initialized at {url}");

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), ZapError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credentials (
                connection_id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_snapshots (
                connection_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                name TEXT NOT NULL,
                participant_count INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (connection_id, group_id)
            )",
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Access the underlying pool (used by the health endpoint).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for SqlxStore {
    async fn load(&self, connection_id: &str) -> Result<Option<Credentials>, ZapError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM credentials WHERE connection_id = ?")
                .bind(connection_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(data,)| Credentials::new(data)))
    }

    async fn save(&self, connection_id: &str, credentials: &Credentials) -> Result<(), ZapError> {
        sqlx::query(
            "INSERT OR REPLACE INTO credentials (connection_id, data, updated_at) VALUES (?, ?, ?)",
        )
        .bind(connection_id)
        .bind(credentials.as_bytes())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), ZapError> {
        sqlx::query("DELETE FROM credentials WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl GroupStore for SqlxStore {
    async fn replace(&self, connection_id: &str, groups: &[GroupRecord]) -> Result<(), ZapError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM group_snapshots WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for group in groups {
            sqlx::query(
                "INSERT INTO group_snapshots \
                 (connection_id, group_id, name, participant_count, synced_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(connection_id)
            .bind(&group.id)
            .bind(&group.name)
            .bind(group.participant_count)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list(&self, connection_id: &str) -> Result<Vec<GroupRecord>, ZapError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT group_id, name, participant_count FROM group_snapshots \
             WHERE connection_id = ? ORDER BY name",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, name, participant_count)| GroupRecord {
                id,
                name,
                participant_count,
            })
            .collect())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), ZapError> {
        sqlx::query("DELETE FROM group_snapshots WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqlxStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/test.db", dir.path().display());
        let store = SqlxStore::connect(&url).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn credentials_round_trip_binary() {
        let (store, _dir) = temp_store().await;

        // All byte values, including NUL and 0xFF, must survive untouched.
        let blob: Vec<u8> = (0..=255u8).collect();
        let creds = Credentials::new(blob.clone());

        store.save("conn-1", &creds).await.unwrap();
        let loaded = store.load("conn-1").await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), blob.as_slice());
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let (store, _dir) = temp_store().await;
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_overwrites_previous() {
        let (store, _dir) = temp_store().await;
        store
            .save("conn-1", &Credentials::new(vec![1, 2, 3]))
            .await
            .unwrap();
        store
            .save("conn-1", &Credentials::new(vec![9]))
            .await
            .unwrap();
        let loaded = store.load("conn-1").await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), &[9]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _dir) = temp_store().await;
        store
            .save("conn-1", &Credentials::new(vec![1]))
            .await
            .unwrap();
        CredentialStore::delete(&store, "conn-1").await.unwrap();
        CredentialStore::delete(&store, "conn-1").await.unwrap();
        assert!(store.load("conn-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_replace_drops_stale_entries() {
        let (store, _dir) = temp_store().await;

        let first = vec![
            GroupRecord {
                id: "1@g.us".into(),
                name: "Alpha".into(),
                participant_count: 10,
            },
            GroupRecord {
                id: "2@g.us".into(),
                name: "Beta".into(),
                participant_count: 4,
            },
        ];
        store.replace("conn-1", &first).await.unwrap();

        let second = vec![GroupRecord {
            id: "3@g.us".into(),
            name: "Gamma".into(),
            participant_count: 7,
        }];
        store.replace("conn-1", &second).await.unwrap();

        let listed = store.list("conn-1").await.unwrap();
        assert_eq!(listed, second);
    }

    #[tokio::test]
    async fn snapshots_are_isolated_per_connection() {
        let (store, _dir) = temp_store().await;

        let a = vec![GroupRecord {
            id: "1@g.us".into(),
            name: "A".into(),
            participant_count: 1,
        }];
        store.replace("conn-a", &a).await.unwrap();
        store.replace("conn-b", &[]).await.unwrap();

        assert_eq!(store.list("conn-a").await.unwrap().len(), 1);
        assert!(store.list("conn-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_replace_clears_snapshot() {
        let (store, _dir) = temp_store().await;
        let groups = vec![GroupRecord {
            id: "1@g.us".into(),
            name: "A".into(),
            participant_count: 1,
        }];
        store.replace("conn-1", &groups).await.unwrap();
        store.replace("conn-1", &[]).await.unwrap();
        assert!(store.list("conn-1").await.unwrap().is_empty());
    }
}
