//! libSQL backend: local `RecordStore` for deployments without a spreadsheet.
//!
//! Each row is stored as a JSON array of cells next to its normalised
//! identity, keyed by the 1-based row index. Row 1 is seeded with headers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::roster::normalize;
use crate::roster::schema::{Field, ROW_WIDTH};
use crate::store::traits::{FoundRow, HEADER_ROW, RecordStore, fixed_width_row};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS roster_rows (
        row_index INTEGER PRIMARY KEY,
        identity TEXT NOT NULL,
        cells TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_roster_rows_identity ON roster_rows(identity);
"#;

/// libSQL record store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file, seeding `headers` on first use.
    pub async fn new_local(path: &Path, headers: &[String]) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db, headers).await?;
        info!(path = %path.display(), "Roster database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(headers: &[String]) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Database(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, headers).await
    }

    async fn from_database(db: LibSqlDatabase, headers: &[String]) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Database(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema(headers).await?;
        Ok(store)
    }

    async fn init_schema(&self, headers: &[String]) -> Result<(), StoreError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| StoreError::Database(format!("init_schema: {e}")))?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO roster_rows (row_index, identity, cells) VALUES (?1, '', ?2)",
                params![HEADER_ROW as i64, encode_cells(headers)?],
            )
            .await
            .map_err(|e| StoreError::Database(format!("seed headers: {e}")))?;
        Ok(())
    }
}

fn encode_cells(cells: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(cells).map_err(|e| StoreError::Malformed(format!("encode row: {e}")))
}

fn decode_cells(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Malformed(format!("decode row: {e}")))
}

fn identity_of(cells: &[String]) -> String {
    cells
        .get(Field::IDENTITY.index())
        .map(|c| normalize(c))
        .unwrap_or_default()
}

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<FoundRow>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT row_index, cells FROM roster_rows
                 WHERE row_index > ?1 AND identity = ?2
                 ORDER BY row_index ASC LIMIT 1",
                params![HEADER_ROW as i64, normalize(key)],
            )
            .await
            .map_err(|e| StoreError::Database(format!("find_by_key: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let row_index: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Database(format!("row parse: {e}")))?;
                let raw: String = row
                    .get(1)
                    .map_err(|e| StoreError::Database(format!("row parse: {e}")))?;
                Ok(Some(FoundRow {
                    row_index: row_index as usize,
                    cells: decode_cells(&raw)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Database(format!("find_by_key: {e}"))),
        }
    }

    async fn read_row(&self, row_index: usize) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT cells FROM roster_rows WHERE row_index = ?1",
                params![row_index as i64],
            )
            .await
            .map_err(|e| StoreError::Database(format!("read_row: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| StoreError::Database(format!("row parse: {e}")))?;
                decode_cells(&raw)
            }
            Ok(None) => Err(StoreError::NotFound {
                key: format!("row {row_index}"),
            }),
            Err(e) => Err(StoreError::Database(format!("read_row: {e}"))),
        }
    }

    async fn upsert_row(&self, row_index: usize, values: &[String]) -> Result<(), StoreError> {
        let mut cells = self.read_row(row_index).await?;
        if cells.len() < ROW_WIDTH {
            cells.resize(ROW_WIDTH, String::new());
        }
        cells[..ROW_WIDTH].clone_from_slice(&fixed_width_row(values, ROW_WIDTH));

        let updated = self
            .conn
            .execute(
                "UPDATE roster_rows SET identity = ?1, cells = ?2 WHERE row_index = ?3",
                params![identity_of(&cells), encode_cells(&cells)?, row_index as i64],
            )
            .await
            .map_err(|e| StoreError::Database(format!("upsert_row: {e}")))?;

        if updated == 0 {
            return Err(StoreError::NotFound {
                key: format!("row {row_index}"),
            });
        }
        debug!(row_index, "Row overwritten");
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO roster_rows (row_index, identity, cells)
                 VALUES ((SELECT COALESCE(MAX(row_index), 0) + 1 FROM roster_rows), ?1, ?2)",
                params![identity_of(values), encode_cells(values)?],
            )
            .await
            .map_err(|e| StoreError::Database(format!("append_row: {e}")))?;
        debug!("Row appended");
        Ok(())
    }

    async fn all_rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT cells FROM roster_rows ORDER BY row_index ASC", ())
            .await
            .map_err(|e| StoreError::Database(format!("all_rows: {e}")))?;

        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let raw: String = row
                        .get(0)
                        .map_err(|e| StoreError::Database(format!("row parse: {e}")))?;
                    out.push(decode_cells(&raw)?);
                }
                Ok(None) => break,
                Err(e) => return Err(StoreError::Database(format!("all_rows: {e}"))),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::schema::default_headers;

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory(&default_headers()).await.unwrap()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn fresh_store_has_only_headers() {
        let store = test_store().await;
        let rows = store.all_rows().await.unwrap();
        assert_eq!(rows, vec![default_headers()]);
    }

    #[tokio::test]
    async fn append_then_find() {
        let store = test_store().await;
        store.append_row(&row(&["arwen", "MAGO"])).await.unwrap();
        store.append_row(&row(&["BORIN", "GUERRERO"])).await.unwrap();

        let found = store.find_by_key("Arwen").await.unwrap().unwrap();
        assert_eq!(found.row_index, 2);
        assert_eq!(found.cells, row(&["arwen", "MAGO"]));

        let found = store.find_by_key("BORIN").await.unwrap().unwrap();
        assert_eq!(found.row_index, 3);
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let store = test_store().await;
        assert!(store.find_by_key("NOBODY").await.unwrap().is_none());
        // The header row never matches as data.
        assert!(store.find_by_key("PERSONAJE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_fixed_range() {
        let store = test_store().await;
        let mut original = row(&["ARWEN", "MAGO"]);
        original.resize(11, "1".into());
        original.extend(row(&["https://a", "https://b"]));
        store.append_row(&original).await.unwrap();

        let mut update = row(&["ARWEN", "MAGO"]);
        update.resize(11, "2".into());
        store.upsert_row(2, &update).await.unwrap();

        let stored = store.read_row(2).await.unwrap();
        assert_eq!(stored.len(), ROW_WIDTH);
        assert_eq!(stored[10], "2");
        assert_eq!(stored[11], "");
        assert_eq!(stored[12], "");
        assert_eq!(store.all_rows().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_missing_row_is_not_found() {
        let store = test_store().await;
        let err = store.upsert_row(9, &row(&["X"])).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn reopening_file_keeps_rows_and_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("roster.db");

        {
            let store = LibSqlStore::new_local(&path, &default_headers()).await.unwrap();
            store.append_row(&row(&["ARWEN"])).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path, &default_headers()).await.unwrap();
        let rows = store.all_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], default_headers());
    }
}
