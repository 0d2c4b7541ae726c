//! In-process `RecordStore`: a row vector behind an async lock.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::roster::normalize;
use crate::roster::schema::{Field, ROW_WIDTH};
use crate::store::traits::{FoundRow, HEADER_ROW, RecordStore, fixed_width_row};

/// Memory-backed store. `rows[0]` is the header row (row index 1).
pub struct MemoryStore {
    rows: RwLock<Vec<Vec<String>>>,
    mutations: AtomicUsize,
}

impl MemoryStore {
    /// Create a store holding only a header row.
    pub fn new(headers: Vec<String>) -> Self {
        Self::with_rows(vec![headers])
    }

    /// Create a store from existing rows (header row first).
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: RwLock::new(rows),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Snapshot of every row.
    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }

    /// Number of upserts and appends performed.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<FoundRow>, StoreError> {
        let key = normalize(key);
        let rows = self.rows.read().await;
        let found = rows
            .iter()
            .enumerate()
            .skip(HEADER_ROW)
            .find(|(_, cells)| {
                cells
                    .get(Field::IDENTITY.index())
                    .is_some_and(|c| normalize(c) == key)
            })
            .map(|(i, cells)| FoundRow {
                row_index: i + 1,
                cells: cells.clone(),
            });
        Ok(found)
    }

    async fn read_row(&self, row_index: usize) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.read().await;
        row_index
            .checked_sub(1)
            .and_then(|i| rows.get(i))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: format!("row {row_index}"),
            })
    }

    async fn upsert_row(&self, row_index: usize, values: &[String]) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let row = row_index
            .checked_sub(1)
            .and_then(|i| rows.get_mut(i))
            .ok_or_else(|| StoreError::NotFound {
                key: format!("row {row_index}"),
            })?;

        let fixed = fixed_width_row(values, ROW_WIDTH);
        if row.len() < ROW_WIDTH {
            row.resize(ROW_WIDTH, String::new());
        }
        row[..ROW_WIDTH].clone_from_slice(&fixed);

        self.mutations.fetch_add(1, Ordering::SeqCst);
        debug!(row_index, "Row overwritten");
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        rows.push(values.to_vec());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        debug!(row_index = rows.len(), "Row appended");
        Ok(())
    }

    async fn all_rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(self.rows().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::schema::default_headers;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn find_by_key_skips_header_and_normalises() {
        let store = MemoryStore::with_rows(vec![
            row(&["PERSONAJE", "CLASE"]),
            row(&["ARWEN", "MAGO"]),
            row(&["borin ", "GUERRERO"]),
        ]);

        let found = store.find_by_key("Borin").await.unwrap().unwrap();
        assert_eq!(found.row_index, 3);
        assert_eq!(found.cells[1], "GUERRERO");

        assert!(store.find_by_key("PERSONAJE").await.unwrap().is_none());
        assert!(store.find_by_key("NOBODY").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_pads_and_clears_stale_attachments() {
        let mut old = row(&["ARWEN", "MAGO"]);
        old.resize(11, "x".into());
        old.push("https://old-1".into());
        old.push("https://old-2".into());
        let store = MemoryStore::with_rows(vec![default_headers(), old]);

        let mut new = row(&["ARWEN", "MAGO"]);
        new.resize(11, "y".into());
        new.push("https://new-1".into());
        store.upsert_row(2, &new).await.unwrap();

        let stored = store.read_row(2).await.unwrap();
        assert_eq!(stored.len(), ROW_WIDTH);
        assert_eq!(stored[11], "https://new-1");
        assert_eq!(stored[12], "");
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn upsert_unknown_row_is_not_found() {
        let store = MemoryStore::new(default_headers());
        let err = store.upsert_row(5, &row(&["X"])).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn append_adds_row_at_end() {
        let store = MemoryStore::new(default_headers());
        store.append_row(&row(&["ARWEN"])).await.unwrap();
        store.append_row(&row(&["BORIN"])).await.unwrap();

        let rows = store.all_rows().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], "BORIN");
        assert_eq!(store.find_by_key("borin").await.unwrap().unwrap().row_index, 3);
    }

    #[tokio::test]
    async fn read_row_zero_is_not_found() {
        let store = MemoryStore::new(default_headers());
        assert!(store.read_row(0).await.unwrap_err().is_not_found());
        assert_eq!(store.read_row(1).await.unwrap(), default_headers());
    }
}
