//! `RecordStore` trait: tabular persistence for roster rows.
//!
//! Rows are addressed 1-based, matching spreadsheet numbering. Row 1 holds
//! the headers; data starts at row 2.

use async_trait::async_trait;

use crate::error::StoreError;

/// Index of the header row.
pub const HEADER_ROW: usize = 1;

/// A located data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRow {
    pub row_index: usize,
    pub cells: Vec<String>,
}

/// Backend-agnostic tabular store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the first data row whose identity cell matches `key` after
    /// normalisation. `Ok(None)` means the identity is not stored.
    async fn find_by_key(&self, key: &str) -> Result<Option<FoundRow>, StoreError>;

    /// Read one row. Fails with `StoreError::NotFound` past the last row.
    async fn read_row(&self, row_index: usize) -> Result<Vec<String>, StoreError>;

    /// Overwrite the fixed-width range of an existing row. Values shorter than
    /// the range are padded with explicit empty cells.
    async fn upsert_row(&self, row_index: usize, values: &[String]) -> Result<(), StoreError>;

    /// Add a new row after the last one.
    async fn append_row(&self, values: &[String]) -> Result<(), StoreError>;

    /// All rows, header row first.
    async fn all_rows(&self) -> Result<Vec<Vec<String>>, StoreError>;
}

/// Pad (or cut) `values` to exactly `width` cells.
pub fn fixed_width_row(values: &[String], width: usize) -> Vec<String> {
    let mut row: Vec<String> = values.iter().take(width).cloned().collect();
    row.resize(width, String::new());
    row
}
