//! Google Sheets backend: `RecordStore` over the Sheets v4 values API.
//!
//! The access token is supplied from outside; minting it from a service
//! account key is not this module's concern.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::roster::normalize;
use crate::roster::schema::ROW_WIDTH;
use crate::store::traits::{FoundRow, HEADER_ROW, RecordStore, fixed_width_row};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Response body of a values read.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Spreadsheet-backed store.
pub struct SheetsStore {
    client: reqwest::Client,
    spreadsheet_id: String,
    sheet_name: String,
    access_token: SecretString,
    api_base: String,
}

impl SheetsStore {
    pub fn new(spreadsheet_id: String, sheet_name: String, access_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            spreadsheet_id,
            sheet_name,
            access_token,
            api_base: SHEETS_API_BASE.to_string(),
        }
    }

    /// Point the store at a different API root (local emulators, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// A1 range on the configured sheet, e.g. `Sheet1!A2:M2`.
    fn range(&self, a1: &str) -> String {
        format!("{}!{a1}", self.sheet_name)
    }

    /// Fixed overwrite range for one row.
    fn row_range(&self, row_index: usize) -> String {
        self.range(&format!("A{row_index}:{}{row_index}", column_letter(ROW_WIDTH)))
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| StoreError::Unavailable {
                reason: format!("invalid API base: {e}"),
            })?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable {
                reason: "API base cannot carry a path".into(),
            })?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut req = self
            .client
            .request(method, url)
            .bearer_auth(self.access_token.expose_secret());
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| StoreError::Unavailable {
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unavailable {
                reason: format!("credentials rejected ({status}): {detail}"),
            },
            _ => StoreError::Unavailable {
                reason: format!("{status}: {detail}"),
            },
        })
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(range, "")?;
        let resp = self.send(Method::GET, url, None).await?;
        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(body.values)
    }
}

/// Spreadsheet column letter for a 1-based column number (1 → A, 27 → AA).
pub fn column_letter(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

#[async_trait]
impl RecordStore for SheetsStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<FoundRow>, StoreError> {
        let key = normalize(key);
        let column = self.get_values(&self.range("A:A")).await?;

        let Some(position) = column
            .iter()
            .enumerate()
            .skip(HEADER_ROW)
            .find(|(_, cells)| cells.first().is_some_and(|c| normalize(c) == key))
            .map(|(i, _)| i)
        else {
            return Ok(None);
        };

        let row_index = position + 1;
        let cells = self.read_row(row_index).await?;
        debug!(row_index, "Identity located");
        Ok(Some(FoundRow { row_index, cells }))
    }

    async fn read_row(&self, row_index: usize) -> Result<Vec<String>, StoreError> {
        let range = self.range(&format!("{row_index}:{row_index}"));
        self.get_values(&range)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                key: format!("row {row_index}"),
            })
    }

    async fn upsert_row(&self, row_index: usize, values: &[String]) -> Result<(), StoreError> {
        let range = self.row_range(row_index);
        let mut url = self.values_url(&range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [fixed_width_row(values, ROW_WIDTH)],
        });
        self.send(Method::PUT, url, Some(body)).await?;
        debug!(row_index, %range, "Row overwritten");
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), StoreError> {
        let mut url = self.values_url(&self.range("A1"), ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = serde_json::json!({
            "majorDimension": "ROWS",
            "values": [values],
        });
        self.send(Method::POST, url, Some(body)).await?;
        debug!("Row appended");
        Ok(())
    }

    async fn all_rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        self.get_values(&self.sheet_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SheetsStore {
        SheetsStore::new(
            "sheet-id".into(),
            "Roster".into(),
            SecretString::from("token"),
        )
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(13), "M");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(0), "");
    }

    #[test]
    fn row_range_spans_full_width() {
        assert_eq!(store().row_range(7), "Roster!A7:M7");
    }

    #[test]
    fn values_url_encodes_sheet_name() {
        let store = SheetsStore::new(
            "abc".into(),
            "Guild Roster".into(),
            SecretString::from("t"),
        );
        let url = store.values_url(&store.range("A:A"), "").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Guild%20Roster!A:A"
        );
    }

    #[test]
    fn append_url_has_suffix() {
        let store = store();
        let url = store.values_url(&store.range("A1"), ":append").unwrap();
        assert!(url.path().ends_with("/values/Roster!A1:append"));
    }

    #[test]
    fn value_range_without_values_is_empty() {
        let parsed: ValueRange =
            serde_json::from_str(r#"{"range":"Roster!A9:M9","majorDimension":"ROWS"}"#).unwrap();
        assert!(parsed.values.is_empty());
    }

    #[tokio::test]
    async fn unreachable_api_is_unavailable() {
        let store = store().with_api_base("http://127.0.0.1:9/v4/spreadsheets");
        let err = store.find_by_key("ARWEN").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }), "got {err:?}");
    }
}
