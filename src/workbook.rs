// src/workbook.rs
//
// Spreadsheet collaborator. A workbook exposes named tables; a table has a
// header row (ordered column names) and positionally addressed data rows.
// Row lookup by business key is the reconciliation protocol's job, not the
// client's. The production client talks to a Graph-style workbook API over
// HTTPS, forwarding the caller's opaque bearer token; it never inspects
// the token.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),
    #[error("workbook API error: status={status}, message='{message}'")]
    Api { status: StatusCode, message: String },
    #[error("workbook file not found: {0}")]
    FileNotFound(String),
    #[error("table {table} has no '{column}' column")]
    MissingColumn { table: String, column: String },
    #[error("row index {index} out of range for table {table}")]
    RowOutOfRange { table: String, index: usize },
    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),
}

/// One data row: its positional index in the table plus the value vector,
/// ordered like the header row.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub index: usize,
    pub values: Vec<Value>,
}

#[async_trait]
pub trait TableClient: Send + Sync {
    async fn header_row(&self, table: &str) -> Result<Vec<String>, SheetError>;
    async fn rows(&self, table: &str) -> Result<Vec<TableRow>, SheetError>;
    async fn append_rows(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetError>;
    async fn update_row(&self, table: &str, index: usize, values: Vec<Value>)
        -> Result<(), SheetError>;
    async fn delete_row(&self, table: &str, index: usize) -> Result<(), SheetError>;
}

// --- Graph-backed client ---

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Deserialize)]
struct DriveSearchResponse {
    value: Vec<DriveItem>,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    #[serde(rename = "parentReference")]
    parent_reference: Option<ParentReference>,
}

#[derive(Debug, Deserialize)]
struct ParentReference {
    #[serde(rename = "driveId")]
    drive_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    #[serde(default)]
    value: Vec<GraphRow>,
}

#[derive(Debug, Deserialize)]
struct GraphRow {
    index: usize,
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: Option<GraphErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: Option<String>,
}

pub struct GraphWorkbook {
    http: Client,
    access_token: String,
    file_name: String,
    /// Resolved once per client; the file is searched by name on first use.
    located: tokio::sync::OnceCell<(String, Option<String>)>,
}

impl GraphWorkbook {
    pub fn new(http: Client, access_token: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            file_name: file_name.into(),
            located: tokio::sync::OnceCell::new(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SheetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<GraphErrorBody>().await {
            Ok(body) => body
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string()),
            Err(_) => "unknown error".to_string(),
        };
        Err(SheetError::Api { status, message })
    }

    async fn locate_file(&self) -> Result<&(String, Option<String>), SheetError> {
        self.located
            .get_or_try_init(|| async {
                let url = format!(
                    "{GRAPH_BASE_URL}/me/drive/root/search(q='{}')",
                    self.file_name
                );
                let response = self
                    .http
                    .get(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
                    .send()
                    .await?;
                let search: DriveSearchResponse = Self::check(response).await?.json().await?;
                let item = search
                    .value
                    .into_iter()
                    .next()
                    .ok_or_else(|| SheetError::FileNotFound(self.file_name.clone()))?;
                let drive_id = item.parent_reference.and_then(|p| p.drive_id);
                info!(file = %self.file_name, id = %item.id, "located workbook file");
                Ok((item.id, drive_id))
            })
            .await
    }

    /// Table endpoint prefix; shared files address the drive explicitly.
    async fn table_url(&self, table: &str, suffix: &str) -> Result<String, SheetError> {
        let (file_id, drive_id) = self.locate_file().await?;
        let base = match drive_id {
            Some(drive_id) => format!("{GRAPH_BASE_URL}/drives/{drive_id}/items/{file_id}"),
            None => format!("{GRAPH_BASE_URL}/me/drive/items/{file_id}"),
        };
        Ok(format!("{base}/workbook/tables/{table}{suffix}"))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(CONTENT_TYPE, "application/json")
    }
}

#[async_trait]
impl TableClient for GraphWorkbook {
    async fn header_row(&self, table: &str) -> Result<Vec<String>, SheetError> {
        let url = self.table_url(table, "/headerRowRange").await?;
        let response = self.authorized(self.http.get(&url)).send().await?;
        let range: RangeResponse = Self::check(response).await?.json().await?;
        let headers = range
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
        Ok(headers)
    }

    async fn rows(&self, table: &str) -> Result<Vec<TableRow>, SheetError> {
        let url = self.table_url(table, "/rows").await?;
        let response = self.authorized(self.http.get(&url)).send().await?;
        let rows: RowsResponse = Self::check(response).await?.json().await?;
        debug!(table, count = rows.value.len(), "fetched table rows");
        Ok(rows
            .value
            .into_iter()
            .map(|row| TableRow {
                index: row.index,
                values: row.values.into_iter().next().unwrap_or_default(),
            })
            .collect())
    }

    async fn append_rows(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetError> {
        let url = self.table_url(table, "/rows").await?;
        let response = self
            .authorized(self.http.post(&url))
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        index: usize,
        values: Vec<Value>,
    ) -> Result<(), SheetError> {
        let url = self
            .table_url(table, &format!("/rows/itemAt(index={index})"))
            .await?;
        let response = self
            .authorized(self.http.patch(&url))
            .json(&json!({ "values": [values] }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_row(&self, table: &str, index: usize) -> Result<(), SheetError> {
        let url = self
            .table_url(table, &format!("/rows/itemAt(index={index})"))
            .await?;
        let response = self.authorized(self.http.delete(&url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

// --- In-memory workbook for tests and local runs ---

#[derive(Debug, Default)]
struct MemoryTable {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Table fake with the same positional semantics as the Graph client,
/// plus failure injection for partial-batch tests.
#[derive(Default)]
pub struct InMemoryWorkbook {
    tables: Mutex<HashMap<String, MemoryTable>>,
    fail_updates: Mutex<bool>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str, headers: &[&str]) {
        self.tables.lock().unwrap().insert(
            name.to_string(),
            MemoryTable {
                headers: headers.iter().map(|h| h.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn raw_rows(&self, name: &str) -> Vec<Vec<Value>> {
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Makes every subsequent row update fail with an API error.
    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    fn with_table<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MemoryTable) -> Result<R, SheetError>,
    ) -> Result<R, SheetError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| SheetError::FileNotFound(name.to_string()))?;
        f(table)
    }
}

#[async_trait]
impl TableClient for InMemoryWorkbook {
    async fn header_row(&self, table: &str) -> Result<Vec<String>, SheetError> {
        self.with_table(table, |t| Ok(t.headers.clone()))
    }

    async fn rows(&self, table: &str) -> Result<Vec<TableRow>, SheetError> {
        self.with_table(table, |t| {
            Ok(t.rows
                .iter()
                .enumerate()
                .map(|(index, values)| TableRow {
                    index,
                    values: values.clone(),
                })
                .collect())
        })
    }

    async fn append_rows(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<(), SheetError> {
        self.with_table(table, |t| {
            for mut row in rows {
                row.resize(t.headers.len(), Value::String(String::new()));
                t.rows.push(row);
            }
            Ok(())
        })
    }

    async fn update_row(
        &self,
        table: &str,
        index: usize,
        mut values: Vec<Value>,
    ) -> Result<(), SheetError> {
        if *self.fail_updates.lock().unwrap() {
            return Err(SheetError::Api {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "injected failure".to_string(),
            });
        }
        self.with_table(table, |t| {
            let slot = t.rows.get_mut(index).ok_or(SheetError::RowOutOfRange {
                table: table.to_string(),
                index,
            })?;
            values.resize(slot.len(), Value::String(String::new()));
            *slot = values;
            Ok(())
        })
    }

    async fn delete_row(&self, table: &str, index: usize) -> Result<(), SheetError> {
        self.with_table(table, |t| {
            if index >= t.rows.len() {
                return Err(SheetError::RowOutOfRange {
                    table: table.to_string(),
                    index,
                });
            }
            t.rows.remove(index);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_workbook_positional_semantics() {
        let wb = InMemoryWorkbook::new();
        wb.create_table("T", &["ID", "Name"]);
        wb.append_rows("T", vec![vec![json!("a"), json!("one")]])
            .await
            .unwrap();
        wb.append_rows("T", vec![vec![json!("b"), json!("two")]])
            .await
            .unwrap();

        let rows = wb.rows("T").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 1);

        wb.update_row("T", 0, vec![json!("a"), json!("uno")])
            .await
            .unwrap();
        assert_eq!(wb.raw_rows("T")[0][1], json!("uno"));

        wb.delete_row("T", 0).await.unwrap();
        let rows = wb.rows("T").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], json!("b"));

        assert!(matches!(
            wb.update_row("T", 5, vec![]).await,
            Err(SheetError::RowOutOfRange { .. })
        ));
    }
}
