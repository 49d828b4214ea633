// src/sync.rs
//
// Reconciliation protocol between the document store and the workbook.
// Records and table rows are matched by a designated identity column;
// push overwrites or appends, pull creates or updates, and a record that
// has been reviewed locally always wins over the table. Row failures are
// collected and reported; a batch never aborts halfway through because
// one row misbehaved.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result as AnyhowResult};
use chrono::{Days, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::aggregation::refresh_real_hours;
use crate::models::{
    now_iso, ApprovalStatus, AttendanceRecord, AttendanceRequest, FinancialTransaction, Project,
};
use crate::store::{BulkWriter, Entity, Store};
use crate::workbook::{SheetError, TableClient};

/// Rows appended per workbook call; far below the table API's own limits
/// but keeps any single request bounded.
const ROW_APPEND_BATCH: usize = 100;

/// A store entity that lives in one workbook table.
pub trait SheetRecord: Entity + Serialize + DeserializeOwned {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;

    /// Identity cell value; None when the record cannot be matched.
    fn identity(&self) -> Option<String>;

    /// Column-name to field-name remap for the quirky columns.
    fn column_field(column: &str) -> &str {
        column
    }

    /// Pull-side cell coercion (date serials, time fractions, stray
    /// strings where numbers belong).
    fn normalize_cell(_field: &str, value: Value) -> Value {
        value
    }

    /// Records the pull must never overwrite.
    fn pull_protected(&self) -> bool {
        false
    }

    fn mark_synced(&mut self, _at: &str) {}
}

/// Per-batch outcome; every skipped or failed row is accounted for.
#[derive(Debug, Default, serde::Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

fn cell_to_identity(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        // Integral floats stringify without the trailing ".0" so a numeric
        // cell matches the integer identity a local record carries.
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

fn id_column_index<T: SheetRecord>(headers: &[String]) -> Result<usize, SheetError> {
    headers
        .iter()
        .position(|h| h == T::ID_COLUMN)
        .ok_or_else(|| SheetError::MissingColumn {
            table: T::TABLE.to_string(),
            column: T::ID_COLUMN.to_string(),
        })
}

/// Value vector for one record, ordered by the table's header row.
fn row_values<T: SheetRecord>(record: &T, headers: &[String]) -> Result<Vec<Value>, SheetError> {
    let serialized = serde_json::to_value(record)?;
    let map = serialized.as_object().cloned().unwrap_or_default();
    Ok(headers
        .iter()
        .map(|header| {
            map.get(T::column_field(header))
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()))
        })
        .collect())
}

/// Field map for one row, normalized and keyed by field name.
fn row_to_map<T: SheetRecord>(headers: &[String], values: &[Value]) -> Map<String, Value> {
    let mut map = Map::new();
    for (header, value) in headers.iter().zip(values.iter()) {
        let field = T::column_field(header);
        map.insert(
            field.to_string(),
            T::normalize_cell(field, value.clone()),
        );
    }
    map
}

/// Store -> table. The identity index over the table is built once per
/// batch; matched rows are overwritten in place, unmatched records are
/// appended in bounded batches. Successfully pushed records get their
/// sync flag and timestamp stamped.
pub async fn push_records<T: SheetRecord>(
    store: &Store,
    table: &dyn TableClient,
    select: impl Fn(&T) -> bool,
) -> Result<SyncReport, SheetError> {
    let mut report = SyncReport::default();
    let headers = table.header_row(T::TABLE).await?;
    let id_idx = id_column_index::<T>(&headers)?;

    let rows = table.rows(T::TABLE).await?;
    let mut row_index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for row in &rows {
        if let Some(identity) = row.values.get(id_idx).and_then(cell_to_identity) {
            row_index.insert(identity, row.index);
        }
    }

    let mut to_add: Vec<(String, String, Vec<Value>)> = Vec::new();
    let mut to_update: Vec<(String, String, usize, Vec<Value>)> = Vec::new();
    for (doc_id, record) in store.filter::<T>(&select) {
        let Some(identity) = record.identity() else {
            report
                .errors
                .push(format!("{} record {} has no identity value", T::TABLE, doc_id));
            continue;
        };
        let values = match row_values(&record, &headers) {
            Ok(values) => values,
            Err(err) => {
                report
                    .errors
                    .push(format!("{} record {identity}: {err}", T::TABLE));
                continue;
            }
        };
        match row_index.get(&identity) {
            Some(&index) => to_update.push((doc_id, identity, index, values)),
            None => to_add.push((doc_id, identity, values)),
        }
    }
    info!(
        table = T::TABLE,
        add = to_add.len(),
        update = to_update.len(),
        "pushing records to workbook"
    );

    for chunk in to_add.chunks(ROW_APPEND_BATCH) {
        let values: Vec<Vec<Value>> = chunk.iter().map(|(_, _, v)| v.clone()).collect();
        match table.append_rows(T::TABLE, values).await {
            Ok(()) => {
                let stamp = now_iso();
                for (doc_id, identity, _) in chunk {
                    let _ = store.update::<T, _>(doc_id, |r| r.mark_synced(&stamp));
                    report.created.push(identity.clone());
                }
            }
            Err(err) => {
                warn!(table = T::TABLE, %err, "append batch failed");
                report
                    .errors
                    .push(format!("failed to append batch of {} rows: {err}", chunk.len()));
            }
        }
    }

    for (doc_id, identity, index, values) in to_update {
        match table.update_row(T::TABLE, index, values).await {
            Ok(()) => {
                let stamp = now_iso();
                let _ = store.update::<T, _>(&doc_id, |r| r.mark_synced(&stamp));
                report.updated.push(identity);
            }
            Err(err) => {
                report
                    .errors
                    .push(format!("failed to update row for {identity}: {err}"));
            }
        }
    }

    Ok(report)
}

/// Table -> store. Creates or field-merges local records by identity.
/// Reviewed records are skipped: once a record has been approved or
/// rejected locally, the table loses.
pub async fn pull_records<T: SheetRecord>(
    store: &Store,
    table: &dyn TableClient,
) -> Result<SyncReport, SheetError> {
    let mut report = SyncReport::default();
    let headers = table.header_row(T::TABLE).await?;
    let id_idx = id_column_index::<T>(&headers)?;
    let rows = table.rows(T::TABLE).await?;

    let mut local: HashMap<String, String> = HashMap::new();
    for (doc_id, record) in store.all::<T>() {
        if let Some(identity) = record.identity() {
            local.insert(identity, doc_id);
        }
    }

    for row in rows {
        let Some(identity) = row.values.get(id_idx).and_then(cell_to_identity) else {
            continue;
        };
        let pulled = row_to_map::<T>(&headers, &row.values);

        match local.get(&identity) {
            Some(doc_id) => {
                let Some(existing) = store.get::<T>(doc_id) else {
                    continue;
                };
                if existing.pull_protected() {
                    report.skipped.push(identity);
                    continue;
                }
                let mut merged = match serde_json::to_value(&existing) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                merged.extend(pulled);
                match serde_json::from_value::<T>(Value::Object(merged)) {
                    Ok(record) => {
                        let _ = store.replace(doc_id, record);
                        report.updated.push(identity);
                    }
                    Err(err) => report
                        .errors
                        .push(format!("failed to merge row {identity}: {err}")),
                }
            }
            None => match serde_json::from_value::<T>(Value::Object(pulled)) {
                Ok(record) => {
                    store.insert(record);
                    report.created.push(identity);
                }
                Err(err) => report
                    .errors
                    .push(format!("failed to read row {identity}: {err}")),
            },
        }
    }

    info!(
        table = T::TABLE,
        created = report.created.len(),
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "pull sync finished"
    );
    Ok(report)
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ReplaceReport {
    pub dry_run: bool,
    pub created: Vec<String>,
    pub overwritten: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

/// Destructive full resync: every local record absent from the table is
/// deleted, every table row deep-overwrites (not merges) its local record.
/// Gated behind `dry_run` — the default run reports the diff and mutates
/// nothing.
pub async fn full_replace<T: SheetRecord>(
    store: &Store,
    table: &dyn TableClient,
    dry_run: bool,
) -> Result<ReplaceReport, SheetError> {
    let mut report = ReplaceReport {
        dry_run,
        ..Default::default()
    };
    let headers = table.header_row(T::TABLE).await?;
    let id_idx = id_column_index::<T>(&headers)?;
    let rows = table.rows(T::TABLE).await?;

    let mut incoming: Vec<(String, T)> = Vec::new();
    let mut incoming_ids: HashSet<String> = HashSet::new();
    for row in rows {
        let Some(identity) = row.values.get(id_idx).and_then(cell_to_identity) else {
            continue;
        };
        let map = row_to_map::<T>(&headers, &row.values);
        match serde_json::from_value::<T>(Value::Object(map)) {
            Ok(record) => {
                incoming_ids.insert(identity.clone());
                incoming.push((identity, record));
            }
            Err(err) => report
                .errors
                .push(format!("failed to read row {identity}: {err}")),
        }
    }

    let mut local: HashMap<String, String> = HashMap::new();
    for (doc_id, record) in store.all::<T>() {
        match record.identity() {
            Some(identity) if incoming_ids.contains(&identity) => {
                local.insert(identity, doc_id);
            }
            Some(identity) => report.deleted.push(identity),
            // Unmatchable records cannot survive a full resync.
            None => report.deleted.push(doc_id),
        }
    }
    for (identity, _) in &incoming {
        if local.contains_key(identity) {
            report.overwritten.push(identity.clone());
        } else {
            report.created.push(identity.clone());
        }
    }

    if dry_run {
        info!(
            table = T::TABLE,
            create = report.created.len(),
            overwrite = report.overwritten.len(),
            delete = report.deleted.len(),
            "full replace dry run"
        );
        return Ok(report);
    }

    let mut bulk = BulkWriter::new(store);
    for (doc_id, record) in store.all::<T>() {
        let keep = record
            .identity()
            .map(|identity| incoming_ids.contains(&identity))
            .unwrap_or(false);
        if !keep {
            bulk.delete::<T>(doc_id);
        }
    }
    for (identity, record) in incoming {
        match local.get(&identity) {
            Some(doc_id) => bulk.put(doc_id.clone(), record),
            None => bulk.put(crate::models::generate_doc_id(), record),
        }
    }
    if let Err(err) = bulk.commit() {
        report.errors.push(format!("bulk commit failed: {err}"));
    }
    info!(
        table = T::TABLE,
        created = report.created.len(),
        overwritten = report.overwritten.len(),
        deleted = report.deleted.len(),
        "full replace applied"
    );
    Ok(report)
}

// --- Table bindings ---

impl SheetRecord for AttendanceRecord {
    const TABLE: &'static str = "TimeAttendance";
    const ID_COLUMN: &'static str = "ID";

    fn identity(&self) -> Option<String> {
        if self.id.is_empty() {
            None
        } else {
            Some(self.id.clone())
        }
    }

    fn column_field(column: &str) -> &str {
        match column {
            "start time" => "startTime",
            "end time" => "endTime",
            // Legacy overtime column label carried over from the workbook.
            "илүү цаг" => "overtimeHour",
            "FirstName" => "EmployeeFirstName",
            "LastName" => "EmployeeLastName",
            other => other,
        }
    }

    fn normalize_cell(field: &str, value: Value) -> Value {
        match field {
            "Day" => normalize_date_cell(value),
            "startTime" | "endTime" => normalize_time_cell(value),
            "WorkingHour" | "overtimeHour" => normalize_number_cell(value),
            "Week" | "ProjectID" => normalize_integer_cell(value),
            "EmployeeID" => normalize_string_cell(value),
            _ => value,
        }
    }

    fn pull_protected(&self) -> bool {
        self.approval_status.is_reviewed()
    }

    fn mark_synced(&mut self, at: &str) {
        self.synced_to_sheet = true;
        self.last_synced_at = Some(at.to_string());
    }
}

impl SheetRecord for FinancialTransaction {
    const TABLE: &'static str = "FinancialTransactions";
    const ID_COLUMN: &'static str = "ID";

    fn identity(&self) -> Option<String> {
        if self.id.is_empty() {
            None
        } else {
            Some(self.id.clone())
        }
    }

    fn normalize_cell(field: &str, value: Value) -> Value {
        match field {
            "date" => normalize_date_cell(value),
            "amount" => normalize_number_cell(value),
            "projectID" | "employeeID" => normalize_integer_cell(value),
            "receipt" | "vat" => normalize_bool_cell(value),
            _ => value,
        }
    }

    fn mark_synced(&mut self, at: &str) {
        self.synced_to_sheet = true;
        self.last_synced_at = Some(at.to_string());
    }
}

impl SheetRecord for Project {
    const TABLE: &'static str = "Projects";
    const ID_COLUMN: &'static str = "id";

    fn identity(&self) -> Option<String> {
        if self.id == 0 {
            None
        } else {
            Some(self.id.to_string())
        }
    }

    fn mark_synced(&mut self, at: &str) {
        self.synced_to_sheet = true;
        self.last_synced_at = Some(at.to_string());
    }
}

// --- Cell normalization ---

/// Workbook date serials count days from 1900; 25569 is the Unix epoch.
fn serial_to_iso_date(serial: f64) -> Option<String> {
    let days = (serial - 25569.0).floor();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = if days >= 0.0 {
        epoch.checked_add_days(Days::new(days as u64))?
    } else {
        epoch.checked_sub_days(Days::new((-days) as u64))?
    };
    Some(date.format("%Y-%m-%d").to_string())
}

/// Workbook times are day fractions (0.5 == 12:00).
fn fraction_to_hhmm(fraction: f64) -> String {
    let total_minutes = (fraction * 24.0 * 60.0).round() as i64;
    format!("{:02}:{:02}", total_minutes / 60, total_minutes % 60)
}

fn normalize_date_cell(value: Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(serial_to_iso_date)
            .map(Value::String)
            .unwrap_or(Value::Null),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                // Datetime strings reduce to their date part.
                let date = trimmed.split('T').next().unwrap_or(trimmed);
                Value::String(date.to_string())
            }
        }
        _ => Value::Null,
    }
}

fn normalize_time_cell(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f > 0.0 && f < 1.0 => Value::String(fraction_to_hhmm(f)),
            _ => Value::String(String::new()),
        },
        Value::String(s) => Value::String(s),
        _ => Value::String(String::new()),
    }
}

fn normalize_number_cell(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(n),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| serde_json::json!(0.0)),
        _ => serde_json::json!(0.0),
    }
}

fn normalize_integer_cell(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::json!(i)
            } else if let Some(f) = n.as_f64() {
                serde_json::json!(f.round() as i64)
            } else {
                Value::Null
            }
        }
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => serde_json::json!(i),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}

fn normalize_string_cell(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s),
        Value::Number(n) => Value::String(n.to_string()),
        _ => Value::String(String::new()),
    }
}

fn normalize_bool_cell(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(b),
        Value::String(s) => Value::Bool(s.trim().eq_ignore_ascii_case("true")),
        Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        _ => Value::Bool(false),
    }
}

// --- Attendance push orchestration ---

#[derive(Debug, serde::Serialize)]
pub struct AttendancePushReport {
    #[serde(flatten)]
    pub sync: SyncReport,
    pub purged_requests: usize,
    pub refreshed_projects: usize,
}

/// Pushes unsynced attendance, then runs the post-push housekeeping: purge
/// approved requests and refresh every project's hour totals.
pub async fn push_attendance(
    store: &Store,
    table: &dyn TableClient,
) -> AnyhowResult<AttendancePushReport> {
    let sync = push_records::<AttendanceRecord>(store, table, |r| !r.synced_to_sheet)
        .await
        .context("attendance push failed")?;

    let purged = purge_approved_requests(store).context("purging approved requests failed")?;
    let refreshed = refresh_real_hours(store).context("refreshing project hours failed")?;

    Ok(AttendancePushReport {
        sync,
        purged_requests: purged,
        refreshed_projects: refreshed,
    })
}

/// Approved requests have served their purpose once the canonical record
/// is in the sheet; delete them in ceiling-sized batches.
pub fn purge_approved_requests(store: &Store) -> AnyhowResult<usize> {
    let approved =
        store.filter::<AttendanceRequest>(|r| r.state == ApprovalStatus::Approved);
    let count = approved.len();
    let mut bulk = BulkWriter::new(store);
    for (doc_id, _) in approved {
        bulk.delete::<AttendanceRequest>(doc_id);
    }
    bulk.commit().context("request purge batch failed")?;
    if count > 0 {
        info!(count, "purged approved attendance requests");
    }
    Ok(count)
}
