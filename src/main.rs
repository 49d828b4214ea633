// src/main.rs

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregation;
mod approval;
mod audit;
mod calculations;
mod finance;
mod models;
mod store;
mod sync;
mod sync_tests;
mod validation;
mod warehouse;
mod workbook;

use aggregation::{
    create_project, project_hour_summary, recalculate_all_projects, update_project,
    AggregationError,
};
use approval::{
    add_attendance_request, delete_attendance_record, delete_attendance_request,
    review_attendance_request, submit_attendance, update_attendance_record,
    update_attendance_request, ApprovalError, ReviewAction,
};
use audit::{audit_attendance, reset_attendance_status};
use finance::{create_transaction, delete_transaction, update_transaction, FinanceError};
use models::{
    AttendancePatch, AttendanceRecord, Employee, FinancialTransaction, Project, ProjectPatch,
    WarehouseRequest, WarehouseTransaction,
};
use store::{Store, StoreError};
use sync::{full_replace, pull_records, push_attendance, push_records};
use warehouse::{
    approve_draw_request, create_draw_request, create_stock_transaction, delete_draw_request,
    delete_stock_transaction, reject_draw_request, update_stock_transaction, WarehouseError,
};
use workbook::{GraphWorkbook, SheetError};

// --- Configuration ---

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_WORKBOOK_FILE: &str = "MainWorkbook.xlsx";
const ENV_PREFIX: &str = "SITEOPS_";

#[derive(Debug, Clone, Deserialize, Default)]
struct EnvConfig {
    bind: Option<String>,
    workbook_file: Option<String>,
}

#[derive(Parser, Debug)]
#[command(name = "siteops-core", about = "Construction operations backend")]
struct Cli {
    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<String>,
    /// Workbook file name searched for in the cloud drive
    #[arg(long)]
    workbook_file: Option<String>,
}

#[derive(Debug, Clone)]
struct AppConfig {
    bind: SocketAddr,
    workbook_file: String,
}

impl AppConfig {
    fn load(cli: Cli, env: EnvConfig) -> anyhow::Result<Self> {
        let bind = cli
            .bind
            .or(env.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()?;
        let workbook_file = cli
            .workbook_file
            .or(env.workbook_file)
            .unwrap_or_else(|| DEFAULT_WORKBOOK_FILE.to_string());
        Ok(Self {
            bind,
            workbook_file,
        })
    }
}

/// Process-wide handles, created once at startup and cloned into every
/// handler. There is no other way to reach the store or the HTTP client.
#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

// --- Error mapping ---

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Finance(#[from] FinanceError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Approval(err) => match err {
                ApprovalError::RequestNotFound(_) | ApprovalError::RecordNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ApprovalError::AlreadyReviewed(_) | ApprovalError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                ApprovalError::Store(err) => store_status(err),
                ApprovalError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Finance(err) => match err {
                FinanceError::NotFound(_) => StatusCode::NOT_FOUND,
                FinanceError::Rejected(_) => StatusCode::CONFLICT,
                FinanceError::Store(err) => store_status(err),
            },
            AppError::Warehouse(err) => match err {
                WarehouseError::ItemNotFound(_)
                | WarehouseError::TransactionNotFound(_)
                | WarehouseError::RequestNotFound(_) => StatusCode::NOT_FOUND,
                WarehouseError::AlreadyReviewed(_)
                | WarehouseError::InsufficientQuantity { .. } => StatusCode::CONFLICT,
                WarehouseError::NonPositiveQuantity => StatusCode::BAD_REQUEST,
                WarehouseError::Store(err) => store_status(err),
            },
            AppError::Aggregation(err) => match err {
                AggregationError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
                AggregationError::DuplicateProjectId(_) => StatusCode::CONFLICT,
                AggregationError::MissingProjectId => StatusCode::BAD_REQUEST,
                AggregationError::Store(err) => store_status(err),
            },
            AppError::Store(err) => store_status(err),
            AppError::Sheet(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The per-diem soft block is distinguishable so the client can offer
    /// a confirmation round-trip instead of a dead end.
    fn needs_confirmation(&self) -> bool {
        matches!(
            self,
            AppError::Finance(FinanceError::Rejected(rejection)) if rejection.needs_confirmation()
        )
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::BatchLimitExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let mut body = json!({ "success": false, "error": self.to_string() });
        if self.needs_confirmation() {
            body["needsConfirmation"] = json!(true);
        }
        (status, Json(body)).into_response()
    }
}

// --- Attendance handlers ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum AttendanceRequestOp {
    Add {
        request: AttendanceRecord,
    },
    Update {
        #[serde(rename = "requestId")]
        request_id: String,
        patch: AttendancePatch,
    },
    Delete {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

async fn manage_attendance_request(
    State(state): State<AppState>,
    Json(op): Json<AttendanceRequestOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        AttendanceRequestOp::Add { request } => {
            let request_id = add_attendance_request(&state.store, request)?;
            Ok(Json(json!({ "success": true, "requestId": request_id })))
        }
        AttendanceRequestOp::Update { request_id, patch } => {
            update_attendance_request(&state.store, &request_id, &patch)?;
            Ok(Json(json!({ "success": true, "requestId": request_id })))
        }
        AttendanceRequestOp::Delete { request_id } => {
            delete_attendance_request(&state.store, &request_id)?;
            Ok(Json(json!({ "success": true, "requestId": request_id })))
        }
    }
}

#[derive(Deserialize)]
struct ReviewBody {
    action: ReviewAction,
    #[serde(rename = "requestId")]
    request_id: String,
}

async fn review_attendance(
    State(state): State<AppState>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let outcome = review_attendance_request(&state.store, &body.request_id, body.action)?;
    Ok(Json(json!({
        "success": true,
        "state": outcome.state,
        "recordId": outcome.record_doc_id,
    })))
}

#[derive(Deserialize)]
struct SubmitBody {
    attendance: AttendanceRecord,
    /// When present, the record is also appended to the workbook right
    /// away; a workbook failure never fails the submission itself.
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

async fn submit_attendance_handler(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<Value>, AppError> {
    let doc_id = submit_attendance(&state.store, body.attendance);

    let mut sheet_error = None;
    if let Some(token) = body.access_token.as_deref() {
        let workbook = state.workbook(token);
        let target = doc_id.clone();
        match push_records::<AttendanceRecord>(&state.store, &workbook, |r| !r.synced_to_sheet)
            .await
        {
            Ok(report) if report.errors.is_empty() => {}
            Ok(report) => sheet_error = Some(report.errors.join("; ")),
            Err(err) => {
                tracing::warn!(record = %target, %err, "immediate workbook append failed");
                sheet_error = Some(err.to_string());
            }
        }
    }

    let mut response = json!({ "success": true, "id": doc_id });
    if let Some(sheet_error) = sheet_error {
        response["sheetError"] = json!(sheet_error);
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum AttendanceRecordOp {
    Update {
        #[serde(rename = "recordId")]
        record_id: String,
        patch: AttendancePatch,
    },
    Delete {
        #[serde(rename = "recordId")]
        record_id: String,
    },
}

async fn manage_attendance_record(
    State(state): State<AppState>,
    Json(op): Json<AttendanceRecordOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        AttendanceRecordOp::Update { record_id, patch } => {
            update_attendance_record(&state.store, &record_id, &patch)?;
            Ok(Json(json!({ "success": true, "recordId": record_id })))
        }
        AttendanceRecordOp::Delete { record_id } => {
            delete_attendance_record(&state.store, &record_id)?;
            Ok(Json(json!({ "success": true, "recordId": record_id })))
        }
    }
}

// --- Project handlers ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ProjectOp {
    Add {
        project: Project,
    },
    Update {
        #[serde(rename = "projectId")]
        project_id: i64,
        patch: ProjectPatch,
    },
}

async fn manage_project(
    State(state): State<AppState>,
    Json(op): Json<ProjectOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        ProjectOp::Add { project } => {
            let project_id = project.id;
            let doc_id = create_project(&state.store, project)?;
            Ok(Json(
                json!({ "success": true, "projectId": project_id, "docId": doc_id }),
            ))
        }
        ProjectOp::Update { project_id, patch } => {
            update_project(&state.store, project_id, &patch)?;
            Ok(Json(json!({ "success": true, "projectId": project_id })))
        }
    }
}

async fn recalculate_projects(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let report = recalculate_all_projects(&state.store)?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn project_summary(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let summary = project_hour_summary(&state.store, project_id);
    Ok(Json(json!({ "success": true, "summary": summary })))
}

// --- Finance handlers ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum FinanceOp {
    Create {
        transaction: FinancialTransaction,
        #[serde(rename = "confirmDuplicate", default)]
        confirm_duplicate: bool,
    },
    Update {
        #[serde(rename = "transactionId")]
        transaction_id: String,
        transaction: FinancialTransaction,
        #[serde(rename = "confirmDuplicate", default)]
        confirm_duplicate: bool,
    },
    Delete {
        #[serde(rename = "transactionId")]
        transaction_id: String,
    },
}

async fn manage_financial_transaction(
    State(state): State<AppState>,
    Json(op): Json<FinanceOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        FinanceOp::Create {
            transaction,
            confirm_duplicate,
        } => {
            let (doc_id, transaction) =
                create_transaction(&state.store, transaction, confirm_duplicate)?;
            Ok(Json(
                json!({ "success": true, "docId": doc_id, "transaction": transaction }),
            ))
        }
        FinanceOp::Update {
            transaction_id,
            transaction,
            confirm_duplicate,
        } => {
            let transaction =
                update_transaction(&state.store, &transaction_id, transaction, confirm_duplicate)?;
            Ok(Json(json!({ "success": true, "transaction": transaction })))
        }
        FinanceOp::Delete { transaction_id } => {
            delete_transaction(&state.store, &transaction_id)?;
            Ok(Json(json!({ "success": true })))
        }
    }
}

// --- Warehouse handlers ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WarehouseTxOp {
    Create {
        transaction: WarehouseTransaction,
    },
    Update {
        #[serde(rename = "transactionId")]
        transaction_id: String,
        transaction: WarehouseTransaction,
    },
    Delete {
        #[serde(rename = "transactionId")]
        transaction_id: String,
    },
}

async fn manage_warehouse_transaction(
    State(state): State<AppState>,
    Json(op): Json<WarehouseTxOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        WarehouseTxOp::Create { transaction } => {
            let (doc_id, transaction) = create_stock_transaction(&state.store, transaction)?;
            Ok(Json(
                json!({ "success": true, "docId": doc_id, "transaction": transaction }),
            ))
        }
        WarehouseTxOp::Update {
            transaction_id,
            transaction,
        } => {
            let transaction =
                update_stock_transaction(&state.store, &transaction_id, transaction)?;
            Ok(Json(json!({ "success": true, "transaction": transaction })))
        }
        WarehouseTxOp::Delete { transaction_id } => {
            delete_stock_transaction(&state.store, &transaction_id)?;
            Ok(Json(json!({ "success": true })))
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WarehouseRequestOp {
    Create {
        request: WarehouseRequest,
    },
    Approve {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Reject {
        #[serde(rename = "requestId")]
        request_id: String,
        reason: Option<String>,
    },
    Delete {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

async fn manage_warehouse_request(
    State(state): State<AppState>,
    Json(op): Json<WarehouseRequestOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        WarehouseRequestOp::Create { request } => {
            let request_id = create_draw_request(&state.store, request)?;
            Ok(Json(json!({ "success": true, "requestId": request_id })))
        }
        WarehouseRequestOp::Approve { request_id } => {
            let transaction_id = approve_draw_request(&state.store, &request_id)?;
            Ok(Json(
                json!({ "success": true, "transactionId": transaction_id }),
            ))
        }
        WarehouseRequestOp::Reject { request_id, reason } => {
            reject_draw_request(&state.store, &request_id, reason)?;
            Ok(Json(json!({ "success": true })))
        }
        WarehouseRequestOp::Delete { request_id } => {
            delete_draw_request(&state.store, &request_id)?;
            Ok(Json(json!({ "success": true })))
        }
    }
}

// --- Employee handlers ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum EmployeeOp {
    Add {
        employee: Employee,
    },
    Update {
        #[serde(rename = "employeeId")]
        employee_id: String,
        employee: Employee,
    },
    Delete {
        #[serde(rename = "employeeId")]
        employee_id: String,
    },
}

async fn manage_employee(
    State(state): State<AppState>,
    Json(op): Json<EmployeeOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        EmployeeOp::Add { employee } => {
            let doc_id = state.store.insert(employee);
            Ok(Json(json!({ "success": true, "employeeId": doc_id })))
        }
        EmployeeOp::Update {
            employee_id,
            employee,
        } => {
            state.store.replace(&employee_id, employee)?;
            Ok(Json(json!({ "success": true, "employeeId": employee_id })))
        }
        EmployeeOp::Delete { employee_id } => {
            state.store.delete::<Employee>(&employee_id)?;
            Ok(Json(json!({ "success": true })))
        }
    }
}

// --- Sync handlers ---

#[derive(Deserialize)]
struct SyncBody {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "dryRun")]
    dry_run: Option<bool>,
}

impl AppState {
    fn workbook(&self, access_token: &str) -> GraphWorkbook {
        GraphWorkbook::new(
            self.http.clone(),
            access_token,
            self.config.workbook_file.clone(),
        )
    }
}

async fn sync_attendance_push(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    let report = push_attendance(&state.store, &workbook).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn sync_attendance_pull(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    let report = pull_records::<AttendanceRecord>(&state.store, &workbook).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn sync_attendance_full(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    // Destructive; runs as a dry run unless explicitly disabled.
    let dry_run = body.dry_run.unwrap_or(true);
    let report = full_replace::<AttendanceRecord>(&state.store, &workbook, dry_run).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn sync_finance_push(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    let report =
        push_records::<FinancialTransaction>(&state.store, &workbook, |t| !t.synced_to_sheet)
            .await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn sync_finance_pull(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    let report = pull_records::<FinancialTransaction>(&state.store, &workbook).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

async fn sync_projects_push(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, AppError> {
    let workbook = state.workbook(&body.access_token);
    let report = push_records::<Project>(&state.store, &workbook, |p| !p.synced_to_sheet).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

// --- Audit handler ---

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum AuditOp {
    Validate {
        #[serde(rename = "markRetired", default)]
        mark_retired: bool,
    },
    Reset,
}

async fn audit_attendance_handler(
    State(state): State<AppState>,
    Json(op): Json<AuditOp>,
) -> Result<Json<Value>, AppError> {
    match op {
        AuditOp::Validate { mark_retired } => {
            let today = chrono::Utc::now().date_naive();
            let report = audit_attendance(&state.store, today, mark_retired)?;
            Ok(Json(json!({ "success": true, "report": report })))
        }
        AuditOp::Reset => {
            let reset = reset_attendance_status(&state.store)?;
            Ok(Json(json!({ "success": true, "reset": reset })))
        }
    }
}

// --- Wiring ---

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/attendance/requests", post(manage_attendance_request))
        .route("/api/attendance/requests/review", post(review_attendance))
        .route("/api/attendance/submit", post(submit_attendance_handler))
        .route("/api/attendance/records", post(manage_attendance_record))
        .route("/api/projects", post(manage_project))
        .route("/api/projects/recalculate", post(recalculate_projects))
        .route("/api/projects/{id}/summary", get(project_summary))
        .route(
            "/api/finance/transactions",
            post(manage_financial_transaction),
        )
        .route(
            "/api/warehouse/transactions",
            post(manage_warehouse_transaction),
        )
        .route("/api/warehouse/requests", post(manage_warehouse_request))
        .route("/api/employees", post(manage_employee))
        .route("/api/sync/attendance/push", post(sync_attendance_push))
        .route("/api/sync/attendance/pull", post(sync_attendance_pull))
        .route("/api/sync/attendance/full", post(sync_attendance_full))
        .route("/api/sync/finance/push", post(sync_finance_push))
        .route("/api/sync/finance/pull", post(sync_finance_pull))
        .route("/api/sync/projects/push", post(sync_projects_push))
        .route("/api/audit/attendance", post(audit_attendance_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let env = envy::prefixed(ENV_PREFIX)
        .from_env::<EnvConfig>()
        .unwrap_or_default();
    let config = AppConfig::load(cli, env)?;
    info!(bind = %config.bind, workbook = %config.workbook_file, "starting siteops-core");

    let state = AppState {
        store: Arc::new(Store::new()),
        http: reqwest::Client::new(),
        config: Arc::new(config.clone()),
    };

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_precedence_cli_over_env_over_default() {
        let cli = Cli {
            bind: Some("127.0.0.1:9999".into()),
            workbook_file: None,
        };
        let env = EnvConfig {
            bind: Some("127.0.0.1:1111".into()),
            workbook_file: Some("Ops.xlsx".into()),
        };
        let config = AppConfig::load(cli, env).unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:9999");
        assert_eq!(config.workbook_file, "Ops.xlsx");

        let config = AppConfig::load(
            Cli {
                bind: None,
                workbook_file: None,
            },
            EnvConfig::default(),
        )
        .unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.workbook_file, DEFAULT_WORKBOOK_FILE);
    }
}
