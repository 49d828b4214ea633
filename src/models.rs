// src/models.rs

use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// Record identity carried into the workbook: millis since epoch plus a
/// short random suffix, generated client-side so a record keeps the same
/// identity across store and sheet.
pub fn generate_record_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

/// Store-side document key, distinct from the record identity above.
pub fn generate_doc_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Composite key identifying "this employee on this calendar day" — the
/// grain at which attendance and allowance rules apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmployeeDayKey {
    pub employee_id: String,
    pub day: NaiveDate,
}

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttendanceStatus {
    #[default]
    Present,
    OnLeave,
    Absent,
    BusinessTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// Reviewed records are owned by the store; pull-sync must not touch them.
    pub fn is_reviewed(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }
}

/// Verdict stamped by the batch auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    Valid,
    Invalid,
    Retired,
}

/// What the money was paid out for. Closed set; anything else is rejected
/// before any write happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    ProjectWork,
    SalaryAdvance,
    SupplyPurchase,
    PersonalExpense,
    OfficeSupply,
    MealOrTrip,
}

impl Purpose {
    /// Project-purpose transactions must carry a project and a type.
    pub fn requires_project(self) -> bool {
        matches!(self, Purpose::ProjectWork)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    ContractorFee,
    PerDiem,
    TripAllowance,
    Fuel,
    Materials,
}

/// Expense bucket a transaction type rolls into during project aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseBucket {
    Hr,
    Vehicle,
    Material,
}

impl TxType {
    pub fn bucket(self) -> ExpenseBucket {
        match self {
            TxType::ContractorFee | TxType::PerDiem | TxType::TripAllowance => ExpenseBucket::Hr,
            TxType::Fuel => ExpenseBucket::Vehicle,
            TxType::Materials => ExpenseBucket::Material,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StockDirection {
    #[default]
    Inbound,
    Outbound,
}

// --- Attendance ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttendanceRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Day")]
    pub day: Option<NaiveDate>,
    #[serde(rename = "WeekDay")]
    pub weekday: String,
    #[serde(rename = "Week")]
    pub week: u32,
    #[serde(rename = "EmployeeID")]
    pub employee_id: String,
    #[serde(rename = "EmployeeFirstName")]
    pub employee_first_name: String,
    #[serde(rename = "EmployeeLastName")]
    pub employee_last_name: String,
    /// Role label captured at submission time; aggregation never joins back
    /// to the employees collection.
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "Status")]
    pub status: AttendanceStatus,
    #[serde(rename = "ProjectID")]
    pub project_id: Option<i64>,
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    /// "HH:MM"; empty when the day carries no interval (leave, absence).
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    #[serde(rename = "WorkingHour")]
    pub working_hour: f64,
    #[serde(rename = "overtimeHour")]
    pub overtime_hour: f64,
    #[serde(rename = "comment")]
    pub comment: String,
    #[serde(rename = "approvalStatus")]
    pub approval_status: ApprovalStatus,
    #[serde(rename = "dataStatus", skip_serializing_if = "Option::is_none")]
    pub data_status: Option<DataStatus>,
    #[serde(rename = "syncedToSheet")]
    pub synced_to_sheet: bool,
    #[serde(rename = "lastSyncedAt", skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "approvedAt", skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
}

impl AttendanceRecord {
    pub fn employee_day(&self) -> Option<EmployeeDayKey> {
        self.day.map(|day| EmployeeDayKey {
            employee_id: self.employee_id.clone(),
            day,
        })
    }
}

/// An employee-submitted attendance awaiting review. Same payload as the
/// canonical record plus the review lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttendanceRequest {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    /// Review lifecycle; distinct from the presence `Status` above.
    #[serde(rename = "status")]
    pub state: ApprovalStatus,
    #[serde(rename = "rejectedAt", skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<String>,
}

/// Fields an attendance edit is permitted to touch. Anything absent stays
/// as stored; derived time fields are recomputed after application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AttendancePatch {
    #[serde(rename = "Day")]
    pub day: Option<NaiveDate>,
    #[serde(rename = "Status")]
    pub status: Option<AttendanceStatus>,
    #[serde(rename = "ProjectID")]
    pub project_id: Option<i64>,
    #[serde(rename = "ProjectName")]
    pub project_name: Option<String>,
    #[serde(rename = "Role")]
    pub role: Option<String>,
    #[serde(rename = "startTime")]
    pub start_time: Option<String>,
    #[serde(rename = "endTime")]
    pub end_time: Option<String>,
    #[serde(rename = "comment")]
    pub comment: Option<String>,
}

impl AttendancePatch {
    /// Applies the patch; returns true when an hour- or reference-affecting
    /// field actually changed (the signal for re-aggregation).
    pub fn apply(&self, record: &mut AttendanceRecord) -> bool {
        let mut touched = false;
        if let Some(day) = self.day {
            touched |= record.day != Some(day);
            record.day = Some(day);
        }
        if let Some(status) = self.status {
            touched |= record.status != status;
            record.status = status;
        }
        if let Some(project_id) = self.project_id {
            touched |= record.project_id != Some(project_id);
            record.project_id = Some(project_id);
        }
        if let Some(ref name) = self.project_name {
            record.project_name = name.clone();
        }
        if let Some(ref role) = self.role {
            touched |= &record.role != role;
            record.role = role.clone();
        }
        if let Some(ref start) = self.start_time {
            touched |= &record.start_time != start;
            record.start_time = start.clone();
        }
        if let Some(ref end) = self.end_time {
            touched |= &record.end_time != end;
            record.end_time = end.clone();
        }
        if let Some(ref comment) = self.comment {
            record.comment = comment.clone();
        }
        touched
    }
}

// --- Project ---

pub const PROJECT_STATUS_FINISHED: &str = "Finished";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Project {
    /// Business identity, distinct from the store document key.
    #[serde(rename = "id")]
    pub id: i64,
    #[serde(rename = "Customer")]
    pub customer: String,
    #[serde(rename = "Site")]
    pub site: String,
    #[serde(rename = "Status")]
    pub status: String,

    // Static inputs.
    #[serde(rename = "WosHour")]
    pub wos_hour: f64,
    #[serde(rename = "PlannedHour")]
    pub planned_hour: f64,
    #[serde(rename = "additionalHour")]
    pub additional_hour: f64,
    #[serde(rename = "additionalValue")]
    pub additional_value: f64,
    /// Manually entered HR expense, on top of transaction-derived expense.
    #[serde(rename = "ExpenseHR")]
    pub expense_hr: f64,
    #[serde(rename = "IncomeVehicle")]
    pub income_vehicle: f64,
    #[serde(rename = "IncomeMaterial")]
    pub income_material: f64,
    #[serde(rename = "ExpenseHSE")]
    pub expense_hse: f64,

    // Derived block — written only by the aggregation layer.
    #[serde(rename = "RealHour")]
    pub real_hour: f64,
    #[serde(rename = "WorkingHours")]
    pub working_hours: f64,
    #[serde(rename = "OvertimeHours")]
    pub overtime_hours: f64,
    #[serde(rename = "EngineerWorkHour")]
    pub engineer_work_hour: f64,
    #[serde(rename = "NonEngineerWorkHour")]
    pub non_engineer_work_hour: f64,
    #[serde(rename = "BaseAmount")]
    pub base_amount: i64,
    #[serde(rename = "TeamBounty")]
    pub team_bounty: i64,
    #[serde(rename = "NonEngineerBounty")]
    pub non_engineer_bounty: i64,
    #[serde(rename = "HourPerformance")]
    pub hour_performance: f64,
    #[serde(rename = "EngineerHand")]
    pub engineer_hand: i64,
    #[serde(rename = "IncomeHR")]
    pub income_hr: i64,
    #[serde(rename = "ExpenseHRBonus")]
    pub expense_hr_bonus: i64,
    #[serde(rename = "ExpenseHRFromTransactions")]
    pub expense_hr_from_transactions: i64,
    #[serde(rename = "ExpenseVehicle")]
    pub expense_vehicle: i64,
    #[serde(rename = "ExpenseMaterial")]
    pub expense_material: i64,
    #[serde(rename = "ProfitHR")]
    pub profit_hr: i64,
    #[serde(rename = "ProfitVehicle")]
    pub profit_vehicle: i64,
    #[serde(rename = "ProfitMaterial")]
    pub profit_material: i64,
    #[serde(rename = "TotalIncome")]
    pub total_income: i64,
    #[serde(rename = "TotalExpense")]
    pub total_expense: i64,
    #[serde(rename = "TotalHRExpense")]
    pub total_hr_expense: i64,
    #[serde(rename = "TotalProfit")]
    pub total_profit: i64,
    #[serde(rename = "lastCalculationUpdate", skip_serializing_if = "Option::is_none")]
    pub last_calculation_update: Option<String>,

    #[serde(rename = "syncedToSheet")]
    pub synced_to_sheet: bool,
    #[serde(rename = "lastSyncedAt", skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
}

impl Project {
    pub fn is_finished(&self) -> bool {
        self.status == PROJECT_STATUS_FINISHED
    }
}

/// Static project inputs an edit may touch. Derived fields are not
/// patchable; they are recomputed wholesale.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProjectPatch {
    #[serde(rename = "Customer")]
    pub customer: Option<String>,
    #[serde(rename = "Site")]
    pub site: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "WosHour")]
    pub wos_hour: Option<f64>,
    #[serde(rename = "PlannedHour")]
    pub planned_hour: Option<f64>,
    #[serde(rename = "additionalHour")]
    pub additional_hour: Option<f64>,
    #[serde(rename = "additionalValue")]
    pub additional_value: Option<f64>,
    #[serde(rename = "ExpenseHR")]
    pub expense_hr: Option<f64>,
    #[serde(rename = "IncomeVehicle")]
    pub income_vehicle: Option<f64>,
    #[serde(rename = "IncomeMaterial")]
    pub income_material: Option<f64>,
    #[serde(rename = "ExpenseHSE")]
    pub expense_hse: Option<f64>,
}

impl ProjectPatch {
    /// Applies the patch; returns true when a calculation-relevant input
    /// changed and the derived block must be recomputed.
    pub fn apply(&self, project: &mut Project) -> bool {
        let mut recalc = false;
        if let Some(ref v) = self.customer {
            project.customer = v.clone();
        }
        if let Some(ref v) = self.site {
            project.site = v.clone();
        }
        if let Some(ref v) = self.status {
            project.status = v.clone();
        }
        let mut num = |field: &mut f64, patch: Option<f64>, affects_calc: bool| {
            if let Some(v) = patch {
                if (*field - v).abs() > f64::EPSILON {
                    *field = v;
                    if affects_calc {
                        recalc = true;
                    }
                }
            }
        };
        num(&mut project.wos_hour, self.wos_hour, true);
        num(&mut project.planned_hour, self.planned_hour, true);
        num(&mut project.additional_hour, self.additional_hour, true);
        num(&mut project.additional_value, self.additional_value, true);
        num(&mut project.expense_hr, self.expense_hr, true);
        num(&mut project.income_vehicle, self.income_vehicle, true);
        num(&mut project.income_material, self.income_material, true);
        num(&mut project.expense_hse, self.expense_hse, true);
        recalc
    }
}

// --- Financial transactions ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FinancialTransaction {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "amount")]
    pub amount: f64,
    #[serde(rename = "purpose")]
    pub purpose: Option<Purpose>,
    #[serde(rename = "type")]
    pub tx_type: Option<TxType>,
    #[serde(rename = "projectID")]
    pub project_id: Option<i64>,
    #[serde(rename = "projectLocation")]
    pub project_location: String,
    #[serde(rename = "employeeID")]
    pub employee_id: Option<i64>,
    #[serde(rename = "employeeFirstName")]
    pub employee_first_name: String,
    #[serde(rename = "receipt")]
    pub receipt: bool,
    #[serde(rename = "vat")]
    pub vat: bool,
    #[serde(rename = "comment")]
    pub comment: String,
    #[serde(rename = "syncedToSheet")]
    pub synced_to_sheet: bool,
    #[serde(rename = "lastSyncedAt", skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// --- Warehouse ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WarehouseItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "unit")]
    pub unit: String,
    #[serde(rename = "quantity")]
    pub quantity: f64,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WarehouseTransaction {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub direction: StockDirection,
    #[serde(rename = "WarehouseID")]
    pub item_id: String,
    #[serde(rename = "WarehouseName")]
    pub item_name: String,
    #[serde(rename = "quantity")]
    pub quantity: f64,
    /// Item quantity remaining after this transaction was applied.
    #[serde(rename = "leftover")]
    pub leftover: f64,
    #[serde(rename = "requestedEmpID")]
    pub employee_id: String,
    #[serde(rename = "requestedEmpName")]
    pub employee_name: String,
    #[serde(rename = "projectID")]
    pub project_id: Option<i64>,
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "purpose")]
    pub purpose: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "syncedToSheet")]
    pub synced_to_sheet: bool,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WarehouseRequest {
    #[serde(rename = "WarehouseID")]
    pub item_id: String,
    #[serde(rename = "WarehouseName")]
    pub item_name: String,
    #[serde(rename = "quantity")]
    pub quantity: f64,
    #[serde(rename = "requestedEmpID")]
    pub employee_id: String,
    #[serde(rename = "requestedEmpName")]
    pub employee_name: String,
    #[serde(rename = "projectID")]
    pub project_id: Option<i64>,
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "purpose")]
    pub purpose: String,
    #[serde(rename = "status")]
    pub status: ApprovalStatus,
    #[serde(rename = "requestedAt", skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<String>,
    #[serde(rename = "approvedAt", skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(rename = "rejectedAt", skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<String>,
    #[serde(rename = "rejectionReason", skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Outbound transaction created by approval.
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

// --- Employees ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Employee {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "NumID")]
    pub num_id: Option<i64>,
    #[serde(rename = "FirstName")]
    pub first_name: String,
    #[serde(rename = "LastName")]
    pub last_name: String,
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "State")]
    pub state: String,
}
