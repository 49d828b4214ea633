// src/aggregation.rs
//
// Rolls attendance and financial transactions for a project into hour and
// expense totals, feeds the calculation engine, and produces a delta of
// derived fields. The delta is merged into the stored project; it is never
// a full replacement, so manually entered fields survive.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calculations::{derive_project_figures, sanitize, FinanceInputs};
use crate::models::{
    now_iso, AttendanceRecord, ExpenseBucket, FinancialTransaction, Project,
};
use crate::store::{BulkWriter, Store, StoreError};

/// Role label marking engineering staff on an attendance record. The label
/// is denormalized at submission time; aggregation never joins employees.
pub const ROLE_ENGINEER: &str = "Engineer";

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("project {0} not found")]
    ProjectNotFound(i64),
    #[error("project id {0} already exists")]
    DuplicateProjectId(i64),
    #[error("project id is required")]
    MissingProjectId,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hour totals summed from attendance records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HourTotals {
    pub real_hour: f64,
    pub working_hours: f64,
    pub overtime_hours: f64,
    pub engineer_work_hour: f64,
    pub non_engineer_work_hour: f64,
}

/// Expense totals summed from financial transactions, bucketed by type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpenseTotals {
    pub hr: f64,
    pub vehicle: f64,
    pub material: f64,
}

pub fn sum_hours<'a>(records: impl Iterator<Item = &'a AttendanceRecord>) -> HourTotals {
    let mut totals = HourTotals::default();
    for record in records {
        let working = sanitize(record.working_hour);
        let overtime = sanitize(record.overtime_hour);
        let total = working + overtime;
        totals.working_hours += working;
        totals.overtime_hours += overtime;
        totals.real_hour += total;
        if record.role == ROLE_ENGINEER {
            totals.engineer_work_hour += total;
        } else {
            totals.non_engineer_work_hour += total;
        }
    }
    totals
}

pub fn sum_expenses<'a>(
    transactions: impl Iterator<Item = &'a FinancialTransaction>,
) -> ExpenseTotals {
    let mut totals = ExpenseTotals::default();
    for tx in transactions {
        let Some(tx_type) = tx.tx_type else { continue };
        let amount = sanitize(tx.amount);
        match tx_type.bucket() {
            ExpenseBucket::Hr => totals.hr += amount,
            ExpenseBucket::Vehicle => totals.vehicle += amount,
            ExpenseBucket::Material => totals.material += amount,
        }
    }
    totals
}

/// Only the fields the aggregation computed. Applied with `apply_to`;
/// everything else on the project is left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProjectMetricsDelta {
    pub hours: HourTotals,
    pub expense_hr_from_transactions: i64,
    pub expense_vehicle: i64,
    pub expense_material: i64,
    pub figures: crate::calculations::ProjectFigures,
    pub last_calculation_update: String,
}

impl ProjectMetricsDelta {
    pub fn apply_to(&self, project: &mut Project) {
        project.real_hour = self.hours.real_hour;
        project.working_hours = self.hours.working_hours;
        project.overtime_hours = self.hours.overtime_hours;
        project.engineer_work_hour = self.hours.engineer_work_hour;
        project.non_engineer_work_hour = self.hours.non_engineer_work_hour;
        project.expense_hr_from_transactions = self.expense_hr_from_transactions;
        project.expense_vehicle = self.expense_vehicle;
        project.expense_material = self.expense_material;

        let f = &self.figures;
        project.base_amount = f.base_amount;
        project.team_bounty = f.team_bounty;
        project.non_engineer_bounty = f.non_engineer_bounty;
        project.hour_performance = f.hour_performance;
        project.engineer_hand = f.engineer_hand;
        project.income_hr = f.income_hr;
        project.expense_hr_bonus = f.expense_hr_bonus;
        project.profit_hr = f.profit_hr;
        project.profit_vehicle = f.profit_vehicle;
        project.profit_material = f.profit_material;
        project.total_income = f.total_income;
        project.total_expense = f.total_expense;
        project.total_hr_expense = f.total_hr_expense;
        project.total_profit = f.total_profit;
        project.last_calculation_update = Some(self.last_calculation_update.clone());
    }
}

/// Computes the full derived block for one project from the store's
/// attendance and transaction collections.
pub fn compute_project_metrics(store: &Store, project: &Project) -> ProjectMetricsDelta {
    let records = store.filter::<AttendanceRecord>(|r| r.project_id == Some(project.id));
    let transactions = store.filter::<FinancialTransaction>(|t| t.project_id == Some(project.id));
    debug!(
        project_id = project.id,
        attendance = records.len(),
        transactions = transactions.len(),
        "aggregating project inputs"
    );

    let hours = sum_hours(records.iter().map(|(_, r)| r));
    let expenses = sum_expenses(transactions.iter().map(|(_, t)| t));
    compute_from_totals(project, hours, expenses)
}

/// Derivation from pre-summed totals; used by the full compute above and
/// by edits that only touched static project fields.
pub fn compute_from_totals(
    project: &Project,
    hours: HourTotals,
    expenses: ExpenseTotals,
) -> ProjectMetricsDelta {
    let inputs = FinanceInputs {
        wos_hour: project.wos_hour,
        planned_hour: project.planned_hour,
        real_hour: hours.real_hour,
        non_engineer_hours: hours.non_engineer_work_hour,
        additional_hour: project.additional_hour,
        additional_value: project.additional_value,
        manual_expense_hr: project.expense_hr,
        expense_hr_from_transactions: expenses.hr,
        expense_vehicle: expenses.vehicle,
        expense_material: expenses.material,
        income_vehicle: project.income_vehicle,
        income_material: project.income_material,
        expense_hse: project.expense_hse,
    };
    let figures = derive_project_figures(&inputs);
    ProjectMetricsDelta {
        hours,
        expense_hr_from_transactions: crate::calculations::round_whole(
            rust_decimal::Decimal::from_f64_retain(sanitize(expenses.hr)).unwrap_or_default(),
        ),
        expense_vehicle: crate::calculations::round_whole(
            rust_decimal::Decimal::from_f64_retain(sanitize(expenses.vehicle)).unwrap_or_default(),
        ),
        expense_material: crate::calculations::round_whole(
            rust_decimal::Decimal::from_f64_retain(sanitize(expenses.material)).unwrap_or_default(),
        ),
        figures,
        last_calculation_update: now_iso(),
    }
}

/// Recomputes and persists one project, located by its numeric id.
pub fn recompute_project(store: &Store, project_id: i64) -> Result<(), AggregationError> {
    let (doc_id, project) = store
        .find_one::<Project>(|p| p.id == project_id)
        .ok_or(AggregationError::ProjectNotFound(project_id))?;
    let delta = compute_project_metrics(store, &project);
    store.update::<Project, _>(&doc_id, |p| delta.apply_to(p))?;
    info!(
        project_id,
        real_hour = delta.hours.real_hour,
        engineer = delta.hours.engineer_work_hour,
        non_engineer = delta.hours.non_engineer_work_hour,
        "recomputed project metrics"
    );
    Ok(())
}

/// Creates a project and computes its derived block from whatever
/// attendance and transactions already reference its id.
pub fn create_project(store: &Store, project: Project) -> Result<String, AggregationError> {
    if project.id == 0 {
        return Err(AggregationError::MissingProjectId);
    }
    if store.find_one::<Project>(|p| p.id == project.id).is_some() {
        return Err(AggregationError::DuplicateProjectId(project.id));
    }
    let project_id = project.id;
    let doc_id = store.insert(project);
    recompute_project(store, project_id)?;
    Ok(doc_id)
}

/// Applies a typed patch to a project's static inputs. The derived block
/// is recomputed only when a calculation-relevant input actually changed.
pub fn update_project(
    store: &Store,
    project_id: i64,
    patch: &crate::models::ProjectPatch,
) -> Result<(), AggregationError> {
    let (doc_id, _) = store
        .find_one::<Project>(|p| p.id == project_id)
        .ok_or(AggregationError::ProjectNotFound(project_id))?;
    let needs_recalc = store.update::<Project, _>(&doc_id, |p| {
        let changed = patch.apply(p);
        p.synced_to_sheet = false;
        changed
    })?;
    if needs_recalc {
        recompute_project(store, project_id)?;
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct BulkRecomputeReport {
    pub updated: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<String>,
}

/// Full-collection recompute. Finished projects are skipped; writes are
/// chunk-committed against the store's batch ceiling; per-project failures
/// go to the report instead of aborting the run.
pub fn recalculate_all_projects(store: &Store) -> Result<BulkRecomputeReport, StoreError> {
    let mut report = BulkRecomputeReport::default();
    let mut bulk = BulkWriter::new(store);

    for (doc_id, project) in store.all::<Project>() {
        if project.is_finished() {
            report.skipped.push(project.id);
            continue;
        }
        let delta = compute_project_metrics(store, &project);
        let project_id = project.id;
        bulk.mutate::<Project>(doc_id, move |p| delta.apply_to(p));
        report.updated.push(project_id);
    }

    let written = bulk.commit()?;
    info!(
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        written,
        "full project recompute finished"
    );
    Ok(report)
}

/// Post-push hour refresh: recomputes only the hour aggregates for every
/// project, zeroing projects that no longer have attendance records.
pub fn refresh_real_hours(store: &Store) -> Result<usize, StoreError> {
    let mut per_project: HashMap<i64, HourTotals> = HashMap::new();
    for (_, record) in store.all::<AttendanceRecord>() {
        let Some(project_id) = record.project_id else {
            continue;
        };
        let totals = per_project.entry(project_id).or_default();
        let working = sanitize(record.working_hour);
        let overtime = sanitize(record.overtime_hour);
        totals.working_hours += working;
        totals.overtime_hours += overtime;
        totals.real_hour += working + overtime;
    }

    let stamp = now_iso();
    let mut bulk = BulkWriter::new(store);
    let mut touched = 0;
    for (doc_id, project) in store.all::<Project>() {
        let totals = per_project.get(&project.id).copied().unwrap_or_default();
        let stamp = stamp.clone();
        bulk.mutate::<Project>(doc_id, move |p| {
            p.real_hour = totals.real_hour;
            p.working_hours = totals.working_hours;
            p.overtime_hours = totals.overtime_hours;
            p.last_calculation_update = Some(stamp);
        });
        touched += 1;
    }
    if per_project
        .keys()
        .any(|id| store.find_one::<Project>(|p| p.id == *id).is_none())
    {
        warn!("attendance records reference projects missing from the store");
    }
    bulk.commit()?;
    Ok(touched)
}

/// Read-only hour summary for one project, for the public summary surface.
#[derive(Debug, Serialize)]
pub struct ProjectHourSummary {
    pub project_id: i64,
    pub record_count: usize,
    pub real_hour: f64,
    pub working_hours: f64,
    pub overtime_hours: f64,
    pub engineer_work_hour: f64,
    pub non_engineer_work_hour: f64,
}

pub fn project_hour_summary(store: &Store, project_id: i64) -> ProjectHourSummary {
    let records = store.filter::<AttendanceRecord>(|r| r.project_id == Some(project_id));
    let totals = sum_hours(records.iter().map(|(_, r)| r));
    ProjectHourSummary {
        project_id,
        record_count: records.len(),
        real_hour: totals.real_hour,
        working_hours: totals.working_hours,
        overtime_hours: totals.overtime_hours,
        engineer_work_hour: totals.engineer_work_hour,
        non_engineer_work_hour: totals.non_engineer_work_hour,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Purpose, TxType};

    fn record(project: i64, role: &str, working: f64, overtime: f64) -> AttendanceRecord {
        AttendanceRecord {
            id: crate::models::generate_record_id(),
            project_id: Some(project),
            role: role.to_string(),
            working_hour: working,
            overtime_hour: overtime,
            ..Default::default()
        }
    }

    fn transaction(project: i64, tx_type: TxType, amount: f64) -> FinancialTransaction {
        FinancialTransaction {
            id: crate::models::generate_record_id(),
            amount,
            purpose: Some(Purpose::ProjectWork),
            tx_type: Some(tx_type),
            project_id: Some(project),
            ..Default::default()
        }
    }

    fn seeded_store() -> Store {
        let store = Store::new();
        store.insert(Project {
            id: 1,
            wos_hour: 10.0,
            planned_hour: 30.0,
            ..Default::default()
        });
        store.insert(record(1, ROLE_ENGINEER, 8.0, 2.0));
        store.insert(record(1, "Other", 5.0, 0.0));
        store.insert(record(2, ROLE_ENGINEER, 4.0, 0.0));
        store.insert(transaction(1, TxType::PerDiem, 15_000.0));
        store.insert(transaction(1, TxType::ContractorFee, 40_000.0));
        store.insert(transaction(1, TxType::Fuel, 22_000.0));
        store.insert(transaction(1, TxType::Materials, 9_000.0));
        store.insert(transaction(2, TxType::Fuel, 500.0));
        store
    }

    #[test]
    fn full_recompute_scenario() {
        let store = seeded_store();
        recompute_project(&store, 1).unwrap();
        let (_, project) = store.find_one::<Project>(|p| p.id == 1).unwrap();

        assert_eq!(project.real_hour, 15.0);
        assert_eq!(project.engineer_work_hour, 10.0);
        assert_eq!(project.non_engineer_work_hour, 5.0);
        assert_eq!(project.non_engineer_bounty, 25_000);
        assert_eq!(project.hour_performance, 50.0);
        // 125000 * (200 - 50) / 100
        assert_eq!(project.engineer_hand, 187_500);

        // Transaction buckets: HR = per-diem + contractor fee.
        assert_eq!(project.expense_hr_from_transactions, 55_000);
        assert_eq!(project.expense_vehicle, 22_000);
        assert_eq!(project.expense_material, 9_000);
        assert!(project.last_calculation_update.is_some());
    }

    #[test]
    fn delta_merge_preserves_static_fields() {
        let store = seeded_store();
        store
            .update::<Project, _>(
                &store.find_one::<Project>(|p| p.id == 1).unwrap().0,
                |p| {
                    p.customer = "Harbor Works".into();
                    p.income_vehicle = 300_000.0;
                },
            )
            .unwrap();
        recompute_project(&store, 1).unwrap();
        let (_, project) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        assert_eq!(project.customer, "Harbor Works");
        assert_eq!(project.income_vehicle, 300_000.0);
        assert_eq!(project.profit_vehicle, 300_000 - 22_000);
    }

    #[test]
    fn recompute_unknown_project_is_an_error() {
        let store = Store::new();
        assert!(matches!(
            recompute_project(&store, 99),
            Err(AggregationError::ProjectNotFound(99))
        ));
    }

    #[test]
    fn bulk_recompute_skips_finished_projects() {
        let store = seeded_store();
        store.insert(Project {
            id: 9,
            status: crate::models::PROJECT_STATUS_FINISHED.to_string(),
            ..Default::default()
        });
        let report = recalculate_all_projects(&store).unwrap();
        assert!(report.updated.contains(&1));
        assert_eq!(report.skipped, vec![9]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn refresh_zeroes_projects_without_records() {
        let store = seeded_store();
        store.insert(Project {
            id: 5,
            real_hour: 40.0,
            working_hours: 40.0,
            ..Default::default()
        });
        refresh_real_hours(&store).unwrap();
        let (_, project) = store.find_one::<Project>(|p| p.id == 5).unwrap();
        assert_eq!(project.real_hour, 0.0);
        assert_eq!(project.working_hours, 0.0);
        let (_, busy) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        assert_eq!(busy.real_hour, 15.0);
    }
}
