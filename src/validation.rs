// src/validation.rs
//
// Business rule validator. Runs at submission time, before any mutation;
// every rejection is a structured value carrying the reason, not a bare
// boolean. The per-diem "second payment of the day" case is a soft block
// the caller may override with an explicit confirmation flag.

use chrono::NaiveTime;
use thiserror::Error;

use crate::calculations::parse_time;
use crate::models::{
    AttendanceRecord, AttendanceRequest, AttendanceStatus, FinancialTransaction, TxType,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceConflict {
    #[error("employee {employee_id} already has a leave entry on {day}; leave excludes everything else that day")]
    LeaveExcludesDay { employee_id: String, day: String },
    #[error("employee {employee_id} already has an entry for project {project_id} on {day}")]
    DuplicateEntry {
        employee_id: String,
        project_id: i64,
        day: String,
    },
    #[error("interval {start}-{end} overlaps an existing entry {other_start}-{other_end} on {day}")]
    OverlappingInterval {
        day: String,
        start: String,
        end: String,
        other_start: String,
        other_end: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionRejection {
    #[error("purpose is required")]
    MissingPurpose,
    #[error("date is required")]
    MissingDate,
    #[error("amount is required")]
    MissingAmount,
    #[error("project is required for project-purpose transactions")]
    MissingProject,
    #[error("type is required for project-purpose transactions")]
    MissingType,
    #[error("employee already received {existing:?} that day; per-diem and trip allowance are mutually exclusive per day")]
    ExclusiveDailyAllowance { existing: TxType },
    #[error("employee already received a trip allowance for this project that day")]
    TripAllowanceAlreadyPaid,
    #[error("employee already received two per-diem payments for this project that day")]
    PerDiemLimitReached,
    #[error("employee already received one per-diem payment for this project that day; resubmit with confirmation to pay a second")]
    PerDiemNeedsConfirmation,
}

impl TransactionRejection {
    /// Soft blocks can be overridden by resubmitting with the confirmation
    /// flag; everything else is final.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, TransactionRejection::PerDiemNeedsConfirmation)
    }
}

/// Minutes since midnight for both interval endpoints, with an end before
/// the start read as wrapping past midnight.
fn interval_minutes(start: NaiveTime, end: NaiveTime) -> (i64, i64) {
    let s = start.signed_duration_since(NaiveTime::MIN).num_minutes();
    let mut e = end.signed_duration_since(NaiveTime::MIN).num_minutes();
    if e < s {
        e += 24 * 60;
    }
    (s, e)
}

/// Half-open overlap test over wrapped [start, end) intervals. Symmetric:
/// each interval is also compared against the other shifted by a day, so
/// 22:00-02:00 meets 23:00-01:00 as well as 01:00-01:30 the next morning.
pub fn intervals_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    let (a0, a1) = interval_minutes(a_start, a_end);
    let (b0, b1) = interval_minutes(b_start, b_end);
    const DAY: i64 = 24 * 60;
    for shift in [-DAY, 0, DAY] {
        if a0 < b1 + shift && b0 + shift < a1 {
            return true;
        }
    }
    false
}

fn interval_of(start: &str, end: &str) -> Option<(NaiveTime, NaiveTime)> {
    match (parse_time(start), parse_time(end)) {
        (Some(s), Some(e)) if s != e => Some((s, e)),
        _ => None,
    }
}

/// Checks a submitted attendance request against that employee's existing
/// entries for the same day: pending requests plus already-approved
/// canonical records, across all projects. Callers pre-filter both lists
/// to the employee/day in question.
pub fn check_attendance_request(
    candidate: &AttendanceRecord,
    pending_same_day: &[AttendanceRequest],
    approved_same_day: &[AttendanceRecord],
) -> Result<(), AttendanceConflict> {
    let day = candidate
        .day
        .map(|d| d.to_string())
        .unwrap_or_default();

    let existing: Vec<&AttendanceRecord> = pending_same_day
        .iter()
        .map(|r| &r.record)
        .chain(approved_same_day.iter())
        .filter(|r| r.id != candidate.id)
        .collect();

    // Leave is exclusive of everything else that day, in both directions.
    if existing.iter().any(|r| r.status == AttendanceStatus::OnLeave)
        || (candidate.status == AttendanceStatus::OnLeave && !existing.is_empty())
    {
        return Err(AttendanceConflict::LeaveExcludesDay {
            employee_id: candidate.employee_id.clone(),
            day,
        });
    }

    if let Some(project_id) = candidate.project_id {
        if existing.iter().any(|r| r.project_id == Some(project_id)) {
            return Err(AttendanceConflict::DuplicateEntry {
                employee_id: candidate.employee_id.clone(),
                project_id,
                day,
            });
        }
    }

    if let Some((start, end)) = interval_of(&candidate.start_time, &candidate.end_time) {
        for other in &existing {
            if let Some((other_start, other_end)) = interval_of(&other.start_time, &other.end_time)
            {
                if intervals_overlap(start, end, other_start, other_end) {
                    return Err(AttendanceConflict::OverlappingInterval {
                        day,
                        start: candidate.start_time.clone(),
                        end: candidate.end_time.clone(),
                        other_start: other.start_time.clone(),
                        other_end: other.end_time.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Checks a financial transaction draft. `existing_same_day` holds the
/// employee's transactions for the same calendar day, across all projects.
pub fn check_financial_transaction(
    draft: &FinancialTransaction,
    existing_same_day: &[FinancialTransaction],
    confirm_duplicate: bool,
) -> Result<(), TransactionRejection> {
    if draft.date.is_none() {
        return Err(TransactionRejection::MissingDate);
    }
    if draft.amount == 0.0 {
        return Err(TransactionRejection::MissingAmount);
    }
    let purpose = draft.purpose.ok_or(TransactionRejection::MissingPurpose)?;
    if purpose.requires_project() {
        if draft.project_id.is_none() {
            return Err(TransactionRejection::MissingProject);
        }
        if draft.tx_type.is_none() {
            return Err(TransactionRejection::MissingType);
        }
    }

    let (tx_type, employee_id) = match (draft.tx_type, draft.employee_id) {
        (Some(t), Some(e)) => (t, e),
        _ => return Ok(()),
    };
    if !matches!(tx_type, TxType::PerDiem | TxType::TripAllowance) {
        return Ok(());
    }

    let same_employee: Vec<&FinancialTransaction> = existing_same_day
        .iter()
        .filter(|t| t.employee_id == Some(employee_id) && t.id != draft.id)
        .collect();

    // One of {per-diem, trip allowance} per employee per day, any project.
    let opposite = match tx_type {
        TxType::PerDiem => TxType::TripAllowance,
        _ => TxType::PerDiem,
    };
    if same_employee.iter().any(|t| t.tx_type == Some(opposite)) {
        return Err(TransactionRejection::ExclusiveDailyAllowance { existing: opposite });
    }

    let same_project_same_type = same_employee
        .iter()
        .filter(|t| t.tx_type == Some(tx_type) && t.project_id == draft.project_id)
        .count();

    match tx_type {
        TxType::TripAllowance if same_project_same_type >= 1 => {
            Err(TransactionRejection::TripAllowanceAlreadyPaid)
        }
        TxType::PerDiem if same_project_same_type >= 2 => {
            // Hard cap; no confirmation override past the second payment.
            Err(TransactionRejection::PerDiemLimitReached)
        }
        TxType::PerDiem if same_project_same_type == 1 && !confirm_duplicate => {
            Err(TransactionRejection::PerDiemNeedsConfirmation)
        }
        _ => Ok(()),
    }
}
