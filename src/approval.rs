// src/approval.rs
//
// Lifecycle of a submitted attendance request: pending -> approved or
// rejected. Approval copies the request into the canonical attendance
// collection (fresh identity if absent, sync flag cleared) and triggers
// re-aggregation for the referenced project. Approved is terminal but
// mutable: later edits re-derive time fields and re-aggregate, they never
// change the review state.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregation::{recompute_project, AggregationError};
use crate::calculations::apply_attendance_derivations;
use crate::models::{
    generate_record_id, now_iso, ApprovalStatus, AttendancePatch, AttendanceRecord,
    AttendanceRequest,
};
use crate::store::{Store, StoreError};
use crate::validation::{check_attendance_request, AttendanceConflict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("attendance request not found: {0}")]
    RequestNotFound(String),
    #[error("attendance record not found: {0}")]
    RecordNotFound(String),
    #[error("request already {0:?}")]
    AlreadyReviewed(ApprovalStatus),
    #[error(transparent)]
    Conflict(#[from] AttendanceConflict),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

fn same_day_context(
    store: &Store,
    candidate: &AttendanceRecord,
) -> (Vec<AttendanceRequest>, Vec<AttendanceRecord>) {
    let key = candidate.employee_day();
    if key.is_none() {
        return (Vec::new(), Vec::new());
    }
    let pending = store
        .filter::<AttendanceRequest>(|r| {
            r.state == ApprovalStatus::Pending && r.record.employee_day() == key
        })
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    let canonical = store
        .filter::<AttendanceRecord>(|r| {
            r.approval_status != ApprovalStatus::Rejected && r.employee_day() == key
        })
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    (pending, canonical)
}

/// Validates and stores a new pending request. Derived time fields are
/// recomputed server-side regardless of what the client sent.
pub fn add_attendance_request(
    store: &Store,
    mut record: AttendanceRecord,
) -> Result<String, ApprovalError> {
    if record.id.is_empty() {
        record.id = generate_record_id();
    }
    apply_attendance_derivations(&mut record);
    let (pending, canonical) = same_day_context(store, &record);
    check_attendance_request(&record, &pending, &canonical)?;

    record.approval_status = ApprovalStatus::Pending;
    record.synced_to_sheet = false;
    record.created_at = Some(now_iso());
    let request = AttendanceRequest {
        record,
        state: ApprovalStatus::Pending,
        rejected_at: None,
    };
    let doc_id = store.insert(request);
    info!(request = %doc_id, "stored attendance request");
    Ok(doc_id)
}

/// Patches a pending request and re-runs the conflict checks.
pub fn update_attendance_request(
    store: &Store,
    request_id: &str,
    patch: &AttendancePatch,
) -> Result<(), ApprovalError> {
    let request = store
        .get::<AttendanceRequest>(request_id)
        .ok_or_else(|| ApprovalError::RequestNotFound(request_id.to_string()))?;
    if request.state != ApprovalStatus::Pending {
        return Err(ApprovalError::AlreadyReviewed(request.state));
    }

    let mut record = request.record.clone();
    patch.apply(&mut record);
    apply_attendance_derivations(&mut record);
    let (pending, canonical) = same_day_context(store, &record);
    check_attendance_request(&record, &pending, &canonical)?;

    store.update::<AttendanceRequest, _>(request_id, |r| r.record = record)?;
    Ok(())
}

pub fn delete_attendance_request(store: &Store, request_id: &str) -> Result<(), ApprovalError> {
    let request = store
        .get::<AttendanceRequest>(request_id)
        .ok_or_else(|| ApprovalError::RequestNotFound(request_id.to_string()))?;
    if request.state != ApprovalStatus::Pending {
        return Err(ApprovalError::AlreadyReviewed(request.state));
    }
    store.delete::<AttendanceRequest>(request_id)?;
    Ok(())
}

#[derive(Debug)]
pub struct ReviewOutcome {
    /// Canonical record key, set on approval.
    pub record_doc_id: Option<String>,
    pub state: ApprovalStatus,
}

/// pending -> approved | rejected. Approval copies into the canonical
/// collection with the sync flag cleared and re-aggregates the project;
/// rejection stamps metadata and touches nothing else.
pub fn review_attendance_request(
    store: &Store,
    request_id: &str,
    action: ReviewAction,
) -> Result<ReviewOutcome, ApprovalError> {
    let request = store
        .get::<AttendanceRequest>(request_id)
        .ok_or_else(|| ApprovalError::RequestNotFound(request_id.to_string()))?;
    if request.state != ApprovalStatus::Pending {
        return Err(ApprovalError::AlreadyReviewed(request.state));
    }

    match action {
        ReviewAction::Reject => {
            store.update::<AttendanceRequest, _>(request_id, |r| {
                r.state = ApprovalStatus::Rejected;
                r.rejected_at = Some(now_iso());
            })?;
            info!(request = %request_id, "rejected attendance request");
            Ok(ReviewOutcome {
                record_doc_id: None,
                state: ApprovalStatus::Rejected,
            })
        }
        ReviewAction::Approve => {
            let mut record = request.record.clone();
            if record.id.is_empty() {
                record.id = generate_record_id();
            }
            record.approval_status = ApprovalStatus::Approved;
            record.approved_at = Some(now_iso());
            record.synced_to_sheet = false;
            record.last_synced_at = None;
            let project_id = record.project_id;

            let record_doc_id = store.insert(record);
            store.update::<AttendanceRequest, _>(request_id, |r| {
                r.state = ApprovalStatus::Approved;
                r.record.approved_at = Some(now_iso());
            })?;
            info!(request = %request_id, record = %record_doc_id, "approved attendance request");

            if let Some(project_id) = project_id {
                match recompute_project(store, project_id) {
                    Ok(()) => {}
                    Err(AggregationError::ProjectNotFound(_)) => {
                        warn!(project_id, "approved attendance references unknown project");
                    }
                    Err(other) => return Err(other.into()),
                }
            }
            Ok(ReviewOutcome {
                record_doc_id: Some(record_doc_id),
                state: ApprovalStatus::Approved,
            })
        }
    }
}

/// Direct submission into the canonical collection, pending review, with
/// all derived fields applied. Returns the new document key.
pub fn submit_attendance(store: &Store, mut record: AttendanceRecord) -> String {
    if record.id.is_empty() {
        record.id = generate_record_id();
    }
    apply_attendance_derivations(&mut record);
    record.approval_status = ApprovalStatus::Pending;
    record.synced_to_sheet = false;
    record.created_at = Some(now_iso());
    store.insert(record)
}

/// Edits an already-stored canonical record. Derived time fields are
/// recomputed; when an hour- or reference-affecting field changed, both
/// the old and the new project are re-aggregated.
pub fn update_attendance_record(
    store: &Store,
    doc_id: &str,
    patch: &AttendancePatch,
) -> Result<(), ApprovalError> {
    let mut record = store
        .get::<AttendanceRecord>(doc_id)
        .ok_or_else(|| ApprovalError::RecordNotFound(doc_id.to_string()))?;
    let old_project = record.project_id;

    let touched = patch.apply(&mut record);
    apply_attendance_derivations(&mut record);
    if touched {
        // The sheet copy is stale now.
        record.synced_to_sheet = false;
    }
    let new_project = record.project_id;
    store.replace(doc_id, record)?;

    if touched {
        for project_id in [old_project, new_project]
            .into_iter()
            .flatten()
            .collect::<std::collections::BTreeSet<_>>()
        {
            match recompute_project(store, project_id) {
                Ok(()) => {}
                Err(AggregationError::ProjectNotFound(_)) => {
                    warn!(project_id, "edited attendance references unknown project");
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
    Ok(())
}

/// Deletes a canonical record and re-aggregates its project.
pub fn delete_attendance_record(store: &Store, doc_id: &str) -> Result<(), ApprovalError> {
    let record = store
        .get::<AttendanceRecord>(doc_id)
        .ok_or_else(|| ApprovalError::RecordNotFound(doc_id.to_string()))?;
    store.delete::<AttendanceRecord>(doc_id)?;
    if let Some(project_id) = record.project_id {
        if let Err(err) = recompute_project(store, project_id) {
            warn!(project_id, %err, "recompute after delete failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttendanceStatus, Project};
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn payload(employee: &str, day: &str, project: i64, start: &str, end: &str) -> AttendanceRecord {
        AttendanceRecord {
            employee_id: employee.to_string(),
            employee_last_name: "Erdene".to_string(),
            role: "Engineer".to_string(),
            day: Some(d(day)),
            project_id: Some(project),
            start_time: start.to_string(),
            end_time: end.to_string(),
            status: AttendanceStatus::Present,
            ..Default::default()
        }
    }

    fn store_with_project(id: i64) -> Store {
        let store = Store::new();
        store.insert(Project {
            id,
            wos_hour: 10.0,
            planned_hour: 30.0,
            ..Default::default()
        });
        store
    }

    #[test]
    fn add_derives_time_fields_and_stores_pending() {
        let store = store_with_project(1);
        let doc_id =
            add_attendance_request(&store, payload("emp-1", "2025-06-02", 1, "08:00", "18:30"))
                .unwrap();
        let request = store.get::<AttendanceRequest>(&doc_id).unwrap();
        assert_eq!(request.state, ApprovalStatus::Pending);
        assert_eq!(request.record.weekday, "Monday");
        assert_eq!(request.record.week, 23);
        assert_eq!(request.record.working_hour, 10.5);
        assert_eq!(request.record.overtime_hour, 2.5);
        assert!(!request.record.id.is_empty());
    }

    #[test]
    fn approval_copies_to_canonical_and_recomputes() {
        let store = store_with_project(1);
        let doc_id =
            add_attendance_request(&store, payload("emp-1", "2025-06-02", 1, "08:00", "16:00"))
                .unwrap();
        let outcome =
            review_attendance_request(&store, &doc_id, ReviewAction::Approve).unwrap();
        let record_id = outcome.record_doc_id.unwrap();

        let record = store.get::<AttendanceRecord>(&record_id).unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Approved);
        assert!(!record.synced_to_sheet);
        assert!(record.approved_at.is_some());

        let (_, project) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        assert_eq!(project.real_hour, 8.0);
        assert_eq!(project.engineer_work_hour, 8.0);

        // Terminal: a second review attempt is refused.
        assert!(matches!(
            review_attendance_request(&store, &doc_id, ReviewAction::Approve),
            Err(ApprovalError::AlreadyReviewed(ApprovalStatus::Approved))
        ));
    }

    #[test]
    fn rejection_has_no_project_side_effects() {
        let store = store_with_project(1);
        let doc_id =
            add_attendance_request(&store, payload("emp-1", "2025-06-02", 1, "08:00", "16:00"))
                .unwrap();
        review_attendance_request(&store, &doc_id, ReviewAction::Reject).unwrap();

        let request = store.get::<AttendanceRequest>(&doc_id).unwrap();
        assert_eq!(request.state, ApprovalStatus::Rejected);
        assert!(request.rejected_at.is_some());
        assert_eq!(store.count::<AttendanceRecord>(), 0);
        let (_, project) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        assert_eq!(project.real_hour, 0.0);
    }

    #[test]
    fn conflicting_request_is_refused_before_any_write() {
        let store = store_with_project(1);
        add_attendance_request(&store, payload("emp-1", "2025-06-02", 1, "08:00", "16:00"))
            .unwrap();
        let err = add_attendance_request(
            &store,
            payload("emp-1", "2025-06-02", 2, "15:00", "19:00"),
        )
        .unwrap_err();
        assert!(matches!(err, ApprovalError::Conflict(_)));
        assert_eq!(store.count::<AttendanceRequest>(), 1);
    }

    #[test]
    fn editing_approved_record_moves_hours_between_projects() {
        let store = store_with_project(1);
        store.insert(Project {
            id: 2,
            wos_hour: 4.0,
            planned_hour: 12.0,
            ..Default::default()
        });
        let doc_id =
            add_attendance_request(&store, payload("emp-1", "2025-06-02", 1, "08:00", "16:00"))
                .unwrap();
        let record_id = review_attendance_request(&store, &doc_id, ReviewAction::Approve)
            .unwrap()
            .record_doc_id
            .unwrap();

        let patch = AttendancePatch {
            project_id: Some(2),
            project_name: Some("Depot".to_string()),
            ..Default::default()
        };
        update_attendance_record(&store, &record_id, &patch).unwrap();

        let (_, old_project) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        let (_, new_project) = store.find_one::<Project>(|p| p.id == 2).unwrap();
        assert_eq!(old_project.real_hour, 0.0);
        assert_eq!(new_project.real_hour, 8.0);

        let record = store.get::<AttendanceRecord>(&record_id).unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Approved);
        assert!(!record.synced_to_sheet);
    }
}
