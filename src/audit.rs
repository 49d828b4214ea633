// src/audit.rs
//
// Batch auditor over the canonical attendance collection. Flags records
// whose references no longer resolve, whose required fields are missing,
// or which duplicate another record's identity, and stamps each record's
// data status. Old records can optionally be retired. Reset clears every
// stamp.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::info;

use crate::models::{AttendanceRecord, DataStatus, Employee, Project};
use crate::store::{BulkWriter, Store, StoreError};

/// Records older than this many years are eligible for retirement.
const RETIREMENT_AGE_YEARS: i32 = 2;

#[derive(Debug, Default, Serialize)]
pub struct AuditIssue {
    pub record_id: String,
    pub day: Option<NaiveDate>,
    pub employee: String,
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub retired: usize,
    pub missing_fields: Vec<AuditIssue>,
    pub unknown_employee: Vec<AuditIssue>,
    pub unknown_project: Vec<AuditIssue>,
    pub duplicates: Vec<AuditIssue>,
}

fn issue(record: &AttendanceRecord, detail: impl Into<String>) -> AuditIssue {
    AuditIssue {
        record_id: record.id.clone(),
        day: record.day,
        employee: if record.employee_last_name.is_empty() {
            record.employee_first_name.clone()
        } else {
            record.employee_last_name.clone()
        },
        detail: detail.into(),
    }
}

/// Validates every attendance record and stamps its data status. Writes go
/// through ceiling-sized batches; the report lists every flagged record.
pub fn audit_attendance(
    store: &Store,
    today: NaiveDate,
    mark_retired: bool,
) -> Result<AuditReport, StoreError> {
    let mut report = AuditReport::default();

    // Lookup sets built once; referential checks are by employee name
    // (denormalized on the record) and numeric project id.
    let mut employee_names: HashSet<String> = HashSet::new();
    for (_, employee) in store.all::<Employee>() {
        if !employee.first_name.is_empty() {
            employee_names.insert(employee.first_name.to_lowercase());
        }
        if !employee.last_name.is_empty() {
            employee_names.insert(employee.last_name.to_lowercase());
        }
    }
    let project_ids: HashSet<i64> = store
        .all::<Project>()
        .into_iter()
        .map(|(_, p)| p.id)
        .collect();

    let records = store.all::<AttendanceRecord>();
    report.checked = records.len();

    // First occurrence of each identity wins; the rest are duplicates.
    let mut seen_ids: HashMap<String, usize> = HashMap::new();

    let mut bulk = BulkWriter::new(store);
    for (doc_id, record) in &records {
        let mut invalid = false;

        if record.id.is_empty() || record.day.is_none() || record.project_id.is_none() {
            report.missing_fields.push(issue(
                record,
                "missing one of: ID, Day, ProjectID",
            ));
            invalid = true;
        }

        let first = record.employee_first_name.to_lowercase();
        let last = record.employee_last_name.to_lowercase();
        let known = (!first.is_empty() && employee_names.contains(&first))
            || (!last.is_empty() && employee_names.contains(&last));
        if !known {
            report
                .unknown_employee
                .push(issue(record, "employee not found"));
            invalid = true;
        }

        if let Some(project_id) = record.project_id {
            if !project_ids.contains(&project_id) {
                report
                    .unknown_project
                    .push(issue(record, format!("project {project_id} not found")));
                invalid = true;
            }
        }

        if !record.id.is_empty() {
            let count = seen_ids.entry(record.id.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                report
                    .duplicates
                    .push(issue(record, "duplicate record identity"));
                invalid = true;
            }
        }

        let retired = mark_retired
            && record
                .day
                .map(|day| day.year() <= today.year() - RETIREMENT_AGE_YEARS)
                .unwrap_or(false);

        let status = if invalid {
            report.invalid += 1;
            DataStatus::Invalid
        } else if retired {
            report.retired += 1;
            DataStatus::Retired
        } else {
            report.valid += 1;
            DataStatus::Valid
        };
        bulk.mutate::<AttendanceRecord>(doc_id.clone(), move |r| {
            r.data_status = Some(status);
        });
    }
    bulk.commit()?;

    info!(
        checked = report.checked,
        valid = report.valid,
        invalid = report.invalid,
        retired = report.retired,
        "attendance audit finished"
    );
    Ok(report)
}

/// Clears every data-status stamp. Returns how many records were touched.
pub fn reset_attendance_status(store: &Store) -> Result<usize, StoreError> {
    let records = store.all::<AttendanceRecord>();
    let count = records.len();
    let mut bulk = BulkWriter::new(store);
    for (doc_id, _) in records {
        bulk.mutate::<AttendanceRecord>(doc_id, |r| r.data_status = None);
    }
    bulk.commit()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::generate_record_id;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seeded() -> Store {
        let store = Store::new();
        store.insert(Employee {
            id: "e1".into(),
            first_name: "Bold".into(),
            last_name: "Erdene".into(),
            role: "Engineer".into(),
            ..Default::default()
        });
        store.insert(Project {
            id: 1,
            ..Default::default()
        });
        store
    }

    fn record(id: &str, day: &str, last_name: &str, project: i64) -> AttendanceRecord {
        AttendanceRecord {
            id: id.to_string(),
            day: Some(d(day)),
            employee_last_name: last_name.to_string(),
            project_id: Some(project),
            ..Default::default()
        }
    }

    #[test]
    fn clean_records_are_marked_valid() {
        let store = seeded();
        let doc = store.insert(record(&generate_record_id(), "2025-05-01", "Erdene", 1));
        let report = audit_attendance(&store, d("2025-08-08"), false).unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 0);
        assert_eq!(
            store.get::<AttendanceRecord>(&doc).unwrap().data_status,
            Some(DataStatus::Valid)
        );
    }

    #[test]
    fn broken_references_and_duplicates_are_flagged() {
        let store = seeded();
        store.insert(record("dup", "2025-05-01", "Erdene", 1));
        store.insert(record("dup", "2025-05-02", "Erdene", 1));
        store.insert(record("orphan-emp", "2025-05-01", "Nobody", 1));
        store.insert(record("orphan-prj", "2025-05-01", "Erdene", 42));
        let mut missing = record("", "2025-05-01", "Erdene", 1);
        missing.day = None;
        store.insert(missing);

        let report = audit_attendance(&store, d("2025-08-08"), false).unwrap();
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.unknown_employee.len(), 1);
        assert_eq!(report.unknown_project.len(), 1);
        assert_eq!(report.missing_fields.len(), 1);
        assert_eq!(report.invalid, 4);
        assert_eq!(report.valid, 1);
    }

    #[test]
    fn old_records_retire_only_when_asked() {
        let store = seeded();
        let doc = store.insert(record("old", "2022-03-01", "Erdene", 1));

        audit_attendance(&store, d("2025-08-08"), false).unwrap();
        assert_eq!(
            store.get::<AttendanceRecord>(&doc).unwrap().data_status,
            Some(DataStatus::Valid)
        );

        let report = audit_attendance(&store, d("2025-08-08"), true).unwrap();
        assert_eq!(report.retired, 1);
        assert_eq!(
            store.get::<AttendanceRecord>(&doc).unwrap().data_status,
            Some(DataStatus::Retired)
        );
    }

    #[test]
    fn reset_clears_every_stamp() {
        let store = seeded();
        let doc = store.insert(record("r1", "2025-05-01", "Erdene", 1));
        audit_attendance(&store, d("2025-08-08"), false).unwrap();
        let touched = reset_attendance_status(&store).unwrap();
        assert_eq!(touched, 1);
        assert_eq!(store.get::<AttendanceRecord>(&doc).unwrap().data_status, None);
    }
}
