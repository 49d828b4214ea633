// src/sync_tests.rs

#[cfg(test)]
mod tests {
    use crate::models::*;
    use crate::store::Store;
    use crate::sync::*;
    use crate::workbook::{InMemoryWorkbook, TableClient};
    use chrono::NaiveDate;
    use serde_json::json;

    const TA_HEADERS: &[&str] = &[
        "ID",
        "Day",
        "WeekDay",
        "FirstName",
        "LastName",
        "EmployeeID",
        "Role",
        "Status",
        "ProjectID",
        "ProjectName",
        "start time",
        "end time",
        "WorkingHour",
        "илүү цаг",
        "comment",
        "Week",
    ];

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(id: &str, synced: bool) -> AttendanceRecord {
        AttendanceRecord {
            id: id.to_string(),
            day: Some(d("2025-06-02")),
            weekday: "Monday".into(),
            week: 23,
            employee_id: "emp-1".into(),
            employee_first_name: "Bold".into(),
            employee_last_name: "Erdene".into(),
            role: "Engineer".into(),
            status: AttendanceStatus::Present,
            project_id: Some(1),
            project_name: "Substation".into(),
            start_time: "08:00".into(),
            end_time: "17:00".into(),
            working_hour: 9.0,
            overtime_hour: 1.0,
            synced_to_sheet: synced,
            ..Default::default()
        }
    }

    fn workbook() -> InMemoryWorkbook {
        let wb = InMemoryWorkbook::new();
        wb.create_table("TimeAttendance", TA_HEADERS);
        wb
    }

    fn header_index(name: &str) -> usize {
        TA_HEADERS.iter().position(|h| *h == name).unwrap()
    }

    // --- Push ---

    #[tokio::test]
    async fn push_appends_new_rows_with_column_remaps() {
        let store = Store::new();
        store.insert(record("r1", false));
        let wb = workbook();

        let report = push_records::<AttendanceRecord>(&store, &wb, |r| !r.synced_to_sheet)
            .await
            .unwrap();
        assert_eq!(report.created, vec!["r1"]);
        assert!(report.errors.is_empty());

        let rows = wb.raw_rows("TimeAttendance");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][header_index("ID")], json!("r1"));
        assert_eq!(rows[0][header_index("Day")], json!("2025-06-02"));
        // Remapped columns pick up the internal fields.
        assert_eq!(rows[0][header_index("start time")], json!("08:00"));
        assert_eq!(rows[0][header_index("end time")], json!("17:00"));
        assert_eq!(rows[0][header_index("илүү цаг")], json!(1.0));
        assert_eq!(rows[0][header_index("FirstName")], json!("Bold"));

        // The pushed record is flagged and stamped.
        let (_, stored) = store.find_one::<AttendanceRecord>(|r| r.id == "r1").unwrap();
        assert!(stored.synced_to_sheet);
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn second_push_updates_in_place_never_duplicates() {
        let store = Store::new();
        let doc_id = store.insert(record("r1", false));
        let wb = workbook();

        push_records::<AttendanceRecord>(&store, &wb, |_| true)
            .await
            .unwrap();
        assert_eq!(wb.row_count("TimeAttendance"), 1);

        // Local edit, then push everything again.
        store
            .update::<AttendanceRecord, _>(&doc_id, |r| {
                r.end_time = "19:00".into();
                r.working_hour = 11.0;
                r.synced_to_sheet = false;
            })
            .unwrap();
        let report = push_records::<AttendanceRecord>(&store, &wb, |_| true)
            .await
            .unwrap();

        assert_eq!(wb.row_count("TimeAttendance"), 1);
        assert_eq!(report.updated, vec!["r1"]);
        assert!(report.created.is_empty());
        let rows = wb.raw_rows("TimeAttendance");
        assert_eq!(rows[0][header_index("end time")], json!("19:00"));
    }

    #[tokio::test]
    async fn push_without_identity_is_reported_not_fatal() {
        let store = Store::new();
        store.insert(record("", false));
        store.insert(record("r2", false));
        let wb = workbook();

        let report = push_records::<AttendanceRecord>(&store, &wb, |_| true)
            .await
            .unwrap();
        assert_eq!(report.created, vec!["r2"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(wb.row_count("TimeAttendance"), 1);
    }

    #[tokio::test]
    async fn failed_row_updates_are_collected_and_do_not_abort() {
        let store = Store::new();
        let existing = store.insert(record("r1", false));
        store.insert(record("r2", false));
        let wb = workbook();
        push_records::<AttendanceRecord>(&store, &wb, |r| r.id == "r1")
            .await
            .unwrap();

        store
            .update::<AttendanceRecord, _>(&existing, |r| r.synced_to_sheet = false)
            .unwrap();
        wb.fail_updates(true);
        let report = push_records::<AttendanceRecord>(&store, &wb, |r| !r.synced_to_sheet)
            .await
            .unwrap();

        // The append for r2 landed, the update for r1 failed and was listed.
        assert_eq!(report.created, vec!["r2"]);
        assert_eq!(report.errors.len(), 1);
        let (_, unsynced) = store.find_one::<AttendanceRecord>(|r| r.id == "r1").unwrap();
        assert!(!unsynced.synced_to_sheet);
    }

    // --- Pull ---

    fn sheet_row(id: &str, status: &str, working: f64) -> Vec<serde_json::Value> {
        let mut row = vec![json!(""); TA_HEADERS.len()];
        row[header_index("ID")] = json!(id);
        row[header_index("Day")] = json!("2025-06-02");
        row[header_index("FirstName")] = json!("Saraa");
        row[header_index("LastName")] = json!("Bat");
        row[header_index("EmployeeID")] = json!(12);
        row[header_index("Role")] = json!("Other");
        row[header_index("Status")] = json!(status);
        row[header_index("ProjectID")] = json!(1);
        row[header_index("start time")] = json!("09:00");
        row[header_index("end time")] = json!("17:00");
        row[header_index("WorkingHour")] = json!(working);
        row[header_index("илүү цаг")] = json!(0.0);
        row[header_index("Week")] = json!(23.0);
        row
    }

    #[tokio::test]
    async fn pull_creates_and_updates_by_identity() {
        let store = Store::new();
        let doc_id = store.insert(record("r1", true));
        let wb = workbook();
        wb.append_rows(
            "TimeAttendance",
            vec![sheet_row("r1", "Present", 10.0), sheet_row("r9", "Present", 8.0)],
        )
        .await
        .unwrap();

        let report = pull_records::<AttendanceRecord>(&store, &wb).await.unwrap();
        assert_eq!(report.updated, vec!["r1"]);
        assert_eq!(report.created, vec!["r9"]);

        let updated = store.get::<AttendanceRecord>(&doc_id).unwrap();
        assert_eq!(updated.working_hour, 10.0);
        // Numeric employee id cell was coerced into the string field.
        assert_eq!(updated.employee_id, "12");
        assert_eq!(updated.week, 23);

        let (_, created) = store.find_one::<AttendanceRecord>(|r| r.id == "r9").unwrap();
        assert_eq!(created.start_time, "09:00");
        assert_eq!(created.project_id, Some(1));
    }

    #[tokio::test]
    async fn pull_normalizes_serial_dates_and_time_fractions() {
        let store = Store::new();
        let wb = workbook();
        let mut row = sheet_row("r5", "Present", 8.0);
        // 2025-06-02 as a workbook serial; 08:00 and 17:30 as day fractions.
        row[header_index("Day")] = json!(45810.0);
        row[header_index("start time")] = json!(8.0 / 24.0);
        row[header_index("end time")] = json!(17.5 / 24.0);
        wb.append_rows("TimeAttendance", vec![row]).await.unwrap();

        pull_records::<AttendanceRecord>(&store, &wb).await.unwrap();
        let (_, pulled) = store.find_one::<AttendanceRecord>(|r| r.id == "r5").unwrap();
        assert_eq!(pulled.day, Some(d("2025-06-02")));
        assert_eq!(pulled.start_time, "08:00");
        assert_eq!(pulled.end_time, "17:30");
    }

    #[tokio::test]
    async fn reviewed_records_are_immune_to_pull() {
        let store = Store::new();
        let mut approved = record("r1", true);
        approved.approval_status = ApprovalStatus::Approved;
        approved.working_hour = 9.0;
        let doc_id = store.insert(approved);

        let wb = workbook();
        wb.append_rows("TimeAttendance", vec![sheet_row("r1", "Absent", 1.0)])
            .await
            .unwrap();

        let report = pull_records::<AttendanceRecord>(&store, &wb).await.unwrap();
        assert_eq!(report.skipped, vec!["r1"]);
        assert!(report.updated.is_empty());

        let untouched = store.get::<AttendanceRecord>(&doc_id).unwrap();
        assert_eq!(untouched.working_hour, 9.0);
        assert_eq!(untouched.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn unreadable_rows_are_collected_as_errors() {
        let store = Store::new();
        let wb = workbook();
        let mut bad = sheet_row("r7", "NoSuchStatus", 8.0);
        bad[header_index("Day")] = json!("2025-06-02");
        wb.append_rows(
            "TimeAttendance",
            vec![bad, sheet_row("r8", "Present", 8.0)],
        )
        .await
        .unwrap();

        let report = pull_records::<AttendanceRecord>(&store, &wb).await.unwrap();
        assert_eq!(report.created, vec!["r8"]);
        assert_eq!(report.errors.len(), 1);
    }

    // --- Full replace ---

    #[tokio::test]
    async fn full_replace_dry_run_reports_without_mutating() {
        let store = Store::new();
        store.insert(record("keep", true));
        store.insert(record("gone", true));
        let wb = workbook();
        wb.append_rows(
            "TimeAttendance",
            vec![sheet_row("keep", "Present", 8.0), sheet_row("new", "Present", 8.0)],
        )
        .await
        .unwrap();

        let report = full_replace::<AttendanceRecord>(&store, &wb, true)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.created, vec!["new"]);
        assert_eq!(report.overwritten, vec!["keep"]);
        assert_eq!(report.deleted, vec!["gone"]);

        // Nothing moved.
        assert_eq!(store.count::<AttendanceRecord>(), 2);
        assert!(store.find_one::<AttendanceRecord>(|r| r.id == "gone").is_some());
        assert!(store.find_one::<AttendanceRecord>(|r| r.id == "new").is_none());
    }

    #[tokio::test]
    async fn full_replace_deletes_and_deep_overwrites() {
        let store = Store::new();
        let keep_doc = store.insert(record("keep", true));
        store.insert(record("gone", true));
        let wb = workbook();
        wb.append_rows(
            "TimeAttendance",
            vec![sheet_row("keep", "Absent", 2.0), sheet_row("new", "Present", 8.0)],
        )
        .await
        .unwrap();

        let report = full_replace::<AttendanceRecord>(&store, &wb, false)
            .await
            .unwrap();
        assert!(!report.dry_run);
        assert!(report.errors.is_empty());

        assert_eq!(store.count::<AttendanceRecord>(), 2);
        assert!(store.find_one::<AttendanceRecord>(|r| r.id == "gone").is_none());

        // Deep overwrite: the sheet's view replaced the local record wholesale.
        let overwritten = store.get::<AttendanceRecord>(&keep_doc).unwrap();
        assert_eq!(overwritten.status, AttendanceStatus::Absent);
        assert_eq!(overwritten.working_hour, 2.0);
        assert_eq!(overwritten.employee_first_name, "Saraa");
    }

    // --- Push orchestration ---

    #[tokio::test]
    async fn attendance_push_purges_approved_requests_and_refreshes_hours() {
        let store = Store::new();
        store.insert(Project {
            id: 1,
            ..Default::default()
        });
        store.insert(record("r1", false));
        store.insert(AttendanceRequest {
            record: record("r1", false),
            state: ApprovalStatus::Approved,
            ..Default::default()
        });
        store.insert(AttendanceRequest {
            record: record("r2", false),
            state: ApprovalStatus::Pending,
            ..Default::default()
        });
        let wb = workbook();

        let report = push_attendance(&store, &wb).await.unwrap();
        assert_eq!(report.sync.created, vec!["r1"]);
        assert_eq!(report.purged_requests, 1);
        assert_eq!(report.refreshed_projects, 1);
        assert_eq!(store.count::<AttendanceRequest>(), 1);

        let (_, project) = store.find_one::<Project>(|p| p.id == 1).unwrap();
        assert_eq!(project.real_hour, 10.0);
    }

    // --- Financial transaction table binding ---

    #[tokio::test]
    async fn financial_pull_coerces_cell_types() {
        let store = Store::new();
        let wb = InMemoryWorkbook::new();
        let headers = [
            "ID",
            "date",
            "amount",
            "purpose",
            "type",
            "projectID",
            "employeeID",
            "receipt",
            "vat",
            "comment",
        ];
        wb.create_table("FinancialTransactions", &headers);
        wb.append_rows(
            "FinancialTransactions",
            vec![vec![
                json!("ft-1"),
                json!("2025-06-02T00:00:00"),
                json!("45000"),
                json!("ProjectWork"),
                json!("Fuel"),
                json!("7"),
                json!(12.0),
                json!("TRUE"),
                json!(false),
                json!("diesel"),
            ]],
        )
        .await
        .unwrap();

        let report = pull_records::<FinancialTransaction>(&store, &wb)
            .await
            .unwrap();
        assert_eq!(report.created, vec!["ft-1"]);

        let (_, tx) = store
            .find_one::<FinancialTransaction>(|t| t.id == "ft-1")
            .unwrap();
        assert_eq!(tx.date, Some(d("2025-06-02")));
        assert_eq!(tx.amount, 45_000.0);
        assert_eq!(tx.tx_type, Some(TxType::Fuel));
        assert_eq!(tx.project_id, Some(7));
        assert_eq!(tx.employee_id, Some(12));
        assert!(tx.receipt);
        assert!(!tx.vat);
    }
}
