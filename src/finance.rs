// src/finance.rs
//
// Financial transaction operations. The validator gates creation; nothing
// is written when it rejects. Updates and deletes address the record by
// its store key.

use thiserror::Error;
use tracing::info;

use crate::models::{generate_record_id, now_iso, FinancialTransaction};
use crate::store::{Store, StoreError};
use crate::validation::{check_financial_transaction, TransactionRejection};

#[derive(Error, Debug)]
pub enum FinanceError {
    #[error("financial transaction not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Rejected(#[from] TransactionRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn same_day_transactions(store: &Store, draft: &FinancialTransaction) -> Vec<FinancialTransaction> {
    let (Some(employee_id), Some(date)) = (draft.employee_id, draft.date) else {
        return Vec::new();
    };
    store
        .filter::<FinancialTransaction>(|t| {
            t.employee_id == Some(employee_id) && t.date == Some(date)
        })
        .into_iter()
        .map(|(_, t)| t)
        .collect()
}

pub fn create_transaction(
    store: &Store,
    mut draft: FinancialTransaction,
    confirm_duplicate: bool,
) -> Result<(String, FinancialTransaction), FinanceError> {
    let existing = same_day_transactions(store, &draft);
    check_financial_transaction(&draft, &existing, confirm_duplicate)?;

    if draft.id.is_empty() {
        draft.id = generate_record_id();
    }
    draft.synced_to_sheet = false;
    draft.created_at = Some(now_iso());
    let doc_id = store.insert(draft.clone());
    info!(transaction = %draft.id, amount = draft.amount, "created financial transaction");
    Ok((doc_id, draft))
}

/// Replaces the editable fields of an existing transaction. The edit is
/// re-validated so an update cannot smuggle in a state creation would have
/// rejected.
pub fn update_transaction(
    store: &Store,
    doc_id: &str,
    mut updated: FinancialTransaction,
    confirm_duplicate: bool,
) -> Result<FinancialTransaction, FinanceError> {
    let current = store
        .get::<FinancialTransaction>(doc_id)
        .ok_or_else(|| FinanceError::NotFound(doc_id.to_string()))?;

    // Identity and provenance are not editable.
    updated.id = current.id.clone();
    updated.created_at = current.created_at.clone();
    updated.synced_to_sheet = false;
    updated.last_synced_at = None;

    let existing = same_day_transactions(store, &updated);
    check_financial_transaction(&updated, &existing, confirm_duplicate)?;

    store.replace(doc_id, updated.clone())?;
    info!(transaction = %updated.id, "updated financial transaction");
    Ok(updated)
}

pub fn delete_transaction(store: &Store, doc_id: &str) -> Result<(), FinanceError> {
    if store.get::<FinancialTransaction>(doc_id).is_none() {
        return Err(FinanceError::NotFound(doc_id.to_string()));
    }
    store.delete::<FinancialTransaction>(doc_id)?;
    info!(doc = %doc_id, "deleted financial transaction");
    Ok(())
}
