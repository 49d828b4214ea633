// src/warehouse.rs
//
// Warehouse items, stock transactions, and employee draw requests. Every
// transaction adjusts its item's quantity and records the resulting
// leftover. Request approval is the one multi-document mutation in the
// system: decrement the item, create the outbound transaction, mark the
// request approved — all inside one store transaction, so a request can
// never end up both rejected and decremented, or approved without stock.

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::models::{
    generate_doc_id, generate_record_id, now_iso, ApprovalStatus, StockDirection, WarehouseItem,
    WarehouseRequest, WarehouseTransaction,
};
use crate::store::{Entity, Store, StoreError};

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("warehouse item not found: {0}")]
    ItemNotFound(String),
    #[error("warehouse transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("warehouse request not found: {0}")]
    RequestNotFound(String),
    #[error("request already {0:?}")]
    AlreadyReviewed(ApprovalStatus),
    #[error("insufficient quantity: available {available}, requested {requested}")]
    InsufficientQuantity { available: f64, requested: f64 },
    #[error("quantity must be positive")]
    NonPositiveQuantity,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn signed(direction: StockDirection, quantity: f64) -> f64 {
    match direction {
        StockDirection::Inbound => quantity,
        StockDirection::Outbound => -quantity,
    }
}

/// Creates a stock transaction and applies it to the item atomically.
/// Outbound draws that would leave negative stock are refused with no
/// effect.
pub fn create_stock_transaction(
    store: &Store,
    mut tx: WarehouseTransaction,
) -> Result<(String, WarehouseTransaction), WarehouseError> {
    if tx.quantity <= 0.0 {
        return Err(WarehouseError::NonPositiveQuantity);
    }
    if tx.id.is_empty() {
        tx.id = generate_record_id();
    }
    tx.created_at = Some(now_iso());
    tx.synced_to_sheet = false;

    store.transact(|c| {
        let item = c
            .warehouse_items
            .get_mut(&tx.item_id)
            .ok_or_else(|| WarehouseError::ItemNotFound(tx.item_id.clone()))?;
        let next = item.quantity + signed(tx.direction, tx.quantity);
        if next < 0.0 {
            return Err(WarehouseError::InsufficientQuantity {
                available: item.quantity,
                requested: tx.quantity,
            });
        }
        item.quantity = next;
        item.updated_at = Some(now_iso());
        if tx.item_name.is_empty() {
            tx.item_name = item.name.clone();
        }
        tx.leftover = next;

        let doc_id = generate_doc_id();
        c.warehouse_transactions.insert(doc_id.clone(), tx.clone());
        info!(transaction = %tx.id, item = %tx.item_id, leftover = next, "created stock transaction");
        Ok((doc_id, tx.clone()))
    })
}

/// Rewrites a transaction: the old effect on the item is reverted, then the
/// new one applied, in one atomic step. Refused when the net change would
/// drive the quantity negative.
pub fn update_stock_transaction(
    store: &Store,
    doc_id: &str,
    mut updated: WarehouseTransaction,
) -> Result<WarehouseTransaction, WarehouseError> {
    if updated.quantity <= 0.0 {
        return Err(WarehouseError::NonPositiveQuantity);
    }
    store.transact(|c| {
        let old = c
            .warehouse_transactions
            .get(doc_id)
            .cloned()
            .ok_or_else(|| WarehouseError::TransactionNotFound(doc_id.to_string()))?;
        let item = c
            .warehouse_items
            .get_mut(&old.item_id)
            .ok_or_else(|| WarehouseError::ItemNotFound(old.item_id.clone()))?;

        let reverted = item.quantity - signed(old.direction, old.quantity);
        let next = reverted + signed(updated.direction, updated.quantity);
        if next < 0.0 {
            return Err(WarehouseError::InsufficientQuantity {
                available: reverted,
                requested: updated.quantity,
            });
        }
        item.quantity = next;
        item.updated_at = Some(now_iso());

        updated.id = old.id.clone();
        updated.item_id = old.item_id.clone();
        if updated.item_name.is_empty() {
            updated.item_name = item.name.clone();
        }
        updated.leftover = next;
        updated.created_at = old.created_at.clone();
        updated.synced_to_sheet = false;
        c.warehouse_transactions
            .insert(doc_id.to_string(), updated.clone());
        info!(transaction = %updated.id, leftover = next, "updated stock transaction");
        Ok(updated.clone())
    })
}

/// Deletes a transaction, reverting its effect on the item (floored at
/// zero, matching the store's historical repair behavior).
pub fn delete_stock_transaction(store: &Store, doc_id: &str) -> Result<(), WarehouseError> {
    store.transact(|c| {
        let old = c
            .warehouse_transactions
            .remove(doc_id)
            .ok_or_else(|| WarehouseError::TransactionNotFound(doc_id.to_string()))?;
        if let Some(item) = c.warehouse_items.get_mut(&old.item_id) {
            item.quantity = (item.quantity - signed(old.direction, old.quantity)).max(0.0);
            item.updated_at = Some(now_iso());
        }
        info!(transaction = %old.id, "deleted stock transaction");
        Ok(())
    })
}

/// Creates a pending draw request after a stock-level sanity check. The
/// authoritative check happens again at approval time.
pub fn create_draw_request(
    store: &Store,
    mut request: WarehouseRequest,
) -> Result<String, WarehouseError> {
    if request.quantity <= 0.0 {
        return Err(WarehouseError::NonPositiveQuantity);
    }
    let item = store
        .get::<WarehouseItem>(&request.item_id)
        .ok_or_else(|| WarehouseError::ItemNotFound(request.item_id.clone()))?;
    if item.quantity < request.quantity {
        return Err(WarehouseError::InsufficientQuantity {
            available: item.quantity,
            requested: request.quantity,
        });
    }
    if request.item_name.is_empty() {
        request.item_name = item.name;
    }
    request.status = ApprovalStatus::Pending;
    request.requested_at = Some(now_iso());
    Ok(store.insert(request))
}

/// Approves a pending draw: one atomic batch of three effects. A failed
/// stock check leaves the item, the transaction log, and the request
/// exactly as they were.
pub fn approve_draw_request(store: &Store, request_id: &str) -> Result<String, WarehouseError> {
    store.transact(|c| {
        let request = c
            .warehouse_requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| WarehouseError::RequestNotFound(request_id.to_string()))?;
        if request.status != ApprovalStatus::Pending {
            return Err(WarehouseError::AlreadyReviewed(request.status));
        }
        let item = c
            .warehouse_items
            .get_mut(&request.item_id)
            .ok_or_else(|| WarehouseError::ItemNotFound(request.item_id.clone()))?;
        if item.quantity < request.quantity {
            return Err(WarehouseError::InsufficientQuantity {
                available: item.quantity,
                requested: request.quantity,
            });
        }

        item.quantity -= request.quantity;
        item.updated_at = Some(now_iso());
        let leftover = item.quantity;

        let tx = WarehouseTransaction {
            id: generate_record_id(),
            date: Some(Utc::now().date_naive()),
            direction: StockDirection::Outbound,
            item_id: request.item_id.clone(),
            item_name: request.item_name.clone(),
            quantity: request.quantity,
            leftover,
            employee_id: request.employee_id.clone(),
            employee_name: request.employee_name.clone(),
            project_id: request.project_id,
            project_name: request.project_name.clone(),
            purpose: request.purpose.clone(),
            request_id: Some(request_id.to_string()),
            created_at: Some(now_iso()),
            ..Default::default()
        };
        let tx_doc_id = generate_doc_id();
        c.warehouse_transactions.insert(tx_doc_id.clone(), tx);

        let stored = WarehouseRequest::map_mut(c)
            .get_mut(request_id)
            .ok_or_else(|| WarehouseError::RequestNotFound(request_id.to_string()))?;
        stored.status = ApprovalStatus::Approved;
        stored.approved_at = Some(now_iso());
        stored.transaction_id = Some(tx_doc_id.clone());

        info!(request = %request_id, transaction = %tx_doc_id, leftover, "approved warehouse draw");
        Ok(tx_doc_id)
    })
}

pub fn reject_draw_request(
    store: &Store,
    request_id: &str,
    reason: Option<String>,
) -> Result<(), WarehouseError> {
    let request = store
        .get::<WarehouseRequest>(request_id)
        .ok_or_else(|| WarehouseError::RequestNotFound(request_id.to_string()))?;
    if request.status != ApprovalStatus::Pending {
        return Err(WarehouseError::AlreadyReviewed(request.status));
    }
    store.update::<WarehouseRequest, _>(request_id, |r| {
        r.status = ApprovalStatus::Rejected;
        r.rejected_at = Some(now_iso());
        r.rejection_reason = reason;
    })?;
    Ok(())
}

pub fn delete_draw_request(store: &Store, request_id: &str) -> Result<(), WarehouseError> {
    let request = store
        .get::<WarehouseRequest>(request_id)
        .ok_or_else(|| WarehouseError::RequestNotFound(request_id.to_string()))?;
    if request.status != ApprovalStatus::Pending {
        return Err(WarehouseError::AlreadyReviewed(request.status));
    }
    store.delete::<WarehouseRequest>(request_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_item(quantity: f64) -> Store {
        let store = Store::new();
        store.insert_with_id(
            "item-1",
            WarehouseItem {
                name: "Rebar 12mm".into(),
                unit: "pcs".into(),
                quantity,
                ..Default::default()
            },
        );
        store
    }

    fn outbound(quantity: f64) -> WarehouseTransaction {
        WarehouseTransaction {
            direction: StockDirection::Outbound,
            item_id: "item-1".into(),
            quantity,
            ..Default::default()
        }
    }

    fn draw(quantity: f64) -> WarehouseRequest {
        WarehouseRequest {
            item_id: "item-1".into(),
            quantity,
            employee_id: "emp-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn transaction_adjusts_quantity_and_records_leftover() {
        let store = store_with_item(10.0);
        let (_, tx) = create_stock_transaction(&store, outbound(4.0)).unwrap();
        assert_eq!(tx.leftover, 6.0);
        assert_eq!(tx.item_name, "Rebar 12mm");
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 6.0);

        let inbound = WarehouseTransaction {
            direction: StockDirection::Inbound,
            item_id: "item-1".into(),
            quantity: 7.0,
            ..Default::default()
        };
        let (_, tx) = create_stock_transaction(&store, inbound).unwrap();
        assert_eq!(tx.leftover, 13.0);
    }

    #[test]
    fn overdraw_is_refused_with_no_effect() {
        let store = store_with_item(3.0);
        let err = create_stock_transaction(&store, outbound(5.0)).unwrap_err();
        assert!(matches!(
            err,
            WarehouseError::InsufficientQuantity {
                available,
                requested
            } if available == 3.0 && requested == 5.0
        ));
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 3.0);
        assert_eq!(store.count::<WarehouseTransaction>(), 0);
    }

    #[test]
    fn update_reverts_then_applies() {
        let store = store_with_item(10.0);
        let (doc_id, _) = create_stock_transaction(&store, outbound(4.0)).unwrap();

        let updated = update_stock_transaction(&store, &doc_id, outbound(2.0)).unwrap();
        assert_eq!(updated.leftover, 8.0);
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 8.0);

        // Growing the draw past the reverted stock level fails cleanly.
        let err = update_stock_transaction(&store, &doc_id, outbound(11.0)).unwrap_err();
        assert!(matches!(err, WarehouseError::InsufficientQuantity { .. }));
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 8.0);
    }

    #[test]
    fn delete_reverts_the_effect() {
        let store = store_with_item(10.0);
        let (doc_id, _) = create_stock_transaction(&store, outbound(4.0)).unwrap();
        delete_stock_transaction(&store, &doc_id).unwrap();
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 10.0);
        assert_eq!(store.count::<WarehouseTransaction>(), 0);
    }

    #[test]
    fn approval_is_atomic_and_exactly_once() {
        let store = store_with_item(10.0);
        let request_id = create_draw_request(&store, draw(6.0)).unwrap();
        let tx_id = approve_draw_request(&store, &request_id).unwrap();

        let request = store.get::<WarehouseRequest>(&request_id).unwrap();
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(request.transaction_id.as_deref(), Some(tx_id.as_str()));
        let tx = store.get::<WarehouseTransaction>(&tx_id).unwrap();
        assert_eq!(tx.direction, StockDirection::Outbound);
        assert_eq!(tx.leftover, 4.0);
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 4.0);

        assert!(matches!(
            approve_draw_request(&store, &request_id),
            Err(WarehouseError::AlreadyReviewed(ApprovalStatus::Approved))
        ));
    }

    #[test]
    fn approval_that_would_overdraw_leaves_everything_untouched() {
        let store = store_with_item(10.0);
        let request_id = create_draw_request(&store, draw(6.0)).unwrap();
        // Stock was drawn down between request and review.
        create_stock_transaction(&store, outbound(7.0)).unwrap();

        let err = approve_draw_request(&store, &request_id).unwrap_err();
        assert!(matches!(err, WarehouseError::InsufficientQuantity { .. }));

        let request = store.get::<WarehouseRequest>(&request_id).unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(request.transaction_id.is_none());
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 3.0);
        // Only the manual draw-down exists in the log.
        assert_eq!(store.count::<WarehouseTransaction>(), 1);
    }

    #[test]
    fn rejected_request_never_touches_stock() {
        let store = store_with_item(10.0);
        let request_id = create_draw_request(&store, draw(6.0)).unwrap();
        reject_draw_request(&store, &request_id, Some("not needed".into())).unwrap();

        let request = store.get::<WarehouseRequest>(&request_id).unwrap();
        assert_eq!(request.status, ApprovalStatus::Rejected);
        assert_eq!(request.rejection_reason.as_deref(), Some("not needed"));
        assert_eq!(store.get::<WarehouseItem>("item-1").unwrap().quantity, 10.0);
        assert_eq!(store.count::<WarehouseTransaction>(), 0);
    }
}
