// src/store.rs
//
// Document-store collaborator: collection-scoped CRUD, predicate queries,
// and atomic multi-document batches with the store's per-batch write
// ceiling. The process holds exactly one `Store`, created at startup and
// passed by reference everywhere — no ambient global.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::models::{
    generate_doc_id, AttendanceRecord, AttendanceRequest, Employee, FinancialTransaction, Project,
    WarehouseItem, WarehouseRequest, WarehouseTransaction,
};

/// Hard per-batch write ceiling of the underlying store. Bulk operations
/// must chunk and commit sequentially; there is no cross-chunk atomicity.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection} document not found: {id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    #[error("batch of {len} writes exceeds the {MAX_BATCH_WRITES}-write ceiling")]
    BatchLimitExceeded { len: usize },
}

#[derive(Debug, Default)]
pub struct Collections {
    pub attendance: HashMap<String, AttendanceRecord>,
    pub attendance_requests: HashMap<String, AttendanceRequest>,
    pub projects: HashMap<String, Project>,
    pub financial_transactions: HashMap<String, FinancialTransaction>,
    pub warehouse_items: HashMap<String, WarehouseItem>,
    pub warehouse_transactions: HashMap<String, WarehouseTransaction>,
    pub warehouse_requests: HashMap<String, WarehouseRequest>,
    pub employees: HashMap<String, Employee>,
}

/// A type stored in one named collection.
pub trait Entity: Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;
    fn map(collections: &Collections) -> &HashMap<String, Self>;
    fn map_mut(collections: &mut Collections) -> &mut HashMap<String, Self>;
}

macro_rules! entity {
    ($ty:ty, $name:literal, $field:ident) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $name;
            fn map(collections: &Collections) -> &HashMap<String, Self> {
                &collections.$field
            }
            fn map_mut(collections: &mut Collections) -> &mut HashMap<String, Self> {
                &mut collections.$field
            }
        }
    };
}

entity!(AttendanceRecord, "timeAttendance", attendance);
entity!(AttendanceRequest, "timeAttendanceRequests", attendance_requests);
entity!(Project, "projects", projects);
entity!(FinancialTransaction, "financialTransactions", financial_transactions);
entity!(WarehouseItem, "warehouse", warehouse_items);
entity!(WarehouseTransaction, "warehouseTransactions", warehouse_transactions);
entity!(WarehouseRequest, "warehouseRequests", warehouse_requests);
entity!(Employee, "employees", employees);

#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Collections>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        T::map(&self.inner.read().unwrap()).get(id).cloned()
    }

    /// Inserts under a fresh document key and returns it.
    pub fn insert<T: Entity>(&self, value: T) -> String {
        let id = generate_doc_id();
        T::map_mut(&mut self.inner.write().unwrap()).insert(id.clone(), value);
        id
    }

    pub fn insert_with_id<T: Entity>(&self, id: &str, value: T) {
        T::map_mut(&mut self.inner.write().unwrap()).insert(id.to_string(), value);
    }

    pub fn replace<T: Entity>(&self, id: &str, value: T) -> Result<(), StoreError> {
        let mut guard = self.inner.write().unwrap();
        let map = T::map_mut(&mut guard);
        if !map.contains_key(id) {
            return Err(StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            });
        }
        map.insert(id.to_string(), value);
        Ok(())
    }

    pub fn update<T: Entity, R>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, StoreError> {
        let mut guard = self.inner.write().unwrap();
        match T::map_mut(&mut guard).get_mut(id) {
            Some(value) => Ok(mutate(value)),
            None => Err(StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            }),
        }
    }

    pub fn delete<T: Entity>(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().unwrap();
        match T::map_mut(&mut guard).remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            }),
        }
    }

    pub fn all<T: Entity>(&self) -> Vec<(String, T)> {
        T::map(&self.inner.read().unwrap())
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    pub fn filter<T: Entity>(&self, pred: impl Fn(&T) -> bool) -> Vec<(String, T)> {
        T::map(&self.inner.read().unwrap())
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    pub fn find_one<T: Entity>(&self, pred: impl Fn(&T) -> bool) -> Option<(String, T)> {
        T::map(&self.inner.read().unwrap())
            .iter()
            .find(|(_, value)| pred(value))
            .map(|(id, value)| (id.clone(), value.clone()))
    }

    pub fn count<T: Entity>(&self) -> usize {
        T::map(&self.inner.read().unwrap()).len()
    }

    /// Runs a read-check-write sequence under the store's write lock, so a
    /// guard condition and the writes it protects cannot interleave with
    /// another operation. This is the store's transaction primitive.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        f(&mut self.inner.write().unwrap())
    }

    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch {
            store: self,
            ops: Vec::new(),
        }
    }
}

pub type WriteOp = Box<dyn FnOnce(&mut Collections) + Send>;

/// Buffered writes applied in one locked step. Commit refuses batches over
/// the store ceiling; callers chunk instead.
pub struct WriteBatch<'a> {
    store: &'a Store,
    ops: Vec<WriteOp>,
}

impl WriteBatch<'_> {
    pub fn put<T: Entity>(&mut self, id: impl Into<String>, value: T) {
        let id = id.into();
        self.ops.push(Box::new(move |collections| {
            T::map_mut(collections).insert(id, value);
        }));
    }

    pub fn delete<T: Entity>(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.ops.push(Box::new(move |collections| {
            T::map_mut(collections).remove(&id);
        }));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies every buffered write atomically. Returns the write count.
    pub fn commit(self) -> Result<usize, StoreError> {
        let len = self.ops.len();
        if len > MAX_BATCH_WRITES {
            return Err(StoreError::BatchLimitExceeded { len });
        }
        let mut guard = self.store.inner.write().unwrap();
        for op in self.ops {
            op(&mut guard);
        }
        Ok(len)
    }
}

/// Commits an arbitrarily large op list as sequential ceiling-sized
/// batches. Earlier chunks stay committed if a later one fails; that is
/// the store's documented bulk semantics, not something to paper over.
pub fn commit_chunked(store: &Store, ops: Vec<WriteOp>) -> Result<usize, StoreError> {
    let mut written = 0;
    let mut ops = ops;
    while !ops.is_empty() {
        let rest = if ops.len() > MAX_BATCH_WRITES {
            ops.split_off(MAX_BATCH_WRITES)
        } else {
            Vec::new()
        };
        let mut batch = store.batch();
        batch.ops = ops;
        written += batch.commit()?;
        ops = rest;
    }
    Ok(written)
}

/// Builder for chunk-committed bulk writes, so callers never assemble raw
/// op lists by hand.
pub struct BulkWriter<'a> {
    store: &'a Store,
    ops: Vec<WriteOp>,
}

impl<'a> BulkWriter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn put<T: Entity>(&mut self, id: impl Into<String>, value: T) {
        let id = id.into();
        self.ops.push(Box::new(move |collections| {
            T::map_mut(collections).insert(id, value);
        }));
    }

    pub fn delete<T: Entity>(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.ops.push(Box::new(move |collections| {
            T::map_mut(collections).remove(&id);
        }));
    }

    pub fn mutate<T: Entity>(&mut self, id: impl Into<String>, f: impl FnOnce(&mut T) + Send + 'static) {
        let id = id.into();
        self.ops.push(Box::new(move |collections| {
            if let Some(value) = T::map_mut(collections).get_mut(&id) {
                f(value);
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn commit(self) -> Result<usize, StoreError> {
        commit_chunked(self.store, self.ops)
    }
}
