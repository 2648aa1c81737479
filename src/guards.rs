//! Cross-store delete guards.

use crate::error::{Result, StoreError};
use crate::store::RecordStore;
use crate::types::{Record, RecordId};
use serde_json::Value;
use std::sync::Arc;

/// Decides whether a record may be deleted from a store.
pub trait RelationGuard: Send + Sync {
    /// Refuse with [`StoreError::DeleteBlocked`] if deleting `id` from
    /// `store` would orphan dependent records.
    fn check(&self, store: &str, id: &RecordId) -> Result<()>;
}

type BlockingPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Blocks a delete while records in another store point at it.
#[derive(Clone)]
pub struct ReferenceGuard {
    /// Store holding the referencing records.
    dependent: Arc<RecordStore>,
    /// Foreign-key field in the dependent records.
    field: String,
    /// Only references for which this holds block the delete.
    blocking: Option<BlockingPredicate>,
}

impl ReferenceGuard {
    pub fn new(dependent: Arc<RecordStore>, field: impl Into<String>) -> Self {
        Self {
            dependent,
            field: field.into(),
            blocking: None,
        }
    }

    /// Restrict blocking references to those matching `predicate`.
    pub fn only_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.blocking = Some(Arc::new(predicate));
        self
    }

    /// Dependent records that currently block deleting `id`.
    pub fn blockers(&self, id: &RecordId) -> Vec<Record> {
        self.dependent.get_where(|record| {
            references(record.get(&self.field), id)
                && self.blocking.as_ref().map_or(true, |f| f(record))
        })
    }
}

impl RelationGuard for ReferenceGuard {
    fn check(&self, store: &str, id: &RecordId) -> Result<()> {
        let blockers = self.blockers(id);
        if blockers.is_empty() {
            return Ok(());
        }
        Err(StoreError::DeleteBlocked {
            store: store.to_string(),
            id: id.clone(),
            reason: format!(
                "{} record(s) in {} reference it via {}",
                blockers.len(),
                self.dependent.name(),
                self.field
            ),
        })
    }
}

fn references(value: Option<&Value>, id: &RecordId) -> bool {
    match value {
        Some(Value::String(s)) => s == id.as_str(),
        Some(Value::Number(n)) => n.to_string() == id.as_str(),
        _ => false,
    }
}
