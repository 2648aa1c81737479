//! Error types for the record store.

use crate::types::RecordId;
use std::fmt;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Duplicate id: {0}")]
    DuplicateId(RecordId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Invalid import format: {0}")]
    ImportFormat(String),

    #[error("Cannot delete {id} from {store}: {reason}")]
    DeleteBlocked {
        store: String,
        id: RecordId,
        reason: String,
    },

    #[error("Store not registered: {0}")]
    StoreNotRegistered(String),
}

impl StoreError {
    /// Whether the in-memory state may be ahead of the persisted state.
    pub fn is_persistence(&self) -> bool {
        matches!(self, StoreError::Persistence(_))
    }
}

/// Failures of the underlying persistence area or codec.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quota exceeded writing {key}: {size} bytes (limit {limit})")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {got:08x}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    #[error("Persistence area is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            PersistenceError::Deserialization(e.to_string())
        } else {
            PersistenceError::Serialization(e.to_string())
        }
    }
}

/// What kind of check a field failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// Required field is absent, null or blank.
    Missing,
    /// Value has the wrong type, pattern or enum member.
    Format,
    /// Two fields are inconsistent with each other.
    Relation,
}

/// A single failed check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn missing(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("Missing required field: {}", field),
            field,
            kind: ViolationKind::Missing,
        }
    }

    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::Format,
            message: message.into(),
        }
    }

    pub fn relation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::Relation,
            message: message.into(),
        }
    }
}

/// Rejection of a record by a validator. Always holds at least one violation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ValidationError {
    violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        debug_assert!(!violations.is_empty());
        Self { violations }
    }

    pub fn single(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Names of the offending fields, in check order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.violations.iter().map(|v| v.field.as_str())
    }

    pub fn names(&self, field: &str) -> bool {
        self.fields().any(|f| f == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for violation in &self.violations {
            if !first {
                f.write_str("; ")?;
            }
            f.write_str(&violation.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
