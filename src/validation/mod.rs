//! Pluggable record validation.
//!
//! A store holds at most one [`Validator`]. Entity modules either implement
//! the trait directly or assemble a [`Rules`] set from required-field,
//! format and cross-field checks.

mod rules;

pub use rules::{FnValidator, Rules};

use crate::error::ValidationError;
use crate::types::Record;

/// Capability that accepts or rejects a candidate record.
///
/// Called with the fully merged record (system fields assigned) before any
/// mutation, so a rejection leaves the store untouched.
pub trait Validator: Send + Sync {
    fn validate(&self, record: &Record) -> Result<(), ValidationError>;
}
