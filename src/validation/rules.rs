//! Declarative rule sets.

use super::Validator;
use crate::error::{ValidationError, Violation};
use crate::types::{Record, Timestamp};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

type CustomCheck = Arc<dyn Fn(&Record) -> Result<(), Violation> + Send + Sync>;

#[derive(Clone)]
enum Check {
    Required(Vec<String>),
    Pattern { field: String, regex: Regex },
    OneOf { field: String, allowed: Vec<String> },
    Ordered { start: String, end: String },
    NonNegative(String),
    Custom(CustomCheck),
}

/// An ordered list of field checks.
///
/// Every check runs and all violations are reported together. Format and
/// cross-field checks skip fields that are absent or null; pair them with
/// [`Rules::required`] when the field must exist.
#[derive(Clone, Default)]
pub struct Rules {
    checks: Vec<Check>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields that must be present, non-null and not blank.
    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checks
            .push(Check::Required(fields.into_iter().map(Into::into).collect()));
        self
    }

    /// String field that must match `regex`.
    pub fn pattern(mut self, field: impl Into<String>, regex: &Regex) -> Self {
        self.checks.push(Check::Pattern {
            field: field.into(),
            regex: regex.clone(),
        });
        self
    }

    /// String field restricted to an enumerated set.
    pub fn one_of<I, S>(mut self, field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checks.push(Check::OneOf {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// `end` must be strictly after `start`.
    ///
    /// Values may be numbers, RFC 3339 timestamps or `YYYY-MM-DD` dates.
    pub fn ordered(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.checks.push(Check::Ordered {
            start: start.into(),
            end: end.into(),
        });
        self
    }

    /// Numeric field that must be zero or greater.
    pub fn non_negative(mut self, field: impl Into<String>) -> Self {
        self.checks.push(Check::NonNegative(field.into()));
        self
    }

    /// Arbitrary check over the whole record.
    pub fn check<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> Result<(), Violation> + Send + Sync + 'static,
    {
        self.checks.push(Check::Custom(Arc::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    fn run(check: &Check, record: &Record, out: &mut Vec<Violation>) {
        match check {
            Check::Required(fields) => {
                for field in fields {
                    if is_blank(record.get(field)) {
                        out.push(Violation::missing(field.as_str()));
                    }
                }
            }
            Check::Pattern { field, regex } => match present(record, field) {
                None => {}
                Some(Value::String(s)) if regex.is_match(s) => {}
                Some(_) => out.push(Violation::format(
                    field.as_str(),
                    format!("{} has an invalid format", field),
                )),
            },
            Check::OneOf { field, allowed } => match present(record, field) {
                None => {}
                Some(Value::String(s)) if allowed.iter().any(|a| a == s) => {}
                Some(_) => out.push(Violation::format(
                    field.as_str(),
                    format!("{} must be one of: {}", field, allowed.join(", ")),
                )),
            },
            Check::Ordered { start, end } => {
                let from = present(record, start).map(|v| (start, as_instant(v)));
                let to = present(record, end).map(|v| (end, as_instant(v)));
                let mut parsed = Vec::with_capacity(2);
                for (field, instant) in [from, to].into_iter().flatten() {
                    match instant {
                        Some(t) => parsed.push(t),
                        None => out.push(Violation::format(
                            field.as_str(),
                            format!("{} is not a valid date", field),
                        )),
                    }
                }
                if let [from, to] = parsed[..] {
                    if to <= from {
                        out.push(Violation::relation(
                            end.as_str(),
                            format!("{} must be after {}", end, start),
                        ));
                    }
                }
            }
            Check::NonNegative(field) => match present(record, field) {
                None => {}
                Some(v) if as_number(v).map_or(false, |n| n >= 0.0) => {}
                Some(_) => out.push(Violation::format(
                    field.as_str(),
                    format!("{} must be a non-negative number", field),
                )),
            },
            Check::Custom(f) => {
                if let Err(violation) = f(record) {
                    out.push(violation);
                }
            }
        }
    }
}

impl Validator for Rules {
    fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        for check in &self.checks {
            Self::run(check, record, &mut violations);
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }
}

/// Adapts a closure into a [`Validator`].
pub struct FnValidator<F>(pub F);

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Record) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        (self.0)(record)
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Field value, treating explicit null as absent.
fn present<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    match record.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        other => other,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Milliseconds since the epoch for dates, timestamps and plain numbers.
fn as_instant(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            if let Some(ts) = Timestamp::parse(s) {
                return Some(ts.0.timestamp_millis() as f64);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis() as f64)
        }
        _ => None,
    }
}
