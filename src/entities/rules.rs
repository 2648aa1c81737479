//! Validation rules for the bundled entity kinds.

use crate::validation::Rules;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ()\-.]{6,20}$").expect("valid phone regex"));

pub const CLIENT_STATUSES: [&str; 3] = ["active", "inactive", "prospect"];

pub const PROJECT_STATUSES: [&str; 5] = ["planning", "active", "on_hold", "completed", "cancelled"];

/// Project statuses after which a project no longer needs its client.
pub const PROJECT_TERMINAL_STATUSES: [&str; 2] = ["completed", "cancelled"];

pub const QUOTE_STATUSES: [&str; 5] = ["draft", "sent", "accepted", "rejected", "expired"];

pub fn client_rules() -> Rules {
    Rules::new()
        .required(["name", "email"])
        .pattern("email", &EMAIL_RE)
        .pattern("phone", &PHONE_RE)
        .one_of("status", CLIENT_STATUSES)
}

pub fn project_rules() -> Rules {
    Rules::new()
        .required(["name", "clientId", "status"])
        .one_of("status", PROJECT_STATUSES)
        .ordered("startDate", "endDate")
        .non_negative("budget")
}

pub fn quote_rules() -> Rules {
    Rules::new()
        .required(["clientId", "title", "amount"])
        .one_of("status", QUOTE_STATUSES)
        .non_negative("amount")
        .ordered("issueDate", "validUntil")
}

pub fn is_terminal_project_status(status: Option<&str>) -> bool {
    status.map_or(false, |s| PROJECT_TERMINAL_STATUSES.contains(&s))
}
