//! Bundled entity kinds: clients, projects and quotes.
//!
//! These are consumers of the core store API. They supply validation rules,
//! the client delete guard and dashboard statistics.

mod rules;
mod stats;

pub use rules::{
    client_rules, is_terminal_project_status, project_rules, quote_rules, CLIENT_STATUSES,
    PROJECT_STATUSES, PROJECT_TERMINAL_STATUSES, QUOTE_STATUSES,
};
pub use stats::{workload_by_client, ProjectStats};

use crate::error::Result;
use crate::guards::ReferenceGuard;
use crate::registry::Registry;
use std::sync::Arc;

pub const CLIENTS: &str = "clients";
pub const PROJECTS: &str = "projects";
pub const QUOTES: &str = "quotes";

/// Open and register the clients, projects and quotes stores.
pub fn open_standard_stores(registry: &Registry) {
    registry.open_store(CLIENTS, Some(Arc::new(client_rules())));
    registry.open_store(PROJECTS, Some(Arc::new(project_rules())));
    registry.open_store(QUOTES, Some(Arc::new(quote_rules())));
}

/// Blocks deleting a client while it has unfinished projects.
pub fn client_delete_guard(registry: &Registry) -> Result<ReferenceGuard> {
    let projects = registry.require(PROJECTS)?;
    Ok(ReferenceGuard::new(projects, "clientId")
        .only_when(|project| !is_terminal_project_status(project.get_str("status"))))
}
