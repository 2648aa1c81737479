//! Derived project statistics.

use super::rules::is_terminal_project_status;
use crate::types::{Record, Timestamp};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Dashboard figures over a set of projects.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total: usize,
    pub completed: usize,
    /// `completed / total`, 0 when there are no projects.
    pub completion_rate: f64,
    /// Not finished and past their end date.
    pub overdue: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl ProjectStats {
    pub fn compute(projects: &[Record], today: NaiveDate) -> Self {
        let mut stats = ProjectStats {
            total: projects.len(),
            ..Default::default()
        };

        for project in projects {
            let status = project.get_str("status");
            *stats
                .by_status
                .entry(status.unwrap_or("unknown").to_string())
                .or_insert(0) += 1;

            if status == Some("completed") {
                stats.completed += 1;
            }
            if !is_terminal_project_status(status)
                && end_date(project).map_or(false, |end| end < today)
            {
                stats.overdue += 1;
            }
        }

        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
        }
        stats
    }
}

/// Number of unfinished projects per `clientId`.
pub fn workload_by_client(projects: &[Record]) -> BTreeMap<String, usize> {
    let mut workload = BTreeMap::new();
    for project in projects {
        if is_terminal_project_status(project.get_str("status")) {
            continue;
        }
        if let Some(client) = project.get_str("clientId") {
            *workload.entry(client.to_string()).or_insert(0) += 1;
        }
    }
    workload
}

fn end_date(project: &Record) -> Option<NaiveDate> {
    let raw = project.get_str("endDate")?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| Timestamp::parse(raw).map(|ts| ts.0.date_naive()))
}
