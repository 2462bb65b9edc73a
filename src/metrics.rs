use crate::types::Issue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const MILLIS_PER_DAY: f64 = 1000.0 * 60.0 * 60.0 * 24.0;

/// Tallies over a window of issues.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueSummary {
    /// Issues opened per creation date (UTC, YYYY-MM-DD).
    pub by_date: BTreeMap<String, usize>,
    /// Issues opened per author login.
    pub by_user: BTreeMap<String, usize>,
    /// Issues carrying each label.
    pub by_label: BTreeMap<String, usize>,
    /// Days from creation to closing, one sample per closed issue.
    pub close_durations: Vec<f64>,
}

impl IssueSummary {
    /// Mean of the close-duration samples, or `None` when no issue in the window has closed.
    pub fn average_close_days(&self) -> Option<f64> {
        if self.close_durations.is_empty() {
            return None;
        }
        Some(self.close_durations.iter().sum::<f64>() / self.close_durations.len() as f64)
    }

    pub fn issue_count(&self) -> usize {
        self.by_date.values().sum()
    }
}

/// Calculates the per-date, per-user and per-label counts and the close durations of `issues`.
///
/// Every issue contributes to exactly one date bucket and one user bucket, to one label bucket
/// per label it carries, and to the close durations only if it has been closed.
pub fn aggregate(issues: &[Issue]) -> IssueSummary {
    let mut summary = IssueSummary::default();

    for issue in issues {
        let date = issue.created_at.format("%Y-%m-%d").to_string();
        *summary.by_date.entry(date).or_default() += 1;

        *summary
            .by_user
            .entry(issue.user.login.clone())
            .or_default() += 1;

        for label in issue.label_names() {
            *summary.by_label.entry(label.to_string()).or_default() += 1;
        }

        if let Some(closed_at) = issue.closed_at {
            summary
                .close_durations
                .push(days_between(issue.created_at, closed_at));
        }
    }

    summary
}

/// Fractional days from `start` to `end`.
fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / MILLIS_PER_DAY
}
