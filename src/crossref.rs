//! Joins pull requests to the issues they belong to and counts pull requests per label.
//!
//! The join key is the issue's API URL, which every pull request carries as `issue_url`. Only
//! the issues of the fetched window are known, so a pull request whose issue lies outside it is
//! left out of the counts. With a window of the most recent N issues this biases the counts
//! towards recent activity; it is a property of the sampling, not something the join corrects.

use crate::types::{Issue, PullRequest};
use std::collections::HashMap;

/// Counts, for every label, the pull requests whose originating issue carries that label.
///
/// The result is ordered by descending count. Labels with equal counts keep the order in which
/// they were first counted.
pub fn cross_reference(issues: &[Issue], pull_requests: &[PullRequest]) -> Vec<(String, usize)> {
    let labels_by_url: HashMap<&str, Vec<&str>> = issues
        .iter()
        .map(|issue| (issue.url.as_str(), issue.label_names().collect()))
        .collect();

    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut unmatched = 0usize;

    for pr in pull_requests {
        let Some(labels) = labels_by_url.get(pr.issue_url.as_str()) else {
            unmatched += 1;
            continue;
        };

        for &label in labels {
            let position = *positions.entry(label).or_insert_with(|| {
                counts.push((label.to_string(), 0));
                counts.len() - 1
            });
            counts[position].1 += 1;
        }
    }

    if unmatched > 0 {
        tracing::debug!(
            unmatched,
            "Pull requests whose issue is outside the fetched window were not counted"
        );
    }

    // stable: ties stay in first-encounter order
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}
