use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "rails").
    pub owner: String,
    /// The name of the repository (e.g., "rails").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Sanitize inputs to prevent path traversal or unintended endpoint access
        let parts: Vec<String> = s
            .trim()
            .split('/')
            .map(|part| part.trim().replace("..", ""))
            .collect();

        match parts.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(RepoId {
                owner: owner.clone(),
                repo: repo.clone(),
            }),
            _ => Err(format!("expected \"owner/repo\", got \"{}\"", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An issue as returned by the issues endpoint.
///
/// Only the fields the analysis reads are typed; everything else GitHub sends is kept in
/// `extra` so the persisted document carries the full upstream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// API URL of the issue. Pull requests reference it through their `issue_url`.
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub body: Option<String>,
    /// Set once by the classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|label| label.name.as_str())
    }
}

/// A pull request as returned by the pulls endpoint. Only the link back to its issue is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub issue_url: String,
}
