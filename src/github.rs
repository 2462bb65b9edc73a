use crate::config::{AppConfig, ItemState};
use crate::error::{Result, TallyError};
use crate::types::{Issue, PullRequest, RepoId};
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// One page of the issues and pulls list endpoints of a repository.
#[async_trait]
pub trait GitHubSource: Send + Sync {
    async fn issues_page(&self, page: u32, per_page: u8) -> Result<Vec<Issue>>;

    async fn pull_requests_page(&self, page: u32, per_page: u8) -> Result<Vec<PullRequest>>;
}

#[derive(Serialize)]
struct PageQuery {
    state: ItemState,
    per_page: u8,
    page: u32,
}

pub struct GitHubClient {
    octocrab: Octocrab,
    repo_id: RepoId,
    state: ItemState,
    request_timeout: Duration,
}

impl GitHubClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut builder =
            Octocrab::builder().add_header(ACCEPT, GITHUB_MEDIA_TYPE.to_string());
        if let Some(token) = &config.github_token {
            builder = builder.personal_token(token.clone());
        }

        Ok(Self {
            octocrab: builder.build()?,
            repo_id: config.repository.clone(),
            state: config.issue_state,
            request_timeout: config.request_timeout(),
        })
    }

    async fn list_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<T>> {
        let route = format!(
            "/repos/{}/{}/{}",
            self.repo_id.owner, self.repo_id.repo, endpoint
        );
        let query = PageQuery {
            state: self.state,
            per_page,
            page,
        };
        let context = format!("fetching {} page {} of {}", endpoint, page, self.repo_id);

        match tokio::time::timeout(
            self.request_timeout,
            self.octocrab.get::<Vec<T>, _, _>(&route, Some(&query)),
        )
        .await
        {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(map_octocrab_error(context, e)),
            Err(_) => Err(TallyError::Timeout {
                context,
                after: self.request_timeout,
            }),
        }
    }
}

#[async_trait]
impl GitHubSource for GitHubClient {
    async fn issues_page(&self, page: u32, per_page: u8) -> Result<Vec<Issue>> {
        self.list_page("issues", page, per_page).await
    }

    async fn pull_requests_page(&self, page: u32, per_page: u8) -> Result<Vec<PullRequest>> {
        self.list_page("pulls", page, per_page).await
    }
}

/// Sorts an octocrab failure into the error taxonomy.
fn map_octocrab_error(context: String, err: octocrab::Error) -> TallyError {
    match err {
        octocrab::Error::GitHub { source, .. } => api_error(context, source.message),
        e @ (octocrab::Error::Serde { .. } | octocrab::Error::Json { .. }) => {
            TallyError::malformed(context, e.to_string())
        }
        other => TallyError::network(context, other),
    }
}

fn api_error(context: String, message: String) -> TallyError {
    if is_rate_limit_message(&message) {
        TallyError::RateLimited { context }
    } else {
        TallyError::GitHubApi { context, message }
    }
}

/// GitHub reports both primary and secondary rate limits only through the message.
fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit") || message.contains("abuse detection")
}
