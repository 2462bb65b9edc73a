//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs which repository is analysed, how much of it
//! is fetched, how requests are bounded and retried, and how the classifier is reached.

use crate::error::{Result, TallyError};
use crate::fetcher::FetchWindow;
use crate::retry::RetryPolicy;
use crate::types::RepoId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// Largest page GitHub serves on its list endpoints.
pub const MAX_PAGE_SIZE: u8 = 100;

/// Which issues and pull requests the list endpoints return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
    #[default]
    All,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Open => "open",
            ItemState::Closed => "closed",
            ItemState::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(ItemState::Open),
            "closed" => Ok(ItemState::Closed),
            "all" => Ok(ItemState::All),
            other => Err(format!("unknown state \"{}\" (expected open, closed or all)", other)),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Repository to analyse.
    /// Expected format: "owner/repo". Example: "rails/rails"
    #[serde(deserialize_with = "deserialize_repository")]
    pub repository: RepoId,

    /// Optional GitHub Personal Access Token for higher rate limits.
    /// A blank value (as shipped in `.env.example`) counts as unset.
    #[serde(default, deserialize_with = "deserialize_token")]
    pub github_token: Option<String>,

    /// State filter passed to the issues and pulls endpoints.
    #[serde(default, deserialize_with = "deserialize_item_state")]
    pub issue_state: ItemState,

    /// Number of issues to fetch (the analysis window).
    #[serde(default = "default_target_count")]
    pub issue_target_count: usize,

    /// Number of pull requests to fetch for the cross reference.
    #[serde(default = "default_target_count")]
    pub pull_request_target_count: usize,

    /// Items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u8,

    /// Hard limit on the number of paginated requests per fetch pass.
    #[serde(default = "default_max_pages")]
    pub max_github_api_pages: u32,

    /// Upper bound on any single outbound request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Overall deadline for the run in seconds. Zero disables it.
    #[serde(default = "default_run_deadline")]
    pub run_deadline_seconds: u64,

    /// Retries for transient failures (network errors, timeouts, rate limiting).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential backoff between retries, in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Whether issues are annotated with a predicted label.
    #[serde(default = "default_true")]
    pub classifier_enabled: bool,

    /// Bearer token for the inference API. Required when the classifier is enabled.
    #[serde(default, deserialize_with = "deserialize_token")]
    pub classifier_token: Option<String>,

    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,

    #[serde(default = "default_classifier_base_url")]
    pub classifier_base_url: String,

    /// Issue bodies are cut to this many characters before being sent.
    #[serde(default = "default_max_input_chars")]
    pub classifier_max_input_chars: usize,

    /// Where the annotated issues are written.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Width of the longest bar in the rendered charts.
    #[serde(default = "default_chart_width")]
    pub chart_width: usize,

    /// Rows shown per chart before the remainder is summarised.
    #[serde(default = "default_chart_max_bars")]
    pub chart_max_bars: usize,
}

fn default_target_count() -> usize {
    500
}

fn default_page_size() -> u8 {
    MAX_PAGE_SIZE
}

fn default_max_pages() -> u32 {
    50
}

fn default_request_timeout() -> u64 {
    30
}

fn default_run_deadline() -> u64 {
    30 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_classifier_model() -> String {
    "distilbert-base-uncased".to_string()
}

fn default_classifier_base_url() -> String {
    "https://api-inference.huggingface.co/models".to_string()
}

fn default_max_input_chars() -> usize {
    2000
}

fn default_output_path() -> PathBuf {
    PathBuf::from("classified_issues.json")
}

fn default_chart_width() -> usize {
    40
}

fn default_chart_max_bars() -> usize {
    25
}

impl AppConfig {
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        envy::from_env()
    }

    /// A configuration with every optional setting at its default.
    pub fn with_defaults(repository: RepoId) -> Self {
        Self {
            repository,
            github_token: None,
            issue_state: ItemState::default(),
            issue_target_count: default_target_count(),
            pull_request_target_count: default_target_count(),
            page_size: default_page_size(),
            max_github_api_pages: default_max_pages(),
            request_timeout_seconds: default_request_timeout(),
            run_deadline_seconds: default_run_deadline(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            classifier_enabled: default_true(),
            classifier_token: None,
            classifier_model: default_classifier_model(),
            classifier_base_url: default_classifier_base_url(),
            classifier_max_input_chars: default_max_input_chars(),
            output_path: default_output_path(),
            chart_width: default_chart_width(),
            chart_max_bars: default_chart_max_bars(),
        }
    }

    /// Rejects settings that would make the run meaningless or fail halfway through.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(TallyError::Configuration(format!(
                "PAGE_SIZE must be between 1 and {}, but was {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_github_api_pages == 0 {
            return Err(TallyError::Configuration(
                "MAX_GITHUB_API_PAGES must be at least 1".to_string(),
            ));
        }
        for (var, window) in [
            ("ISSUE_TARGET_COUNT", self.issue_window()),
            ("PULL_REQUEST_TARGET_COUNT", self.pull_request_window()),
        ] {
            if !window.covers_target() {
                return Err(TallyError::Configuration(format!(
                    "{} ({}) exceeds what MAX_GITHUB_API_PAGES ({}) pages of PAGE_SIZE ({}) can hold ({})",
                    var,
                    window.target_count,
                    self.max_github_api_pages,
                    self.page_size,
                    window.reach()
                )));
            }
        }
        if self.chart_width == 0 {
            return Err(TallyError::Configuration(
                "CHART_WIDTH must be at least 1".to_string(),
            ));
        }
        if self.classifier_enabled
            && self
                .classifier_token
                .as_deref()
                .map_or(true, |token| token.trim().is_empty())
        {
            return Err(TallyError::Configuration(
                "CLASSIFIER_TOKEN must be set when CLASSIFIER_ENABLED is true".to_string(),
            ));
        }
        Ok(())
    }

    pub fn issue_window(&self) -> FetchWindow {
        FetchWindow {
            target_count: self.issue_target_count,
            page_size: self.page_size,
            max_pages: self.max_github_api_pages,
        }
    }

    pub fn pull_request_window(&self) -> FetchWindow {
        FetchWindow {
            target_count: self.pull_request_target_count,
            ..self.issue_window()
        }
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }

    pub fn run_deadline(&self) -> Option<StdDuration> {
        (self.run_deadline_seconds > 0).then(|| StdDuration::from_secs(self.run_deadline_seconds))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: StdDuration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Full URL of the classification model endpoint.
    pub fn classifier_endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.classifier_base_url.trim_end_matches('/'),
            self.classifier_model
        )
    }
}

fn deserialize_repository<'de, D>(deserializer: D) -> std::result::Result<RepoId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_token<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let token: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(token.filter(|t| !t.trim().is_empty()))
}

fn deserialize_item_state<'de, D>(deserializer: D) -> std::result::Result<ItemState, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] = &[
        "REPOSITORY",
        "GITHUB_TOKEN",
        "ISSUE_STATE",
        "ISSUE_TARGET_COUNT",
        "PULL_REQUEST_TARGET_COUNT",
        "PAGE_SIZE",
        "MAX_GITHUB_API_PAGES",
        "RUN_DEADLINE_SECONDS",
        "CLASSIFIER_ENABLED",
        "CLASSIFIER_TOKEN",
        "CLASSIFIER_MODEL",
        "OUTPUT_PATH",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        env::set_var("REPOSITORY", "rails/rails");
        env::set_var("ISSUE_STATE", "Closed");
        env::set_var("ISSUE_TARGET_COUNT", "250");
        env::set_var("PULL_REQUEST_TARGET_COUNT", "120");
        env::set_var("PAGE_SIZE", "50");
        env::set_var("MAX_GITHUB_API_PAGES", "5");
        env::set_var("RUN_DEADLINE_SECONDS", "0");
        env::set_var("CLASSIFIER_ENABLED", "false");
        env::set_var("CLASSIFIER_MODEL", "my-org/issue-triage");
        env::set_var("OUTPUT_PATH", "out/issues.json");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.repository.owner, "rails");
        assert_eq!(config.repository.repo, "rails");
        assert_eq!(config.issue_state, ItemState::Closed);
        assert_eq!(config.issue_target_count, 250);
        assert_eq!(config.pull_request_target_count, 120);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_github_api_pages, 5);
        assert_eq!(config.run_deadline(), None);
        assert!(!config.classifier_enabled);
        assert_eq!(
            config.classifier_endpoint(),
            "https://api-inference.huggingface.co/models/my-org/issue-triage"
        );
        assert_eq!(config.output_path, PathBuf::from("out/issues.json"));
        assert!(config.validate().is_ok());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();
        env::set_var("REPOSITORY", "octo/hello");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.issue_state, ItemState::All);
        assert_eq!(config.issue_target_count, 500);
        assert_eq!(config.pull_request_target_count, 500);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.request_timeout(), StdDuration::from_secs(30));
        assert_eq!(config.run_deadline(), Some(StdDuration::from_secs(1800)));
        assert!(config.classifier_enabled);
        assert_eq!(config.output_path, PathBuf::from("classified_issues.json"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_missing_vars() {
        clear_env();
        let result = AppConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_config_rejects_bad_repository() {
        clear_env();
        env::set_var("REPOSITORY", "just-a-name");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_blank_tokens_count_as_unset() {
        clear_env();
        env::set_var("REPOSITORY", "octo/hello");
        env::set_var("GITHUB_TOKEN", "");
        env::set_var("CLASSIFIER_TOKEN", "  ");

        let config = AppConfig::from_env().expect("Failed to load config");
        assert_eq!(config.github_token, None);
        assert_eq!(config.classifier_token, None);

        env::set_var("GITHUB_TOKEN", "ghp_test");
        let config = AppConfig::from_env().expect("Failed to load config");
        assert_eq!(config.github_token.as_deref(), Some("ghp_test"));

        clear_env();
    }

    #[test]
    fn test_validate_requires_classifier_token() {
        let mut config = AppConfig::with_defaults("o/r".parse().unwrap());
        assert!(matches!(
            config.validate(),
            Err(TallyError::Configuration(_))
        ));

        config.classifier_token = Some("   ".to_string());
        assert!(config.validate().is_err());

        config.classifier_token = Some("hf_test".to_string());
        assert!(config.validate().is_ok());

        config.classifier_token = None;
        config.classifier_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_page_size_bounds() {
        let mut config = AppConfig::with_defaults("o/r".parse().unwrap());
        config.classifier_enabled = false;

        config.page_size = 0;
        assert!(config.validate().is_err());
        config.page_size = 101;
        assert!(config.validate().is_err());
        config.page_size = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_page_limit_covers_targets() {
        let mut config = AppConfig::with_defaults("o/r".parse().unwrap());
        config.classifier_enabled = false;

        // 50 pages of 5 hold 250, short of the default 500
        config.page_size = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ISSUE_TARGET_COUNT"));

        config.max_github_api_pages = 100;
        assert!(config.validate().is_ok());

        config.pull_request_target_count = 501;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PULL_REQUEST_TARGET_COUNT"));
    }

    #[test]
    fn test_validate_rejects_huge_target() {
        let mut config = AppConfig::with_defaults("o/r".parse().unwrap());
        config.classifier_enabled = false;
        config.issue_target_count = usize::MAX / 2;
        assert!(matches!(
            config.validate(),
            Err(TallyError::Configuration(_))
        ));
    }

    #[test]
    fn test_item_state_parsing() {
        assert_eq!("open".parse::<ItemState>().unwrap(), ItemState::Open);
        assert_eq!(" ALL ".parse::<ItemState>().unwrap(), ItemState::All);
        assert!("merged".parse::<ItemState>().is_err());
        assert_eq!(ItemState::Closed.to_string(), "closed");
    }
}
