//! Crate-wide error type.
//!
//! Every stage of the pipeline reports failures as a [`TallyError`]. Variants that describe
//! conditions which may clear up on their own (transport failures, timeouts, rate limiting) are
//! flagged by [`TallyError::is_transient`] so the retry policy can tell them apart from failures
//! that retrying cannot fix.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    // :# prints the cause chain using anyhow's alternate formatting
    #[error("network error while {context}: {source:#}")]
    Network {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out after {after:?} while {context}")]
    Timeout { context: String, after: Duration },

    #[error("rate limited while {context}")]
    RateLimited { context: String },

    #[error("GitHub API error while {context}: {message}")]
    GitHubApi { context: String, message: String },

    #[error("malformed response while {context}: {msg}")]
    MalformedResponse { context: String, msg: String },

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("could not write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run cancelled during {0}")]
    Cancelled(Stage),
}

impl TallyError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TallyError::Network { .. } | TallyError::Timeout { .. } | TallyError::RateLimited { .. }
        )
    }

    pub fn network(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        TallyError::Network {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn malformed(context: impl Into<String>, msg: impl Into<String>) -> Self {
        TallyError::MalformedResponse {
            context: context.into(),
            msg: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
