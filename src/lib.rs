pub mod classifier;
pub mod config;
pub mod crossref;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod shutdown;
pub mod types;

use classifier::HuggingFaceClassifier;
use config::AppConfig;
use github::GitHubClient;
use pipeline::Pipeline;

/// The pipeline wired to GitHub and the Hugging Face inference API.
pub type GitHubPipeline = Pipeline<GitHubClient, HuggingFaceClassifier>;

/// Builds the GitHub client and, when enabled, the classifier described by `config`.
pub fn build_pipeline(config: AppConfig) -> anyhow::Result<GitHubPipeline> {
    let source = GitHubClient::new(&config)?;
    let classifier = if config.classifier_enabled {
        Some(HuggingFaceClassifier::new(&config)?)
    } else {
        None
    };

    Ok(Pipeline::new(config, source, classifier))
}
