//! Drives one analysis run from fetching to persisting.
//!
//! A run moves through the stages of [`Stage`] in order:
//! 1. Fetching the issue window and the pull request window from GitHub.
//! 2. Aggregating issue counts and close durations.
//! 3. Cross-referencing pull requests to issue labels, then rendering the report.
//! 4. Classifying every issue (when a classifier is configured).
//! 5. Persisting the annotated issues as a JSON array.
//!
//! Any error ends the run in [`Stage::Failed`] without writing output. The one exception is a
//! cancellation during classification: what has been computed so far is written to a separate
//! partial file and the outcome is flagged as partial.

use crate::classifier::{classify_issues, ClassificationSummary, Classifier};
use crate::config::AppConfig;
use crate::crossref::cross_reference;
use crate::error::{Result, TallyError};
use crate::fetcher::fetch_all;
use crate::github::GitHubSource;
use crate::metrics::{self, IssueSummary};
use crate::report::{self, ChartStyle};
use crate::shutdown::CancelSignal;
use crate::types::Issue;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    Fetching,
    Aggregating,
    CrossReferencing,
    Classifying,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetching => "fetching",
            Stage::Aggregating => "aggregating",
            Stage::CrossReferencing => "cross-referencing",
            Stage::Classifying => "classifying",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: IssueSummary,
    pub label_pr_counts: Vec<(String, usize)>,
    /// `None` when classification is disabled.
    pub classification: Option<ClassificationSummary>,
    /// The file the issues were written to.
    pub output_path: PathBuf,
    /// Set when the run was cancelled during classification and only partial results were saved.
    pub partial: bool,
}

pub struct Pipeline<S, C> {
    source: S,
    classifier: Option<C>,
    config: AppConfig,
}

impl<S, C> Pipeline<S, C>
where
    S: GitHubSource,
    C: Classifier,
{
    pub fn new(config: AppConfig, source: S, classifier: Option<C>) -> Self {
        Self {
            source,
            classifier,
            config,
        }
    }

    /// Runs every stage, writing the rendered report to `out`.
    pub async fn run<W: Write>(&self, cancel: &CancelSignal, out: &mut W) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut stage = Stage::Fetching;

        match self.run_stages(&mut stage, cancel, out).await {
            Ok(outcome) => {
                tracing::info!(
                    repo = %self.config.repository,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    partial = outcome.partial,
                    "Run finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    repo = %self.config.repository,
                    stage = %stage,
                    "Run failed: {}",
                    e
                );
                enter(&mut stage, Stage::Failed);
                Err(e)
            }
        }
    }

    async fn run_stages<W: Write>(
        &self,
        stage: &mut Stage,
        cancel: &CancelSignal,
        out: &mut W,
    ) -> Result<RunOutcome> {
        let config = &self.config;
        let retry = config.retry_policy();

        enter(stage, Stage::Fetching);
        let mut issues = until_cancelled(
            Stage::Fetching,
            cancel,
            fetch_all("issues", config.issue_window(), &retry, |page, per_page| {
                self.source.issues_page(page, per_page)
            }),
        )
        .await?;

        let pull_requests = until_cancelled(
            Stage::Fetching,
            cancel,
            fetch_all(
                "pull requests",
                config.pull_request_window(),
                &retry,
                |page, per_page| self.source.pull_requests_page(page, per_page),
            ),
        )
        .await?;

        tracing::info!(
            repo = %config.repository,
            issues = issues.len(),
            pull_requests = pull_requests.len(),
            "Fetched windows"
        );

        enter(stage, Stage::Aggregating);
        let summary = metrics::aggregate(&issues);

        enter(stage, Stage::CrossReferencing);
        let label_pr_counts = cross_reference(&issues, &pull_requests);

        let style = ChartStyle {
            width: config.chart_width,
            max_bars: config.chart_max_bars,
        };
        let rendered = report::render_report(&summary, &label_pr_counts, style);
        if let Err(e) = out.write_all(rendered.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write report: {}", e);
        }
        tracing::info!("{}", report::average_close_line(&summary));

        let classification = match &self.classifier {
            Some(classifier) => {
                if cancel.is_cancelled() {
                    return Err(TallyError::Cancelled(Stage::CrossReferencing));
                }
                enter(stage, Stage::Classifying);
                let result = classify_issues(
                    classifier,
                    &mut issues,
                    config.classifier_max_input_chars,
                    cancel,
                )
                .await;
                log_classification(&result);
                Some(result)
            }
            None => {
                tracing::info!("Classification disabled, skipping");
                None
            }
        };

        let partial = classification
            .as_ref()
            .is_some_and(ClassificationSummary::interrupted);

        enter(stage, Stage::Persisting);
        let output_path = if partial {
            partial_path(&config.output_path)
        } else {
            config.output_path.clone()
        };
        persist(&output_path, &issues).await?;
        if partial {
            tracing::warn!(
                path = %output_path.display(),
                "Run cancelled during classification; partial results saved"
            );
        } else {
            tracing::info!(path = %output_path.display(), count = issues.len(), "Saved issues");
        }

        enter(stage, Stage::Done);
        Ok(RunOutcome {
            summary,
            label_pr_counts,
            classification,
            output_path,
            partial,
        })
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "Stage transition");
    *stage = next;
}

async fn until_cancelled<T>(
    stage: Stage,
    cancel: &CancelSignal,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(TallyError::Cancelled(stage)),
    }
}

fn log_classification(summary: &ClassificationSummary) {
    tracing::info!(
        classified = summary.classified,
        skipped = summary.skipped,
        failed = summary.failures.len(),
        not_attempted = summary.not_attempted,
        "Classification finished"
    );
    if !summary.failures.is_empty() {
        let urls: Vec<&str> = summary.failures.iter().map(|f| f.url.as_str()).collect();
        tracing::warn!("Issues left unclassified after errors: {}", urls.join(", "));
    }
}

/// `classified_issues.json` becomes `classified_issues.partial.json`.
pub fn partial_path(path: &Path) -> PathBuf {
    path.with_extension("partial.json")
}

/// Writes `issues` as a pretty-printed JSON array, replacing `path` in one step.
pub async fn persist(path: &Path, issues: &[Issue]) -> Result<()> {
    let persistence = |source: std::io::Error| TallyError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(issues).map_err(|e| persistence(e.into()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(persistence)?;
    }

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    if let Err(e) = tokio::fs::write(&tmp, json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(persistence(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            tracing::warn!(path = %tmp.display(), "Failed to remove temp file: {}", cleanup);
        }
        return Err(persistence(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("out/classified_issues.json")),
            PathBuf::from("out/classified_issues.partial.json")
        );
        assert_eq!(
            partial_path(Path::new("issues")),
            PathBuf::from("issues.partial.json")
        );
    }

    #[tokio::test]
    async fn test_persist_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/issues.json");

        persist(&path, &[]).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim(), "[]");
        assert!(!dir.path().join("nested/issues.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory cannot be replaced by a file
        let path = dir.path().join("issues.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let result = persist(&path, &[]).await;

        assert!(matches!(result, Err(TallyError::Persistence { .. })));
        assert!(!dir.path().join("issues.json.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::CrossReferencing.to_string(), "cross-referencing");
        assert_eq!(
            TallyError::Cancelled(Stage::Fetching).to_string(),
            "run cancelled during fetching"
        );
    }
}
