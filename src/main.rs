use anyhow::Context;
use issue_tally::config::AppConfig;
use issue_tally::shutdown::{cancel_on_shutdown, CancelSignal};
use issue_tally::GitHubPipeline;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when the run was cancelled and only partial results were written.
const PARTIAL_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Load a .env file if present; variables already set take precedence
    dotenvy::dotenv().ok();

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "issue_tally=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (pipeline, deadline) = match setup() {
        Ok(setup) => setup,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let (handle, cancel) = CancelSignal::pair();
    tokio::spawn(cancel_on_shutdown(handle, deadline));

    match pipeline.run(&cancel, &mut std::io::stdout()).await {
        Ok(outcome) if outcome.partial => ExitCode::from(PARTIAL_EXIT_CODE),
        Ok(_) => ExitCode::SUCCESS,
        // the pipeline has already logged the error with the stage it failed in
        Err(_) => ExitCode::FAILURE,
    }
}

fn setup() -> anyhow::Result<(GitHubPipeline, Option<Duration>)> {
    let config = AppConfig::from_env().context("Failed to load configuration from environment")?;
    config.validate()?;

    tracing::info!(
        repo = %config.repository,
        issues = config.issue_target_count,
        pull_requests = config.pull_request_target_count,
        classifier = config.classifier_enabled,
        "Starting run"
    );

    let deadline = config.run_deadline();
    let pipeline = issue_tally::build_pipeline(config)?;

    Ok((pipeline, deadline))
}
