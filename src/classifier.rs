//! Annotates issues with a label predicted by a hosted text-classification model.
//!
//! Issues are sent one at a time, in order. A failure on one issue marks it
//! [`UNCLASSIFIED`] and the run moves on to the next; the failures are collected in the
//! returned [`ClassificationSummary`].

use crate::config::AppConfig;
use crate::error::{Result, TallyError};
use crate::retry::RetryPolicy;
use crate::shutdown::CancelSignal;
use crate::types::Issue;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Label stored on issues that could not be classified.
pub const UNCLASSIFIED: &str = "unclassified";

/// Longest slice of an error body quoted in an error message.
const ERROR_SNIPPET_CHARS: usize = 200;

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Returns the top label the model assigns to `text`.
    async fn classify(&self, text: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a str,
}

/// Client for the Hugging Face inference API.
pub struct HuggingFaceClassifier {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl HuggingFaceClassifier {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let token = config
            .classifier_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                TallyError::Configuration("CLASSIFIER_TOKEN is not set".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.classifier_endpoint(),
            token,
            retry: config.retry_policy(),
            request_timeout: config.request_timeout(),
        })
    }

    async fn request_label(&self, text: &str) -> Result<String> {
        let context = format!("classifying with {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&ClassifyRequest { inputs: text })
            .send()
            .await
            .map_err(|e| self.transport_error(&context, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&context, e))?;

        check_status(&context, status, &body)?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| TallyError::malformed(context.as_str(), e.to_string()))?;

        first_label(&value).ok_or_else(|| {
            TallyError::malformed(
                context.as_str(),
                format!("no label in response: {}", snippet(&body)),
            )
        })
    }

    fn transport_error(&self, context: &str, e: reqwest::Error) -> TallyError {
        if e.is_timeout() {
            TallyError::Timeout {
                context: context.to_string(),
                after: self.request_timeout,
            }
        } else {
            TallyError::network(context, e)
        }
    }
}

#[async_trait]
impl Classifier for HuggingFaceClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        self.retry
            .run("classifying issue", || self.request_label(text))
            .await
    }
}

/// Maps an unsuccessful inference response to the matching error.
///
/// 429 is rate limiting; 5xx (including the 503 returned while a model is loading) may clear
/// up on retry; anything else is a rejection of the request itself.
fn check_status(context: &str, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let message = error_message(body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(TallyError::RateLimited {
            context: context.to_string(),
        })
    } else if status.is_server_error() {
        Err(TallyError::network(
            context,
            anyhow::anyhow!("HTTP {}: {}", status, message),
        ))
    } else {
        Err(TallyError::Classification(format!("HTTP {}: {}", status, message)))
    }
}

/// Extracts the first label of a classification response.
///
/// Accepts both `[{"label": .., "score": ..}, ..]` and the nested `[[{"label": ..}, ..]]`
/// shape the API returns for a single input.
pub fn first_label(response: &Value) -> Option<String> {
    let first = response.as_array()?.first()?;
    let first = match first {
        Value::Array(inner) => inner.first()?,
        other => other,
    };
    first.get("label")?.as_str().map(str::to_owned)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| snippet(body).to_string())
}

fn snippet(body: &str) -> &str {
    truncate_chars(body, ERROR_SNIPPET_CHARS)
}

/// Cuts `text` to at most `max_chars` characters. Zero means no limit.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a classification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationSummary {
    /// Issues that received a predicted label.
    pub classified: usize,
    /// Issues without body text; marked unclassified without a request.
    pub skipped: usize,
    /// Issues whose request failed; marked unclassified.
    pub failures: Vec<ClassificationFailure>,
    /// Issues never reached because the run was cancelled.
    pub not_attempted: usize,
}

impl ClassificationSummary {
    pub fn interrupted(&self) -> bool {
        self.not_attempted > 0
    }
}

/// Sets `predicted_label` on every issue, in order, one request at a time.
///
/// Stops early when `cancel` fires; issues not reached keep `predicted_label` unset.
pub async fn classify_issues<C>(
    classifier: &C,
    issues: &mut [Issue],
    max_input_chars: usize,
    cancel: &CancelSignal,
) -> ClassificationSummary
where
    C: Classifier + ?Sized,
{
    let total = issues.len();
    let mut summary = ClassificationSummary::default();

    for (index, issue) in issues.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            summary.not_attempted = total - index;
            break;
        }

        let input = match issue.body.as_deref().map(str::trim) {
            Some(body) if !body.is_empty() => truncate_chars(body, max_input_chars).to_string(),
            _ => {
                tracing::debug!(url = %issue.url, "Issue has no body text, not classified");
                issue.predicted_label = Some(UNCLASSIFIED.to_string());
                summary.skipped += 1;
                continue;
            }
        };

        let result = tokio::select! {
            result = classifier.classify(&input) => result,
            _ = cancel.cancelled() => {
                summary.not_attempted = total - index;
                break;
            }
        };

        match result {
            Ok(label) => {
                tracing::debug!(url = %issue.url, label = %label, "Classified issue");
                issue.predicted_label = Some(label);
                summary.classified += 1;
            }
            Err(e) => {
                tracing::warn!(url = %issue.url, "Failed to classify issue: {}", e);
                issue.predicted_label = Some(UNCLASSIFIED.to_string());
                summary.failures.push(ClassificationFailure {
                    url: issue.url.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::issue;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    /// Labels by keyword; fails on bodies containing "boom"; records every input it sees.
    struct KeywordClassifier {
        seen: Mutex<Vec<String>>,
    }

    impl KeywordClassifier {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Classifier for KeywordClassifier {
        async fn classify(&self, text: &str) -> Result<String> {
            self.seen.lock().unwrap().push(text.to_string());
            if text.contains("boom") {
                return Err(TallyError::Classification("HTTP 400: bad input".into()));
            }
            let label = if text.contains("crash") { "LABEL_1" } else { "LABEL_0" };
            Ok(label.to_string())
        }
    }

    fn issues_with_bodies(bodies: &[Option<&str>]) -> Vec<Issue> {
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                let mut issue = issue(&format!("u{}", i + 1), created, None, "a", &[]);
                issue.body = body.map(str::to_string);
                issue
            })
            .collect()
    }

    #[test]
    fn test_first_label_flat_and_nested() {
        let flat = json!([{ "label": "LABEL_1", "score": 0.9 }, { "label": "LABEL_0", "score": 0.1 }]);
        let nested = json!([[{ "label": "POSITIVE", "score": 0.7 }]]);

        assert_eq!(first_label(&flat), Some("LABEL_1".to_string()));
        assert_eq!(first_label(&nested), Some("POSITIVE".to_string()));
        assert_eq!(first_label(&json!([])), None);
        assert_eq!(first_label(&json!({ "error": "Model is loading" })), None);
        assert_eq!(first_label(&json!([{ "score": 0.5 }])), None);
    }

    #[test]
    fn test_check_status_mapping() {
        assert!(check_status("c", StatusCode::OK, "[]").is_ok());

        let limited = check_status("c", StatusCode::TOO_MANY_REQUESTS, "").unwrap_err();
        assert!(matches!(limited, TallyError::RateLimited { .. }));

        let loading = check_status(
            "c",
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":"Model distilbert-base-uncased is currently loading","estimated_time":20.0}"#,
        )
        .unwrap_err();
        assert!(loading.is_transient());
        assert!(loading.to_string().contains("currently loading"));

        let rejected = check_status("c", StatusCode::UNAUTHORIZED, r#"{"error":"Invalid token"}"#)
            .unwrap_err();
        assert!(!rejected.is_transient());
        assert_eq!(
            rejected.to_string(),
            "classification failed: HTTP 401 Unauthorized: Invalid token"
        );
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("unbounded", 0), "unbounded");
    }

    #[tokio::test]
    async fn test_classify_issues_isolates_failures() {
        let classifier = KeywordClassifier::new();
        let mut issues = issues_with_bodies(&[
            Some("app crash on start"),
            Some("boom"),
            None,
            Some("   "),
            Some("typo in docs"),
        ]);

        let summary = classify_issues(&classifier, &mut issues, 100, &CancelSignal::never()).await;

        let labels: Vec<Option<&str>> = issues
            .iter()
            .map(|i| i.predicted_label.as_deref())
            .collect();
        assert_eq!(
            labels,
            vec![
                Some("LABEL_1"),
                Some(UNCLASSIFIED),
                Some(UNCLASSIFIED),
                Some(UNCLASSIFIED),
                Some("LABEL_0"),
            ]
        );
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].url, "u2");
        assert!(!summary.interrupted());

        // sequential, input order, blank bodies never sent
        assert_eq!(
            *classifier.seen.lock().unwrap(),
            vec!["app crash on start", "boom", "typo in docs"]
        );
    }

    #[tokio::test]
    async fn test_classify_issues_truncates_input() {
        let classifier = KeywordClassifier::new();
        let mut issues = issues_with_bodies(&[Some("abcdefghij")]);

        classify_issues(&classifier, &mut issues, 4, &CancelSignal::never()).await;

        assert_eq!(*classifier.seen.lock().unwrap(), vec!["abcd"]);
    }

    #[tokio::test]
    async fn test_classify_issues_stops_when_cancelled() {
        let classifier = KeywordClassifier::new();
        let mut issues = issues_with_bodies(&[Some("one"), Some("two")]);
        let (handle, cancel) = CancelSignal::pair();
        handle.cancel();

        let summary = classify_issues(&classifier, &mut issues, 100, &cancel).await;

        assert!(summary.interrupted());
        assert_eq!(summary.not_attempted, 2);
        assert!(issues.iter().all(|i| i.predicted_label.is_none()));
        assert!(classifier.seen.lock().unwrap().is_empty());
    }
}
