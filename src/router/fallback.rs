//! Ordered model fallback.
//!
//! This module encapsulates the fallback algorithm:
//! - Candidates are attempted strictly in order, one call in flight at a time
//! - Failures are classified retryable (next candidate) or fatal (stop)
//! - Upstream statuses are mapped onto typed errors by [`classify_status`]
//! - Skipped candidates are recorded for the `x-relay-fallbacks` header

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;

use super::candidates::CandidateList;
use crate::config::ModelsConfig;
use crate::error::{Error, FailureClass};

/// Matches upstream error text that points at the model itself.
static MODEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)model").expect("static regex is valid"));

/// Upstream error detail is truncated to this many characters.
const MAX_DETAIL_CHARS: usize = 500;

/// Which upstream failures are allowed to advance to the next candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Any 404 counts as a missing model.
    pub retry_on_not_found: bool,
    /// Transport failures, 429 and 5xx advance to the next candidate.
    pub retry_on_server_error: bool,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            retry_on_not_found: true,
            retry_on_server_error: true,
        }
    }
}

impl From<&ModelsConfig> for FallbackPolicy {
    fn from(config: &ModelsConfig) -> Self {
        Self {
            retry_on_not_found: config.retry_on_not_found,
            retry_on_server_error: config.retry_on_server_error,
        }
    }
}

/// Orchestrator state over the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Pending,
    Trying(usize),
    Succeeded(usize),
    Exhausted,
    Failed,
}

impl FallbackState {
    /// State after the attempt at `index` (of `total`) failed with `class`.
    pub fn after_failure(index: usize, total: usize, class: FailureClass) -> Self {
        match class {
            FailureClass::Fatal => FallbackState::Failed,
            FailureClass::Retryable if index + 1 < total => FallbackState::Trying(index + 1),
            FailureClass::Retryable => FallbackState::Exhausted,
        }
    }
}

/// Record of a candidate skipped after a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub model: String,
    /// Upstream HTTP status, `None` when the upstream was never reached.
    pub status: Option<u16>,
}

/// The candidate that succeeded and what its call produced.
#[derive(Debug)]
pub struct Selected<T> {
    pub model: String,
    pub value: T,
}

/// Outcome of the full fallback sequence.
///
/// `attempts` lists every skipped candidate, whether or not a later one
/// succeeded.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub result: std::result::Result<Selected<T>, Error>,
    pub attempts: Vec<AttemptRecord>,
}

/// Format attempt records into the `x-relay-fallbacks` header value.
///
/// Format: `"gpt-4o-mini=404, gpt-4.1-mini=503"`; unreachable upstreams show
/// as `model=error`. Returns `None` if nothing was skipped.
pub fn format_fallbacks_header(attempts: &[AttemptRecord]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }
    Some(
        attempts
            .iter()
            .map(|a| match a.status {
                Some(status) => format!("{}={}", a.model, status),
                None => format!("{}=error", a.model),
            })
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Pull a human-readable message out of an upstream error body.
///
/// Prefers `error.message` / `error.code` from a JSON body and falls back to
/// the raw text.
fn error_detail(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let detail = match error {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(obj) => {
            let message = obj.get("message").and_then(|m| m.as_str()).unwrap_or("");
            let code = obj.get("code").and_then(|c| c.as_str()).unwrap_or("");
            match (message.is_empty(), code.is_empty()) {
                (false, false) => format!("{} ({})", message, code),
                (false, true) => message.to_string(),
                (true, false) => code.to_string(),
                (true, true) => body.to_string(),
            }
        }
        None => body.to_string(),
    };

    detail.chars().take(MAX_DETAIL_CHARS).collect()
}

/// Map a non-2xx upstream response onto a typed error.
pub fn classify_status(model: &str, status: u16, body: &str, policy: &FallbackPolicy) -> Error {
    let detail = error_detail(body);
    let mentions_model = MODEL_MENTION.is_match(&detail);
    let model = model.to_string();

    match status {
        404 if policy.retry_on_not_found || mentions_model => Error::UpstreamModelUnavailable {
            model,
            status,
            detail,
        },
        404 => Error::UpstreamRejected {
            model,
            status,
            detail,
        },
        401 => Error::UpstreamAuth {
            model,
            status,
            detail,
        },
        _ if mentions_model => Error::UpstreamModelUnavailable {
            model,
            status,
            detail,
        },
        403 => Error::UpstreamAuth {
            model,
            status,
            detail,
        },
        400 | 422 => Error::UpstreamMalformedRequest {
            model,
            status,
            detail,
        },
        429 | 500..=599 => Error::UpstreamUnavailable {
            model,
            status,
            detail,
            retryable: policy.retry_on_server_error,
        },
        _ => Error::UpstreamRejected {
            model,
            status,
            detail,
        },
    }
}

/// Map a failure to reach the upstream at all onto a typed error.
pub fn classify_transport(model: &str, err: &reqwest::Error, policy: &FallbackPolicy) -> Error {
    Error::UpstreamUnavailable {
        model: model.to_string(),
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        detail: err.to_string(),
        retryable: policy.retry_on_server_error,
    }
}

/// Walk the candidate list until one call succeeds.
///
/// Algorithm:
/// 1. `Pending` moves to `Trying(0)`
/// 2. `Trying(i)` issues exactly one call for candidate `i`
/// 3. On success: `Succeeded(i)`, return the chosen model and its value
/// 4. On a fatal error: `Failed`, return that error untouched
/// 5. On a retryable error: record it, then `Trying(i + 1)` or `Exhausted`
/// 6. `Exhausted`: return `UpstreamAllCandidatesFailed` with the last diagnostic
///
/// The next call is only issued after the previous one has resolved.
pub async fn run_fallback<T, F, Fut>(candidates: &CandidateList, send_request: F) -> FallbackOutcome<T>
where
    F: Fn(&str) -> Fut,
    Fut: Future<Output = std::result::Result<T, Error>>,
{
    let models = candidates.models();
    let mut attempts = Vec::new();
    let mut selected: Option<T> = None;
    let mut last_error: Option<Error> = None;
    let mut state = FallbackState::Pending;

    loop {
        state = match state {
            FallbackState::Pending => FallbackState::Trying(0),
            FallbackState::Trying(index) => {
                let model = &models[index];
                tracing::debug!(model = %model, position = index + 1, total = models.len(), "Trying candidate model");

                match send_request(model.as_str()).await {
                    Ok(value) => {
                        selected = Some(value);
                        FallbackState::Succeeded(index)
                    }
                    Err(err) => {
                        let class = err.failure_class();
                        let next = FallbackState::after_failure(index, models.len(), class);

                        if next == FallbackState::Failed {
                            tracing::error!(model = %model, error = %err, "Fatal upstream failure; not falling back");
                        } else {
                            tracing::warn!(model = %model, error = %err, "Candidate model failed; falling back");
                            attempts.push(AttemptRecord {
                                model: model.clone(),
                                status: err.upstream_status().filter(|s| *s != 0),
                            });
                        }
                        last_error = Some(err);
                        next
                    }
                }
            }
            FallbackState::Succeeded(_) | FallbackState::Exhausted | FallbackState::Failed => break,
        };
    }

    let result = match (state, selected, last_error) {
        (FallbackState::Succeeded(index), Some(value), _) => {
            let model = models[index].clone();
            tracing::info!(model = %model, skipped = attempts.len(), "Selected model");
            Ok(Selected { model, value })
        }
        (FallbackState::Failed, _, Some(err)) => Err(err),
        (_, _, last) => Err(Error::UpstreamAllCandidatesFailed {
            attempted: models.len(),
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate was attempted".to_string()),
        }),
    };

    FallbackOutcome { result, attempts }
}
