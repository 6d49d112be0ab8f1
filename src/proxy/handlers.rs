//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{Extension, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::assemble::forward_stream;
use super::relay::{Mode, RelayReply};
use super::server::{AppState, RequestId};
use super::stream::{FrameDecoder, Framing};
use super::types::ChatReply;
use super::validate::validate_payload;
use crate::error::Error;
use crate::router::{format_fallbacks_header, AttemptRecord};

/// Response header: correlation ID (UUID v4).
pub const RELAY_REQUEST_ID_HEADER: &str = "x-relay-request-id";
/// Response header: candidate model that produced the reply.
pub const RELAY_MODEL_HEADER: &str = "x-relay-model";
/// Response header: candidates skipped before the final one, e.g. "m1=404, m2=error".
pub const RELAY_FALLBACKS_HEADER: &str = "x-relay-fallbacks";

/// Streamed bodies are passed through proxies unbuffered.
const ACCEL_BUFFERING_HEADER: &str = "x-accel-buffering";

/// Query parameters accepted on POST /chat.
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub stream: Option<String>,
}

/// Successful request: the response plus metadata for headers.
struct ChatOutcome {
    response: Response,
    model: String,
    attempts: Vec<AttemptRecord>,
}

/// Failed request: the error plus whatever candidates were skipped first.
struct ChatFailure {
    error: Error,
    attempts: Vec<AttemptRecord>,
}

impl From<Error> for ChatFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            attempts: Vec::new(),
        }
    }
}

/// Whether the caller asked for a token stream.
///
/// Any one of `?stream=1|true`, an `Accept` header mentioning `stream`
/// (which covers `text/event-stream`), or `"stream": true` in the body.
fn wants_stream(query: &ChatQuery, headers: &HeaderMap, body_flag: Option<bool>) -> bool {
    let by_query = query
        .stream
        .as_deref()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let by_accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("stream"))
        .unwrap_or(false);

    by_query || by_accept || body_flag == Some(true)
}

/// Attach relay metadata headers to a response.
///
/// The request ID is always present. The model is present once a candidate
/// has succeeded; the fallbacks header only when a candidate was skipped.
fn attach_relay_headers(
    response: &mut Response,
    request_id: &str,
    model: Option<&str>,
    attempts: &[AttemptRecord],
) {
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(RELAY_REQUEST_ID_HEADER), value);
    }

    if let Some(value) = model.and_then(|m| HeaderValue::from_str(m).ok()) {
        headers.insert(HeaderName::from_static(RELAY_MODEL_HEADER), value);
    }

    if let Some(value) =
        format_fallbacks_header(attempts).and_then(|f| HeaderValue::from_str(&f).ok())
    {
        headers.insert(HeaderName::from_static(RELAY_FALLBACKS_HEADER), value);
    }
}

/// Handle POST /chat
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let correlation_id = request_id.0.to_string();
    let span = tracing::info_span!("chat", request_id = %correlation_id);

    let result = execute_chat(&state, &query, &headers, body)
        .instrument(span)
        .await;

    match result {
        Ok(outcome) => {
            let mut response = outcome.response;
            attach_relay_headers(
                &mut response,
                &correlation_id,
                Some(&outcome.model),
                &outcome.attempts,
            );
            response
        }
        Err(failure) => {
            let mut response = failure.error.into_response();
            attach_relay_headers(&mut response, &correlation_id, None, &failure.attempts);
            response
        }
    }
}

/// Validate, choose the mode, relay, then build the client response.
async fn execute_chat(
    state: &AppState,
    query: &ChatQuery,
    headers: &HeaderMap,
    body: Body,
) -> std::result::Result<ChatOutcome, ChatFailure> {
    let max_bytes = state.config.limits.max_body_bytes;

    // One byte over the limit is enough for the validator to reject it.
    let raw = axum::body::to_bytes(body, max_bytes.saturating_add(1))
        .await
        .map_err(|e| Error::Validation(format!("failed to read request body: {}", e)))?;

    let payload = validate_payload(&raw, max_bytes)?;
    let mode = if wants_stream(query, headers, payload.stream) {
        Mode::Stream
    } else {
        Mode::Batch
    };

    tracing::info!(
        kind = payload.request.kind(),
        stream = mode.is_stream(),
        "Received chat request"
    );

    let outcome = state
        .relay
        .relay_chat(&payload.request, mode, payload.models)
        .await;

    match outcome.result {
        Ok(selected) => {
            let response = match selected.value {
                RelayReply::Batch(reply) => Json(ChatReply { reply }).into_response(),
                RelayReply::Stream(upstream) => stream_response(upstream),
            };
            Ok(ChatOutcome {
                response,
                model: selected.model,
                attempts: outcome.attempts,
            })
        }
        Err(error) => {
            tracing::error!(error = %error, "Chat request failed");
            Err(ChatFailure {
                error,
                attempts: outcome.attempts,
            })
        }
    }
}

/// Start forwarding an upstream stream and return the plain-text client body.
///
/// The forwarder runs in its own task and writes into a one-slot channel that
/// backs the response body. Dropping the body closes the channel, which the
/// forwarder sees as a disconnect.
fn stream_response(upstream: reqwest::Response) -> Response {
    let framing = Framing::from_content_type(
        upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );
    let (tx, rx) = mpsc::channel(1);
    let chunks = Box::pin(upstream.bytes_stream());

    tokio::spawn(
        async move {
            match forward_stream(chunks, FrameDecoder::new(framing), tx).await {
                Ok(summary) => tracing::info!(
                    deltas = summary.deltas,
                    bytes = summary.bytes,
                    done = summary.done_received,
                    "Stream finished"
                ),
                Err(Error::ClientDisconnected) => {}
                Err(e) => tracing::error!(error = %e, "Stream forwarding failed"),
            }
        }
        .in_current_span(),
    );

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static(ACCEL_BUFFERING_HEADER),
        HeaderValue::from_static("no"),
    );
    response
}

/// Handle GET / and GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay"
    }))
}
