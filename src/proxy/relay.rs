//! The "relay chat" operation.
//!
//! Resolves candidates, runs the fallback sequence against the upstream,
//! and hands back either the extracted batch reply or the live streaming
//! response for forwarding.

use super::assemble::assemble_reply;
use super::types::ChatRequest;
use super::upstream::UpstreamClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::router::{
    classify_status, classify_transport, run_fallback, AttemptRecord, CandidateList,
    FallbackPolicy, Selected,
};

/// Whether the caller gets one aggregated reply or a token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Batch,
    Stream,
}

impl Mode {
    pub fn is_stream(self) -> bool {
        self == Mode::Stream
    }
}

/// Payload of a successful relay.
#[derive(Debug)]
pub enum RelayReply {
    /// Final reply text.
    Batch(String),
    /// Live upstream response whose body still has to be decoded.
    Stream(reqwest::Response),
}

/// Result of one relay call plus the candidates skipped on the way.
#[derive(Debug)]
pub struct RelayOutcome {
    pub result: Result<Selected<RelayReply>>,
    pub attempts: Vec<AttemptRecord>,
}

/// Stateless relay shared by all requests.
#[derive(Debug, Clone)]
pub struct Relay {
    upstream: UpstreamClient,
    default_models: Vec<String>,
    policy: FallbackPolicy,
}

impl Relay {
    pub fn new(upstream: UpstreamClient, default_models: Vec<String>, policy: FallbackPolicy) -> Self {
        Self {
            upstream,
            default_models,
            policy,
        }
    }

    /// Build the relay from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            UpstreamClient::from_config(&config.upstream)?,
            config.models.default.clone(),
            FallbackPolicy::from(&config.models),
        ))
    }

    /// Relay one chat request.
    ///
    /// `models` overrides the default candidate order when given. Candidates
    /// are attempted one at a time; only the final outcome is reported.
    pub async fn relay_chat(
        &self,
        request: &ChatRequest,
        mode: Mode,
        models: Option<Vec<String>>,
    ) -> RelayOutcome {
        let candidates = match CandidateList::resolve(models, &self.default_models) {
            Ok(candidates) => candidates,
            Err(e) => {
                return RelayOutcome {
                    result: Err(e),
                    attempts: Vec::new(),
                }
            }
        };

        tracing::info!(
            kind = request.kind(),
            stream = mode.is_stream(),
            candidates = candidates.len(),
            "Relaying chat request"
        );

        let outcome = run_fallback(&candidates, |model| {
            let model = model.to_string();
            async move { self.attempt(&model, request, mode).await }
        })
        .await;

        let result = match outcome.result {
            Ok(Selected { model, value }) => match mode {
                Mode::Stream => Ok(Selected {
                    model,
                    value: RelayReply::Stream(value),
                }),
                Mode::Batch => read_batch_reply(value).await.map(|reply| Selected {
                    model,
                    value: RelayReply::Batch(reply),
                }),
            },
            Err(e) => Err(e),
        };

        RelayOutcome {
            result,
            attempts: outcome.attempts,
        }
    }

    /// One candidate attempt: send, then turn a non-2xx status into a typed error.
    async fn attempt(
        &self,
        model: &str,
        request: &ChatRequest,
        mode: Mode,
    ) -> Result<reqwest::Response> {
        let response = match self.upstream.send(model, request, mode.is_stream()).await {
            Ok(response) => response,
            Err(Error::Http(e)) => return Err(classify_transport(model, &e, &self.policy)),
            Err(e) => return Err(e),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(model = %model, status = %status, error = %e, "Failed to read upstream error body");
                String::new()
            }
        };
        tracing::debug!(model = %model, status = %status, body = %body, "Upstream returned error status");
        Err(classify_status(model, status.as_u16(), &body, &self.policy))
    }
}

async fn read_batch_reply(response: reqwest::Response) -> Result<String> {
    let body = response.bytes().await?;
    assemble_reply(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, RequestShape, UpstreamConfig};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay(url: String, api_key: Option<&str>) -> Relay {
        let upstream = UpstreamClient::from_config(&UpstreamConfig {
            url,
            api_key: api_key.map(ApiKey::from),
            shape: RequestShape::Prompt,
            timeout_secs: 5,
            connect_timeout_secs: 5,
        })
        .unwrap();
        Relay::new(
            upstream,
            vec!["d1".to_string(), "d2".to_string()],
            FallbackPolicy::default(),
        )
    }

    fn hello() -> ChatRequest {
        ChatRequest::Message("hello".to_string())
    }

    #[tokio::test]
    async fn test_missing_credential_never_calls_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = relay(server.uri(), None)
            .relay_chat(&hello(), Mode::Batch, None)
            .await;

        assert!(matches!(outcome.result, Err(Error::AuthConfig(_))));
        assert!(outcome.attempts.is_empty());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_batch_reply_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"output_text": "hi there"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = relay(server.uri(), Some("sk-test"))
            .relay_chat(&hello(), Mode::Batch, None)
            .await;

        let selected = outcome.result.unwrap();
        assert_eq!(selected.model, "d1");
        match selected.value {
            RelayReply::Batch(reply) => assert_eq!(reply, "hi there"),
            other => panic!("expected batch reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_reply_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = relay(server.uri(), Some("sk-test"))
            .relay_chat(&hello(), Mode::Batch, None)
            .await;

        assert!(matches!(outcome.result, Err(Error::UpstreamEmptyReply)));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unreachable_upstream_exhausts_candidates() {
        // Nothing listens on port 9 locally.
        let outcome = relay("http://127.0.0.1:9/v1/responses".to_string(), Some("sk-test"))
            .relay_chat(&hello(), Mode::Batch, None)
            .await;

        assert!(matches!(
            outcome.result,
            Err(Error::UpstreamAllCandidatesFailed { attempted: 2, .. })
        ));
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts.iter().all(|a| a.status.is_none()));
    }

    #[tokio::test]
    async fn test_truncated_error_body_still_classified_by_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Promises 100 body bytes, sends 7, then hangs up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
                    )
                    .await;
            }
        });

        let outcome = relay(format!("http://{}/v1/responses", addr), Some("sk-test"))
            .relay_chat(&hello(), Mode::Batch, None)
            .await;

        assert!(matches!(
            outcome.result,
            Err(Error::UpstreamAllCandidatesFailed { attempted: 2, .. })
        ));
        assert_eq!(
            outcome.attempts.iter().map(|a| a.status).collect::<Vec<_>>(),
            vec![Some(503), Some(503)]
        );
    }

    #[tokio::test]
    async fn test_invalid_caller_models_rejected_before_upstream() {
        let outcome = relay("http://127.0.0.1:9".to_string(), Some("sk-test"))
            .relay_chat(&hello(), Mode::Batch, Some(vec![]))
            .await;
        assert!(matches!(outcome.result, Err(Error::Validation(_))));
    }
}
