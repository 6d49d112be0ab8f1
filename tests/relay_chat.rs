//! Integration tests for POST /chat.
//!
//! Verifies that:
//! - Retryable candidate failures fall through to the next model, in order
//! - Fatal failures stop after exactly one upstream call
//! - Batch replies are extracted and empty replies surface as errors
//! - Streaming returns the concatenated deltas as plain text
//! - Missing credentials and invalid payloads never reach the upstream
//!
//! Uses lightweight mock HTTP servers (axum on random ports) as fake
//! upstreams, and `tower::ServiceExt::oneshot` for the relay router.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use http::Request;
use tower::ServiceExt;

use chat_relay::config::{ApiKey, Config, ModelsConfig, RequestShape, UpstreamConfig};
use chat_relay::proxy::{create_router, AppState};

type Calls = Arc<Mutex<Vec<serde_json::Value>>>;

/// Start a mock upstream that records every request body and answers with
/// `respond(model, stream)`. Returns the endpoint URL and the call log.
async fn start_mock_upstream(respond: fn(&str, bool) -> Response) -> (String, Calls) {
    use axum::{routing::post, Json, Router};

    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let calls_inner = calls.clone();

    let app = Router::new().route(
        "/v1/responses",
        post(move |Json(body): Json<serde_json::Value>| {
            let calls = calls_inner.clone();
            async move {
                let model = body["model"].as_str().unwrap_or_default().to_string();
                let stream = body["stream"].as_bool().unwrap_or(false);
                calls.lock().unwrap().push(body);
                respond(&model, stream)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (
        format!("http://127.0.0.1:{}/v1/responses", addr.port()),
        calls,
    )
}

fn called_models(calls: &Calls) -> Vec<String> {
    calls
        .lock()
        .unwrap()
        .iter()
        .map(|b| b["model"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn model_not_found(model: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": {
                "message": format!("The model `{}` does not exist", model),
                "code": "model_not_found"
            }
        })),
    )
        .into_response()
}

fn reply(text: &str) -> Response {
    axum::Json(serde_json::json!({ "output_text": text })).into_response()
}

fn sse(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

const HELLO_STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
data: [DONE]\n\n";

/// Build a relay app pointed at `url` with the given candidate models.
fn setup_app(url: String, api_key: Option<&str>, models: &[&str]) -> axum::Router {
    let config = Config {
        upstream: UpstreamConfig {
            url,
            api_key: api_key.map(ApiKey::from),
            shape: RequestShape::Prompt,
            timeout_secs: 5,
            connect_timeout_secs: 5,
        },
        models: ModelsConfig {
            default: models.iter().map(|m| m.to_string()).collect(),
            ..ModelsConfig::default()
        },
        ..Config::default()
    };
    create_router(AppState::from_config(config).expect("build app state"))
}

fn chat_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap_or_default()
}

#[tokio::test]
async fn test_status_routes() {
    let app = setup_app("http://127.0.0.1:9".to_string(), None, &["m1"]);

    for uri in ["/", "/health"] {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "chat-relay");
    }
}

#[tokio::test]
async fn test_batch_falls_back_in_order() {
    let (url, calls) = start_mock_upstream(|model, _| match model {
        "m3" => reply("hi there"),
        other => model_not_found(other),
    })
    .await;
    let app = setup_app(url, Some("sk-test"), &["m1", "m2", "m3"]);

    let response = app
        .oneshot(chat_request("/chat", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers.get("x-relay-model").unwrap(), "m3");
    assert_eq!(headers.get("x-relay-fallbacks").unwrap(), "m1=404, m2=404");
    let request_id = headers.get("x-relay-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());

    assert_eq!(body_json(response).await, serde_json::json!({"reply": "hi there"}));
    assert_eq!(called_models(&calls), vec!["m1", "m2", "m3"]);

    let first = calls.lock().unwrap()[0].clone();
    assert_eq!(first, serde_json::json!({"model": "m1", "input": "hello"}));
}

#[tokio::test]
async fn test_fatal_failure_makes_one_call() {
    let (url, calls) = start_mock_upstream(|_, _| {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}
            })),
        )
            .into_response()
    })
    .await;
    let app = setup_app(url, Some("sk-wrong"), &["m1", "m2", "m3"]);

    let response = app
        .oneshot(chat_request("/chat", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().get("x-relay-model").is_none());
    assert!(response.headers().get("x-relay-request-id").is_some());
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Incorrect API key"));
    assert_eq!(called_models(&calls), vec!["m1"]);
}

#[tokio::test]
async fn test_all_candidates_exhausted() {
    let (url, calls) = start_mock_upstream(|_, _| StatusCode::SERVICE_UNAVAILABLE.into_response()).await;
    let app = setup_app(url, Some("sk-test"), &["m1", "m2"]);

    let response = app
        .oneshot(chat_request("/chat", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.headers().get("x-relay-fallbacks").unwrap(),
        "m1=503, m2=503"
    );
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("All 2 candidate models failed"));
    assert_eq!(called_models(&calls).len(), 2);
}

#[tokio::test]
async fn test_empty_reply_is_an_error() {
    let (url, calls) = start_mock_upstream(|_, _| {
        axum::Json(serde_json::json!({"id": "resp_1", "status": "completed"})).into_response()
    })
    .await;
    let app = setup_app(url, Some("sk-test"), &["m1", "m2"]);

    let response = app
        .oneshot(chat_request("/chat", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_json(response).await["error"].is_string());
    assert_eq!(called_models(&calls), vec!["m1"]);
}

#[tokio::test]
async fn test_missing_credential_makes_no_call() {
    let (url, calls) = start_mock_upstream(|_, _| reply("unreachable")).await;
    let app = setup_app(url, None, &["m1", "m2"]);

    let response = app
        .oneshot(chat_request("/chat", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(response).await["error"].is_string());
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_payloads_rejected_without_upstream_call() {
    let (url, calls) = start_mock_upstream(|_, _| reply("unreachable")).await;
    let app = setup_app(url, Some("sk-test"), &["m1"]);

    let bodies = vec![
        Body::from(r#"{"message": ""}"#),
        Body::from(r#"{"messages": []}"#),
        Body::from("not json"),
        Body::from(format!(r#"{{"message": "{}"}}"#, "x".repeat(64 * 1024))),
    ];

    for body in bodies {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_by_query_returns_plain_text() {
    let (url, calls) = start_mock_upstream(|_, stream| {
        if stream {
            sse(HELLO_STREAM)
        } else {
            StatusCode::BAD_REQUEST.into_response()
        }
    })
    .await;
    let app = setup_app(url, Some("sk-test"), &["m1"]);

    let response = app
        .oneshot(chat_request("/chat?stream=1", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
    assert_eq!(headers.get("x-relay-model").unwrap(), "m1");

    assert_eq!(body_text(response).await, "Hello");
    assert_eq!(calls.lock().unwrap()[0]["stream"], true);
}

#[tokio::test]
async fn test_stream_by_accept_header_and_body_flag() {
    let (url, _calls) = start_mock_upstream(|_, _| sse(HELLO_STREAM)).await;
    let app = setup_app(url, Some("sk-test"), &["m1"]);

    let by_accept = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::from(r#"{"message": "hello"}"#))
        .unwrap();
    let response = app.clone().oneshot(by_accept).await.unwrap();
    assert_eq!(body_text(response).await, "Hello");

    let response = app
        .oneshot(chat_request(
            "/chat",
            serde_json::json!({"message": "hello", "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "Hello");
}

#[tokio::test]
async fn test_stream_falls_back_before_first_byte() {
    let (url, calls) = start_mock_upstream(|model, _| match model {
        "m2" => sse(HELLO_STREAM),
        other => model_not_found(other),
    })
    .await;
    let app = setup_app(url, Some("sk-test"), &["m1", "m2"]);

    let response = app
        .oneshot(chat_request("/chat?stream=true", serde_json::json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-relay-model").unwrap(), "m2");
    assert_eq!(response.headers().get("x-relay-fallbacks").unwrap(), "m1=404");
    assert_eq!(body_text(response).await, "Hello");
    assert_eq!(called_models(&calls), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_caller_models_and_turns() {
    let (url, calls) = start_mock_upstream(|_, _| reply("ok")).await;
    let app = setup_app(url, Some("sk-test"), &["m1"]);

    let response = app
        .oneshot(chat_request(
            "/chat",
            serde_json::json!({
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ],
                "models": ["custom"]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-relay-model").unwrap(), "custom");

    let sent = calls.lock().unwrap()[0].clone();
    assert_eq!(sent["model"], "custom");
    assert_eq!(sent["input"], "system: be brief\nuser: hello");
}
