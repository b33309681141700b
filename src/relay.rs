//! Local relay: `POST /api/chat` → OpenRouter, streamed back byte for byte.
//!
//! The relay holds the API key so callers never see it. It never looks inside
//! the event stream; `[DONE]` and everything else passes through untouched.
//! Each request is independent and re-reads the key.

use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::ApiKeySource;
use crate::error::ChatError;
use crate::openrouter::{OpenRouterClient, UpstreamSettings};

/// Requests may carry base64 images.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct RelayState {
    pub http: reqwest::Client,
    pub keys: ApiKeySource,
    pub settings: UpstreamSettings,
}

impl RelayState {
    pub fn new(keys: ApiKeySource, settings: UpstreamSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            keys,
            settings,
        }
    }
}

/// Both fields are optional so a missing one can be answered with our own 400.
#[derive(Debug, Deserialize)]
struct RelayChatRequest {
    model: Option<String>,
    /// Forwarded verbatim, so multimodal content parts survive.
    messages: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

fn error_response(status: StatusCode, error: &str, details: Option<String>) -> Response {
    let body = match details {
        Some(details) => json!({ "error": error, "details": details }),
        None => json!({ "error": error }),
    };
    (status, Json(body)).into_response()
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn handle_chat(State(state): State<RelayState>, body: Bytes) -> Response {
    let api_key = match state.keys.load() {
        Ok(key) => key,
        Err(e) => {
            tracing::error!("{}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "API Key not found on server",
                None,
            );
        }
    };

    let request = serde_json::from_slice::<RelayChatRequest>(&body).ok();
    let Some((model, messages)) = request.and_then(|r| Some((r.model?, r.messages?))) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing messages or model", None);
    };

    let count = messages.as_array().map(Vec::len).unwrap_or(0);
    tracing::info!("Relaying {} messages to {}", count, model);

    let client = OpenRouterClient::with_http(state.http.clone(), &api_key, state.settings.clone());
    match client.open_stream(&model, &messages).await {
        Ok(upstream) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            // Dropped with the response when the local client goes away,
            // which closes the upstream connection too.
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response(),
        Err(ChatError::Upstream { status, body }) => error_response(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            "Provider Error",
            Some(body),
        ),
        Err(e) => {
            tracing::error!("Relay request failed: {}", e);
            let details = match e {
                ChatError::Http(inner) => inner.to_string(),
                other => other.to_string(),
            };
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                Some(details),
            )
        }
    }
}

/// Build the relay router (`GET /health`, `POST /api/chat`).
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM; in-flight streams finish first.
pub async fn run_relay(state: RelayState, bind_addr: &str) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Relay listening on http://{} (Ctrl+C to stop)", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn state_with_key_file(path: std::path::PathBuf) -> RelayState {
        RelayState::new(
            ApiKeySource::file(path),
            UpstreamSettings::relay_defaults("127.0.0.1:3000").with_base_url("http://127.0.0.1:9"),
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok_with_timestamp() {
        let app = router(state_with_key_file("/nonexistent/APIKEY.txt".into()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn missing_key_is_a_server_error() {
        let app = router(state_with_key_file("/nonexistent/APIKEY.txt".into()));
        let response = app
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model":"m","messages":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({"error": "API Key not found on server"}));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("APIKEY.txt");
        std::fs::write(&key, "sk-test\n").unwrap();

        for body in [r#"{"model":"m"}"#, r#"{"messages":[]}"#, "not json"] {
            let app = router(state_with_key_file(key.clone()));
            let response = app
                .oneshot(
                    Request::post("/api/chat")
                        .header("content-type", "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(json_body(response).await, json!({"error": "Missing messages or model"}));
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_internal_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("APIKEY.txt");
        std::fs::write(&key, "sk-test").unwrap();

        let app = router(state_with_key_file(key));
        let response = app
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert!(body["details"].is_string());
    }
}
