//! Where replies come from: OpenRouter directly, or a local relay in front of it.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ApiKeySource, Config};
use crate::error::ChatError;
use crate::openrouter::{OpenRouterClient, UpstreamSettings};
use crate::state::ChatMessage;
use crate::stream::{pump, TokenSink};

/// Raw response body, chunk by chunk.
pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

#[derive(Serialize)]
struct RelayRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

/// Error body the relay answers with.
#[derive(Debug, Deserialize)]
pub struct RelayErrorBody {
    pub error: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl RelayErrorBody {
    /// Provider details when present, otherwise the relay's own message.
    fn into_message(self) -> String {
        match self.details {
            Some(serde_json::Value::String(details)) => details,
            Some(details) => details.to_string(),
            None => self.error,
        }
    }
}

/// Client for `POST /api/chat` on a relay started with `orchat serve`.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&RelayRequest { model, messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<RelayErrorBody>(&text) {
                Ok(parsed) => parsed.into_message(),
                Err(_) => text,
            };
            tracing::warn!("Relay error ({}): {}", status, body);
            return Err(ChatError::upstream(status.as_u16(), body));
        }

        Ok(response)
    }
}

#[derive(Clone)]
pub enum Backend {
    Direct(OpenRouterClient),
    Relay(RelayClient),
}

impl Backend {
    /// A relay URL (flag first, then config) selects the relay; otherwise the
    /// API key must be available.
    pub fn from_config(
        config: &Config,
        relay_url: Option<&str>,
        keys: &ApiKeySource,
    ) -> Result<Self, ChatError> {
        if let Some(url) = relay_url.or(config.relay_url.as_deref()) {
            tracing::info!("Using relay at {}", url);
            return Ok(Self::Relay(RelayClient::new(url)));
        }

        let api_key = keys.load()?;
        let settings = UpstreamSettings::client_defaults().with_config(config);
        Ok(Self::Direct(OpenRouterClient::new(&api_key, settings)))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Direct(_) => "OpenRouter".to_string(),
            Self::Relay(relay) => format!("relay {}", relay.base_url()),
        }
    }

    /// Send the request and hand back the unread body.
    pub async fn open(&self, model: &str, context: &[ChatMessage]) -> Result<ByteStream, ChatError> {
        let response = match self {
            Self::Direct(client) => client.open_stream(model, context).await?,
            Self::Relay(relay) => relay.open_stream(model, context).await?,
        };
        Ok(response.bytes_stream().boxed())
    }

    /// Stream one reply into `sink`.
    ///
    /// Stopping before the response headers arrive abandons the request.
    pub async fn stream_reply<K: TokenSink + ?Sized>(
        &self,
        model: &str,
        context: &[ChatMessage],
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        tracing::info!("Requesting {} with {} messages via {}", model, context.len(), self.describe());

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            opened = self.open(model, context) => opened?,
        };

        pump(bytes, sink, cancel).await
    }
}
