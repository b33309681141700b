use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::config::{Config, DEFAULT_MAX_TOKENS};
use crate::error::ChatError;
use crate::state::ChatMessage;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Everything about the upstream request that is not the conversation itself.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub referer: String,
    pub title: String,
    pub max_tokens: Option<u32>,
}

impl UpstreamSettings {
    /// Settings for the in-process client.
    pub fn client_defaults() -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            referer: "http://localhost".to_string(),
            title: "OpenRouter Chat".to_string(),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
        }
    }

    /// Settings for the relay; `max_tokens` is left to the provider.
    pub fn relay_defaults(bind: &str) -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            referer: format!("http://{}", bind),
            title: "Local AI Chat".to_string(),
            max_tokens: None,
        }
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        if let Some(referer) = &config.referer {
            self.referer = referer.clone();
        }
        if let Some(title) = &config.app_title {
            self.title = title.clone();
        }
        if config.max_tokens.is_some() {
            self.max_tokens = config.max_tokens;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Body of `POST /chat/completions`. `messages` is generic so the relay can
/// forward whatever JSON its caller sent.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a, M: Serialize> {
    pub model: &'a str,
    pub messages: M,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

/// An entry of `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub architecture: Option<Architecture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(default)]
    pub input_modalities: Vec<String>,
}

impl ModelInfo {
    pub fn is_free(&self) -> bool {
        self.pricing
            .as_ref()
            .is_some_and(|p| p.prompt == "0" && p.completion == "0")
    }

    pub fn supports_images(&self) -> bool {
        self.architecture
            .as_ref()
            .is_some_and(|a| a.input_modalities.iter().any(|m| m == "image"))
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    settings: UpstreamSettings,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, settings: UpstreamSettings) -> Self {
        Self::with_http(Client::new(), api_key, settings)
    }

    /// Share an existing connection pool (the relay builds one client per request).
    pub fn with_http(client: Client, api_key: &str, settings: UpstreamSettings) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            settings,
        }
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.settings.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", &self.settings.title)
    }

    pub fn chat_request<'a, M: Serialize>(&self, model: &'a str, messages: M) -> ChatRequest<'a, M> {
        ChatRequest {
            model,
            messages,
            stream: true,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Start a streaming completion.
    ///
    /// Returns once the response headers are in; the body is left unread for
    /// the caller to consume as a byte stream. Non-success answers are read in
    /// full and returned as [`ChatError::Upstream`].
    pub async fn open_stream<M: Serialize>(&self, model: &str, messages: M) -> Result<Response, ChatError> {
        let request = self.chat_request(model, messages);

        let response = self.post("/chat/completions").json(&request).send().await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        tracing::debug!("Upstream stream opened for {}", model);
        Ok(response)
    }

    /// Non-streaming completion, used by the model checker.
    pub async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
            max_tokens: self.settings.max_tokens,
        };

        let response = self.post("/chat/completions").json(&request).send().await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let completion: CompletionResponse = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let url = format!("{}/models", self.settings.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let models: ModelsResponse = response.json().await?;
        Ok(models.data)
    }
}

/// Drain an error response into [`ChatError::Upstream`].
pub(crate) async fn upstream_error(response: Response) -> ChatError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!("Upstream error ({}): {}", status, body);
    ChatError::upstream(status, body)
}
