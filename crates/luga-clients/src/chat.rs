//! OpenAI-compatible chat completions (OpenAI, DeepSeek, Grok).

use std::collections::HashMap;
use std::time::Duration;

use luga_models::conversation::{clean_title, fallback_title};
use luga_models::ChatProvider;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{ClientError, ClientResult};
use crate::http::{check_status, http_client, optional_env};

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const MAX_TOKENS: u32 = 500;
const TITLE_MAX_TOKENS: u32 = 20;
const TEMPERATURE: f32 = 0.7;

/// Credentials and endpoint for one provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub api_key: SecretString,
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub endpoints: HashMap<ChatProvider, ProviderEndpoint>,
}

impl ChatConfig {
    /// Reads `{OPENAI,DEEPSEEK,GROK}_API_KEY` and optional `*_BASE_URL` overrides.
    /// Providers without a key are left out and fail at call time.
    pub fn from_env() -> Self {
        let mut endpoints = HashMap::new();
        for (provider, prefix) in [
            (ChatProvider::OpenAi, "OPENAI"),
            (ChatProvider::DeepSeek, "DEEPSEEK"),
            (ChatProvider::Grok, "GROK"),
        ] {
            if let Some(key) = optional_env(&format!("{}_API_KEY", prefix)) {
                let base_url = optional_env(&format!("{}_BASE_URL", prefix))
                    .unwrap_or_else(|| provider.default_base_url().to_string());
                endpoints.insert(
                    provider,
                    ProviderEndpoint {
                        api_key: SecretString::from(key),
                        base_url,
                    },
                );
            }
        }
        Self { endpoints }
    }

    pub fn with_endpoint(mut self, provider: ChatProvider, api_key: &str, base_url: &str) -> Self {
        self.endpoints.insert(
            provider,
            ProviderEndpoint {
                api_key: SecretString::from(api_key.to_string()),
                base_url: base_url.to_string(),
            },
        );
        self
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            http: http_client(Duration::from_secs(60)),
            config,
        }
    }

    pub fn is_configured(&self, provider: ChatProvider) -> bool {
        self.config.endpoints.contains_key(&provider)
    }

    /// Answer `prompt` with the provider's default model.
    pub async fn complete(&self, provider: ChatProvider, prompt: &str) -> ClientResult<String> {
        self.chat(provider, prompt, MAX_TOKENS).await
    }

    /// Short title for a conversation. Never fails: falls back to a prompt prefix.
    pub async fn generate_title(&self, provider: ChatProvider, prompt: &str) -> String {
        let request = format!(
            "Generate a brief 3-5 word title summarizing this conversation:\n{}",
            prompt
        );
        match self.chat(provider, &request, TITLE_MAX_TOKENS).await {
            Ok(raw) => {
                let title = clean_title(&raw);
                if title.is_empty() {
                    fallback_title(prompt)
                } else {
                    title
                }
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "Title generation failed, using prompt prefix");
                fallback_title(prompt)
            }
        }
    }

    async fn chat(&self, provider: ChatProvider, prompt: &str, max_tokens: u32) -> ClientResult<String> {
        let endpoint = self.config.endpoints.get(&provider).ok_or_else(|| {
            ClientError::config(format!("No API key configured for {}", provider))
        })?;
        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: provider.model(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let span = info_span!("chat_completion", provider = %provider, model = provider.model());
        async {
            debug!(prompt_len = prompt.len(), "Sending chat completion");
            let response = self
                .http
                .post(&url)
                .bearer_auth(endpoint.api_key.expose_secret())
                .json(&body)
                .send()
                .await?;
            let response = check_status(provider.as_str(), response).await?;

            let parsed: ChatResponse = response.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|c| c.trim().to_string())
                .ok_or_else(|| ClientError::invalid_response("chat", "no choices in response"))
        }
        .instrument(span)
        .await
    }
}
