//! OpenAI-compatible chat-completions backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::ContextSource;
use super::prompt;
use super::{AnalysisInput, Analyzer, AnalyzerError, Findings, Summarizer};
use crate::tasks::config::{LlmConfig, LlmProviderConfig};

/// Characters of an error body kept in an error message
const ERROR_BODY_LIMIT: usize = 200;

/// A named chat-completions endpoint
#[derive(Debug, Clone)]
pub struct LlmProvider {
    pub name: String,
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmProvider {
    /// Build a provider from config, reading the API key from the named env var
    #[must_use]
    pub fn from_config(name: &str, config: &LlmProviderConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            if let Some(var) = &config.api_key_env {
                warn!(provider = name, env = %var, "API key variable is not set, sending unauthenticated requests");
            }
        }

        Self {
            name: name.to_string(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [RequestMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
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

/// LLM analyzer and summarizer
pub struct LlmConnector {
    http: reqwest::Client,
    default_provider: LlmProvider,
    providers: HashMap<String, LlmProvider>,
    context: Option<Arc<dyn ContextSource>>,
}

impl LlmConnector {
    #[must_use]
    pub fn new(default_provider: LlmProvider) -> Self {
        Self {
            http: reqwest::Client::new(),
            default_provider,
            providers: HashMap::new(),
            context: None,
        }
    }

    /// Register an additional provider selectable through the `llmProvider` hint
    #[must_use]
    pub fn with_provider(mut self, provider: LlmProvider) -> Self {
        self.providers.insert(provider.name.clone(), provider);
        self
    }

    #[must_use]
    pub fn with_context_source(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let default = config.providers.get(&config.default_provider).ok_or_else(|| {
            anyhow::anyhow!(
                "default LLM provider '{}' is not defined under llm.providers",
                config.default_provider
            )
        })?;

        let mut connector = Self::new(LlmProvider::from_config(&config.default_provider, default));
        for (name, provider) in &config.providers {
            connector = connector.with_provider(LlmProvider::from_config(name, provider));
        }
        Ok(connector)
    }

    fn provider_for(&self, input: &AnalysisInput) -> &LlmProvider {
        match input.provider() {
            Some(name) => self.providers.get(name).unwrap_or_else(|| {
                warn!(provider = name, fallback = %self.default_provider.name, "unknown LLM provider requested");
                &self.default_provider
            }),
            None => &self.default_provider,
        }
    }

    async fn complete(
        &self,
        provider: &LlmProvider,
        system: &str,
        user: &str,
    ) -> Result<String, AnalyzerError> {
        let url = format!("{}/chat/completions", provider.endpoint.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &provider.model,
            messages: [
                RequestMessage {
                    role: "system",
                    content: system,
                },
                RequestMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: provider.max_tokens,
            temperature: provider.temperature,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &provider.api_key {
            request = request.bearer_auth(key);
        }

        debug!(provider = %provider.name, model = %provider.model, "sending chat completion");
        let response = request.send().await.map_err(|e| {
            AnalyzerError::Unavailable(format!("{} request failed: {e}", provider.name))
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            return Err(AnalyzerError::Unavailable(format!(
                "{} returned {status}: {}",
                provider.name,
                detail.trim()
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                AnalyzerError::InvalidResponse(format!("{} returned no completion", provider.name))
            })
    }
}

#[async_trait]
impl Analyzer for LlmConnector {
    fn name(&self) -> &str {
        "llm"
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<Findings, AnalyzerError> {
        let provider = self.provider_for(input);
        let context = match &self.context {
            Some(source) => source.gather(input).await?,
            None => None,
        };

        let user_prompt = prompt::render(input, context.as_deref());
        let reply = self
            .complete(provider, prompt::SYSTEM_PROMPT, &user_prompt)
            .await?;
        Ok(prompt::parse_reply(&reply, input))
    }
}

#[async_trait]
impl Summarizer for LlmConnector {
    async fn summarize(&self, events: &[String]) -> Result<String, AnalyzerError> {
        let reply = self
            .complete(
                &self.default_provider,
                prompt::SUMMARY_SYSTEM_PROMPT,
                &prompt::summary_prompt(events),
            )
            .await?;
        Ok(reply.trim().to_string())
    }
}
