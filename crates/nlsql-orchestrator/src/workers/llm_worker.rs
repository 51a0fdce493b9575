//! Language-model client
//!
//! Talks to an OpenAI-compatible chat completions endpoint. One system
//! instruction plus one user prompt per call; the reply text is returned as-is.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QueryError, QueryResult};

/// Text-completion seam used by the generator and the analyzer.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Whether a credential is present; checked before any call is made.
    fn is_configured(&self) -> bool;

    async fn complete(&self, system_instruction: &str, prompt: &str, temperature: f32) -> QueryResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct LLMWorker {
    base_url: String,
    api_key: Option<String>,
    model: String,
    http_client: reqwest::Client,
}

impl LLMWorker {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("LLM API key is missing; generation will return placeholder queries");
        }
        info!("LLM worker initialized with backend: {} (model {})", base_url, model);
        Self {
            base_url,
            api_key,
            model,
            http_client: super::timed_http_client(std::time::Duration::from_secs(600)),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.llm_base_url.clone(), config.llm_api_key.clone(), config.llm_model.clone())
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for LLMWorker {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, system_instruction: &str, prompt: &str, temperature: f32) -> QueryResult<String> {
        let api_key = self.api_key.as_deref().ok_or(QueryError::GenerationUnavailable)?;
        debug!("LLM completion request ({} prompt chars)", prompt.len());

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_instruction.to_string() },
                ChatMessage { role: "user".to_string(), content: prompt.to_string() },
            ],
            temperature,
            stream: false,
        };
        let response = self.http_client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::Generation(format!("LLM backend request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Generation(format!("LLM backend returned {}: {}", status, body)));
        }
        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| QueryError::Generation(format!("Failed to parse LLM response: {}", e)))?;
        let content = completion.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(content)
    }
}
