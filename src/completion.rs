//! LLM completion provider abstraction.
//!
//! The assistant hands the model a question plus retrieved context and gets
//! back an answer. [`ChatCompletionProvider`] speaks the OpenAI-style
//! `chat/completions` protocol, which OpenRouter and OpenAI both serve.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::ProviderError;
use crate::models::RetrievedChunk;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub const SYSTEM_PROMPT: &str = "You are a helpful CloudOps Assistant specializing in Cloud & DevOps engineering.
You help engineers with Kubernetes, Docker, Cloud infrastructure, Git/Github, CI/CD, and DevOps best practices.

Instructions:
- Answer based on the provided context documents
- Focus on practical, actionable advice
- Include code examples when relevant
- If context is insufficient, provide general CloudOps guidance
- Keep responses clear and concise
- Mention specific tools, commands, or configurations when applicable";

/// Produces an answer for a question given supporting context.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, question: &str, context: &str) -> Result<String, ProviderError>;
}

/// Always fails with [`ProviderError::Disabled`].
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _question: &str, _context: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionProvider {
    pub fn new(config: &CompletionConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config(format!("{} not set", config.api_key_env)))?;
        let default_url = match config.provider.as_str() {
            "openai" => OPENAI_API_URL,
            _ => OPENROUTER_API_URL,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone().unwrap_or_else(|| default_url.to_string()),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionProvider for ChatCompletionProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, question: &str, context: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt(question, context)}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        parse_chat_response(&text)
    }
}

fn parse_chat_response(text: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(text).map_err(|e| ProviderError::Parse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::Parse("response has no message content".to_string()))
}

pub fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Context from CloudOps knowledge base:\n{}\n\nCloudOps Question: {}\n\n\
         Please provide a practical answer focused on Cloud & DevOps engineering. \
         Include specific commands, configurations, or best practices where applicable.",
        context, question
    )
}

/// Context-only answer for when the completion endpoint is unavailable.
pub fn fallback_answer(query: &str, retrieved: &[RetrievedChunk]) -> String {
    if retrieved.is_empty() {
        return format!(
            "I found information related to '{}' but couldn't generate a comprehensive answer. \
             Please check the retrieved context for relevant details.",
            query
        );
    }

    let sources: Vec<&str> = retrieved
        .iter()
        .map(|r| r.chunk.source_path.as_str())
        .collect();
    format!(
        "Based on the available CloudOps documentation, I found relevant information in: {}.\n\n\
         For detailed information about '{}', please refer to the context sections below.\n\n\
         Note: the AI-generated answer is temporarily unavailable; showing context-based results.",
        sources.join(", "),
        query
    )
}

/// Create the provider named by `completion.provider`.
pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openrouter" | "openai" => Ok(Arc::new(ChatCompletionProvider::new(config)?)),
        other => Err(ProviderError::Config(format!(
            "unknown completion provider: {}",
            other
        ))),
    }
}
