//! LLM capability: `ask(prompt) -> text`, treated as a black box. One
//! trait, provider-specific clients behind it — no concrete provider
//! ships in this crate; providers are external collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self { model: "default".to_string(), max_tokens: 4096, temperature: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned an error: {0}")]
    Provider(String),
}

/// `ask(system_prompt, user_prompt, options) -> {content, reasoning?}`.
/// Any OpenAI-style chat completion provider fits.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn ask(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &AskOptions,
    ) -> Result<LlmResponse, LlmError>;
}
