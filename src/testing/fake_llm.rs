//! Fake `LlmClient` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AskOptions, LlmClient, LlmError, LlmResponse};

/// Returns a fixed sequence of responses, one per `ask` call, cycling
/// back to the start once exhausted so a worker loop that calls `ask`
/// more times than there are scripted responses still gets something
/// deterministic rather than panicking.
pub struct ScriptedLlm {
    responses: Mutex<(Vec<String>, usize)>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "ScriptedLlm needs at least one response");
        Self { responses: Mutex::new((responses, 0)) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn ask(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: &AskOptions,
    ) -> Result<LlmResponse, LlmError> {
        let mut guard = self.responses.lock().unwrap();
        let (responses, idx) = &mut *guard;
        let content = responses[*idx % responses.len()].clone();
        *idx += 1;
        Ok(LlmResponse { content, reasoning: None })
    }
}

/// Always fails with a transport error — exercises worker error handling.
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn ask(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: &AskOptions,
    ) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Transport("fake transport failure".to_string()))
    }
}
