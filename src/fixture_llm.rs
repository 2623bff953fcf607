//! File-backed `LlmClient`: cycles through a fixed list of canned
//! responses read from a JSON file. No concrete provider ships in this
//! crate; this is the bundled `cli` binary's `--provider fixture` stand-in
//! for a real OpenAI-style chat completion client.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AskOptions, LlmClient, LlmError, LlmResponse};

pub struct FixtureLlm {
    responses: Mutex<(Vec<String>, usize)>,
}

impl FixtureLlm {
    pub fn load(path: &Path) -> Result<Self, LlmError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LlmError::Transport(format!("{}: {e}", path.display())))?;
        let responses: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| LlmError::Transport(format!("invalid fixture json: {e}")))?;
        if responses.is_empty() {
            return Err(LlmError::Transport("fixture file has no responses".to_string()));
        }
        Ok(Self { responses: Mutex::new((responses, 0)) })
    }
}

#[async_trait]
impl LlmClient for FixtureLlm {
    async fn ask(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: &AskOptions,
    ) -> Result<LlmResponse, LlmError> {
        let mut guard = self.responses.lock().unwrap();
        let (responses, next) = &mut *guard;
        let content = responses[*next % responses.len()].clone();
        *next += 1;
        Ok(LlmResponse { content, reasoning: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_through_responses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        std::fs::write(&path, r#"["a", "b"]"#).unwrap();

        let llm = FixtureLlm::load(&path).unwrap();
        let first = llm.ask("sys", "user", &AskOptions::default()).await.unwrap();
        let second = llm.ask("sys", "user", &AskOptions::default()).await.unwrap();
        let third = llm.ask("sys", "user", &AskOptions::default()).await.unwrap();
        assert_eq!(first.content, "a");
        assert_eq!(second.content, "b");
        assert_eq!(third.content, "a");
    }

    #[test]
    fn empty_fixture_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(FixtureLlm::load(&path).is_err());
    }
}
