//! Language model abstraction
//!
//! Planner, router, email writer and synthesizer all talk to a model through
//! the `LanguageModel` trait so the control loop can run against Gemini in
//! production and a scripted model in tests or offline mode.

use crate::error::AssistantError;
use crate::memory::{ConversationHistory, MessageRole};
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// One model invocation
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            temperature: 0.0,
            max_output_tokens: 1024,
        }
    }

    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system = Some(instruction.into());
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(PromptMessage {
            role: PromptRole::User,
            content: content.into(),
        });
        self
    }

    /// Append the `limit` most recent conversation messages
    pub fn history(mut self, history: &ConversationHistory, limit: usize) -> Self {
        for msg in history.recent_messages(limit) {
            let role = match msg.role {
                MessageRole::User => PromptRole::User,
                MessageRole::Assistant => PromptRole::Assistant,
            };
            self.messages.push(PromptMessage {
                role,
                content: msg.content.clone(),
            });
        }
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// All message text, used by test doubles to inspect prompts
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        if let Some(system) = &self.system {
            out.push_str(system);
            out.push('\n');
        }
        for msg in &self.messages {
            out.push_str(&msg.content);
            out.push('\n');
        }
        out
    }
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Text-in, text-out model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

lazy_static! {
    static ref JSON_FENCE: Regex = Regex::new(r"```(?:json)?\s*|\s*```").unwrap();
}

/// Strip markdown fences and surrounding prose, leaving the outermost JSON object
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Parse a model reply that should contain one JSON object
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = JSON_FENCE.replace_all(raw.trim(), "");
    let body = extract_json_object(&cleaned).ok_or_else(|| {
        AssistantError::Llm(format!("No JSON object in model reply: {}", raw))
    })?;
    Ok(serde_json::from_str(body)?)
}

/// Mock model for development & testing
///
/// Replies are consumed in order; every request is recorded.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, reply: std::result::Result<String, String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| AssistantError::Llm("scripted model poisoned".to_string()))?
            .pop_front();

        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(AssistantError::Llm(message)),
            None => Err(AssistantError::Llm("scripted model has no reply left".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_parse_json_reply_strips_fences() {
        let raw = "```json\n{\"intent\": \"CHAT\"}\n```";
        let value: Value = parse_json_reply(raw).unwrap();
        assert_eq!(value["intent"], "CHAT");
    }

    #[test]
    fn test_parse_json_reply_ignores_prose() {
        let raw = "Sure! Here is the plan: {\"plan\": [\"a\"]} hope it helps";
        let value: Value = parse_json_reply(raw).unwrap();
        assert_eq!(value["plan"][0], "a");
    }

    #[test]
    fn test_parse_json_reply_rejects_garbage() {
        assert!(parse_json_reply::<Value>("not json at all").is_err());
        assert!(parse_json_reply::<Value>("{broken").is_err());
    }

    #[test]
    fn test_request_history_window() {
        let history = ConversationHistory::from_pairs(vec![
            (MessageRole::User, "first"),
            (MessageRole::Assistant, "second"),
            (MessageRole::User, "third"),
        ]);
        let request = CompletionRequest::new().system("sys").history(&history, 2);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, PromptRole::Assistant);
        assert!(request.transcript().contains("third"));
        assert!(!request.transcript().contains("first"));
    }

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new().reply("one").fail("boom");
        assert_eq!(model.complete(CompletionRequest::new().user("a")).await.unwrap(), "one");
        assert!(model.complete(CompletionRequest::new()).await.is_err());
        assert!(model.complete(CompletionRequest::new()).await.is_err());
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.remaining(), 0);
    }
}
