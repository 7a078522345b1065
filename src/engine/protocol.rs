use crate::config::GenerationOptions;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Chat completion request in the OpenAI-compatible shape engines accept
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

impl ChatRequest {
    /// Single-turn streaming request from the user
    pub fn single_turn(prompt: &str, model: &str, options: &GenerationOptions) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            model: model.to_string(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stream: true,
        }
    }
}

/// One increment of a streamed completion
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_content: Option<String>,
    /// Set on the terminal chunk (`"stop"`, `"length"`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            delta_content: Some(content.into()),
            finish_reason: None,
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            delta_content: None,
            finish_reason: Some(reason.into()),
        }
    }

    /// Delta text, if non-empty
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.delta_content.as_deref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}
