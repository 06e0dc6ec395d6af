//! Request, response and Ollama chat payloads

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Role attached to every outbound chat message
pub const USER_ROLE: &str = "user";

/// HTTP request payload for /generate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
}

impl GenerateRequest {
    /// A prompt must contain something other than whitespace.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        Ok(())
    }
}

/// HTTP response payload for /generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Ollama /api/chat request payload
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// Single-turn request carrying one user message.
    pub fn single_turn(model: &str, prompt: &str, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: USER_ROLE.to_string(),
                content: prompt.to_string(),
            }],
            stream,
        }
    }
}

/// Ollama /api/chat response payload (non-streaming)
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

/// One line of a streaming /api/chat body
#[derive(Debug, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub message: ChunkMessage,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

/// One line of the interaction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
}
