use thiserror::Error;

/// Upper bound on how much of a failed Ollama response body is kept
pub const MAX_ERROR_BODY_BYTES: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("ollama is unreachable: {0}")]
    Unavailable(#[source] reqwest::Error),
    #[error("ollama API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode ollama response: {0}")]
    Protocol(#[source] serde_json::Error),
    #[error("failed to read ollama stream: {0}")]
    Read(#[source] std::io::Error),
}

impl DownstreamError {
    /// Builds a `Status` error, keeping at most `MAX_ERROR_BODY_BYTES` of the body.
    pub fn status(status: u16, body: &[u8]) -> Self {
        let mut end = body.len().min(MAX_ERROR_BODY_BYTES);
        let text = loop {
            match std::str::from_utf8(&body[..end]) {
                Ok(text) => break text.to_string(),
                // cut landed inside a multi-byte char
                Err(e) if e.error_len().is_none() => end = e.valid_up_to(),
                Err(_) => break String::from_utf8_lossy(&body[..end]).into_owned(),
            }
        };
        Self::Status { status, body: text }
    }
}

#[derive(Debug, Error)]
#[error("ollama call failed: {0}")]
pub struct GenerateError(#[from] pub DownstreamError);
