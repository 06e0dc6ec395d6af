//! Ollama chat API integration

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;

use crate::domain::{ChatRequest, ChatResponse, StreamChunk};
use crate::error::{DownstreamError, MAX_ERROR_BODY_BYTES};

/// Fixed client-side timeout for every Ollama call
pub const OLLAMA_TIMEOUT: Duration = Duration::from_secs(30);

/// Live body of a streaming chat response. Dropping it closes the connection.
pub type ChatStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Anything that can answer a single-turn chat prompt
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a prompt and wait for the whole reply.
    async fn chat(&self, prompt: &str) -> Result<String, DownstreamError>;

    /// Send a prompt with streaming enabled and hand back the open body.
    async fn chat_stream(&self, prompt: &str) -> Result<ChatStream, DownstreamError>;
}

/// Client for interacting with the Ollama API
pub struct OllamaClient {
    chat_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client for the given /api/chat endpoint
    pub fn new(chat_url: String, model: String) -> Result<Self, DownstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(OLLAMA_TIMEOUT)
            .build()
            .map_err(DownstreamError::Unavailable)?;

        Ok(Self {
            chat_url,
            model,
            client,
        })
    }

    async fn send(
        &self,
        prompt: &str,
        stream: bool,
    ) -> Result<reqwest::Response, DownstreamError> {
        let request = ChatRequest::single_turn(&self.model, prompt, stream);

        let mut builder = self.client.post(&self.chat_url).json(&request);
        if !stream {
            builder = builder.timeout(OLLAMA_TIMEOUT);
        }

        let response = builder.send().await.map_err(DownstreamError::Unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await?;
            return Err(DownstreamError::status(status.as_u16(), &body));
        }

        Ok(response)
    }
}

/// Collect the start of a failed response, stopping once enough is kept.
async fn read_error_body(mut response: reqwest::Response) -> Result<Vec<u8>, DownstreamError> {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await.map_err(DownstreamError::Unavailable)? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(body)
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, prompt: &str) -> Result<String, DownstreamError> {
        let response = self.send(prompt, false).await?;
        let body = response
            .bytes()
            .await
            .map_err(DownstreamError::Unavailable)?;

        let chat: ChatResponse =
            serde_json::from_slice(&body).map_err(DownstreamError::Protocol)?;

        Ok(chat.message.content)
    }

    async fn chat_stream(&self, prompt: &str) -> Result<ChatStream, DownstreamError> {
        let response = self.send(prompt, true).await?;
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

/// Read lines from a streaming chat body until one carries non-empty
/// `message.content`. Returns `None` once the body is exhausted.
///
/// Blank and undecodable lines are skipped; `line` is scratch space reused
/// between calls.
pub async fn next_chunk<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
) -> Result<Option<String>, DownstreamError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', line)
            .await
            .map_err(DownstreamError::Read)?;
        if read == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<StreamChunk>(trimmed) {
            Ok(chunk) if !chunk.message.content.is_empty() => {
                return Ok(Some(chunk.message.content));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "skipping undecodable stream line"),
        }
    }
}

/// Read newline-delimited chat records and call `on_chunk` with every
/// non-empty `message.content`.
///
/// A read error stops the scan and is returned; chunks delivered before it
/// stay delivered.
pub async fn parse_stream<R, F>(mut reader: R, mut on_chunk: F) -> Result<(), DownstreamError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    let mut line = Vec::new();
    while let Some(chunk) = next_chunk(&mut reader, &mut line).await? {
        on_chunk(chunk);
    }
    Ok(())
}
