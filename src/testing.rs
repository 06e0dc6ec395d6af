//! Test doubles for the backend, generator and logger traits

use std::error::Error;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio_util::io::StreamReader;

use crate::error::{DownstreamError, GenerateError};
use crate::logger::{Logger, error_chain};
use crate::ollama::{ChatBackend, ChatStream};
use crate::service::Generator;

enum Reply {
    Text(String),
    Status(u16, String),
}

impl Reply {
    fn to_result(&self) -> Result<String, DownstreamError> {
        match self {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Status(status, body) => Err(DownstreamError::status(*status, body.as_bytes())),
        }
    }
}

/// Canned Ollama replies; `stream_body` is served verbatim by `chat_stream`,
/// followed by a connection reset when `reset_after_body` is set.
pub struct StubBackend {
    reply: Reply,
    stream_body: Vec<u8>,
    reset_after_body: bool,
    prompts: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Reply::Text(text.to_string()),
            stream_body: Vec::new(),
            reset_after_body: false,
            prompts: Mutex::default(),
        }
    }

    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            reply: Reply::Status(status, body.to_string()),
            stream_body: Vec::new(),
            reset_after_body: false,
            prompts: Mutex::default(),
        }
    }

    pub fn streaming(body: &str) -> Self {
        Self {
            stream_body: body.as_bytes().to_vec(),
            ..Self::replying("")
        }
    }

    /// Streams `body`, then fails the read as if Ollama dropped the connection.
    pub fn interrupted(body: &str) -> Self {
        Self {
            reset_after_body: true,
            ..Self::streaming(body)
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for StubBackend {
    async fn chat(&self, prompt: &str) -> Result<String, DownstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.to_result()
    }

    async fn chat_stream(&self, prompt: &str) -> Result<ChatStream, DownstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.to_result()?;
        if !self.reset_after_body {
            return Ok(Box::new(io::Cursor::new(self.stream_body.clone())));
        }

        let parts: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(self.stream_body.clone())),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        Ok(Box::new(StreamReader::new(futures::stream::iter(parts))))
    }
}

/// Generator that answers with a fixed text, a fixed failure or a panic.
pub enum StubGenerator {
    Reply(String),
    Fail(u16),
    Panic,
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
        match self {
            StubGenerator::Reply(text) => Ok(text.clone()),
            StubGenerator::Fail(status) => {
                Err(DownstreamError::status(*status, b"stub failure").into())
            }
            StubGenerator::Panic => panic!("generator exploded"),
        }
    }
}

/// Keeps every call in memory for later assertions.
#[derive(Default)]
pub struct RecordingLogger {
    interactions: Mutex<Vec<(String, String)>>,
    errors: Mutex<Vec<(String, Option<String>)>>,
    warnings: Mutex<Vec<String>>,
    infos: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn interactions(&self) -> Vec<(String, String)> {
        self.interactions.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, Option<String>)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn log_interaction(&self, prompt: &str, response: &str) {
        self.interactions
            .lock()
            .unwrap()
            .push((prompt.to_string(), response.to_string()));
    }

    fn log_error(&self, message: &str, cause: Option<&(dyn Error + 'static)>) {
        self.errors
            .lock()
            .unwrap()
            .push((message.to_string(), cause.map(error_chain)));
    }

    fn log_warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn log_info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }
}
