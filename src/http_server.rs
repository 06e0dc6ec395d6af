//! HTTP API server

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State, rejection::BytesRejection},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::post,
};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, Span};
use uuid::Uuid;

use crate::domain::{GenerateRequest, GenerateResponse};
use crate::logger::Logger;
use crate::ollama::{ChatBackend, ChatStream, next_chunk};
use crate::service::Generator;

/// Largest request body accepted, in bytes
pub const MAX_BODY_BYTES: usize = 4096;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// HTTP response for errors
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Empty prompt")]
    EmptyPrompt,
    #[error("Failed to generate response")]
    Generation,
    #[error("Failed to encode response")]
    Encoding,
    #[error("Internal Server Error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::InvalidJson | ApiError::EmptyPrompt => StatusCode::BAD_REQUEST,
            ApiError::Generation | ApiError::Encoding | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

/// Payload of a panic caught while handling a request
#[derive(Debug, Error)]
#[error("{0}")]
struct Panicked(String);

impl Panicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown panic".to_string()),
        };
        Self(message)
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn Generator>,
    pub backend: Arc<dyn ChatBackend>,
    pub logger: Arc<dyn Logger>,
}

/// Build the gateway router with its middleware stack
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate).fallback(method_not_allowed))
        .route(
            "/generate/streaming",
            post(generate_streaming).fallback(method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), recover_panics))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Give each request an id, run it inside a span carrying that id and echo
/// it back in `X-Request-ID`.
///
/// Every diagnostic about the request is emitted inside this span, so the
/// id reaches the logs as the `request_id` field rather than message text.
async fn assign_request_id(req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();

    let span = tracing::info_span!("request", request_id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// Turn a panic anywhere below into a logged fault and a bare 500.
async fn recover_panics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let fault = Panicked::from_payload(payload);
            state.logger.log_error("panic recovered", Some(&fault));
            ApiError::Internal.into_response()
        }
    }
}

async fn method_not_allowed(State(state): State<AppState>) -> ApiError {
    state.logger.log_warn("Rejected non-POST request");
    ApiError::MethodNotAllowed
}

/// Decode and validate a request body, logging why it was refused.
fn read_request(
    logger: &dyn Logger,
    body: Result<Bytes, BytesRejection>,
) -> Result<GenerateRequest, ApiError> {
    let body = body.map_err(|e| {
        logger.log_error("Failed to read request body", Some(&e));
        ApiError::InvalidJson
    })?;

    let request: GenerateRequest = serde_json::from_slice(&body).map_err(|e| {
        logger.log_error("Failed to decode JSON", Some(&e));
        ApiError::InvalidJson
    })?;

    request.validate().map_err(|e| {
        logger.log_error("Empty prompt", Some(&e));
        ApiError::EmptyPrompt
    })?;

    Ok(request)
}

/// Handle POST /generate
async fn generate(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = read_request(state.logger.as_ref(), body)?;

    // the generator logs its own failures
    let response = state
        .generator
        .generate(&request.prompt)
        .await
        .map_err(|_| ApiError::Generation)?;

    let encoded = serde_json::to_vec(&GenerateResponse { response }).map_err(|e| {
        state.logger.log_error("Failed to encode response", Some(&e));
        ApiError::Encoding
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        encoded,
    )
        .into_response())
}

/// SSE cannot carry carriage returns; newlines are split into `data:` lines.
fn sse_data(chunk: &str) -> Event {
    Event::default().data(chunk.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Upstream body of one SSE response and what has been relayed from it.
///
/// Exactly one outcome is logged: the interaction once the last chunk has
/// been taken by the response body, an error if the upstream read fails, or
/// a warning if the body is dropped first because the client went away.
struct StreamSession {
    reader: ChatStream,
    line: Vec<u8>,
    prompt: String,
    full: String,
    logger: Arc<dyn Logger>,
    span: Span,
    finished: bool,
}

impl StreamSession {
    async fn next_event(&mut self) -> Option<Event> {
        let next = next_chunk(&mut self.reader, &mut self.line)
            .instrument(self.span.clone())
            .await;

        match next {
            Ok(Some(chunk)) => {
                let event = sse_data(&chunk);
                self.full.push_str(&chunk);
                Some(event)
            }
            Ok(None) => {
                self.finished = true;
                self.span.in_scope(|| {
                    self.logger.log_interaction(&self.prompt, &self.full);
                    self.logger.log_info("Stream completed");
                });
                None
            }
            Err(e) => {
                self.finished = true;
                self.span
                    .in_scope(|| self.logger.log_error("Stream interrupted", Some(&e)));
                None
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.finished {
            self.span
                .in_scope(|| self.logger.log_warn("Client left before the stream ended"));
        }
    }
}

/// Handle POST /generate/streaming
///
/// Chunks are read from Ollama only as fast as the client takes them, and
/// dropping the response closes the upstream connection.
async fn generate_streaming(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let request = read_request(state.logger.as_ref(), body)?;

    let reader = state
        .backend
        .chat_stream(&request.prompt)
        .await
        .map_err(|e| {
            state.logger.log_error("Failed to start stream", Some(&e));
            ApiError::Generation
        })?;

    let session = StreamSession {
        reader,
        line: Vec::new(),
        prompt: request.prompt,
        full: String::new(),
        logger: state.logger.clone(),
        span: Span::current(),
        finished: false,
    };

    let events = futures::stream::unfold(session, |mut session| async move {
        let event = session.next_event().await?;
        Some((Ok::<_, Infallible>(event), session))
    });

    Ok((
        [(header::CONNECTION, HeaderValue::from_static("keep-alive"))],
        Sse::new(events),
    )
        .into_response())
}
