//! Prompt generation use case

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GenerateError;
use crate::logger::Logger;
use crate::ollama::ChatBackend;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Calls the chat backend and records the outcome.
///
/// Every success is logged as an interaction and every failure as one error
/// event. Prompts are expected to be validated by the caller.
pub struct GenerationService {
    backend: Arc<dyn ChatBackend>,
    logger: Arc<dyn Logger>,
}

impl GenerationService {
    pub fn new(backend: Arc<dyn ChatBackend>, logger: Arc<dyn Logger>) -> Self {
        Self { backend, logger }
    }
}

#[async_trait]
impl Generator for GenerationService {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        match self.backend.chat(prompt).await {
            Ok(response) => {
                self.logger.log_interaction(prompt, &response);
                Ok(response)
            }
            Err(e) => {
                let err = GenerateError::from(e);
                self.logger.log_error("generation failed", Some(&err));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingLogger, StubBackend};

    fn service(backend: &Arc<StubBackend>, logger: &Arc<RecordingLogger>) -> GenerationService {
        GenerationService::new(backend.clone(), logger.clone())
    }

    #[tokio::test]
    async fn success_logs_the_interaction() {
        let backend = Arc::new(StubBackend::replying("ok"));
        let logger = Arc::new(RecordingLogger::default());

        let reply = service(&backend, &logger).generate("foo").await.unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(backend.prompts(), vec!["foo"]);
        assert_eq!(
            logger.interactions(),
            vec![("foo".to_string(), "ok".to_string())]
        );
        assert!(logger.errors().is_empty());
    }

    #[tokio::test]
    async fn every_call_is_logged() {
        let backend = Arc::new(StubBackend::replying("ok"));
        let logger = Arc::new(RecordingLogger::default());
        let service = service(&backend, &logger);

        for _ in 0..5 {
            service.generate("p").await.unwrap();
        }

        assert_eq!(logger.interactions().len(), 5);
    }

    #[tokio::test]
    async fn downstream_failure_is_wrapped_and_logged_once() {
        let backend = Arc::new(StubBackend::failing(503, "busy"));
        let logger = Arc::new(RecordingLogger::default());

        let err = service(&backend, &logger)
            .generate("prompt")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("ollama call failed:"));
        let errors = logger.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "generation failed");
        assert!(errors[0].1.as_deref().unwrap().contains("busy"));
        assert!(logger.interactions().is_empty());
    }
}
