//! Interaction log and operational events

use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};

use crate::domain::InteractionRecord;

/// Sink for everything the gateway records about its requests
pub trait Logger: Send + Sync {
    /// Record a prompt and the reply that was returned for it.
    fn log_interaction(&self, prompt: &str, response: &str);
    fn log_error(&self, message: &str, cause: Option<&(dyn Error + 'static)>);
    fn log_warn(&self, message: &str);
    fn log_info(&self, message: &str);
}

/// Appends interactions to a JSON Lines file and sends the rest to `tracing`.
pub struct JsonlLogger {
    path: PathBuf,
    file: Option<Mutex<File>>,
}

impl JsonlLogger {
    /// Open (or create) the interaction log at `path`.
    ///
    /// If the file cannot be opened, the failure is reported once and
    /// interactions are emitted as `tracing` events instead.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = match open_append(&path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "cannot open interaction log, writing interactions to the console"
                );
                None
            }
        };

        Self { path, file }
    }

    fn append(&self, file: &Mutex<File>, record: &InteractionRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Render an error and its sources as `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // thiserror messages often already embed their source
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

impl Logger for JsonlLogger {
    fn log_interaction(&self, prompt: &str, response: &str) {
        let record = InteractionRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            prompt: prompt.to_string(),
            response: response.to_string(),
        };

        let Some(file) = &self.file else {
            tracing::info!(
                timestamp = %record.timestamp,
                prompt = %record.prompt,
                response = %record.response,
                "interaction"
            );
            return;
        };

        if let Err(e) = self.append(file, &record) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to write interaction log"
            );
        }
    }

    fn log_error(&self, message: &str, cause: Option<&(dyn Error + 'static)>) {
        match cause {
            Some(cause) => tracing::error!(cause = %error_chain(cause), "{message}"),
            None => tracing::error!("{message}"),
        }
    }

    fn log_warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn log_info(&self, message: &str) {
        tracing::info!("{message}");
    }
}
