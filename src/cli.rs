//! Cli

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "minivault")]
#[command(about = "MiniVault API: HTTP gateway to a local Ollama model", long_about = None)]
pub struct Args {
    /// Listen address, either `:PORT` (all interfaces) or `HOST:PORT`
    #[arg(long, env = "MINIVAULT_PORT", default_value = ":8080")]
    pub port: String,

    /// Ollama chat endpoint
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434/api/chat")]
    pub ollama_url: String,

    /// Model name sent with every request
    #[arg(long, env = "OLLAMA_MODEL", default_value = "gemma:2b")]
    pub ollama_model: String,

    /// Append-only interaction log (JSON Lines)
    #[arg(long, env = "MINIVAULT_LOG_FILE", default_value = "logs/log.jsonl")]
    pub log_file: PathBuf,

    /// Seconds to wait for in-flight requests after a shutdown signal
    #[arg(long, env = "MINIVAULT_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,
}

/// Resolved process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub ollama_url: String,
    pub ollama_model: String,
    pub log_file: PathBuf,
    pub shutdown_grace: Duration,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            listen_addr: parse_listen_addr(&args.port)?,
            ollama_url: args.ollama_url,
            ollama_model: args.ollama_model,
            log_file: args.log_file,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

/// Accepts `:8080`, `8080`, `127.0.0.1:8080` or `localhost:8080`.
pub fn parse_listen_addr(port: &str) -> Result<SocketAddr> {
    let port = port.trim();
    let candidate = if let Some(bare) = port.strip_prefix(':') {
        format!("0.0.0.0:{bare}")
    } else if port.chars().all(|c| c.is_ascii_digit()) {
        format!("0.0.0.0:{port}")
    } else {
        port.to_string()
    };

    candidate
        .to_socket_addrs()
        .with_context(|| format!("invalid listen address {port:?}"))?
        .next()
        .with_context(|| format!("listen address {port:?} did not resolve"))
}
