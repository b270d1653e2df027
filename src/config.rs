//! Layered application configuration.
//!
//! Priority, lowest to highest: built-in defaults, YAML config file,
//! `CHAT_`-prefixed environment variables (`CHAT_SERVER__PORT=8000`), a few
//! conventional variables (`REDIS_URL`), then CLI flags.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::llm::provider::DEFAULT_AZURE_API_VERSION;
use crate::llm::{LlmSettings, Provider};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// History backend (`redis` or `memory`)
    #[arg(long)]
    pub history_backend: Option<HistoryBackend>,

    /// Redis connection URL
    #[arg(long)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub history: HistoryConfig,
    pub llm: LlmConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Time allowed to produce response headers. Streaming bodies are not
    /// cut off by this.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_age_days: u64,
    pub secure_cookie: bool,
}

impl SessionConfig {
    /// Lifetime of issued session cookies.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    pub redis_url: String,
    pub key_prefix: String,
    /// Expire idle histories after this many seconds. Unset keeps them
    /// forever.
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub system_prompt: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("session.cookie_name", "session_id")?
            .set_default("session.max_age_days", 365)?
            .set_default("session.secure_cookie", false)?
            .set_default("history.backend", "redis")?
            .set_default("history.redis_url", "redis://127.0.0.1:6379")?
            .set_default("history.key_prefix", "message_store:")?
            .set_default("llm.system_prompt", "You're an assistant.")?
            .set_default("telemetry.json", false)?;

        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path).required(true)),
            None if Path::new("config.yaml").exists() => {
                builder = builder.add_source(File::with_name("config.yaml"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(val) = std::env::var("REDIS_URL") {
            builder = builder.set_override("history.redis_url", val)?;
        }

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(backend) = cli.history_backend {
            let name = match backend {
                HistoryBackend::Redis => "redis",
                HistoryBackend::Memory => "memory",
            };
            builder = builder.set_override("history.backend", name)?;
        }
        if let Some(url) = cli.redis_url {
            builder = builder.set_override("history.redis_url", url)?;
        }

        builder.build()?.try_deserialize()
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url =
        std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
        .filter(|s| !s.trim().is_empty());

    // Auto-detect provider from base URL
    let mut provider = Provider::detect_from_url(&base_url);

    if let Provider::AzureOpenAI { .. } = &provider {
        let deployment_name = std::env::var("AZURE_DEPLOYMENT_NAME")
            .map_err(|_| "Missing required env var for Azure: AZURE_DEPLOYMENT_NAME".to_string())?;
        let api_version = std::env::var("AZURE_API_VERSION")
            .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string());
        provider = Provider::AzureOpenAI {
            deployment_name,
            api_version,
        };
    }

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
    })
}
