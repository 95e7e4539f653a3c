use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::db::Tier;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Which vendor protocol the upstream speaks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    DeepSeek,
    Ollama,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub provider: Provider,
    pub base_url: Option<String>,
    pub api_key: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub history_limit: u32,
    pub title_max_chars: usize,
    pub auto_classify: bool,
}

/// One entry of the model catalog and the lowest tier allowed to use it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub tier: Tier,
}

/// Roughly a century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Deserialize, Clone)]
pub struct RecycleBinConfig {
    /// Zero or less disables purging.
    pub retention_days: i64,
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub pretty: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    pub chat: ChatConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelInfo>,
    pub recycle_bin: RecycleBinConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

fn default_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "gpt-4o-mini".to_string(),
            name: "GPT-4o mini".to_string(),
            tier: Tier::Free,
        },
        ModelInfo {
            id: "gpt-4o".to_string(),
            name: "GPT-4o".to_string(),
            tier: Tier::Pro,
        },
    ]
}

fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("environment", "development")?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("database.url", "sqlite://parley.db?mode=rwc")?
        .set_default("database.max_connections", 5)?
        .set_default("auth.jwt_secret", "development_secret")?
        .set_default("upstream.provider", "openai")?
        .set_default("upstream.api_key", "")?
        .set_default("upstream.timeout_secs", 120)?
        .set_default("upstream.connect_timeout_secs", 10)?
        .set_default("chat.system_prompt", "You are a helpful assistant.")?
        .set_default("chat.history_limit", 20)?
        .set_default("chat.title_max_chars", 30)?
        .set_default("chat.auto_classify", false)?
        .set_default("recycle_bin.retention_days", 30)?
        .set_default("recycle_bin.purge_interval_secs", 3600)?
        .set_default("cors.enabled", true)?
        .set_default("cors.allow_any_origin", true)?
        .set_default("cors.max_age", 3600)?
        .set_default("logging.level", "info")?
        .set_default("logging.pretty", true)
}

fn app_environment() -> Environment {
    // E.g., `APP_UPSTREAM__API_KEY=sk-...` sets `Settings.upstream.api_key`
    Environment::with_prefix("app")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(app_environment())
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for tests and local tooling: in-memory database, no file or env sources.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("app").source(Some(Default::default())))
    }

    /// Test defaults overlaid with an explicit environment source.
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = with_defaults(Config::builder())?
            .set_default("environment", "test")?
            .set_default("server.workers", 1)?
            .set_default("database.url", "sqlite::memory:")?
            .set_default("database.max_connections", 1)?
            .set_default("auth.jwt_secret", "test_secret")?
            .set_default("upstream.timeout_secs", 5)?
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::Message("at least one model must be configured".into()));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Message("auth.jwt_secret must not be empty".into()));
        }
        if self.chat.history_limit == 0 {
            return Err(ConfigError::Message("chat.history_limit must be positive".into()));
        }
        if self.recycle_bin.purge_interval_secs == 0 {
            return Err(ConfigError::Message("recycle_bin.purge_interval_secs must be positive".into()));
        }
        if self.recycle_bin.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Message(format!(
                "recycle_bin.retention_days must not exceed {}",
                MAX_RETENTION_DAYS
            )));
        }
        url::Url::parse(self.upstream.base_url())
            .map_err(|e| ConfigError::Message(format!("invalid upstream.base_url: {}", e)))?;
        Ok(())
    }
}
