//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment and an optional file.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init(path: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    let app_config = load(path)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration without touching the global, optionally from an explicit file.
pub fn load(path: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let defaults = AppConfig::default();
    let file = match path {
        Some(path) => config::File::with_name(path).required(true),
        None => config::File::with_name("config").required(false),
    };

    let cfg = config::Config::builder()
        // Defaults
        .set_default("database.url", defaults.database.url)?
        .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
        .set_default("database.min_connections", i64::from(defaults.database.min_connections))?
        .set_default("database.statement_timeout_ms", defaults.database.statement_timeout_ms as i64)?
        .set_default("store.rollback_attempts", i64::from(defaults.store.rollback_attempts))?
        .set_default("limits.max_roles_per_chat", i64::from(defaults.limits.max_roles_per_chat))?
        .set_default("limits.max_role_name_length", i64::from(defaults.limits.max_role_name_length))?
        .set_default("log.filter", defaults.log.filter)?
        .set_default("log.json", defaults.log.json)?
        .add_source(file)
        // Environment variables (PARLEY__DATABASE__URL, PARLEY__STORE__ROLLBACK_ATTEMPTS, etc.)
        .add_source(
            config::Environment::with_prefix("PARLEY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Per-statement timeout applied to every pooled connection
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/parley".into(),
            max_connections: 20,
            min_connections: 2,
            statement_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// How many times a failed reorder rollback is retried before it is reported as fatal
    pub rollback_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { rollback_attempts: 3 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_roles_per_chat: u32,
    pub max_role_name_length: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_roles_per_chat: 250,
            max_role_name_length: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "parley=info".into(),
            json: false,
        }
    }
}
