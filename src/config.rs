use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::schema::MAX_QUERY_PARAMS;
use crate::validation::InputValidator;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scan: ScanConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Read connections per opened database
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Messages fetched per page while materializing a conversation
    pub message_page_size: usize,
    /// Ids bound per IN-clause when fetching messages by id
    pub max_query_params: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Commit each conversation's inserts atomically
    pub transaction_per_conversation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            scan: ScanConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            message_page_size: 5000,
            max_query_params: MAX_QUERY_PARAMS,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            transaction_per_conversation: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default locations and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering sources from lowest to highest precedence:
    /// built-in defaults, `config/default`, `config/local`, `history-merge`
    /// in the working directory, `explicit` if given, then `HISTORY_MERGE__*`
    /// environment variables.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| anyhow::anyhow!("Failed to build default configuration: {}", e))?;

        let mut builder = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("history-merge").required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        // e.g. HISTORY_MERGE__SCAN__MESSAGE_PAGE_SIZE=1000
        let config = builder
            .add_source(Environment::with_prefix("HISTORY_MERGE").prefix_separator("__").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

        if self.database.pool_size == 0 {
            bail!("database.pool_size must be greater than 0");
        }

        if !LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of {LEVELS:?}, got {:?}", self.logging.level);
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            bail!("logging.format must be \"text\" or \"json\", got {:?}", self.logging.format);
        }

        if self.scan.message_page_size == 0 {
            bail!("scan.message_page_size must be greater than 0");
        }
        InputValidator::validate_query_params(self.scan.max_query_params)
            .context("Invalid scan.max_query_params")?;

        Ok(())
    }

    /// Log filter: `RUST_LOG` wins over the configured level
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
