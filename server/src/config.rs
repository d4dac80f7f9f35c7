//! Configuration management for Harvest Chat Server

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub typing: TypingConfig,
    pub admin: AdminConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub quick_replies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite file, or `:memory:` for a throwaway store.
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// A typing signal not refreshed within this window is dropped.
    pub timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub master_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_message_length: usize,
    pub max_conversations_listed: usize,
}

impl Config {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).await?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            let content = toml::to_string_pretty(&config)?;
            fs::write(path, content).await?;
            tracing::info!("Created default config at {}", path);
            Ok(config)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9443,
            },
            storage: StorageConfig {
                database_path: "./data/harvest-chat.db".to_string(),
            },
            typing: TypingConfig {
                timeout_ms: 3000,
                sweep_interval_ms: 500,
            },
            admin: AdminConfig {
                master_key: "CHANGE-THIS-ADMIN-KEY-IMMEDIATELY".to_string(),
            },
            limits: LimitsConfig {
                max_message_length: harvest_chat_core::validation::DEFAULT_MAX_MESSAGE_LENGTH,
                max_conversations_listed: 500,
            },
            quick_replies: vec![
                "Is this still available?".to_string(),
                "When is the next harvest?".to_string(),
                "Do you offer delivery?".to_string(),
                "Can I pick up at the farm?".to_string(),
                "Thanks, I'll place the order!".to_string(),
            ],
        }
    }
}
