use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub location: LocationConfig,
    /// PostgreSQL connection URL; absent means the in-memory demo store
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Orphan sweeper cadence and staleness threshold
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 120,
        }
    }
}

/// Location persistence throttling
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocationConfig {
    pub persist_window_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            persist_window_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
