use serde::{Deserialize, Serialize};
use std::fs;
use anyhow::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mysql_port: u16,
    /// Default cap applied to users whose catalog entry does not set one.
    pub max_connections_per_user: u32,
    /// Default per-user QPS cap over a 1-second window.
    pub query_quota_per_user: u32,
    pub read_buffer_size: usize,
    pub send_buffer_size: usize,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mysql_port: 9030,
            max_connections_per_user: 4000,
            query_quota_per_user: 3000,
            read_buffer_size: 8192,
            send_buffer_size: 8192,
            users: vec![UserEntry {
                username: "root".to_string(),
                password: "root".to_string(),
                namespace: "default".to_string(),
            }],
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Try to load from config file, otherwise use defaults
        match fs::read_to_string("granite_fe.json") {
            Ok(content) => {
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            Err(_) => {
                // Use default config
                let config = Config::default();
                // Save default config for reference
                let _ = fs::write(
                    "granite_fe.json.example",
                    serde_json::to_string_pretty(&config)?,
                );
                Ok(config)
            }
        }
    }
}
