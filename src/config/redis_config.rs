use dotenv::dotenv;
use redis::Client;
use std::env;
use tracing::info;

use crate::error::PresenceError;

/// Redis endpoint configuration. The client is connection-less; actual
/// connections are created lazily by the pool up to its capacity.
#[derive(Clone)]
pub struct RedisConfig {
    pub client: Client,
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    pub fn from_env() -> Result<Self, PresenceError> {
        // Look for a .env next to the binary first, then in parent dirs.
        let env_paths = ["./.env", "../.env", "../../.env"];
        let mut env_loaded = false;

        for path in env_paths {
            if std::path::Path::new(path).exists() {
                dotenv::from_filename(path).ok();
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            dotenv().ok();
        }

        let host = env::var("redis_host").unwrap_or_else(|_| {
            info!("redis_host not set, falling back to localhost");
            "localhost".to_string()
        });

        let port_str = env::var("redis_port").unwrap_or_else(|_| {
            info!("redis_port not set, falling back to 6379");
            "6379".to_string()
        });

        let port = port_str
            .parse::<u16>()
            .map_err(|_| PresenceError::Configuration(format!("invalid redis_port: {port_str}")))?;

        Self::with_addr(&host, port)
    }

    pub fn with_addr(host: &str, port: u16) -> Result<Self, PresenceError> {
        let client = Client::open(format!("redis://{host}:{port}"))
            .map_err(|e| PresenceError::Configuration(format!("invalid redis address: {e}")))?;
        Ok(Self {
            client,
            host: host.to_string(),
            port,
        })
    }
}
