use std::env;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::keys::COMMAND_CHANNEL;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_LIVENESS_THRESHOLD_SECS: u64 = 30;
const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 2000;

/// Per-process presence settings. Each value can be overridden through the
/// environment; the proxy id must be unique per live process.
#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub proxy_id: String,
    pub heartbeat_interval: Duration,
    pub liveness_threshold: Duration,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub command_channel: String,
}

impl PresenceSettings {
    pub fn from_env() -> Self {
        let proxy_id = env::var("proxy_id").unwrap_or_else(|_| {
            let generated = format!("proxy-{}", &Uuid::new_v4().simple().to_string()[..8]);
            warn!(proxy_id = %generated, "proxy_id not set, generated a random one");
            generated
        });

        Self {
            proxy_id,
            heartbeat_interval: Duration::from_secs(env_u64(
                "heartbeat_interval_secs",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            liveness_threshold: Duration::from_secs(env_u64(
                "liveness_threshold_secs",
                DEFAULT_LIVENESS_THRESHOLD_SECS,
            )),
            pool_size: env_u64("pool_size", DEFAULT_POOL_SIZE as u64) as usize,
            acquire_timeout: Duration::from_millis(env_u64(
                "pool_acquire_timeout_ms",
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )),
            command_channel: env::var("command_channel").unwrap_or_else(|_| {
                COMMAND_CHANNEL.to_string()
            }),
        }
    }

    pub fn with_proxy_id(proxy_id: impl Into<String>) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            ..Self::from_env()
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(%name, %raw, %default, "unparsable env value, using default");
                default
            }
        },
        Err(_) => {
            info!(%name, %default, "env value not set, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_on_missing_or_garbage() {
        assert_eq!(env_u64("presence_test_missing_var", 42), 42);
        env::set_var("presence_test_garbage_var", "not-a-number");
        assert_eq!(env_u64("presence_test_garbage_var", 7), 7);
        env::remove_var("presence_test_garbage_var");
    }

    #[test]
    fn env_u64_reads_valid_values() {
        env::set_var("presence_test_valid_var", "120");
        assert_eq!(env_u64("presence_test_valid_var", 5), 120);
        env::remove_var("presence_test_valid_var");
    }

    #[test]
    fn with_proxy_id_overrides_only_the_id() {
        let settings = PresenceSettings::with_proxy_id("proxy-a");
        assert_eq!(settings.proxy_id, "proxy-a");
        assert!(settings.pool_size > 0);
    }
}
