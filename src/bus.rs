//! Fire-and-forget command broadcast between proxies.
//!
//! `broadcast` publishes a versioned JSON envelope on one shared channel;
//! every live proxy, the publisher included, runs a subscriber task that
//! dispatches the payload to a locally registered handler. Delivery is
//! whatever Redis pub/sub gives: at-most-once, ordered per publisher only.

use dashmap::DashMap;
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::redis_config::RedisConfig;
use crate::error::PresenceError;
use crate::pool::ConnectionPool;

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CommandEnvelope {
    version: u32,
    payload: String,
}

/// Handler for one instruction name; receives the payload minus the name.
pub type CommandHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub struct ProxyCommandBus {
    pool: ConnectionPool,
    // pub/sub needs its own dedicated connection, never a pooled one
    client: redis::Client,
    channel: String,
    handlers: DashMap<String, CommandHandler>,
}

impl ProxyCommandBus {
    pub fn new(config: &RedisConfig, pool: ConnectionPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            client: config.client.clone(),
            channel: channel.into(),
            handlers: DashMap::new(),
        }
    }

    /// Map an instruction name (the payload's first whitespace-delimited
    /// token) to a handler. A later registration replaces the earlier one.
    pub fn register_handler(&self, instruction: impl Into<String>, handler: CommandHandler) {
        self.handlers.insert(instruction.into(), handler);
    }

    /// Publish a payload to every live proxy. Returns once Redis accepts the
    /// publication; nobody waits for subscribers.
    pub async fn broadcast(&self, payload: &str) -> Result<(), PresenceError> {
        let message = serde_json::to_string(&CommandEnvelope {
            version: ENVELOPE_VERSION,
            payload: payload.to_string(),
        })?;

        let mut conn = self.pool.acquire().await?;
        conn.publish::<_, _, ()>(&self.channel, message)
            .await
            .map_err(PresenceError::from)
    }

    /// Run the received payload through the local handler registry.
    pub fn dispatch(&self, payload: &str) {
        let (instruction, args) = split_instruction(payload);
        if instruction.is_empty() {
            return;
        }
        match self.handlers.get(instruction) {
            Some(handler) => handler(args),
            None => warn!(%instruction, "no handler registered for proxy command"),
        }
    }

    /// Subscribe and dispatch until the connection dies, then reconnect.
    pub fn spawn_subscriber(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run_subscriber().await {
                    warn!(error = %e, "command subscriber lost its connection, reconnecting");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    }

    async fn run_subscriber(&self) -> Result<(), PresenceError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&self.channel).await?;
        debug!(channel = %self.channel, "subscribed to command channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let raw: String = match msg.get_payload() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "dropping unreadable pub/sub message");
                    continue;
                }
            };
            if let Some(payload) = decode(&raw) {
                self.dispatch(&payload);
            }
        }
        Ok(())
    }
}

/// Unwrap the envelope, dropping unknown versions and malformed messages.
fn decode(message: &str) -> Option<String> {
    match serde_json::from_str::<CommandEnvelope>(message) {
        Ok(envelope) if envelope.version == ENVELOPE_VERSION => Some(envelope.payload),
        Ok(envelope) => {
            warn!(version = envelope.version, "dropping proxy command with unsupported version");
            None
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed proxy command");
            None
        }
    }
}

fn split_instruction(payload: &str) -> (&str, &str) {
    let payload = payload.trim();
    match payload.split_once(char::is_whitespace) {
        Some((instruction, args)) => (instruction, args.trim_start()),
        None => (payload, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn split_instruction_cases() {
        assert_eq!(split_instruction("alert server restarting"), ("alert", "server restarting"));
        assert_eq!(split_instruction("reload"), ("reload", ""));
        assert_eq!(split_instruction("  kick  bob  "), ("kick", "bob"));
        assert_eq!(split_instruction(""), ("", ""));
    }

    #[test]
    fn decode_accepts_current_version_only() {
        let ok = serde_json::to_string(&CommandEnvelope {
            version: ENVELOPE_VERSION,
            payload: "alert hi".to_string(),
        })
        .unwrap();
        assert_eq!(decode(&ok).as_deref(), Some("alert hi"));

        let future = serde_json::to_string(&CommandEnvelope {
            version: ENVELOPE_VERSION + 1,
            payload: "alert hi".to_string(),
        })
        .unwrap();
        assert_eq!(decode(&future), None);

        assert_eq!(decode("not json"), None);
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let config = RedisConfig::with_addr("127.0.0.1", 6379).unwrap();
        let pool = ConnectionPool::new(config.clone(), 1, Duration::from_millis(100));
        let bus = ProxyCommandBus::new(&config, pool, "test-channel");

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.register_handler(
            "alert",
            Arc::new(move |args: &str| sink.lock().push(args.to_string())),
        );

        bus.dispatch("alert maintenance in 5");
        bus.dispatch("unknown instruction");
        assert_eq!(*seen.lock(), vec!["maintenance in 5".to_string()]);
    }
}
