//! Distributed presence registry and command bus for a fleet of proxy
//! processes, coordinated through a shared Redis instance.
//!
//! No proxy is a leader and no proxy talks to another directly: player
//! records, per-proxy membership sets, heartbeats, the name cache, and the
//! broadcast channel all live in Redis. Proxies that die without
//! deregistering are detected by heartbeat expiry and their entries are
//! reclaimed by whichever live proxy notices first.

pub mod api;
pub mod bus;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod store;
pub mod tool;

pub use api::PresenceApi;
pub use bus::{CommandHandler, ProxyCommandBus};
pub use config::redis_config::RedisConfig;
pub use config::settings::PresenceSettings;
pub use directory::{RemoteResolver, UuidNameDirectory};
pub use error::PresenceError;
pub use pool::{ConnectionPool, PooledConnection};
pub use registry::heartbeat::{HeartbeatReconciler, ProxyLiveness};
pub use registry::presence::{LastOnline, OnlineSnapshot, PresenceRegistry};
