//! One wired-up entry point per proxy process.
//!
//! `PresenceApi` owns the pool and the components built on it, and exposes
//! the read/write contract the host proxy's command layer and lifecycle
//! hooks consume. Host integration: call `record_join` / `record_server_switch`
//! / `record_leave` from the connect, switch, and disconnect hooks, and
//! `spawn_background` once at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{CommandHandler, ProxyCommandBus};
use crate::config::redis_config::RedisConfig;
use crate::config::settings::PresenceSettings;
use crate::directory::{RemoteResolver, UuidNameDirectory};
use crate::error::PresenceError;
use crate::pool::ConnectionPool;
use crate::registry::heartbeat::HeartbeatReconciler;
use crate::registry::presence::{LastOnline, OnlineSnapshot, PresenceRegistry};

pub struct PresenceApi {
    settings: PresenceSettings,
    pool: ConnectionPool,
    registry: PresenceRegistry,
    directory: UuidNameDirectory,
    reconciler: Arc<HeartbeatReconciler>,
    bus: Arc<ProxyCommandBus>,
}

impl PresenceApi {
    pub fn new(
        redis: RedisConfig,
        settings: PresenceSettings,
        resolver: Option<Arc<dyn RemoteResolver>>,
    ) -> Self {
        let pool = ConnectionPool::new(
            redis.clone(),
            settings.pool_size,
            settings.acquire_timeout,
        );
        let registry = PresenceRegistry::new(pool.clone());
        let directory = UuidNameDirectory::new(pool.clone(), resolver);
        let reconciler = Arc::new(HeartbeatReconciler::new(
            pool.clone(),
            settings.proxy_id.clone(),
            settings.heartbeat_interval,
            settings.liveness_threshold,
        ));
        let bus = Arc::new(ProxyCommandBus::new(
            &redis,
            pool.clone(),
            settings.command_channel.clone(),
        ));

        Self {
            settings,
            pool,
            registry,
            directory,
            reconciler,
            bus,
        }
    }

    pub fn from_env(resolver: Option<Arc<dyn RemoteResolver>>) -> Result<Self, PresenceError> {
        let redis = RedisConfig::from_env()?;
        let settings = PresenceSettings::from_env();
        Ok(Self::new(redis, settings, resolver))
    }

    /// Register this proxy's heartbeat, then start the reconciliation loop
    /// and the command subscriber. Call once, before serving traffic.
    pub async fn spawn_background(&self) -> Result<Vec<JoinHandle<()>>, PresenceError> {
        self.reconciler.beat().await?;
        Ok(vec![
            self.reconciler.clone().spawn(),
            self.bus.clone().spawn_subscriber(),
        ])
    }

    pub fn local_proxy_id(&self) -> &str {
        &self.settings.proxy_id
    }

    // lifecycle hooks

    pub async fn record_join(
        &self,
        player: Uuid,
        server_id: &str,
        address: &str,
    ) -> Result<(), PresenceError> {
        self.registry
            .record_join(player, &self.settings.proxy_id, server_id, address)
            .await
    }

    pub async fn record_server_switch(
        &self,
        player: Uuid,
        server_id: &str,
    ) -> Result<(), PresenceError> {
        self.registry.record_server_switch(player, server_id).await
    }

    pub async fn record_leave(&self, player: Uuid) -> Result<(), PresenceError> {
        self.registry.record_leave(player).await
    }

    // point and aggregate queries

    pub async fn get_player_count(&self) -> Result<usize, PresenceError> {
        self.registry.get_player_count().await
    }

    pub async fn get_server_to_players(
        &self,
    ) -> Result<HashMap<String, HashSet<Uuid>>, PresenceError> {
        Ok(self.registry.get_all_online().await?.by_server)
    }

    pub async fn get_all_online(&self) -> Result<OnlineSnapshot, PresenceError> {
        self.registry.get_all_online().await
    }

    pub async fn get_server_for(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.registry.get_server_for(player).await
    }

    pub async fn get_proxy_for(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.registry.get_proxy_for(player).await
    }

    pub async fn get_last_online(&self, player: Uuid) -> Result<LastOnline, PresenceError> {
        self.registry.get_last_online(player).await
    }

    pub async fn get_player_ip(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.registry.get_player_ip(player).await
    }

    pub async fn get_players_on_proxy(
        &self,
        proxy_id: &str,
    ) -> Result<HashSet<Uuid>, PresenceError> {
        self.registry.get_players_on_proxy(proxy_id).await
    }

    pub async fn get_all_proxy_ids(&self) -> Result<HashSet<String>, PresenceError> {
        self.registry.get_all_proxy_ids().await
    }

    pub async fn get_all_server_ids(&self) -> Result<HashSet<String>, PresenceError> {
        self.registry.get_all_server_ids().await
    }

    // command bus

    pub async fn send_proxy_command(&self, payload: &str) -> Result<(), PresenceError> {
        self.bus.broadcast(payload).await
    }

    pub fn register_command_handler(&self, instruction: impl Into<String>, handler: CommandHandler) {
        self.bus.register_handler(instruction, handler);
    }

    // name directory

    pub async fn resolve_uuid(
        &self,
        name: &str,
        allow_remote: bool,
    ) -> Result<Option<Uuid>, PresenceError> {
        self.directory.resolve_uuid(name, allow_remote).await
    }

    pub async fn resolve_name(
        &self,
        player: Uuid,
        allow_remote: bool,
    ) -> Result<Option<String>, PresenceError> {
        self.directory.resolve_name(player, allow_remote).await
    }

    // pool diagnostics, for the operator-facing debug surface

    pub fn num_active(&self) -> usize {
        self.pool.num_active()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    pub fn num_waiting(&self) -> usize {
        self.pool.num_waiting()
    }
}
