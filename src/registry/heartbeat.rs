//! Liveness protocol for proxies that die without deregistering.
//!
//! Every proxy refreshes its own field in the `heartbeats` hash on a fixed
//! interval and scans the others. A proxy whose beat is older than the
//! liveness threshold becomes a local suspect; if its beat has not advanced
//! by the next scan it is reclaimed: all of its player records are deleted,
//! their last-seen stamps written, and its membership set and heartbeat
//! removed in one transaction. Everything deleted is delete-if-present, so
//! two observers racing on the same dead proxy both succeed.

use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PresenceError;
use crate::pool::ConnectionPool;
use crate::store::keys::{self, HEARTBEATS_KEY};
use crate::tool::current_time;

/// Locally observed state of a remote proxy. `Reclaimed` is absorbing: the
/// id only comes back if a new process writes a fresh heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyLiveness {
    Alive,
    Suspect,
    Reclaimed,
}

/// Decide what to do about a proxy whose beat was read at `now`.
/// `first_suspect_beat` is the beat value recorded when this observer first
/// suspected the proxy; an unchanged beat on the second look means dead.
pub(crate) fn classify(
    now: i64,
    beat: i64,
    threshold_secs: i64,
    first_suspect_beat: Option<i64>,
) -> ProxyLiveness {
    if now - beat <= threshold_secs {
        return ProxyLiveness::Alive;
    }
    match first_suspect_beat {
        Some(prev) if beat <= prev => ProxyLiveness::Reclaimed,
        _ => ProxyLiveness::Suspect,
    }
}

pub struct HeartbeatReconciler {
    pool: ConnectionPool,
    proxy_id: String,
    interval: Duration,
    liveness_threshold: Duration,
    // proxy id -> beat value at first suspicion, local to this observer
    suspects: Mutex<HashMap<String, i64>>,
}

impl HeartbeatReconciler {
    pub fn new(
        pool: ConnectionPool,
        proxy_id: impl Into<String>,
        interval: Duration,
        liveness_threshold: Duration,
    ) -> Self {
        Self {
            pool,
            proxy_id: proxy_id.into(),
            interval,
            liveness_threshold,
            suspects: Mutex::new(HashMap::new()),
        }
    }

    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    /// Write this proxy's heartbeat. Called once at startup before serving
    /// traffic, then on every tick.
    pub async fn beat(&self) -> Result<(), PresenceError> {
        let mut conn = self.pool.acquire().await?;
        conn.hset(HEARTBEATS_KEY, &self.proxy_id, current_time::now_secs())
            .await
            .map_err(PresenceError::from)
    }

    /// One reconciliation round: self-renew, then scan the fleet. Errors are
    /// logged and swallowed; a failed renewal keeps local state and a failed
    /// scan leaves suspects unresolved until the next tick.
    pub async fn tick(&self) {
        if let Err(e) = self.beat().await {
            warn!(error = %e, "heartbeat self-renewal failed, assuming still alive");
        }
        if let Err(e) = self.scan().await {
            warn!(error = %e, "heartbeat scan failed, deferring to next tick");
        }
    }

    async fn scan(&self) -> Result<(), PresenceError> {
        let beats: HashMap<String, i64> = {
            let mut conn = self.pool.acquire().await?;
            conn.hgetall(HEARTBEATS_KEY)
                .await
                .map_err(PresenceError::from)?
        };

        let now = current_time::now_secs();
        let threshold = self.liveness_threshold.as_secs() as i64;

        let mut to_reclaim = Vec::new();
        {
            let mut suspects = self.suspects.lock();
            suspects.retain(|id, _| beats.contains_key(id));
            for (id, beat) in &beats {
                if id == &self.proxy_id {
                    continue;
                }
                match classify(now, *beat, threshold, suspects.get(id).copied()) {
                    ProxyLiveness::Alive => {
                        suspects.remove(id);
                    }
                    ProxyLiveness::Suspect => {
                        suspects.insert(id.clone(), *beat);
                    }
                    ProxyLiveness::Reclaimed => to_reclaim.push(id.clone()),
                }
            }
        }

        for id in to_reclaim {
            match self.reclaim(&id).await {
                Ok(reclaimed) => {
                    info!(proxy = %id, players = reclaimed, "reclaimed dead proxy");
                    self.suspects.lock().remove(&id);
                }
                Err(e) => {
                    warn!(proxy = %id, error = %e, "reclamation failed, will retry next tick");
                }
            }
        }
        Ok(())
    }

    /// Remove everything a dead proxy owned. Returns how many player records
    /// were covered; zero when another observer already won the race.
    async fn reclaim(&self, proxy_id: &str) -> Result<usize, PresenceError> {
        let members_key = keys::proxy_members_key(proxy_id);
        let mut conn = self.pool.acquire().await?;

        let members: Vec<String> = conn
            .smembers(&members_key)
            .await
            .map_err(PresenceError::from)?;
        let now = current_time::now_secs();

        let mut p = redis::pipe();
        p.atomic();
        for raw in &members {
            if let Ok(player) = Uuid::parse_str(raw) {
                p.del(keys::player_key(&player)).ignore();
                p.set(keys::last_seen_key(&player), now).ignore();
            }
        }
        p.del(&members_key).ignore();
        p.hdel(HEARTBEATS_KEY, proxy_id).ignore();
        p.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(PresenceError::from)?;
        Ok(members.len())
    }

    /// Run `tick` forever on the configured interval.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}
