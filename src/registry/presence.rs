//! Authoritative shared mapping of player -> (proxy, server, address) and
//! proxy -> member set.
//!
//! Every mutation is a single MULTI/EXEC pipeline so a crash mid-operation
//! can never leave the per-player hash and the per-proxy set disagreeing.
//! Cross-proxy races on the same player resolve last-writer-wins.

use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PresenceError;
use crate::pool::ConnectionPool;
use crate::store::keys::{self, HEARTBEATS_KEY};
use crate::store::retry::RETRY_OPT;
use crate::tool::current_time;

const FIELD_PROXY: &str = "proxy";
const FIELD_SERVER: &str = "server";
const FIELD_IP: &str = "ip";

/// Answer to "when was this player last online".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOnline {
    Online,
    At(i64),
    Never,
}

/// One consistent view of everyone online. The total is derived from the
/// grouping, so the two can never disagree within a snapshot.
#[derive(Debug, Default)]
pub struct OnlineSnapshot {
    pub total: usize,
    pub by_server: HashMap<String, HashSet<Uuid>>,
}

#[derive(Clone)]
pub struct PresenceRegistry {
    pool: ConnectionPool,
}

impl PresenceRegistry {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Register a player on a proxy. Idempotent: a repeated join overwrites
    /// the record, and a join racing a reconnect evicts the membership entry
    /// the previous proxy still holds, inside the same transaction.
    pub async fn record_join(
        &self,
        player: Uuid,
        proxy_id: &str,
        server_id: &str,
        address: &str,
    ) -> Result<(), PresenceError> {
        let player_key = keys::player_key(&player);
        let member = player.to_string();
        let mut conn = self.pool.acquire().await?;

        let prev_proxy: Option<String> = conn
            .hget(&player_key, FIELD_PROXY)
            .await
            .map_err(PresenceError::from)?;

        let mut p = redis::pipe();
        p.atomic();
        if let Some(prev) = prev_proxy.filter(|p| p.as_str() != proxy_id) {
            p.srem(keys::proxy_members_key(&prev), &member).ignore();
        }
        p.hset_multiple(
            &player_key,
            &[
                (FIELD_PROXY, proxy_id),
                (FIELD_SERVER, server_id),
                (FIELD_IP, address),
            ],
        )
        .ignore();
        p.sadd(keys::proxy_members_key(proxy_id), &member).ignore();
        p.del(keys::last_seen_key(&player)).ignore();
        p.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(PresenceError::from)?;
        Ok(())
    }

    /// Update only the server field, and only while the record still exists.
    /// A lagging switch for a player who already left must not resurrect the
    /// record, so the existence check and the write happen in one script.
    pub async fn record_server_switch(
        &self,
        player: Uuid,
        server_id: &str,
    ) -> Result<(), PresenceError> {
        let script = redis::Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 1 then
                redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
                return 1
            end
            return 0
            "#,
        );

        let mut conn = self.pool.acquire().await?;
        let updated: i32 = script
            .key(keys::player_key(&player))
            .arg(FIELD_SERVER)
            .arg(server_id)
            .invoke_async(&mut *conn)
            .await
            .map_err(PresenceError::from)?;

        if updated == 0 {
            debug!(%player, %server_id, "ignoring server switch for a player with no record");
        }
        Ok(())
    }

    /// Remove the record and the membership entry, stamping the last-seen
    /// time in the same transaction. Idempotent: no record, no-op.
    pub async fn record_leave(&self, player: Uuid) -> Result<(), PresenceError> {
        let player_key = keys::player_key(&player);
        let mut conn = self.pool.acquire().await?;

        let owner: Option<String> = conn
            .hget(&player_key, FIELD_PROXY)
            .await
            .map_err(PresenceError::from)?;
        let Some(owner) = owner else {
            return Ok(());
        };

        let mut p = redis::pipe();
        p.atomic();
        p.del(&player_key).ignore();
        p.srem(keys::proxy_members_key(&owner), player.to_string())
            .ignore();
        p.set(keys::last_seen_key(&player), current_time::now_secs())
            .ignore();
        p.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(PresenceError::from)?;
        Ok(())
    }

    pub async fn get_server_for(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.get_record_field(player, FIELD_SERVER).await
    }

    pub async fn get_proxy_for(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.get_record_field(player, FIELD_PROXY).await
    }

    /// Only defined for currently-online players.
    pub async fn get_player_ip(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        self.get_record_field(player, FIELD_IP).await
    }

    pub async fn get_last_online(&self, player: Uuid) -> Result<LastOnline, PresenceError> {
        let player_key = keys::player_key(&player);
        let last_seen_key = keys::last_seen_key(&player);

        let (online, last_seen): (bool, Option<i64>) = RETRY_OPT
            .execute(|| {
                let player_key = player_key.clone();
                let last_seen_key = last_seen_key.clone();
                async move {
                    let mut conn = self.pool.acquire().await?;
                    let mut p = redis::pipe();
                    p.atomic();
                    p.exists(&player_key);
                    p.get(&last_seen_key);
                    p.query_async(&mut *conn).await.map_err(PresenceError::from)
                }
            })
            .await?;

        Ok(if online {
            LastOnline::Online
        } else {
            match last_seen {
                Some(ts) => LastOnline::At(ts),
                None => LastOnline::Never,
            }
        })
    }

    /// Cheap fleet-wide count: sum of membership set sizes.
    pub async fn get_player_count(&self) -> Result<usize, PresenceError> {
        let proxies = self.get_all_proxy_ids().await?;
        if proxies.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        let mut p = redis::pipe();
        for proxy in &proxies {
            p.scard(keys::proxy_members_key(proxy));
        }
        let counts: Vec<usize> = p
            .query_async(&mut *conn)
            .await
            .map_err(PresenceError::from)?;
        Ok(counts.into_iter().sum())
    }

    /// Everyone online, grouped by backend server.
    pub async fn get_all_online(&self) -> Result<OnlineSnapshot, PresenceError> {
        let proxies = self.get_all_proxy_ids().await?;
        if proxies.is_empty() {
            return Ok(OnlineSnapshot::default());
        }

        let mut conn = self.pool.acquire().await?;

        let mut p = redis::pipe();
        for proxy in &proxies {
            p.smembers(keys::proxy_members_key(proxy));
        }
        let member_sets: Vec<Vec<String>> = p
            .query_async(&mut *conn)
            .await
            .map_err(PresenceError::from)?;

        let players: Vec<Uuid> = member_sets
            .into_iter()
            .flatten()
            .filter_map(|raw| parse_member(&raw))
            .collect();
        if players.is_empty() {
            return Ok(OnlineSnapshot::default());
        }

        let mut p = redis::pipe();
        for player in &players {
            p.hget(keys::player_key(player), FIELD_SERVER);
        }
        let servers: Vec<Option<String>> = p
            .query_async(&mut *conn)
            .await
            .map_err(PresenceError::from)?;

        Ok(group_by_server(players.into_iter().zip(servers).collect()))
    }

    /// Members currently owned by one proxy; empty for unknown or dead ids.
    pub async fn get_players_on_proxy(
        &self,
        proxy_id: &str,
    ) -> Result<HashSet<Uuid>, PresenceError> {
        let key = keys::proxy_members_key(proxy_id);
        let members: Vec<String> = RETRY_OPT
            .execute(|| {
                let key = key.clone();
                async move {
                    let mut conn = self.pool.acquire().await?;
                    conn.smembers(&key).await.map_err(PresenceError::from)
                }
            })
            .await?;
        Ok(members.iter().filter_map(|raw| parse_member(raw)).collect())
    }

    /// Proxies with a registered heartbeat, live or not yet reclaimed.
    pub async fn get_all_proxy_ids(&self) -> Result<HashSet<String>, PresenceError> {
        RETRY_OPT
            .execute(|| async move {
                let mut conn = self.pool.acquire().await?;
                conn.hkeys(HEARTBEATS_KEY)
                    .await
                    .map_err(PresenceError::from)
            })
            .await
    }

    /// Distinct backend servers observed among current records.
    pub async fn get_all_server_ids(&self) -> Result<HashSet<String>, PresenceError> {
        let snapshot = self.get_all_online().await?;
        Ok(snapshot.by_server.into_keys().collect())
    }

    async fn get_record_field(
        &self,
        player: Uuid,
        field: &'static str,
    ) -> Result<Option<String>, PresenceError> {
        let key = keys::player_key(&player);
        RETRY_OPT
            .execute(|| {
                let key = key.clone();
                async move {
                    let mut conn = self.pool.acquire().await?;
                    conn.hget(&key, field).await.map_err(PresenceError::from)
                }
            })
            .await
    }
}

fn parse_member(raw: &str) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(%raw, "skipping malformed uuid in membership set");
            None
        }
    }
}

/// Group a snapshot of (player, server) pairs. Players whose record vanished
/// between the set scan and the field fetch are skipped; the total is the sum
/// of the groups by construction.
fn group_by_server(pairs: Vec<(Uuid, Option<String>)>) -> OnlineSnapshot {
    let mut by_server: HashMap<String, HashSet<Uuid>> = HashMap::new();
    for (player, server) in pairs {
        if let Some(server) = server {
            by_server.entry(server).or_default().insert(player);
        }
    }
    let total = by_server.values().map(HashSet::len).sum();
    OnlineSnapshot { total, by_server }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_total_matches_group_sizes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let snapshot = group_by_server(vec![
            (a, Some("lobby".to_string())),
            (b, Some("lobby".to_string())),
            (c, Some("pvp".to_string())),
        ]);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.by_server["lobby"].len(), 2);
        assert_eq!(snapshot.by_server["pvp"].len(), 1);
    }

    #[test]
    fn grouping_skips_vanished_records() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let snapshot = group_by_server(vec![(a, Some("lobby".to_string())), (b, None)]);
        assert_eq!(snapshot.total, 1);
        assert!(!snapshot.by_server.contains_key(""));
    }

    #[test]
    fn grouping_deduplicates_players() {
        let a = Uuid::new_v4();
        let snapshot = group_by_server(vec![
            (a, Some("lobby".to_string())),
            (a, Some("lobby".to_string())),
        ]);
        assert_eq!(snapshot.total, 1);
    }

    #[test]
    fn malformed_members_are_skipped() {
        assert!(parse_member("not-a-uuid").is_none());
        let id = Uuid::new_v4();
        assert_eq!(parse_member(&id.to_string()), Some(id));
    }
}
