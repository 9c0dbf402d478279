//! Bidirectional player uuid <-> display name cache.
//!
//! Three layers: an in-process map, a shared Redis hash pair, and an
//! optional remote resolution service behind [`RemoteResolver`]. The
//! directory is a best-effort cache, never a source of identity truth:
//! store failures degrade to misses, a fresher resolution silently
//! overwrites an older one, and remote failures are never cached.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::PresenceError;
use crate::pool::ConnectionPool;
use crate::store::keys::{NAME_TO_UUID_KEY, UUID_TO_NAME_KEY};

/// External identity-resolution service. The crate ships no client; hosts
/// plug in whatever their backend naming service is.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    async fn uuid_for_name(&self, name: &str) -> Result<Option<Uuid>, PresenceError>;
    async fn name_for_uuid(&self, player: Uuid) -> Result<Option<String>, PresenceError>;
}

#[derive(Debug, Clone)]
struct CachedUuid {
    uuid: Uuid,
    /// true when confirmed by the remote service, false when read back from
    /// the shared store (may be stale)
    fresh: bool,
}

#[derive(Debug, Clone)]
struct CachedName {
    name: String,
    fresh: bool,
}

pub struct UuidNameDirectory {
    pool: ConnectionPool,
    resolver: Option<Arc<dyn RemoteResolver>>,
    name_to_uuid: DashMap<String, CachedUuid>,
    uuid_to_name: DashMap<Uuid, CachedName>,
}

impl UuidNameDirectory {
    pub fn new(pool: ConnectionPool, resolver: Option<Arc<dyn RemoteResolver>>) -> Self {
        Self {
            pool,
            resolver,
            name_to_uuid: DashMap::new(),
            uuid_to_name: DashMap::new(),
        }
    }

    /// Forward lookup: display name -> uuid. Names are matched
    /// case-insensitively; identities never are.
    pub async fn resolve_uuid(
        &self,
        name: &str,
        allow_remote: bool,
    ) -> Result<Option<Uuid>, PresenceError> {
        let lookup = name.to_lowercase();

        if let Some(hit) = self.name_to_uuid.get(&lookup) {
            return Ok(Some(hit.uuid));
        }

        match self.store_get_uuid(&lookup).await {
            Ok(Some(uuid)) => {
                self.cache_local(uuid, name, false);
                return Ok(Some(uuid));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "name cache read failed, treating as miss"),
        }

        if !allow_remote {
            return Ok(None);
        }
        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };

        match resolver.uuid_for_name(name).await? {
            Some(uuid) => {
                self.remember(uuid, name).await;
                Ok(Some(uuid))
            }
            None => Ok(None),
        }
    }

    /// Reverse lookup: uuid -> display name, same fallback chain.
    pub async fn resolve_name(
        &self,
        player: Uuid,
        allow_remote: bool,
    ) -> Result<Option<String>, PresenceError> {
        if let Some(hit) = self.uuid_to_name.get(&player) {
            return Ok(Some(hit.name.clone()));
        }

        match self.store_get_name(player).await {
            Ok(Some(name)) => {
                self.cache_local(player, &name, false);
                return Ok(Some(name));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "name cache read failed, treating as miss"),
        }

        if !allow_remote {
            return Ok(None);
        }
        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };

        match resolver.name_for_uuid(player).await? {
            Some(name) => {
                self.remember(player, &name).await;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// A remote-confirmed resolution is written to both layers. The store
    /// write-back is best effort; losing it only costs a future remote call.
    async fn remember(&self, player: Uuid, name: &str) {
        self.cache_local(player, name, true);

        match self.pool.acquire().await {
            Ok(mut conn) => {
                let mut p = redis::pipe();
                p.hset(NAME_TO_UUID_KEY, name.to_lowercase(), player.to_string())
                    .ignore();
                p.hset(UUID_TO_NAME_KEY, player.to_string(), name).ignore();
                if let Err(e) = p.query_async::<_, ()>(&mut *conn).await {
                    warn!(error = %e, "name cache write-back failed");
                }
            }
            Err(e) => warn!(error = %e, "name cache write-back skipped"),
        }
    }

    fn cache_local(&self, player: Uuid, name: &str, fresh: bool) {
        self.name_to_uuid.insert(
            name.to_lowercase(),
            CachedUuid {
                uuid: player,
                fresh,
            },
        );
        self.uuid_to_name.insert(
            player,
            CachedName {
                name: name.to_string(),
                fresh,
            },
        );
    }

    async fn store_get_uuid(&self, lookup: &str) -> Result<Option<Uuid>, PresenceError> {
        let mut conn = self.pool.acquire().await?;
        let raw: Option<String> = conn
            .hget(NAME_TO_UUID_KEY, lookup)
            .await
            .map_err(PresenceError::from)?;
        Ok(raw.and_then(|s| match Uuid::parse_str(&s) {
            Ok(uuid) => Some(uuid),
            Err(_) => {
                warn!(%s, "malformed uuid in shared name cache");
                None
            }
        }))
    }

    async fn store_get_name(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
        let mut conn = self.pool.acquire().await?;
        conn.hget(UUID_TO_NAME_KEY, player.to_string())
            .await
            .map_err(PresenceError::from)
    }

    /// Whether the locally cached mapping for this player was confirmed by
    /// the remote service (`true`) or merely read back from the shared store
    /// (`false`). `None` when the player is not cached locally.
    pub fn is_fresh(&self, player: Uuid) -> Option<bool> {
        self.uuid_to_name.get(&player).map(|hit| hit.fresh)
    }

    /// Forward-direction counterpart of [`is_fresh`](Self::is_fresh).
    pub fn is_name_fresh(&self, name: &str) -> Option<bool> {
        self.name_to_uuid
            .get(&name.to_lowercase())
            .map(|hit| hit.fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::redis_config::RedisConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StubResolver {
        uuid: Uuid,
        name: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteResolver for StubResolver {
        async fn uuid_for_name(&self, name: &str) -> Result<Option<Uuid>, PresenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((name.eq_ignore_ascii_case(&self.name)).then_some(self.uuid))
        }

        async fn name_for_uuid(&self, player: Uuid) -> Result<Option<String>, PresenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((player == self.uuid).then(|| self.name.clone()))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl RemoteResolver for FailingResolver {
        async fn uuid_for_name(&self, _name: &str) -> Result<Option<Uuid>, PresenceError> {
            Err(PresenceError::RemoteResolution("service down".into()))
        }

        async fn name_for_uuid(&self, _player: Uuid) -> Result<Option<String>, PresenceError> {
            Err(PresenceError::RemoteResolution("service down".into()))
        }
    }

    fn directory_with(resolver: Arc<dyn RemoteResolver>) -> UuidNameDirectory {
        let config = RedisConfig::with_addr("127.0.0.1", 6379).unwrap();
        let pool = ConnectionPool::new(config, 2, Duration::from_millis(200));
        UuidNameDirectory::new(pool, Some(resolver))
    }

    #[tokio::test]
    async fn remote_resolution_populates_both_directions() {
        let uuid = Uuid::new_v4();
        // unique name so a live store, if present, cannot satisfy the lookup
        let name = format!("Player_{}", &uuid.simple().to_string()[..8]);
        let resolver = Arc::new(StubResolver {
            uuid,
            name: name.clone(),
            calls: AtomicU32::new(0),
        });
        let directory = directory_with(resolver.clone());

        let resolved = directory.resolve_uuid(&name, true).await.unwrap();
        assert_eq!(resolved, Some(uuid));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(directory.is_fresh(uuid), Some(true));

        // reverse lookup must now be served from the local layer
        let reverse = directory.resolve_name(uuid, false).await.unwrap();
        assert_eq!(reverse, Some(name));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_disallowed_returns_none() {
        let uuid = Uuid::new_v4();
        let name = format!("Player_{}", &uuid.simple().to_string()[..8]);
        let resolver = Arc::new(StubResolver {
            uuid,
            name: name.clone(),
            calls: AtomicU32::new(0),
        });
        let directory = directory_with(resolver.clone());

        let resolved = directory.resolve_uuid(&name, false).await.unwrap();
        assert_eq!(resolved, None);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_failure_is_surfaced_and_never_cached() {
        let uuid = Uuid::new_v4();
        let name = format!("Player_{}", &uuid.simple().to_string()[..8]);
        let directory = directory_with(Arc::new(FailingResolver));

        let err = directory.resolve_uuid(&name, true).await.unwrap_err();
        assert!(matches!(err, PresenceError::RemoteResolution(_)));
        assert!(directory.name_to_uuid.get(&name.to_lowercase()).is_none());
        assert!(directory.is_fresh(uuid).is_none());
    }

    #[tokio::test]
    async fn later_resolution_overwrites_older_name() {
        let uuid = Uuid::new_v4();
        let old_name = format!("Old_{}", &uuid.simple().to_string()[..8]);
        let new_name = format!("New_{}", &uuid.simple().to_string()[..8]);
        let resolver = Arc::new(StubResolver {
            uuid,
            name: new_name.clone(),
            calls: AtomicU32::new(0),
        });
        let directory = directory_with(resolver);

        directory.cache_local(uuid, &old_name, false);
        let resolved = directory.resolve_uuid(&new_name, true).await.unwrap();
        assert_eq!(resolved, Some(uuid));

        let reverse = directory.resolve_name(uuid, false).await.unwrap();
        assert_eq!(reverse, Some(new_name));
    }
}
