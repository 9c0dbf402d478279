//! Redis keyspace used by the presence registry.
//!
//! player:{uuid}          => hash: proxy, server, ip (exists iff online)
//! player:{uuid}:lastseen => unix seconds, written on leave/reclaim
//! proxy:{id}:members     => set of uuid strings owned by that proxy
//! heartbeats             => hash: proxy id -> unix seconds
//! namecache:uuid         => hash: lowercased name -> uuid string
//! namecache:name         => hash: uuid string -> display name
//! fleet-commands         => pub/sub channel for broadcast commands

use uuid::Uuid;

pub const HEARTBEATS_KEY: &str = "heartbeats";
pub const NAME_TO_UUID_KEY: &str = "namecache:uuid";
pub const UUID_TO_NAME_KEY: &str = "namecache:name";
pub const COMMAND_CHANNEL: &str = "fleet-commands";

pub enum KeyType {
    Player,
    PlayerLastSeen,
    ProxyMembers,
}

impl KeyType {
    pub fn get_key(&self, id: &str) -> String {
        match self {
            KeyType::Player => format!("player:{id}"),
            KeyType::PlayerLastSeen => format!("player:{id}:lastseen"),
            KeyType::ProxyMembers => format!("proxy:{id}:members"),
        }
    }
}

pub fn player_key(player: &Uuid) -> String {
    KeyType::Player.get_key(&player.to_string())
}

pub fn last_seen_key(player: &Uuid) -> String {
    KeyType::PlayerLastSeen.get_key(&player.to_string())
}

pub fn proxy_members_key(proxy_id: &str) -> String {
    KeyType::ProxyMembers.get_key(proxy_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        let id = Uuid::nil();
        assert_eq!(
            player_key(&id),
            "player:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            last_seen_key(&id),
            "player:00000000-0000-0000-0000-000000000000:lastseen"
        );
        assert_eq!(proxy_members_key("proxy-1"), "proxy:proxy-1:members");
    }
}
