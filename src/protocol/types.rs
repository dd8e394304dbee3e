//! Request types, player profiles and the shared room snapshot.

use crate::mesh::peer::MeshPeer;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const REQ_PING: &str = "c:ping";
pub const REQ_PROTOCOLS: &str = "c:protocols";
pub const REQ_SERVER_PORT: &str = "c:server_port";
pub const REQ_PLAYER_PING: &str = "c:player_ping";
pub const REQ_PLAYER_PROFILES_LIST: &str = "c:player_profiles_list";
/// Optional capability: guests report their mesh node id in `c:player_ping`.
pub const REQ_PLAYER_EASYTIER_ID: &str = "c:player_easytier_id";

/// Request types every host must accept.
pub const BASE_REQUEST_TYPES: [&str; 5] = [
    REQ_PING,
    REQ_PROTOCOLS,
    REQ_SERVER_PORT,
    REQ_PLAYER_PING,
    REQ_PLAYER_PROFILES_LIST,
];

/// Request types this client offers during negotiation.
pub fn local_request_types(extra: &[String]) -> Vec<String> {
    let mut types: Vec<String> = BASE_REQUEST_TYPES
        .iter()
        .chain(std::iter::once(&REQ_PLAYER_EASYTIER_ID))
        .map(|s| (*s).to_owned())
        .collect();
    for t in extra {
        if !types.contains(t) {
            types.push(t.clone());
        }
    }
    types
}

/// Whether a player hosts the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerKind {
    Host,
    Guest,
}

/// A player as exchanged in `c:player_ping` and `c:player_profiles_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    pub machine_id: String,
    pub vendor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub easytier_id: Option<String>,
    pub kind: PlayerKind,
}

impl PlayerProfile {
    pub fn is_host(&self) -> bool {
        self.kind == PlayerKind::Host
    }
}

/// Session-wide room snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomInfo {
    pub room_code: String,
    pub host_peer: Option<MeshPeer>,
    pub host: Option<PlayerProfile>,
    pub players: Vec<PlayerProfile>,
    /// Request types the host accepted during negotiation.
    pub supported_requests: Vec<String>,
    /// Local port forwarded to the host's game server.
    pub game_port: u16,
    /// Round trip of the most recent keep-alive.
    pub latency: Option<Duration>,
}

impl RoomInfo {
    pub fn supports(&self, request_type: &str) -> bool {
        self.supported_requests.iter().any(|t| t == request_type)
    }
}

/// Shared handle to a [`RoomInfo`].
///
/// Writers replace whole fields under the lock; readers get a consistent
/// clone.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    inner: Arc<RwLock<RoomInfo>>,
}

impl RoomState {
    pub fn new(room_code: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RoomInfo {
                room_code: room_code.into(),
                supported_requests: BASE_REQUEST_TYPES.iter().map(|s| (*s).to_owned()).collect(),
                ..RoomInfo::default()
            })),
        }
    }

    pub fn snapshot(&self) -> RoomInfo {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<F>(&self, mutator: F)
    where
        F: FnOnce(&mut RoomInfo),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        mutator(&mut guard);
    }

    /// Replace the roster and the host entry derived from it.
    pub fn set_players(&self, players: Vec<PlayerProfile>) {
        let host = players.iter().find(|p| p.is_host()).cloned();
        self.update(|info| {
            info.players = players;
            info.host = host;
        });
    }

    pub fn supports(&self, request_type: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .supports(request_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn profile_json_shape() {
        let profile = PlayerProfile {
            name: "Steve".into(),
            machine_id: "abc".into(),
            vendor: "mesh-room".into(),
            easytier_id: None,
            kind: PlayerKind::Guest,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["kind"], "Guest");
        assert!(json.get("easytier_id").is_none());

        let parsed: Vec<PlayerProfile> = serde_json::from_str(
            r#"[{"name":"Alex","machine_id":"m","vendor":"v","easytier_id":"42","kind":"Host"}]"#,
        )
        .unwrap();
        assert!(parsed[0].is_host());
        assert_eq!(parsed[0].easytier_id.as_deref(), Some("42"));
    }

    #[test]
    fn set_players_tracks_host() {
        let state = RoomState::new("U/WJAJ-47A0-KXTU-SEUQ");
        state.set_players(vec![
            PlayerProfile {
                name: "g".into(),
                machine_id: "1".into(),
                vendor: "v".into(),
                easytier_id: None,
                kind: PlayerKind::Guest,
            },
            PlayerProfile {
                name: "h".into(),
                machine_id: "2".into(),
                vendor: "v".into(),
                easytier_id: None,
                kind: PlayerKind::Host,
            },
        ]);
        let info = state.snapshot();
        assert_eq!(info.players.len(), 2);
        assert_eq!(info.host.unwrap().name, "h");
        assert!(state.supports(REQ_PING));
        assert!(!state.supports(REQ_PLAYER_EASYTIER_ID));
    }

    #[test]
    fn local_types_dedupe_extras() {
        let types = local_request_types(&["c:ping".into(), "x:custom".into()]);
        assert_eq!(types.iter().filter(|t| *t == "c:ping").count(), 1);
        assert!(types.contains(&"x:custom".to_string()));
        assert!(types.contains(&REQ_PLAYER_EASYTIER_ID.to_string()));
    }
}
