// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::packet::{ResponseFrame, STATUS_UNHANDLED};
use crate::error::ProtocolError;
use crate::mesh::peer::MeshPeer;
use crate::protocol::handshake::*;
use crate::protocol::types::{local_request_types, PlayerKind, PlayerProfile, REQ_PLAYER_PING};

fn peer(hostname: &str) -> MeshPeer {
    MeshPeer {
        hostname: hostname.into(),
        ipv4: "10.126.126.1/24".into(),
        ..MeshPeer::default()
    }
}

#[test]
fn test_stages_only_move_forward() {
    let mut stage = HandshakeStage::Idle;
    let mut visited = vec![stage];
    while let Some(next) = stage.next() {
        assert!(stage.can_advance_to(next));
        assert!(next > stage);
        stage = next;
        visited.push(stage);
    }
    assert_eq!(stage, HandshakeStage::Ready);
    assert_eq!(visited.len(), 8);

    assert!(!HandshakeStage::Idle.can_advance_to(HandshakeStage::PeerDiscovery));
    assert!(!HandshakeStage::RosterSync.can_advance_to(HandshakeStage::PortForwarding));
    assert!(HandshakeStage::TunnelConnecting.can_advance_to(HandshakeStage::Faulted));
    assert!(!HandshakeStage::Ready.can_advance_to(HandshakeStage::Faulted));
    assert!(!HandshakeStage::Faulted.can_advance_to(HandshakeStage::Faulted));
}

#[test]
fn test_host_selection() {
    assert!(select_host(&[]).unwrap().is_none());
    assert!(select_host(&[peer("laptop"), peer("desktop")]).unwrap().is_none());

    let host = select_host(&[peer("laptop"), peer("scaffolding-mc-server-13448")])
        .unwrap()
        .expect("one host");
    assert_eq!(host.host_port().unwrap(), 13448);

    let err = select_host(&[
        peer("scaffolding-mc-server-1000"),
        peer("laptop"),
        peer("scaffolding-mc-server-2000"),
    ])
    .unwrap_err();
    assert!(matches!(err, ProtocolError::AmbiguousHost));
}

#[test]
fn test_protocol_list_encoding() {
    let local = local_request_types(&[]);
    let encoded = encode_protocols(&local);
    assert_eq!(encoded.iter().filter(|&&b| b == 0).count(), local.len() - 1);
    assert_eq!(parse_supported(&encoded), local);

    assert_eq!(parse_supported(b"c:ping\0\0c:protocols\0"), ["c:ping", "c:protocols"]);
    assert!(parse_supported(b"").is_empty());
}

#[test]
fn test_server_port_response() {
    assert_eq!(
        parse_server_port(&ResponseFrame::ok(vec![0x63, 0xDD])).unwrap(),
        25565
    );
    assert!(matches!(
        parse_server_port(&ResponseFrame::new(STATUS_UNHANDLED, vec![0x63, 0xDD])),
        Err(ProtocolError::HandshakeProtocolError(_))
    ));
    assert!(matches!(
        parse_server_port(&ResponseFrame::ok(vec![1, 2, 3])),
        Err(ProtocolError::HandshakeProtocolError(_))
    ));
}

#[test]
fn test_player_ping_payload() {
    let mut profile = PlayerProfile {
        name: "Steve".into(),
        machine_id: "abc".into(),
        vendor: "mesh-room".into(),
        easytier_id: None,
        kind: PlayerKind::Guest,
    };

    let frame = player_ping_frame(&profile).unwrap();
    assert_eq!(frame.request_type(), REQ_PLAYER_PING);
    let json: serde_json::Value = serde_json::from_slice(frame.data()).unwrap();
    assert_eq!(json["name"], "Steve");
    assert_eq!(json["kind"], "Guest");
    assert!(json.get("easytier_id").is_none());

    profile.easytier_id = Some("3735928559".into());
    let frame = player_ping_frame(&profile).unwrap();
    let json: serde_json::Value = serde_json::from_slice(frame.data()).unwrap();
    assert_eq!(json["easytier_id"], "3735928559");
}
