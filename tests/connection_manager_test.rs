//! Connection manager tests against a loopback signaling server
//!
//! The peer connection is faked through `PeerConnector`, everything else
//! (WebSocket handshake, JSON framing, state machine) is real.

mod common;

use common::*;
use iris_link::signaling::{CandidatePayload, SocketEvent};
use iris_link::webrtc::{IceConnectionState, PeerEvent};
use iris_link::{ConnectionManager, DebugLog, ServerConnectionState};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ServerConnectionState::*;

fn manager(connector: std::sync::Arc<FakeConnector>) -> (ConnectionManager, DebugLog) {
    let log = DebugLog::new();
    (ConnectionManager::new(connector, log.clone()), log)
}

/// Connect and drive the handshake up to the client's offer.
async fn negotiated(
    server: &mut TestServer,
) -> (
    ConnectionManager,
    DebugLog,
    std::sync::Arc<FakeConnector>,
    tokio::sync::mpsc::UnboundedReceiver<ServerConnectionState>,
) {
    let connector = FakeConnector::new();
    let (manager, log) = manager(connector.clone());
    let mut states = manager.subscribe();

    manager.connect(&server.base_url(), "abc").await.unwrap();
    let offer = server.next_signaling_of("offer").await;
    assert_eq!(offer["sdp"], FAKE_OFFER_SDP);

    let seen = wait_for_state(&mut states, Signaling).await;
    assert_eq!(seen, vec![Connecting, Signaling]);
    (manager, log, connector, states)
}

// ═══════════════════════════════════════════════════════════════════════════
// PRECONDITIONS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_blank_secret_never_opens_socket() {
    let server = TestServer::start().await;

    for secret in ["", "   ", "\t\n"] {
        let connector = FakeConnector::new();
        let (manager, log) = manager(connector.clone());
        let mut states = manager.subscribe();

        let result = manager.connect(&server.base_url(), secret).await;
        assert!(matches!(result, Err(iris_link::LinkError::MissingSecret)));
        assert_eq!(manager.state(), Failed);
        assert_eq!(recv(&mut states).await, Failed);
        assert_eq!(connector.session_count(), 0);
        assert!(log.to_text().contains("Missing shared secret"));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.ws_connections.load(Ordering::SeqCst), 0);
    assert!(server.handshakes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_manager_is_single_use() {
    let mut server = TestServer::start().await;
    let (manager, _log, _connector, _states) = negotiated(&mut server).await;

    assert!(manager.connect(&server.base_url(), "abc").await.is_err());
    manager.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_safe_when_never_connected() {
    let (manager, _log) = manager(FakeConnector::new());
    manager.close().await;
    manager.close().await;
    assert_eq!(manager.state(), Disconnected);
    assert!(manager.is_closed());
}

// ═══════════════════════════════════════════════════════════════════════════
// NEGOTIATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_handshake_carries_secret_and_role() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, _states) = negotiated(&mut server).await;

    let handshakes = server.handshakes.lock().unwrap().clone();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].uri, "/v1/ws?role=client");
    assert_eq!(handshakes[0].secret.as_deref(), Some("abc"));

    let peer = connector.last_peer();
    assert_eq!(
        peer.ice_servers,
        vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun.cloudflare.com:3478".to_string(),
            "stun:127.0.0.1:3478".to_string(),
        ]
    );

    let text = log.to_text();
    assert!(text.contains("(role=client)"));
    assert!(text.contains("Using 3 ICE server(s)"));
    assert!(text.contains("WebSocket opened: HTTP 101"));
    manager.close().await;
}

#[tokio::test]
async fn test_answer_applies_sdp_then_pings() {
    let mut server = TestServer::start().await;
    let (manager, _log, connector, _states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    server.send_json(json!({"type": "answer", "sdp": "v=0 answer"}));
    eventually("ping", || peer.snapshot(|p| !p.commands.is_empty())).await;

    peer.snapshot(|p| {
        assert_eq!(p.answers, vec!["v=0 answer".to_string()]);
        let ping: serde_json::Value = serde_json::from_str(&p.commands[0]).unwrap();
        assert_eq!(ping["type"], "ping");
    });
    assert_eq!(manager.state(), Signaling);
    manager.close().await;
}

#[tokio::test]
async fn test_remote_candidates_default_mid() {
    let mut server = TestServer::start().await;
    let (manager, _log, connector, _states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    server.send_json(json!({
        "type": "candidate",
        "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMLineIndex": 0}
    }));
    server.send_json(json!({
        "type": "candidate",
        "candidate": {"candidate": "candidate:2 1 udp 1 10.0.0.2 5000 typ host", "sdpMid": "audio", "sdpMLineIndex": 1}
    }));
    eventually("two candidates", || peer.snapshot(|p| p.candidates.len() == 2)).await;

    peer.snapshot(|p| {
        assert_eq!(p.candidates[0].mid(), "0");
        assert_eq!(p.candidates[1].mid(), "audio");
        assert_eq!(p.candidates[1].sdp_mline_index, 1);
    });
    manager.close().await;
}

#[tokio::test]
async fn test_local_candidates_are_forwarded_nested() {
    let mut server = TestServer::start().await;
    let (manager, _log, connector, _states) = negotiated(&mut server).await;

    connector
        .last_peer()
        .emit(PeerEvent::LocalCandidate(CandidatePayload {
            candidate: "candidate:9 1 udp 1 192.168.1.2 6000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: 0,
        }));

    let message = server.next_signaling_of("candidate").await;
    assert_eq!(
        message["candidate"]["candidate"],
        "candidate:9 1 udp 1 192.168.1.2 6000 typ host"
    );
    assert_eq!(message["candidate"]["sdpMid"], "0");
    assert_eq!(message["candidate"]["sdpMLineIndex"], 0);
    manager.close().await;
}

#[tokio::test]
async fn test_ice_states_map_to_server_state() {
    let mut server = TestServer::start().await;
    let (manager, _log, connector, mut states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    peer.emit(PeerEvent::IceConnectionChanged(IceConnectionState::Checking));
    peer.emit(PeerEvent::IceConnectionChanged(IceConnectionState::Connected));
    peer.emit(PeerEvent::IceConnectionChanged(IceConnectionState::Completed));
    peer.emit(PeerEvent::IceConnectionChanged(IceConnectionState::Disconnected));

    assert_eq!(recv(&mut states).await, Connected);
    // Completed maps to Connected again and is suppressed.
    assert_eq!(recv(&mut states).await, Failed);
    manager.close().await;
}

#[tokio::test]
async fn test_offer_failure_is_fatal() {
    let server = TestServer::start().await;
    let connector = FakeConnector::failing_offers();
    let (manager, log) = manager(connector);
    let mut states = manager.subscribe();

    manager.connect(&server.base_url(), "abc").await.unwrap();
    let seen = wait_for_state(&mut states, Failed).await;
    assert_eq!(seen, vec![Connecting, Signaling, Failed]);
    assert!(log.to_text().contains("Offer failed"));
    manager.close().await;
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVER-DRIVEN TEARDOWN AND ERRORS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_bye_after_connected_releases_everything() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, mut states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    peer.emit(PeerEvent::IceConnectionChanged(IceConnectionState::Connected));
    assert_eq!(recv(&mut states).await, Connected);

    server.send_json(json!({"type": "bye"}));
    assert_eq!(recv(&mut states).await, Disconnected);

    assert!(manager.is_closed());
    assert_eq!(peer.snapshot(|p| p.closes), 1);
    eventually("server sees socket close", || {
        server.socket_closed.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(log.to_text().contains("Received server bye"));
}

#[tokio::test]
async fn test_error_fails_without_closing_socket() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, mut states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    server.send_json(json!({"type": "error", "message": "x"}));
    assert_eq!(recv(&mut states).await, Failed);
    assert!(log.to_text().contains("Server error: x"));

    // The socket is still usable in both directions.
    peer.emit(PeerEvent::LocalCandidate(CandidatePayload {
        candidate: "candidate:after-error".to_string(),
        sdp_mid: None,
        sdp_mline_index: 0,
    }));
    let message = server.next_signaling_of("candidate").await;
    assert_eq!(message["candidate"]["candidate"], "candidate:after-error");
    assert_eq!(server.socket_closed.load(Ordering::SeqCst), 0);
    assert_eq!(peer.snapshot(|p| p.closes), 0);
    manager.close().await;
}

#[tokio::test]
async fn test_unknown_type_is_ignored_but_malformed_fails() {
    let mut server = TestServer::start().await;
    let (manager, log, _connector, mut states) = negotiated(&mut server).await;

    server.send_json(json!({"type": "weird", "payload": 1}));
    server.send_text("{not json");
    assert_eq!(recv(&mut states).await, Failed);

    let text = log.to_text();
    assert!(text.contains("Unknown signaling message type: weird"));
    assert!(text.contains("Signaling parse error"));
    manager.close().await;
}

#[tokio::test]
async fn test_server_close_is_disconnected() {
    let mut server = TestServer::start().await;
    let (manager, log, _connector, mut states) = negotiated(&mut server).await;

    server.close_socket();
    assert_eq!(recv(&mut states).await, Disconnected);
    assert!(log.to_text().contains("WebSocket closed"));
    manager.close().await;
}

#[tokio::test]
async fn test_refused_connection_fails() {
    let address = closed_port_address().await;
    let (manager, log) = manager(FakeConnector::new());
    let mut states = manager.subscribe();

    manager.connect(&address, "abc").await.unwrap();
    let seen = wait_for_state(&mut states, Failed).await;
    assert_eq!(seen, vec![Connecting, Failed]);
    assert!(log.to_text().contains("WebSocket failure (http=n/a)"));
    manager.close().await;
}

#[tokio::test]
async fn test_tls_mismatch_adds_plain_ws_hint() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, mut states) = negotiated(&mut server).await;

    connector.last_peer().emit_socket(SocketEvent::Failed {
        error: "IO error: received corrupt message of type InvalidContentType".to_string(),
        status: None,
    });
    assert_eq!(recv(&mut states).await, Failed);

    let text = log.to_text();
    assert!(text.contains("WebSocket failure (http=n/a)"));
    assert!(text.contains("TLS handshake failed"));
    assert!(text.contains("use http:// or ws:// instead of https://"));
    manager.close().await;
}

#[tokio::test]
async fn test_plain_failure_has_no_tls_hint() {
    let address = closed_port_address().await;
    let (manager, log) = manager(FakeConnector::new());
    let mut states = manager.subscribe();

    manager.connect(&address, "abc").await.unwrap();
    wait_for_state(&mut states, Failed).await;
    assert!(!log.to_text().contains("TLS handshake failed"));
    manager.close().await;
}

#[tokio::test]
async fn test_rejected_secret_reports_http_status() {
    let server = TestServer::start_with(Some("right"), 200).await;
    let (manager, log) = manager(FakeConnector::new());
    let mut states = manager.subscribe();

    manager.connect(&server.base_url(), "wrong").await.unwrap();
    wait_for_state(&mut states, Failed).await;
    assert!(log.to_text().contains("WebSocket failure (http=401)"));
    manager.close().await;
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_explicit_close_releases_peer_and_socket() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, mut states) = negotiated(&mut server).await;

    manager.close().await;
    assert_eq!(recv(&mut states).await, Disconnected);
    assert_eq!(connector.last_peer().snapshot(|p| p.closes), 1);
    eventually("server sees socket close", || {
        server.socket_closed.load(Ordering::SeqCst) == 1
    })
    .await;

    // Events after close are dropped.
    connector
        .last_peer()
        .emit(PeerEvent::IceConnectionChanged(IceConnectionState::Connected));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.state(), Disconnected);
    assert_eq!(log.to_text().matches("Closing connection manager resources").count(), 1);
}

#[tokio::test]
async fn test_close_during_offer_is_final() {
    let mut server = TestServer::start().await;
    let connector = FakeConnector::slow_offers(Duration::from_millis(300));
    let (manager, log) = manager(connector.clone());
    let mut states = manager.subscribe();

    manager.connect(&server.base_url(), "abc").await.unwrap();
    wait_for_state(&mut states, Signaling).await;

    manager.close().await;
    assert_eq!(recv(&mut states).await, Disconnected);

    // The pending offer now fails against the closed peer.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(connector.last_peer().snapshot(|p| p.offers), 1);
    assert_eq!(manager.state(), Disconnected);
    assert!(states.try_recv().is_err());
    assert!(!log.to_text().contains("Offer failed"));
    assert!(server.try_next_signaling().is_none());
}

#[tokio::test]
async fn test_connect_after_close_is_refused() {
    let connector = FakeConnector::new();
    let (manager, _log) = manager(connector.clone());
    manager.close().await;
    let mut states = manager.subscribe();

    let err = manager.connect("10.0.2.2:8080", "abc").await.unwrap_err();
    assert!(matches!(err, iris_link::LinkError::SignalingError(_)));
    assert_eq!(manager.state(), Disconnected);
    assert!(states.try_recv().is_err());
    assert_eq!(connector.session_count(), 0);
}

#[tokio::test]
async fn test_data_channel_messages_reach_debug_log() {
    let mut server = TestServer::start().await;
    let (manager, log, connector, _states) = negotiated(&mut server).await;

    connector.last_peer().emit(PeerEvent::DataChannelMessage {
        label: "cmd".to_string(),
        payload: bytes::Bytes::from_static(b"pong"),
    });
    eventually("data channel message logged", || {
        log.to_text().contains("Data channel message on cmd: pong")
    })
    .await;
    manager.close().await;
}

#[tokio::test]
async fn test_drop_closes_in_background() {
    let mut server = TestServer::start().await;
    let (manager, _log, connector, _states) = negotiated(&mut server).await;
    let peer = connector.last_peer();

    drop(manager);
    eventually("peer closed after drop", || peer.snapshot(|p| p.closes == 1)).await;
}
