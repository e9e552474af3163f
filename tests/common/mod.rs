//! Shared fixtures for integration tests
//!
//! `FakeConnector` stands in for webrtc-rs behind the `PeerConnector` seam.
//! `TestServer` is one loopback listener that speaks both the signaling
//! WebSocket and the `POST /v1/frames` upload endpoint, like the real server.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use iris_link::connection::EventSink;
use iris_link::signaling::{CandidatePayload, SocketEvent};
use iris_link::webrtc::{PeerConnector, PeerEvent, PeerSession};
use iris_link::{LinkError, ServerConnectionState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

pub const FAKE_OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=fake\r\n";

// ═══════════════════════════════════════════════════════════════════════════
// FAKE PEER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct FakePeerLog {
    pub offers: usize,
    pub answers: Vec<String>,
    pub candidates: Vec<CandidatePayload>,
    pub commands: Vec<String>,
    pub closes: usize,
}

pub struct FakePeer {
    pub ice_servers: Vec<String>,
    pub log: Mutex<FakePeerLog>,
    events: EventSink,
    fail_offer: bool,
    offer_delay: Duration,
}

impl FakePeer {
    /// Inject a peer event as if the transport had raised it.
    pub fn emit(&self, event: PeerEvent) {
        self.events.peer(event);
    }

    /// Inject a socket event as if the signaling channel had raised it.
    pub fn emit_socket(&self, event: SocketEvent) {
        self.events.socket(event);
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&FakePeerLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<String, LinkError> {
        self.log.lock().unwrap().offers += 1;
        if !self.offer_delay.is_zero() {
            tokio::time::sleep(self.offer_delay).await;
        }
        // A closed transport refuses to finish the offer, as webrtc-rs does.
        if self.log.lock().unwrap().closes > 0 {
            return Err(LinkError::PeerError("peer connection closed".to_string()));
        }
        if self.fail_offer {
            return Err(LinkError::PeerError("scripted offer failure".to_string()));
        }
        Ok(FAKE_OFFER_SDP.to_string())
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<(), LinkError> {
        self.log.lock().unwrap().answers.push(sdp);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidatePayload) {
        self.log.lock().unwrap().candidates.push(candidate);
    }

    async fn send_command(&self, payload: String) -> Result<(), LinkError> {
        self.log.lock().unwrap().commands.push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.log.lock().unwrap().closes += 1;
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub fail_offer: bool,
    pub offer_delay: Duration,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_offers() -> Arc<Self> {
        Arc::new(Self {
            fail_offer: true,
            ..Self::default()
        })
    }

    /// Offers take `delay` to complete, leaving room to close mid-offer.
    pub fn slow_offers(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            offer_delay: delay,
            ..Self::default()
        })
    }

    pub fn session_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer session was created")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create_session(
        &self,
        ice_servers: &[String],
        events: EventSink,
    ) -> Result<Arc<dyn PeerSession>, LinkError> {
        let peer = Arc::new(FakePeer {
            ice_servers: ice_servers.to_vec(),
            log: Mutex::new(FakePeerLog::default()),
            events,
            fail_offer: self.fail_offer,
            offer_delay: self.offer_delay,
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOOPBACK SERVER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

enum ToClient {
    Text(String),
    Close,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub handshakes: Arc<Mutex<Vec<Handshake>>>,
    pub ws_connections: Arc<AtomicUsize>,
    pub socket_closed: Arc<AtomicUsize>,
    signaling: mpsc::UnboundedReceiver<String>,
    uploads: mpsc::UnboundedReceiver<RecordedUpload>,
    to_client: Arc<Mutex<Option<mpsc::UnboundedSender<ToClient>>>>,
}

#[derive(Clone)]
struct Shared {
    required_secret: Option<String>,
    upload_status: u16,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    ws_connections: Arc<AtomicUsize>,
    socket_closed: Arc<AtomicUsize>,
    signaling: mpsc::UnboundedSender<String>,
    uploads: mpsc::UnboundedSender<RecordedUpload>,
    to_client: Arc<Mutex<Option<mpsc::UnboundedSender<ToClient>>>>,
}

impl TestServer {
    /// Accepts any secret, answers uploads with 200.
    pub async fn start() -> Self {
        Self::start_with(None, 200).await
    }

    pub async fn start_with(required_secret: Option<&str>, upload_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (signaling_tx, signaling) = mpsc::unbounded_channel();
        let (uploads_tx, uploads) = mpsc::unbounded_channel();
        let shared = Shared {
            required_secret: required_secret.map(str::to_string),
            upload_status,
            handshakes: Arc::new(Mutex::new(Vec::new())),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            socket_closed: Arc::new(AtomicUsize::new(0)),
            signaling: signaling_tx,
            uploads: uploads_tx,
            to_client: Arc::new(Mutex::new(None)),
        };

        let server = TestServer {
            addr,
            handshakes: Arc::clone(&shared.handshakes),
            ws_connections: Arc::clone(&shared.ws_connections),
            socket_closed: Arc::clone(&shared.socket_closed),
            signaling,
            uploads,
            to_client: Arc::clone(&shared.to_client),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(route(stream, shared.clone()));
            }
        });

        server
    }

    /// Base address as a user would type it.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Next text frame sent by the client, parsed as JSON.
    pub async fn next_signaling(&mut self) -> serde_json::Value {
        let text = recv(&mut self.signaling).await;
        serde_json::from_str(&text).unwrap()
    }

    /// Next signaling frame whose `type` is `kind`, skipping others.
    pub async fn next_signaling_of(&mut self, kind: &str) -> serde_json::Value {
        loop {
            let message = self.next_signaling().await;
            if message["type"] == kind {
                return message;
            }
        }
    }

    pub fn try_next_signaling(&mut self) -> Option<String> {
        self.signaling.try_recv().ok()
    }

    pub async fn next_upload(&mut self) -> RecordedUpload {
        recv(&mut self.uploads).await
    }

    pub fn try_next_upload(&mut self) -> Option<RecordedUpload> {
        self.uploads.try_recv().ok()
    }

    /// Send a text frame to the most recently connected client.
    pub fn send_text(&self, text: impl Into<String>) {
        let guard = self.to_client.lock().unwrap();
        let tx = guard.as_ref().expect("no signaling client connected");
        tx.send(ToClient::Text(text.into())).unwrap();
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Close the socket from the server side.
    pub fn close_socket(&self) {
        if let Some(tx) = self.to_client.lock().unwrap().as_ref() {
            let _ = tx.send(ToClient::Close);
        }
    }
}

async fn route(stream: TcpStream, shared: Shared) {
    let mut head = [0u8; 4];
    loop {
        match stream.peek(&mut head).await {
            Ok(n) if n >= head.len() => break,
            Ok(0) | Err(_) => return,
            Ok(_) => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    }

    if &head == b"POST" {
        serve_upload(stream, shared).await;
    } else {
        serve_signaling(stream, shared).await;
    }
}

async fn serve_signaling(stream: TcpStream, shared: Shared) {
    let required = shared.required_secret.clone();
    let handshakes = Arc::clone(&shared.handshakes);
    let callback = move |request: &Request, response: Response| {
        let secret = request
            .headers()
            .get("x-ermete-psk")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        handshakes.lock().unwrap().push(Handshake {
            uri: request.uri().to_string(),
            secret: secret.clone(),
        });

        match required {
            Some(expected) if secret.as_deref() != Some(expected.as_str()) => {
                let mut rejection = ErrorResponse::new(Some("bad secret".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
            _ => Ok(response),
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    shared.ws_connections.fetch_add(1, Ordering::SeqCst);

    let (tx, mut rx) = mpsc::unbounded_channel();
    *shared.to_client.lock().unwrap() = Some(tx);
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(ToClient::Text(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(ToClient::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = shared.signaling.send(text);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    shared.socket_closed.fetch_add(1, Ordering::SeqCst);
}

async fn serve_upload(mut stream: TcpStream, shared: Shared) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
    let body = buffer[header_end..].to_vec();

    let response = format!(
        "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        shared.upload_status
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    let _ = shared.uploads.send(RecordedUpload {
        method,
        path,
        headers,
        body,
    });
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ═══════════════════════════════════════════════════════════════════════════
// WAITING HELPERS
// ═══════════════════════════════════════════════════════════════════════════

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Read transitions until `target` shows up; returns everything seen.
pub async fn wait_for_state(
    rx: &mut mpsc::UnboundedReceiver<ServerConnectionState>,
    target: ServerConnectionState,
) -> Vec<ServerConnectionState> {
    let mut seen = Vec::new();
    loop {
        let state = recv(rx).await;
        seen.push(state);
        if state == target {
            return seen;
        }
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A loopback address nothing is listening on.
pub async fn closed_port_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
