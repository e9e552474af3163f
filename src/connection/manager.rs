use crate::connection::events::{EventSink, SessionEvent};
use crate::debug_log::DebugLog;
use crate::endpoints::ServerEndpoints;
use crate::errors::LinkError;
use crate::signaling::client::is_tls_mismatch;
use crate::signaling::{ping_command, Inbound, SignalingChannel, SignalingMessage, SocketEvent};
use crate::state::{ServerConnectionState, StateTracker};
use crate::webrtc::{PeerConnector, PeerEvent, PeerSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

const TLS_HINT: &str = "TLS handshake failed. If your server is plain WS on this port, use http:// or ws:// instead of https://.";

/// Session resource bundle. Replaced wholesale, never patched member by
/// member.
#[derive(Default)]
struct SessionResources {
    peer: Option<Arc<dyn PeerSession>>,
    signaling: Option<SignalingChannel>,
}

impl SessionResources {
    /// Release in reverse acquisition order: socket, then peer session.
    async fn release(self) {
        if let Some(signaling) = self.signaling {
            signaling.close().await;
        }
        if let Some(peer) = self.peer {
            peer.close().await;
        }
    }
}

struct ManagerInner {
    id: String,
    log: DebugLog,
    state: StateTracker,
    connector: Arc<dyn PeerConnector>,
    resources: Mutex<SessionResources>,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Owns one signaling socket and one peer session.
///
/// Instances are single use: create a fresh one for every connection
/// attempt. [`close`](Self::close) is idempotent and also runs when the
/// manager is dropped inside a Tokio runtime.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn PeerConnector>, log: DebugLog) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ManagerInner {
                id: uuid::Uuid::new_v4().to_string(),
                state: StateTracker::new(log.clone()),
                log,
                connector,
                resources: Mutex::new(SessionResources::default()),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ServerConnectionState {
        self.inner.state.current()
    }

    /// Ordered stream of future state transitions.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.inner.log
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Create the peer session and open the signaling socket.
    ///
    /// An empty (after trimming) secret fails fast: state becomes `Failed`
    /// and nothing touches the network. Negotiation continues in the
    /// background once this returns.
    pub async fn connect(&self, server_address: &str, shared_secret: &str) -> Result<(), LinkError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(LinkError::SignalingError(
                "connection manager instances are single use".to_string(),
            ));
        }
        if self.is_closed() {
            return Err(LinkError::SignalingError(
                "connection manager is already closed".to_string(),
            ));
        }

        let secret = shared_secret.trim();
        if secret.is_empty() {
            inner.log.warn("Missing shared secret, refusing connection");
            inner.transition(ServerConnectionState::Failed);
            return Err(LinkError::MissingSecret);
        }

        let endpoints = ServerEndpoints::derive(server_address);
        inner
            .log
            .info(format!("Starting connection to {} (role=client)", server_address));
        inner
            .log
            .info(format!("Opening signaling WebSocket at {}", endpoints.signaling));
        inner
            .log
            .info(format!("Using {} ICE server(s)", endpoints.ice_servers.len()));
        inner.transition(ServerConnectionState::Connecting);

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, inner.log.clone());
        tokio::spawn(run_worker(Arc::clone(inner), rx, inner.shutdown.subscribe()));

        let peer = match inner
            .connector
            .create_session(&endpoints.ice_servers, sink.clone())
            .await
        {
            Ok(peer) => peer,
            Err(err) => {
                inner
                    .log
                    .error(format!("Peer connection setup failed: {}", err));
                inner.transition(ServerConnectionState::Failed);
                return Err(err);
            }
        };

        let mut resources = inner.resources.lock().await;
        if self.is_closed() {
            drop(resources);
            peer.close().await;
            return Err(LinkError::SignalingError(
                "connection manager closed during setup".to_string(),
            ));
        }
        resources.peer = Some(peer);

        match SignalingChannel::open(&endpoints.signaling, secret, sink) {
            Ok(signaling) => {
                resources.signaling = Some(signaling);
                Ok(())
            }
            Err(err) => {
                drop(resources);
                inner
                    .log
                    .error(format!("Could not open signaling socket: {}", err));
                inner.transition(ServerConnectionState::Failed);
                Err(err)
            }
        }
    }

    /// Release every session resource and report `Disconnected`.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.inner.closed.load(Ordering::SeqCst) || !self.inner.started.load(Ordering::SeqCst)
        {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move { inner.close().await });
        }
    }
}

impl ManagerInner {
    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.info("Closing connection manager resources");
        }
        let _ = self.shutdown.send(true);

        let bundle = std::mem::take(&mut *self.resources.lock().await);
        bundle.release().await;
        self.state.set(ServerConnectionState::Disconnected);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Apply a state change unless the manager has been closed. Once closed,
    /// `Disconnected` is final.
    fn transition(&self, next: ServerConnectionState) {
        if self.is_closed() {
            log::debug!("Connection manager {} ignoring {} after close", self.id, next);
            return;
        }
        self.state.set(next);
    }

    async fn peer(&self) -> Option<Arc<dyn PeerSession>> {
        self.resources.lock().await.peer.clone()
    }

    async fn send(&self, message: SignalingMessage) {
        let resources = self.resources.lock().await;
        let Some(signaling) = resources.signaling.as_ref() else {
            self.log
                .warn(format!("Dropping outbound {}: no signaling socket", message.kind()));
            return;
        };
        if let Err(err) = signaling.send(&message) {
            self.log
                .warn(format!("Failed to send {}: {}", message.kind(), err));
        }
    }

    async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Socket(event) => self.handle_socket(event).await,
            SessionEvent::Peer(event) => self.handle_peer(event).await,
        }
    }

    async fn handle_socket(&self, event: SocketEvent) {
        match event {
            SocketEvent::Opened { status } => {
                self.log.info(format!("WebSocket opened: HTTP {}", status));
                self.transition(ServerConnectionState::Signaling);
                self.create_and_send_offer().await;
            }
            SocketEvent::Message(text) => {
                self.log
                    .debug(format!("Signaling message received ({} chars)", text.len()));
                self.handle_signaling_text(&text).await;
            }
            SocketEvent::Failed { error, status } => {
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                self.log
                    .error(format!("WebSocket failure (http={}): {}", status, error));
                if is_tls_mismatch(&error) {
                    self.log.warn(TLS_HINT);
                }
                self.transition(ServerConnectionState::Failed);
            }
            SocketEvent::Closed { code, reason } => {
                self.log
                    .info(format!("WebSocket closed: code={} reason={}", code, reason));
                self.transition(ServerConnectionState::Disconnected);
            }
        }
    }

    async fn create_and_send_offer(&self) {
        let Some(peer) = self.peer().await else {
            return;
        };

        self.log.info("Creating local SDP offer");
        match peer.create_offer().await {
            Ok(sdp) => {
                self.log.info("Sending SDP offer to signaling server");
                self.send(SignalingMessage::Offer { sdp }).await;
            }
            Err(_) if self.is_closed() => {
                self.log.debug("Offer abandoned: connection manager closed");
            }
            Err(err) => {
                self.log.error(format!("Offer failed: {}", err));
                self.transition(ServerConnectionState::Failed);
            }
        }
    }

    async fn handle_signaling_text(&self, text: &str) {
        let message = match SignalingMessage::parse(text) {
            Ok(Inbound::Message(message)) => message,
            Ok(Inbound::Unknown(kind)) => {
                self.log
                    .warn(format!("Unknown signaling message type: {}", kind));
                return;
            }
            Err(err) => {
                self.log.error(format!("Signaling parse error: {}", err));
                self.transition(ServerConnectionState::Failed);
                return;
            }
        };

        match message {
            SignalingMessage::Answer { sdp } => {
                self.log.info("Received SDP answer");
                let Some(peer) = self.peer().await else {
                    return;
                };
                if let Err(err) = peer.apply_remote_answer(sdp).await {
                    self.log.error(format!("SDP set failure: {}", err));
                }
                self.log.info("Sending ping on cmd data channel");
                if let Err(err) = peer.send_command(ping_command()).await {
                    self.log.warn(format!("Ping not sent: {}", err));
                }
            }
            SignalingMessage::Candidate { candidate } => {
                self.log.debug("Received remote ICE candidate");
                if let Some(peer) = self.peer().await {
                    peer.add_remote_candidate(candidate).await;
                }
            }
            SignalingMessage::Bye {} => {
                self.log.info("Received server bye");
                self.close().await;
            }
            SignalingMessage::Error { message } => {
                self.log.error(format!("Server error: {}", message));
                self.transition(ServerConnectionState::Failed);
            }
            SignalingMessage::Offer { .. } => {
                self.log
                    .warn("Ignoring unexpected SDP offer from signaling server");
            }
        }
    }

    async fn handle_peer(&self, event: PeerEvent) {
        match event {
            PeerEvent::IceConnectionChanged(ice) => {
                self.log.info(format!("ICE connection state: {}", ice));
                if let Some(next) = ice.server_state() {
                    self.transition(next);
                }
            }
            PeerEvent::IceGatheringChanged(gathering) => {
                self.log.debug(format!("ICE gathering state: {}", gathering));
            }
            PeerEvent::LocalCandidate(candidate) => {
                self.log.debug("Local ICE candidate generated");
                self.send(SignalingMessage::Candidate { candidate }).await;
            }
            PeerEvent::DataChannelOpened { label } => {
                self.log
                    .info(format!("Remote data channel opened: {}", label));
            }
            PeerEvent::DataChannelStateChanged { label, state } => {
                self.log
                    .info(format!("Data channel state changed: {} {}", label, state));
            }
            PeerEvent::DataChannelMessage { label, payload } => {
                let text = String::from_utf8_lossy(&payload);
                self.log
                    .debug(format!("Data channel message on {}: {}", label, text));
            }
        }
    }
}

/// The single consumer of session events. Stops as soon as the manager is
/// closed; events that arrive afterwards are discarded.
async fn run_worker(
    inner: Arc<ManagerInner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = events.recv() => match next {
                Some(event) => {
                    if inner.is_closed() {
                        break;
                    }
                    inner.handle(event).await;
                }
                None => break,
            },
        }
    }
    log::debug!("Connection manager {} event worker stopped", inner.id);
}
