use crate::debug_log::DebugLog;
use crate::signaling::SocketEvent;
use crate::webrtc::PeerEvent;
use tokio::sync::mpsc;

/// Everything the socket and the peer connection report back.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Socket(SocketEvent),
    Peer(PeerEvent),
}

/// Producer side of the manager's event queue.
///
/// Socket and peer callbacks push into it and never touch session state
/// themselves. Sends after the manager has gone away are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
    log: DebugLog,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>, log: DebugLog) -> Self {
        Self { tx, log }
    }

    /// Detached sink, for driving a peer or socket outside a manager.
    pub fn channel(log: DebugLog) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, log), rx)
    }

    pub fn socket(&self, event: SocketEvent) {
        let _ = self.tx.send(SessionEvent::Socket(event));
    }

    pub fn peer(&self, event: PeerEvent) {
        let _ = self.tx.send(SessionEvent::Peer(event));
    }

    /// Debug log shared with the owning manager.
    pub fn log(&self) -> &DebugLog {
        &self.log
    }
}
