//! Server connection state and its single canonical tracker

use crate::debug_log::DebugLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Lifecycle of the link to the server.
///
/// `Disconnected → Connecting → Signaling → Connected`, with `Failed`
/// reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServerConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Signaling,
    Connected,
    Failed,
}

impl ServerConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerConnectionState::Disconnected => "DISCONNECTED",
            ServerConnectionState::Connecting => "CONNECTING",
            ServerConnectionState::Signaling => "SIGNALING",
            ServerConnectionState::Connected => "CONNECTED",
            ServerConnectionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ServerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TrackerInner {
    current: ServerConnectionState,
    subscribers: Vec<mpsc::UnboundedSender<ServerConnectionState>>,
}

/// Holds the current state and fans distinct transitions out to subscribers.
///
/// Transitions are applied and delivered under one lock, so observers see
/// them in the order they happened. Setting the current value again is a
/// no-op.
pub struct StateTracker {
    inner: Mutex<TrackerInner>,
    log: DebugLog,
}

impl StateTracker {
    pub fn new(log: DebugLog) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                current: ServerConnectionState::Disconnected,
                subscribers: Vec::new(),
            }),
            log,
        }
    }

    pub fn current(&self) -> ServerConnectionState {
        self.lock().current
    }

    /// Apply a transition. Returns `true` when the value actually changed.
    pub fn set(&self, next: ServerConnectionState) -> bool {
        let mut inner = self.lock();
        if inner.current == next {
            return false;
        }

        self.log.info(format!(
            "Connection state changed: {} -> {}",
            inner.current, next
        ));
        inner.current = next;
        inner.subscribers.retain(|tx| tx.send(next).is_ok());
        true
    }

    /// Receive every future transition, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerConnectionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
