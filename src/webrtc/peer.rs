use crate::connection::EventSink;
use crate::errors::LinkError;
use crate::signaling::CandidatePayload;
use crate::state::ServerConnectionState;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

/// ICE connectivity as reported by the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// The server state this ICE state implies, if any.
    ///
    /// `new` and `checking` are informational only.
    pub fn server_state(&self) -> Option<ServerConnectionState> {
        match self {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                Some(ServerConnectionState::Connected)
            }
            IceConnectionState::Failed
            | IceConnectionState::Disconnected
            | IceConnectionState::Closed => Some(ServerConnectionState::Failed),
            IceConnectionState::New | IceConnectionState::Checking => None,
        }
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceConnectionState::New => "NEW",
            IceConnectionState::Checking => "CHECKING",
            IceConnectionState::Connected => "CONNECTED",
            IceConnectionState::Completed => "COMPLETED",
            IceConnectionState::Disconnected => "DISCONNECTED",
            IceConnectionState::Failed => "FAILED",
            IceConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::New => IceConnectionState::New,
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            RTCIceConnectionState::Unspecified => IceConnectionState::New,
        }
    }
}

/// Notifications from the peer connection and its data channels.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    IceConnectionChanged(IceConnectionState),
    IceGatheringChanged(String),
    LocalCandidate(CandidatePayload),
    DataChannelOpened { label: String },
    DataChannelStateChanged { label: String, state: String },
    DataChannelMessage { label: String, payload: Bytes },
}

/// One negotiated peer session: connection, audio track and command channel.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Create a local offer, apply it locally and return its SDP.
    async fn create_offer(&self) -> Result<String, LinkError>;

    async fn apply_remote_answer(&self, sdp: String) -> Result<(), LinkError>;

    /// Fire-and-forget; an unusable candidate is dropped.
    async fn add_remote_candidate(&self, candidate: CandidatePayload);

    /// Send a text command on the command channel.
    async fn send_command(&self, payload: String) -> Result<(), LinkError>;

    /// Release every resource. Safe to call more than once.
    async fn close(&self);
}

/// Builds peer sessions.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_session(
        &self,
        ice_servers: &[String],
        events: EventSink,
    ) -> Result<Arc<dyn PeerSession>, LinkError>;
}
