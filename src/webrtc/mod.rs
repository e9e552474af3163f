//! Peer session: the real-time connection to the server
//!
//! [`PeerConnector`] and [`PeerSession`] are the seam between the connection
//! manager and the transport library. [`WebRtcConnector`] is the production
//! implementation on top of webrtc-rs.
pub mod peer;
pub mod session;

pub use peer::{IceConnectionState, PeerConnector, PeerEvent, PeerSession};
pub use session::{WebRtcConnector, WebRtcPeer, AUDIO_TRACK_ID, COMMAND_CHANNEL_LABEL, STREAM_ID};
