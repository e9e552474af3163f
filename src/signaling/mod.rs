//! Signaling channel: JSON control messages over a WebSocket
//!
//! The channel only moves text frames; interpreting them is the connection
//! manager's job.
pub mod client;
pub mod message;

pub use client::{SignalingChannel, SocketEvent, SHARED_SECRET_HEADER};
pub use message::{ping_command, CandidatePayload, Inbound, SignalingMessage};
