use crate::errors::LinkError;
use serde::{Deserialize, Serialize};

/// `sdpMid` used when the remote omits it.
pub const DEFAULT_SDP_MID: &str = "0";

/// ICE candidate as carried inside a `candidate` signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

impl CandidatePayload {
    /// `sdpMid`, falling back to `"0"`.
    pub fn mid(&self) -> &str {
        self.sdp_mid.as_deref().unwrap_or(DEFAULT_SDP_MID)
    }
}

/// Control messages exchanged with the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: CandidatePayload,
    },
    Bye {},
    Error {
        #[serde(default)]
        message: String,
    },
}

const KNOWN_TYPES: [&str; 5] = ["offer", "answer", "candidate", "bye", "error"];

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(SignalingMessage),
    /// A well-formed frame with a `type` this client does not handle.
    Unknown(String),
}

impl SignalingMessage {
    /// Decode a text frame.
    ///
    /// Malformed JSON, a missing `type`, or a known `type` with missing
    /// fields are errors. An unrecognised `type` is not.
    pub fn parse(text: &str) -> Result<Inbound, LinkError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| LinkError::ProtocolError("missing \"type\" field".to_string()))?;

        if !KNOWN_TYPES.contains(&kind) {
            return Ok(Inbound::Unknown(kind.to_string()));
        }

        let message: SignalingMessage = serde_json::from_value(value)?;
        Ok(Inbound::Message(message))
    }

    pub fn to_json(&self) -> Result<String, LinkError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Bye {} => "bye",
            SignalingMessage::Error { .. } => "error",
        }
    }
}

/// Payload of the liveness ping sent on the command channel.
pub fn ping_command() -> String {
    serde_json::json!({ "type": "ping", "text": "hello from iris" }).to_string()
}
