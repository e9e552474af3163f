use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Missing shared secret")]
    MissingSecret,
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),
    #[error("Signaling error: {0}")]
    SignalingError(String),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Peer connection error: {0}")]
    PeerError(String),
    #[error("Upload error: {0}")]
    UploadError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::ProtocolError(err.to_string())
    }
}

impl From<image::ImageError> for LinkError {
    fn from(err: image::ImageError) -> Self {
        LinkError::DecodeError(err.to_string())
    }
}

impl From<webrtc::Error> for LinkError {
    fn from(err: webrtc::Error) -> Self {
        LinkError::PeerError(err.to_string())
    }
}

impl From<config::ConfigError> for LinkError {
    fn from(err: config::ConfigError) -> Self {
        LinkError::ConfigError(err.to_string())
    }
}
