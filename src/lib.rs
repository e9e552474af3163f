//! iris-link: wearable camera uplink over WebRTC
//!
//! Streams a wearable camera session to a remote server. A signaling socket
//! negotiates one WebRTC peer session (an Opus audio track plus a `cmd` data
//! channel), while still frames captured from the wearable are uploaded over
//! plain HTTP.
//!
//! # Features
//! - Authenticated WebSocket signaling (offer/answer/candidate/bye/error)
//! - Peer session negotiation with ordered, de-duplicated state reporting
//! - Capture gating on wearable and server readiness, periodic capture
//! - EXIF-aware photo normalization and JPEG upload
//! - Capped in-memory debug log for operators
//!
//! # Usage
//! ```rust,no_run
//! use iris_link::{CaptureOrchestrator, DebugLog, MockWearable, WebRtcConnector};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), iris_link::LinkError> {
//! let log = DebugLog::new();
//! let orchestrator = CaptureOrchestrator::new(
//!     Arc::new(MockWearable::streaming()),
//!     Arc::new(WebRtcConnector),
//!     log.clone(),
//! );
//! orchestrator.start("http://10.0.2.2:8080", "secret").await?;
//! orchestrator.start_auto_capture(Duration::from_secs(10));
//! # Ok(())
//! # }
//! ```
pub mod capture;
pub mod config;
pub mod connection;
pub mod debug_log;
pub mod endpoints;
pub mod errors;
pub mod signaling;
pub mod state;
pub mod upload;
pub mod wearable;
pub mod webrtc;

// Testing utilities - synthetic photos for offline testing
pub mod testing;

// Re-exports for convenience
pub use crate::capture::{CaptureOrchestrator, CaptureOutcome, SkipReason};
pub use crate::config::IrisConfig;
pub use crate::connection::ConnectionManager;
pub use crate::debug_log::{DebugLog, DebugLogEntry};
pub use crate::endpoints::ServerEndpoints;
pub use crate::errors::LinkError;
pub use crate::state::ServerConnectionState;
pub use crate::upload::FrameUploader;
pub use crate::wearable::{MockWearable, PhotoData, WearableSessionState};
pub use crate::webrtc::{PeerConnector, PeerSession, WebRtcConnector};

/// Initialize logging with the default filter
pub fn init_logging() {
    init_logging_with("iris_link=info");
}

/// Initialize logging, using `default_filter` when `RUST_LOG` is unset
pub fn init_logging_with(default_filter: &str) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", default_filter);
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
