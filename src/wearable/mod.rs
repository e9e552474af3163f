//! Consumed wearable camera capability
//!
//! The device SDK is a black box: start a session, observe its state, take a
//! photo, close it. Only the interface lives here, plus a scripted
//! [`mock::MockWearable`] used by tests and the CLI.

pub mod mock;

use crate::errors::LinkError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use mock::MockWearable;

/// Session state reported by the wearable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WearableSessionState {
    Starting,
    Streaming,
    #[default]
    Stopped,
}

impl fmt::Display for WearableSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WearableSessionState::Starting => "STARTING",
            WearableSessionState::Streaming => "STREAMING",
            WearableSessionState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub video_quality: VideoQuality,
}

/// A captured photo: either an already decoded bitmap or encoded container
/// bytes (JPEG/HEIC style) that may carry an EXIF orientation tag.
#[derive(Debug, Clone)]
pub enum PhotoData {
    Bitmap(DynamicImage),
    Encoded(Vec<u8>),
}

/// A running wearable stream session.
#[async_trait]
pub trait WearableSession: Send + Sync {
    /// Lazy, infinite stream of states. The first item is the current state.
    /// Not restartable: each call observes from "now".
    fn state_stream(&self) -> BoxStream<'static, WearableSessionState>;

    async fn capture_photo(&self) -> Result<PhotoData, LinkError>;

    async fn close(&self);
}

/// Entry point into the device SDK.
pub trait WearableCapability: Send + Sync {
    fn start_session(
        &self,
        config: StreamConfiguration,
    ) -> Result<Arc<dyn WearableSession>, LinkError>;
}
