//! Capture path: wearable photo -> upright bitmap -> JPEG -> upload
pub mod decode;
pub mod orchestrator;
pub mod orientation;

pub use decode::{decode_photo, encode_jpeg, DEFAULT_JPEG_QUALITY};
pub use orchestrator::{
    clamp_interval, evaluate_gate, CaptureOrchestrator, CaptureOutcome, CapturedPhoto, SkipReason,
    DEFAULT_AUTO_CAPTURE_INTERVAL, MAX_AUTO_CAPTURE_INTERVAL, MIN_AUTO_CAPTURE_INTERVAL,
};
pub use orientation::{apply_transform, AffineTransform, ExifOrientation};
