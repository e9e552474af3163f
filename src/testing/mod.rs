//! Testing utilities for iris-link
//!
//! Synthetic photos and EXIF-tagged JPEGs for exercising the capture path
//! without a wearable attached.

pub mod synthetic_data;

pub use synthetic_data::{
    is_marker, synthetic_jpeg, synthetic_photo, with_exif_orientation, MARKER,
};
