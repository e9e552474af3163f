//! Synthetic photos for offline testing
//!
//! Gradient images with a red block in the top-left corner, so orientation
//! fixes survive lossy JPEG round trips, and JPEG containers carrying a
//! hand-built EXIF orientation tag the way phone and glasses cameras write
//! them.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

/// Colour of the corner marker block.
pub const MARKER: Rgb<u8> = Rgb([255, 0, 0]);

/// A `width` x `height` RGB gradient with no red component, except for a
/// [`MARKER`] block covering the top-left quarter of each axis.
pub fn synthetic_photo(width: u32, height: u32) -> DynamicImage {
    let (mark_w, mark_h) = ((width / 4).max(1), (height / 4).max(1));
    let image = RgbImage::from_fn(width, height, |x, y| {
        if x < mark_w && y < mark_h {
            MARKER
        } else {
            Rgb([
                0,
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
            ])
        }
    });
    DynamicImage::ImageRgb8(image)
}

/// Whether the pixel at `(x, y)` reads as the marker, tolerating JPEG
/// noise.
pub fn is_marker(image: &DynamicImage, x: u32, y: u32) -> bool {
    let rgb = image.to_rgb8();
    let pixel = rgb.get_pixel(x, y);
    pixel[0] > 160 && pixel[1] < 100 && pixel[2] < 100
}

/// JPEG bytes for [`synthetic_photo`], tagged with `orientation` (1-8) when
/// given.
pub fn synthetic_jpeg(width: u32, height: u32, orientation: Option<u16>) -> Vec<u8> {
    let photo = synthetic_photo(width, height).to_rgb8();
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, 95);
    if let Err(e) = photo.write_with_encoder(encoder) {
        log::warn!("Synthetic JPEG encode failed: {}", e);
        return Vec::new();
    }

    match orientation {
        Some(tag) => with_exif_orientation(&jpeg, tag),
        None => jpeg,
    }
}

/// Insert an APP1 EXIF segment holding only an orientation tag right after
/// the SOI marker.
pub fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    if jpeg.len() < 2 {
        return jpeg.to_vec();
    }

    let mut exif = Vec::with_capacity(32);
    exif.extend_from_slice(b"Exif\0\0");
    // Big-endian TIFF header, first IFD at offset 8.
    exif.extend_from_slice(b"MM\0\x2A");
    exif.extend_from_slice(&8u32.to_be_bytes());
    exif.extend_from_slice(&1u16.to_be_bytes());
    // Orientation: tag 0x0112, SHORT, count 1, value left-aligned.
    exif.extend_from_slice(&0x0112u16.to_be_bytes());
    exif.extend_from_slice(&3u16.to_be_bytes());
    exif.extend_from_slice(&1u32.to_be_bytes());
    exif.extend_from_slice(&orientation.to_be_bytes());
    exif.extend_from_slice(&[0, 0]);
    exif.extend_from_slice(&0u32.to_be_bytes());

    let segment_len = (exif.len() + 2) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + exif.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&exif);
    out.extend_from_slice(&jpeg[2..]);
    out
}
