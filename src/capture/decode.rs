use crate::capture::orientation::{apply_transform, ExifOrientation};
use crate::errors::LinkError;
use crate::wearable::PhotoData;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;

/// Default re-encode quality for uploads.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Turn a captured photo into an upright bitmap.
///
/// Bitmaps pass through untouched. Encoded containers are decoded and the
/// EXIF orientation tag, when present, is applied.
pub fn decode_photo(photo: PhotoData) -> Result<DynamicImage, LinkError> {
    match photo {
        PhotoData::Bitmap(image) => Ok(image),
        PhotoData::Encoded(bytes) => decode_encoded(&bytes),
    }
}

fn decode_encoded(bytes: &[u8]) -> Result<DynamicImage, LinkError> {
    if bytes.is_empty() {
        return Err(LinkError::DecodeError("empty photo payload".to_string()));
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LinkError::DecodeError(e.to_string()))?
        .into_decoder()?;

    let orientation = match decoder.orientation() {
        Ok(orientation) => ExifOrientation::from(orientation),
        Err(e) => {
            log::debug!("No usable orientation metadata: {}", e);
            ExifOrientation::Normal
        }
    };

    let image = DynamicImage::from_decoder(decoder)?;
    if orientation != ExifOrientation::Normal {
        log::debug!(
            "Applying EXIF orientation {} ({:?})",
            orientation.tag(),
            orientation
        );
    }
    Ok(apply_transform(image, &orientation.transform()))
}

/// Encode as baseline JPEG. `quality` is clamped to 1-100.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, LinkError> {
    let quality = quality.clamp(1, 100);
    // JPEG has no alpha; flatten anything exotic to RGB8 first.
    let rgb = image.to_rgb8();

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(out)
}
