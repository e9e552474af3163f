//! EXIF orientation as an integer affine transform
//!
//! Orientation tags are turned into a 2x2 matrix in image (y-down)
//! coordinates by composing quarter-turn rotations and mirrors the same way a
//! graphics matrix `post_rotate`/`post_scale` would. The matrix is then
//! decomposed back into one rotation plus an optional horizontal flip and
//! applied to the pixels.

use image::metadata::Orientation;
use image::DynamicImage;
use std::fmt;

/// The eight standard EXIF orientation values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExifOrientation {
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl ExifOrientation {
    pub const ALL: [ExifOrientation; 8] = [
        ExifOrientation::Normal,
        ExifOrientation::FlipHorizontal,
        ExifOrientation::Rotate180,
        ExifOrientation::FlipVertical,
        ExifOrientation::Transpose,
        ExifOrientation::Rotate90,
        ExifOrientation::Transverse,
        ExifOrientation::Rotate270,
    ];

    /// Parse a raw tag value. Unknown values are `None`.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(ExifOrientation::Normal),
            2 => Some(ExifOrientation::FlipHorizontal),
            3 => Some(ExifOrientation::Rotate180),
            4 => Some(ExifOrientation::FlipVertical),
            5 => Some(ExifOrientation::Transpose),
            6 => Some(ExifOrientation::Rotate90),
            7 => Some(ExifOrientation::Transverse),
            8 => Some(ExifOrientation::Rotate270),
            _ => None,
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            ExifOrientation::Normal => 1,
            ExifOrientation::FlipHorizontal => 2,
            ExifOrientation::Rotate180 => 3,
            ExifOrientation::FlipVertical => 4,
            ExifOrientation::Transpose => 5,
            ExifOrientation::Rotate90 => 6,
            ExifOrientation::Transverse => 7,
            ExifOrientation::Rotate270 => 8,
        }
    }

    /// The matrix that displays an image carrying this tag upright.
    pub fn transform(&self) -> AffineTransform {
        let identity = AffineTransform::IDENTITY;
        match self {
            ExifOrientation::Normal => identity,
            ExifOrientation::FlipHorizontal => identity.post_scale(-1, 1),
            ExifOrientation::Rotate180 => identity.post_rotate(180),
            ExifOrientation::FlipVertical => identity.post_rotate(180).post_scale(-1, 1),
            ExifOrientation::Transpose => identity.post_rotate(90).post_scale(-1, 1),
            ExifOrientation::Rotate90 => identity.post_rotate(90),
            ExifOrientation::Transverse => identity.post_rotate(-90).post_scale(-1, 1),
            ExifOrientation::Rotate270 => identity.post_rotate(-90),
        }
    }
}

impl From<Orientation> for ExifOrientation {
    fn from(orientation: Orientation) -> Self {
        match orientation {
            Orientation::NoTransforms => ExifOrientation::Normal,
            Orientation::Rotate90 => ExifOrientation::Rotate90,
            Orientation::Rotate180 => ExifOrientation::Rotate180,
            Orientation::Rotate270 => ExifOrientation::Rotate270,
            Orientation::FlipHorizontal => ExifOrientation::FlipHorizontal,
            Orientation::FlipVertical => ExifOrientation::FlipVertical,
            Orientation::Rotate90FlipH => ExifOrientation::Transpose,
            Orientation::Rotate270FlipH => ExifOrientation::Transverse,
        }
    }
}

/// Axis-aligned 2x2 integer matrix `[[a, b], [c, d]]` acting on column
/// vectors `(x, y)` with y pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffineTransform {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1,
        b: 0,
        c: 0,
        d: 1,
    };

    const MIRROR_X: AffineTransform = AffineTransform {
        a: -1,
        b: 0,
        c: 0,
        d: 1,
    };

    /// Clockwise rotation by a multiple of 90 degrees. Other angles are
    /// rounded down to the previous quarter turn.
    pub fn rotation(degrees: i32) -> Self {
        let (sin, cos) = match (degrees / 90).rem_euclid(4) {
            0 => (0, 1),
            1 => (1, 0),
            2 => (0, -1),
            _ => (-1, 0),
        };
        AffineTransform {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
        }
    }

    pub fn scale(sx: i32, sy: i32) -> Self {
        AffineTransform {
            a: sx,
            b: 0,
            c: 0,
            d: sy,
        }
    }

    /// `other * self`: apply `self` first, then `other`.
    pub fn then(&self, other: &AffineTransform) -> Self {
        AffineTransform {
            a: other.a * self.a + other.b * self.c,
            b: other.a * self.b + other.b * self.d,
            c: other.c * self.a + other.d * self.c,
            d: other.c * self.b + other.d * self.d,
        }
    }

    pub fn post_rotate(&self, degrees: i32) -> Self {
        self.then(&Self::rotation(degrees))
    }

    pub fn post_scale(&self, sx: i32, sy: i32) -> Self {
        self.then(&Self::scale(sx, sy))
    }

    pub fn determinant(&self) -> i32 {
        self.a * self.d - self.b * self.c
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn is_mirrored(&self) -> bool {
        self.determinant() < 0
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(&self) -> bool {
        self.a == 0
    }

    /// Split into a clockwise quarter-turn rotation in degrees followed by an
    /// optional horizontal flip. `None` for matrices that are not a
    /// rotation/mirror combination.
    pub fn decompose(&self) -> Option<(u16, bool)> {
        let mirrored = self.is_mirrored();
        // MIRROR_X is its own inverse, so M = X * R gives R = X * M.
        let rotation = if mirrored {
            self.then(&Self::MIRROR_X)
        } else {
            *self
        };
        let degrees = [0u16, 90, 180, 270]
            .into_iter()
            .find(|deg| Self::rotation(i32::from(*deg)) == rotation)?;
        Some((degrees, mirrored))
    }

    /// Map a point `(x, y)` through the matrix.
    pub fn map_point(&self, x: i64, y: i64) -> (i64, i64) {
        let (a, b, c, d) = (
            i64::from(self.a),
            i64::from(self.b),
            i64::from(self.c),
            i64::from(self.d),
        );
        (a * x + b * y, c * x + d * y)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[[{}, {}], [{}, {}]]", self.a, self.b, self.c, self.d)
    }
}

/// Apply `transform` to the pixels of `image`.
///
/// Identity is a no-op. When the output buffer cannot be allocated the
/// untransformed image is returned, as it is for non axis-aligned matrices.
pub fn apply_transform(image: DynamicImage, transform: &AffineTransform) -> DynamicImage {
    if transform.is_identity() {
        return image;
    }

    let Some((degrees, mirrored)) = transform.decompose() else {
        log::warn!("Unsupported orientation matrix {}, leaving image as is", transform);
        return image;
    };

    if Vec::<u8>::new()
        .try_reserve_exact(image.as_bytes().len())
        .is_err()
    {
        log::warn!(
            "Out of memory rotating {}x{} image, using original orientation",
            image.width(),
            image.height()
        );
        return image;
    }

    let rotated = match degrees {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image,
    };
    if mirrored {
        rotated.fliph()
    } else {
        rotated
    }
}
