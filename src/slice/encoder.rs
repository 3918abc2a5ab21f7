//! AVIF slice encoder.
//!
//! Source pages arrive as JPEG, PNG, WebP or GIF (first frame). They are
//! decoded once, cut into horizontal strips and every strip is re-encoded as
//! AVIF.
//!
//! Encoding is CPU-bound and synchronous; callers run it on the blocking
//! pool.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::{DynamicImage, ImageReader};

/// Default AVIF quality (1-100).
pub const DEFAULT_AVIF_QUALITY: u8 = 55;

/// Default encoder speed (1 = slowest/smallest, 10 = fastest).
pub const DEFAULT_AVIF_SPEED: u8 = 7;

/// Minimum allowed quality.
pub const MIN_AVIF_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_AVIF_QUALITY: u8 = 100;

/// Extension of stored slices and thumbnails.
pub const SLICE_EXTENSION: &str = "avif";

/// Content type served for slices and thumbnails.
pub const SLICE_CONTENT_TYPE: &str = "image/avif";

/// Source image extensions accepted from uploads.
pub const SOURCE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// Whether `filename` has an accepted source image extension.
pub fn is_source_image(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            SOURCE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Failure while decoding or encoding one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecFailure {
    Decode(String),
    Encode(String),
}

// =============================================================================
// AVIF Encoder
// =============================================================================

/// Decodes source pages and encodes AVIF output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvifSliceEncoder {
    quality: u8,
    speed: u8,
}

impl Default for AvifSliceEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_AVIF_QUALITY, DEFAULT_AVIF_SPEED)
    }
}

impl AvifSliceEncoder {
    /// Create an encoder; quality is clamped to 1-100 and speed to 1-10.
    pub fn new(quality: u8, speed: u8) -> Self {
        Self {
            quality: quality.clamp(MIN_AVIF_QUALITY, MAX_AVIF_QUALITY),
            speed: speed.clamp(1, 10),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Decode a source image, detecting the format from its bytes.
    pub fn decode(&self, source: &[u8]) -> Result<DynamicImage, CodecFailure> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| CodecFailure::Decode(e.to_string()))?;

        if reader.format().is_none() {
            return Err(CodecFailure::Decode("unrecognized image format".to_string()));
        }

        reader
            .decode()
            .map_err(|e| CodecFailure::Decode(e.to_string()))
    }

    /// Encode an image as AVIF.
    pub fn encode(&self, image: &DynamicImage) -> Result<Bytes, CodecFailure> {
        let rgba = DynamicImage::ImageRgba8(image.to_rgba8());

        let mut output = Vec::new();
        let encoder = AvifEncoder::new_with_speed_quality(&mut output, self.speed, self.quality);
        rgba.write_with_encoder(encoder)
            .map_err(|e| CodecFailure::Encode(e.to_string()))?;

        Ok(Bytes::from(output))
    }

    /// Decode then encode a whole image, used for thumbnails.
    pub fn transcode(&self, source: &[u8]) -> Result<Bytes, CodecFailure> {
        let image = self.decode(source)?;
        self.encode(&image)
    }
}
