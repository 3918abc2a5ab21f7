//! Cutting tall pages into strips.
//!
//! Webtoon pages are often tens of thousands of pixels tall. Any page taller
//! than the slice height is cut into full-width strips, top to bottom; the
//! last strip keeps the remainder.

use image::DynamicImage;

use crate::io::layout::safe_segment;
use crate::slice::{AvifSliceEncoder, CodecFailure, SLICE_EXTENSION};

/// Default strip height in pixels.
pub const DEFAULT_SLICE_HEIGHT: u32 = 1600;

/// `(top, height)` of each strip for an image `height` pixels tall.
pub fn slice_ranges(height: u32, slice_height: u32) -> Vec<(u32, u32)> {
    let slice_height = slice_height.max(1);
    (0..height)
        .step_by(slice_height as usize)
        .map(|top| (top, slice_height.min(height - top)))
        .collect()
}

/// One encoded strip, ready to store.
#[derive(Debug, Clone)]
pub struct EncodedSlice {
    /// Stored file name, unique within the chapter upload
    pub filename: String,
    /// Name shown to editors: the source file, plus the part for strips
    pub original_filename: String,
    pub data: bytes::Bytes,
}

/// Decode one source page and encode its strips.
///
/// `first_order` is the chapter-wide sort order of the first strip. Either
/// every strip of the page is returned or the page fails as a whole.
pub fn encode_page(
    encoder: &AvifSliceEncoder,
    source_name: &str,
    source: &[u8],
    slice_height: u32,
    first_order: i64,
) -> Result<Vec<EncodedSlice>, CodecFailure> {
    let image = encoder.decode(source)?;

    if image.height() <= slice_height {
        let stem = source_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(source_name);
        return Ok(vec![EncodedSlice {
            filename: format!(
                "{:03}_{}.{}",
                first_order,
                safe_segment(stem, "page"),
                SLICE_EXTENSION
            ),
            original_filename: source_name.to_string(),
            data: encoder.encode(&image)?,
        }]);
    }

    strips(&image, slice_height)
        .into_iter()
        .enumerate()
        .map(|(part, strip)| -> Result<EncodedSlice, CodecFailure> {
            Ok(EncodedSlice {
                filename: format!("{:03}.{}", first_order + part as i64, SLICE_EXTENSION),
                original_filename: format!("{} (part {})", source_name, part + 1),
                data: encoder.encode(&strip)?,
            })
        })
        .collect()
}

fn strips(image: &DynamicImage, slice_height: u32) -> Vec<DynamicImage> {
    slice_ranges(image.height(), slice_height)
        .into_iter()
        .map(|(top, height)| image.crop_imm(0, top, image.width(), height))
        .collect()
}
