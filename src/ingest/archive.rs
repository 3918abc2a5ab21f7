//! Chapter archive reading.
//!
//! An archive holds one folder per chapter:
//!
//! ```text
//! 01/001.jpg
//! 01/002.jpg
//! 10.5/page-a.png
//! Solo Leveling/Prólogo/01.webp
//! ```
//!
//! The folder directly containing an image names its chapter. Files at the
//! archive root, anything under `__MACOSX/` or a dot-prefixed path component,
//! and files without an accepted image extension are ignored.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use bytes::Bytes;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::catalog::{normalize_chapter_number, ChapterKey};
use crate::error::IngestError;
use crate::slice::is_source_image;

/// Largest uncompressed image accepted from an archive.
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// One source page, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    pub filename: String,
    pub data: Bytes,
}

/// All source pages of one chapter, in filename order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSource {
    /// Normalized chapter number
    pub number: String,
    pub pages: Vec<SourcePage>,
}

/// Entries ignored by [`read_archive`], with the reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents {
    pub chapters: Vec<ChapterSource>,
    pub ignored: Vec<String>,
}

/// Parse a zip archive into chapters, oldest first.
///
/// Fails when the bytes are not a zip or no chapter folder holds an image.
pub fn read_archive(data: &[u8]) -> Result<ArchiveContents, IngestError> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(|e| IngestError::InvalidArchive {
            reason: format!("not a readable zip file: {}", e),
        })?;

    let mut grouped: BTreeMap<String, Vec<SourcePage>> = BTreeMap::new();
    let mut ignored = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| IngestError::InvalidArchive {
                reason: format!("unreadable entry #{}: {}", index, e),
            })?;

        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        let Some((folder, filename)) = chapter_entry(&name) else {
            ignored.push(name);
            continue;
        };
        if !is_source_image(filename) {
            ignored.push(name);
            continue;
        }
        if entry.size() > MAX_ENTRY_BYTES {
            warn!(entry = %name, size = entry.size(), "Skipping oversized archive entry");
            ignored.push(name);
            continue;
        }

        let mut buf = Vec::with_capacity(entry.size() as usize);
        // Declared sizes can lie; never read past the limit
        (&mut entry)
            .take(MAX_ENTRY_BYTES + 1)
            .read_to_end(&mut buf)
            .map_err(|e| IngestError::InvalidArchive {
                reason: format!("corrupt entry {}: {}", name, e),
            })?;
        if buf.len() as u64 > MAX_ENTRY_BYTES {
            warn!(entry = %name, "Skipping oversized archive entry");
            ignored.push(name);
            continue;
        }

        let number = normalize_chapter_number(folder);
        let filename = filename.to_string();
        grouped.entry(number).or_default().push(SourcePage {
            filename,
            data: Bytes::from(buf),
        });
    }

    if grouped.is_empty() {
        return Err(IngestError::InvalidArchive {
            reason: "no chapter folder with images found".to_string(),
        });
    }

    let mut chapters: Vec<ChapterSource> = grouped
        .into_iter()
        .map(|(number, mut pages)| {
            pages.sort_by(|a, b| a.filename.cmp(&b.filename));
            ChapterSource { number, pages }
        })
        .collect();
    chapters.sort_by_key(|c| ChapterKey::parse(&c.number));

    debug!(
        chapters = chapters.len(),
        ignored = ignored.len(),
        "Read chapter archive"
    );
    Ok(ArchiveContents { chapters, ignored })
}

/// Split an entry name into `(chapter folder, file name)`.
///
/// Returns `None` for root files and hidden or macOS metadata paths.
fn chapter_entry(name: &str) -> Option<(&str, &str)> {
    if name.starts_with("__MACOSX/") {
        return None;
    }

    let components: Vec<&str> = name.split('/').filter(|c| !c.is_empty()).collect();
    if components.len() < 2 || components.iter().any(|c| c.starts_with('.')) {
        return None;
    }

    let filename = components[components.len() - 1];
    let folder = components[components.len() - 2].trim();
    if folder.is_empty() {
        return None;
    }
    Some((folder, filename))
}
