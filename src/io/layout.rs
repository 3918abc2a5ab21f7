//! Blob path layout for chapter assets.
//!
//! ```text
//! slices/{work_slug}/{chapter_folder}/{revision}/{filename}
//! thumbnails/{work_slug}/{chapter_folder}/{revision}/thumb.avif
//! ```
//!
//! `chapter_folder` is the chapter number with every character outside
//! `[A-Za-z0-9_.-]` replaced by `_`, so free-text numbers like "Prólogo"
//! still map to a single path segment. Distinct numbers may share a folder
//! ("Especial 1", "Especial_1"), so a folder is never deleted as a whole.
//! Each upload of a chapter writes into a fresh random `revision` directory,
//! which belongs to that upload alone; a re-upload never overwrites files
//! that the committed rows still point at.

/// Root prefix for chapter slices.
pub const SLICE_ROOT: &str = "slices";

/// Root prefix for chapter thumbnails.
pub const THUMBNAIL_ROOT: &str = "thumbnails";

/// Folder name used when a chapter number has no usable characters.
const FALLBACK_FOLDER: &str = "extra";

/// Turn a free-text chapter number into a safe path segment.
pub fn chapter_folder(number: &str) -> String {
    safe_segment(number, FALLBACK_FOLDER)
}

/// Replace characters outside `[A-Za-z0-9_.-]` with `_` and trim `_`.
///
/// Returns `fallback` when nothing usable remains.
pub fn safe_segment(raw: &str, fallback: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Folder shared by every revision of a chapter number.
fn chapter_prefix(work_slug: &str, chapter_number: &str) -> String {
    format!(
        "{}/{}/{}/",
        SLICE_ROOT,
        work_slug,
        chapter_folder(chapter_number)
    )
}

/// Path for one slice file.
pub fn slice_path(work_slug: &str, chapter_number: &str, revision: &str, filename: &str) -> String {
    format!(
        "{}{}/{}",
        chapter_prefix(work_slug, chapter_number),
        revision,
        filename
    )
}

/// Random directory name for one upload of a chapter.
pub fn new_revision() -> String {
    hex::encode(rand::random::<[u8; 6]>())
}

/// Path for a chapter thumbnail.
pub fn thumbnail_path(work_slug: &str, chapter_number: &str, revision: &str) -> String {
    format!(
        "{}/{}/{}/{}/thumb.avif",
        THUMBNAIL_ROOT,
        work_slug,
        chapter_folder(chapter_number),
        revision
    )
}

/// Revision directory (with trailing `/`) holding `path`.
///
/// `None` for paths outside the slice and thumbnail layout.
pub fn revision_dir(path: &str) -> Option<&str> {
    let (dir, file) = path.rsplit_once('/')?;
    let mut segments = dir.split('/');
    let root = segments.next()?;
    if file.is_empty()
        || (root != SLICE_ROOT && root != THUMBNAIL_ROOT)
        || segments.filter(|s| !s.is_empty()).count() != 3
    {
        return None;
    }
    Some(&path[..dir.len() + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_folder_keeps_safe_characters() {
        assert_eq!(chapter_folder("10.5"), "10.5");
        assert_eq!(chapter_folder("side-story_2"), "side-story_2");
    }

    #[test]
    fn test_chapter_folder_replaces_unsafe_characters() {
        assert_eq!(chapter_folder("Prólogo"), "Pr_logo");
        assert_eq!(chapter_folder("extra 1/2"), "extra_1_2");
        assert_eq!(chapter_folder("  ch 3 "), "ch_3");
    }

    #[test]
    fn test_chapter_folder_fallback() {
        assert_eq!(chapter_folder(""), "extra");
        assert_eq!(chapter_folder("???"), "extra");
        assert_eq!(chapter_folder(".."), "extra");
        assert_eq!(safe_segment("página 01", "page"), "p_gina_01");
        assert_eq!(safe_segment("  ", "page"), "page");
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            slice_path("solo-leveling", "12", "a1b2c3", "000.avif"),
            "slices/solo-leveling/12/a1b2c3/000.avif"
        );
        assert_eq!(chapter_prefix("solo-leveling", "12"), "slices/solo-leveling/12/");
        assert_eq!(
            thumbnail_path("solo-leveling", "Prólogo", "a1b2c3"),
            "thumbnails/solo-leveling/Pr_logo/a1b2c3/thumb.avif"
        );
    }

    #[test]
    fn test_revision_dir() {
        assert_eq!(
            revision_dir("slices/solo/12/a1b2c3/000.avif"),
            Some("slices/solo/12/a1b2c3/")
        );
        assert_eq!(
            revision_dir("thumbnails/solo/12/a1b2c3/thumb.avif"),
            Some("thumbnails/solo/12/a1b2c3/")
        );
        assert_eq!(revision_dir("slices/solo/12/000.avif"), None);
        assert_eq!(revision_dir("other/solo/12/a1b2c3/000.avif"), None);
        assert_eq!(revision_dir("thumb.avif"), None);
    }

    #[test]
    fn test_revisions_differ() {
        let a = new_revision();
        assert_eq!(a.len(), 12);
        assert_ne!(a, new_revision());
    }
}
