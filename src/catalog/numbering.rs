//! Chapter number parsing, ordering and slugs.
//!
//! Chapter identifiers are free text. They parse into a [`ChapterKey`] whose
//! ordering is: prologues, then numbered chapters by `(major, minor)`, then
//! epilogues, then anything else by lowercase text.
//!
//! The navigation and VIP schedules both use [`sort_newest_first`]: the
//! highest chapter key comes first, ties broken by the later release, then
//! by title.

use std::cmp::Ordering;

use super::models::Chapter;

/// Prefixes stripped before looking for a number.
const NUMBER_PREFIXES: [&str; 4] = ["capítulo", "capitulo", "cap.", "ch."];

const PROLOGUE_MARKERS: [&str; 3] = ["prólogo", "prologo", "prologue"];
const EPILOGUE_MARKERS: [&str; 3] = ["epílogo", "epilogo", "epilogue"];

/// Sortable key for a chapter identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChapterKey {
    Prologue,
    /// `major.minor`; the fractional digits compare as an integer
    Numbered { major: u64, minor: u64 },
    Epilogue,
    /// Unrecognized identifier, compared by lowercase text
    Unparsed(String),
}

impl ChapterKey {
    /// Parse a free-text chapter identifier.
    pub fn parse(raw: &str) -> ChapterKey {
        let lowered = raw.trim().to_lowercase();
        let mut cleaned = lowered.clone();
        for prefix in NUMBER_PREFIXES {
            cleaned = cleaned.replace(prefix, "");
        }
        let cleaned = cleaned.trim();

        if let Some((major, minor)) = leading_number(cleaned) {
            return ChapterKey::Numbered { major, minor };
        }

        if PROLOGUE_MARKERS.iter().any(|m| lowered.contains(m)) {
            ChapterKey::Prologue
        } else if EPILOGUE_MARKERS.iter().any(|m| lowered.contains(m)) {
            ChapterKey::Epilogue
        } else {
            ChapterKey::Unparsed(lowered)
        }
    }
}

/// Parse `<digits>[(.|,)<digits>]` at the start of `s`.
fn leading_number(s: &str) -> Option<(u64, u64)> {
    let major_len = s.bytes().take_while(u8::is_ascii_digit).count();
    if major_len == 0 {
        return None;
    }
    let major = s[..major_len].parse().ok()?;

    let rest = &s[major_len..];
    let minor = match rest.as_bytes().first() {
        Some(b'.') | Some(b',') => {
            let digits = &rest[1..];
            let minor_len = digits.bytes().take_while(u8::is_ascii_digit).count();
            if minor_len == 0 {
                0
            } else {
                digits[..minor_len].parse().ok()?
            }
        }
        _ => 0,
    };

    Some((major, minor))
}

/// Newest-first comparison used everywhere chapters are listed or tiered.
pub fn newest_first(a: &Chapter, b: &Chapter) -> Ordering {
    let key_a = ChapterKey::parse(&a.number);
    let key_b = ChapterKey::parse(&b.number);

    key_b
        .cmp(&key_a)
        .then_with(|| b.effective_release().cmp(&a.effective_release()))
        .then_with(|| b.title.to_lowercase().cmp(&a.title.to_lowercase()))
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort chapters newest first.
pub fn sort_newest_first(chapters: &mut [Chapter]) {
    chapters.sort_by(newest_first);
}

/// Normalize a chapter folder name into a chapter number.
///
/// Numeric names lose leading zeros and trailing fractional zeros
/// ("05" → "5", "7.0" → "7", "10.50" → "10.5"). Anything else is kept as
/// trimmed text.
pub fn normalize_chapter_number(raw: &str) -> String {
    let trimmed = raw.trim();
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (trimmed, None),
    };

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(int_part) || frac_part.is_some_and(|f| !is_digits(f)) {
        return trimmed.to_string();
    }

    let int_norm = int_part.trim_start_matches('0');
    let int_norm = if int_norm.is_empty() { "0" } else { int_norm };

    match frac_part.map(|f| f.trim_end_matches('0')) {
        Some(frac) if !frac.is_empty() => format!("{}.{}", int_norm, frac),
        _ => int_norm.to_string(),
    }
}

/// URL slug for free text: ASCII-folded, lowercase, `-` separated.
///
/// Dots become dashes so "10.5" maps to "10-5".
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let folded = fold_accent(c);
        if folded.is_ascii_alphanumeric() || folded == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(folded);
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}
