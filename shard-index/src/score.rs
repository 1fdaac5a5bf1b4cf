//! Document scoring.
//!
//! The score of a file match is the best weight among its fragments plus a
//! repository-rank contribution, so ordering prefers symbol hits, then
//! word-aligned hits, then file-name hits, and uses rank to break ties
//! between repositories.

use crate::result::FileMatch;

const WEIGHT_SYMBOL: f64 = 7000.0;
const WEIGHT_WORD_BOUNDARY: f64 = 500.0;
const WEIGHT_FILE_NAME: f64 = 1000.0;
const WEIGHT_BASE: f64 = 100.0;
// Rank is a u16; scaled so it orders repositories without beating any
// structural weight difference.
const WEIGHT_RANK: f64 = 400.0 / u16::MAX as f64;

pub(crate) struct FragmentSignal {
    pub word_boundary: bool,
    pub symbol: bool,
    pub file_name: bool,
}

pub(crate) fn fragment_weight(signal: &FragmentSignal) -> f64 {
    let mut weight = WEIGHT_BASE;
    if signal.symbol {
        weight += WEIGHT_SYMBOL;
    }
    if signal.word_boundary {
        weight += WEIGHT_WORD_BOUNDARY;
    }
    if signal.file_name {
        weight += WEIGHT_FILE_NAME;
    }
    weight
}

pub(crate) fn rank_weight(rank: u16) -> f64 {
    f64::from(rank) * WEIGHT_RANK
}

/// Is the byte range `[start, start+len)` aligned on word boundaries
/// within `text`?
pub(crate) fn word_aligned(text: &[u8], start: usize, len: usize) -> bool {
    let before = start.checked_sub(1).map(|i| text[i]);
    let after = text.get(start + len).copied();
    let boundary = |byte: Option<u8>| match byte {
        None => true,
        Some(b) => !(b.is_ascii_alphanumeric() || b == b'_'),
    };
    boundary(before) && boundary(after)
}

/// Descending score, then path, then document id.
pub(crate) fn compare(a: &FileMatch, b: &FileMatch) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.doc.cmp(&b.doc))
}
