//! On-disk shard container.
//!
//! A shard begins with the magic and a format version, followed by the raw
//! section payloads, a section table, and a trailer pointing back at the
//! table:
//!
//! ```text
//! +--------+---------+----------------+-----------+------------------+
//! | magic  | version | section bytes… | table     | table offset     |
//! | 4 B    | u32 LE  |                | see below | u32 LE + magic   |
//! +--------+---------+----------------+-----------+------------------+
//! ```
//!
//! The table is a `u32` section count followed by `{offset, size}` pairs of
//! `u32`s, one per [`Section`] in declaration order. All integers are
//! little-endian. Shards are immutable: writers produce a complete file and
//! rename it into place, readers map it and never write.

use crate::error::{Result, ShardError};
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"ShRK";
pub const FORMAT_VERSION: u32 = 1;

/// Byte offsets of newline samples are taken every this many runes, which
/// bounds the scan needed for a byte-to-rune conversion.
pub(crate) const RUNE_SAMPLE: u32 = 64;

/// Fixed section order of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum Section {
    /// Concatenated document contents, ASCII-lowercased.
    Content = 0,
    /// One bit per content byte; set when the original byte was uppercase.
    CaseBits,
    /// `u32` count, then `count + 1` document start offsets.
    Boundaries,
    /// Per-document newline offsets, delta-uvarint encoded.
    NewlinePayload,
    /// `count + 1` `u32` offsets into the newline payload.
    NewlineIndex,
    /// Sorted `{trigram: u64, offset: u32, size: u32}` entries addressing
    /// the content postings payload.
    NgramTable,
    /// Content posting lists (absolute offsets, delta-uvarint).
    Postings,
    /// Concatenated file names, original case.
    NameBlob,
    /// `count + 1` `u32` offsets into the name blob.
    NameIndex,
    /// Ngram table for file names; same entry shape as `NgramTable`.
    NameNgramTable,
    /// File-name posting lists.
    NamePostings,
    /// One `u64` branch mask per document.
    BranchMasks,
    /// Interned language names plus one `u16` name index per document.
    Languages,
    /// Rune-offset samples per document.
    RunePayload,
    /// `count + 1` `u32` offsets into the rune payload.
    RuneIndex,
    /// JSON-encoded [`RepoMetadata`].
    Metadata,
}

pub(crate) const SECTION_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SectionSpan {
    pub offset: u32,
    pub size: u32,
}

/// A branch indexed into this shard; the position in
/// [`RepoMetadata::branches`] is the bit index in every document's branch
/// mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBranch {
    pub name: String,
    /// Version string of the branch head at index time.
    #[serde(default)]
    pub version: String,
}

impl RepoBranch {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Repository-level description stored in the metadata section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub name: String,
    /// Template for linking a commit, e.g. `https://…/commit/{{.Version}}`.
    #[serde(default)]
    pub commit_url_template: String,
    /// Template for linking a file at a version.
    #[serde(default)]
    pub file_url_template: String,
    /// Template for a line anchor within a file link.
    #[serde(default)]
    pub line_fragment_template: String,
    #[serde(default)]
    pub branches: Vec<RepoBranch>,
    /// Priority of this repository relative to others; higher ranks are
    /// searched (and surfaced) first.
    #[serde(default)]
    pub rank: u16,
    /// Format version the shard was written with.
    #[serde(default)]
    pub index_format_version: u32,
    #[serde(default)]
    pub doc_count: u32,
}

impl RepoMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit_url_template: String::new(),
            file_url_template: String::new(),
            line_fragment_template: String::new(),
            branches: Vec::new(),
            rank: 0,
            index_format_version: 0,
            doc_count: 0,
        }
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(offset..offset + 4)
        .ok_or_else(|| ShardError::corrupt("u32 read past end of shard"))?
        .try_into()
        .expect("slice length is four");
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let bytes: [u8; 8] = data
        .get(offset..offset + 8)
        .ok_or_else(|| ShardError::corrupt("u64 read past end of shard"))?
        .try_into()
        .expect("slice length is eight");
    Ok(u64::from_le_bytes(bytes))
}

/// Parses the trailer and section table of a complete shard image.
pub(crate) fn read_sections(data: &[u8]) -> Result<[SectionSpan; SECTION_COUNT]> {
    if data.len() < MAGIC.len() * 2 + 8 {
        return Err(ShardError::corrupt("file is too small to be a shard"));
    }
    if &data[..MAGIC.len()] != MAGIC {
        return Err(ShardError::corrupt("bad magic at start of file"));
    }
    if &data[data.len() - MAGIC.len()..] != MAGIC {
        return Err(ShardError::corrupt("bad magic in trailer"));
    }
    let version = read_u32(data, MAGIC.len())?;
    if version != FORMAT_VERSION {
        return Err(ShardError::UnsupportedVersion(version));
    }

    let table_offset = read_u32(data, data.len() - MAGIC.len() - 4)? as usize;
    let count = read_u32(data, table_offset)? as usize;
    if count != SECTION_COUNT {
        return Err(ShardError::corrupt(format!(
            "section table holds {count} entries, expected {SECTION_COUNT}"
        )));
    }
    let mut spans = [SectionSpan::default(); SECTION_COUNT];
    for (index, span) in spans.iter_mut().enumerate() {
        let entry = table_offset + 4 + index * 8;
        span.offset = read_u32(data, entry)?;
        span.size = read_u32(data, entry + 4)?;
        let end = span.offset as usize + span.size as usize;
        if end > table_offset {
            return Err(ShardError::corrupt(format!(
                "section {index} runs past the section table"
            )));
        }
    }
    Ok(spans)
}
