//! Read side of the shard container.
//!
//! A [`Shard`] memory-maps its file and keeps only the small navigation
//! structures decoded in memory: document boundaries, the file-name index
//! and postings, branch masks, languages, and the repository metadata.
//! Content posting lists stay in the map and are decoded per lookup.
//! Callers must not hold slices into the map beyond the shard's lifetime;
//! everything leaving the crate is copied.

use crate::error::{Result, ShardError};
use crate::format::{
    RUNE_SAMPLE, RepoMetadata, SECTION_COUNT, Section, SectionSpan, read_sections, read_u32,
    read_u64,
};
use crate::ngram::Trigram;
use crate::postings::{decode_postings, read_uvarint};
use crate::writer::rune_len;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::info;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => map,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// One open, immutable shard.
pub struct Shard {
    backing: Backing,
    sections: [SectionSpan; SECTION_COUNT],
    boundaries: Vec<u32>,
    name_index: Vec<u32>,
    name_postings: HashMap<Trigram, Vec<u32>>,
    branch_masks: Vec<u64>,
    languages: Vec<String>,
    doc_languages: Vec<u16>,
    metadata: RepoMetadata,
}

impl Shard {
    pub fn open(path: &Path) -> Result<Shard> {
        let open_time = Instant::now();
        let file = File::open(path)?;
        // SAFETY: shards are never mutated in place; replacement happens by
        // writing a sibling file and renaming it over this one, which keeps
        // the existing mapping intact until the shard is dropped.
        let map = unsafe { Mmap::map(&file)? };
        let shard = Self::build(Backing::Mapped(map))?;
        info!(
            path = %path.display(),
            docs = shard.doc_count(),
            elapsed = ?open_time.elapsed(),
            "opened shard"
        );
        Ok(shard)
    }

    /// Opens a shard from an in-memory image; the test entry point.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Shard> {
        Self::build(Backing::Owned(bytes))
    }

    fn build(backing: Backing) -> Result<Shard> {
        let sections = read_sections(backing.as_slice())?;
        let data = backing.as_slice();
        let span = |section: Section| -> &[u8] {
            let span = sections[section as usize];
            &data[span.offset as usize..(span.offset + span.size) as usize]
        };

        // Boundaries: count plus count+1 offsets.
        let boundary_bytes = span(Section::Boundaries);
        let doc_count = read_u32(boundary_bytes, 0)? as usize;
        if boundary_bytes.len() != 4 + (doc_count + 1) * 4 {
            return Err(ShardError::corrupt("boundary section size mismatch"));
        }
        let boundaries = decode_u32s(&boundary_bytes[4..])?;
        let total_content = *boundaries.last().expect("count+1 entries") as usize;
        if !boundaries.windows(2).all(|pair| pair[0] <= pair[1]) {
            return Err(ShardError::corrupt("document boundaries are not sorted"));
        }
        if span(Section::Content).len() != total_content {
            return Err(ShardError::corrupt("content size disagrees with boundaries"));
        }
        if span(Section::CaseBits).len() != total_content.div_ceil(8) {
            return Err(ShardError::corrupt("case bitmap size mismatch"));
        }
        if span(Section::NewlineIndex).len() != (doc_count + 1) * 4 {
            return Err(ShardError::corrupt("newline index size mismatch"));
        }
        if span(Section::RuneIndex).len() != (doc_count + 1) * 4 {
            return Err(ShardError::corrupt("rune index size mismatch"));
        }

        let name_index = decode_u32s(span(Section::NameIndex))?;
        if name_index.len() != doc_count + 1 {
            return Err(ShardError::corrupt("name index size mismatch"));
        }
        if *name_index.last().expect("count+1 entries") as usize != span(Section::NameBlob).len() {
            return Err(ShardError::corrupt("name blob size disagrees with index"));
        }

        // File-name postings live fully in memory.
        let name_postings =
            decode_posting_map(span(Section::NameNgramTable), span(Section::NamePostings))?;

        let mask_bytes = span(Section::BranchMasks);
        if mask_bytes.len() != doc_count * 8 {
            return Err(ShardError::corrupt("branch mask section size mismatch"));
        }
        let branch_masks: Vec<u64> = mask_bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk of eight")))
            .collect();

        let (languages, doc_languages) = decode_languages(span(Section::Languages), doc_count)?;

        let metadata: RepoMetadata = serde_json::from_slice(span(Section::Metadata))
            .map_err(|err| ShardError::corrupt(format!("metadata is not valid JSON: {err}")))?;

        Ok(Shard {
            sections,
            boundaries,
            name_index,
            name_postings,
            branch_masks,
            languages,
            doc_languages,
            metadata,
            backing,
        })
    }

    fn section(&self, section: Section) -> &[u8] {
        let span = self.sections[section as usize];
        &self.backing.as_slice()[span.offset as usize..(span.offset + span.size) as usize]
    }

    pub fn doc_count(&self) -> u32 {
        (self.boundaries.len() - 1) as u32
    }

    pub fn metadata(&self) -> &RepoMetadata {
        &self.metadata
    }

    pub fn repo_name(&self) -> &str {
        &self.metadata.name
    }

    pub fn rank(&self) -> u16 {
        self.metadata.rank
    }

    /// Lowercased content of one document.
    pub(crate) fn content(&self, doc: u32) -> &[u8] {
        let start = self.boundaries[doc as usize] as usize;
        let end = self.boundaries[doc as usize + 1] as usize;
        &self.section(Section::Content)[start..end]
    }

    pub(crate) fn doc_bounds(&self, doc: u32) -> (u32, u32) {
        (
            self.boundaries[doc as usize],
            self.boundaries[doc as usize + 1],
        )
    }

    /// Document containing the absolute content offset.
    pub(crate) fn doc_at_offset(&self, offset: u32) -> u32 {
        let idx = self.boundaries.partition_point(|&start| start <= offset);
        (idx - 1) as u32
    }

    /// Original-case file name.
    pub(crate) fn name(&self, doc: u32) -> &[u8] {
        let start = self.name_index[doc as usize] as usize;
        let end = self.name_index[doc as usize + 1] as usize;
        &self.section(Section::NameBlob)[start..end]
    }

    pub(crate) fn name_bounds(&self, doc: u32) -> (u32, u32) {
        (
            self.name_index[doc as usize],
            self.name_index[doc as usize + 1],
        )
    }

    pub(crate) fn name_doc_at_offset(&self, offset: u32) -> u32 {
        let idx = self.name_index.partition_point(|&start| start <= offset);
        (idx - 1) as u32
    }

    /// Decoded content posting list for an exact (case-preserved) trigram.
    pub(crate) fn postings(&self, trigram: Trigram) -> Result<Vec<u32>> {
        match self.ngram_lookup(trigram)? {
            Some((offset, size)) => {
                let payload = self.section(Section::Postings);
                let end = offset as usize + size as usize;
                if end > payload.len() {
                    return Err(ShardError::corrupt("posting span past payload end"));
                }
                decode_postings(&payload[offset as usize..end])
            }
            None => Ok(Vec::new()),
        }
    }

    /// Byte length of the posting list; the frequency proxy used to pick
    /// the rarest trigrams of a pattern.
    pub(crate) fn postings_size(&self, trigram: Trigram) -> u32 {
        match self.ngram_lookup(trigram) {
            Ok(Some((_, size))) => size,
            _ => 0,
        }
    }

    // Binary search over the fixed-width table entries in the map.
    fn ngram_lookup(&self, trigram: Trigram) -> Result<Option<(u32, u32)>> {
        let table = self.section(Section::NgramTable);
        let count = read_u32(table, 0)? as usize;
        if table.len() != 4 + count * 16 {
            return Err(ShardError::corrupt("ngram table size mismatch"));
        }
        let (mut lo, mut hi) = (0usize, count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = 4 + mid * 16;
            let key = read_u64(table, entry)?;
            match key.cmp(&trigram) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return Ok(Some((read_u32(table, entry + 8)?, read_u32(table, entry + 12)?)));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn name_posting_list(&self, trigram: Trigram) -> &[u32] {
        self.name_postings
            .get(&trigram)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn name_postings_size(&self, trigram: Trigram) -> u32 {
        self.name_posting_list(trigram).len() as u32
    }

    /// Newline offsets within one document, ascending, document-relative.
    pub(crate) fn newlines(&self, doc: u32) -> Result<Vec<u32>> {
        let index = self.section(Section::NewlineIndex);
        let start = read_u32(index, doc as usize * 4)? as usize;
        let end = read_u32(index, doc as usize * 4 + 4)? as usize;
        let payload = self.section(Section::NewlinePayload);
        if start > end || end > payload.len() {
            return Err(ShardError::corrupt("newline span out of bounds"));
        }
        decode_postings(&payload[start..end])
    }

    pub(crate) fn case_bit(&self, absolute: u32) -> bool {
        let bits = self.section(Section::CaseBits);
        bits[(absolute >> 3) as usize] & (1 << (absolute & 7)) != 0
    }

    /// Original bytes of a content range, reconstructed from the lowered
    /// blob and the case bitmap. Always an owned copy.
    pub(crate) fn original_slice(&self, start: u32, len: u32) -> Vec<u8> {
        let content = self.section(Section::Content);
        let mut bytes = content[start as usize..(start + len) as usize].to_vec();
        for (index, byte) in bytes.iter_mut().enumerate() {
            if self.case_bit(start + index as u32) {
                *byte = byte.to_ascii_uppercase();
            }
        }
        bytes
    }

    /// Rune index of a document-relative byte offset, computed from the
    /// sampled offsets without scanning the whole document.
    pub(crate) fn rune_offset(&self, doc: u32, byte_in_doc: u32) -> Result<u32> {
        let index = self.section(Section::RuneIndex);
        let start = read_u32(index, doc as usize * 4)? as usize;
        let end = read_u32(index, doc as usize * 4 + 4)? as usize;
        let payload = self.section(Section::RunePayload);
        if start > end || end > payload.len() || (end - start) % 4 != 0 {
            return Err(ShardError::corrupt("rune span out of bounds"));
        }
        let samples = &payload[start..end];
        let sample_count = samples.len() / 4;
        // Largest sample at or before the target byte.
        let mut k = 0usize;
        for i in 0..sample_count {
            if read_u32(samples, i * 4)? <= byte_in_doc {
                k = i;
            } else {
                break;
            }
        }
        if sample_count == 0 {
            return Ok(0);
        }
        let mut offset = read_u32(samples, k * 4)?;
        let mut rune = k as u32 * RUNE_SAMPLE;
        let content = self.content(doc);
        while offset < byte_in_doc {
            let step = rune_len(content[offset as usize]) as u32;
            offset += step.min(content.len() as u32 - offset);
            rune += 1;
        }
        Ok(rune)
    }

    pub(crate) fn branch_mask(&self, doc: u32) -> u64 {
        self.branch_masks[doc as usize]
    }

    /// Branch names selected by a mask, in bit order.
    pub(crate) fn branches_of_mask(&self, mask: u64) -> Vec<String> {
        self.metadata
            .branches
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, branch)| branch.name.clone())
            .collect()
    }

    pub(crate) fn language(&self, doc: u32) -> &str {
        &self.languages[self.doc_languages[doc as usize] as usize]
    }
}

fn decode_u32s(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(ShardError::corrupt("u32 array section has odd size"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunk of four")))
        .collect())
}

fn decode_posting_map(table: &[u8], payload: &[u8]) -> Result<HashMap<Trigram, Vec<u32>>> {
    let count = read_u32(table, 0)? as usize;
    if table.len() != 4 + count * 16 {
        return Err(ShardError::corrupt("name ngram table size mismatch"));
    }
    let mut map = HashMap::with_capacity(count);
    for entry in 0..count {
        let base = 4 + entry * 16;
        let trigram = read_u64(table, base)?;
        let offset = read_u32(table, base + 8)? as usize;
        let size = read_u32(table, base + 12)? as usize;
        if offset + size > payload.len() {
            return Err(ShardError::corrupt("name posting span past payload end"));
        }
        map.insert(trigram, decode_postings(&payload[offset..offset + size])?);
    }
    Ok(map)
}

fn decode_languages(bytes: &[u8], doc_count: usize) -> Result<(Vec<String>, Vec<u16>)> {
    let name_count = read_u32(bytes, 0)? as usize;
    let mut pos = 4usize;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        let len = read_uvarint(bytes, &mut pos)? as usize;
        let end = pos + len;
        if end > bytes.len() {
            return Err(ShardError::corrupt("language name past section end"));
        }
        let name = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| ShardError::corrupt("language name is not UTF-8"))?;
        names.push(name.to_string());
        pos = end;
    }
    if bytes.len() - pos != doc_count * 2 {
        return Err(ShardError::corrupt("language index size mismatch"));
    }
    let doc_languages: Vec<u16> = bytes[pos..]
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes(chunk.try_into().expect("chunk of two")))
        .collect();
    if doc_languages.iter().any(|&idx| idx as usize >= names.len()) {
        return Err(ShardError::corrupt("language index out of range"));
    }
    Ok((names, doc_languages))
}
