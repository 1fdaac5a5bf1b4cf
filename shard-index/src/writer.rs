//! Shard construction.
//!
//! The writer buffers documents in memory and emits the complete container
//! in [`ShardWriter::finish`]. Files appear atomically: the image is
//! written to a sibling temp path, synced, and renamed over the target.

use crate::error::{Result, ShardError};
use crate::format::{
    FORMAT_VERSION, MAGIC, RUNE_SAMPLE, RepoMetadata, SECTION_COUNT, SectionSpan,
};
use crate::ngram::{Trigram, split_trigrams};
use crate::postings::{encode_postings, put_uvarint};
use memchr::memchr_iter;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Knobs for document admission.
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Documents larger than this many bytes are skipped. Zero disables
    /// the cap.
    pub size_max: usize,
    /// Glob-style name patterns (`*` wildcards) exempt from `size_max`.
    pub large_files: Vec<String>,
}

struct PendingDoc {
    name: String,
    content: Vec<u8>,
    branch_mask: u64,
    language: u16,
}

/// Builds one immutable shard for one repository.
pub struct ShardWriter {
    metadata: RepoMetadata,
    options: WriterOptions,
    docs: Vec<PendingDoc>,
    languages: Vec<String>,
    skipped: usize,
}

impl ShardWriter {
    /// The branch list of `metadata` fixes the mask-bit assignment for every
    /// document added later; at most 64 branches fit a mask.
    pub fn new(metadata: RepoMetadata, options: WriterOptions) -> Result<Self> {
        if metadata.branches.len() > 64 {
            return Err(ShardError::TooManyBranches(metadata.branches.len()));
        }
        Ok(Self {
            metadata,
            options,
            docs: Vec::new(),
            // Index zero is the "unknown" language.
            languages: vec![String::new()],
            skipped: 0,
        })
    }

    /// Queues a document. Returns false when the size cap skipped it.
    pub fn add_document(
        &mut self,
        name: &str,
        content: &[u8],
        branches: &[&str],
        language: Option<&str>,
    ) -> Result<bool> {
        if self.options.size_max > 0
            && content.len() > self.options.size_max
            && !self
                .options
                .large_files
                .iter()
                .any(|pattern| glob_match(pattern, name))
        {
            self.skipped += 1;
            return Ok(false);
        }

        let mut mask = 0u64;
        for branch in branches {
            let bit = self
                .metadata
                .branches
                .iter()
                .position(|b| b.name == *branch)
                .ok_or_else(|| ShardError::UnknownBranch(name.to_string(), branch.to_string()))?;
            mask |= 1 << bit;
        }

        let language = match language {
            Some(lang) if !lang.is_empty() => {
                let lang = lang.to_ascii_lowercase();
                match self.languages.iter().position(|known| *known == lang) {
                    Some(index) => index as u16,
                    None => {
                        self.languages.push(lang);
                        (self.languages.len() - 1) as u16
                    }
                }
            }
            _ => 0,
        };

        self.docs.push(PendingDoc {
            name: name.to_string(),
            content: content.to_vec(),
            branch_mask: mask,
            language,
        });
        Ok(true)
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    /// Serializes the shard image into memory.
    pub fn finish_bytes(mut self) -> Result<Vec<u8>> {
        let build_time = Instant::now();
        self.metadata.index_format_version = FORMAT_VERSION;
        self.metadata.doc_count = self.docs.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());

        let mut spans = [SectionSpan::default(); SECTION_COUNT];
        let mut section = SectionCursor {
            out: &mut out,
            spans: &mut spans,
            next: 0,
        };

        // Content + case bits.
        let total_content: usize = self.docs.iter().map(|d| d.content.len()).sum();
        section.begin();
        {
            let out = &mut *section.out;
            out.reserve(total_content);
            for doc in &self.docs {
                out.extend(doc.content.iter().map(u8::to_ascii_lowercase));
            }
        }
        section.end();

        section.begin();
        {
            let out = &mut *section.out;
            out.resize(out.len() + total_content.div_ceil(8), 0);
            let bits_start = out.len() - total_content.div_ceil(8);
            let mut position = 0usize;
            for doc in &self.docs {
                for &byte in &doc.content {
                    if byte.is_ascii_uppercase() {
                        out[bits_start + (position >> 3)] |= 1 << (position & 7);
                    }
                    position += 1;
                }
            }
        }
        section.end();

        // Boundaries.
        section.begin();
        {
            let out = &mut *section.out;
            out.extend_from_slice(&(self.docs.len() as u32).to_le_bytes());
            let mut offset = 0u32;
            for doc in &self.docs {
                out.extend_from_slice(&offset.to_le_bytes());
                offset += doc.content.len() as u32;
            }
            out.extend_from_slice(&offset.to_le_bytes());
        }
        section.end();

        // Newlines.
        let mut newline_payload = Vec::new();
        let mut newline_index = Vec::with_capacity(self.docs.len() + 1);
        for doc in &self.docs {
            newline_index.push(newline_payload.len() as u32);
            let offsets: Vec<u32> = memchr_iter(b'\n', &doc.content)
                .map(|pos| pos as u32)
                .collect();
            encode_postings(&offsets, &mut newline_payload);
        }
        newline_index.push(newline_payload.len() as u32);
        section.begin();
        section.out.extend_from_slice(&newline_payload);
        section.end();
        section.begin();
        for offset in &newline_index {
            section.out.extend_from_slice(&offset.to_le_bytes());
        }
        section.end();

        // Content trigrams. Postings are keyed by the original-case
        // trigram; case-insensitive search unions the case variants.
        let mut content_postings: BTreeMap<Trigram, Vec<u32>> = BTreeMap::new();
        let mut doc_start = 0u32;
        for doc in &self.docs {
            for (index, trigram) in split_trigrams(&doc.content).enumerate() {
                content_postings
                    .entry(trigram)
                    .or_default()
                    .push(doc_start + index as u32);
            }
            doc_start += doc.content.len() as u32;
        }
        let (table, payload) = encode_posting_map(&content_postings);
        section.begin();
        section.out.extend_from_slice(&table);
        section.end();
        section.begin();
        section.out.extend_from_slice(&payload);
        section.end();

        // File names.
        section.begin();
        for doc in &self.docs {
            section.out.extend_from_slice(doc.name.as_bytes());
        }
        section.end();
        section.begin();
        {
            let out = &mut *section.out;
            let mut offset = 0u32;
            for doc in &self.docs {
                out.extend_from_slice(&offset.to_le_bytes());
                offset += doc.name.len() as u32;
            }
            out.extend_from_slice(&offset.to_le_bytes());
        }
        section.end();

        let mut name_postings: BTreeMap<Trigram, Vec<u32>> = BTreeMap::new();
        let mut name_start = 0u32;
        for doc in &self.docs {
            for (index, trigram) in split_trigrams(doc.name.as_bytes()).enumerate() {
                name_postings
                    .entry(trigram)
                    .or_default()
                    .push(name_start + index as u32);
            }
            name_start += doc.name.len() as u32;
        }
        let (table, payload) = encode_posting_map(&name_postings);
        section.begin();
        section.out.extend_from_slice(&table);
        section.end();
        section.begin();
        section.out.extend_from_slice(&payload);
        section.end();

        // Branch masks.
        section.begin();
        for doc in &self.docs {
            section.out.extend_from_slice(&doc.branch_mask.to_le_bytes());
        }
        section.end();

        // Languages.
        section.begin();
        {
            let out = &mut *section.out;
            out.extend_from_slice(&(self.languages.len() as u32).to_le_bytes());
            for language in &self.languages {
                put_uvarint(out, language.len() as u64);
                out.extend_from_slice(language.as_bytes());
            }
            for doc in &self.docs {
                out.extend_from_slice(&doc.language.to_le_bytes());
            }
        }
        section.end();

        // Rune offset samples.
        let mut rune_payload = Vec::new();
        let mut rune_index = Vec::with_capacity(self.docs.len() + 1);
        for doc in &self.docs {
            rune_index.push(rune_payload.len() as u32);
            for sample in rune_samples(&doc.content) {
                rune_payload.extend_from_slice(&sample.to_le_bytes());
            }
        }
        rune_index.push(rune_payload.len() as u32);
        section.begin();
        section.out.extend_from_slice(&rune_payload);
        section.end();
        section.begin();
        for offset in &rune_index {
            section.out.extend_from_slice(&offset.to_le_bytes());
        }
        section.end();

        // Metadata.
        let metadata_json = serde_json::to_vec(&self.metadata)
            .map_err(|err| ShardError::corrupt(format!("metadata does not serialize: {err}")))?;
        section.begin();
        section.out.extend_from_slice(&metadata_json);
        section.end();

        debug_assert_eq!(section.next, SECTION_COUNT);

        // Section table and trailer.
        let table_offset = out.len() as u32;
        out.extend_from_slice(&(SECTION_COUNT as u32).to_le_bytes());
        for span in &spans {
            out.extend_from_slice(&span.offset.to_le_bytes());
            out.extend_from_slice(&span.size.to_le_bytes());
        }
        out.extend_from_slice(&table_offset.to_le_bytes());
        out.extend_from_slice(MAGIC);

        info!(
            docs = self.docs.len(),
            skipped = self.skipped,
            bytes = out.len(),
            elapsed = ?build_time.elapsed(),
            "shard image built"
        );
        Ok(out)
    }

    /// Writes the shard and renames it into place.
    pub fn finish(self, path: &Path) -> Result<()> {
        let image = self.finish_bytes()?;
        let file_name = path
            .file_name()
            .ok_or_else(|| ShardError::BadPath(path.to_path_buf()))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        let mut file = File::create(&tmp_path)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Writes sections sequentially into the image, recording spans.
struct SectionCursor<'a> {
    out: &'a mut Vec<u8>,
    spans: &'a mut [SectionSpan; SECTION_COUNT],
    next: usize,
}

impl SectionCursor<'_> {
    fn begin(&mut self) {
        self.spans[self.next].offset = self.out.len() as u32;
    }

    fn end(&mut self) {
        let span = &mut self.spans[self.next];
        span.size = self.out.len() as u32 - span.offset;
        self.next += 1;
    }
}

/// Encodes a trigram -> positions map into the sorted lookup table and the
/// concatenated postings payload it points into.
fn encode_posting_map(map: &BTreeMap<Trigram, Vec<u32>>) -> (Vec<u8>, Vec<u8>) {
    let mut table = Vec::with_capacity(4 + map.len() * 16);
    let mut payload = Vec::new();
    table.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (&trigram, positions) in map {
        let start = payload.len() as u32;
        encode_postings(positions, &mut payload);
        table.extend_from_slice(&trigram.to_le_bytes());
        table.extend_from_slice(&start.to_le_bytes());
        table.extend_from_slice(&(payload.len() as u32 - start).to_le_bytes());
    }
    (table, payload)
}

/// Byte offsets of every [`RUNE_SAMPLE`]th rune. Bytes that are not valid
/// UTF-8 sequence leads count as one rune each.
fn rune_samples(content: &[u8]) -> Vec<u32> {
    let mut samples = Vec::new();
    let mut rune = 0u32;
    let mut offset = 0usize;
    while offset < content.len() {
        if rune % RUNE_SAMPLE == 0 {
            samples.push(offset as u32);
        }
        offset += rune_len(content[offset]).min(content.len() - offset);
        rune += 1;
    }
    samples
}

pub(crate) fn rune_len(lead: u8) -> usize {
    match lead {
        byte if byte & 0b1000_0000 == 0 => 1,
        byte if byte & 0b1110_0000 == 0b1100_0000 => 2,
        byte if byte & 0b1111_0000 == 0b1110_0000 => 3,
        byte if byte & 0b1111_1000 == 0b1111_0000 => 4,
        _ => 1,
    }
}

/// Minimal `*` glob. Empty patterns match only empty names.
fn glob_match(pattern: &str, name: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(segment) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if index == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(found) => rest = &rest[found + segment.len()..],
                None => return false,
            }
        }
    }
    // The pattern ended with '*'.
    true
}
