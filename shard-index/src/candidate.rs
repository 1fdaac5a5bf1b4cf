//! Candidate generation.
//!
//! A substring atom of length `n >= 3` is located through its two rarest
//! trigrams: their posting lists are walked with a two-pointer scan aligned
//! by the positional distance between them, and every aligned pair yields a
//! candidate span that still needs verification against the document bytes.

use crate::error::Result;
use crate::ngram::{NGRAM_SIZE, Trigram, case_variants, split_trigrams};
use crate::postings::merge_ascending;
use crate::reader::Shard;

/// A possible occurrence; `start` is absolute within the content blob or
/// the name blob depending on the atom's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub start: u32,
    pub len: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CandidateSet {
    pub candidates: Vec<Candidate>,
    /// The two trigrams cover the entire pattern, so byte comparison can be
    /// skipped; only case and bounds still need checking.
    pub covers: bool,
}

/// Which index namespace an atom generates candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Space {
    Content,
    Names,
}

impl Shard {
    fn posting_frequency(&self, space: Space, trigram: Trigram, case_sensitive: bool) -> u32 {
        let single = |t: Trigram| match space {
            Space::Content => self.postings_size(t),
            Space::Names => self.name_postings_size(t),
        };
        if case_sensitive {
            single(trigram)
        } else {
            case_variants(trigram).into_iter().map(single).sum()
        }
    }

    fn posting_list(&self, space: Space, trigram: Trigram, case_sensitive: bool) -> Result<Vec<u32>> {
        let single = |t: Trigram| -> Result<Vec<u32>> {
            match space {
                Space::Content => self.postings(t),
                Space::Names => Ok(self.name_posting_list(t).to_vec()),
            }
        };
        if case_sensitive {
            single(trigram)
        } else {
            let lists = case_variants(trigram)
                .into_iter()
                .map(single)
                .collect::<Result<Vec<_>>>()?;
            Ok(merge_ascending(lists))
        }
    }

    /// Generates candidates for a pattern of at least [`NGRAM_SIZE`] bytes.
    ///
    /// For case-insensitive atoms the pattern must already be lowercased;
    /// frequencies then sum over all case variants of each trigram and the
    /// variant lists merge ascending. An absent trigram proves the pattern
    /// cannot occur and short-circuits to an empty set.
    pub(crate) fn substring_candidates(
        &self,
        pattern: &[u8],
        case_sensitive: bool,
        space: Space,
    ) -> Result<CandidateSet> {
        debug_assert!(pattern.len() >= NGRAM_SIZE);
        let n = pattern.len();
        let trigrams: Vec<Trigram> = split_trigrams(pattern).collect();

        let mut first_i = 0usize;
        let mut last_i = 0usize;
        let mut first_freq = u32::MAX;
        let mut last_freq = u32::MAX;
        for (position, &t) in trigrams.iter().enumerate() {
            let freq = self.posting_frequency(space, t, case_sensitive);
            if freq == 0 {
                return Ok(CandidateSet::default());
            }
            // Track the two smallest frequencies; earliest position wins
            // ties so the scan distance stays deterministic.
            if freq < first_freq {
                last_i = first_i;
                last_freq = first_freq;
                first_i = position;
                first_freq = freq;
            } else if freq < last_freq {
                last_i = position;
                last_freq = freq;
            }
        }
        if first_i > last_i {
            std::mem::swap(&mut first_i, &mut last_i);
        }

        let left_pad = first_i as u32;
        let right_pad = (n - NGRAM_SIZE - last_i) as u32;
        let distance = (last_i - first_i) as u32;
        let covers = distance <= NGRAM_SIZE as u32 && left_pad == 0 && right_pad == 0;

        let first_list = self.posting_list(space, trigrams[first_i], case_sensitive)?;
        let mut candidates = Vec::new();
        if first_i == last_i {
            for position in first_list {
                if position >= left_pad {
                    candidates.push(Candidate {
                        start: position - left_pad,
                        len: n as u32,
                    });
                }
            }
        } else {
            let last_list = self.posting_list(space, trigrams[last_i], case_sensitive)?;
            let (mut i, mut j) = (0usize, 0usize);
            while i < first_list.len() && j < last_list.len() {
                let expected = first_list[i] + distance;
                if last_list[j] < expected {
                    j += 1;
                } else if last_list[j] > expected {
                    i += 1;
                } else {
                    if first_list[i] >= left_pad {
                        candidates.push(Candidate {
                            start: first_list[i] - left_pad,
                            len: n as u32,
                        });
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(CandidateSet { candidates, covers })
    }

    /// Fallback for patterns shorter than a trigram: scan every file name.
    /// Only names support this; content patterns must reach trigram size.
    pub(crate) fn name_brute_force(&self, pattern: &[u8], case_sensitive: bool) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if pattern.is_empty() {
            return candidates;
        }
        for doc in 0..self.doc_count() {
            let name = self.name(doc);
            let (name_start, _) = self.name_bounds(doc);
            if name.len() < pattern.len() {
                continue;
            }
            for offset in 0..=name.len() - pattern.len() {
                let window = &name[offset..offset + pattern.len()];
                let hit = if case_sensitive {
                    window == pattern
                } else {
                    window.eq_ignore_ascii_case(pattern)
                };
                if hit {
                    candidates.push(Candidate {
                        start: name_start + offset as u32,
                        len: pattern.len() as u32,
                    });
                }
            }
        }
        candidates
    }

}

pub(crate) fn lowered(pattern: &str) -> Vec<u8> {
    pattern.bytes().map(|b| b.to_ascii_lowercase()).collect()
}
