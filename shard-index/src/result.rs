use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller-provided limits for one search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Overall wall-clock budget; enforced through the cancellation token.
    pub max_wall_time: Option<Duration>,
    /// Stop collecting once this many fragments matched across all shards.
    /// Zero means unlimited.
    pub total_max_match_count: usize,
    /// Truncate the final document list to this length. Zero means
    /// unlimited.
    pub max_doc_display_count: usize,
}

/// Counters accumulated while searching. Under fan-out the per-shard stats
/// sum; `duration` and `wait` then hold cumulative worker time and the
/// aggregator overwrites `duration` with the observed wall clock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Documents that produced at least one candidate.
    pub files_considered: u64,
    /// Documents whose bytes were actually inspected.
    pub files_loaded: u64,
    /// Bytes compared or scanned during verification.
    pub content_bytes_loaded: u64,
    /// Candidates produced by posting-list intersection.
    pub ngram_matches: u64,
    /// Fragments that survived verification and were collected.
    pub match_count: u64,
    /// Shards that returned early due to cancellation.
    pub shards_skipped: u64,
    /// Shard workers that panicked and were isolated.
    pub crashes: u64,
    pub duration: Duration,
    /// Time spent waiting for a processing slot.
    pub wait: Duration,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.files_considered += other.files_considered;
        self.files_loaded += other.files_loaded;
        self.content_bytes_loaded += other.content_bytes_loaded;
        self.ngram_matches += other.ngram_matches;
        self.match_count += other.match_count;
        self.shards_skipped += other.shards_skipped;
        self.crashes += other.crashes;
        self.duration += other.duration;
        self.wait += other.wait;
    }
}

/// One matched span, located both within its line and within the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFragment {
    /// Byte offset within the enclosing line (or file name).
    pub line_offset: u32,
    /// Byte offset within the document.
    pub offset: u32,
    /// Rune index of `offset` within the document.
    pub rune_offset: u32,
    pub len: u32,
}

/// All fragments on one line, with the line text copied out of the shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    pub line: Vec<u8>,
    /// 1-based.
    pub line_number: u32,
    /// Document-relative byte offset of the line start.
    pub line_start: u32,
    pub fragments: Vec<LineFragment>,
}

/// One matching document. All byte content is owned; nothing borrows the
/// shard that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub doc: u32,
    pub repo: String,
    pub branches: Vec<String>,
    pub language: String,
    pub score: f64,
    pub line_matches: Vec<LineMatch>,
    /// Fragments matched inside the file name.
    pub path_fragments: Vec<LineFragment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub files: Vec<FileMatch>,
    pub stats: Stats,
}

/// Repository summary returned by list queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoListEntry {
    pub name: String,
    pub branches: Vec<crate::format::RepoBranch>,
    pub doc_count: u32,
    pub rank: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_sum_commutes() {
        let mut a = Stats {
            files_considered: 3,
            match_count: 5,
            crashes: 1,
            duration: Duration::from_millis(10),
            ..Stats::default()
        };
        let b = Stats {
            files_considered: 2,
            ngram_matches: 7,
            wait: Duration::from_millis(4),
            ..Stats::default()
        };
        a.add(&b);
        assert_eq!(a.files_considered, 5);
        assert_eq!(a.match_count, 5);
        assert_eq!(a.ngram_matches, 7);
        assert_eq!(a.crashes, 1);
        assert_eq!(a.duration, Duration::from_millis(10));
        assert_eq!(a.wait, Duration::from_millis(4));
    }
}
