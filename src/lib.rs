//! Shrike: trigram code search over immutable shards.
//!
//! The workspace splits along the seams of the data flow: `shrike-syntax`
//! parses and normalizes queries, `shard-index` owns the on-disk shard and
//! answers a query for one shard, and this crate multiplexes searches over
//! many shards with a bounded worker pool, a cancellation token, crash
//! isolation, and a directory watcher that keeps the shard set in sync
//! with the filesystem.

mod sched;
mod sharded;
mod throttle;
mod watcher;

pub use sched::{Exclusive, Scheduler, SchedulerOpts, Slot};
pub use sharded::{SearcherOptions, ShardedSearcher};
pub use watcher::ShardWatcher;

pub use search_cancel::CancellationToken;
pub use shard_index::{
    FileMatch, LineFragment, LineMatch, RepoBranch, RepoListEntry, RepoMetadata, SearchOptions,
    SearchResult, Shard, ShardError, ShardWriter, Stats, WriterOptions,
};
pub use shrike_syntax::{ParseError, Query, QueryError, SuggestError, parse_query, simplify};

use serde::{Deserialize, Serialize};

/// Extension of the files the watcher treats as shards.
pub const SHARD_EXTENSION: &str = "shrike";

/// Anything the sharded searcher can fan out to. [`Shard`] is the real
/// implementation; tests substitute their own to exercise crash isolation.
pub trait Searchable: Send + Sync {
    fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> shard_index::Result<SearchResult>;

    fn repo_entry(&self) -> RepoListEntry;
}

impl Searchable for Shard {
    fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> shard_index::Result<SearchResult> {
        Shard::search(self, query, options, token)
    }

    fn repo_entry(&self) -> RepoListEntry {
        self.repo_list_entry()
    }
}

/// Aggregated repository listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoList {
    pub repos: Vec<RepoListEntry>,
}

/// Failure taxonomy of the sharded searcher.
///
/// Parse and suggestion errors never reach shard code; shard I/O and
/// corruption fail the query; per-shard panics are captured as crash
/// statistics and do not surface here at all.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SearchError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Suggest(#[from] SuggestError),
    #[error("shard {key}: {source}")]
    Shard { key: String, source: ShardError },
    #[error("no processing slot became available within the deadline")]
    Capacity,
    #[error("watcher failed: {0}")]
    Watch(#[from] notify::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<QueryError> for SearchError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Parse(parse) => SearchError::Parse(parse),
            QueryError::Suggest(suggest) => SearchError::Suggest(suggest),
        }
    }
}
