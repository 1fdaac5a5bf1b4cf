//! Immutable trigram-indexed shards.
//!
//! A shard packs the documents of one repository into a single file: the
//! lowercased content blob with a case bitmap, trigram posting lists for
//! content and file names, per-document newline and rune-offset tables,
//! branch masks, and JSON repository metadata. [`ShardWriter`] produces the
//! file atomically, [`Shard`] maps it read-only and answers queries through
//! candidate generation over the posting lists followed by byte-level
//! verification.
//!
//! Case folding is ASCII-only ('A'–'Z'): case-insensitive matching does not
//! fold non-ASCII letters, mirroring the index layout, which records case
//! bits per byte.

mod candidate;
mod error;
mod eval;
mod format;
mod ngram;
mod postings;
mod reader;
mod result;
mod score;
mod writer;

pub use error::{Result, ShardError};
pub use format::{FORMAT_VERSION, RepoBranch, RepoMetadata};
pub use reader::Shard;
pub use result::{
    FileMatch, LineFragment, LineMatch, RepoListEntry, SearchOptions, SearchResult, Stats,
};
pub use writer::{ShardWriter, WriterOptions};
