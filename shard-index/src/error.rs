use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ShardError>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ShardError {
    #[error("shard I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt shard: {0}")]
    Corrupt(String),
    #[error("unsupported shard format version {0}")]
    UnsupportedVersion(u32),
    #[error("shard holds {0} branches, limit is 64")]
    TooManyBranches(usize),
    #[error("document {0:?} references unknown branch {1:?}")]
    UnknownBranch(String, String),
    #[error("invalid regex {pattern:?}: {message}")]
    Regex { pattern: String, message: String },
    #[error("pattern {0:?} is too short for content search")]
    PatternTooShort(String),
    #[error("search was cancelled before the shard completed")]
    Cancelled,
    #[error("shard path {0:?} has no usable file name")]
    BadPath(PathBuf),
}

impl ShardError {
    /// Helper for length and offset checks while decoding sections.
    pub(crate) fn corrupt(what: impl Into<String>) -> Self {
        ShardError::Corrupt(what.into())
    }
}
