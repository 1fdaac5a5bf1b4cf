//! Shard directory watcher.
//!
//! Watches one directory for `*.shrike` files and keeps a
//! [`ShardedSearcher`] in sync: new files load, removed files drop, and a
//! rewritten shard becomes visible only after the replacement opened
//! successfully. Change bursts are debounced. A logical shard may exist in
//! several versioned variants (`name_vN.shrike`); the newest variant whose
//! format version the reader supports wins.

use crate::{SHARD_EXTENSION, SearchError, ShardedSearcher};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use parking_lot::Mutex;
use shard_index::{FORMAT_VERSION, Shard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(250);

type Debouncer =
    notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::RecommendedCache>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadedShard {
    path: PathBuf,
    modified: Option<SystemTime>,
}

#[derive(Default)]
struct LoadedState {
    loaded: HashMap<String, LoadedShard>,
}

pub struct ShardWatcher {
    debouncer: Option<Debouncer>,
}

impl ShardWatcher {
    /// Performs an initial scan, then watches `dir` for changes.
    pub fn new(dir: &Path, searcher: Arc<ShardedSearcher>) -> Result<Self, SearchError> {
        let state = Arc::new(Mutex::new(LoadedState::default()));
        rescan(dir, &searcher, &state)?;

        let dir_owned = dir.to_path_buf();
        let handler = {
            let searcher = Arc::clone(&searcher);
            let state = Arc::clone(&state);
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let relevant = events.iter().any(|event| {
                        event.paths.iter().any(|path| {
                            path.extension()
                                .is_some_and(|ext| ext == SHARD_EXTENSION)
                        })
                    });
                    if relevant {
                        if let Err(err) = rescan(&dir_owned, &searcher, &state) {
                            warn!(?err, "shard rescan failed");
                        }
                    }
                }
                Err(errors) => error!(?errors, "shard watcher error"),
            }
        };
        let mut debouncer = new_debouncer(DEBOUNCE_TIMEOUT, None, handler)?;
        debouncer.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching shard directory");
        Ok(Self {
            debouncer: Some(debouncer),
        })
    }

    pub fn stop(&mut self) {
        if self.debouncer.take().is_some() {
            info!("shard watcher stopped");
        }
    }
}

impl Drop for ShardWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `name_vN` -> (`name`, N); an unsuffixed stem is version 1.
fn parse_versioned(stem: &str) -> (&str, u32) {
    if let Some(pos) = stem.rfind("_v") {
        if let Ok(version) = stem[pos + 2..].parse::<u32>() {
            return (&stem[..pos], version);
        }
    }
    (stem, 1)
}

fn scan_dir(dir: &Path) -> Result<HashMap<String, LoadedShard>, SearchError> {
    // Per logical shard, the best (base, version) candidate seen so far.
    let mut best: HashMap<String, (u32, LoadedShard)> = HashMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == SHARD_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let (base, version) = parse_versioned(stem);
        let base = base.to_string();
        if version > FORMAT_VERSION {
            warn!(path = %path.display(), version, "ignoring shard with unsupported format");
            continue;
        }
        let modified = entry.metadata().and_then(|meta| meta.modified()).ok();
        let candidate = LoadedShard { path, modified };
        let replace = match best.get(base.as_str()) {
            Some((seen, _)) => *seen < version,
            None => true,
        };
        if replace {
            best.insert(base, (version, candidate));
        }
    }
    Ok(best
        .into_iter()
        .map(|(base, (_, shard))| (base, shard))
        .collect())
}

fn rescan(
    dir: &Path,
    searcher: &ShardedSearcher,
    state: &Mutex<LoadedState>,
) -> Result<(), SearchError> {
    let desired = scan_dir(dir)?;
    let mut state = state.lock();

    for (base, candidate) in &desired {
        if state.loaded.get(base) == Some(candidate) {
            continue;
        }
        // Open before load so the old shard stays visible until its
        // replacement is ready.
        match Shard::open(&candidate.path) {
            Ok(shard) => {
                searcher.load(base.clone(), Arc::new(shard));
                state.loaded.insert(base.clone(), candidate.clone());
            }
            Err(err) => {
                warn!(path = %candidate.path.display(), %err, "could not open shard");
            }
        }
    }

    let stale: Vec<String> = state
        .loaded
        .keys()
        .filter(|base| !desired.contains_key(*base))
        .cloned()
        .collect();
    for base in stale {
        searcher.drop_shard(&base);
        state.loaded.remove(&base);
    }
    Ok(())
}
