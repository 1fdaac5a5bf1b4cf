//! Fan-out over the loaded shard set.
//!
//! One search acquires a read lease on the shard map, snapshots the ranked
//! shard list, prunes shards whose repository provably cannot match, and
//! dispatches the rest to a bounded worker pool. Worker panics become
//! crash statistics instead of failures, the first crossing of the match
//! budget cancels the shared token, and the final pass sorts, dedupes, and
//! truncates.

use crate::sched::{Scheduler, SchedulerOpts};
use crate::throttle::Semaphore;
use crate::{RepoList, SearchError, Searchable};
use parking_lot::Mutex;
use search_cancel::CancellationToken;
use shard_index::{RepoListEntry, SearchOptions, SearchResult, ShardError};
use shrike_syntax::{Query, SuggestError, TypeKind, simplify};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SearcherOptions {
    /// Worker pool size and shard-map lease capacity. Defaults to the
    /// number of logical CPUs.
    pub pool_size: usize,
    /// Scheduler tuning string, e.g. `"batchdiv=2"` or `"disable"`.
    pub scheduler_tuning: String,
}

impl Default for SearcherOptions {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get().max(1),
            scheduler_tuning: String::new(),
        }
    }
}

struct Entry {
    key: String,
    repo: String,
    rank: u16,
    handle: Arc<dyn Searchable>,
}

/// Process-local searcher over many shards.
pub struct ShardedSearcher {
    lease: Semaphore,
    shards: Mutex<HashMap<String, Arc<Entry>>>,
    /// Shards ordered by descending rank; rebuilt after every load/drop so
    /// early termination is biased toward better repositories.
    ranked: Mutex<Option<Arc<Vec<Arc<Entry>>>>>,
    scheduler: Scheduler,
    pool_size: usize,
}

impl ShardedSearcher {
    pub fn new(options: SearcherOptions) -> Self {
        let pool_size = options.pool_size.max(1);
        let scheduler = Scheduler::new(SchedulerOpts::parse(
            &options.scheduler_tuning,
            pool_size,
        ));
        Self {
            lease: Semaphore::new(pool_size),
            shards: Mutex::new(HashMap::new()),
            ranked: Mutex::new(None),
            scheduler,
            pool_size,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Makes a shard visible under `key`, replacing any previous shard
    /// with that key. The new shard is fully constructed before the write
    /// lease is taken, so readers switch atomically.
    pub fn load(&self, key: impl Into<String>, handle: Arc<dyn Searchable>) {
        let key = key.into();
        let repo_entry = handle.repo_entry();
        let entry = Arc::new(Entry {
            key: key.clone(),
            repo: repo_entry.name,
            rank: repo_entry.rank,
            handle,
        });
        let _write = self.lease.write();
        self.shards.lock().insert(key.clone(), entry);
        *self.ranked.lock() = None;
        info!(key = %key, "shard loaded");
    }

    pub fn drop_shard(&self, key: &str) -> bool {
        let _write = self.lease.write();
        let removed = self.shards.lock().remove(key).is_some();
        if removed {
            *self.ranked.lock() = None;
            info!(key, "shard dropped");
        }
        removed
    }

    pub fn shard_keys(&self) -> Vec<String> {
        let _read = self.lease.read();
        let mut keys: Vec<String> = self.shards.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn ranked(&self) -> Arc<Vec<Arc<Entry>>> {
        let mut cache = self.ranked.lock();
        if let Some(list) = cache.as_ref() {
            return Arc::clone(list);
        }
        let mut entries: Vec<Arc<Entry>> = self.shards.lock().values().cloned().collect();
        entries.sort_by(|a, b| b.rank.cmp(&a.rank).then_with(|| a.key.cmp(&b.key)));
        let list = Arc::new(entries);
        *cache = Some(Arc::clone(&list));
        list
    }

    /// Searches all loaded shards, with a fresh deadline token derived from
    /// the options.
    pub fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        let token = match options.max_wall_time {
            Some(budget) => CancellationToken::after(budget),
            None => CancellationToken::new(),
        };
        self.search_with_token(query, options, &token)
    }

    pub fn search_with_token(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let query = self.expand_repo_types(simplify(query.clone()))?;

        let _read = self.lease.read();
        let eligible: Vec<Arc<Entry>> = self
            .ranked()
            .iter()
            .filter(|entry| repo_verdict(&query, &entry.repo) != Some(false))
            .cloned()
            .collect();

        let mut result = self.fan_out(&query, options, token, &eligible)?;

        result.files.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.doc.cmp(&b.doc))
        });
        let mut seen = HashSet::new();
        result
            .files
            .retain(|file| seen.insert((file.repo.clone(), file.path.clone())));
        if options.max_doc_display_count > 0 {
            result.files.truncate(options.max_doc_display_count);
        }
        result.stats.duration = started.elapsed();
        debug!(
            files = result.files.len(),
            matches = result.stats.match_count,
            crashes = result.stats.crashes,
            skipped = result.stats.shards_skipped,
            "search finished"
        );
        Ok(result)
    }

    fn fan_out(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
        eligible: &[Arc<Entry>],
    ) -> Result<SearchResult, SearchError> {
        let mut result = SearchResult::default();
        if eligible.is_empty() {
            return Ok(result);
        }
        let workers = self.pool_size.min(eligible.len());
        let (work_tx, work_rx) = crossbeam_channel::unbounded::<Arc<Entry>>();
        for entry in eligible {
            work_tx.send(Arc::clone(entry)).expect("receiver alive");
        }
        drop(work_tx);
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<Result<SearchResult, SearchError>>();

        let mut first_error = None;
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let token = token.clone();
                let scheduler = &self.scheduler;
                scope.spawn(move || {
                    while let Ok(entry) = work_rx.recv() {
                        let message =
                            run_one_shard(scheduler, &entry, query, options, &token);
                        if result_tx.send(message).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(result_tx);

            for message in result_rx.iter() {
                match message {
                    Ok(shard_result) => {
                        result.stats.add(&shard_result.stats);
                        result.files.extend(shard_result.files);
                        if options.total_max_match_count > 0
                            && result.stats.match_count >= options.total_max_match_count as u64
                            && token.cancel()
                        {
                            debug!("match budget reached, cancelling remaining shards");
                        }
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                            token.cancel();
                        }
                    }
                }
            }
        });

        match first_error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Lists repositories whose shards could serve the query.
    pub fn list(&self, query: &Query) -> Result<RepoList, SearchError> {
        let query = simplify(query.clone());
        let _read = self.lease.read();
        let mut repos: BTreeMap<String, RepoListEntry> = BTreeMap::new();
        for entry in self.ranked().iter() {
            if repo_verdict(&query, &entry.repo) == Some(false) {
                continue;
            }
            let listed = entry.handle.repo_entry();
            repos
                .entry(listed.name.clone())
                .and_modify(|existing| {
                    existing.doc_count += listed.doc_count;
                    existing.rank = existing.rank.max(listed.rank);
                })
                .or_insert(listed);
        }
        Ok(RepoList {
            repos: repos.into_values().collect(),
        })
    }

    // `type:repo` evaluates its child against the repository list and
    // replaces itself with the resulting set before fan-out.
    fn expand_repo_types(&self, query: Query) -> Result<Query, SearchError> {
        Ok(match query {
            Query::Type {
                kind: TypeKind::Repo,
                child,
            } => {
                let child = self.expand_repo_types(*child)?;
                let names = self
                    .list(&child)?
                    .repos
                    .into_iter()
                    .map(|repo| repo.name)
                    .collect();
                Query::RepoSet(names)
            }
            Query::And(children) => Query::And(
                children
                    .into_iter()
                    .map(|c| self.expand_repo_types(c))
                    .collect::<Result<_, _>>()?,
            ),
            Query::LineAnd(children) => Query::LineAnd(
                children
                    .into_iter()
                    .map(|c| self.expand_repo_types(c))
                    .collect::<Result<_, _>>()?,
            ),
            Query::Or(children) => Query::Or(
                children
                    .into_iter()
                    .map(|c| self.expand_repo_types(c))
                    .collect::<Result<_, _>>()?,
            ),
            Query::Not(child) => Query::Not(Box::new(self.expand_repo_types(*child)?)),
            Query::Symbol(child) => Query::Symbol(Box::new(self.expand_repo_types(*child)?)),
            other => other,
        })
    }
}

fn run_one_shard(
    scheduler: &Scheduler,
    entry: &Entry,
    query: &Query,
    options: &SearchOptions,
    token: &CancellationToken,
) -> Result<SearchResult, SearchError> {
    if token.is_cancelled() {
        let mut skipped = SearchResult::default();
        skipped.stats.shards_skipped = 1;
        return Ok(skipped);
    }

    let wait_start = Instant::now();
    let Some(slot) = scheduler.acquire(token.deadline()) else {
        if token.is_cancelled() {
            let mut skipped = SearchResult::default();
            skipped.stats.shards_skipped = 1;
            return Ok(skipped);
        }
        return Err(SearchError::Capacity);
    };
    let wait = wait_start.elapsed();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        entry.handle.search(query, options, token)
    }));
    drop(slot);

    match outcome {
        Ok(Ok(mut shard_result)) => {
            shard_result.stats.wait += wait;
            Ok(shard_result)
        }
        Ok(Err(ShardError::PatternTooShort(pattern))) => Err(SearchError::Suggest(SuggestError {
            message: format!("pattern {pattern:?} is too short for content search"),
            suggestion: "use at least 3 characters or scope the atom with file:".into(),
        })),
        Ok(Err(source)) => Err(SearchError::Shard {
            key: entry.key.clone(),
            source,
        }),
        Err(_) => {
            warn!(key = %entry.key, "shard worker panicked; isolating");
            let mut crashed = SearchResult::default();
            crashed.stats.crashes = 1;
            Ok(crashed)
        }
    }
}

/// Can the query be decided for a repository from its repo-level atoms
/// alone? `Some(false)` lets the fan-out skip the shard without loading
/// anything; `None` means the shard has to be searched.
fn repo_verdict(query: &Query, repo: &str) -> Option<bool> {
    match query {
        Query::Repo(pattern) => Some(repo.contains(pattern.as_str())),
        Query::RepoSet(names) => Some(names.contains(repo)),
        Query::RepoBranches(map) => Some(map.contains_key(repo)),
        Query::Const(value) => Some(*value),
        Query::Not(child) => repo_verdict(child, repo).map(|verdict| !verdict),
        Query::Type { child, .. } => repo_verdict(child, repo),
        Query::And(children) | Query::LineAnd(children) => {
            let verdicts: Vec<_> = children.iter().map(|c| repo_verdict(c, repo)).collect();
            if verdicts.iter().any(|v| *v == Some(false)) {
                Some(false)
            } else if verdicts.iter().all(|v| *v == Some(true)) {
                Some(true)
            } else {
                None
            }
        }
        Query::Or(children) => {
            let verdicts: Vec<_> = children.iter().map(|c| repo_verdict(c, repo)).collect();
            if verdicts.iter().any(|v| *v == Some(true)) {
                Some(true)
            } else if verdicts.iter().all(|v| *v == Some(false)) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrike_syntax::parse_query;

    #[test]
    fn repo_verdicts() {
        let query = parse_query("needle repo:linux").unwrap();
        assert_eq!(repo_verdict(&query, "torvalds/linux"), None);
        assert_eq!(repo_verdict(&query, "rust-lang/rust"), Some(false));

        let query = parse_query("needle -repo:linux").unwrap();
        assert_eq!(repo_verdict(&query, "torvalds/linux"), Some(false));

        let query = parse_query("repo:a or repo:b").unwrap();
        assert_eq!(repo_verdict(&query, "a"), Some(true));
        assert_eq!(repo_verdict(&query, "c"), Some(false));

        let query = parse_query("needle").unwrap();
        assert_eq!(repo_verdict(&query, "anything"), None);
    }
}
