use shrike::{
    CancellationToken, Query, RepoListEntry, RepoMetadata, SearchError, SearchOptions,
    SearchResult, Searchable, SearcherOptions, Shard, ShardWriter, ShardedSearcher,
    WriterOptions, parse_query,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn shard(repo: &str, rank: u16, docs: &[(&str, &str)]) -> Shard {
    let mut metadata = RepoMetadata::new(repo);
    metadata.rank = rank;
    let mut writer = ShardWriter::new(metadata, WriterOptions::default()).unwrap();
    for (name, content) in docs {
        writer.add_document(name, content.as_bytes(), &[], None).unwrap();
    }
    Shard::from_bytes(writer.finish_bytes().unwrap()).unwrap()
}

fn searcher_with(shards: Vec<(&str, Shard)>) -> ShardedSearcher {
    let searcher = ShardedSearcher::new(SearcherOptions::default());
    for (key, shard) in shards {
        searcher.load(key, Arc::new(shard));
    }
    searcher
}

fn paths(result: &SearchResult) -> BTreeSet<(String, String)> {
    result
        .files
        .iter()
        .map(|file| (file.repo.clone(), file.path.clone()))
        .collect()
}

#[test]
fn aggregate_contains_every_single_shard_result() {
    let alpha = shard("alpha", 0, &[("a1", "the needle is here"), ("a2", "nothing")]);
    let beta = shard("beta", 0, &[("b1", "another needle")]);
    let query = parse_query("needle").unwrap();
    let options = SearchOptions::default();

    let alpha_alone = alpha
        .search(&query, &options, &CancellationToken::new())
        .unwrap();
    let beta_alone = beta
        .search(&query, &options, &CancellationToken::new())
        .unwrap();

    let searcher = searcher_with(vec![("alpha", alpha), ("beta", beta)]);
    let aggregated = searcher.search(&query, &options).unwrap();
    let all = paths(&aggregated);
    for single in [&alpha_alone, &beta_alone] {
        for entry in paths(single) {
            assert!(all.contains(&entry), "missing {entry:?}");
        }
    }
    assert_eq!(all.len(), 2);
}

struct Panicking;

impl Searchable for Panicking {
    fn search(
        &self,
        _query: &Query,
        _options: &SearchOptions,
        _token: &CancellationToken,
    ) -> shard_index::Result<SearchResult> {
        panic!("injected shard failure");
    }

    fn repo_entry(&self) -> RepoListEntry {
        RepoListEntry {
            name: "crashy".to_string(),
            branches: Vec::new(),
            doc_count: 0,
            rank: 0,
        }
    }
}

#[test]
fn worker_panic_is_isolated() {
    let healthy = shard("alpha", 0, &[("a1", "needle in a haystack")]);
    let searcher = searcher_with(vec![("alpha", healthy)]);
    searcher.load("crashy", Arc::new(Panicking));

    let query = parse_query("needle").unwrap();
    let result = searcher.search(&query, &SearchOptions::default()).unwrap();
    assert_eq!(result.stats.crashes, 1);
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].repo, "alpha");
}

#[test]
fn cancelled_before_start_skips_every_shard() {
    let searcher = searcher_with(vec![
        ("alpha", shard("alpha", 0, &[("a", "needle")])),
        ("beta", shard("beta", 0, &[("b", "needle")])),
        ("gamma", shard("gamma", 0, &[("c", "needle")])),
    ]);
    let token = CancellationToken::new();
    token.cancel();
    let query = parse_query("needle").unwrap();
    let result = searcher
        .search_with_token(&query, &SearchOptions::default(), &token)
        .unwrap();
    assert!(result.files.is_empty());
    assert_eq!(result.stats.shards_skipped, 3);
}

struct Slow {
    name: String,
    inner: Shard,
}

impl Searchable for Slow {
    fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> shard_index::Result<SearchResult> {
        std::thread::sleep(Duration::from_millis(80));
        if token.is_cancelled() {
            let mut skipped = SearchResult::default();
            skipped.stats.shards_skipped = 1;
            return Ok(skipped);
        }
        self.inner.search(query, options, token)
    }

    fn repo_entry(&self) -> RepoListEntry {
        let mut entry = self.inner.repo_list_entry();
        entry.name = self.name.clone();
        entry
    }
}

#[test]
fn match_budget_cancels_remaining_shards() {
    let searcher = ShardedSearcher::new(SearcherOptions {
        pool_size: 1,
        scheduler_tuning: String::new(),
    });
    for index in 0..5 {
        let name = format!("repo{index}");
        let inner = shard(&name, 0, &[("doc", "one needle")]);
        searcher.load(name.clone(), Arc::new(Slow { name, inner }));
    }
    let query = parse_query("needle").unwrap();
    let options = SearchOptions {
        total_max_match_count: 1,
        ..SearchOptions::default()
    };
    let result = searcher.search(&query, &options).unwrap();
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.stats.shards_skipped, 4);
}

#[test]
fn repo_atoms_prefilter_shards() {
    let searcher = searcher_with(vec![
        ("alpha", shard("alpha", 0, &[("a", "needle")])),
        ("beta", shard("beta", 0, &[("b", "needle")])),
    ]);
    let query = parse_query("needle repo:alpha").unwrap();
    let result = searcher.search(&query, &SearchOptions::default()).unwrap();
    assert_eq!(
        paths(&result),
        BTreeSet::from([("alpha".to_string(), "a".to_string())])
    );
}

#[test]
fn type_repo_expands_to_repo_set() {
    let searcher = searcher_with(vec![
        ("alpha", shard("alpha", 0, &[("a", "needle")])),
        ("beta", shard("beta", 0, &[("b", "needle")])),
    ]);
    let query = parse_query("type:repo repo:alpha needle").unwrap();
    let result = searcher.search(&query, &SearchOptions::default()).unwrap();
    assert_eq!(
        paths(&result),
        BTreeSet::from([("alpha".to_string(), "a".to_string())])
    );
}

#[test]
fn duplicate_documents_dedupe() {
    // The same repository loaded under two shard keys: one copy survives.
    let searcher = searcher_with(vec![
        ("one", shard("alpha", 0, &[("same.rs", "needle")])),
        ("two", shard("alpha", 0, &[("same.rs", "needle")])),
    ]);
    let query = parse_query("needle").unwrap();
    let result = searcher.search(&query, &SearchOptions::default()).unwrap();
    assert_eq!(result.files.len(), 1);
}

#[test]
fn list_merges_shards_of_one_repo() {
    let searcher = searcher_with(vec![
        ("one", shard("alpha", 3, &[("a", "x"), ("b", "y")])),
        ("two", shard("alpha", 5, &[("c", "z")])),
        ("other", shard("beta", 0, &[("d", "w")])),
    ]);
    let list = searcher.list(&parse_query("").unwrap()).unwrap();
    assert_eq!(list.repos.len(), 2);
    let alpha = list.repos.iter().find(|r| r.name == "alpha").unwrap();
    assert_eq!(alpha.doc_count, 3);
    assert_eq!(alpha.rank, 5);

    let filtered = searcher.list(&parse_query("repo:beta").unwrap()).unwrap();
    assert_eq!(filtered.repos.len(), 1);
    assert_eq!(filtered.repos[0].name, "beta");
}

#[test]
fn short_content_atom_surfaces_a_suggestion() {
    let searcher = searcher_with(vec![("alpha", shard("alpha", 0, &[("a", "needle")]))]);
    let query = parse_query("content:ab").unwrap();
    let err = searcher.search(&query, &SearchOptions::default()).unwrap_err();
    assert!(matches!(err, SearchError::Suggest(_)));
}

#[test]
fn wall_clock_deadline_returns_partial() {
    let searcher = ShardedSearcher::new(SearcherOptions {
        pool_size: 1,
        scheduler_tuning: String::new(),
    });
    for index in 0..3 {
        let name = format!("repo{index}");
        let inner = shard(&name, 0, &[("doc", "one needle")]);
        searcher.load(name.clone(), Arc::new(Slow { name, inner }));
    }
    let query = parse_query("needle").unwrap();
    let options = SearchOptions {
        max_wall_time: Some(Duration::from_millis(40)),
        ..SearchOptions::default()
    };
    let result = searcher.search(&query, &options).unwrap();
    assert!(result.stats.shards_skipped >= 1, "deadline had no effect");
}
