use shrike::{
    RepoMetadata, SearchOptions, SearcherOptions, ShardWatcher, ShardWriter, ShardedSearcher,
    WriterOptions, parse_query,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn write_shard(dir: &Path, file_name: &str, repo: &str, docs: &[(&str, &str)]) {
    let mut writer =
        ShardWriter::new(RepoMetadata::new(repo), WriterOptions::default()).unwrap();
    for (name, content) in docs {
        writer.add_document(name, content.as_bytes(), &[], None).unwrap();
    }
    writer.finish(&dir.join(file_name)).unwrap();
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let give_up = Instant::now() + deadline;
    while Instant::now() < give_up {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

fn doc_paths(searcher: &ShardedSearcher, query: &str) -> Vec<String> {
    let query = parse_query(query).unwrap();
    searcher
        .search(&query, &SearchOptions::default())
        .unwrap()
        .files
        .into_iter()
        .map(|file| file.path)
        .collect()
}

#[test]
fn watcher_tracks_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(dir.path(), "alpha_v1.shrike", "alpha", &[("a.rs", "alpha needle")]);

    let searcher = Arc::new(ShardedSearcher::new(SearcherOptions::default()));
    let _watcher = ShardWatcher::new(dir.path(), Arc::clone(&searcher)).unwrap();

    // Initial scan happens synchronously.
    assert_eq!(searcher.shard_keys(), vec!["alpha".to_string()]);
    assert_eq!(doc_paths(&searcher, "needle"), vec!["a.rs".to_string()]);

    // A new shard file is picked up after the debounce interval.
    write_shard(dir.path(), "beta_v1.shrike", "beta", &[("b.rs", "beta needle")]);
    assert!(
        wait_until(Duration::from_secs(5), || searcher.shard_keys().len() == 2),
        "new shard never loaded"
    );

    // Removing a shard drops it.
    std::fs::remove_file(dir.path().join("beta_v1.shrike")).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || searcher.shard_keys().len() == 1),
        "removed shard never dropped"
    );
    assert_eq!(searcher.shard_keys(), vec!["alpha".to_string()]);
}

#[test]
fn rewrite_becomes_visible_atomically() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(dir.path(), "alpha_v1.shrike", "alpha", &[("old.rs", "needle old")]);

    let searcher = Arc::new(ShardedSearcher::new(SearcherOptions::default()));
    let _watcher = ShardWatcher::new(dir.path(), Arc::clone(&searcher)).unwrap();
    assert_eq!(doc_paths(&searcher, "needle"), vec!["old.rs".to_string()]);

    // Rewrite the shard in place (writer renames over the old file).
    write_shard(dir.path(), "alpha_v1.shrike", "alpha", &[("new.rs", "needle new")]);
    assert!(
        wait_until(Duration::from_secs(5), || {
            doc_paths(&searcher, "needle") == vec!["new.rs".to_string()]
        }),
        "rewritten shard never became visible"
    );
    // Throughout the swap there is always exactly one alpha shard.
    assert_eq!(searcher.shard_keys(), vec!["alpha".to_string()]);
}

#[test]
fn unsupported_versions_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_shard(dir.path(), "alpha_v1.shrike", "alpha", &[("a.rs", "needle")]);
    // A variant claiming a newer format than this reader supports; the
    // content does not matter because the name alone excludes it.
    std::fs::write(dir.path().join("alpha_v9.shrike"), b"not a real shard").unwrap();

    let searcher = Arc::new(ShardedSearcher::new(SearcherOptions::default()));
    let _watcher = ShardWatcher::new(dir.path(), Arc::clone(&searcher)).unwrap();
    assert_eq!(searcher.shard_keys(), vec!["alpha".to_string()]);
    assert_eq!(doc_paths(&searcher, "needle"), vec!["a.rs".to_string()]);
}
