use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shrike::{
    RepoMetadata, SearchOptions, SearcherOptions, Shard, ShardWatcher, ShardWriter,
    ShardedSearcher, WriterOptions, parse_query,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "shrike", about = "Trigram code search over immutable shards")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a directory tree into a single shard file.
    Index {
        /// Directory to index.
        path: PathBuf,
        /// Repository name; defaults to the directory name.
        #[arg(long)]
        repo: Option<String>,
        /// Output directory for the shard file.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Repository rank; higher ranks are searched first.
        #[arg(long, default_value_t = 0)]
        rank: u16,
        /// Skip files larger than this many bytes (0 disables the cap).
        #[arg(long, default_value_t = 2 * 1024 * 1024)]
        size_max: usize,
        /// Glob patterns exempt from the size cap. Repeatable.
        #[arg(long = "large-file")]
        large_files: Vec<String>,
        /// Branch names to record for every document. Repeatable.
        #[arg(long = "branch")]
        branches: Vec<String>,
    },
    /// Run one query against the shards in a directory.
    Search {
        query: String,
        /// Directory holding *.shrike files.
        #[arg(long, default_value = ".")]
        index: PathBuf,
        #[arg(long, default_value_t = 50)]
        max_results: usize,
        /// Wall-clock budget in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Emit the raw result structure as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Watch a shard directory and answer queries from stdin.
    Watch {
        #[arg(long, default_value = ".")]
        index: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match Cli::parse().command {
        Command::Index {
            path,
            repo,
            out,
            rank,
            size_max,
            large_files,
            branches,
        } => index(&path, repo, &out, rank, size_max, large_files, branches),
        Command::Search {
            query,
            index,
            max_results,
            timeout_ms,
            json,
        } => search(&query, &index, max_results, timeout_ms, json),
        Command::Watch { index } => watch(&index),
    }
}

fn index(
    path: &Path,
    repo: Option<String>,
    out: &Path,
    rank: u16,
    size_max: usize,
    large_files: Vec<String>,
    branches: Vec<String>,
) -> Result<()> {
    let repo = match repo {
        Some(name) => name,
        None => path
            .canonicalize()
            .context("resolving the index path")?
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string()),
    };

    let mut metadata = RepoMetadata::new(repo.clone());
    metadata.rank = rank;
    for branch in &branches {
        metadata
            .branches
            .push(shrike::RepoBranch::new(branch.clone(), ""));
    }
    let branch_refs: Vec<&str> = branches.iter().map(String::as_str).collect();
    let options = WriterOptions {
        size_max,
        large_files,
    };
    let mut writer = ShardWriter::new(metadata, options)?;

    for entry in WalkDir::new(path) {
        let entry = entry.context("walking the index path")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(path)
            .expect("walkdir stays under its root");
        let name = relative.to_string_lossy();
        if name.starts_with(".git/") || name.contains("/.git/") {
            continue;
        }
        let content = std::fs::read(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        let language = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        writer.add_document(&name, &content, &branch_refs, language.as_deref())?;
    }

    if writer.doc_count() == 0 {
        bail!("nothing to index under {}", path.display());
    }
    let shard_path = out.join(format!(
        "{}_v{}.{}",
        repo.replace('/', "_"),
        shard_index::FORMAT_VERSION,
        shrike::SHARD_EXTENSION
    ));
    let docs = writer.doc_count();
    let skipped = writer.skipped_count();
    writer.finish(&shard_path)?;
    println!(
        "indexed {docs} documents ({skipped} skipped) into {}",
        shard_path.display()
    );
    Ok(())
}

fn load_searcher(index: &Path) -> Result<Arc<ShardedSearcher>> {
    let searcher = Arc::new(ShardedSearcher::new(SearcherOptions::default()));
    let mut loaded = 0usize;
    for entry in std::fs::read_dir(index).context("reading the index directory")? {
        let path = entry?.path();
        if !path
            .extension()
            .is_some_and(|ext| ext == shrike::SHARD_EXTENSION)
        {
            continue;
        }
        let key = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let shard = Shard::open(&path).with_context(|| format!("opening {}", path.display()))?;
        searcher.load(key, Arc::new(shard));
        loaded += 1;
    }
    if loaded == 0 {
        bail!("no shard files in {}", index.display());
    }
    Ok(searcher)
}

fn search(
    query: &str,
    index: &Path,
    max_results: usize,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let searcher = load_searcher(index)?;
    let query = parse_query(query)?;
    let options = SearchOptions {
        max_wall_time: timeout_ms.map(Duration::from_millis),
        total_max_match_count: 0,
        max_doc_display_count: max_results,
    };
    let result = searcher.search(&query, &options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &shrike::SearchResult) {
    for file in &result.files {
        if file.line_matches.is_empty() {
            println!("{}:{}", file.repo, file.path);
            continue;
        }
        for line in &file.line_matches {
            println!(
                "{}:{}:{}: {}",
                file.repo,
                file.path,
                line.line_number,
                String::from_utf8_lossy(&line.line).trim_end()
            );
        }
    }
    let stats = &result.stats;
    eprintln!(
        "{} files, {} matches, {} candidates, {} crashes, {} skipped, {:?}",
        result.files.len(),
        stats.match_count,
        stats.ngram_matches,
        stats.crashes,
        stats.shards_skipped,
        stats.duration
    );
}

fn watch(index: &Path) -> Result<()> {
    let searcher = Arc::new(ShardedSearcher::new(SearcherOptions::default()));
    let _watcher = ShardWatcher::new(index, Arc::clone(&searcher))?;
    println!(
        "watching {} ({} shards); type a query, or /bye to quit",
        index.display(),
        searcher.shard_keys().len()
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/bye" {
            break;
        }
        match parse_query(line) {
            Ok(query) => match searcher.search(&query, &SearchOptions::default()) {
                Ok(result) => print_result(&result),
                Err(err) => eprintln!("search failed: {err}"),
            },
            Err(err) => eprintln!("bad query: {err}"),
        }
    }
    Ok(())
}
