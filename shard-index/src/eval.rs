//! Per-shard query evaluation.
//!
//! Evaluation walks the query tree and produces, per document, the set of
//! verified hits plus the lines they land on. Boolean nodes combine those
//! sets; a line-local conjunction additionally requires a common line.
//! Candidates come from the posting lists, verification touches the actual
//! bytes, and everything that leaves the shard is copied.

use crate::candidate::{CandidateSet, Space, lowered};
use crate::error::{Result, ShardError};
use crate::ngram::NGRAM_SIZE;
use crate::reader::Shard;
use crate::result::{
    FileMatch, LineFragment, LineMatch, RepoListEntry, SearchOptions, SearchResult, Stats,
};
use crate::score::{FragmentSignal, compare, fragment_weight, rank_weight, word_aligned};
use search_cancel::{CANCEL_CHECK_INTERVAL, CancellationToken};
use shrike_syntax::{Query, Regexp, Substring, lower_hir, regexp_to_query, simplify};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

/// Sentinel line for hits inside file names, which have no content lines.
const NAME_LINE: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Hit {
    /// Byte offset within the document (content hits) or within the file
    /// name (name hits).
    start: u32,
    len: u32,
    line: u32,
    file_name: bool,
    symbol: bool,
}

#[derive(Debug, Clone, Default)]
struct DocHits {
    hits: Vec<Hit>,
    /// Lines on which this subquery is satisfied; `None` means any line.
    lines: Option<BTreeSet<u32>>,
}

#[derive(Debug, Default)]
struct EvalSet {
    docs: BTreeMap<u32, DocHits>,
}

fn and_lines(a: Option<BTreeSet<u32>>, b: Option<BTreeSet<u32>>) -> Option<BTreeSet<u32>> {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
    }
}

fn or_lines(a: Option<BTreeSet<u32>>, b: Option<BTreeSet<u32>>) -> Option<BTreeSet<u32>> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
        _ => None,
    }
}

fn intersect(a: EvalSet, b: &EvalSet) -> EvalSet {
    let mut docs = BTreeMap::new();
    for (doc, mut hits) in a.docs {
        if let Some(other) = b.docs.get(&doc) {
            hits.hits.extend(other.hits.iter().cloned());
            hits.lines = and_lines(hits.lines, other.lines.clone());
            docs.insert(doc, hits);
        }
    }
    EvalSet { docs }
}

fn union(mut a: EvalSet, b: EvalSet) -> EvalSet {
    for (doc, other) in b.docs {
        match a.docs.entry(doc) {
            Entry::Occupied(mut entry) => {
                let hits = entry.get_mut();
                hits.hits.extend(other.hits);
                hits.lines = or_lines(hits.lines.take(), other.lines);
            }
            Entry::Vacant(entry) => {
                entry.insert(other);
            }
        }
    }
    a
}

struct Evaluator<'s> {
    shard: &'s Shard,
    stats: Stats,
    token: CancellationToken,
    newline_cache: HashMap<u32, Vec<u32>>,
}

impl<'s> Evaluator<'s> {
    fn new(shard: &'s Shard, token: CancellationToken) -> Self {
        Self {
            shard,
            stats: Stats::default(),
            token,
            newline_cache: HashMap::new(),
        }
    }

    fn ensure_newlines(&mut self, doc: u32) -> Result<()> {
        if !self.newline_cache.contains_key(&doc) {
            let newlines = self.shard.newlines(doc)?;
            self.newline_cache.insert(doc, newlines);
        }
        Ok(())
    }

    /// 0-based line index of a document-relative byte offset.
    fn line_of(&mut self, doc: u32, offset: u32) -> Result<u32> {
        self.ensure_newlines(doc)?;
        let newlines = &self.newline_cache[&doc];
        Ok(newlines.partition_point(|&pos| pos < offset) as u32)
    }

    /// Document-relative `[start, end)` of a 0-based line.
    fn line_bounds(&mut self, doc: u32, line: u32) -> Result<(u32, u32)> {
        self.ensure_newlines(doc)?;
        let doc_len = self.shard.content(doc).len() as u32;
        let newlines = &self.newline_cache[&doc];
        let start = if line == 0 {
            0
        } else {
            newlines[line as usize - 1] + 1
        };
        let end = newlines
            .get(line as usize)
            .copied()
            .unwrap_or(doc_len);
        Ok((start, end))
    }

    fn universe(&self) -> EvalSet {
        let docs = (0..self.shard.doc_count())
            .map(|doc| (doc, DocHits::default()))
            .collect();
        EvalSet { docs }
    }

    fn doc_filter(&self, predicate: impl Fn(&Shard, u32) -> bool) -> EvalSet {
        let docs = (0..self.shard.doc_count())
            .filter(|&doc| predicate(self.shard, doc))
            .map(|doc| (doc, DocHits::default()))
            .collect();
        EvalSet { docs }
    }

    fn eval(&mut self, query: &Query, symbol: bool) -> Result<EvalSet> {
        if self.token.is_cancelled() {
            return Err(ShardError::Cancelled);
        }
        match query {
            Query::Const(true) => Ok(self.universe()),
            Query::Const(false) => Ok(EvalSet::default()),
            Query::Substring(s) => self.eval_substring(s, symbol),
            Query::Regexp(r) => self.eval_regexp(r, symbol),
            Query::Symbol(child) => self.eval(child, true),
            Query::Language(name) => {
                Ok(self.doc_filter(|shard, doc| shard.language(doc) == name.as_str()))
            }
            Query::Branch(pattern) => {
                let mask = self.branch_pattern_mask(pattern);
                Ok(self.doc_filter(move |shard, doc| shard.branch_mask(doc) & mask != 0))
            }
            Query::Repo(pattern) => {
                if self.shard.repo_name().contains(pattern.as_str()) {
                    Ok(self.universe())
                } else {
                    Ok(EvalSet::default())
                }
            }
            Query::RepoSet(names) => {
                if names.contains(self.shard.repo_name()) {
                    Ok(self.universe())
                } else {
                    Ok(EvalSet::default())
                }
            }
            Query::RepoBranches(map) => match map.get(self.shard.repo_name()) {
                None => Ok(EvalSet::default()),
                Some(branches) => {
                    let mask = self.branch_list_mask(branches);
                    Ok(self.doc_filter(move |shard, doc| shard.branch_mask(doc) & mask != 0))
                }
            },
            // Repo-level wrapping is resolved by the fan-out layer; inside a
            // shard the child decides.
            Query::Type { child, .. } => self.eval(child, symbol),
            Query::And(children) => {
                let mut acc: Option<EvalSet> = None;
                for child in children {
                    let set = self.eval(child, symbol)?;
                    acc = Some(match acc {
                        None => set,
                        Some(current) => intersect(current, &set),
                    });
                }
                Ok(acc.unwrap_or_else(|| self.universe()))
            }
            Query::LineAnd(children) => {
                let mut acc: Option<EvalSet> = None;
                for child in children {
                    let set = self.eval(child, symbol)?;
                    acc = Some(match acc {
                        None => set,
                        Some(current) => intersect(current, &set),
                    });
                }
                let mut set = acc.unwrap_or_else(|| self.universe());
                set.docs.retain(|_, hits| match &hits.lines {
                    None => true,
                    Some(lines) => !lines.is_empty(),
                });
                Ok(set)
            }
            Query::Or(children) => {
                let mut acc = EvalSet::default();
                for child in children {
                    let set = self.eval(child, symbol)?;
                    acc = union(acc, set);
                }
                Ok(acc)
            }
            Query::Not(child) => {
                let inner = self.eval(child, symbol)?;
                let docs = (0..self.shard.doc_count())
                    .filter(|doc| !inner.docs.contains_key(doc))
                    .map(|doc| (doc, DocHits::default()))
                    .collect();
                Ok(EvalSet { docs })
            }
        }
    }

    /// Bits of branches whose name contains `pattern`.
    fn branch_pattern_mask(&self, pattern: &str) -> u64 {
        let mut mask = 0u64;
        for (bit, branch) in self.shard.metadata().branches.iter().enumerate() {
            if branch.name.contains(pattern) {
                mask |= 1 << bit;
            }
        }
        mask
    }

    /// Bits of branches named exactly; `HEAD` selects the first branch.
    fn branch_list_mask(&self, branches: &[String]) -> u64 {
        let known = &self.shard.metadata().branches;
        let mut mask = 0u64;
        for wanted in branches {
            if wanted == "HEAD" && !known.is_empty() {
                mask |= 1;
                continue;
            }
            if let Some(bit) = known.iter().position(|b| b.name == *wanted) {
                mask |= 1 << bit;
            }
        }
        mask
    }

    fn eval_substring(&mut self, atom: &Substring, symbol: bool) -> Result<EvalSet> {
        let searches_names = atom.file_name || !atom.content;
        let searches_content = atom.content || !atom.file_name;
        let pattern = atom.pattern.as_bytes();
        let needle = if atom.case_sensitive {
            pattern.to_vec()
        } else {
            lowered(&atom.pattern)
        };

        let mut set = EvalSet::default();
        if searches_content {
            if pattern.len() < NGRAM_SIZE {
                if !searches_names {
                    return Err(ShardError::PatternTooShort(atom.pattern.clone()));
                }
                // Too short for the content index; the name scan below still
                // serves the atom.
            } else {
                let candidates =
                    self.shard
                        .substring_candidates(&needle, atom.case_sensitive, Space::Content)?;
                self.collect_content(&mut set, &candidates, pattern, atom, symbol)?;
            }
        }
        if searches_names {
            let candidates = if pattern.len() < NGRAM_SIZE {
                CandidateSet {
                    candidates: self.shard.name_brute_force(pattern, atom.case_sensitive),
                    covers: true,
                }
            } else {
                self.shard
                    .substring_candidates(&needle, atom.case_sensitive, Space::Names)?
            };
            self.collect_names(&mut set, &candidates, pattern, atom, symbol)?;
        }

        for hits in set.docs.values_mut() {
            hits.lines = Some(hits.hits.iter().map(|hit| hit.line).collect());
        }
        Ok(set)
    }

    fn collect_content(
        &mut self,
        set: &mut EvalSet,
        candidates: &CandidateSet,
        pattern: &[u8],
        atom: &Substring,
        symbol: bool,
    ) -> Result<()> {
        let shard = self.shard;
        let lowered_pattern = lowered(&atom.pattern);
        let mut considered = HashSet::new();
        let mut loaded = HashSet::new();
        for (index, candidate) in candidates.candidates.iter().enumerate() {
            if index % CANCEL_CHECK_INTERVAL == 0 && self.token.is_cancelled() {
                return Err(ShardError::Cancelled);
            }
            self.stats.ngram_matches += 1;
            let doc = shard.doc_at_offset(candidate.start);
            let (doc_start, doc_end) = shard.doc_bounds(doc);
            if candidate.start < doc_start || candidate.start + candidate.len > doc_end {
                continue;
            }
            considered.insert(doc);
            let rel = candidate.start - doc_start;
            let verified = if candidates.covers {
                !atom.case_sensitive || case_matches(shard, candidate.start, pattern)
            } else {
                loaded.insert(doc);
                self.stats.content_bytes_loaded += u64::from(candidate.len);
                let content = shard.content(doc);
                let window = &content[rel as usize..(rel + candidate.len) as usize];
                window == lowered_pattern
                    && (!atom.case_sensitive || case_matches(shard, candidate.start, pattern))
            };
            if !verified {
                continue;
            }
            let line = self.line_of(doc, rel)?;
            set.docs.entry(doc).or_default().hits.push(Hit {
                start: rel,
                len: candidate.len,
                line,
                file_name: false,
                symbol,
            });
        }
        self.stats.files_considered += considered.len() as u64;
        self.stats.files_loaded += loaded.len() as u64;
        Ok(())
    }

    fn collect_names(
        &mut self,
        set: &mut EvalSet,
        candidates: &CandidateSet,
        pattern: &[u8],
        atom: &Substring,
        symbol: bool,
    ) -> Result<()> {
        let shard = self.shard;
        for (index, candidate) in candidates.candidates.iter().enumerate() {
            if index % CANCEL_CHECK_INTERVAL == 0 && self.token.is_cancelled() {
                return Err(ShardError::Cancelled);
            }
            self.stats.ngram_matches += 1;
            let doc = shard.name_doc_at_offset(candidate.start);
            let (name_start, name_end) = shard.name_bounds(doc);
            if candidate.start < name_start || candidate.start + candidate.len > name_end {
                continue;
            }
            let rel = candidate.start - name_start;
            let name = shard.name(doc);
            let window = &name[rel as usize..(rel + candidate.len) as usize];
            let verified = if candidates.covers {
                !atom.case_sensitive || window == pattern
            } else if atom.case_sensitive {
                window == pattern
            } else {
                window.eq_ignore_ascii_case(pattern)
            };
            if !verified {
                continue;
            }
            set.docs.entry(doc).or_default().hits.push(Hit {
                start: rel,
                len: candidate.len,
                line: NAME_LINE,
                file_name: true,
                symbol,
            });
        }
        Ok(())
    }

    fn eval_regexp(&mut self, atom: &Regexp, symbol: bool) -> Result<EvalSet> {
        let hir = regex_syntax::Parser::new()
            .parse(&atom.pattern)
            .map_err(|err| ShardError::Regex {
                pattern: atom.pattern.clone(),
                message: err.to_string(),
            })?;
        let effective = if atom.case_sensitive {
            hir
        } else {
            lower_hir(&hir)
        };
        let distilled = regexp_to_query(&effective);

        // The distilled atoms inherit the regex atom's scope and case so
        // candidate generation looks in the right namespace.
        let gate = distilled.query.clone().map(&mut |node| match node {
            Query::Substring(mut s) => {
                s.case_sensitive = atom.case_sensitive;
                s.file_name = atom.file_name;
                s.content = atom.content;
                Query::Substring(s)
            }
            other => other,
        });
        let candidates = self.eval(&gate, symbol)?;
        if distilled.equivalent {
            return Ok(candidates);
        }

        let pattern_text = effective.to_string();
        let regex = regex::bytes::Regex::new(&pattern_text).map_err(|err| ShardError::Regex {
            pattern: atom.pattern.clone(),
            message: err.to_string(),
        })?;
        let searches_names = atom.file_name || !atom.content;
        let searches_content = atom.content || !atom.file_name;

        let shard = self.shard;
        let mut set = EvalSet::default();
        for &doc in candidates.docs.keys() {
            if self.token.is_cancelled() {
                return Err(ShardError::Cancelled);
            }
            let mut hits = Vec::new();
            if searches_content {
                let (doc_start, doc_end) = shard.doc_bounds(doc);
                self.stats.files_loaded += 1;
                self.stats.content_bytes_loaded += u64::from(doc_end - doc_start);
                // Case-sensitive verification needs the original bytes back.
                let haystack: Vec<u8> = if atom.case_sensitive {
                    shard.original_slice(doc_start, doc_end - doc_start)
                } else {
                    shard.content(doc).to_vec()
                };
                for found in regex.find_iter(&haystack) {
                    let start = found.start() as u32;
                    let line = self.line_of(doc, start)?;
                    hits.push(Hit {
                        start,
                        len: (found.end() - found.start()) as u32,
                        line,
                        file_name: false,
                        symbol,
                    });
                }
            }
            if searches_names {
                let name = shard.name(doc);
                let haystack: Vec<u8> = if atom.case_sensitive {
                    name.to_vec()
                } else {
                    name.to_ascii_lowercase()
                };
                for found in regex.find_iter(&haystack) {
                    hits.push(Hit {
                        start: found.start() as u32,
                        len: (found.end() - found.start()) as u32,
                        line: NAME_LINE,
                        file_name: true,
                        symbol,
                    });
                }
            }
            if !hits.is_empty() {
                let lines = hits.iter().map(|hit| hit.line).collect();
                set.docs.insert(
                    doc,
                    DocHits {
                        hits,
                        lines: Some(lines),
                    },
                );
            }
        }
        Ok(set)
    }

    fn build_matches(
        &mut self,
        set: EvalSet,
        options: &SearchOptions,
    ) -> Result<Vec<FileMatch>> {
        let shard = self.shard;
        let mut files = Vec::new();
        for (doc, doc_hits) in set.docs {
            if self.token.is_cancelled() {
                return Err(ShardError::Cancelled);
            }
            let (doc_start, _) = shard.doc_bounds(doc);
            let content = shard.content(doc);
            let name = shard.name(doc);

            let mut by_line: BTreeMap<u32, Vec<&Hit>> = BTreeMap::new();
            let mut path_fragments = Vec::new();
            let mut best_weight = 0.0f64;
            let mut fragment_total = 0u64;
            for hit in &doc_hits.hits {
                let aligned = if hit.file_name {
                    word_aligned(name, hit.start as usize, hit.len as usize)
                } else {
                    word_aligned(content, hit.start as usize, hit.len as usize)
                };
                let weight = fragment_weight(&FragmentSignal {
                    word_boundary: aligned,
                    symbol: hit.symbol,
                    file_name: hit.file_name,
                });
                best_weight = best_weight.max(weight);
                if hit.file_name {
                    path_fragments.push(LineFragment {
                        line_offset: hit.start,
                        offset: hit.start,
                        rune_offset: rune_count(&name[..hit.start as usize]),
                        len: hit.len,
                    });
                    fragment_total += 1;
                } else {
                    by_line.entry(hit.line).or_default().push(hit);
                }
            }

            let mut line_matches = Vec::new();
            for (line, hits) in by_line {
                let (line_start, line_end) = self.line_bounds(doc, line)?;
                let line_bytes = shard.original_slice(doc_start + line_start, line_end - line_start);
                let mut fragments = Vec::with_capacity(hits.len());
                for hit in hits {
                    fragments.push(LineFragment {
                        line_offset: hit.start - line_start,
                        offset: hit.start,
                        rune_offset: shard.rune_offset(doc, hit.start)?,
                        len: hit.len,
                    });
                    fragment_total += 1;
                }
                line_matches.push(LineMatch {
                    line: line_bytes,
                    line_number: line + 1,
                    line_start,
                    fragments,
                });
            }

            let score = best_weight + rank_weight(shard.rank());
            files.push(FileMatch {
                path: String::from_utf8_lossy(name).into_owned(),
                doc,
                repo: shard.repo_name().to_string(),
                branches: shard.branches_of_mask(shard.branch_mask(doc)),
                language: shard.language(doc).to_string(),
                score,
                line_matches,
                path_fragments,
            });

            self.stats.match_count += fragment_total.max(1);
            if options.total_max_match_count > 0
                && self.stats.match_count >= options.total_max_match_count as u64
            {
                break;
            }
        }

        files.sort_by(compare);
        if options.max_doc_display_count > 0 {
            files.truncate(options.max_doc_display_count);
        }
        Ok(files)
    }
}

fn case_matches(shard: &Shard, absolute: u32, pattern: &[u8]) -> bool {
    pattern.iter().enumerate().all(|(index, &byte)| {
        shard.case_bit(absolute + index as u32) == byte.is_ascii_uppercase()
    })
}

fn rune_count(bytes: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut offset = 0usize;
    while offset < bytes.len() {
        offset += crate::writer::rune_len(bytes[offset]).min(bytes.len() - offset);
        count += 1;
    }
    count
}

impl Shard {
    /// Evaluates one query against this shard.
    ///
    /// Cancellation (explicit or via the token's deadline) is not an
    /// error: the shard returns what it has with `shards_skipped` set.
    pub fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        let simplified = simplify(query.clone());
        let mut evaluator = Evaluator::new(self, token.clone());
        let outcome = evaluator
            .eval(&simplified, false)
            .and_then(|set| evaluator.build_matches(set, options));
        let mut stats = evaluator.stats;
        stats.duration = started.elapsed();
        match outcome {
            Ok(files) => Ok(SearchResult { files, stats }),
            Err(ShardError::Cancelled) => {
                stats.shards_skipped = 1;
                Ok(SearchResult {
                    files: Vec::new(),
                    stats,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn repo_list_entry(&self) -> RepoListEntry {
        let metadata = self.metadata();
        RepoListEntry {
            name: metadata.name.clone(),
            branches: metadata.branches.clone(),
            doc_count: self.doc_count(),
            rank: metadata.rank,
        }
    }
}
