//! Ground-truth equivalence: the trigram engine must return exactly the
//! documents a naive evaluator finds by scanning every document's bytes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use search_cancel::CancellationToken;
use shard_index::{RepoMetadata, SearchOptions, Shard, ShardWriter, WriterOptions};
use shrike_syntax::{Query, Regexp, Substring};
use std::collections::BTreeSet;

const REGEX_POOL: &[&str] = &[
    "ab.*cd",
    "a[bc]+d",
    "water|fire",
    "ne+dle",
    "(foo|bar)baz",
    "^abc",
];

const WORD_POOL: &[&str] = &[
    "water", "fire", "abc", "abcd", "foobaz", "barbaz", "needle", "ABC", "Water", "xyz",
];

fn random_doc(rng: &mut StdRng) -> String {
    let words = ["water", "fire", "abcd", "foobaz", "barbaz", "needle", "ABC", "plain", "abc"];
    let length = rng.gen_range(0..30);
    let mut doc = String::new();
    for index in 0..length {
        doc.push_str(words[rng.gen_range(0..words.len())]);
        if index % 5 == 4 {
            doc.push('\n');
        } else {
            doc.push(' ');
        }
    }
    doc
}

fn random_atom(rng: &mut StdRng) -> Query {
    if rng.gen_range(0..4) == 0 {
        let pattern = REGEX_POOL[rng.gen_range(0..REGEX_POOL.len())];
        Query::Regexp(Regexp::new(pattern))
    } else {
        let word = WORD_POOL[rng.gen_range(0..WORD_POOL.len())];
        let mut atom = Substring::new(word);
        // Mirror the parser's `case:auto` rule.
        atom.case_sensitive = word.chars().any(|c| c.is_ascii_uppercase());
        Query::Substring(atom)
    }
}

fn random_query(rng: &mut StdRng, depth: usize) -> Query {
    if depth == 0 || rng.gen_range(0..3) == 0 {
        return random_atom(rng);
    }
    match rng.gen_range(0..3) {
        0 => Query::And((0..rng.gen_range(2..4)).map(|_| random_query(rng, depth - 1)).collect()),
        1 => Query::Or((0..rng.gen_range(2..4)).map(|_| random_query(rng, depth - 1)).collect()),
        _ => Query::Not(Box::new(random_query(rng, depth - 1))),
    }
}

fn naive_atom(doc_name: &str, content: &str, query: &Query) -> bool {
    match query {
        Query::Substring(atom) => {
            let searches_names = atom.file_name || !atom.content;
            let searches_content = atom.content || !atom.file_name;
            let content_ok = searches_content
                && atom.pattern.len() >= 3
                && if atom.case_sensitive {
                    content.contains(&atom.pattern)
                } else {
                    content
                        .to_ascii_lowercase()
                        .contains(&atom.pattern.to_ascii_lowercase())
                };
            let name_ok = searches_names
                && if atom.case_sensitive {
                    doc_name.contains(&atom.pattern)
                } else {
                    doc_name
                        .to_ascii_lowercase()
                        .contains(&atom.pattern.to_ascii_lowercase())
                };
            content_ok || name_ok
        }
        Query::Regexp(atom) => {
            let regex = regex::Regex::new(&atom.pattern).expect("pool patterns are valid");
            // The pool is lowercase, so insensitive matching reduces to a
            // lowered haystack.
            regex.is_match(&content.to_ascii_lowercase())
                || regex.is_match(&doc_name.to_ascii_lowercase())
        }
        _ => unreachable!("atoms only"),
    }
}

fn naive_eval(doc_name: &str, content: &str, query: &Query) -> bool {
    match query {
        Query::And(children) => children.iter().all(|c| naive_eval(doc_name, content, c)),
        Query::Or(children) => children.iter().any(|c| naive_eval(doc_name, content, c)),
        Query::Not(child) => !naive_eval(doc_name, content, child),
        atom => naive_atom(doc_name, content, atom),
    }
}

#[test]
fn engine_matches_naive_baseline() {
    let mut rng = StdRng::seed_from_u64(0x0b5e55ed);
    for round in 0..40 {
        let docs: Vec<(String, String)> = (0..rng.gen_range(1..8))
            .map(|index| (format!("doc{round:02}_{index}"), random_doc(&mut rng)))
            .collect();

        let mut writer =
            ShardWriter::new(RepoMetadata::new("fuzz/repo"), WriterOptions::default()).unwrap();
        for (name, content) in &docs {
            writer
                .add_document(name, content.as_bytes(), &[], None)
                .unwrap();
        }
        let shard = Shard::from_bytes(writer.finish_bytes().unwrap()).unwrap();

        for _ in 0..25 {
            let query = random_query(&mut rng, 2);
            let engine: BTreeSet<String> = shard
                .search(&query, &SearchOptions::default(), &CancellationToken::new())
                .unwrap()
                .files
                .into_iter()
                .map(|file| file.path)
                .collect();
            let naive: BTreeSet<String> = docs
                .iter()
                .filter(|(name, content)| naive_eval(name, content, &query))
                .map(|(name, _)| name.clone())
                .collect();
            assert_eq!(engine, naive, "query {query} disagreed on round {round}");
        }
    }
}
