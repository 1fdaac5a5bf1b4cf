//! # Shrike's query language
//!
//! `shrike-syntax` turns raw search strings into a structured [`Query`] tree
//! so the shard engine and the sharded searcher can reason about boolean
//! structure, atom placement, and repository restrictions without duplicating
//! parsing rules. The tree is a closed sum type; traversals rebuild nodes
//! instead of mutating in place.
//!
//! ## Example
//! ```
//! use shrike_syntax::{parse_query, simplify, Query};
//!
//! let parsed = parse_query("needle or file:\\.rs$").unwrap();
//! let query = simplify(parsed);
//! if let Query::Or(parts) = &query {
//!     assert!(matches!(&parts[0], Query::Substring(s) if s.pattern == "needle"));
//!     assert!(matches!(&parts[1], Query::Regexp(r) if r.file_name));
//! }
//! ```

mod distill;
mod parse;
mod wire;

pub use distill::{Distilled, lower_hir, regexp_to_query};
pub use parse::parse_query;
pub use wire::{WireError, decode_repo_branches, encode_repo_branches};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A literal atom. With neither `file_name` nor `content` set the atom
/// matches in both file names and file contents; setting one restricts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substring {
    pub pattern: String,
    pub case_sensitive: bool,
    pub file_name: bool,
    pub content: bool,
}

impl Substring {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }
}

/// A regex atom. The pattern is kept as source text; it has already been
/// validated by the parser, and consumers lower it to an HIR when they need
/// candidate extraction or verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regexp {
    pub pattern: String,
    pub case_sensitive: bool,
    pub file_name: bool,
    pub content: bool,
}

impl Regexp {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }
}

/// Argument of `type:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Evaluate the child per repository; the outcome is a [`Query::RepoSet`].
    Repo,
}

/// The query tree.
///
/// `And`/`Or` store flat vectors instead of binary trees so consumers can
/// iterate children without rebalancing. `Const` is the identity element the
/// simplifier folds with: `And(vec![])` means `Const(true)`, `Or(vec![])`
/// means `Const(false)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Literal atom.
    ///
    /// ```
    /// use shrike_syntax::{parse_query, Query};
    /// let q = parse_query("needle").unwrap();
    /// assert!(matches!(q, Query::Substring(s) if s.pattern == "needle"));
    /// ```
    Substring(Substring),
    /// Regex atom.
    ///
    /// ```
    /// use shrike_syntax::{parse_query, Query};
    /// let q = parse_query("ab.*cd").unwrap();
    /// assert!(matches!(q, Query::Regexp(r) if r.pattern == "ab.*cd"));
    /// ```
    Regexp(Regexp),
    /// Restrict matches to symbol definitions. The shard layout implemented
    /// here carries no symbol table, so evaluation falls back to the child
    /// with the symbol score weight applied.
    Symbol(Box<Query>),
    /// Restrict to documents recorded with this language at index time.
    Language(String),
    /// Restrict to documents on a branch whose name contains the pattern.
    /// An empty pattern matches every branch.
    Branch(String),
    /// Restrict to a repository whose name contains the pattern.
    Repo(String),
    /// Restrict to a finite named set of repositories. Produced by
    /// `type:repo` expansion rather than by the parser.
    RepoSet(BTreeSet<String>),
    /// Per-repository branch restriction, usually decoded from the wire
    /// format (see [`decode_repo_branches`]).
    RepoBranches(BTreeMap<String, Vec<String>>),
    /// Evaluate `child` as a repository-level query.
    Type { kind: TypeKind, child: Box<Query> },
    /// All children must match the document.
    And(Vec<Query>),
    /// All children must match the document *on a common line*. Only the
    /// regex distiller produces this; parsed conjunctions are never
    /// line-local.
    LineAnd(Vec<Query>),
    /// Any child matches.
    Or(Vec<Query>),
    /// Inverted child.
    Not(Box<Query>),
    /// Constant verdict; identity element for the simplifier.
    Const(bool),
}

impl Query {
    /// True for leaf nodes that generate match candidates.
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            Query::Substring(_)
                | Query::Regexp(_)
                | Query::Language(_)
                | Query::Branch(_)
                | Query::Repo(_)
                | Query::RepoSet(_)
                | Query::RepoBranches(_)
                | Query::Const(_)
        )
    }

    /// Rebuilds the tree bottom-up, applying `f` to every node.
    pub fn map(self, f: &mut impl FnMut(Query) -> Query) -> Query {
        let mapped = match self {
            Query::And(children) => Query::And(children.into_iter().map(|c| c.map(f)).collect()),
            Query::LineAnd(children) => {
                Query::LineAnd(children.into_iter().map(|c| c.map(f)).collect())
            }
            Query::Or(children) => Query::Or(children.into_iter().map(|c| c.map(f)).collect()),
            Query::Not(child) => Query::Not(Box::new(child.map(f))),
            Query::Symbol(child) => Query::Symbol(Box::new(child.map(f))),
            Query::Type { kind, child } => Query::Type {
                kind,
                child: Box::new(child.map(f)),
            },
            leaf => leaf,
        };
        f(mapped)
    }

    /// Calls `f` for every pattern atom (substring and regex leaves).
    pub fn visit_atoms<'a>(&'a self, f: &mut impl FnMut(&'a Query)) {
        match self {
            Query::And(children) | Query::LineAnd(children) | Query::Or(children) => {
                for child in children {
                    child.visit_atoms(f);
                }
            }
            Query::Not(child) | Query::Symbol(child) => child.visit_atoms(f),
            Query::Type { child, .. } => child.visit_atoms(f),
            Query::Substring(_) | Query::Regexp(_) => f(self),
            _ => {}
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, tag: &str, children: &[Query]) -> fmt::Result {
            write!(f, "({tag}")?;
            for child in children {
                write!(f, " {child}")?;
            }
            write!(f, ")")
        }
        match self {
            Query::Substring(s) => {
                let scope = atom_scope(s.file_name, s.content);
                if s.case_sensitive {
                    write!(f, "(substr{scope} case {:?})", s.pattern)
                } else {
                    write!(f, "(substr{scope} {:?})", s.pattern)
                }
            }
            Query::Regexp(r) => {
                let scope = atom_scope(r.file_name, r.content);
                if r.case_sensitive {
                    write!(f, "(regex{scope} case {:?})", r.pattern)
                } else {
                    write!(f, "(regex{scope} {:?})", r.pattern)
                }
            }
            Query::Symbol(child) => write!(f, "(sym {child})"),
            Query::Language(name) => write!(f, "(lang {name})"),
            Query::Branch(pattern) => write!(f, "(branch {pattern:?})"),
            Query::Repo(pattern) => write!(f, "(repo {pattern:?})"),
            Query::RepoSet(names) => {
                write!(f, "(reposet")?;
                for name in names {
                    write!(f, " {name}")?;
                }
                write!(f, ")")
            }
            Query::RepoBranches(map) => {
                write!(f, "(repobranches")?;
                for (repo, branches) in map {
                    write!(f, " {repo}:{}", branches.join(","))?;
                }
                write!(f, ")")
            }
            Query::Type { kind, child } => match kind {
                TypeKind::Repo => write!(f, "(type:repo {child})"),
            },
            Query::And(children) => list(f, "and", children),
            Query::LineAnd(children) => list(f, "lineand", children),
            Query::Or(children) => list(f, "or", children),
            Query::Not(child) => write!(f, "(not {child})"),
            Query::Const(value) => write!(f, "(const {value})"),
        }
    }
}

fn atom_scope(file_name: bool, content: bool) -> &'static str {
    match (file_name, content) {
        (true, false) => ":file",
        (false, true) => ":content",
        _ => "",
    }
}

/// Malformed query string; surfaced to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// The query parsed but cannot execute as written; `suggestion` tells the
/// user how to rephrase it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestError {
    pub message: String,
    pub suggestion: String,
}

impl fmt::Display for SuggestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}", self.message, self.suggestion)
    }
}

impl std::error::Error for SuggestError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    Parse(ParseError),
    Suggest(SuggestError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Parse(err) => err.fmt(f),
            QueryError::Suggest(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ParseError> for QueryError {
    fn from(err: ParseError) -> Self {
        QueryError::Parse(err)
    }
}

impl From<SuggestError> for QueryError {
    fn from(err: SuggestError) -> Self {
        QueryError::Suggest(err)
    }
}

/// Rewrites a query into canonical flattened form.
///
/// Two rules run to a fixed point:
/// - constant folding: `Const(true)` drops out of conjunctions and wins
///   disjunctions, dually for `Const(false)`; `Not(Const(b))` inverts.
/// - flattening: nested same-kind And/Or chains merge into their parent and
///   single-child And/Or collapse to the child.
///
/// Empty-pattern substring atoms and empty branch patterns collapse to
/// `Const(true)`. The function never mutates its input in place; a new tree
/// is returned.
///
/// ```
/// use shrike_syntax::{parse_query, simplify, Query};
/// let q = simplify(parse_query("(( needle ))").unwrap());
/// assert!(matches!(q, Query::Substring(_)));
/// ```
pub fn simplify(query: Query) -> Query {
    match query {
        Query::And(children) => simplify_conjunction(children, false),
        Query::LineAnd(children) => simplify_conjunction(children, true),
        Query::Or(children) => simplify_disjunction(children),
        Query::Not(child) => match simplify(*child) {
            Query::Const(value) => Query::Const(!value),
            Query::Not(inner) => *inner,
            other => Query::Not(Box::new(other)),
        },
        Query::Symbol(child) => match simplify(*child) {
            Query::Const(value) => Query::Const(value),
            other => Query::Symbol(Box::new(other)),
        },
        Query::Type { kind, child } => Query::Type {
            kind,
            child: Box::new(simplify(*child)),
        },
        Query::Substring(s) if s.pattern.is_empty() => Query::Const(true),
        Query::Branch(pattern) if pattern.is_empty() => Query::Const(true),
        leaf => leaf,
    }
}

fn simplify_conjunction(children: Vec<Query>, line_local: bool) -> Query {
    let mut flattened = Vec::new();
    for child in children.into_iter().map(simplify) {
        match child {
            Query::Const(true) => {}
            Query::Const(false) => return Query::Const(false),
            // Merging a line-local chain into a plain one (or vice versa)
            // would change which candidates survive, so only same-kind
            // chains flatten.
            Query::And(nested) if !line_local => flattened.extend(nested),
            Query::LineAnd(nested) if line_local => flattened.extend(nested),
            other => flattened.push(other),
        }
    }
    match flattened.len() {
        0 => Query::Const(true),
        1 => flattened.pop().expect("len checked"),
        _ if line_local => Query::LineAnd(flattened),
        _ => Query::And(flattened),
    }
}

fn simplify_disjunction(children: Vec<Query>) -> Query {
    let mut flattened = Vec::new();
    for child in children.into_iter().map(simplify) {
        match child {
            Query::Const(false) => {}
            Query::Const(true) => return Query::Const(true),
            Query::Or(nested) => flattened.extend(nested),
            other => flattened.push(other),
        }
    }
    match flattened.len() {
        0 => Query::Const(false),
        1 => flattened.pop().expect("len checked"),
        _ => Query::Or(flattened),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substr(pattern: &str) -> Query {
        Query::Substring(Substring::new(pattern))
    }

    #[test]
    fn empty_and_is_const_true() {
        assert_eq!(simplify(Query::And(vec![])), Query::Const(true));
    }

    #[test]
    fn empty_or_is_const_false() {
        assert_eq!(simplify(Query::Or(vec![])), Query::Const(false));
    }

    #[test]
    fn const_true_drops_from_and() {
        let q = Query::And(vec![Query::Const(true), substr("foo")]);
        assert_eq!(simplify(q), substr("foo"));
    }

    #[test]
    fn const_false_wins_and() {
        let q = Query::And(vec![substr("foo"), Query::Const(false)]);
        assert_eq!(simplify(q), Query::Const(false));
    }

    #[test]
    fn const_true_wins_or() {
        let q = Query::Or(vec![substr("foo"), Query::Const(true)]);
        assert_eq!(simplify(q), Query::Const(true));
    }

    #[test]
    fn nested_and_flattens() {
        let q = Query::And(vec![
            Query::And(vec![substr("a"), substr("b")]),
            substr("c"),
        ]);
        assert_eq!(
            simplify(q),
            Query::And(vec![substr("a"), substr("b"), substr("c")])
        );
    }

    #[test]
    fn line_local_and_does_not_merge_into_plain_and() {
        let q = Query::And(vec![
            Query::LineAnd(vec![substr("a"), substr("b")]),
            substr("c"),
        ]);
        assert_eq!(
            simplify(q),
            Query::And(vec![
                Query::LineAnd(vec![substr("a"), substr("b")]),
                substr("c"),
            ])
        );
    }

    #[test]
    fn not_const_inverts() {
        let q = Query::Not(Box::new(Query::Or(vec![])));
        assert_eq!(simplify(q), Query::Const(true));
    }

    #[test]
    fn double_negation_cancels() {
        let q = Query::Not(Box::new(Query::Not(Box::new(substr("x")))));
        assert_eq!(simplify(q), substr("x"));
    }

    #[test]
    fn not_flattens_recursively() {
        let q = Query::Not(Box::new(Query::And(vec![Query::And(vec![
            substr("a"),
            substr("b"),
        ])])));
        assert_eq!(
            simplify(q),
            Query::Not(Box::new(Query::And(vec![substr("a"), substr("b")])))
        );
    }

    #[test]
    fn empty_pattern_collapses() {
        assert_eq!(simplify(substr("")), Query::Const(true));
        assert_eq!(simplify(Query::Branch(String::new())), Query::Const(true));
    }

    #[test]
    fn map_rebuilds_bottom_up() {
        let q = Query::And(vec![substr("a"), Query::Not(Box::new(substr("b")))]);
        let upper = q.map(&mut |node| match node {
            Query::Substring(mut s) => {
                s.pattern = s.pattern.to_ascii_uppercase();
                Query::Substring(s)
            }
            other => other,
        });
        assert_eq!(
            upper,
            Query::And(vec![substr("A"), Query::Not(Box::new(substr("B")))])
        );
    }

    #[test]
    fn visit_atoms_reaches_leaves() {
        let q = Query::Or(vec![
            substr("a"),
            Query::Symbol(Box::new(Query::Regexp(Regexp::new("b.*c")))),
        ]);
        let mut seen = Vec::new();
        q.visit_atoms(&mut |atom| seen.push(atom.to_string()));
        assert_eq!(seen.len(), 2);
    }
}
