use crate::{Query, Substring, simplify};
use regex_syntax::hir::{
    Class, ClassBytes, ClassBytesRange, ClassUnicode, ClassUnicodeRange, Hir, HirKind, Repetition,
};

/// Outcome of distilling a regex into a substring query.
///
/// `query` matches a superset of the documents the regex matches, so it can
/// drive candidate generation. When `equivalent` is true the two match sets
/// are identical and verification can skip the regex entirely; that only
/// holds for a pure literal of at least three bytes or a disjunction of
/// such. `no_newline` records that no match of the regex can span a line
/// boundary, which lets the matcher discard candidate combinations that
/// would have to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distilled {
    pub query: Query,
    pub equivalent: bool,
    pub no_newline: bool,
}

/// Distills literal substrings out of a regex.
///
/// Concatenations become conjunctions (line-local when no part can cross a
/// newline), alternations become disjunctions, and repetitions with a
/// minimum of one recurse into their body. Everything else contributes
/// `Const(true)` — the regex itself decides during verification. The
/// returned query is already simplified.
///
/// ```
/// use shrike_syntax::{regexp_to_query, Query};
/// let hir = regex_syntax::Parser::new().parse("(foo|bar)baz.*bla").unwrap();
/// let distilled = regexp_to_query(&hir);
/// assert!(!distilled.equivalent);
/// assert!(distilled.no_newline);
/// assert!(matches!(distilled.query, Query::LineAnd(_)));
/// ```
pub fn regexp_to_query(hir: &Hir) -> Distilled {
    let mut distilled = distill(hir);
    distilled.query = simplify(distilled.query);
    distilled
}

fn distill(hir: &Hir) -> Distilled {
    match hir.kind() {
        HirKind::Empty => Distilled {
            query: Query::Const(true),
            equivalent: true,
            no_newline: true,
        },
        HirKind::Literal(lit) => {
            let no_newline = !lit.0.contains(&b'\n');
            match std::str::from_utf8(&lit.0) {
                Ok(text) if text.len() >= 3 => Distilled {
                    query: Query::Substring(Substring::new(text)),
                    equivalent: true,
                    no_newline,
                },
                _ => Distilled {
                    query: Query::Const(true),
                    equivalent: false,
                    no_newline,
                },
            }
        }
        HirKind::Class(class) => Distilled {
            query: Query::Const(true),
            equivalent: false,
            no_newline: !class_matches_newline(class),
        },
        HirKind::Look(_) => Distilled {
            query: Query::Const(true),
            equivalent: false,
            no_newline: true,
        },
        HirKind::Capture(cap) => distill(&cap.sub),
        HirKind::Repetition(rep) => {
            if rep.min >= 1 {
                let sub = distill(&rep.sub);
                Distilled {
                    query: sub.query,
                    equivalent: false,
                    no_newline: sub.no_newline,
                }
            } else {
                Distilled {
                    query: Query::Const(true),
                    equivalent: false,
                    no_newline: !can_match_newline(&rep.sub),
                }
            }
        }
        HirKind::Concat(subs) => {
            let children: Vec<Distilled> = subs.iter().map(distill).collect();
            let no_newline = children.iter().all(|c| c.no_newline);
            let equivalent = match children.len() {
                1 => children[0].equivalent,
                _ => false,
            };
            let queries: Vec<Query> = children.into_iter().map(|c| c.query).collect();
            let query = if no_newline {
                Query::LineAnd(queries)
            } else {
                Query::And(queries)
            };
            Distilled {
                query,
                equivalent,
                no_newline,
            }
        }
        HirKind::Alternation(subs) => {
            let children: Vec<Distilled> = subs.iter().map(distill).collect();
            let no_newline = children.iter().all(|c| c.no_newline);
            let equivalent = children.iter().all(|c| c.equivalent);
            Distilled {
                query: Query::Or(children.into_iter().map(|c| c.query).collect()),
                equivalent,
                no_newline,
            }
        }
    }
}

fn class_matches_newline(class: &Class) -> bool {
    match class {
        Class::Unicode(cls) => cls
            .ranges()
            .iter()
            .any(|r| r.start() <= '\n' && '\n' <= r.end()),
        Class::Bytes(cls) => cls
            .ranges()
            .iter()
            .any(|r| r.start() <= b'\n' && b'\n' <= r.end()),
    }
}

fn can_match_newline(hir: &Hir) -> bool {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => false,
        HirKind::Literal(lit) => lit.0.contains(&b'\n'),
        HirKind::Class(class) => class_matches_newline(class),
        HirKind::Capture(cap) => can_match_newline(&cap.sub),
        HirKind::Repetition(rep) => can_match_newline(&rep.sub),
        HirKind::Concat(subs) | HirKind::Alternation(subs) => {
            subs.iter().any(can_match_newline)
        }
    }
}

/// Rewrites a regex HIR with ASCII letters folded to lowercase.
///
/// Literal bytes `A`–`Z` shift to `a`–`z` and character-class ranges are
/// split so the uppercase span maps onto its lowercase counterpart. Other
/// operators rebuild unchanged. The engine runs lowered patterns against
/// the lowercased content blob for case-insensitive atoms; non-ASCII case
/// folding is intentionally not attempted.
pub fn lower_hir(hir: &Hir) -> Hir {
    match hir.kind() {
        HirKind::Empty => Hir::empty(),
        HirKind::Look(look) => Hir::look(*look),
        HirKind::Literal(lit) => {
            let lowered: Vec<u8> = lit.0.iter().map(u8::to_ascii_lowercase).collect();
            Hir::literal(lowered)
        }
        HirKind::Class(Class::Unicode(cls)) => {
            let mut ranges = Vec::new();
            for range in cls.ranges() {
                lower_unicode_range(range.start(), range.end(), &mut ranges);
            }
            Hir::class(Class::Unicode(ClassUnicode::new(ranges)))
        }
        HirKind::Class(Class::Bytes(cls)) => {
            let mut ranges = Vec::new();
            for range in cls.ranges() {
                lower_byte_range(range.start(), range.end(), &mut ranges);
            }
            Hir::class(Class::Bytes(ClassBytes::new(ranges)))
        }
        HirKind::Capture(cap) => Hir::capture(regex_syntax::hir::Capture {
            index: cap.index,
            name: cap.name.clone(),
            sub: Box::new(lower_hir(&cap.sub)),
        }),
        HirKind::Repetition(rep) => Hir::repetition(Repetition {
            min: rep.min,
            max: rep.max,
            greedy: rep.greedy,
            sub: Box::new(lower_hir(&rep.sub)),
        }),
        HirKind::Concat(subs) => Hir::concat(subs.iter().map(lower_hir).collect()),
        HirKind::Alternation(subs) => Hir::alternation(subs.iter().map(lower_hir).collect()),
    }
}

fn lower_unicode_range(start: char, end: char, out: &mut Vec<ClassUnicodeRange>) {
    let (lo, hi) = (start as u32, end as u32);
    let (upper_lo, upper_hi) = ('A' as u32, 'Z' as u32);
    if hi < upper_lo || lo > upper_hi {
        out.push(ClassUnicodeRange::new(start, end));
        return;
    }
    if lo < upper_lo {
        out.push(ClassUnicodeRange::new(start, char_from(upper_lo - 1)));
    }
    let fold_lo = lo.max(upper_lo);
    let fold_hi = hi.min(upper_hi);
    out.push(ClassUnicodeRange::new(
        char_from(fold_lo + 32),
        char_from(fold_hi + 32),
    ));
    if hi > upper_hi {
        out.push(ClassUnicodeRange::new(char_from(upper_hi + 1), end));
    }
}

fn lower_byte_range(start: u8, end: u8, out: &mut Vec<ClassBytesRange>) {
    if end < b'A' || start > b'Z' {
        out.push(ClassBytesRange::new(start, end));
        return;
    }
    if start < b'A' {
        out.push(ClassBytesRange::new(start, b'A' - 1));
    }
    let fold_lo = start.max(b'A');
    let fold_hi = end.min(b'Z');
    out.push(ClassBytesRange::new(fold_lo + 32, fold_hi + 32));
    if end > b'Z' {
        out.push(ClassBytesRange::new(b'Z' + 1, end));
    }
}

fn char_from(value: u32) -> char {
    char::from_u32(value).expect("range arithmetic stays within ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hir(pattern: &str) -> Hir {
        regex_syntax::Parser::new().parse(pattern).unwrap()
    }

    fn substr(pattern: &str) -> Query {
        Query::Substring(Substring::new(pattern))
    }

    #[test]
    fn long_literal_is_equivalent() {
        let d = regexp_to_query(&hir("needle"));
        assert_eq!(d.query, substr("needle"));
        assert!(d.equivalent);
        assert!(d.no_newline);
    }

    #[test]
    fn short_literal_is_const_true() {
        let d = regexp_to_query(&hir("ab"));
        assert_eq!(d.query, Query::Const(true));
        assert!(!d.equivalent);
    }

    #[test]
    fn concat_with_dot_star_is_line_local_conjunction() {
        let d = regexp_to_query(&hir("baz.*bla"));
        assert_eq!(d.query, Query::LineAnd(vec![substr("baz"), substr("bla")]));
        assert!(!d.equivalent);
        assert!(d.no_newline);
    }

    #[test]
    fn dotall_star_loses_line_locality() {
        let d = regexp_to_query(&hir("(?s)baz.*bla"));
        assert_eq!(d.query, Query::And(vec![substr("baz"), substr("bla")]));
        assert!(!d.no_newline);
    }

    #[test]
    fn alternation_of_literals_is_equivalent_or() {
        let d = regexp_to_query(&hir("foo|barbar"));
        assert_eq!(d.query, Query::Or(vec![substr("foo"), substr("barbar")]));
        assert!(d.equivalent);
    }

    #[test]
    fn alternation_with_short_branch_is_not_equivalent() {
        let d = regexp_to_query(&hir("foo|ab"));
        assert!(!d.equivalent);
        // The short branch widens to Const(true), which swallows the Or.
        assert_eq!(d.query, Query::Const(true));
    }

    #[test]
    fn plus_recurses_but_is_not_equivalent() {
        let d = regexp_to_query(&hir("(needle)+"));
        assert_eq!(d.query, substr("needle"));
        assert!(!d.equivalent);
    }

    #[test]
    fn grouped_alternation_inside_concat() {
        let d = regexp_to_query(&hir("(foo|bar)baz.*bla"));
        assert_eq!(
            d.query,
            Query::LineAnd(vec![
                Query::Or(vec![substr("foo"), substr("bar")]),
                substr("baz"),
                substr("bla"),
            ])
        );
    }

    #[test]
    fn anchors_distill_to_const() {
        let d = regexp_to_query(&hir("^needle$"));
        assert_eq!(d.query, substr("needle"));
        assert!(!d.equivalent);
    }

    #[test]
    fn lower_hir_folds_literals() {
        let lowered = lower_hir(&hir("FooBar"));
        let d = regexp_to_query(&lowered);
        assert_eq!(d.query, substr("foobar"));
    }

    #[test]
    fn lower_hir_folds_class_ranges() {
        let lowered = lower_hir(&hir("[A-Z]"));
        assert_eq!(lowered, hir("[a-z]"));
        let lowered = lower_hir(&hir("[0-C]"));
        assert_eq!(lowered, hir("[0-@a-c]"));
    }

    #[test]
    fn lower_hir_keeps_non_ascii() {
        let lowered = lower_hir(&hir("Löwe"));
        let d = regexp_to_query(&lowered);
        assert_eq!(d.query, substr("löwe"));
    }
}
