use crate::{ParseError, Query, QueryError, Regexp, Substring, SuggestError, TypeKind};
use regex_syntax::hir::{Hir, HirKind};

/// Parses a query string into a [`Query`] tree.
///
/// Whitespace between terms means conjunction; a lowercase `or` bareword
/// between terms means disjunction; `-term` negates. `name:` keywords scope
/// atoms (`file:`, `content:`, `sym:`), restrict repositories and branches
/// (`repo:`, `branch:`, `lang:`), or steer the whole expression list
/// (`case:`, `type:`). Barewords that contain regex metacharacters become
/// regex atoms; a regex that reduces to a pure literal is demoted back to a
/// substring atom. Empty input parses to `Const(true)`.
pub fn parse_query(input: &str) -> Result<Query, QueryError> {
    let mut parser = Parser::new(input);
    let query = parser.parse_expr_list(false)?;
    parser.skip_ws();
    if !parser.eof() {
        return Err(parser.error("unexpected ')'").into());
    }
    Ok(query)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseSetting {
    Yes,
    No,
    Auto,
}

/// One parsed term plus whether its atoms still need case resolution.
/// Parenthesized groups resolve their own atoms, so only terms produced
/// directly at this list level stay pending.
struct Item {
    query: Query,
    case_pending: bool,
}

/// What a single term parse produced: an ordinary item, or a setting that
/// applies to the surrounding expression list instead of becoming a node.
enum Parsed {
    Item(Item),
    Case(CaseSetting),
    TypeSet(TypeKind),
}

// The known `name:` keywords. Longest-match concerns don't arise: no keyword
// is a prefix of another keyword's spelling.
const KEYWORDS: &[&str] = &[
    "file:", "f:", "repo:", "r:", "branch:", "b:", "case:", "regex:", "sym:", "lang:", "content:",
    "type:",
];

const REGEX_META: &[char] = &[
    '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$', '\\',
];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    // An expression list is `term (SP term)*` with `or` splitting the list
    // into alternation groups. Adjacent terms inside a group conjoin.
    // `case:` and `type:` are collected while scanning and applied once the
    // list is complete.
    fn parse_expr_list(&mut self, in_group: bool) -> Result<Query, QueryError> {
        let mut groups: Vec<Vec<Item>> = vec![Vec::new()];
        let mut case_setting = None;
        let mut wrap_type = None;

        loop {
            self.skip_ws();
            if self.eof() || (in_group && self.peek_char() == Some(')')) {
                break;
            }
            if self.at_or_keyword() {
                if groups.last().map(Vec::is_empty).unwrap_or(true) {
                    return Err(self.error("expected a term before 'or'").into());
                }
                self.pos += 2;
                groups.push(Vec::new());
                continue;
            }
            match self.parse_term()? {
                Parsed::Item(item) => groups.last_mut().expect("non-empty").push(item),
                Parsed::Case(setting) => case_setting = Some(setting),
                Parsed::TypeSet(kind) => wrap_type = Some(kind),
            }
        }

        if groups.len() > 1 && groups.last().map(Vec::is_empty).unwrap_or(false) {
            return Err(self.error("expected a term after 'or'").into());
        }

        for group in &mut groups {
            for item in group.iter_mut().filter(|item| item.case_pending) {
                resolve_case(&mut item.query, case_setting.unwrap_or(CaseSetting::Auto));
            }
        }
        if case_setting == Some(CaseSetting::Yes) {
            for group in &groups {
                for item in group.iter().filter(|item| item.case_pending) {
                    check_short_case_atoms(&item.query)?;
                }
            }
        }

        let mut alternatives: Vec<Query> = groups
            .into_iter()
            .map(|group| {
                let mut children: Vec<Query> = group.into_iter().map(|item| item.query).collect();
                match children.len() {
                    0 => Query::Const(true),
                    1 => children.pop().expect("len checked"),
                    _ => Query::And(children),
                }
            })
            .collect();
        let mut query = if alternatives.len() == 1 {
            alternatives.pop().expect("len checked")
        } else {
            Query::Or(alternatives)
        };

        if let Some(kind) = wrap_type {
            query = Query::Type {
                kind,
                child: Box::new(query),
            };
        }
        Ok(query)
    }

    fn parse_term(&mut self) -> Result<Parsed, QueryError> {
        match self.peek_char() {
            Some('-') => {
                self.advance_char();
                if self.eof() || self.peek_char().is_some_and(|c| c.is_whitespace()) {
                    return Err(self.error("expected a term after '-'").into());
                }
                match self.parse_term()? {
                    Parsed::Item(item) => Ok(Parsed::Item(Item {
                        query: Query::Not(Box::new(item.query)),
                        case_pending: item.case_pending,
                    })),
                    Parsed::Case(_) | Parsed::TypeSet(_) => {
                        Err(self.error("cannot negate a query setting").into())
                    }
                }
            }
            Some('(') => self.parse_paren(),
            Some('"') => {
                let text = self.parse_quoted()?;
                Ok(Parsed::Item(Item {
                    query: Query::Substring(Substring::new(text)),
                    case_pending: true,
                }))
            }
            Some(')') => Err(self.error("unexpected ')'").into()),
            _ => self.parse_word(),
        }
    }

    // A leading '(' is either a grouped subexpression or the start of a
    // regex token. Parens whose body contains unescaped whitespace group;
    // otherwise the parenthesized run (and anything glued to it, e.g.
    // `(abc)(de)` or `(abc)de`) is a single regex token.
    fn parse_paren(&mut self) -> Result<Parsed, QueryError> {
        let start = self.pos;
        let Some(inner_has_ws) = self.scan_balanced(start) else {
            return Err(ParseError {
                message: "missing ')'".into(),
                position: start,
            }
            .into());
        };

        if inner_has_ws {
            self.advance_char(); // consume '('
            let query = self.parse_expr_list(true)?;
            self.skip_ws();
            if self.peek_char() != Some(')') {
                return Err(self.error("missing ')'").into());
            }
            self.advance_char();
            return Ok(Parsed::Item(Item {
                query,
                case_pending: false,
            }));
        }

        // No whitespace inside: regex token. Glue on any adjacent
        // non-whitespace tail so `(abc)(de)` stays one pattern.
        let raw = self.scan_bareword()?;
        let atom = classify_regex_text(&raw, false, false).map_err(|message| ParseError {
            message,
            position: start,
        })?;
        Ok(Parsed::Item(Item {
            query: atom,
            case_pending: true,
        }))
    }

    // Scans the balanced parenthesized region starting at `open`. Returns
    // whether the body contains unescaped whitespace (at any depth), or
    // None when the region never closes.
    fn scan_balanced(&self, open: usize) -> Option<bool> {
        let bytes = self.input.as_bytes();
        let mut depth = 0usize;
        let mut has_ws = false;
        let mut i = open;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 1,
                b'"' => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != b'"' {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(has_ws);
                    }
                }
                c if c.is_ascii_whitespace() => has_ws = true,
                _ => {}
            }
            i += 1;
        }
        None
    }

    fn parse_word(&mut self) -> Result<Parsed, QueryError> {
        for keyword in KEYWORDS {
            if self.remaining().starts_with(keyword) {
                self.pos += keyword.len();
                return self.parse_keyword(&keyword[..keyword.len() - 1]);
            }
        }

        let raw = self.scan_bareword()?;
        let start = self.pos - raw.len();
        let query = if raw.contains(REGEX_META) {
            classify_regex_text(&raw, false, false).map_err(|message| ParseError {
                message,
                position: start,
            })?
        } else {
            Query::Substring(Substring::new(raw))
        };
        Ok(Parsed::Item(Item {
            query,
            case_pending: true,
        }))
    }

    fn parse_keyword(&mut self, name: &str) -> Result<Parsed, QueryError> {
        match name {
            "case" => {
                let arg = self.parse_plain_argument(name)?;
                match arg.as_str() {
                    "yes" => Ok(Parsed::Case(CaseSetting::Yes)),
                    "no" => Ok(Parsed::Case(CaseSetting::No)),
                    "auto" => Ok(Parsed::Case(CaseSetting::Auto)),
                    other => Err(self
                        .error(format!("unknown case argument {other:?}"))
                        .into()),
                }
            }
            "type" => {
                let arg = self.parse_plain_argument(name)?;
                match arg.as_str() {
                    "repo" => Ok(Parsed::TypeSet(TypeKind::Repo)),
                    other => Err(self
                        .error(format!("unknown type argument {other:?}"))
                        .into()),
                }
            }
            "repo" | "r" => {
                let arg = self.parse_plain_argument("repo")?;
                Ok(Parsed::Item(Item {
                    query: Query::Repo(arg),
                    case_pending: false,
                }))
            }
            "branch" | "b" => {
                let arg = self.parse_plain_argument("branch")?;
                Ok(Parsed::Item(Item {
                    query: Query::Branch(arg),
                    case_pending: false,
                }))
            }
            "lang" => {
                let arg = self.parse_plain_argument("lang")?;
                Ok(Parsed::Item(Item {
                    query: Query::Language(arg.to_ascii_lowercase()),
                    case_pending: false,
                }))
            }
            "file" | "f" => {
                let atom = self.parse_atom_argument("file", true, false)?;
                Ok(Parsed::Item(Item {
                    query: atom,
                    case_pending: true,
                }))
            }
            "content" => {
                let atom = self.parse_atom_argument("content", false, true)?;
                Ok(Parsed::Item(Item {
                    query: atom,
                    case_pending: true,
                }))
            }
            "sym" => {
                let atom = self.parse_atom_argument("sym", false, false)?;
                Ok(Parsed::Item(Item {
                    query: Query::Symbol(Box::new(atom)),
                    case_pending: true,
                }))
            }
            "regex" => {
                let start = self.pos;
                let text = if self.peek_char() == Some('"') {
                    self.parse_quoted()?
                } else {
                    let raw = self.scan_bareword()?;
                    if raw.is_empty() {
                        return Err(self.error("regex: requires a pattern").into());
                    }
                    raw
                };
                let atom = classify_regex_text(&text, false, false).map_err(|message| {
                    ParseError {
                        message,
                        position: start,
                    }
                })?;
                Ok(Parsed::Item(Item {
                    query: atom,
                    case_pending: true,
                }))
            }
            _ => unreachable!("keyword table and dispatch are in sync"),
        }
    }

    // Keyword argument that is taken verbatim (repository names, branch
    // names, languages): quoted or a bareword, no regex interpretation.
    fn parse_plain_argument(&mut self, keyword: &str) -> Result<String, ParseError> {
        if self.peek_char() == Some('"') {
            return self.parse_quoted();
        }
        let raw = self.scan_bareword()?;
        if raw.is_empty() {
            return Err(self.error(format!("{keyword}: requires an argument")));
        }
        Ok(raw)
    }

    // Keyword argument that forms a pattern atom: quoted arguments are
    // always literal, barewords go through regex classification.
    fn parse_atom_argument(
        &mut self,
        keyword: &str,
        file_name: bool,
        content: bool,
    ) -> Result<Query, QueryError> {
        if self.peek_char() == Some('"') {
            let text = self.parse_quoted()?;
            let mut atom = Substring::new(text);
            atom.file_name = file_name;
            atom.content = content;
            return Ok(Query::Substring(atom));
        }
        let start = self.pos;
        let raw = self.scan_bareword()?;
        if raw.is_empty() {
            return Err(self.error(format!("{keyword}: requires an argument")).into());
        }
        if raw.contains(REGEX_META) {
            classify_regex_text(&raw, file_name, content)
                .map_err(|message| {
                    QueryError::Parse(ParseError {
                        message,
                        position: start,
                    })
                })
        } else {
            let mut atom = Substring::new(raw);
            atom.file_name = file_name;
            atom.content = content;
            Ok(Query::Substring(atom))
        }
    }

    // Reads a raw token: everything up to unescaped whitespace or a ')'
    // that does not close a paren opened inside the token itself. Escaped
    // characters are kept verbatim so the regex layer sees them.
    fn scan_bareword(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        let mut depth = 0usize;
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\\' => {
                    if self.pos + 1 >= bytes.len() {
                        return Err(ParseError {
                            message: "trailing '\\'".into(),
                            position: self.pos,
                        });
                    }
                    self.pos += 2;
                }
                b'(' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    self.pos += 1;
                }
                c if c.is_ascii_whitespace() => break,
                _ => self.pos += 1,
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    // Double-quoted literal with backslash escapes; `\x` yields `x` for any
    // character.
    fn parse_quoted(&mut self) -> Result<String, ParseError> {
        let quote_pos = self.pos;
        self.advance_char();
        let mut text = String::new();
        while let Some(ch) = self.peek_char() {
            self.advance_char();
            match ch {
                '"' => return Ok(text),
                '\\' => {
                    let Some(escaped) = self.peek_char() else {
                        return Err(ParseError {
                            message: "trailing '\\'".into(),
                            position: self.pos,
                        });
                    };
                    self.advance_char();
                    text.push(escaped);
                }
                other => text.push(other),
            }
        }
        Err(ParseError {
            message: "missing closing quote".into(),
            position: quote_pos,
        })
    }

    fn at_or_keyword(&self) -> bool {
        let rest = self.remaining();
        rest.starts_with("or")
            && match rest[2..].chars().next() {
                None => true,
                Some(ch) => ch.is_whitespace() || ch == ')',
            }
    }

    fn skip_ws(&mut self) {
        while self.peek_char().is_some_and(|ch| ch.is_whitespace()) {
            self.advance_char();
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance_char(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }
}

/// Parses `text` as a regex, demoting patterns that reduce to a pure
/// literal back to substring atoms.
fn classify_regex_text(text: &str, file_name: bool, content: bool) -> Result<Query, String> {
    let hir = regex_syntax::Parser::new()
        .parse(text)
        .map_err(|err| format!("invalid regex {text:?}: {err}"))?;
    if let Some(literal) = pure_literal(&hir) {
        let mut atom = Substring::new(literal);
        atom.file_name = file_name;
        atom.content = content;
        return Ok(Query::Substring(atom));
    }
    let mut atom = Regexp::new(text);
    atom.file_name = file_name;
    atom.content = content;
    Ok(Query::Regexp(atom))
}

// A literal possibly wrapped in capture groups or concatenations of
// literals; `(abc)` means the same documents as `abc`.
fn pure_literal(hir: &Hir) -> Option<String> {
    match hir.kind() {
        HirKind::Literal(lit) => String::from_utf8(lit.0.to_vec()).ok(),
        HirKind::Capture(cap) => pure_literal(&cap.sub),
        HirKind::Concat(subs) => {
            let mut text = String::new();
            for sub in subs {
                text.push_str(&pure_literal(sub)?);
            }
            Some(text)
        }
        _ => None,
    }
}

fn resolve_case(query: &mut Query, setting: CaseSetting) {
    let decide = |pattern: &str| match setting {
        CaseSetting::Yes => true,
        CaseSetting::No => false,
        CaseSetting::Auto => pattern.chars().any(|c| c.is_ascii_uppercase()),
    };
    match query {
        Query::Substring(s) => s.case_sensitive = decide(&s.pattern),
        Query::Regexp(r) => r.case_sensitive = decide(&r.pattern),
        Query::Not(child) | Query::Symbol(child) => resolve_case(child, setting),
        _ => {}
    }
}

// With an explicit `case:yes` the engine cannot fall back to the
// case-insensitive trigram variants, and patterns under three bytes have no
// trigram at all, so reject them with a hint instead of silently matching
// nothing.
fn check_short_case_atoms(query: &Query) -> Result<(), SuggestError> {
    let mut short: Option<String> = None;
    query.visit_atoms(&mut |atom| {
        let pattern = match atom {
            Query::Substring(s) => &s.pattern,
            Query::Regexp(r) => &r.pattern,
            _ => return,
        };
        if !pattern.is_empty() && pattern.len() < 3 && short.is_none() {
            short = Some(pattern.clone());
        }
    });
    match short {
        Some(pattern) => Err(SuggestError {
            message: format!("pattern {pattern:?} is too short for case-sensitive search"),
            suggestion: "use at least 3 characters or drop case:yes".into(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substr(pattern: &str) -> Query {
        Query::Substring(Substring::new(pattern))
    }

    fn substr_case(pattern: &str) -> Query {
        let mut s = Substring::new(pattern);
        s.case_sensitive = true;
        Query::Substring(s)
    }

    #[test]
    fn empty_input_is_const_true() {
        assert_eq!(parse_query("").unwrap(), Query::Const(true));
        assert_eq!(parse_query("   ").unwrap(), Query::Const(true));
    }

    #[test]
    fn adjacent_terms_conjoin() {
        assert_eq!(
            parse_query("foo bar").unwrap(),
            Query::And(vec![substr("foo"), substr("bar")])
        );
    }

    #[test]
    fn or_splits_alternatives() {
        assert_eq!(
            parse_query("foo or bar").unwrap(),
            Query::Or(vec![substr("foo"), substr("bar")])
        );
        assert_eq!(
            parse_query("a b or c").unwrap(),
            Query::Or(vec![Query::And(vec![substr("a"), substr("b")]), substr("c")])
        );
    }

    #[test]
    fn dash_negates() {
        assert_eq!(
            parse_query("-temp").unwrap(),
            Query::Not(Box::new(substr("temp")))
        );
    }

    #[test]
    fn negated_group() {
        assert_eq!(
            parse_query("-(Path File) Stream").unwrap(),
            Query::And(vec![
                Query::Not(Box::new(Query::And(vec![
                    substr_case("Path"),
                    substr_case("File"),
                ]))),
                substr_case("Stream"),
            ])
        );
    }

    #[test]
    fn quoted_is_always_literal() {
        assert_eq!(parse_query("\"a.*b\"").unwrap(), substr("a.*b"));
        assert_eq!(parse_query(r#""say \"hi\"""#).unwrap(), substr("say \"hi\""));
    }

    #[test]
    fn unterminated_quote_errors() {
        let err = parse_query("\"abc").unwrap_err();
        assert!(matches!(err, QueryError::Parse(e) if e.message.contains("closing quote")));
    }

    #[test]
    fn trailing_backslash_errors() {
        let err = parse_query("abc\\").unwrap_err();
        assert!(matches!(err, QueryError::Parse(e) if e.message.contains("trailing")));
    }

    #[test]
    fn bareword_with_metachars_is_regex() {
        assert!(matches!(
            parse_query("ab.*cd").unwrap(),
            Query::Regexp(r) if r.pattern == "ab.*cd"
        ));
    }

    #[test]
    fn escaped_literal_regex_demotes_to_substring() {
        assert_eq!(parse_query(r"foo\.bar").unwrap(), substr("foo.bar"));
        assert_eq!(parse_query("(abc)").unwrap(), substr("abc"));
    }

    #[test]
    fn grouped_or_with_glued_regex() {
        let q = parse_query("(foo or bar)baz.*bla").unwrap();
        assert_eq!(
            q,
            Query::And(vec![
                Query::Or(vec![substr("foo"), substr("bar")]),
                Query::Regexp(Regexp::new("baz.*bla")),
            ])
        );
    }

    #[test]
    fn adjacent_paren_runs_form_one_regex() {
        assert_eq!(parse_query("(abc)(de)").unwrap(), substr("abcde"));
        assert!(matches!(
            parse_query("(abc|x)(de)").unwrap(),
            Query::Regexp(r) if r.pattern == "(abc|x)(de)"
        ));
    }

    #[test]
    fn unbalanced_parens_error() {
        assert!(parse_query("(foo bar").is_err());
        assert!(parse_query("foo)").is_err());
    }

    #[test]
    fn file_keyword_scopes_atom() {
        let q = parse_query("file:main").unwrap();
        assert!(matches!(q, Query::Substring(s) if s.file_name && !s.content));
        let q = parse_query("f:\\.rs$").unwrap();
        assert!(matches!(q, Query::Regexp(r) if r.file_name));
    }

    #[test]
    fn content_keyword_scopes_atom() {
        let q = parse_query("content:main").unwrap();
        assert!(matches!(q, Query::Substring(s) if s.content && !s.file_name));
    }

    #[test]
    fn repo_and_branch_keywords() {
        assert_eq!(parse_query("repo:linux").unwrap(), Query::Repo("linux".into()));
        assert_eq!(parse_query("r:linux").unwrap(), Query::Repo("linux".into()));
        assert_eq!(
            parse_query("branch:release").unwrap(),
            Query::Branch("release".into())
        );
        assert_eq!(parse_query("b:main").unwrap(), Query::Branch("main".into()));
    }

    #[test]
    fn lang_keyword_lowercases() {
        assert_eq!(parse_query("lang:Rust").unwrap(), Query::Language("rust".into()));
    }

    #[test]
    fn sym_keyword_wraps_atom() {
        let q = parse_query("sym:main").unwrap();
        let Query::Symbol(child) = q else {
            panic!("expected symbol atom");
        };
        assert!(matches!(*child, Query::Substring(s) if s.pattern == "main"));
    }

    #[test]
    fn type_repo_wraps_list() {
        let q = parse_query("type:repo linux").unwrap();
        assert!(matches!(
            q,
            Query::Type {
                kind: TypeKind::Repo,
                ..
            }
        ));
    }

    #[test]
    fn unknown_type_argument_errors() {
        assert!(parse_query("type:orange").is_err());
    }

    #[test]
    fn case_auto_is_the_default() {
        assert_eq!(parse_query("needle").unwrap(), substr("needle"));
        assert_eq!(parse_query("Needle").unwrap(), substr_case("Needle"));
    }

    #[test]
    fn case_yes_applies_to_list() {
        assert_eq!(
            parse_query("case:yes foo bar").unwrap(),
            Query::And(vec![substr_case("foo"), substr_case("bar")])
        );
    }

    #[test]
    fn case_no_disables_sensitivity() {
        assert_eq!(parse_query("case:no Needle").unwrap(), substr("Needle"));
    }

    #[test]
    fn case_applies_to_its_own_list_only() {
        let q = parse_query("case:yes foo (Bar baz)").unwrap();
        assert_eq!(
            q,
            Query::And(vec![
                substr_case("foo"),
                Query::And(vec![substr_case("Bar"), substr("baz")]),
            ])
        );
    }

    #[test]
    fn unknown_case_argument_errors() {
        let err = parse_query("case:maybe foo").unwrap_err();
        assert!(matches!(err, QueryError::Parse(e) if e.message.contains("case argument")));
    }

    #[test]
    fn short_atom_under_case_yes_suggests() {
        let err = parse_query("case:yes ab").unwrap_err();
        assert!(matches!(err, QueryError::Suggest(_)));
    }

    #[test]
    fn regex_keyword_forces_regex_parse() {
        assert!(matches!(
            parse_query("regex:a|b").unwrap(),
            Query::Regexp(r) if r.pattern == "a|b"
        ));
        assert_eq!(parse_query("regex:abc").unwrap(), substr("abc"));
    }

    #[test]
    fn invalid_regex_errors() {
        assert!(parse_query("a[b").is_err());
        assert!(parse_query("regex:(").is_err());
    }

    #[test]
    fn or_without_operand_errors() {
        assert!(parse_query("or foo").is_err());
        assert!(parse_query("foo or").is_err());
    }

    #[test]
    fn keyword_lookalike_stays_text() {
        // Unknown prefixes keep their colon and parse as plain text.
        assert_eq!(parse_query("friend:bob").unwrap(), substr("friend:bob"));
    }
}
