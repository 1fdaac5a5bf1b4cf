use shrike_syntax::{Query, Substring, simplify};

// Small deterministic PRNG so failures reproduce without a seed dump.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn random_query(rng: &mut XorShift, depth: usize) -> Query {
    let leaf = depth == 0 || rng.below(4) == 0;
    if leaf {
        match rng.below(4) {
            0 => Query::Const(rng.below(2) == 0),
            1 => Query::Substring(Substring::new("")),
            2 => Query::Branch(String::new()),
            _ => {
                let patterns = ["alpha", "beta", "gamma", "delta", "Epsilon"];
                Query::Substring(Substring::new(
                    patterns[rng.below(patterns.len() as u64) as usize],
                ))
            }
        }
    } else {
        match rng.below(4) {
            0 => {
                let n = rng.below(4) as usize;
                Query::And((0..n).map(|_| random_query(rng, depth - 1)).collect())
            }
            1 => {
                let n = rng.below(4) as usize;
                Query::Or((0..n).map(|_| random_query(rng, depth - 1)).collect())
            }
            2 => {
                let n = 1 + rng.below(3) as usize;
                Query::LineAnd((0..n).map(|_| random_query(rng, depth - 1)).collect())
            }
            _ => Query::Not(Box::new(random_query(rng, depth - 1))),
        }
    }
}

// Canonical form: no Const below the root, no empty or single-child
// And/Or, no same-kind nesting, no Not(Const)/Not(Not(..)).
fn assert_canonical(query: &Query) {
    match query {
        Query::And(children) | Query::LineAnd(children) | Query::Or(children) => {
            assert!(
                children.len() >= 2,
                "degenerate boolean node survived: {query}"
            );
            for child in children {
                assert!(
                    !matches!(child, Query::Const(_)),
                    "constant child survived: {query}"
                );
                match (query, child) {
                    (Query::And(_), Query::And(_))
                    | (Query::LineAnd(_), Query::LineAnd(_))
                    | (Query::Or(_), Query::Or(_)) => panic!("unflattened nesting: {query}"),
                    _ => {}
                }
                assert_canonical(child);
            }
        }
        Query::Not(child) => {
            assert!(
                !matches!(**child, Query::Const(_) | Query::Not(_)),
                "unfolded negation: {query}"
            );
            assert_canonical(child);
        }
        _ => {}
    }
}

#[test]
fn simplify_is_idempotent_on_random_trees() {
    let mut rng = XorShift(0x5eed_cafe_f00d_0001);
    for _ in 0..2000 {
        let query = random_query(&mut rng, 4);
        let once = simplify(query.clone());
        let twice = simplify(once.clone());
        assert_eq!(once, twice, "second pass changed: {query}");
    }
}

#[test]
fn simplify_output_is_canonical() {
    let mut rng = XorShift(0x5eed_cafe_f00d_0002);
    for _ in 0..2000 {
        let query = random_query(&mut rng, 4);
        let simplified = simplify(query);
        assert_canonical(&simplified);
    }
}
