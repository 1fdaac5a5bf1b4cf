//! Trigram canonicalization.
//!
//! A trigram is three raw bytes packed little-endian into a `u64` (one byte
//! per position). Trigrams spanning non-ASCII runes are simply the raw
//! bytes, so multi-byte characters index without special cases; case
//! folding is ASCII-only throughout the engine.

pub const NGRAM_SIZE: usize = 3;

pub type Trigram = u64;

pub fn trigram(bytes: &[u8]) -> Trigram {
    debug_assert_eq!(bytes.len(), NGRAM_SIZE);
    u64::from(bytes[0]) | u64::from(bytes[1]) << 8 | u64::from(bytes[2]) << 16
}

pub fn trigram_bytes(t: Trigram) -> [u8; NGRAM_SIZE] {
    [t as u8, (t >> 8) as u8, (t >> 16) as u8]
}

/// Consecutive trigrams of `text` at byte positions `0..=len-3`.
pub fn split_trigrams(text: &[u8]) -> impl Iterator<Item = Trigram> + '_ {
    text.windows(NGRAM_SIZE).map(trigram)
}

/// All ASCII case variants of a trigram, the trigram itself included.
///
/// Each letter position doubles the variant count, so the result holds at
/// most eight entries. Non-letter bytes contribute exactly themselves.
pub fn case_variants(t: Trigram) -> Vec<Trigram> {
    let bytes = trigram_bytes(t);
    let mut variants = vec![0u64];
    for (index, &byte) in bytes.iter().enumerate() {
        let shift = 8 * index as u32;
        let mut next = Vec::with_capacity(variants.len() * 2);
        for prefix in variants {
            next.push(prefix | u64::from(byte.to_ascii_lowercase()) << shift);
            if byte.is_ascii_alphabetic() {
                next.push(prefix | u64::from(byte.to_ascii_uppercase()) << shift);
            }
        }
        variants = next;
    }
    variants
}
