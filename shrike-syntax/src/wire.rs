use std::collections::BTreeMap;
use std::fmt;

const WIRE_VERSION: u8 = 1;

/// Encoding or decoding failure for the repo-branches payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    UnsupportedVersion(u8),
    /// The payload ended before the structure it promised.
    Truncated,
    /// A repository was handed to the encoder without any branch.
    EmptyBranches(String),
    /// More branches than the one-byte count can carry.
    TooManyBranches(String, usize),
    InvalidUtf8,
    TrailingBytes(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnsupportedVersion(version) => {
                write!(f, "unsupported repo-branches payload version {version}")
            }
            WireError::Truncated => write!(f, "repo-branches payload is truncated"),
            WireError::EmptyBranches(repo) => {
                write!(f, "repository {repo:?} has no branches to encode")
            }
            WireError::TooManyBranches(repo, count) => {
                write!(f, "repository {repo:?} has {count} branches, limit is 255")
            }
            WireError::InvalidUtf8 => write!(f, "repo-branches payload contains invalid UTF-8"),
            WireError::TrailingBytes(count) => {
                write!(f, "{count} trailing bytes after repo-branches payload")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// Serializes a per-repository branch restriction for handing between
/// processes. The common `["HEAD"]` restriction is encoded as a branch
/// count of zero.
pub fn encode_repo_branches(map: &BTreeMap<String, Vec<String>>) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(16 + map.len() * 16);
    out.push(WIRE_VERSION);
    put_uvarint(&mut out, map.len() as u64);
    for (repo, branches) in map {
        put_uvarint(&mut out, repo.len() as u64);
        out.extend_from_slice(repo.as_bytes());
        if branches.is_empty() {
            return Err(WireError::EmptyBranches(repo.clone()));
        }
        if branches.len() > 255 {
            return Err(WireError::TooManyBranches(repo.clone(), branches.len()));
        }
        if branches.len() == 1 && branches[0] == "HEAD" {
            out.push(0);
            continue;
        }
        out.push(branches.len() as u8);
        for branch in branches {
            put_uvarint(&mut out, branch.len() as u64);
            out.extend_from_slice(branch.as_bytes());
        }
    }
    Ok(out)
}

/// Inverse of [`encode_repo_branches`]. A branch count of zero decodes to
/// the singleton `["HEAD"]`.
pub fn decode_repo_branches(payload: &[u8]) -> Result<BTreeMap<String, Vec<String>>, WireError> {
    let mut cursor = Cursor { data: payload, pos: 0 };
    let version = cursor.byte()?;
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let count = cursor.uvarint()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let repo = cursor.string()?;
        let branch_count = cursor.byte()?;
        let branches = if branch_count == 0 {
            vec!["HEAD".to_string()]
        } else {
            let mut branches = Vec::with_capacity(branch_count as usize);
            for _ in 0..branch_count {
                branches.push(cursor.string()?);
            }
            branches
        };
        map.insert(repo, branches);
    }
    if cursor.pos != payload.len() {
        return Err(WireError::TrailingBytes(payload.len() - cursor.pos));
    }
    Ok(map)
}

fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn byte(&mut self) -> Result<u8, WireError> {
        let value = *self.data.get(self.pos).ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(value)
    }

    fn uvarint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.byte()?;
            if shift >= 63 && byte > 1 {
                return Err(WireError::Truncated);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn string(&mut self) -> Result<String, WireError> {
        let len = self.uvarint()? as usize;
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        if end > self.data.len() {
            return Err(WireError::Truncated);
        }
        let text = std::str::from_utf8(&self.data[self.pos..end])
            .map_err(|_| WireError::InvalidUtf8)?
            .to_string();
        self.pos = end;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(repo, branches)| {
                (
                    repo.to_string(),
                    branches.iter().map(|b| b.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn round_trip() {
        let input = map(&[
            ("alpha", &["main", "release-1.0"]),
            ("beta", &["trunk"]),
        ]);
        let payload = encode_repo_branches(&input).unwrap();
        assert_eq!(decode_repo_branches(&payload).unwrap(), input);
    }

    #[test]
    fn head_round_trips_through_zero_count() {
        let input = map(&[("alpha", &["HEAD"])]);
        let payload = encode_repo_branches(&input).unwrap();
        // version, count, name length + name, branch count
        assert_eq!(payload.len(), 1 + 1 + 1 + 5 + 1);
        assert_eq!(payload[payload.len() - 1], 0);
        assert_eq!(decode_repo_branches(&payload).unwrap(), input);
    }

    #[test]
    fn empty_branch_list_refuses_to_encode() {
        let input = map(&[("alpha", &[])]);
        assert_eq!(
            encode_repo_branches(&input),
            Err(WireError::EmptyBranches("alpha".into()))
        );
    }

    #[test]
    fn too_many_branches_is_a_hard_error() {
        let branches: Vec<String> = (0..300).map(|i| format!("b{i}")).collect();
        let mut input = BTreeMap::new();
        input.insert("alpha".to_string(), branches);
        assert_eq!(
            encode_repo_branches(&input),
            Err(WireError::TooManyBranches("alpha".into(), 300))
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        let payload = encode_repo_branches(&map(&[("a", &["HEAD"])])).unwrap();
        let mut tampered = payload.clone();
        tampered[0] = 9;
        assert_eq!(
            decode_repo_branches(&tampered),
            Err(WireError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn truncation_is_detected() {
        let payload =
            encode_repo_branches(&map(&[("alpha", &["main", "dev"])])).unwrap();
        for cut in 1..payload.len() {
            assert!(decode_repo_branches(&payload[..cut]).is_err());
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = encode_repo_branches(&map(&[("a", &["HEAD"])])).unwrap();
        payload.push(7);
        assert_eq!(
            decode_repo_branches(&payload),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn empty_map_round_trips() {
        let input = BTreeMap::new();
        let payload = encode_repo_branches(&input).unwrap();
        assert_eq!(payload, vec![WIRE_VERSION, 0]);
        assert_eq!(decode_repo_branches(&payload).unwrap(), input);
    }
}
