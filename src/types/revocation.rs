//! Revocation List Types
//!
//! Payloads delivered by the revocation list endpoint and the local snapshot
//! they are folded into.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::Fingerprint;

/// One differential entry: fingerprints that left and joined the list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(default)]
    pub removed: Vec<Fingerprint>,
    #[serde(default)]
    pub added: Vec<Fingerprint>,
}

/// Revocation list payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrlPayload {
    /// Complete current list.
    Full { full_set: Vec<Fingerprint> },
    /// Bounded series of changes, newest first.
    Diff {
        diff_set: Vec<DiffEntry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        more: Option<bool>,
    },
    /// Complete list as a bare array.
    Bare(Vec<Fingerprint>),
}

impl TrlPayload {
    /// Parse a payload body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Cursor to resume a differential query from.
    pub fn cursor(&self) -> Option<u64> {
        match self {
            Self::Diff { cursor, .. } => *cursor,
            _ => None,
        }
    }

    /// Whether the server holds further changes beyond this payload.
    pub fn has_more(&self) -> bool {
        matches!(self, Self::Diff { more: Some(true), .. })
    }
}

/// Fingerprints confirmed revoked as of the latest sync point.
#[derive(Clone, Debug, Default)]
pub struct RevocationSnapshot {
    revoked: HashSet<Fingerprint>,
}

impl RevocationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&mut self, revoked: impl IntoIterator<Item = Fingerprint>) {
        self.revoked = revoked.into_iter().collect();
    }

    /// Fold a payload into the snapshot.
    ///
    /// Full payloads replace the snapshot; differential payloads are applied
    /// oldest entry first.
    pub fn apply(&mut self, payload: &TrlPayload) {
        match payload {
            TrlPayload::Full { full_set } | TrlPayload::Bare(full_set) => {
                self.replace(full_set.iter().cloned());
            }
            TrlPayload::Diff { diff_set, .. } => {
                for entry in diff_set.iter().rev() {
                    for fingerprint in &entry.removed {
                        self.revoked.remove(fingerprint);
                    }
                    self.revoked.extend(entry.added.iter().cloned());
                }
            }
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.revoked.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.revoked.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    #[test]
    fn test_parse_full_and_bare() {
        let full = TrlPayload::parse(r#"{"full_set": ["a", "b"]}"#).unwrap();
        assert_eq!(
            full,
            TrlPayload::Full {
                full_set: vec![fp("a"), fp("b")]
            }
        );

        let bare = TrlPayload::parse(r#"["a"]"#).unwrap();
        assert_eq!(bare, TrlPayload::Bare(vec![fp("a")]));
    }

    #[test]
    fn test_parse_diff() {
        let body = r#"{"diff_set": [{"added": ["c"]}, {"removed": ["a"], "added": ["b"]}], "cursor": 7, "more": true}"#;
        let payload = TrlPayload::parse(body).unwrap();
        assert_eq!(payload.cursor(), Some(7));
        assert!(payload.has_more());
    }

    #[test]
    fn test_full_replaces() {
        let mut snapshot = RevocationSnapshot::new();
        snapshot.replace(vec![fp("old")]);
        snapshot.apply(&TrlPayload::Full {
            full_set: vec![fp("new")],
        });
        assert!(!snapshot.contains(&fp("old")));
        assert!(snapshot.contains(&fp("new")));
    }

    #[test]
    fn test_diff_applies_oldest_first() {
        let mut snapshot = RevocationSnapshot::new();
        snapshot.replace(vec![fp("a")]);

        // Newest first: "x" was added and then removed again later.
        snapshot.apply(&TrlPayload::Diff {
            diff_set: vec![
                DiffEntry {
                    removed: vec![fp("x")],
                    added: vec![fp("c")],
                },
                DiffEntry {
                    removed: vec![fp("a")],
                    added: vec![fp("x"), fp("b")],
                },
            ],
            cursor: None,
            more: None,
        });

        assert!(!snapshot.contains(&fp("a")));
        assert!(!snapshot.contains(&fp("x")));
        assert!(snapshot.contains(&fp("b")));
        assert!(snapshot.contains(&fp("c")));
        assert_eq!(snapshot.len(), 2);
    }
}
