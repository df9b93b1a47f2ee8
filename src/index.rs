use crate::fingerprint::{Comparator, Score};
use crate::frame::FrameId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How a lookup picks among several entries within the duplicate threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Earliest admitted entry within threshold wins; the scan stops there.
    #[default]
    FirstMatch,
    /// Every entry is scored and the closest one wins. Ties go to the earlier
    /// entry. Changes which entry a duplicate is attributed to.
    BestMatch,
}

/// An admitted frame. Never updated or removed.
#[derive(Debug, Clone)]
pub struct IndexEntry<F> {
    pub position: usize,
    pub key: String,
    pub fingerprint: F,
    pub frame: FrameId,
    pub location: PathBuf,
}

impl<F> IndexEntry<F> {
    pub fn to_ref(&self) -> EntryRef {
        EntryRef {
            position: self.position,
            key: self.key.clone(),
            frame: self.frame.clone(),
            location: self.location.clone(),
        }
    }
}

/// Owned reference to an entry, carried in decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRef {
    pub position: usize,
    pub key: String,
    pub frame: FrameId,
    pub location: PathBuf,
}

#[derive(Debug)]
pub struct Match<'a, F> {
    pub entry: &'a IndexEntry<F>,
    pub score: Score,
}

/// Append-only collection of admitted fingerprints.
///
/// Lookups scan linearly in admission order for both strategies. A bucketed
/// index by hash prefix would cut that for large corpora but is not
/// implemented.
pub struct DuplicateIndex<C: Comparator> {
    comparator: C,
    policy: MatchPolicy,
    entries: Vec<IndexEntry<C::Fingerprint>>,
    by_key: HashMap<String, usize>,
}

impl<C: Comparator> DuplicateIndex<C> {
    pub fn new(comparator: C, policy: MatchPolicy) -> Self {
        Self {
            comparator,
            policy,
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry<C::Fingerprint>] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry<C::Fingerprint>> {
        self.by_key.get(key).map(|&pos| &self.entries[pos])
    }

    /// Find an admitted entry that `fingerprint` duplicates.
    pub fn lookup(&self, fingerprint: &C::Fingerprint) -> Option<Match<'_, C::Fingerprint>> {
        let mut best: Option<Match<'_, C::Fingerprint>> = None;

        for entry in &self.entries {
            let score = self.comparator.score(fingerprint, &entry.fingerprint);
            if !self.comparator.is_duplicate(score) {
                continue;
            }
            match self.policy {
                MatchPolicy::FirstMatch => return Some(Match { entry, score }),
                MatchPolicy::BestMatch => {
                    let closer = best
                        .as_ref()
                        .is_none_or(|current| score.is_closer_than(&current.score));
                    if closer {
                        best = Some(Match { entry, score });
                    }
                }
            }
        }

        best
    }

    /// Append a new entry. A key that is already present returns the existing
    /// entry and the new fingerprint is dropped.
    pub fn admit(
        &mut self,
        key: String,
        fingerprint: C::Fingerprint,
        frame: FrameId,
        location: PathBuf,
    ) -> &IndexEntry<C::Fingerprint> {
        if let Some(&pos) = self.by_key.get(&key) {
            return &self.entries[pos];
        }

        let position = self.entries.len();
        self.by_key.insert(key.clone(), position);
        self.entries.push(IndexEntry {
            position,
            key,
            fingerprint,
            frame,
            location,
        });
        &self.entries[position]
    }
}
