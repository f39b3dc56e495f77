use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::db::models::{MatchId, MatchSnapshot, MatchStatus};

/// Authoritative in-memory view of every observed match.
///
/// Writers are serialized by one lock; readers always get owned copies, never
/// references into the map.
#[derive(Clone, Default)]
pub struct MatchStateStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    snapshots: HashMap<MatchId, MatchSnapshot>,
    live: HashSet<MatchId>,
}

/// Per-competition summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompetitionStatus {
    pub competition: String,
    pub total_matches: usize,
    pub live: usize,
    pub scheduled: usize,
    pub finished: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl MatchStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` as the current state of its match.
    ///
    /// Returns `false` (and changes nothing) when the stored snapshot was
    /// observed later than this one.
    pub fn upsert(&self, snapshot: MatchSnapshot) -> bool {
        self.replace(snapshot).is_some()
    }

    /// Compare-and-replace under one write lock.
    ///
    /// `None` when `snapshot` is stale and was dropped, otherwise
    /// `Some(previous)` with whatever it displaced.
    pub fn replace(&self, snapshot: MatchSnapshot) -> Option<Option<MatchSnapshot>> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.snapshots.get(&snapshot.match_id) {
            if existing.observed_at > snapshot.observed_at {
                debug!(
                    "Ignoring out-of-order observation for match {}",
                    snapshot.match_id
                );
                return None;
            }
        }
        if snapshot.status.is_live() {
            inner.live.insert(snapshot.match_id);
        } else {
            inner.live.remove(&snapshot.match_id);
        }
        Some(inner.snapshots.insert(snapshot.match_id, snapshot))
    }

    pub fn get(&self, match_id: MatchId) -> Option<MatchSnapshot> {
        self.inner.read().snapshots.get(&match_id).cloned()
    }

    pub fn is_live(&self, match_id: MatchId) -> bool {
        self.inner.read().live.contains(&match_id)
    }

    /// Currently live matches, ordered by match id.
    pub fn live_matches(&self) -> Vec<MatchSnapshot> {
        let inner = self.inner.read();
        let mut live: Vec<MatchSnapshot> = inner
            .live
            .iter()
            .filter_map(|id| inner.snapshots.get(id).cloned())
            .collect();
        live.sort_by_key(|s| s.match_id);
        live
    }

    /// Every stored snapshot, ordered by match id.
    pub fn all(&self) -> Vec<MatchSnapshot> {
        let mut all: Vec<MatchSnapshot> = self.inner.read().snapshots.values().cloned().collect();
        all.sort_by_key(|s| s.match_id);
        all
    }

    pub fn len(&self) -> usize {
        self.inner.read().snapshots.len()
    }

    pub fn live_count(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn counts_by_status(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read();
        let mut counts = BTreeMap::new();
        for snapshot in inner.snapshots.values() {
            *counts.entry(snapshot.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn competition_status(&self, competition: &str) -> CompetitionStatus {
        let inner = self.inner.read();
        let mut status = CompetitionStatus {
            competition: competition.to_string(),
            ..Default::default()
        };
        for snapshot in inner.snapshots.values().filter(|s| s.competition == competition) {
            status.total_matches += 1;
            match snapshot.status {
                MatchStatus::Live => status.live += 1,
                MatchStatus::Scheduled => status.scheduled += 1,
                MatchStatus::Finished => status.finished += 1,
                _ => {}
            }
            *status
                .by_status
                .entry(snapshot.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        status
    }
}
