//! Merges poll and stream snapshots into one view and detects key moves.
//!
//! The engine is the only owner of the current snapshot and of the
//! [`KeyLocationTable`]. Every [`ReconciliationEngine::reconcile`] call runs
//! to completion and swaps state in one step, so callers never observe a
//! half-applied snapshot.

use crate::model::{KeyLocationTable, MigrationFact, Provenance, RingSnapshot};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Membership change between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl TopologyChange {
    pub fn between(previous: Option<&RingSnapshot>, next: &RingSnapshot) -> Self {
        let Some(previous) = previous else {
            return Self {
                joined: next.nodes().iter().map(|n| n.node_id().to_string()).collect(),
                left: Vec::new(),
            };
        };
        let before: HashSet<&str> = previous.nodes().iter().map(|n| n.node_id()).collect();
        let after: HashSet<&str> = next.nodes().iter().map(|n| n.node_id()).collect();
        Self {
            joined: next
                .nodes()
                .iter()
                .map(|n| n.node_id())
                .filter(|id| !before.contains(id))
                .map(str::to_string)
                .collect(),
            left: previous
                .nodes()
                .iter()
                .map(|n| n.node_id())
                .filter(|id| !after.contains(id))
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedKey {
    pub key: String,
    pub last_owner: String,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub provenance: Provenance,
    /// Ownership changes, in candidate-key order.
    pub migrations: Vec<MigrationFact>,
    /// Keys seen for the first time.
    pub arrivals: usize,
    /// Entries dropped because their owner left the ring.
    pub evicted: Vec<EvictedKey>,
    pub topology: TopologyChange,
    /// The snapshot that is now current.
    pub snapshot: Arc<RingSnapshot>,
    /// The snapshot that was current before this one.
    pub previous: Option<Arc<RingSnapshot>>,
}

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    current: Option<Arc<RingSnapshot>>,
    key_locations: KeyLocationTable,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Arc<RingSnapshot>> {
        self.current.as_ref()
    }

    pub fn key_locations(&self) -> &KeyLocationTable {
        &self.key_locations
    }

    /// Replaces the current snapshot and returns the key moves it revealed.
    pub fn ingest(&mut self, snapshot: RingSnapshot) -> Vec<MigrationFact> {
        self.reconcile(snapshot).migrations
    }

    /// Like [`ReconciliationEngine::ingest`], with membership and eviction
    /// details.
    ///
    /// Stats snapshots only replace the current view. Poll snapshots are
    /// diffed key by key against the location table: a key whose owner
    /// changed yields one [`MigrationFact`], a new key is an arrival, and a
    /// key the poll did not enumerate keeps its last owner unless that owner
    /// is no longer a ring member.
    pub fn reconcile(&mut self, snapshot: RingSnapshot) -> IngestReport {
        let topology = TopologyChange::between(self.current.as_deref(), &snapshot);
        let provenance = snapshot.provenance();
        let mut migrations = Vec::new();
        let mut arrivals = 0;
        let mut evicted = Vec::new();

        if provenance == Provenance::Poll {
            let mut merged = self.key_locations.clone();
            for (key, owner) in self.candidate_locations(&snapshot) {
                match self.key_locations.owner(&key) {
                    Some(prior) if prior != owner => migrations.push(MigrationFact {
                        key: key.clone(),
                        from: prior.to_string(),
                        to: owner.clone(),
                    }),
                    Some(_) => {}
                    None => arrivals += 1,
                }
                merged.record(key, owner);
            }
            evicted = merged
                .evict_unless(|owner| snapshot.contains(owner))
                .into_iter()
                .map(|(key, last_owner)| EvictedKey { key, last_owner })
                .collect();
            self.key_locations = merged;
        }

        debug!(
            event = "ring_ingest",
            provenance = %provenance,
            nodes = snapshot.nodes().len(),
            migrations = migrations.len(),
            arrivals,
            evicted = evicted.len(),
            joined = topology.joined.len(),
            left = topology.left.len()
        );

        let snapshot = Arc::new(snapshot);
        let previous = self.current.replace(Arc::clone(&snapshot));
        IngestReport {
            provenance,
            migrations,
            arrivals,
            evicted,
            topology,
            snapshot,
            previous,
        }
    }

    /// Flattens the snapshot's key enumerations into `(key, owner)` pairs in
    /// node order, then key order within a node.
    ///
    /// A key listed by more than one node stays with its recorded owner when
    /// that owner is among them, otherwise it goes to the first listing node.
    fn candidate_locations(&self, snapshot: &RingSnapshot) -> Vec<(String, String)> {
        let mut order: Vec<&str> = Vec::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for node in snapshot.nodes() {
            let Some(keys) = node.keys() else {
                continue;
            };
            for key in keys {
                let Some(first) = owners.get(key.as_str()).copied() else {
                    owners.insert(key, node.node_id());
                    order.push(key);
                    continue;
                };
                warn!(
                    event = "ring_duplicate_key_enumeration",
                    key = %key,
                    first = %first,
                    second = %node.node_id()
                );
                if self.key_locations.owner(key) == Some(node.node_id()) {
                    owners.insert(key, node.node_id());
                }
            }
        }
        order
            .into_iter()
            .filter_map(|key| {
                owners
                    .get(key)
                    .map(|owner| (key.to_string(), owner.to_string()))
            })
            .collect()
    }
}
