use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Channel a snapshot was observed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// On-demand full-state poll. Nodes may enumerate the keys they hold.
    Poll,
    /// `stats` event from the notification stream. Never carries keys.
    Stats,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Poll => "poll",
            Provenance::Stats => "stats",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub(crate) node_id: String,
    pub(crate) ring_position: u64,
    pub(crate) slot_capacity: u64,
    pub(crate) filled_count: u64,
    pub(crate) addr: Option<String>,
    pub(crate) keys: Option<BTreeSet<String>>,
}

impl NodeView {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ring_position(&self) -> u64 {
        self.ring_position
    }

    pub fn slot_capacity(&self) -> u64 {
        self.slot_capacity
    }

    pub fn filled_count(&self) -> u64 {
        self.filled_count
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// Keys this node reported holding.
    ///
    /// `None` means the source said nothing about keys; `Some` of an empty
    /// set means the node is known to hold none.
    pub fn keys(&self) -> Option<&BTreeSet<String>> {
        self.keys.as_ref()
    }

    /// Fraction of capacity in use, or `None` for a node with no slots.
    pub fn load_ratio(&self) -> Option<f64> {
        if self.slot_capacity == 0 {
            return None;
        }
        Some(self.filled_count as f64 / self.slot_capacity as f64)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.filled_count > self.slot_capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityViolation {
    pub node_id: String,
    pub slot_capacity: u64,
    pub filled_count: u64,
}

/// One consistent-at-a-moment view of ring membership.
///
/// Built only through [`RingSnapshot::from_poll_response`] or
/// [`RingSnapshot::from_stats_event`], which enforce unique node ids, unique
/// positions and positions inside `[0, ring_size)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RingSnapshot {
    pub(crate) ring_size: u64,
    pub(crate) nodes: Vec<NodeView>,
    pub(crate) provenance: Provenance,
    pub(crate) observed_at: DateTime<Utc>,
}

impl RingSnapshot {
    pub fn ring_size(&self) -> u64 {
        self.ring_size
    }

    pub fn nodes(&self) -> &[NodeView] {
        &self.nodes
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node(node_id).is_some()
    }

    pub fn carries_keys(&self) -> bool {
        self.nodes.iter().any(|node| node.keys.is_some())
    }

    pub fn capacity_violations(&self) -> Vec<CapacityViolation> {
        self.nodes
            .iter()
            .filter(|node| node.is_over_capacity())
            .map(|node| CapacityViolation {
                node_id: node.node_id.clone(),
                slot_capacity: node.slot_capacity,
                filled_count: node.filled_count,
            })
            .collect()
    }
}

/// An observed change of owner for a single key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MigrationFact {
    pub key: String,
    pub from: String,
    pub to: String,
}

impl fmt::Display for MigrationFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.key, self.from, self.to)
    }
}

/// Last known owner of every key seen in a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLocationTable {
    owners: BTreeMap<String, String>,
}

impl KeyLocationTable {
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.owners
            .iter()
            .map(|(key, owner)| (key.as_str(), owner.as_str()))
    }

    pub fn keys_owned_by<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.owners
            .iter()
            .filter(move |(_, owner)| owner.as_str() == node_id)
            .map(|(key, _)| key.as_str())
    }

    pub(crate) fn record(&mut self, key: String, owner: String) {
        self.owners.insert(key, owner);
    }

    /// Drops every entry whose owner fails `is_member`, returning the
    /// dropped `(key, owner)` pairs in key order.
    pub(crate) fn evict_unless<F>(&mut self, is_member: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> bool,
    {
        let mut evicted = Vec::new();
        self.owners.retain(|key, owner| {
            if is_member(owner) {
                return true;
            }
            evicted.push((key.clone(), owner.clone()));
            false
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, slots: u64, filled: u64) -> NodeView {
        NodeView {
            node_id: id.to_string(),
            ring_position: 0,
            slot_capacity: slots,
            filled_count: filled,
            addr: None,
            keys: None,
        }
    }

    #[test]
    fn load_ratio_is_absent_for_zero_capacity() {
        assert_eq!(node("a", 0, 0).load_ratio(), None);
        assert_eq!(node("a", 4, 1).load_ratio(), Some(0.25));
    }

    #[test]
    fn capacity_violations_list_overfilled_nodes_only() {
        let snapshot = RingSnapshot {
            ring_size: 10,
            nodes: vec![node("a", 4, 5), node("b", 4, 4)],
            provenance: Provenance::Stats,
            observed_at: Utc::now(),
        };
        assert_eq!(
            snapshot.capacity_violations(),
            vec![CapacityViolation {
                node_id: "a".to_string(),
                slot_capacity: 4,
                filled_count: 5,
            }]
        );
    }

    #[test]
    fn eviction_reports_dropped_entries_in_key_order() {
        let mut table = KeyLocationTable::default();
        table.record("k2".to_string(), "gone".to_string());
        table.record("k1".to_string(), "gone".to_string());
        table.record("k3".to_string(), "kept".to_string());

        let evicted = table.evict_unless(|owner| owner == "kept");

        assert_eq!(
            evicted,
            vec![
                ("k1".to_string(), "gone".to_string()),
                ("k2".to_string(), "gone".to_string()),
            ]
        );
        assert_eq!(table.owner("k3"), Some("kept"));
        assert_eq!(table.keys_owned_by("kept").collect::<Vec<_>>(), vec!["k3"]);
    }
}
