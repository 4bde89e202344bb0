use crate::error::InvalidSnapshotError;
use crate::model::{NodeView, Provenance, RingSnapshot};
use crate::wire::{PollResponse, StatsPayload};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

struct NodeDraft<'a> {
    node_id: &'a str,
    position: i64,
    slots: i64,
    filled: i64,
    addr: Option<&'a str>,
    keys: Option<&'a BTreeSet<String>>,
}

/// Parses a raw `GET /ring` body.
pub fn parse_poll_response(body: &str) -> Result<PollResponse, InvalidSnapshotError> {
    serde_json::from_str(body).map_err(|err| InvalidSnapshotError::Decode(err.to_string()))
}

impl RingSnapshot {
    /// Builds a key-carrying snapshot from a full-state poll.
    pub fn from_poll_response(payload: &PollResponse) -> Result<Self, InvalidSnapshotError> {
        let drafts = payload.nodes.iter().map(|node| NodeDraft {
            node_id: &node.node_id,
            position: node.key,
            slots: node.slots,
            filled: node.filled,
            addr: node.addr.as_deref(),
            keys: node.keys.as_ref(),
        });
        build(payload.size, drafts, Provenance::Poll)
    }

    /// Builds a snapshot from a `stats` event. Key information is left
    /// absent on every node.
    pub fn from_stats_event(payload: &StatsPayload) -> Result<Self, InvalidSnapshotError> {
        let drafts = payload.nodes.iter().map(|node| NodeDraft {
            node_id: &node.node_id,
            position: node.key,
            slots: node.slots,
            filled: node.filled,
            addr: node.addr.as_deref(),
            keys: None,
        });
        build(payload.size, drafts, Provenance::Stats)
    }
}

fn build<'a>(
    size: i64,
    drafts: impl Iterator<Item = NodeDraft<'a>>,
    provenance: Provenance,
) -> Result<RingSnapshot, InvalidSnapshotError> {
    if size <= 0 {
        return Err(InvalidSnapshotError::NonPositiveSize { size });
    }

    let mut nodes = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut seen_positions: HashMap<u64, &str> = HashMap::new();
    for draft in drafts {
        if draft.position < 0 || draft.position >= size {
            return Err(InvalidSnapshotError::PositionOutOfRange {
                node_id: draft.node_id.to_string(),
                position: draft.position,
                ring_size: size,
            });
        }
        let slot_capacity = non_negative(draft.node_id, "slots", draft.slots)?;
        let filled_count = non_negative(draft.node_id, "filled", draft.filled)?;
        if !seen_ids.insert(draft.node_id) {
            return Err(InvalidSnapshotError::DuplicateNodeId {
                node_id: draft.node_id.to_string(),
            });
        }
        let ring_position = draft.position as u64;
        if let Some(first) = seen_positions.insert(ring_position, draft.node_id) {
            return Err(InvalidSnapshotError::DuplicatePosition {
                position: ring_position,
                first: first.to_string(),
                second: draft.node_id.to_string(),
            });
        }
        nodes.push(NodeView {
            node_id: draft.node_id.to_string(),
            ring_position,
            slot_capacity,
            filled_count,
            addr: draft.addr.map(str::to_string),
            keys: draft.keys.cloned(),
        });
    }

    let snapshot = RingSnapshot {
        ring_size: size as u64,
        nodes,
        provenance,
        observed_at: Utc::now(),
    };
    for violation in snapshot.capacity_violations() {
        warn!(
            event = "ring_capacity_violation",
            provenance = %provenance,
            node_id = %violation.node_id,
            slots = violation.slot_capacity,
            filled = violation.filled_count
        );
    }
    Ok(snapshot)
}

fn non_negative(node_id: &str, field: &'static str, value: i64) -> Result<u64, InvalidSnapshotError> {
    u64::try_from(value).map_err(|_| InvalidSnapshotError::NegativeCount {
        node_id: node_id.to_string(),
        field,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poll(value: serde_json::Value) -> PollResponse {
        serde_json::from_value(value).expect("poll payload")
    }

    #[test]
    fn poll_snapshot_carries_keys_per_node() {
        let snapshot = RingSnapshot::from_poll_response(&poll(json!({
            "size": 10,
            "nodes": [
                {"nodeID": "A", "key": 0, "slots": 4, "filled": 2, "keys": {"k1": 1, "k3": 1}},
                {"nodeID": "B", "key": 5, "slots": 4, "filled": 1}
            ]
        })))
        .expect("valid snapshot");

        assert_eq!(snapshot.provenance(), Provenance::Poll);
        assert_eq!(snapshot.ring_size(), 10);
        assert!(snapshot.carries_keys());
        let a = snapshot.node("A").expect("node A");
        assert_eq!(a.keys().map(|keys| keys.len()), Some(2));
        assert_eq!(snapshot.node("B").and_then(|node| node.keys()), None);
    }

    #[test]
    fn stats_snapshot_never_carries_keys() {
        let payload: StatsPayload = serde_json::from_value(json!({
            "size": 10,
            "nodes": [{"nodeID": "A", "key": 9, "slots": 2, "filled": 2}]
        }))
        .expect("stats payload");

        let snapshot = RingSnapshot::from_stats_event(&payload).expect("valid snapshot");

        assert_eq!(snapshot.provenance(), Provenance::Stats);
        assert!(!snapshot.carries_keys());
        assert_eq!(snapshot.nodes()[0].ring_position(), 9);
    }

    #[test]
    fn empty_ring_is_valid() {
        let snapshot =
            RingSnapshot::from_poll_response(&poll(json!({"size": 100, "nodes": []})))
                .expect("empty ring");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn rejects_non_positive_size() {
        let err = RingSnapshot::from_poll_response(&poll(json!({"size": 0, "nodes": []})))
            .expect_err("zero size");
        assert_eq!(err, InvalidSnapshotError::NonPositiveSize { size: 0 });
    }

    #[test]
    fn rejects_position_outside_ring() {
        let err = RingSnapshot::from_poll_response(&poll(json!({
            "size": 10,
            "nodes": [{"nodeID": "A", "key": 10}]
        })))
        .expect_err("position == size");
        assert!(matches!(err, InvalidSnapshotError::PositionOutOfRange { position: 10, .. }));

        let err = RingSnapshot::from_poll_response(&poll(json!({
            "size": 10,
            "nodes": [{"nodeID": "A", "key": -1}]
        })))
        .expect_err("negative position");
        assert!(matches!(err, InvalidSnapshotError::PositionOutOfRange { position: -1, .. }));
    }

    #[test]
    fn rejects_duplicate_ids_and_positions() {
        let err = RingSnapshot::from_poll_response(&poll(json!({
            "size": 100,
            "nodes": [
                {"nodeID": "A", "key": 40},
                {"nodeID": "B", "key": 40}
            ]
        })))
        .expect_err("shared position");
        assert_eq!(
            err,
            InvalidSnapshotError::DuplicatePosition {
                position: 40,
                first: "A".to_string(),
                second: "B".to_string(),
            }
        );

        let err = RingSnapshot::from_poll_response(&poll(json!({
            "size": 100,
            "nodes": [
                {"nodeID": "A", "key": 10},
                {"nodeID": "A", "key": 20}
            ]
        })))
        .expect_err("shared id");
        assert!(matches!(err, InvalidSnapshotError::DuplicateNodeId { .. }));
    }

    #[test]
    fn rejects_negative_counts_but_keeps_overfilled_nodes() {
        let err = RingSnapshot::from_poll_response(&poll(json!({
            "size": 10,
            "nodes": [{"nodeID": "A", "key": 1, "slots": -4}]
        })))
        .expect_err("negative slots");
        assert!(matches!(
            err,
            InvalidSnapshotError::NegativeCount { field: "slots", .. }
        ));

        let snapshot = RingSnapshot::from_poll_response(&poll(json!({
            "size": 10,
            "nodes": [{"nodeID": "A", "key": 1, "slots": 2, "filled": 3}]
        })))
        .expect("overfill is reported, not rejected");
        assert_eq!(snapshot.capacity_violations().len(), 1);
    }

    #[test]
    fn parse_failure_is_an_invalid_snapshot() {
        let err = parse_poll_response("<html>bad gateway</html>").expect_err("not json");
        assert!(matches!(err, InvalidSnapshotError::Decode(_)));
    }
}
