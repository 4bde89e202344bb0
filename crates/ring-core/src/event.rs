use crate::error::MalformedEventError;
use crate::wire::StatsPayload;
use serde::Deserialize;
use serde_json::Value;

/// One typed message from the notification stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RingEvent {
    /// A key was written somewhere on the ring. Informational only.
    #[serde(rename = "key")]
    KeyStored(KeyStored),
    /// Full ring membership and load, without key enumeration.
    #[serde(rename = "stats")]
    StatsUpdated(StatsPayload),
}

impl RingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RingEvent::KeyStored(_) => "key",
            RingEvent::StatsUpdated(_) => "stats",
        }
    }
}

/// Body of a `key` event, kept as the service sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct KeyStored(pub Value);

impl KeyStored {
    pub fn key(&self) -> Option<&str> {
        self.0.get("key").and_then(Value::as_str)
    }

    pub fn node(&self) -> Option<&str> {
        self.0.get("node").and_then(Value::as_str)
    }
}

/// Parses one stream frame. Never touches ring state.
pub fn decode_event(frame: &str) -> Result<RingEvent, MalformedEventError> {
    serde_json::from_str(frame.trim()).map_err(|err| MalformedEventError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_key_and_stats_events() {
        let key = decode_event(
            r#"{"type":"key","data":{"key":"user:42","node":"http://10.0.0.3:8080"}}"#,
        )
        .expect("key event");
        match key {
            RingEvent::KeyStored(stored) => {
                assert_eq!(stored.key(), Some("user:42"));
                assert_eq!(stored.node(), Some("http://10.0.0.3:8080"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let stats = decode_event(
            r#"{"type":"stats","data":{"size":10,"nodes":[{"nodeID":"A","key":3,"slots":4,"filled":1}]}}"#,
        )
        .expect("stats event");
        match stats {
            RingEvent::StatsUpdated(payload) => {
                assert_eq!(payload.size, 10);
                assert_eq!(payload.nodes.len(), 1);
                assert_eq!(payload.nodes[0].node_id, "A");
                assert_eq!(payload.nodes[0].key, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stats_event_ignores_stray_key_enumeration() {
        let event = decode_event(
            r#"{"type":"stats","data":{"size":10,"nodes":[{"nodeID":"A","key":3,"keys":{"k1":"v"}}]}}"#,
        )
        .expect("stats event");
        assert_eq!(event.kind(), "stats");
    }

    #[test]
    fn rejects_unknown_tag_and_mismatched_body() {
        let unknown = decode_event(r#"{"type":"resize","data":{}}"#);
        assert!(matches!(unknown, Err(MalformedEventError::Decode(_))));

        let bad_body = decode_event(r#"{"type":"stats","data":{"nodes":[]}}"#);
        assert!(matches!(bad_body, Err(MalformedEventError::Decode(_))));

        let untagged = decode_event("{}");
        assert!(matches!(untagged, Err(MalformedEventError::Decode(_))));

        let not_json = decode_event("ring updated");
        assert!(matches!(not_json, Err(MalformedEventError::Decode(_))));
    }
}
