//! Payload contracts of the ring service and the event-stream framing.

use crate::error::FrameError;
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fmt;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Room an unterminated line may take beyond the frame limit: the `data: `
/// field prefix and a trailing `\r`.
const LINE_OVERHEAD_BYTES: usize = "data: ".len() + 1;

/// Body of `GET /ring`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PollResponse {
    pub size: i64,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub nodes: Vec<PollNode>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PollNode {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    /// Ring position, named `key` on the wire.
    pub key: i64,
    #[serde(default)]
    pub slots: i64,
    #[serde(default)]
    pub filled: i64,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default, deserialize_with = "deserialize_key_set")]
    pub keys: Option<BTreeSet<String>>,
}

/// Body of a `stats` stream event.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StatsPayload {
    pub size: i64,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub nodes: Vec<StatsNode>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StatsNode {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub key: i64,
    #[serde(default)]
    pub slots: i64,
    #[serde(default)]
    pub filled: i64,
    #[serde(default)]
    pub addr: Option<String>,
}

/// The service encodes an empty node list as `null`.
fn deserialize_nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a `key -> value` mapping keeping only the keys. `null` and a
/// missing field both mean "no information".
fn deserialize_key_set<'de, D>(deserializer: D) -> Result<Option<BTreeSet<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct KeySetVisitor;

    impl<'de> Visitor<'de> for KeySetVisitor {
        type Value = Option<BTreeSet<String>>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a mapping of key to value, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_map(self)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut keys = BTreeSet::new();
            while let Some(key) = map.next_key::<String>()? {
                map.next_value::<IgnoredAny>()?;
                keys.insert(key);
            }
            Ok(Some(keys))
        }
    }

    deserializer.deserialize_option(KeySetVisitor)
}

/// One outcome of framing, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(String),
    Error(FrameError),
}

#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub items: Vec<Decoded>,
}

impl DecodeReport {
    pub fn frames(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Decoded::Frame(frame) => Some(frame.as_str()),
                Decoded::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&FrameError> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Decoded::Error(error) => Some(error),
                Decoded::Frame(_) => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push_frame(&mut self, frame: String) {
        self.items.push(Decoded::Frame(frame));
    }

    fn push_error(&mut self, error: FrameError) {
        self.items.push(Decoded::Error(error));
    }
}

impl IntoIterator for DecodeReport {
    type Item = Decoded;
    type IntoIter = std::vec::IntoIter<Decoded>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Each dispatched event yields the concatenation of its `data:` lines.
/// Comments and the `event`, `id` and `retry` fields are skipped. A frame
/// that grows past `max_frame_bytes` is reported and dropped; decoding
/// resumes with the next event.
pub struct SseFrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    data: Option<String>,
    discard_line: bool,
    discard_event: bool,
}

impl SseFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            data: None,
            discard_line: false,
            discard_event: false,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            if std::mem::take(&mut self.discard_line) {
                continue;
            }
            self.process_line(&line, &mut report);
        }

        let line_limit = self.max_frame_bytes.saturating_add(LINE_OVERHEAD_BYTES);
        if self.pending.len() > line_limit {
            report.push_error(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: line_limit,
            });
            self.pending.clear();
            self.discard_line = true;
            self.drop_event();
        }

        report
    }

    /// Flushes a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        let tail = std::mem::take(&mut self.pending);
        if !tail.is_empty() && !std::mem::take(&mut self.discard_line) {
            let mut line = tail;
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.process_line(&line, &mut report);
        }
        self.discard_line = false;
        self.dispatch(&mut report);
        report
    }

    fn process_line(&mut self, line: &[u8], report: &mut DecodeReport) {
        if line.is_empty() {
            self.dispatch(report);
            return;
        }
        if line.starts_with(b":") || self.discard_event {
            return;
        }
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(err) => {
                report.push_error(FrameError::Utf8(err.to_string()));
                self.drop_event();
                return;
            }
        };
        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text, ""),
        };
        if field != "data" {
            return;
        }

        let data = match self.data.take() {
            Some(mut data) => {
                data.push('\n');
                data.push_str(value);
                data
            }
            None => value.to_string(),
        };
        if data.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedFrame {
                size: data.len(),
                max: self.max_frame_bytes,
            });
            self.drop_event();
            return;
        }
        self.data = Some(data);
    }

    fn dispatch(&mut self, report: &mut DecodeReport) {
        self.discard_event = false;
        if let Some(data) = self.data.take() {
            if !data.is_empty() {
                report.push_frame(data);
            }
        }
    }

    fn drop_event(&mut self) {
        self.data = None;
        self.discard_event = true;
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn poll_response_keeps_key_names_and_tells_absent_from_empty() {
        let payload: PollResponse = serde_json::from_value(json!({
            "size": 10,
            "nodes": [
                {"nodeID": "A", "addr": "http://10.0.0.2:8080", "key": 0, "slots": 4, "filled": 2,
                 "keys": {"k2": "v2", "k1": "v1"}},
                {"nodeID": "B", "key": 5, "slots": 4, "filled": 0, "keys": {}},
                {"nodeID": "C", "key": 7, "keys": null},
                {"nodeID": "D", "key": 8}
            ]
        }))
        .expect("parse poll");

        let keys: Vec<_> = payload.nodes[0]
            .keys
            .as_ref()
            .expect("keys present")
            .iter()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(payload.nodes[1].keys, Some(BTreeSet::new()));
        assert_eq!(payload.nodes[2].keys, None);
        assert_eq!(payload.nodes[3].keys, None);
        assert_eq!(payload.nodes[3].slots, 0);
        assert_eq!(payload.nodes[0].addr.as_deref(), Some("http://10.0.0.2:8080"));
    }

    #[test]
    fn null_node_list_reads_as_empty_ring() {
        let payload: PollResponse =
            serde_json::from_str(r#"{"size": 64, "nodes": null}"#).expect("parse poll");
        assert!(payload.nodes.is_empty());
    }

    #[test]
    fn sse_decoder_joins_data_lines_across_chunks() {
        let mut decoder = SseFrameDecoder::default();
        let first = decoder.push_chunk(b": keep-alive\n\ndata: {\"type\":");
        assert!(first.is_empty());

        let second = decoder.push_chunk(b"\"key\"}\r\n\r\nevent: x\ndata: a\ndata: b\n\n");
        assert_eq!(
            second.frames(),
            vec!["{\"type\":\"key\"}", "a\nb"]
        );
    }

    #[test]
    fn sse_decoder_drops_oversized_event_and_continues() {
        let mut decoder = SseFrameDecoder::new(16);
        let mut chunk = format!("data: {}\n\n", "x".repeat(32)).into_bytes();
        chunk.extend_from_slice(b"data: ok\n\n");

        let report = decoder.push_chunk(&chunk);

        assert_eq!(report.frames(), vec!["ok"]);
        assert_eq!(report.errors().len(), 1);
        assert!(matches!(
            report.errors()[0],
            FrameError::OversizedBuffer { .. } | FrameError::OversizedFrame { .. }
        ));
    }

    #[test]
    fn sse_decoder_discards_rest_of_an_overflowing_line() {
        let mut decoder = SseFrameDecoder::new(8);
        let report = decoder.push_chunk(b"data: 0123456789");
        assert!(matches!(
            report.errors().as_slice(),
            [FrameError::OversizedBuffer { .. }]
        ));

        let report = decoder.push_chunk(b"abc\n\ndata: next\n\n");
        assert_eq!(report.frames(), vec!["next"]);
        assert!(report.errors().is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseFrameDecoder::default();
        assert!(decoder.push_chunk(b"data: tail").is_empty());
        assert_eq!(decoder.finish().frames(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn frame_at_limit_survives_a_split_before_its_newline() {
        let mut whole = SseFrameDecoder::new(8);
        let report = whole.push_chunk(b"data: 12345678\n\n");
        assert_eq!(report.frames(), vec!["12345678"]);
        assert!(report.errors().is_empty());

        let mut split = SseFrameDecoder::new(8);
        assert!(split.push_chunk(b"data: 12345678").is_empty());
        let report = split.push_chunk(b"\n\n");
        assert_eq!(report.frames(), vec!["12345678"]);
        assert!(report.errors().is_empty());

        let mut crlf = SseFrameDecoder::new(8);
        assert!(crlf.push_chunk(b"data: 12345678\r").is_empty());
        assert_eq!(crlf.push_chunk(b"\n\r\n").frames(), vec!["12345678"]);
    }

    #[test]
    fn report_keeps_frames_and_errors_in_stream_order() {
        let mut decoder = SseFrameDecoder::new(4);
        let report = decoder.push_chunk(b"data: a\n\ndata: toolong\n\ndata: b\n\n");
        assert_eq!(
            report.items,
            vec![
                Decoded::Frame("a".to_string()),
                Decoded::Error(FrameError::OversizedFrame { size: 7, max: 4 }),
                Decoded::Frame("b".to_string()),
            ]
        );
    }
}
