use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame is not valid utf-8: {0}")]
    Utf8(String),
}

/// A stream message that could not be turned into a [`crate::RingEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    #[error("stream framing failed: {0}")]
    Frame(#[from] FrameError),
    #[error("unrecognized stream event: {0}")]
    Decode(String),
}

/// A poll or stats payload that violates the ring's structural invariants.
///
/// Rejection is all-or-nothing: a snapshot that fails any check is never
/// handed to the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSnapshotError {
    #[error("ring payload decode failed: {0}")]
    Decode(String),
    #[error("ring size must be positive, got {size}")]
    NonPositiveSize { size: i64 },
    #[error("node {node_id} sits at position {position}, outside ring of size {ring_size}")]
    PositionOutOfRange {
        node_id: String,
        position: i64,
        ring_size: i64,
    },
    #[error("node {node_id} reports negative {field}: {value}")]
    NegativeCount {
        node_id: String,
        field: &'static str,
        value: i64,
    },
    #[error("node id {node_id} appears more than once")]
    DuplicateNodeId { node_id: String },
    #[error("ring position {position} is claimed by both {first} and {second}")]
    DuplicatePosition {
        position: u64,
        first: String,
        second: String,
    },
}

/// Failure reported by the transport carrying polls and mutation requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("ring service answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Malformed(#[from] MalformedEventError),
    #[error(transparent)]
    InvalidSnapshot(#[from] InvalidSnapshotError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
