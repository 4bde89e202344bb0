//! Ring-state reconciliation for a consistent-hashing key-value service.
//!
//! Two channels describe the ring: a notification stream (`key` and `stats`
//! events, no key enumeration) and an on-demand poll of the full state. Both
//! are turned into [`RingSnapshot`]s and fed to one [`ReconciliationEngine`],
//! which keeps the current view and reports every observed key move as a
//! [`MigrationFact`].

pub mod error;
pub mod event;
pub mod model;
pub mod monitor;
pub mod position;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod wire;

pub use error::{FrameError, InvalidSnapshotError, MalformedEventError, MonitorError, TransportError};
pub use event::{decode_event, KeyStored, RingEvent};
pub use model::{
    CapacityViolation, KeyLocationTable, MigrationFact, NodeView, Provenance, RingSnapshot,
};
pub use monitor::{MigrationPath, RingMonitor, RingUpdate, StreamOutcome};
pub use position::{positions, ring_angle, NodePosition, RingGeometry};
pub use reconcile::{EvictedKey, IngestReport, ReconciliationEngine, TopologyChange};
pub use service::{Mutation, RingService};
pub use snapshot::parse_poll_response;
pub use wire::{
    DecodeReport, Decoded, PollNode, PollResponse, SseFrameDecoder, StatsNode, StatsPayload,
    DEFAULT_MAX_FRAME_BYTES,
};
