//! Single-threaded pipeline from raw stream frames and poll bodies to
//! reconciled ring updates.

use crate::error::{FrameError, MalformedEventError, MonitorError, TransportError};
use crate::event::{decode_event, KeyStored, RingEvent};
use crate::model::{KeyLocationTable, MigrationFact, RingSnapshot};
use crate::position::{positions, NodePosition, RingGeometry};
use crate::reconcile::{EvictedKey, ReconciliationEngine, TopologyChange};
use crate::service::{Mutation, RingService};
use crate::snapshot::parse_poll_response;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A migration fact with the coordinates of both ends, when known.
///
/// `from` falls back to the previous snapshot so a key leaving a node that
/// was just removed can still be drawn from where that node used to be.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPath {
    pub fact: MigrationFact,
    pub from: Option<NodePosition>,
    pub to: Option<NodePosition>,
}

/// Everything a presentation layer needs after one successful ingestion.
#[derive(Debug, Clone)]
pub struct RingUpdate {
    pub snapshot: Arc<RingSnapshot>,
    pub positions: BTreeMap<String, NodePosition>,
    pub migrations: Vec<MigrationPath>,
    pub topology: TopologyChange,
    pub evicted: Vec<EvictedKey>,
}

impl RingUpdate {
    pub fn facts(&self) -> impl Iterator<Item = &MigrationFact> {
        self.migrations.iter().map(|path| &path.fact)
    }
}

#[derive(Debug, Clone)]
pub enum StreamOutcome {
    KeyStored(KeyStored),
    Updated(RingUpdate),
}

pub struct RingMonitor {
    engine: ReconciliationEngine,
    geometry: RingGeometry,
}

impl Default for RingMonitor {
    fn default() -> Self {
        Self::new(RingGeometry::default())
    }
}

impl RingMonitor {
    pub fn new(geometry: RingGeometry) -> Self {
        Self {
            engine: ReconciliationEngine::new(),
            geometry,
        }
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn current(&self) -> Option<&Arc<RingSnapshot>> {
        self.engine.current()
    }

    pub fn key_locations(&self) -> &KeyLocationTable {
        self.engine.key_locations()
    }

    pub fn positions(&self) -> Option<BTreeMap<String, NodePosition>> {
        self.engine
            .current()
            .map(|snapshot| positions(snapshot, &self.geometry))
    }

    /// Decodes one stream frame and reconciles it if it carries ring stats.
    ///
    /// A malformed frame or an invalid stats payload is logged and returned
    /// as an error; the current view is left as it was.
    pub fn handle_stream_frame(&mut self, frame: &str) -> Result<StreamOutcome, MonitorError> {
        let event = decode_event(frame).map_err(|err| {
            warn!(event = "ring_stream_malformed", error = %err);
            MonitorError::from(err)
        })?;
        match event {
            RingEvent::KeyStored(stored) => {
                debug!(
                    event = "ring_key_stored",
                    key = stored.key().unwrap_or("?"),
                    node = stored.node().unwrap_or("?")
                );
                Ok(StreamOutcome::KeyStored(stored))
            }
            RingEvent::StatsUpdated(payload) => {
                let snapshot = RingSnapshot::from_stats_event(&payload).map_err(|err| {
                    warn!(event = "ring_snapshot_rejected", provenance = "stats", error = %err);
                    MonitorError::from(err)
                })?;
                Ok(StreamOutcome::Updated(self.apply(snapshot)))
            }
        }
    }

    /// Logs a stream framing failure and wraps it like any malformed event.
    pub fn handle_frame_error(&self, error: FrameError) -> MonitorError {
        warn!(event = "ring_stream_malformed", error = %error);
        MalformedEventError::Frame(error).into()
    }

    /// Reconciles the outcome of a `GET /ring` request.
    pub fn handle_poll(
        &mut self,
        result: Result<String, TransportError>,
    ) -> Result<RingUpdate, MonitorError> {
        let body = result.map_err(|err| {
            warn!(event = "ring_poll_failed", error = %err);
            MonitorError::from(err)
        })?;
        let snapshot = parse_poll_response(&body)
            .and_then(|payload| RingSnapshot::from_poll_response(&payload))
            .map_err(|err| {
                warn!(event = "ring_snapshot_rejected", provenance = "poll", error = %err);
                MonitorError::from(err)
            })?;
        Ok(self.apply(snapshot))
    }

    /// Accepts the outcome of a mutation request. `Ok` means the caller must
    /// poll next; the view only changes once that poll lands.
    pub fn handle_mutation(
        &self,
        mutation: &Mutation,
        result: Result<(), TransportError>,
    ) -> Result<(), MonitorError> {
        match result {
            Ok(()) => {
                info!(event = "ring_mutation_ok", mutation = %mutation);
                Ok(())
            }
            Err(err) => {
                warn!(event = "ring_mutation_failed", mutation = %mutation, error = %err);
                Err(err.into())
            }
        }
    }

    pub fn poll_now<S: RingService + ?Sized>(
        &mut self,
        service: &S,
    ) -> Result<RingUpdate, MonitorError> {
        self.handle_poll(service.fetch_ring())
    }

    /// Sends a mutation and, when it succeeds, polls for the confirmed state.
    pub fn apply_mutation<S: RingService + ?Sized>(
        &mut self,
        service: &S,
        mutation: &Mutation,
    ) -> Result<RingUpdate, MonitorError> {
        self.handle_mutation(mutation, mutation.send(service))?;
        self.poll_now(service)
    }

    fn apply(&mut self, snapshot: RingSnapshot) -> RingUpdate {
        let report = self.engine.reconcile(snapshot);
        let current = positions(&report.snapshot, &self.geometry);
        let previous = report
            .previous
            .as_ref()
            .filter(|_| !report.migrations.is_empty())
            .map(|snapshot| positions(snapshot, &self.geometry))
            .unwrap_or_default();

        let migrations = report
            .migrations
            .into_iter()
            .map(|fact| {
                debug!(
                    event = "ring_key_migrated",
                    key = %fact.key,
                    from = %fact.from,
                    to = %fact.to
                );
                MigrationPath {
                    from: current
                        .get(&fact.from)
                        .or_else(|| previous.get(&fact.from))
                        .copied(),
                    to: current.get(&fact.to).copied(),
                    fact,
                }
            })
            .collect();

        RingUpdate {
            snapshot: report.snapshot,
            positions: current,
            migrations,
            topology: report.topology,
            evicted: report.evicted,
        }
    }
}
