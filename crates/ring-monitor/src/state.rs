use crate::transport::StreamMessage;
use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ring_core::{MigrationPath, Mutation, RingMonitor, RingUpdate, StreamOutcome, TransportError};
use std::collections::VecDeque;
use std::time::Duration;

pub const FEED_CAPACITY: usize = 64;
pub const FEED_RETENTION_MS: i64 = 12_000;
pub const MIGRATION_ANIMATION_MS: i64 = 1_500;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Poll,
    Mutate(Mutation),
}

#[derive(Debug)]
pub enum Completion {
    Poll(Result<String, TransportError>),
    Mutation(Mutation, Result<(), TransportError>),
}

impl Completion {
    pub fn failed(request: Request, error: TransportError) -> Self {
        match request {
            Request::Poll => Completion::Poll(Err(error)),
            Request::Mutate(mutation) => Completion::Mutation(mutation, Err(error)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub path: MigrationPath,
    pub observed_at: DateTime<Utc>,
}

impl FeedEntry {
    /// Animation progress in `[0, 1)`, or `None` once the move has landed.
    pub fn progress(&self, now: DateTime<Utc>) -> Option<f64> {
        let elapsed = (now - self.observed_at).num_milliseconds();
        if !(0..MIGRATION_ANIMATION_MS).contains(&elapsed) {
            return None;
        }
        Some(elapsed as f64 / MIGRATION_ANIMATION_MS as f64)
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_seconds().max(0)
    }
}

pub struct App {
    pub base_url: String,
    monitor: RingMonitor,
    view: Option<RingUpdate>,
    feed: VecDeque<FeedEntry>,
    selected: Option<String>,
    status_note: Option<String>,
    stream_connected: bool,
    poll_in_flight: bool,
    poll_queued: bool,
    mutation_in_flight: Option<Mutation>,
    last_poll_at: Option<DateTime<Utc>>,
    keys_stored: u64,
    malformed_frames: u64,
    should_quit: bool,
}

impl App {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            monitor: RingMonitor::default(),
            view: None,
            feed: VecDeque::new(),
            selected: None,
            status_note: None,
            stream_connected: false,
            poll_in_flight: false,
            poll_queued: false,
            mutation_in_flight: None,
            last_poll_at: None,
            keys_stored: 0,
            malformed_frames: 0,
            should_quit: false,
        }
    }

    pub fn view(&self) -> Option<&RingUpdate> {
        self.view.as_ref()
    }

    pub fn feed(&self) -> impl DoubleEndedIterator<Item = &FeedEntry> {
        self.feed.iter()
    }

    pub fn selected_node_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn status_note(&self) -> Option<&str> {
        self.status_note.as_deref()
    }

    pub fn stream_connected(&self) -> bool {
        self.stream_connected
    }

    pub fn busy(&self) -> bool {
        self.poll_in_flight || self.mutation_in_flight.is_some()
    }

    pub fn tracked_keys(&self) -> usize {
        self.monitor.key_locations().len()
    }

    pub fn keys_stored(&self) -> u64 {
        self.keys_stored
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn request_quit(&mut self) {
        self.should_quit = true;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Request> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return None;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                None
            }
            KeyCode::Char('r') => Some(Request::Poll),
            KeyCode::Char('a') => Some(Request::Mutate(Mutation::CreateNode)),
            KeyCode::Char('d') => match &self.selected {
                Some(node_id) => Some(Request::Mutate(Mutation::DeleteNode {
                    node_id: node_id.clone(),
                })),
                None => {
                    self.status_note = Some("select a node to delete".to_string());
                    None
                }
            },
            _ => None,
        }
    }

    /// Marks a request as started. Returns false when it should not be sent:
    /// a poll already in flight absorbs the new one (a follow-up is queued),
    /// and only one mutation runs at a time.
    pub fn begin(&mut self, request: &Request) -> bool {
        match request {
            Request::Poll => {
                if self.poll_in_flight {
                    self.poll_queued = true;
                    return false;
                }
                self.poll_in_flight = true;
                true
            }
            Request::Mutate(mutation) => {
                if let Some(pending) = &self.mutation_in_flight {
                    self.status_note = Some(format!("busy: {pending} still pending"));
                    return false;
                }
                self.status_note = Some(format!("{mutation}..."));
                self.mutation_in_flight = Some(mutation.clone());
                true
            }
        }
    }

    /// Applies a finished request. Returns the request that must follow it.
    pub fn apply_completion(
        &mut self,
        completion: Completion,
        now: DateTime<Utc>,
    ) -> Option<Request> {
        match completion {
            Completion::Poll(result) => {
                self.poll_in_flight = false;
                self.last_poll_at = Some(now);
                match self.monitor.handle_poll(result) {
                    Ok(update) => self.accept(update, now),
                    Err(err) => self.status_note = Some(format!("poll failed: {err}")),
                }
                if self.poll_queued {
                    self.poll_queued = false;
                    return Some(Request::Poll);
                }
                None
            }
            Completion::Mutation(mutation, result) => {
                self.mutation_in_flight = None;
                match self.monitor.handle_mutation(&mutation, result) {
                    Ok(()) => {
                        self.status_note = Some(format!("{mutation} accepted"));
                        Some(Request::Poll)
                    }
                    Err(err) => {
                        self.status_note = Some(format!("{mutation} failed: {err}"));
                        None
                    }
                }
            }
        }
    }

    pub fn apply_stream(&mut self, message: StreamMessage, now: DateTime<Utc>) {
        match message {
            StreamMessage::Connected => {
                self.stream_connected = true;
            }
            StreamMessage::Disconnected(reason) => {
                self.stream_connected = false;
                self.status_note = Some(format!("stream lost: {reason}"));
            }
            StreamMessage::Frame(frame) => match self.monitor.handle_stream_frame(&frame) {
                Ok(StreamOutcome::Updated(update)) => self.accept(update, now),
                Ok(StreamOutcome::KeyStored(_)) => self.keys_stored += 1,
                Err(_) => self.malformed_frames += 1,
            },
            StreamMessage::FrameError(error) => {
                self.monitor.handle_frame_error(error);
                self.malformed_frames += 1;
            }
        }
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.feed.front() {
            if (now - entry.observed_at).num_milliseconds() < FEED_RETENTION_MS {
                break;
            }
            self.feed.pop_front();
        }
    }

    pub fn poll_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        if self.poll_in_flight {
            return false;
        }
        match self.last_poll_at {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= interval)
                .unwrap_or(false),
        }
    }

    fn accept(&mut self, update: RingUpdate, now: DateTime<Utc>) {
        for path in &update.migrations {
            self.feed.push_back(FeedEntry {
                path: path.clone(),
                observed_at: now,
            });
        }
        while self.feed.len() > FEED_CAPACITY {
            self.feed.pop_front();
        }
        let selection_gone = self
            .selected
            .as_deref()
            .map(|node_id| !update.snapshot.contains(node_id))
            .unwrap_or(true);
        if selection_gone {
            self.selected = update
                .snapshot
                .nodes()
                .first()
                .map(|node| node.node_id().to_string());
        }
        self.view = Some(update);
    }

    fn move_selection(&mut self, delta: isize) {
        let Some(view) = &self.view else {
            return;
        };
        let nodes = view.snapshot.nodes();
        if nodes.is_empty() {
            self.selected = None;
            return;
        }
        let current = self
            .selected
            .as_deref()
            .and_then(|id| nodes.iter().position(|node| node.node_id() == id));
        let next = match current {
            Some(idx) => (idx as isize + delta).clamp(0, nodes.len() as isize - 1) as usize,
            None => 0,
        };
        self.selected = Some(nodes[next].node_id().to_string());
    }
}
