use ring_core::{DecodeReport, Decoded, FrameError, RingService, SseFrameDecoder, TransportError};
use std::{io::Read, thread, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// What the stream reader thread hands to the UI loop.
#[derive(Debug)]
pub enum StreamMessage {
    Connected,
    Frame(String),
    FrameError(FrameError),
    Disconnected(String),
}

/// `RingService` over plain HTTP.
pub struct HttpRingService {
    base_url: Url,
    agent: ureq::Agent,
}

impl HttpRingService {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            agent: build_agent(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Request(err.to_string()))
    }
}

impl RingService for HttpRingService {
    fn fetch_ring(&self) -> Result<String, TransportError> {
        let url = self.endpoint("ring")?;
        self.agent
            .get(url.as_str())
            .call()
            .map_err(transport_error)?
            .into_string()
            .map_err(|err| TransportError::Request(err.to_string()))
    }

    fn create_node(&self) -> Result<(), TransportError> {
        let url = self.endpoint("nodes")?;
        let body = self
            .agent
            .post(url.as_str())
            .call()
            .map_err(transport_error)?
            .into_string()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        debug!(event = "ring_node_created", response = %body.trim());
        Ok(())
    }

    fn delete_node(&self, node_id: &str) -> Result<(), TransportError> {
        let mut url = self.endpoint("nodes")?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Request(format!("cannot extend url {}", self.base_url)))?
            .pop_if_empty()
            .push(node_id);
        self.agent
            .delete(url.as_str())
            .call()
            .map_err(transport_error)?;
        Ok(())
    }
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .build()
}

fn transport_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(status, response) => TransportError::Status {
            status,
            body: response.into_string().unwrap_or_default().trim().to_string(),
        },
        ureq::Error::Transport(transport) => TransportError::Request(transport.to_string()),
    }
}

enum StreamEnd {
    Closed,
    ReceiverGone,
}

/// Starts the `/events` reader on its own thread. It reconnects with backoff
/// until the receiving side is dropped.
pub fn spawn_stream_reader(
    base_url: Url,
    max_frame_bytes: usize,
    tx: mpsc::Sender<StreamMessage>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("ring-events".to_string())
        .spawn(move || stream_loop(base_url, max_frame_bytes, tx))
}

fn stream_loop(base_url: Url, max_frame_bytes: usize, tx: mpsc::Sender<StreamMessage>) {
    let agent = build_agent();
    let url = match base_url.join("events") {
        Ok(url) => url,
        Err(err) => {
            let _ = tx.blocking_send(StreamMessage::Disconnected(err.to_string()));
            return;
        }
    };
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let reason = match read_stream(&agent, &url, max_frame_bytes, &tx, &mut backoff) {
            Ok(StreamEnd::ReceiverGone) => return,
            Ok(StreamEnd::Closed) => "stream closed by server".to_string(),
            Err(err) => err.to_string(),
        };
        warn!(
            event = "ring_stream_disconnected",
            reason = %reason,
            retry_ms = backoff.as_millis() as u64
        );
        if tx.blocking_send(StreamMessage::Disconnected(reason)).is_err() {
            return;
        }
        thread::sleep(backoff);
        backoff = next_backoff(backoff);
    }
}

fn read_stream(
    agent: &ureq::Agent,
    url: &Url,
    max_frame_bytes: usize,
    tx: &mpsc::Sender<StreamMessage>,
    backoff: &mut Duration,
) -> Result<StreamEnd, TransportError> {
    let response = agent
        .get(url.as_str())
        .set("Accept", "text/event-stream")
        .call()
        .map_err(transport_error)?;
    *backoff = INITIAL_BACKOFF;
    info!(event = "ring_stream_connected", url = %url);
    if tx.blocking_send(StreamMessage::Connected).is_err() {
        return Ok(StreamEnd::ReceiverGone);
    }

    let mut reader = response.into_reader();
    let mut decoder = SseFrameDecoder::new(max_frame_bytes);
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|err| TransportError::Request(err.to_string()))?;
        if read == 0 {
            if !forward(decoder.finish(), tx) {
                return Ok(StreamEnd::ReceiverGone);
            }
            return Ok(StreamEnd::Closed);
        }
        if !forward(decoder.push_chunk(&buf[..read]), tx) {
            return Ok(StreamEnd::ReceiverGone);
        }
    }
}

/// Sends frames and framing errors in the order they appeared on the wire.
fn forward(report: DecodeReport, tx: &mpsc::Sender<StreamMessage>) -> bool {
    report.into_iter().all(|item| {
        let message = match item {
            Decoded::Frame(frame) => StreamMessage::Frame(frame),
            Decoded::Error(error) => StreamMessage::FrameError(error),
        };
        tx.blocking_send(message).is_ok()
    })
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > MAX_BACKOFF {
        MAX_BACKOFF
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(1));
        assert_eq!(next_backoff(Duration::from_secs(8)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }

    #[test]
    fn endpoints_resolve_under_base_path() {
        let service = HttpRingService::new(Url::parse("http://ring.local/api/").expect("url"));
        assert_eq!(
            service.endpoint("ring").expect("ring").as_str(),
            "http://ring.local/api/ring"
        );
    }

    #[test]
    fn forward_stops_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let report = DecodeReport {
            items: vec![Decoded::Frame("{}".to_string())],
        };
        assert!(!forward(report, &tx));
    }

    #[test]
    fn forward_keeps_stream_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let report = DecodeReport {
            items: vec![
                Decoded::Frame("first".to_string()),
                Decoded::Error(FrameError::OversizedFrame { size: 10, max: 4 }),
                Decoded::Frame("last".to_string()),
            ],
        };
        assert!(forward(report, &tx));
        assert!(matches!(rx.try_recv(), Ok(StreamMessage::Frame(frame)) if frame == "first"));
        assert!(matches!(rx.try_recv(), Ok(StreamMessage::FrameError(_))));
        assert!(matches!(rx.try_recv(), Ok(StreamMessage::Frame(frame)) if frame == "last"));
        assert!(rx.try_recv().is_err());
    }
}
