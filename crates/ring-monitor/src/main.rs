mod state;
mod theme;
mod transport;
mod ui;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use ring_core::{RingService, TransportError, DEFAULT_MAX_FRAME_BYTES};
use state::{App, Completion, Request};
use std::{
    fs::OpenOptions,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use transport::HttpRingService;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const TICK_MS: u64 = 100;
const STREAM_QUEUE_CAPACITY: usize = 256;
const COMPLETION_QUEUE_CAPACITY: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "ring-monitor", about = "Live view of a consistent-hashing ring")]
struct Args {
    /// Ring service root; `/ring`, `/events` and `/nodes` are resolved under it.
    #[arg(long, env = "RING_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Poll `/ring` this often in addition to on-demand polls. 0 disables.
    #[arg(long, env = "RING_POLL_INTERVAL_SECS", default_value_t = 0)]
    poll_interval_secs: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
    /// Append logs to this file instead of discarding them.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct Config {
    base_url: Url,
    poll_interval: Option<Duration>,
    max_frame_bytes: usize,
    log_file: Option<PathBuf>,
}

fn load_config() -> Result<Config> {
    let args = Args::parse();
    Ok(Config {
        base_url: resolve_base_url(&args.base_url)?,
        poll_interval: (args.poll_interval_secs > 0)
            .then(|| Duration::from_secs(args.poll_interval_secs)),
        max_frame_bytes: args.max_frame_bytes.max(1),
        log_file: args.log_file,
    })
}

/// Parses the base URL and makes sure relative joins stay under its path.
fn resolve_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw.trim()).with_context(|| format!("invalid base url: {raw}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("RING_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None if stdout_enabled => BoxMakeWriter::new(io::stdout),
        None => BoxMakeWriter::new(io::sink),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config)?;
    info!(
        event = "ring_monitor_start",
        base_url = %config.base_url,
        poll_interval_secs = config.poll_interval.map(|d| d.as_secs()).unwrap_or(0)
    );

    let service = Arc::new(HttpRingService::new(config.base_url.clone()));
    let (stream_tx, stream_rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
    transport::spawn_stream_reader(config.base_url.clone(), config.max_frame_bytes, stream_tx)
        .context("spawn stream reader")?;

    let mut app = App::new(config.base_url.to_string());
    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &config, service, stream_rx).await;
    restore_terminal(&mut terminal)?;

    if let Err(err) = result {
        eprintln!("ring-monitor: {err}");
    }
    info!(event = "ring_monitor_stop");
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    config: &Config,
    service: Arc<HttpRingService>,
    mut stream_rx: mpsc::Receiver<transport::StreamMessage>,
) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::channel(COMPLETION_QUEUE_CAPACITY);
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));

    dispatch(app, &service, &done_tx, Request::Poll);

    loop {
        let now = Utc::now();
        terminal.draw(|f| ui::render(f, app, now))?;

        let mut follow_up = None;
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                app.on_tick(now);
                if let Some(interval) = config.poll_interval {
                    if app.poll_due(now, interval) {
                        follow_up = Some(Request::Poll);
                    }
                }
            }
            Some(message) = stream_rx.recv() => {
                app.apply_stream(message, Utc::now());
            }
            Some(completion) = done_rx.recv() => {
                follow_up = app.apply_completion(completion, Utc::now());
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            follow_up = app.handle_key(key);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => app.request_quit(),
                }
            }
        }

        if let Some(request) = follow_up {
            dispatch(app, &service, &done_tx, request);
        }
        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Runs a ring service call on the blocking pool and reports its outcome on
/// the completion channel.
fn dispatch(
    app: &mut App,
    service: &Arc<HttpRingService>,
    done_tx: &mpsc::Sender<Completion>,
    request: Request,
) {
    if !app.begin(&request) {
        return;
    }
    let service = Arc::clone(service);
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let fallback = request.clone();
        let joined = tokio::task::spawn_blocking(move || match request {
            Request::Poll => Completion::Poll(service.fetch_ring()),
            Request::Mutate(mutation) => {
                let result = mutation.send(service.as_ref());
                Completion::Mutation(mutation, result)
            }
        })
        .await;
        let completion = match joined {
            Ok(completion) => completion,
            Err(err) => {
                warn!(event = "ring_request_aborted", error = %err);
                Completion::failed(fallback, TransportError::Request(err.to_string()))
            }
        };
        let _ = done_tx.send(completion).await;
    });
}
