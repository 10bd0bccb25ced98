//! Feed Watch
//!
//! Headless watcher for the halatrans transcript feed. Connects to the
//! transcription service's streaming endpoint and prints the merged view
//! every time it changes.
//!
//! # Usage
//!
//! ```bash
//! # Watch the default endpoint (http://localhost:8000/api/streaming)
//! feed-watch
//!
//! # Another server, JSON snapshots
//! feed-watch --url http://10.0.0.2:8000/api/streaming --json
//!
//! # Exit after the server closes the stream once
//! feed-watch --once
//!
//! # Verbose logging
//! RUST_LOG=feed_core=debug feed-watch
//! ```
//!
//! # Files
//!
//! - Config: `$XDG_CONFIG_HOME/halatrans/feed.toml` (or `--config`)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Stop the feed, flush what is buffered, print the final view

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use feed_core::{
    default_config_path, load_config_from_path, ConfigOverrides, StatsSnapshot, SupervisorState,
    TranscriptFeed, ViewState,
};

/// Decode error rate above which a warning is logged
const DECODE_ERROR_WARN_RATE: f64 = 0.05;

/// Feed Watch - print the live transcript view
#[derive(Parser, Debug)]
#[command(name = "feed-watch")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Streaming endpoint (overrides config file and FEED_URL)
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "FEED_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum time between flushes of one channel, in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Visible transcripts and notes kept
    #[arg(long, value_name = "N")]
    capacity: Option<usize>,

    /// Exit after the first graceful close
    #[arg(long)]
    once: bool,

    /// Print snapshots as JSON lines
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FEED_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.url {
            overrides = overrides.with_url(url.clone());
        }
        if let Some(ms) = self.interval_ms {
            overrides = overrides.with_flush_interval_ms(ms);
        }
        if let Some(capacity) = self.capacity {
            overrides = overrides.with_capacity(capacity);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(format!("feed_watch={level},feed_core={level}"))
        })
        .with_context(|| format!("Invalid log level: {level}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Render the view as plain text
fn render_text(view: &ViewState) -> String {
    let mut out = format!("--- view v{} ---\n", view.version);
    for message in &view.transcripts {
        out.push_str(&format!(
            "[{}] {}: {}",
            message.status, message.id, message.text
        ));
        if let Some(ref translation) = message.translation {
            out.push_str(&format!(" => {translation}"));
        }
        out.push('\n');
    }
    for note in &view.assistant_notes {
        out.push_str(&format!("(assistant) {note}\n"));
    }
    out
}

fn print_view(view: &ViewState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(view).context("Failed to encode view")?);
    } else {
        print!("{}", render_text(view));
    }
    Ok(())
}

/// Log a warning when the decode error rate rises past the threshold
fn check_decode_errors(stats: &StatsSnapshot, last_reported: &mut u64) {
    if stats.decode_errors > *last_reported && stats.decode_error_rate() > DECODE_ERROR_WARN_RATE {
        warn!(
            decode_errors = stats.decode_errors,
            frames_decoded = stats.frames_decoded,
            rate = stats.decode_error_rate(),
            "Feed is sending undecodable frames"
        );
        *last_reported = stats.decode_errors;
    }
}

/// Print the view on every change until shutdown
async fn watch_feed(
    feed: &TranscriptFeed,
    mut changes: watch::Receiver<u64>,
    mut state: watch::Receiver<SupervisorState>,
    args: &Args,
) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut reported_errors = 0;

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(&feed.snapshot(), args.json)?;
                check_decode_errors(&feed.stats(), &mut reported_errors);
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if current.is_terminal() {
                    warn!("Feed stopped on its own");
                    break;
                }
                // Completed may already have turned into Waiting, so ask the counters
                if args.once && feed.stats().graceful_closes > 0 {
                    info!("Server closed the stream, exiting (--once)");
                    break;
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting feed watcher");

    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        url = %config.url,
        source = %config.source(),
        flush_interval = ?config.flush_interval,
        capacity = config.capacity,
        "Configuration loaded"
    );

    let feed = TranscriptFeed::new(config).context("Failed to create feed")?;
    let changes = feed.subscribe();
    let state = feed.subscribe_state();
    feed.start();

    let result = watch_feed(&feed, changes, state, &args).await;

    feed.stop().await;
    print_view(&feed.snapshot(), args.json)?;

    let stats = feed.stats();
    info!(
        sessions = stats.sessions_started,
        frames = stats.frames_decoded,
        decode_errors = stats.decode_errors,
        transport_failures = stats.transport_failures,
        "Feed watcher stopped"
    );

    result
}
