//! chatsense-ingest - Main entry point
//!
//! Runs the ingestion pipeline against a chat event source, takes operator
//! commands from stdin (and optionally HTTP), and shuts down gracefully on
//! `q`, Ctrl+C, or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chatsense_common::config::{
    load_or_default, resolve_config_path, write_toml_config, ReplaySettings, SinkKind, TomlConfig,
};
use chatsense_common::events::{ChatsenseEvent, EventBus};
use chatsense_ingest::classifier::LexiconClassifier;
use chatsense_ingest::console::{self, ConsoleFlow};
use chatsense_ingest::filter::EventFilter;
use chatsense_ingest::source::ReplaySource;
use chatsense_ingest::{
    build_router, AppState, Pipeline, PipelineConfig, SessionConfig, SessionManager,
};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Capacity of the status event bus
const EVENT_BUS_CAPACITY: usize = 1024;

/// How long open HTTP connections (SSE clients) may delay exit
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkArg {
    Csv,
    Sqlite,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Csv => SinkKind::Csv,
            SinkArg::Sqlite => SinkKind::Sqlite,
        }
    }
}

/// Command-line arguments for chatsense-ingest
#[derive(Parser, Debug)]
#[command(name = "chatsense-ingest")]
#[command(about = "Live chat sentiment ingestion")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "CHATSENSE_CONFIG")]
    config: Option<PathBuf>,

    /// Classification log path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Classification log format
    #[arg(long, value_enum)]
    sink: Option<SinkArg>,

    /// Chat capture to replay (CSV: channel,text or channel,author,text)
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Delay between replayed messages
    #[arg(long, default_value = "250")]
    replay_interval_ms: u64,

    /// Start the capture over when it runs out
    #[arg(long)]
    repeat: bool,

    /// Classification workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Channel to join at startup
    #[arg(long)]
    channel: Option<String>,

    /// Enable the HTTP control API
    #[arg(long)]
    http: bool,

    /// HTTP bind address
    #[arg(long, env = "CHATSENSE_BIND")]
    bind: Option<String>,

    /// Shut down when a log write fails permanently
    #[arg(long)]
    halt_on_log_failure: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

impl Args {
    /// CLI values take precedence over environment and file settings
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(path) = &self.output {
            config.sink.path = path.clone();
        }
        if let Some(sink) = self.sink {
            config.sink.kind = sink.into();
        }
        if let Some(path) = &self.replay {
            config.replay = Some(ReplaySettings {
                path: path.clone(),
                interval_ms: self.replay_interval_ms,
                repeat: self.repeat,
            });
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if self.http {
            config.http.enabled = true;
        }
        if let Some(bind) = &self.bind {
            config.http.bind = bind.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Resolve configuration: CLI → ENV → TOML → defaults
    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_or_default(config_path.as_deref()).context("Failed to load config")?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    args.apply(&mut config);

    // Initialize tracing; RUST_LOG wins over the configured level
    let default_filter = format!(
        "chatsense_ingest={level},chatsense_common={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        _ => info!("Configuration: compiled defaults"),
    }

    if let Some(path) = &args.write_default_config {
        write_toml_config(&config, path).context("Failed to write config")?;
        println!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;

    let Some(replay) = config.replay.clone() else {
        bail!(
            "No event source configured; pass --replay <capture.csv> or set [replay] in the config file"
        );
    };

    let run_id = Uuid::new_v4();
    info!(%run_id, "Starting chatsense-ingest v{}", env!("CARGO_PKG_VERSION"));

    // Pipeline
    let sink = chatsense_ingest::sink::open_sink(&config.sink, run_id)
        .await
        .context("Failed to open classification log")?;
    let events = EventBus::new(EVENT_BUS_CAPACITY);
    let pipeline = Arc::new(Pipeline::start(
        PipelineConfig::from(&config.pipeline),
        EventFilter::new(&config.filter),
        Arc::new(LexiconClassifier::new()),
        sink,
        events.clone(),
    ));

    // Event source and session
    let source = Arc::new(
        ReplaySource::load(
            &replay.path,
            Duration::from_millis(replay.interval_ms),
            replay.repeat,
        )
        .with_context(|| format!("Failed to load chat capture {}", replay.path.display()))?,
    );
    info!("Channels in capture: {}", source.channels().join(", "));

    let session = SessionManager::new(
        source.clone(),
        Arc::clone(&pipeline),
        SessionConfig::from(&config.session),
    );
    session
        .connect()
        .await
        .context("Failed to connect to event source")?;

    let shutdown = CancellationToken::new();
    let echo = tokio::spawn(echo_events(events.subscribe()));
    let halt = args
        .halt_on_log_failure
        .then(|| tokio::spawn(halt_on_loss(pipeline.subscribe_losses(), shutdown.clone())));

    let server = if config.http.enabled {
        let app = build_router(AppState::new(session.clone(), run_id));
        let listener = tokio::net::TcpListener::bind(&config.http.bind)
            .await
            .with_context(|| format!("Failed to bind to {}", config.http.bind))?;
        info!("HTTP control API listening on {}", config.http.bind);

        let stop = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
            {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    if let Some(channel) = &args.channel {
        let flow = console::execute(&session, console::ConsoleCommand::Join(channel.clone())).await;
        print_flow(&flow);
    } else {
        println!("Enter a channel name to join (\"help\" for commands).");
    }

    run_console(&session, &shutdown).await;

    // Graceful shutdown: leave + drain, then stop the pipeline
    shutdown.cancel();
    let report = session.shutdown().await;
    source.close();

    if let Some(mut server) = server {
        if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut server).await.is_err() {
            warn!("HTTP connections still open, closing them");
            server.abort();
        }
    }
    echo.abort();
    if let Some(halt) = halt {
        halt.abort();
    }

    if report.forced {
        warn!(
            unfinished = report.stats.unfinished,
            "Shutdown grace period expired; some results were not logged"
        );
    }
    println!(
        "Logged {} result(s), {} lost, {} dropped on overflow.",
        report.stats.persisted,
        report.stats.lost,
        report.stats.dropped_overflow()
    );
    info!("Shutdown complete");
    Ok(())
}

/// Read operator commands until quit, a shutdown signal, or end of input
async fn run_console(session: &SessionManager, shutdown: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Console input closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!("Console read failed: {}", e);
                        break;
                    }
                };

                let flow = match console::parse_command(&line) {
                    Ok(command) => console::execute(session, command).await,
                    Err(e) => ConsoleFlow::Continue(format!("Error: {}", e)),
                };
                print_flow(&flow);
                if matches!(flow, ConsoleFlow::Quit(_)) {
                    break;
                }
            }
        }
    }
}

fn print_flow(flow: &ConsoleFlow) {
    match flow {
        ConsoleFlow::Continue(message) | ConsoleFlow::Quit(message) => println!("{}", message),
    }
}

/// Cancel `shutdown` once any result has been lost to a log write failure
async fn halt_on_loss(mut losses: watch::Receiver<u64>, shutdown: CancellationToken) {
    if losses.wait_for(|lost| *lost > 0).await.is_ok() {
        error!("Classification log write failed permanently, stopping (--halt-on-log-failure)");
        shutdown.cancel();
    }
}

/// Print logged results and session trouble to the console
async fn echo_events(mut rx: tokio::sync::broadcast::Receiver<ChatsenseEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Console echo lagging, events skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            ChatsenseEvent::ResultRecorded {
                source_id,
                text,
                label,
                score,
                latency_ms,
                ..
            } => {
                println!("{}: {}", source_id, text);
                println!(
                    "   {}, Score: {:.3} [{:.2} ms]",
                    label.as_str().to_uppercase(),
                    score,
                    latency_ms
                );
            }
            ChatsenseEvent::DrainTimedOut {
                source_id,
                unfinished,
                ..
            } => {
                println!(
                    "Leaving {} before {} queued message(s) finished",
                    source_id, unfinished
                );
            }
            ChatsenseEvent::PersistenceFailed {
                source_id, error, ..
            } => {
                eprintln!("Failed to write result for {} to the log: {}", source_id, error);
            }
            _ => {}
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
