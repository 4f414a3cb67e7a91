//! Application entry point for the `weatherflow` collection pipeline.
//!
//! This binary orchestrates the startup sequence and dispatches one command:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite observation store and applying the schema
//! - Running one cycle, the continuous scheduler, the read API, or a health check
//!
//! # Environment Variables
//! - `OWM_API_KEY` (required for `run-once` / `run-scheduled`) – provider key
//! - `LOCATIONS` (optional) – `;`-separated locations to collect
//! - `DATABASE_URL` (optional) – SQLite URL (default: `sqlite://db/weather.db`)
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Schema setup lives in `schema`, configuration parsing in `config`, route
//! registration in `routes`; this file only wires them together.
use std::{env, io::IsTerminal, net::SocketAddr, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use weatherflow::config::{self, interval_from_hours};
use weatherflow::{routes, AppContext};

// ---

#[derive(Debug, Parser)]
#[command(name = "weatherflow", version, about = "Weather observation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run exactly one collection cycle; exits non-zero if any location failed.
    RunOnce,

    /// Run collection cycles until interrupted.
    RunScheduled {
        /// Override SCHEDULE_INTERVAL_HOURS (fractions allowed).
        #[arg(long)]
        interval_hours: Option<f64>,

        /// Also serve the read API on BIND_ADDR.
        #[arg(long)]
        serve: bool,
    },

    /// Serve the read API only.
    Serve,

    /// Print the health report; exits non-zero if data is not fresh.
    HealthCheck,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    info!("Starting weatherflow with command: {:?}", cli.command);

    let mut cfg = config::load_from_env()?;
    if let Command::RunScheduled {
        interval_hours: Some(hours),
        ..
    } = cli.command
    {
        cfg.schedule_interval = interval_from_hours(hours)?;
    }
    if matches!(cli.command, Command::RunOnce | Command::RunScheduled { .. }) {
        cfg.require_api_key()?;
    }
    cfg.log_config();

    let ctx = AppContext::init(cfg)
        .await
        .context("Failed to open observation store")?;

    let result = match cli.command {
        Command::RunOnce => run_once(&ctx).await,
        Command::RunScheduled { serve, .. } => run_scheduled(&ctx, serve).await,
        Command::Serve => serve_only(&ctx).await,
        Command::HealthCheck => health_check(&ctx).await,
    };

    ctx.shutdown().await;
    result
}

// ---

async fn run_once(ctx: &AppContext) -> Result<ExitCode> {
    // ---
    let scheduler = ctx.scheduler()?;
    let report = scheduler.run_once().await;
    print!("{report}");

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_scheduled(ctx: &AppContext, serve: bool) -> Result<ExitCode> {
    // ---
    let scheduler = ctx.scheduler()?;

    // Bind before the first cycle so a taken port stops the process at startup.
    let listener = if serve {
        Some(bind_api(ctx.config.bind_addr).await?)
    } else {
        None
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let server = listener.map(|listener| {
        tokio::spawn(routes::serve(listener, ctx.api_state(), stop_rx.clone()))
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    scheduler.run_scheduled(stop_rx).await;

    if let Some(server) = server {
        server
            .await
            .context("API server task panicked")?
            .context("API server failed")?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve_only(ctx: &AppContext) -> Result<ExitCode> {
    // ---
    let listener = bind_api(ctx.config.bind_addr).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    routes::serve(listener, ctx.api_state(), stop_rx)
        .await
        .context("API server failed")?;
    Ok(ExitCode::SUCCESS)
}

async fn health_check(ctx: &AppContext) -> Result<ExitCode> {
    // ---
    let report = ctx.health().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.fresh {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn bind_api(addr: SocketAddr) -> Result<TcpListener> {
    // ---
    routes::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, finishing the current cycle before exit"),
        () = terminate => info!("Received SIGTERM, finishing the current cycle before exit"),
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `LOG_LEVEL`
///
/// Logs go to stderr so command output on stdout stays machine readable.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL")
            .ok()
            .map(|l| l.to_lowercase())
            .as_deref()
        {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") | Some("warning") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
