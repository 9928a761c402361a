//! pipescaled — the pipescale daemon.
//!
//! Runs the scaling controller against a telemetry feed:
//! - Policy file (TOML, hot-reloaded between cycles)
//! - Telemetry document (JSON file, re-read every cycle)
//! - Scaling state store (redb, optional)
//! - Status export (JSON + Prometheus text, optional)
//!
//! Decisions go to a dry-run actuator that logs them.
//!
//! # Usage
//!
//! ```text
//! pipescaled run --policy /etc/pipescale/policy.toml \
//!     --telemetry /run/pipescale/telemetry.json \
//!     --data-dir /var/lib/pipescale --status-file /var/lib/pipescale/status.json
//! pipescaled check-policy --policy /etc/pipescale/policy.toml
//! ```

mod actuator;
mod export;
mod file_telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pipescale_controller::{Controller, ControllerEvent, PolicyWatcher};
use pipescale_core::ControllerPolicy;
use pipescale_core::duration::format_duration;
use pipescale_state::StateStore;

use crate::actuator::dry_run_actuator;
use crate::export::run_exporter;
use crate::file_telemetry::FileTelemetry;

const DEFAULT_FILTER: &str = "info,pipescale=debug,pipescaled=debug";

#[derive(Parser)]
#[command(name = "pipescaled", about = "Pipeline observability and scaling controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        /// Controller policy (TOML).
        #[arg(long)]
        policy: PathBuf,

        /// Telemetry document (JSON), rewritten by an exporter.
        #[arg(long)]
        telemetry: PathBuf,

        /// Directory for the scaling state store. State is kept in memory
        /// only when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Write the status report here each cycle (plus `<path>.prom`).
        #[arg(long)]
        status_file: Option<PathBuf>,
    },
    /// Validate a policy file and print the effective policy.
    CheckPolicy {
        #[arg(long)]
        policy: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            policy,
            telemetry,
            data_dir,
            status_file,
        } => run(&policy, &telemetry, data_dir, status_file).await,
        Command::CheckPolicy { policy } => check_policy(&policy),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(
    policy_path: &Path,
    telemetry_path: &Path,
    data_dir: Option<PathBuf>,
    status_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("pipescale daemon starting");

    let (watcher, policy) = PolicyWatcher::open(policy_path)
        .with_context(|| format!("loading policy {}", policy_path.display()))?;
    info!(
        path = %policy_path.display(),
        pools = policy.pools.len(),
        poll_interval = %format_duration(policy.metrics.poll_interval),
        "policy loaded"
    );

    let source = Arc::new(FileTelemetry::new(telemetry_path));
    info!(path = %telemetry_path.display(), "telemetry source configured");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Controller ─────────────────────────────────────────────

    let mut controller = Controller::new(policy, source, dry_run_actuator(), shutdown_rx.clone())
        .with_policy_watcher(watcher);

    if let Some(dir) = &data_dir {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("pipescale.redb");
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        controller = controller.with_store(store);
    }

    let events_handle = tokio::spawn(log_events(controller.subscribe()));

    let export_handle = status_file.map(|path| {
        tokio::spawn(run_exporter(
            controller.status_board(),
            path,
            shutdown_rx.clone(),
        ))
    });

    let controller_handle = tokio::spawn(controller.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    controller_handle.await?;
    if let Some(handle) = export_handle {
        handle.await?;
    }
    // Ends once the controller and its actuation tasks are gone.
    events_handle.await?;

    info!("pipescale daemon stopped");
    Ok(())
}

fn check_policy(path: &Path) -> anyhow::Result<()> {
    let policy = ControllerPolicy::from_file(path)
        .with_context(|| format!("policy {} is invalid", path.display()))?;

    println!("# {} is valid", path.display());
    for pool in &policy.pools {
        println!(
            "# pool {:<16} {}/{}  consumers {}..={}",
            pool.id,
            pool.stream,
            pool.group,
            pool.min(&policy.scaling),
            pool.max(&policy.scaling)
        );
    }
    print!("{}", policy.to_toml_string()?);
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::DecisionCommitted { decision } => info!(
            pool = %decision.pool_id,
            action = decision.action.as_str(),
            target = decision.target_count,
            "decision committed"
        ),
        ControllerEvent::ActuationApplied { pool_id, new_count } => {
            info!(pool = %pool_id, count = new_count, "pool scaled")
        }
        ControllerEvent::ActuationFailed {
            pool_id,
            attempts,
            error,
        } => warn!(pool = %pool_id, attempts, error = %error, "scaling actuation failed"),
        ControllerEvent::PolicyReloaded { pools } => info!(pools, "policy reloaded"),
        ControllerEvent::PolicyRejected { error } => {
            warn!(error = %error, "policy change rejected")
        }
        ControllerEvent::TelemetryUnavailable {
            consecutive_failures,
            reused,
        } => warn!(consecutive_failures, reused, "telemetry unavailable"),
    }
}
