//! Outreach Express — campaign batch scheduling and sequence progression
//! engine for email outreach.
//!
//! Main entry point that wires stores and engines together and drives the
//! periodic trigger loops.

use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use outreach_core::config::AppConfig;
use outreach_core::event_bus::EventSink;
use outreach_core::types::AnalyticsEvent;
use outreach_delivery::{DeliveryWindows, SimulatedSender, SuppressionList};
use outreach_scheduler::{BatchDispatcher, RecoveryJanitor};
use outreach_sequence::SequenceEngine;
use outreach_store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "outreach-express")]
#[command(about = "Campaign batch scheduling and sequence progression engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// Seconds between dispatch ticks (overrides config)
    #[arg(long, env = "OUTREACH__SCHEDULER__DISPATCH_INTERVAL_SECS")]
    dispatch_interval_secs: Option<u64>,

    /// Seconds between sequence ticks (overrides config)
    #[arg(long, env = "OUTREACH__SEQUENCE__TICK_INTERVAL_SECS")]
    sequence_interval_secs: Option<u64>,

    /// Seconds between janitor sweeps (overrides config)
    #[arg(long, env = "OUTREACH__RECOVERY__TICK_INTERVAL_SECS")]
    recovery_interval_secs: Option<u64>,

    /// Seed demo campaigns and contacts on startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Run one tick of each engine and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

/// Routes analytics events into the structured log stream. Production swaps
/// in the warehouse sink.
struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AnalyticsEvent) {
        info!(
            event_type = ?event.event_type,
            campaign_id = ?event.campaign_id,
            contact_id = ?event.contact_id,
            sequence_id = ?event.sequence_id,
            batch_number = ?event.batch_number,
            "analytics event"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outreach_express=info,outreach_scheduler=info,outreach_sequence=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(secs) = cli.dispatch_interval_secs {
        config.scheduler.dispatch_interval_secs = secs;
    }
    if let Some(secs) = cli.sequence_interval_secs {
        config.sequence.tick_interval_secs = secs;
    }
    if let Some(secs) = cli.recovery_interval_secs {
        config.recovery.tick_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        dispatch_interval_secs = config.scheduler.dispatch_interval_secs,
        sequence_interval_secs = config.sequence.tick_interval_secs,
        recovery_interval_secs = config.recovery.tick_interval_secs,
        "Configuration loaded"
    );

    // Shared state and boundary collaborators
    let store = Arc::new(MemoryStore::new());
    let suppression = Arc::new(SuppressionList::new());
    let windows = Arc::new(DeliveryWindows::new());
    let sender = Arc::new(SimulatedSender::new());
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);

    if cli.seed_demo {
        store.seed_demo_data();
    }

    // Engines
    let dispatcher = BatchDispatcher::new(store.clone(), store.clone(), sender)
        .with_event_sink(sink.clone())
        .with_suppression(suppression.clone())
        .with_delivery_windows(windows.clone())
        .with_max_campaigns_per_tick(config.scheduler.max_campaigns_per_tick)
        .with_max_dispatch_attempts(config.scheduler.max_dispatch_attempts);
    let sequences = SequenceEngine::new(store.clone(), store.clone())
        .with_event_sink(sink.clone())
        .with_suppression(suppression)
        .with_delivery_windows(windows)
        .with_max_links_per_tick(config.sequence.max_links_per_tick);
    let janitor = RecoveryJanitor::new(store.clone(), sink.clone())
        .with_stuck_after_minutes(config.recovery.stuck_after_minutes);

    if cli.once {
        let dispatch = dispatcher.run_due_batches(Utc::now());
        info!(
            processed = dispatch.processed,
            sent = dispatch.sent,
            failed = dispatch.failed,
            errors = dispatch.errors.len(),
            "dispatch tick complete"
        );
        let sequence = sequences.run_sequence_tick(Utc::now());
        info!(
            advanced = sequence.advanced,
            completed = sequence.completed,
            exited = sequence.exited,
            errors = sequence.errors.len(),
            "sequence tick complete"
        );
        let recovery = janitor.run_recovery(Utc::now());
        info!(
            examined = recovery.examined,
            recovered = recovery.recovered,
            "recovery sweep complete"
        );
        return Ok(());
    }

    let mut dispatch_tick =
        tokio::time::interval(Duration::from_secs(config.scheduler.dispatch_interval_secs.max(1)));
    let mut sequence_tick =
        tokio::time::interval(Duration::from_secs(config.sequence.tick_interval_secs.max(1)));
    let mut recovery_tick =
        tokio::time::interval(Duration::from_secs(config.recovery.tick_interval_secs.max(1)));

    info!("Trigger loops running; ctrl-c to stop");
    loop {
        tokio::select! {
            _ = dispatch_tick.tick() => {
                let report = dispatcher.run_due_batches(Utc::now());
                if report.processed > 0 || !report.errors.is_empty() {
                    info!(
                        processed = report.processed,
                        sent = report.sent,
                        failed = report.failed,
                        errors = ?report.errors,
                        "dispatch tick"
                    );
                }
            }
            _ = sequence_tick.tick() => {
                let report = sequences.run_sequence_tick(Utc::now());
                if report.advanced + report.completed + report.exited > 0 || !report.errors.is_empty() {
                    info!(
                        advanced = report.advanced,
                        completed = report.completed,
                        exited = report.exited,
                        errors = ?report.errors,
                        "sequence tick"
                    );
                }
            }
            _ = recovery_tick.tick() => {
                let report = janitor.run_recovery(Utc::now());
                if report.recovered > 0 {
                    warn!(recovered = report.recovered, "stuck campaigns recovered");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
