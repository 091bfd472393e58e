//! portal-resilience daemon.
//!
//! ```text
//!     callers ──▶ ResilientStorageFacade ──▶ cache ──▶ breaker(retry(backend))
//!
//!     detectors / admin API
//!         │
//!         ▼
//!     HealthOrchestrator ──▶ ThreatMitigationEngine ──┐
//!         │              └─▶ ErrorCorrectionEngine ───┴─▶ remediation events
//!         └─ periodic health loop
//! ```
//!
//! Runs standalone against the in-memory backend, with the admin API and the
//! periodic health loop. Configuration comes from an optional TOML file that
//! is watched for threat policy changes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use portal_resilience::admin::{self, AdminState};
use portal_resilience::config::{load_config, watcher::ConfigWatcher, ResilienceConfig};
use portal_resilience::lifecycle::{signals::shutdown_on_signal, Components, Shutdown};
use portal_resilience::observability::{logging::init_logging, metrics::init_metrics};
use portal_resilience::storage::InMemoryProvider;

#[derive(Parser)]
#[command(name = "portal-resilience")]
#[command(about = "Resilience core for the services portal", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "PORTAL_RESILIENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?args.config, "portal-resilience starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let components = Components::build(&config, Arc::new(InMemoryProvider::new()));
    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    components.orchestrator.start();

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let threats = components.threats.clone();
            tokio::spawn(async move {
                while let Some(reloaded) = updates.recv().await {
                    threats.update_policy(reloaded.threat);
                }
            });
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let admin_task = if config.admin.enabled {
        let state = AdminState::new(components.orchestrator.clone(), &config.admin.api_key);
        let admin_config = config.admin.clone();
        let admin_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = admin::serve(&admin_config, state, admin_shutdown.clone()).await {
                tracing::error!(error = %e, "Admin API failed");
                admin_shutdown.trigger();
            }
        }))
    } else {
        None
    };

    shutdown.wait().await;
    tracing::info!("Shutting down");

    components.orchestrator.shutdown().await;
    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
