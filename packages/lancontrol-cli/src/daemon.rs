//! Background daemon mode for continuous monitoring
//!
//! This module implements a background service that:
//! - Periodically sweeps the configured range for devices
//! - Polls known devices for liveness between sweeps
//! - Samples per-device traffic, when enabled
//! - Prunes old status history and traffic samples once a day
//! - Handles graceful shutdown via SIGTERM/SIGINT
//!
//! The daemon holds the state file lock for its whole run, so CLI commands
//! that write state are refused while it is up.

use crate::persistence::StateFile;
use anyhow::Result;
use lancontrol_core::{Error, MemoryStore, SystemConntrack};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at};

const CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Run the scheduler until a shutdown signal arrives
pub async fn run_daemon(foreground: bool) -> Result<()> {
    let (settings, store, state, _lock) = crate::open_state_for_update()?;
    let monitor = crate::build_monitor(store.clone(), &settings)?;
    let state = Arc::new(state);

    if !foreground {
        // Daemonizing is left to the service manager (systemd, launchd)
        tracing::info!("Running in foreground mode. Use systemd to run as a background service.");
    }

    let auto_scan = settings.auto_scan;
    let sweep_period = Duration::from_secs(settings.scan_interval_secs.max(1));
    let poll_period = Duration::from_secs(settings.status_check_interval_secs.max(1));
    let sample_traffic = settings.traffic_interval_secs > 0;
    let traffic_period = Duration::from_secs(settings.traffic_interval_secs.max(1));

    if auto_scan {
        tracing::info!(
            "Starting daemon: sweeping {} every {}s, polling every {}s",
            settings.scan_range,
            sweep_period.as_secs(),
            poll_period.as_secs()
        );
    } else {
        tracing::info!("Starting daemon with automatic scanning disabled; only cleanup will run");
    }

    // The first sweep runs immediately; poll and cleanup wait one period
    let mut sweep_timer = interval(sweep_period);
    let mut poll_timer = interval_at(Instant::now() + poll_period, poll_period);
    let mut traffic_timer = interval(traffic_period);
    let mut cleanup_timer = interval_at(Instant::now() + CLEANUP_PERIOD, CLEANUP_PERIOD);
    for timer in [
        &mut sweep_timer,
        &mut poll_timer,
        &mut traffic_timer,
        &mut cleanup_timer,
    ] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = sweep_timer.tick(), if auto_scan => {
                match monitor.trigger_sweep(&settings.scan_range) {
                    Ok(sweep) => {
                        spawn_job("sweep", &store, &state, async move {
                            let summary = sweep.await??;
                            Ok::<_, anyhow::Error>(format!(
                                "{} devices, {} new",
                                summary.discovered, summary.created
                            ))
                        });
                    }
                    Err(Error::ScanInProgress) => {
                        tracing::info!("Previous sweep still running, skipping this tick");
                    }
                    Err(e) => tracing::error!("Could not start sweep: {}", e),
                }
            }
            _ = poll_timer.tick(), if auto_scan => {
                let monitor = monitor.clone();
                spawn_job("status poll", &store, &state, async move {
                    monitor
                        .run_poll()
                        .await
                        .map(|summary| format!("{} changed", summary.changed))
                });
            }
            _ = traffic_timer.tick(), if sample_traffic => {
                let monitor = monitor.clone();
                spawn_job("traffic sample", &store, &state, async move {
                    monitor
                        .collect_traffic(Arc::new(SystemConntrack))
                        .await
                        .map(|report| format!("{} devices sampled", report.sampled))
                });
            }
            _ = cleanup_timer.tick() => {
                let monitor = monitor.clone();
                spawn_job("history cleanup", &store, &state, async move {
                    monitor.cleanup_history().await.map(|removed| {
                        format!(
                            "{} status events, {} traffic samples removed",
                            removed.status_events, removed.traffic_samples
                        )
                    })
                });
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping daemon");
                break;
            }
        }
    }

    if let Err(e) = state.save(&store) {
        tracing::error!("Failed to save state on shutdown: {:#}", e);
    }
    tracing::info!("Daemon stopped");
    Ok(())
}

/// Run a job on its own task and persist the store when it finishes, so a
/// slow sweep never delays a poll.
fn spawn_job<F, E>(name: &'static str, store: &Arc<MemoryStore>, state: &Arc<StateFile>, job: F)
where
    F: Future<Output = std::result::Result<String, E>> + Send + 'static,
    E: std::fmt::Display,
{
    let store = store.clone();
    let state = state.clone();
    tokio::spawn(async move {
        match job.await {
            Ok(detail) => tracing::debug!("{} finished: {}", name, detail),
            Err(e) => tracing::error!("{} failed: {}", name, e),
        }
        if let Err(e) = state.save(&store) {
            tracing::error!("Failed to save state after {}: {:#}", name, e);
        }
    });
}

/// Resolves on SIGTERM, SIGINT or Ctrl+C
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C");
}
