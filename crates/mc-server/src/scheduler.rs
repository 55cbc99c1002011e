//! Periodic cleanup scheduler.
//!
//! One background task per sweep cadence: routine cleanup, storage report
//! and emergency cleanup. An interval of 0 disables that sweep. All tasks
//! stop when the cancellation token fires; a sweep already running finishes
//! first.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cleanup;
use crate::context::AppContext;

/// Spawn the sweep tasks and, when configured, run the startup sweep.
///
/// Returns the handles of the periodic tasks so callers can await them after
/// cancelling.
pub async fn run_scheduler(ctx: AppContext, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let cfg = ctx.config.cleanup.clone();

    if cfg.run_on_startup {
        tracing::info!("Running startup cleanup");
        run_routine(&ctx).await;
        run_storage_report(&ctx);
    }

    tracing::info!(
        routine_secs = cfg.routine_interval_secs,
        report_secs = cfg.storage_report_interval_secs,
        emergency_secs = cfg.emergency_interval_secs,
        "Cleanup scheduler started"
    );

    let mut handles = Vec::new();

    let c = ctx.clone();
    handles.extend(spawn_periodic(
        "routine cleanup",
        cfg.routine_interval_secs,
        cancel.clone(),
        move || {
            let c = c.clone();
            async move { run_routine(&c).await }
        },
    ));

    let c = ctx.clone();
    handles.extend(spawn_periodic(
        "storage report",
        cfg.storage_report_interval_secs,
        cancel.clone(),
        move || {
            let c = c.clone();
            async move { run_storage_report(&c) }
        },
    ));

    let c = ctx;
    handles.extend(spawn_periodic(
        "emergency cleanup",
        cfg.emergency_interval_secs,
        cancel,
        move || {
            let c = c.clone();
            async move { run_emergency(&c).await }
        },
    ));

    handles
}

async fn run_routine(ctx: &AppContext) {
    if let Err(e) = cleanup::routine_sweep(ctx, Utc::now()).await {
        tracing::error!(error = %e, "Routine cleanup failed");
    }
}

async fn run_emergency(ctx: &AppContext) {
    if let Err(e) = cleanup::emergency_sweep(ctx, Utc::now()).await {
        tracing::error!(error = %e, "Emergency cleanup failed");
    }
}

fn run_storage_report(ctx: &AppContext) {
    if let Err(e) = cleanup::storage_report(ctx, Utc::now()) {
        tracing::error!(error = %e, "Storage report failed");
    }
}

/// Run `task` every `secs` seconds until `cancel` fires. The first run is
/// one full period after start.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    secs: u64,
    cancel: CancellationToken,
    mut task: F,
) -> Option<JoinHandle<()>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if secs == 0 {
        tracing::info!("{name} disabled");
        return None;
    }

    let period = Duration::from_secs(secs);
    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("Running {name}");
                    task().await;
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!("{name} stopped");
    }))
}
