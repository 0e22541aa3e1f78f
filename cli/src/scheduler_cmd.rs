use crate::{app::App, config::MerrymakerConfig};
use merrymaker_scheduler::{Scheduler, SchedulerConfig};
use std::time::Duration;
use tokio::sync::watch;

pub async fn run(cfg: &MerrymakerConfig) -> anyhow::Result<()> {
    let app = App::connect(cfg).await?;

    let scheduler = Scheduler::new(
        app.scheduled_tasks,
        app.jobs,
        app.metrics,
        SchedulerConfig {
            tick_interval: Duration::from_secs(cfg.scheduler_interval_secs),
            backfill_limit: cfg.scheduler_backfill_limit,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tracing::info!(event = "merrymaker.scheduler.started", "scheduler started");
    tokio::signal::ctrl_c().await?;
    tracing::info!(event = "merrymaker.scheduler.shutdown", "scheduler shutting down");
    let _ = shutdown_tx.send(true);
    handle.await?;

    Ok(())
}
