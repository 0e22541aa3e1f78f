use crate::{app::App, config::MerrymakerConfig};
use merrymaker_reaper::{Reaper, ReaperConfig};
use std::time::Duration;
use tokio::sync::watch;

pub async fn run(cfg: &MerrymakerConfig) -> anyhow::Result<()> {
    let app = App::connect(cfg).await?;

    let reaper = Reaper::new(
        app.jobs,
        ReaperConfig {
            tick_interval: Duration::from_secs(cfg.reaper_interval_secs),
            stale_pending_max_age: Duration::from_secs(cfg.reaper_max_pending_age_secs),
            job_retention: Duration::from_secs(cfg.reaper_max_job_age_secs),
            job_result_retention: Duration::from_secs(cfg.reaper_max_job_result_age_secs),
            batch_size: cfg.reaper_batch_size,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { reaper.run(shutdown_rx).await });

    tracing::info!(event = "merrymaker.reaper.started", "reaper started");
    tokio::signal::ctrl_c().await?;
    tracing::info!(event = "merrymaker.reaper.shutdown", "reaper shutting down");
    let _ = shutdown_tx.send(true);
    handle.await?;

    Ok(())
}
