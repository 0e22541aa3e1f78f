use crate::{app::App, config::MerrymakerConfig, handlers};
use merrymaker_runner::{HandlerRegistry, JobRunner, RunnerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Registers every handler the control plane ships (§4.3). `scan` is deliberately absent:
/// driving the headless browser worker is out of scope (§1 Non-goals) and this process
/// has no `BrowserDriver` to hand the job to. `secret-refresh`, `purge-daily`, and
/// `purge-hourly` are also absent: the reaper already owns age-based purging on its own
/// timer (§4.4), and nothing in the environment table (§6) specifies what a secret would
/// be refreshed from, so registering either would mean inventing behavior rather than
/// implementing it (see DESIGN.md).
pub async fn run(cfg: &MerrymakerConfig) -> anyhow::Result<()> {
    let app = App::connect(cfg).await?;

    let registry = HandlerRegistry::new()
        .register(
            "rule-job",
            Arc::new(handlers::RuleJobHandler {
                rule_engine: app.rule_engine.clone(),
                scan_logs: app.scan_logs.clone(),
                alerts: app.alerts.clone(),
                jobs: app.jobs.clone(),
            }),
        )
        .register(
            "browser-event-queue",
            Arc::new(handlers::BrowserEventHandler {
                scan_logs: app.scan_logs.clone(),
                rule_engine: app.rule_engine.clone(),
                scans: app.scans.clone(),
                metrics: app.metrics.clone(),
            }),
        )
        .register(
            "alert",
            Arc::new(handlers::AlertFanoutHandler {
                sinks: app.sinks.clone(),
                jobs: app.jobs.clone(),
            }),
        )
        .register(
            "alert-dispatch",
            Arc::new(handlers::AlertDispatchHandler { sinks: app.sinks.clone() }),
        )
        .register(
            "seen-string-purge",
            Arc::new(handlers::SeenStringPurgeHandler {
                seen: app.seen_strings.clone(),
                max_age: Duration::from_secs(cfg.seen_string_max_age_secs),
                batch_size: cfg.reaper_batch_size,
            }),
        );

    let worker_id = cfg
        .runner_worker_id
        .clone()
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

    let runner = JobRunner::new(
        app.jobs,
        app.metrics,
        registry,
        RunnerConfig {
            worker_id,
            task_name: cfg.runner_task_name.clone(),
            lease: Duration::from_secs(cfg.runner_lease_secs),
            poll_timeout: Duration::from_secs(cfg.runner_poll_timeout_secs),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    tracing::info!(event = "merrymaker.worker.started", "worker started");
    tokio::signal::ctrl_c().await?;
    tracing::info!(event = "merrymaker.worker.shutdown", "worker shutting down");
    let _ = shutdown_tx.send(true);
    handle.await??;

    Ok(())
}
