//! The periodic loop that turns due `ScheduledTask`s into jobs (§4.2).
//!
//! Shaped like the teacher's `dispatcher::lease_reaper_loop`: a `tokio::select!` between a
//! fixed sleep and a shutdown watch channel, with per-tick errors logged and swallowed so
//! one bad tick never kills the loop.

use chrono::Utc;
use futures::FutureExt;
use merrymaker_core::{
    CreateOpts, JobState, JobStore, MetricsSink, OverrunPolicy, Result, ScheduledTask,
    ScheduledTaskStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// States that block a Skip-policy task from enqueuing again (§4.2 step 3).
const BLOCKING_STATES: &[JobState] = &[JobState::Pending, JobState::Active];

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub backfill_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            backfill_limit: 20,
        }
    }
}

pub struct Scheduler {
    tasks: Arc<dyn ScheduledTaskStore>,
    jobs: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsSink>,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<dyn ScheduledTaskStore>,
        jobs: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricsSink>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self { tasks, jobs, metrics, cfg }
    }

    /// Runs until `shutdown` is set to `true`, awaiting an in-flight tick before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            if let Err(err) = self.tick().await {
                warn!(error = %err, "scheduler tick error");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cfg.tick_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let stats = self.jobs.stats(None).await?;
        if stats.pending > self.cfg.backfill_limit {
            warn!(pending = stats.pending, limit = self.cfg.backfill_limit, "scheduler backpressure: skipping pass");
            return Ok(());
        }

        for task in self.tasks.list_enabled().await? {
            if let Err(err) = self.process_task(&task).await {
                warn!(task = %task.task_name, error = %err, "scheduler task error");
            }
        }
        Ok(())
    }

    async fn process_task(&self, task: &ScheduledTask) -> Result<()> {
        let now = Utc::now();
        if !task.is_due(now) {
            return Ok(());
        }

        let task_id = task.id;
        let task_name = task.task_name.clone();
        let overrun_policy = task.overrun_policy;
        let jobs = self.jobs.clone();
        let tasks = self.tasks.clone();
        let metrics = self.metrics.clone();
        let fire_key = task.fire_key(now);
        let active_fire_key = task.active_fire_key.clone();

        let outcome = self
            .tasks
            .with_task_lock(
                task_id,
                Box::new(move || {
                    async move {
                        run_fire(
                            jobs.as_ref(),
                            tasks.as_ref(),
                            metrics.as_ref(),
                            task_id,
                            &task_name,
                            overrun_policy,
                            &fire_key,
                            active_fire_key.as_deref(),
                            now,
                        )
                        .await
                    }
                    .boxed()
                }),
            )
            .await?;

        if outcome.is_none() {
            info!(task = %task.task_name, "scheduler: task lock held elsewhere, skipping this pass");
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fire(
    jobs: &dyn JobStore,
    tasks: &dyn ScheduledTaskStore,
    metrics: &dyn MetricsSink,
    task_id: uuid::Uuid,
    task_name: &str,
    overrun_policy: OverrunPolicy,
    fire_key: &str,
    active_fire_key: Option<&str>,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    if active_fire_key == Some(fire_key) {
        return Ok(());
    }

    match overrun_policy {
        OverrunPolicy::Reschedule => {
            tasks.mark_queued(task_id, now).await?;
            return Ok(());
        }
        OverrunPolicy::Skip => {
            let blocking = jobs.count_in_states(task_name, BLOCKING_STATES).await?;
            if blocking > 0 {
                tasks.mark_queued(task_id, now).await?;
                return Ok(());
            }
        }
        OverrunPolicy::Queue => {}
    }

    tasks.mark_queued(task_id, now).await?;

    let opts = CreateOpts::new(5).with_idempotency_key(fire_key.to_string());
    let payload = serde_json::json!({ "task_name": task_name, "fire_key": fire_key });
    let created = jobs.create(task_name, payload, opts).await?;

    match created.outcome {
        merrymaker_core::CreateOutcome::Created => {
            tasks.set_active_fire_key(task_id, fire_key, now).await?;
            metrics.record_job_transition(task_name, "scheduled", "created");
        }
        merrymaker_core::CreateOutcome::AlreadyExists => {
            metrics.record_job_transition(task_name, "scheduled", "already_exists");
        }
    }

    Ok(())
}
