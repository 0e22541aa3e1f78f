//! The Job Runner (§4.3): reserves jobs, dispatches them to a per-task-name handler,
//! heartbeats the lease while the handler runs, and reports `Complete`/`Fail` based on
//! the handler's outcome and the §7 retry classifier.

mod registry;

pub use registry::{Handler, HandlerRegistry};

use chrono::Utc;
use merrymaker_core::{Error, JobStore, MetricsSink};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub worker_id: String,
    pub task_name: String,
    pub lease: Duration,
    pub poll_timeout: Duration,
}

pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsSink>,
    registry: HandlerRegistry,
    cfg: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricsSink>,
        registry: HandlerRegistry,
        cfg: RunnerConfig,
    ) -> Self {
        Self { jobs, metrics, registry, cfg }
    }

    /// Runs until `shutdown` reports `true`. Mirrors the scheduler's
    /// `tokio::select!`-between-work-and-shutdown shape (§5 Cancellation & timeouts).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> merrymaker_core::Result<()> {
        info!(
            event = "merrymaker.runner.started",
            worker_id = %self.cfg.worker_id,
            task_name = %self.cfg.task_name,
            "job runner started"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let reserved = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                res = self.jobs.reserve_next(&self.cfg.worker_id, self.cfg.lease) => res?,
            };

            let job = match reserved {
                Some(job) => job,
                None => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = self.jobs.wait_for_notification(&self.cfg.task_name, self.cfg.poll_timeout) => {}
                    }
                    continue;
                }
            };

            self.process(job).await;
        }
    }

    async fn process(&self, job: merrymaker_core::Job) {
        let Some(handler) = self.registry.get(&job.task_name) else {
            warn!(
                event = "merrymaker.runner.unknown_task",
                task_name = %job.task_name,
                "no handler registered; failing job without retry"
            );
            let _ = self.jobs.fail(job.id, "unknown task_name", false).await;
            return;
        };

        let cancel = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(job.id, cancel.clone());

        let started = Instant::now();
        let hard_timeout = self.cfg.lease * 2;
        let job_id = job.id;
        let payload = job.payload.clone();
        let handle_cancel = cancel.clone();
        let work = tokio::spawn(async move { handler.handle(payload, handle_cancel).await });

        let outcome = tokio::select! {
            result = work => match result {
                Ok(outcome) => outcome,
                Err(err) => Err(Error::fatal(anyhow::anyhow!(err))),
            },
            _ = tokio::time::sleep(hard_timeout) => {
                // Soft timeout is the lease itself; this is the hard ceiling (§5). We stop
                // waiting and let the lease run out so the reaper reclaims the job — we
                // don't own it well enough at this point to call complete/fail ourselves.
                warn!(
                    event = "merrymaker.runner.hard_timeout",
                    job_id = %job_id,
                    hard_timeout_secs = hard_timeout.as_secs(),
                    "handler exceeded the hard timeout; abandoning to the reaper"
                );
                cancel.cancel();
                heartbeat.abort();
                return;
            }
        };
        cancel.cancel();
        heartbeat.abort();

        self.metrics
            .record_job_duration(&job.task_name, started.elapsed().as_millis() as u64);

        match outcome {
            Ok(result) => {
                if let Err(err) = self.jobs.complete(job.id, result).await {
                    warn!(event = "merrymaker.runner.complete_failed", job_id = %job.id, error = %err, "failed to mark job complete");
                }
                self.metrics.record_job_transition(&job.task_name, "complete", "ok");
            }
            Err(err) => {
                let retry = err.is_retryable();
                info!(
                    event = "merrymaker.runner.job_failed",
                    job_id = %job.id,
                    task_name = %job.task_name,
                    retry,
                    error = %err,
                    "handler returned an error"
                );
                if let Err(store_err) = self.jobs.fail(job.id, &err.to_string(), retry).await {
                    warn!(event = "merrymaker.runner.fail_failed", job_id = %job.id, error = %store_err, "failed to mark job failed");
                }
                self.metrics.record_job_transition(
                    &job.task_name,
                    "fail",
                    if retry { "retry" } else { "terminal" },
                );
            }
        }
    }

    /// Renews the lease at `lease/3` (§4.3 step 3); a failed heartbeat (lost lease,
    /// transport error) cancels the handler's token so it can abort promptly.
    fn spawn_heartbeat(&self, job_id: uuid::Uuid, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let jobs = self.jobs.clone();
        let worker_id = self.cfg.worker_id.clone();
        let interval = self.cfg.lease / 3;
        let lease = self.cfg.lease;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let new_lease_until = Utc::now()
                    + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(30));

                match jobs.heartbeat(job_id, &worker_id, new_lease_until).await {
                    Ok(_) => {}
                    Err(Error::LeaseLost) | Err(Error::NotFound(_)) => {
                        cancel.cancel();
                        return;
                    }
                    Err(err) => {
                        warn!(event = "merrymaker.runner.heartbeat_failed", job_id = %job_id, error = %err, "heartbeat failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use merrymaker_core::{
        CreateOpts, CreateOutcome, CreatedJob, Job, JobState, JobStats,
    };
    use serde_json::Value;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct NoopMetrics;
    impl MetricsSink for NoopMetrics {
        fn record_job_transition(&self, _: &str, _: &str, _: &str) {}
        fn record_job_duration(&self, _: &str, _: u64) {}
        fn record_unknown_event(&self, _: &str) {}
    }

    #[derive(Default)]
    struct FakeJobStore {
        completed: Mutex<Vec<Uuid>>,
        failed: Mutex<Vec<(Uuid, String, bool)>>,
    }

    fn sample_job(task_name: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            task_name: task_name.to_string(),
            payload: Value::Null,
            state: JobState::Active,
            attempts: 1,
            max_attempts: 3,
            idempotency_key: None,
            lease_until: Some(Utc::now() + chrono::Duration::seconds(30)),
            heartbeat_at: Some(Utc::now()),
            worker_id: Some("worker-a".to_string()),
            available_at: Utc::now(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            failed_reason: None,
        }
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn create(&self, task_name: &str, _payload: Value, _opts: CreateOpts) -> merrymaker_core::Result<CreatedJob> {
            Ok(CreatedJob { job: sample_job(task_name), outcome: CreateOutcome::Created })
        }
        async fn reserve_next(&self, _worker_id: &str, _lease: Duration) -> merrymaker_core::Result<Option<Job>> {
            Ok(None)
        }
        async fn wait_for_notification(&self, _task_name: &str, _timeout: Duration) -> merrymaker_core::Result<()> {
            Ok(())
        }
        async fn heartbeat(&self, _job_id: Uuid, _worker_id: &str, new_lease_until: DateTime<Utc>) -> merrymaker_core::Result<DateTime<Utc>> {
            Ok(new_lease_until)
        }
        async fn complete(&self, job_id: Uuid, _result: Option<Value>) -> merrymaker_core::Result<()> {
            self.completed.lock().unwrap().push(job_id);
            Ok(())
        }
        async fn fail(&self, job_id: Uuid, reason: &str, retry: bool) -> merrymaker_core::Result<()> {
            self.failed.lock().unwrap().push((job_id, reason.to_string(), retry));
            Ok(())
        }
        async fn stats(&self, _task_name: Option<&str>) -> merrymaker_core::Result<JobStats> {
            unimplemented!()
        }
        async fn count_in_states(&self, _task_name: &str, _states: &[JobState]) -> merrymaker_core::Result<i64> {
            unimplemented!()
        }
        async fn fail_stale_pending(&self, _max_age: Duration, _batch: i64) -> merrymaker_core::Result<i64> {
            unimplemented!()
        }
        async fn expire_leases(&self, _batch: i64) -> merrymaker_core::Result<i64> {
            unimplemented!()
        }
        async fn delete_old_jobs(&self, _older_than: Duration, _states: &[JobState], _batch: i64) -> merrymaker_core::Result<i64> {
            unimplemented!()
        }
        async fn delete_old_job_results(&self, _older_than: Duration, _batch: i64) -> merrymaker_core::Result<i64> {
            unimplemented!()
        }
    }

    struct OkHandler;
    #[async_trait]
    impl Handler for OkHandler {
        async fn handle(&self, _payload: Value, _cancel: CancellationToken) -> merrymaker_core::Result<Option<Value>> {
            Ok(None)
        }
    }

    struct TransientHandler;
    #[async_trait]
    impl Handler for TransientHandler {
        async fn handle(&self, _payload: Value, _cancel: CancellationToken) -> merrymaker_core::Result<Option<Value>> {
            Err(Error::transient(anyhow::anyhow!("boom")))
        }
    }

    struct ValidationHandler;
    #[async_trait]
    impl Handler for ValidationHandler {
        async fn handle(&self, _payload: Value, _cancel: CancellationToken) -> merrymaker_core::Result<Option<Value>> {
            Err(Error::validation("bad payload"))
        }
    }

    struct HangingHandler;
    #[async_trait]
    impl Handler for HangingHandler {
        async fn handle(&self, _payload: Value, cancel: CancellationToken) -> merrymaker_core::Result<Option<Value>> {
            cancel.cancelled().await;
            Ok(None)
        }
    }

    fn runner(jobs: Arc<FakeJobStore>, registry: HandlerRegistry) -> JobRunner {
        runner_with_lease(jobs, registry, Duration::from_secs(30))
    }

    fn runner_with_lease(jobs: Arc<FakeJobStore>, registry: HandlerRegistry, lease: Duration) -> JobRunner {
        JobRunner::new(
            jobs,
            Arc::new(NoopMetrics),
            registry,
            RunnerConfig {
                worker_id: "worker-a".to_string(),
                task_name: "demo".to_string(),
                lease,
                poll_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn successful_handler_completes_the_job() {
        let jobs = Arc::new(FakeJobStore::default());
        let registry = HandlerRegistry::new().register("demo", Arc::new(OkHandler));
        let runner = runner(jobs.clone(), registry);

        runner.process(sample_job("demo")).await;

        assert_eq!(jobs.completed.lock().unwrap().len(), 1);
        assert!(jobs.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_error_fails_with_retry() {
        let jobs = Arc::new(FakeJobStore::default());
        let registry = HandlerRegistry::new().register("demo", Arc::new(TransientHandler));
        let runner = runner(jobs.clone(), registry);

        runner.process(sample_job("demo")).await;

        let failed = jobs.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].2, "transient errors should retry");
    }

    #[tokio::test]
    async fn validation_error_fails_without_retry() {
        let jobs = Arc::new(FakeJobStore::default());
        let registry = HandlerRegistry::new().register("demo", Arc::new(ValidationHandler));
        let runner = runner(jobs.clone(), registry);

        runner.process(sample_job("demo")).await;

        let failed = jobs.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(!failed[0].2, "validation errors should not retry");
    }

    #[tokio::test]
    async fn unknown_task_name_fails_without_retry() {
        let jobs = Arc::new(FakeJobStore::default());
        let runner = runner(jobs.clone(), HandlerRegistry::new());

        runner.process(sample_job("mystery")).await;

        let failed = jobs.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(!failed[0].2);
    }

    #[tokio::test]
    async fn handler_past_the_hard_timeout_is_abandoned_to_the_reaper() {
        let jobs = Arc::new(FakeJobStore::default());
        let registry = HandlerRegistry::new().register("demo", Arc::new(HangingHandler));
        let runner = runner_with_lease(jobs.clone(), registry, Duration::from_millis(20));

        runner.process(sample_job("demo")).await;

        // Neither complete nor fail is called: the runner gave up waiting and left the
        // lease to expire, which is the reaper's job to notice (§5).
        assert!(jobs.completed.lock().unwrap().is_empty());
        assert!(jobs.failed.lock().unwrap().is_empty());
    }
}
