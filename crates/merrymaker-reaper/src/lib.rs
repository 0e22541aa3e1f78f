//! The Reaper (§4.4): on a fixed interval, fails stale-pending jobs, expires leases the
//! Job Runner failed to renew, and purges old job/job-result rows in bounded batches.
//!
//! Shaped like `merrymaker-scheduler`: a `tokio::select!` between a fixed sleep and a
//! shutdown watch channel, with per-tick errors logged and swallowed.

use merrymaker_core::{JobState, JobStore, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const TERMINAL_STATES: &[JobState] = &[JobState::Completed, JobState::Failed, JobState::Expired];

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub tick_interval: Duration,
    pub stale_pending_max_age: Duration,
    pub job_retention: Duration,
    pub job_result_retention: Duration,
    pub batch_size: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            stale_pending_max_age: Duration::from_secs(3600),
            job_retention: Duration::from_secs(30 * 24 * 3600),
            job_result_retention: Duration::from_secs(7 * 24 * 3600),
            batch_size: 500,
        }
    }
}

pub struct Reaper {
    jobs: Arc<dyn JobStore>,
    cfg: ReaperConfig,
}

impl Reaper {
    pub fn new(jobs: Arc<dyn JobStore>, cfg: ReaperConfig) -> Self {
        Self { jobs, cfg }
    }

    /// Runs until `shutdown` is set to `true`, awaiting an in-flight tick before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            if let Err(err) = self.tick().await {
                warn!(event = "merrymaker.reaper.tick_error", error = %err, "reaper tick error");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cfg.tick_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let stale = self
            .jobs
            .fail_stale_pending(self.cfg.stale_pending_max_age, self.cfg.batch_size)
            .await?;
        if stale > 0 {
            info!(event = "merrymaker.reaper.stale_pending_failed", count = stale, "failed stale-pending jobs");
        }

        let expired = self.jobs.expire_leases(self.cfg.batch_size).await?;
        if expired > 0 {
            info!(event = "merrymaker.reaper.leases_expired", count = expired, "expired stale leases");
        }

        let deleted_jobs = self
            .jobs
            .delete_old_jobs(self.cfg.job_retention, TERMINAL_STATES, self.cfg.batch_size)
            .await?;
        if deleted_jobs > 0 {
            info!(event = "merrymaker.reaper.jobs_purged", count = deleted_jobs, "purged old jobs");
        }

        let deleted_results = self
            .jobs
            .delete_old_job_results(self.cfg.job_result_retention, self.cfg.batch_size)
            .await?;
        if deleted_results > 0 {
            info!(event = "merrymaker.reaper.job_results_purged", count = deleted_results, "purged old job results");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use merrymaker_core::{CreateOpts, CreateOutcome, CreatedJob, Job, JobStats};
    use serde_json::Value;
    use std::sync::atomic::{AtomicI64, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingJobStore {
        stale_failed: AtomicI64,
        leases_expired: AtomicI64,
        jobs_deleted: AtomicI64,
        results_deleted: AtomicI64,
    }

    #[async_trait]
    impl JobStore for CountingJobStore {
        async fn create(&self, _: &str, _: Value, _: CreateOpts) -> Result<CreatedJob> {
            unimplemented!()
        }
        async fn reserve_next(&self, _: &str, _: Duration) -> Result<Option<Job>> {
            unimplemented!()
        }
        async fn wait_for_notification(&self, _: &str, _: Duration) -> Result<()> {
            unimplemented!()
        }
        async fn heartbeat(&self, _: Uuid, _: &str, _: DateTime<Utc>) -> Result<DateTime<Utc>> {
            unimplemented!()
        }
        async fn complete(&self, _: Uuid, _: Option<Value>) -> Result<()> {
            unimplemented!()
        }
        async fn fail(&self, _: Uuid, _: &str, _: bool) -> Result<()> {
            unimplemented!()
        }
        async fn stats(&self, _: Option<&str>) -> Result<JobStats> {
            unimplemented!()
        }
        async fn count_in_states(&self, _: &str, _: &[JobState]) -> Result<i64> {
            unimplemented!()
        }
        async fn fail_stale_pending(&self, _: Duration, _: i64) -> Result<i64> {
            Ok(self.stale_failed.fetch_add(1, Ordering::SeqCst) + 1)
        }
        async fn expire_leases(&self, _: i64) -> Result<i64> {
            Ok(self.leases_expired.fetch_add(1, Ordering::SeqCst) + 1)
        }
        async fn delete_old_jobs(&self, _: Duration, _: &[JobState], _: i64) -> Result<i64> {
            Ok(self.jobs_deleted.fetch_add(1, Ordering::SeqCst) + 1)
        }
        async fn delete_old_job_results(&self, _: Duration, _: i64) -> Result<i64> {
            Ok(self.results_deleted.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[tokio::test]
    async fn tick_runs_all_four_maintenance_operations() {
        let jobs = Arc::new(CountingJobStore::default());
        let reaper = Reaper::new(jobs.clone(), ReaperConfig::default());

        reaper.tick().await.unwrap();

        assert_eq!(jobs.stale_failed.load(Ordering::SeqCst), 1);
        assert_eq!(jobs.leases_expired.load(Ordering::SeqCst), 1);
        assert_eq!(jobs.jobs_deleted.load(Ordering::SeqCst), 1);
        assert_eq!(jobs.results_deleted.load(Ordering::SeqCst), 1);
    }
}
