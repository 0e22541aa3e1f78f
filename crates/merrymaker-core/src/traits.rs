use crate::error::Result;
use crate::model::{
    Alert, CreatedJob, IocType, Job, JobStats, ScanLog, ScanState, ScheduledTask, Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub idempotency_key: Option<String>,
    pub max_attempts: i32,
    pub available_at: Option<DateTime<Utc>>,
}

impl CreateOpts {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }
}

/// The durable queueing layer over a relational store (§4.1). One implementation
/// (Postgres, `merrymaker-store`) backs every task type in the system: `scan`,
/// `rule-job`, `alert-dispatch`, and the periodic purge/refresh jobs all flow through
/// the same `create`/`reserve_next`/`complete`/`fail` surface.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, task_name: &str, payload: Value, opts: CreateOpts) -> Result<CreatedJob>;

    async fn reserve_next(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>>;

    /// Blocks until a producer signals new work for `task_name` or `timeout` elapses.
    /// A hint only — callers must still call `reserve_next` (§4.1 Concurrency).
    async fn wait_for_notification(&self, task_name: &str, timeout: Duration) -> Result<()>;

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        new_lease_until: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    async fn complete(&self, job_id: Uuid, result: Option<Value>) -> Result<()>;

    async fn fail(&self, job_id: Uuid, reason: &str, retry: bool) -> Result<()>;

    async fn stats(&self, task_name: Option<&str>) -> Result<JobStats>;

    /// Number of jobs for `task_name` currently in one of `states` (used by the
    /// scheduler's Skip overrun policy, §4.2).
    async fn count_in_states(&self, task_name: &str, states: &[crate::model::JobState]) -> Result<i64>;

    async fn fail_stale_pending(&self, max_age: Duration, batch: i64) -> Result<i64>;

    async fn expire_leases(&self, batch: i64) -> Result<i64>;

    async fn delete_old_jobs(
        &self,
        older_than: Duration,
        states: &[crate::model::JobState],
        batch: i64,
    ) -> Result<i64>;

    async fn delete_old_job_results(&self, older_than: Duration, batch: i64) -> Result<i64>;
}

/// Repository of `ScheduledTask` rows, owned by the Scheduler (§3, §4.2).
#[async_trait]
pub trait ScheduledTaskStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<ScheduledTask>>;

    /// Runs `f` while holding a task-scoped Postgres advisory lock (`pg_try_advisory_lock`
    /// keyed on the task id, §4.2), releasing it afterwards regardless of outcome.
    /// Returns `Ok(None)` without running `f` if the lock is already held elsewhere.
    async fn with_task_lock(
        &self,
        task_id: Uuid,
        f: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>,
    ) -> Result<Option<()>>;

    async fn mark_queued(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    async fn set_active_fire_key(
        &self,
        task_id: Uuid,
        fire_key: &str,
        set_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// One alert-event JSON payload, as handed to a sink (§4.7, §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertEvent {
    pub rule: String,
    pub level: String,
    pub description: String,
    pub scan_url: Option<String>,
    pub context: Value,
}

/// A pluggable alert destination: `{ name, enabled, send }` (§4.7, glossary).
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;
    /// Returns `Ok(true)` on success, `Ok(false)` on a fatal (non-retryable) rejection
    /// such as an HTTP 4xx. Transport failures should be returned as `Err` so the
    /// caller's retry classifier (§7) treats them as `Transient`.
    async fn send(&self, event: &AlertEvent) -> Result<bool>;
}

/// The observability surface the core consumes; exporters (Prometheus/statsd) are
/// out of scope (§1) but the trait boundary they'd implement is in scope.
pub trait MetricsSink: Send + Sync {
    fn record_job_transition(&self, task_name: &str, transition: &str, result: &str);
    fn record_job_duration(&self, task_name: &str, millis: u64);
    fn record_unknown_event(&self, event_type: &str);
}

/// A `MetricsSink` that emits structured `tracing` events instead of wiring up a real
/// exporter — the ambient-logging equivalent of the teacher's `tracing::info!(event = ...)`
/// calls, usable as the composition root's default until a real exporter is plugged in.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_job_transition(&self, task_name: &str, transition: &str, result: &str) {
        tracing::info!(
            event = "merrymaker.job.transition",
            task_name,
            transition,
            result,
            "job transition"
        );
    }

    fn record_job_duration(&self, task_name: &str, millis: u64) {
        tracing::info!(
            event = "merrymaker.job.duration",
            task_name,
            millis,
            "job duration"
        );
    }

    fn record_unknown_event(&self, event_type: &str) {
        tracing::warn!(
            event = "merrymaker.pipeline.unknown_event",
            event_type,
            "dropped scan event with unknown type"
        );
    }
}

/// Tier 3: the authoritative IOC/allow-list tables (§4.5). Owned by the CRUD surface,
/// consulted read-only by the rule engine on a Tier 2 miss.
#[async_trait]
pub trait IocRepository: Send + Sync {
    async fn is_ioc(&self, ioc_type: IocType, value: &str) -> Result<bool>;
    async fn is_allow_listed(&self, entry_type: &str, key: &str) -> Result<bool>;
}

/// Tier 2: the DB-backed cache table fronting `IocRepository`, itself fronted by the
/// process-local Tier 1 (§4.5). Entries carry their own expiry so a miss and a
/// negative cached result are distinguishable.
#[async_trait]
pub trait RuleCacheStore: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<bool>>;
    async fn set(&self, cache_key: &str, value: bool, ttl: Duration) -> Result<()>;
}

/// Suppresses duplicate alerts for `(rule, key)` within a rolling retention window
/// (§4.5 seen-string rule). Backed by `rules.seen_strings`.
#[async_trait]
pub trait SeenStringRepository: Send + Sync {
    /// Returns `true` and refreshes `last_cached` if `(entry_type, key)` was already seen.
    async fn seen_and_touch(&self, entry_type: &str, key: &str) -> Result<bool>;
    async fn purge_older_than(&self, max_age: Duration, batch: i64) -> Result<i64>;
}

/// Append-only scan log sink (§4.6). A single call may carry several events produced by
/// one handler invocation (batched insert).
#[async_trait]
pub trait ScanLogStore: Send + Sync {
    async fn append(&self, entries: &[ScanLog]) -> Result<()>;
}

/// Owns `rules.alerts` rows; the rule engine writes through this on a match (§3, §4.6).
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, alert: &Alert) -> Result<()>;
}

/// Owns the parent scan record's lifecycle (§4.6 step 3, §9 Open Question). Implementations
/// must make `transition` idempotent under repeated/out-of-order calls: the new state is
/// applied only if its rank is `>=` the row's current rank.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Inserts the initial `queued` row for a scan the caller is about to drive, e.g. the
    /// `scan-runner` CLI command (§6). A no-op if the row already exists — callers only
    /// ever originate a given `scan_id` once, but retried CLI invocations must not error.
    async fn create(&self, scan_id: Uuid, site_url: Option<&str>) -> Result<()>;

    async fn transition(&self, scan_id: Uuid, new_state: ScanState) -> Result<()>;

    /// Returns `None` if no scan with this id exists, used by callers polling for
    /// completion (e.g. the `scan-runner` CLI command) rather than waiting on a job result.
    async fn get_state(&self, scan_id: Uuid) -> Result<Option<ScanState>>;
}

/// The boundary to the headless-browser worker that actually navigates `scan_url` and
/// produces the `ScanEvent`s the `browser-event-queue` handler consumes (§4.6, §1
/// Non-goals: browser automation itself is out of scope). A `scan` job handler drives
/// one of these; this crate ships no implementation, only the seam.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigates to `scan_url` and emits events for `scan_id` until the page is
    /// considered complete or `timeout` elapses, whichever comes first.
    async fn run_scan(&self, scan_id: Uuid, scan_url: &str, timeout: Duration) -> Result<Vec<crate::model::ScanEvent>>;
}

/// KV-shaped session store with per-key TTL (§4.8). Implementations must re-check
/// `expires_at` on read and delete the row on expiry detection rather than trust the
/// backing store's own TTL eviction, matching the invariant in §8.4.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Session>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}
