use async_trait::async_trait;
use merrymaker_core::{CreateOpts, JobStore, MetricsSink, Result, ScanEvent, ScanEventType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a `Rule` produces for one matching event; not yet a persisted `Alert` row (the
/// scan-event pipeline's rule-job handler attaches `scan_id`/`site_id` and writes it,
/// §4.6).
#[derive(Debug, Clone)]
pub struct RuleAlert {
    /// Distinguishes repeat alerts for seen-string suppression (§4.5).
    pub dedupe_key: String,
    pub message: String,
    pub context: Value,
}

/// `process(event) → alerts[]` (§4.5). Implementations are process-wide singletons
/// registered once by the composition root; the engine never assumes a fixed rule set.
#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;
    fn applies_to(&self) -> &[ScanEventType];
    async fn evaluate(&self, event: &ScanEvent) -> Result<Vec<RuleAlert>>;
}

/// Keeps the `Map<ScanEventType, Rule[]>` and `Map<name, Rule>` the spec describes, and
/// turns each matching `(event, rule)` pair into a `rule-job` (§4.5).
pub struct RuleEngine {
    by_type: HashMap<ScanEventType, Vec<Arc<dyn Rule>>>,
    by_name: HashMap<String, Arc<dyn Rule>>,
    jobs: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Arc<dyn Rule>>, jobs: Arc<dyn JobStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        let mut by_type: HashMap<ScanEventType, Vec<Arc<dyn Rule>>> = HashMap::new();
        let mut by_name = HashMap::new();
        for rule in rules {
            for event_type in rule.applies_to() {
                by_type.entry(*event_type).or_default().push(rule.clone());
            }
            by_name.insert(rule.name().to_string(), rule);
        }
        Self { by_type, by_name, jobs, metrics }
    }

    /// Enqueues a `rule-job` for every rule registered against `event.event_type`; a
    /// type with no rules is silently dropped (§4.5).
    pub async fn dispatch(&self, event: &ScanEvent) -> Result<()> {
        let Some(rules) = self.by_type.get(&event.event_type) else {
            return Ok(());
        };

        for rule in rules {
            let payload = serde_json::json!({ "rule_name": rule.name(), "event": event });
            self.jobs.create("rule-job", payload, CreateOpts::new(3)).await?;
            self.metrics.record_job_transition("rule-job", "enqueued", rule.name());
        }
        Ok(())
    }

    /// Runs one named rule against one event; the `rule-job` handler's entire job (§4.3,
    /// §4.6). Unknown rule names are a `Fatal` programmer error, not a retryable one.
    pub async fn evaluate_one(&self, rule_name: &str, event: &ScanEvent) -> Result<Vec<RuleAlert>> {
        let rule = self.by_name.get(rule_name).ok_or_else(|| {
            merrymaker_core::Error::fatal(anyhow::anyhow!("unknown rule {rule_name}"))
        })?;
        rule.evaluate(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merrymaker_core::{CreateOutcome, CreatedJob, Error, Job, JobState, JobStats};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NoopMetrics;
    impl MetricsSink for NoopMetrics {
        fn record_job_transition(&self, _: &str, _: &str, _: &str) {}
        fn record_job_duration(&self, _: &str, _: u64) {}
        fn record_unknown_event(&self, _: &str) {}
    }

    struct RecordingJobStore {
        created: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl JobStore for RecordingJobStore {
        async fn create(&self, task_name: &str, payload: Value, _opts: CreateOpts) -> Result<CreatedJob> {
            self.created.lock().unwrap().push((task_name.to_string(), payload));
            Ok(CreatedJob {
                job: Job {
                    id: uuid::Uuid::new_v4(),
                    task_name: task_name.to_string(),
                    payload: Value::Null,
                    state: JobState::Pending,
                    attempts: 0,
                    max_attempts: 3,
                    idempotency_key: None,
                    lease_until: None,
                    heartbeat_at: None,
                    worker_id: None,
                    available_at: chrono::Utc::now(),
                    created_at: chrono::Utc::now(),
                    started_at: None,
                    finished_at: None,
                    failed_reason: None,
                },
                outcome: CreateOutcome::Created,
            })
        }
        async fn reserve_next(&self, _: &str, _: Duration) -> Result<Option<Job>> {
            unimplemented!()
        }
        async fn wait_for_notification(&self, _: &str, _: Duration) -> Result<()> {
            unimplemented!()
        }
        async fn heartbeat(&self, _: uuid::Uuid, _: &str, _: chrono::DateTime<chrono::Utc>) -> Result<chrono::DateTime<chrono::Utc>> {
            unimplemented!()
        }
        async fn complete(&self, _: uuid::Uuid, _: Option<Value>) -> Result<()> {
            unimplemented!()
        }
        async fn fail(&self, _: uuid::Uuid, _: &str, _: bool) -> Result<()> {
            unimplemented!()
        }
        async fn stats(&self, _: Option<&str>) -> Result<JobStats> {
            unimplemented!()
        }
        async fn count_in_states(&self, _: &str, _: &[JobState]) -> Result<i64> {
            unimplemented!()
        }
        async fn fail_stale_pending(&self, _: Duration, _: i64) -> Result<i64> {
            unimplemented!()
        }
        async fn expire_leases(&self, _: i64) -> Result<i64> {
            unimplemented!()
        }
        async fn delete_old_jobs(&self, _: Duration, _: &[JobState], _: i64) -> Result<i64> {
            unimplemented!()
        }
        async fn delete_old_job_results(&self, _: Duration, _: i64) -> Result<i64> {
            unimplemented!()
        }
    }

    struct AlwaysAlertsRule;
    #[async_trait]
    impl Rule for AlwaysAlertsRule {
        fn name(&self) -> &str {
            "always-alerts"
        }
        fn applies_to(&self) -> &[ScanEventType] {
            &[ScanEventType::WebRequest]
        }
        async fn evaluate(&self, _event: &ScanEvent) -> Result<Vec<RuleAlert>> {
            Ok(vec![RuleAlert {
                dedupe_key: "k".into(),
                message: "hit".into(),
                context: Value::Null,
            }])
        }
    }

    fn sample_event(event_type: ScanEventType) -> ScanEvent {
        ScanEvent {
            scan_id: uuid::Uuid::new_v4(),
            test: false,
            event_type,
            payload: serde_json::json!({"url": "https://bad.example/x"}),
            produced_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_enqueues_one_rule_job_per_registered_rule() {
        let jobs = Arc::new(RecordingJobStore { created: Mutex::new(Vec::new()) });
        let engine = RuleEngine::new(vec![Arc::new(AlwaysAlertsRule)], jobs.clone(), Arc::new(NoopMetrics));

        engine.dispatch(&sample_event(ScanEventType::WebRequest)).await.unwrap();
        assert_eq!(jobs.created.lock().unwrap().len(), 1);

        engine.dispatch(&sample_event(ScanEventType::Cookie)).await.unwrap();
        assert_eq!(jobs.created.lock().unwrap().len(), 1, "no rules registered for cookie events");
    }

    #[tokio::test]
    async fn evaluate_one_unknown_rule_is_fatal() {
        let jobs = Arc::new(RecordingJobStore { created: Mutex::new(Vec::new()) });
        let engine = RuleEngine::new(vec![Arc::new(AlwaysAlertsRule)], jobs, Arc::new(NoopMetrics));
        let err = engine
            .evaluate_one("nope", &sample_event(ScanEventType::WebRequest))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }
}
