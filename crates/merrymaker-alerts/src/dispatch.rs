use crate::registry::SinkRegistry;
use merrymaker_core::{Alert, AlertEvent, CreateOpts, Error, JobStore, Result};
use serde::{Deserialize, Serialize};

/// The `alert` job payload (§4.6): exactly the `Alert` row the rule-job handler just wrote.
pub type AlertJobPayload = Alert;

/// The `alert-dispatch` job payload (§4.7): one alert, one sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDispatchPayload {
    pub alert: Alert,
    pub sink_name: String,
}

fn alert_to_event(alert: &Alert) -> AlertEvent {
    AlertEvent {
        rule: alert.rule.clone(),
        // Rule alerts are always written as `warn`-level scan logs (§4.6); the dispatched
        // event mirrors that rather than inventing a separate severity axis.
        level: "warn".to_string(),
        description: alert.message.clone(),
        scan_url: alert
            .context
            .get("scan_url")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        context: alert.context.clone(),
    }
}

/// The `alert` job handler (§4.6, §4.7): fans one alert out into one `alert-dispatch` job
/// per currently-enabled sink, each with its own `max_attempts=3` retry budget so a sink
/// outage never holds up delivery through a different sink.
pub async fn handle_alert_fanout(payload: AlertJobPayload, sinks: &SinkRegistry, jobs: &dyn JobStore) -> Result<()> {
    for sink_name in sinks.enabled_names() {
        let dispatch_payload = AlertDispatchPayload { alert: payload.clone(), sink_name };
        let value = serde_json::to_value(&dispatch_payload).map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;
        jobs.create("alert-dispatch", value, CreateOpts::new(3)).await?;
    }
    Ok(())
}

/// The `alert-dispatch` job handler (§4.3, §4.7): sends one alert through one named sink.
/// An unknown sink name is a programmer error (`Fatal`, no retry); a sink rejection (`Ok(false)`,
/// e.g. HTTP 4xx) is likewise terminal; transport failures surface as `Transient` and retry
/// with the runner's standard backoff (§7).
pub async fn handle_alert_dispatch(
    payload: AlertDispatchPayload,
    sinks: &SinkRegistry,
) -> Result<Option<serde_json::Value>> {
    let sink = sinks
        .get(&payload.sink_name)
        .ok_or_else(|| Error::fatal(anyhow::anyhow!("unknown alert sink {}", payload.sink_name)))?;

    let event = alert_to_event(&payload.alert);
    match sink.send(&event).await? {
        true => Ok(None),
        false => Err(Error::fatal(anyhow::anyhow!(
            "sink {} rejected alert {}",
            payload.sink_name,
            payload.alert.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use merrymaker_core::{
        AlertSink, CreateOutcome, CreatedJob, Job, JobState, JobStats,
    };
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    struct RecordingJobStore {
        created: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl JobStore for RecordingJobStore {
        async fn create(&self, task_name: &str, payload: Value, _opts: CreateOpts) -> Result<CreatedJob> {
            self.created.lock().unwrap().push((task_name.to_string(), payload));
            Ok(CreatedJob {
                job: Job {
                    id: Uuid::new_v4(),
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
        async fn heartbeat(&self, _: Uuid, _: &str, _: chrono::DateTime<chrono::Utc>) -> Result<chrono::DateTime<chrono::Utc>> {
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

    struct FixedSink {
        name: &'static str,
        enabled: bool,
        outcome: bool,
    }

    #[async_trait]
    impl AlertSink for FixedSink {
        fn name(&self) -> &str {
            self.name
        }
        fn enabled(&self) -> bool {
            self.enabled
        }
        async fn send(&self, _event: &AlertEvent) -> Result<bool> {
            Ok(self.outcome)
        }
    }

    fn sample_alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            rule: "ioc-domain".to_string(),
            scan_id: Uuid::new_v4(),
            site_id: None,
            message: "request to known-bad domain".to_string(),
            context: serde_json::json!({}),
            resolved_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn fanout_creates_one_dispatch_job_per_enabled_sink() {
        let jobs = Arc::new(RecordingJobStore { created: Mutex::new(Vec::new()) });
        let sinks = SinkRegistry::new(vec![
            Arc::new(FixedSink { name: "goalert", enabled: true, outcome: true }),
            Arc::new(FixedSink { name: "kafka", enabled: false, outcome: true }),
        ]);

        handle_alert_fanout(sample_alert(), &sinks, jobs.as_ref()).await.unwrap();

        let created = jobs.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "alert-dispatch");
    }

    #[tokio::test]
    async fn dispatch_treats_sink_rejection_as_fatal() {
        let sinks = SinkRegistry::new(vec![Arc::new(FixedSink { name: "goalert", enabled: true, outcome: false })]);
        let payload = AlertDispatchPayload { alert: sample_alert(), sink_name: "goalert".to_string() };

        let err = handle_alert_dispatch(payload, &sinks).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn dispatch_succeeds_when_sink_accepts() {
        let sinks = SinkRegistry::new(vec![Arc::new(FixedSink { name: "goalert", enabled: true, outcome: true })]);
        let payload = AlertDispatchPayload { alert: sample_alert(), sink_name: "goalert".to_string() };

        let result = handle_alert_dispatch(payload, &sinks).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn dispatch_to_unknown_sink_is_fatal() {
        let sinks = SinkRegistry::new(vec![]);
        let payload = AlertDispatchPayload { alert: sample_alert(), sink_name: "nope".to_string() };

        let err = handle_alert_dispatch(payload, &sinks).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
