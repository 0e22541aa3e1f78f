//! Adapts each component's domain function to the Job Runner's `Handler` seam (§4.3).
//! Thin by design: all the logic lives in the component crates; these impls only
//! deserialize a payload, call through, and let errors propagate for the runner's
//! retry classifier (§7) to judge.

use async_trait::async_trait;
use merrymaker_core::{
    AlertStore, Error, JobStore, MetricsSink, Result, ScanLogStore, ScanStore, SeenStringRepository,
};
use merrymaker_rules::RuleEngine;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| Error::fatal(anyhow::anyhow!(e)))
}

/// `rule-job` (§4.5, §4.6): run one rule against one event.
pub struct RuleJobHandler {
    pub rule_engine: Arc<RuleEngine>,
    pub scan_logs: Arc<dyn ScanLogStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub jobs: Arc<dyn JobStore>,
}

#[async_trait]
impl merrymaker_runner::Handler for RuleJobHandler {
    async fn handle(&self, payload: Value, _cancel: CancellationToken) -> Result<Option<Value>> {
        let payload = decode(payload)?;
        merrymaker_pipeline::handle_rule_job(
            payload,
            self.rule_engine.as_ref(),
            self.scan_logs.as_ref(),
            self.alerts.as_ref(),
            self.jobs.as_ref(),
        )
        .await?;
        Ok(None)
    }
}

/// `browser-event-queue` (§4.6): one or more events from the same handler invocation.
/// Each event is decoded individually downstream rather than as one `Vec<ScanEvent>` —
/// a single unrecognized `type` must drop that event, not the whole batch (§6).
#[derive(Debug, Deserialize)]
struct BrowserEventBatch {
    events: Vec<Value>,
}

pub struct BrowserEventHandler {
    pub scan_logs: Arc<dyn ScanLogStore>,
    pub rule_engine: Arc<RuleEngine>,
    pub scans: Arc<dyn ScanStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

#[async_trait]
impl merrymaker_runner::Handler for BrowserEventHandler {
    async fn handle(&self, payload: Value, _cancel: CancellationToken) -> Result<Option<Value>> {
        let batch: BrowserEventBatch = decode(payload)?;
        merrymaker_pipeline::handle_browser_events(
            &batch.events,
            self.scan_logs.as_ref(),
            self.rule_engine.as_ref(),
            self.scans.as_ref(),
            self.metrics.as_ref(),
        )
        .await?;
        Ok(None)
    }
}

/// `alert` (§4.6, §4.7): fan one alert out into one `alert-dispatch` job per enabled sink.
pub struct AlertFanoutHandler {
    pub sinks: Arc<merrymaker_alerts::SinkRegistry>,
    pub jobs: Arc<dyn JobStore>,
}

#[async_trait]
impl merrymaker_runner::Handler for AlertFanoutHandler {
    async fn handle(&self, payload: Value, _cancel: CancellationToken) -> Result<Option<Value>> {
        let alert = decode(payload)?;
        merrymaker_alerts::handle_alert_fanout(alert, self.sinks.as_ref(), self.jobs.as_ref()).await?;
        Ok(None)
    }
}

/// `alert-dispatch` (§4.7): send one alert through one named sink.
pub struct AlertDispatchHandler {
    pub sinks: Arc<merrymaker_alerts::SinkRegistry>,
}

#[async_trait]
impl merrymaker_runner::Handler for AlertDispatchHandler {
    async fn handle(&self, payload: Value, _cancel: CancellationToken) -> Result<Option<Value>> {
        let payload = decode(payload)?;
        merrymaker_alerts::handle_alert_dispatch(payload, self.sinks.as_ref()).await
    }
}

/// `seen-string-purge` (§4.2, §4.5): the scheduled maintenance sweep over `seen_strings`.
/// Ignores its payload; the scheduler only ever fires it on a fixed interval.
pub struct SeenStringPurgeHandler {
    pub seen: Arc<dyn SeenStringRepository>,
    pub max_age: Duration,
    pub batch_size: i64,
}

#[async_trait]
impl merrymaker_runner::Handler for SeenStringPurgeHandler {
    async fn handle(&self, _payload: Value, _cancel: CancellationToken) -> Result<Option<Value>> {
        let purged = merrymaker_rules::purge_seen_strings(self.seen.as_ref(), self.max_age, self.batch_size).await?;
        Ok(Some(serde_json::json!({ "purged": purged })))
    }
}
