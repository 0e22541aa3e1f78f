use merrymaker_core::{
    AlertStore, CreateOpts, JobStore, Result, ScanEvent, ScanLog, ScanLogLevel, ScanLogStore,
};
use merrymaker_rules::RuleEngine;
use serde::Deserialize;
use uuid::Uuid;

/// The `rule-job` payload the scan-event pipeline enqueues (§4.6): which rule to run,
/// against which event.
#[derive(Debug, Deserialize)]
pub struct RuleJobPayload {
    pub rule_name: String,
    pub event: ScanEvent,
}

/// The `rule-job` handler (§4.6): runs one rule against one event, and for every alert
/// it produces, writes a `rule-alert` scan log *and* pushes an `alert` job (§4.7 picks
/// it up and fans it out per sink).
pub async fn handle_rule_job(
    payload: RuleJobPayload,
    rule_engine: &RuleEngine,
    scan_logs: &dyn ScanLogStore,
    alerts: &dyn AlertStore,
    jobs: &dyn JobStore,
) -> Result<()> {
    let alerts_raised = match rule_engine.evaluate_one(&payload.rule_name, &payload.event).await {
        Ok(alerts_raised) => alerts_raised,
        Err(err) => {
            // Rule handlers never fail the scan pipeline: a rule-evaluation error becomes
            // a log entry, not a retry (§7).
            let log = ScanLog {
                id: Uuid::new_v4(),
                scan_id: payload.event.scan_id,
                entry: "rule-alert".to_string(),
                level: ScanLogLevel::Error,
                event: serde_json::json!({
                    "rule": payload.rule_name,
                    "error": err.to_string(),
                }),
                created_at: payload.event.produced_at,
            };
            scan_logs.append(&[log]).await?;
            return Ok(());
        }
    };

    if alerts_raised.is_empty() {
        return Ok(());
    }

    let mut logs = Vec::with_capacity(alerts_raised.len());
    for raised in &alerts_raised {
        logs.push(ScanLog {
            id: Uuid::new_v4(),
            scan_id: payload.event.scan_id,
            entry: "rule-alert".to_string(),
            level: ScanLogLevel::Warn,
            event: serde_json::json!({
                "rule": payload.rule_name,
                "message": raised.message,
                "context": raised.context,
            }),
            created_at: payload.event.produced_at,
        });
    }
    scan_logs.append(&logs).await?;

    for raised in alerts_raised {
        let alert = merrymaker_core::Alert {
            id: Uuid::new_v4(),
            rule: payload.rule_name.clone(),
            scan_id: payload.event.scan_id,
            site_id: None,
            message: raised.message,
            context: raised.context,
            resolved_at: None,
            created_at: payload.event.produced_at,
        };
        alerts.create(&alert).await?;

        let alert_payload = serde_json::to_value(&alert)
            .map_err(|e| merrymaker_core::Error::fatal(anyhow::anyhow!(e)))?;
        jobs.create("alert", alert_payload, CreateOpts::new(3)).await?;
    }

    Ok(())
}
