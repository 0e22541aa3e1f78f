use merrymaker_core::{
    MetricsSink, Result, ScanEvent, ScanEventType, ScanLog, ScanLogLevel, ScanLogStore, ScanState,
    ScanStore,
};
use merrymaker_rules::RuleEngine;
use serde_json::Value;
use uuid::Uuid;

/// Maps a `ScanEventType` onto the log level its scan-log entry is written at; errors
/// and rule alerts surface louder than the routine browser-activity types (§4.6 step 1).
fn level_for(event_type: ScanEventType) -> ScanLogLevel {
    match event_type {
        ScanEventType::Error => ScanLogLevel::Error,
        ScanEventType::RuleAlert => ScanLogLevel::Warn,
        _ => ScanLogLevel::Info,
    }
}

fn entry_for(event_type: ScanEventType) -> &'static str {
    match event_type {
        ScanEventType::WebRequest => "web-request",
        ScanEventType::JsCall => "js-call",
        ScanEventType::Cookie => "cookie",
        ScanEventType::Console => "console",
        ScanEventType::Screenshot => "screenshot",
        ScanEventType::Complete => "complete",
        ScanEventType::Error => "error",
        ScanEventType::RuleAlert => "rule-alert",
    }
}

/// The `browser-event-queue` job handler (§4.6): persists every event as a scan log in
/// one batched insert, dispatches each to the rule engine, and transitions the parent
/// scan on a terminal (`complete`/`error`) event.
///
/// Events arrive as raw JSON rather than pre-decoded `ScanEvent`s: an unrecognized
/// `type` must drop only the offending event, not fail the whole batch (§6 — "unknown
/// `type` is dropped with a `unknown-event` metric; unknown fields are preserved
/// opaquely").
pub async fn handle_browser_events(
    raw_events: &[Value],
    scan_logs: &dyn ScanLogStore,
    rule_engine: &RuleEngine,
    scans: &dyn ScanStore,
    metrics: &dyn MetricsSink,
) -> Result<()> {
    if raw_events.is_empty() {
        return Ok(());
    }

    let mut events = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        match serde_json::from_value::<ScanEvent>(raw.clone()) {
            Ok(event) => events.push(event),
            Err(_) => {
                let event_type = raw.get("type").and_then(Value::as_str).unwrap_or("unknown");
                metrics.record_unknown_event(event_type);
            }
        }
    }

    if events.is_empty() {
        return Ok(());
    }

    let logs: Vec<ScanLog> = events
        .iter()
        .map(|event| ScanLog {
            id: Uuid::new_v4(),
            scan_id: event.scan_id,
            entry: entry_for(event.event_type).to_string(),
            level: level_for(event.event_type),
            event: event.payload.clone(),
            created_at: event.produced_at,
        })
        .collect();
    scan_logs.append(&logs).await?;

    for event in &events {
        rule_engine.dispatch(event).await?;

        match event.event_type {
            ScanEventType::Complete => scans.transition(event.scan_id, ScanState::Complete).await?,
            ScanEventType::Error => scans.transition(event.scan_id, ScanState::Error).await?,
            _ => {}
        }
    }

    Ok(())
}
