use crate::{app::App, config::MerrymakerConfig};
use anyhow::bail;
use merrymaker_core::{CreateOpts, ScanState};
use std::time::Duration;
use uuid::Uuid;

/// §6 `scan-runner`: originates a scan, enqueues the `scan` job that drives it, and
/// polls `ScanStore::get_state` until it reaches a terminal state or `timeout` elapses.
pub async fn run(cfg: &MerrymakerConfig, url: String, timeout_secs: u64) -> anyhow::Result<()> {
    let app = App::connect(cfg).await?;

    let scan_id = Uuid::new_v4();
    app.scans.create(scan_id, Some(&url)).await?;

    let payload = serde_json::json!({ "scan_id": scan_id, "scan_url": url });
    app.jobs.create("scan", payload, CreateOpts::new(1)).await?;

    tracing::info!(event = "merrymaker.scan_runner.queued", scan_id = %scan_id, url = %url, "scan queued");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let poll_interval = Duration::from_millis(500);

    loop {
        if let Some(state) = app.scans.get_state(scan_id).await? {
            match state {
                ScanState::Complete => {
                    tracing::info!(event = "merrymaker.scan_runner.complete", scan_id = %scan_id, "scan complete");
                    return Ok(());
                }
                ScanState::Error => {
                    bail!("scan {scan_id} ended in error state");
                }
                ScanState::Queued | ScanState::Active => {}
            }
        }

        if tokio::time::Instant::now() >= deadline {
            bail!("scan {scan_id} did not finish within {timeout_secs}s");
        }

        tokio::time::sleep(poll_interval).await;
    }
}
