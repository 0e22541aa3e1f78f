use async_trait::async_trait;
use merrymaker_core::{Result, ScanState, ScanStore};
use sqlx::PgPool;
use uuid::Uuid;

/// `rules.scans`: the parent scan record the pipeline transitions on `complete`/`error`
/// events (§4.6 step 3). `transition` is a single conditional update keyed on
/// `state_rank` so repeat/out-of-order notifications never regress a terminal scan
/// (§9 Open Question: "last writer wins by monotonic state rank").
#[derive(Debug, Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn create(&self, scan_id: Uuid, site_url: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules.scans (id, state, state_rank, site_url, updated_at)
            VALUES ($1, 'queued', 0, $2, now())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(scan_id)
        .bind(site_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(&self, scan_id: Uuid, new_state: ScanState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules.scans (id, state, state_rank, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (id) DO UPDATE
            SET state = excluded.state, state_rank = excluded.state_rank, updated_at = now()
            WHERE rules.scans.state_rank <= excluded.state_rank
            "#,
        )
        .bind(scan_id)
        .bind(new_state.as_str())
        .bind(new_state.rank())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_state(&self, scan_id: Uuid) -> Result<Option<ScanState>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT state FROM rules.scans WHERE id = $1")
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(state,)| ScanState::from_str(&state)))
    }
}
