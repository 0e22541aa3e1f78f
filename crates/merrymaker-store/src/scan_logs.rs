use async_trait::async_trait;
use merrymaker_core::{Result, ScanLog, ScanLogStore};
use sqlx::PgPool;

/// Append-only sink for `rules.scan_logs` (§4.6 step 1). `append` takes a slice so a
/// single handler invocation carrying several bundled events produces one insert.
#[derive(Debug, Clone)]
pub struct PgScanLogStore {
    pool: PgPool,
}

impl PgScanLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanLogStore for PgScanLogStore {
    async fn append(&self, entries: &[ScanLog]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO rules.scan_logs (id, scan_id, entry, level, event, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.id)
            .bind(entry.scan_id)
            .bind(&entry.entry)
            .bind(entry.level.as_str())
            .bind(&entry.event)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
