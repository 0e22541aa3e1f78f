use async_trait::async_trait;
use chrono::Utc;
use merrymaker_core::{
    Alert, IocRepository, IocType, Result, RuleCacheStore, SeenStringRepository, AlertStore,
};
use sqlx::{PgPool, Row};
use std::time::Duration;

/// Backs Tier 3 (`rules.iocs`/`rules.allow_list`), Tier 2 (`rules.rule_cache`),
/// `rules.seen_strings`, and `rules.alerts` off one pool. These four concerns share a
/// schema and a pool the way the teacher's `data` schema backs several sink tables from
/// one `PgPool` (§4.5, §9).
#[derive(Debug, Clone)]
pub struct PgRulesStore {
    pool: PgPool,
}

impl PgRulesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IocRepository for PgRulesStore {
    async fn is_ioc(&self, ioc_type: IocType, value: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM rules.iocs
            WHERE ioc_type = $1 AND value = $2 AND enabled
            "#,
        )
        .bind(ioc_type.as_str())
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn is_allow_listed(&self, entry_type: &str, key: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM rules.allow_list WHERE entry_type = $1 AND key = $2
            "#,
        )
        .bind(entry_type)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RuleCacheStore for PgRulesStore {
    async fn get(&self, cache_key: &str) -> Result<Option<bool>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM rules.rule_cache
            WHERE cache_key = $1 AND expires_at > now()
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("value")?;
                Ok(value.as_bool())
            }
            None => Ok(None),
        }
    }

    async fn set(&self, cache_key: &str, value: bool, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO rules.rule_cache (cache_key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(cache_key)
        .bind(serde_json::Value::Bool(value))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SeenStringRepository for PgRulesStore {
    async fn seen_and_touch(&self, entry_type: &str, key: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT 1 FROM rules.seen_strings WHERE entry_type = $1 AND key = $2
            "#,
        )
        .bind(entry_type)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let seen = existing.is_some();

        sqlx::query(
            r#"
            INSERT INTO rules.seen_strings (entry_type, key, last_cached)
            VALUES ($1, $2, now())
            ON CONFLICT (entry_type, key) DO UPDATE SET last_cached = now()
            "#,
        )
        .bind(entry_type)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(seen)
    }

    async fn purge_older_than(&self, max_age: Duration, batch: i64) -> Result<i64> {
        let max_age_secs = max_age.as_secs_f64();
        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id FROM rules.seen_strings
                WHERE last_cached < now() - ($1::text || ' seconds')::interval
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM rules.seen_strings WHERE id IN (SELECT id FROM picked)
            "#,
        )
        .bind(max_age_secs)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }
}

#[async_trait]
impl AlertStore for PgRulesStore {
    async fn create(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules.alerts (id, rule, scan_id, site_id, message, context, resolved_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.rule)
        .bind(alert.scan_id)
        .bind(alert.site_id)
        .bind(&alert.message)
        .bind(&alert.context)
        .bind(alert.resolved_at)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
