use async_trait::async_trait;
use chrono::{DateTime, Utc};
use merrymaker_core::{CreateOpts, CreateOutcome, CreatedJob, Error, Job, JobState, JobStats, JobStore, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let state: String = row.try_get("state")?;
    Ok(Job {
        id: row.try_get("id")?,
        task_name: row.try_get("task_name")?,
        payload: row.try_get("payload")?,
        state: JobState::from_str(&state)
            .ok_or_else(|| Error::fatal(anyhow::anyhow!("unknown job state {state}")))?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        idempotency_key: row.try_get("idempotency_key")?,
        lease_until: row.try_get("lease_until")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        worker_id: row.try_get("worker_id")?,
        available_at: row.try_get("available_at")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        failed_reason: row.try_get("failed_reason")?,
    })
}

fn duration_millis(d: Duration) -> i64 {
    let ms = d.as_millis();
    if ms > i64::MAX as u128 {
        i64::MAX
    } else {
        ms as i64
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, task_name: &str, payload: Value, opts: CreateOpts) -> Result<CreatedJob> {
        let available_at = opts.available_at.unwrap_or_else(Utc::now);
        let max_attempts = if opts.max_attempts > 0 { opts.max_attempts } else { 5 };

        let mut tx = self.pool.begin().await?;

        if let Some(key) = &opts.idempotency_key {
            let existing = sqlx::query(
                r#"
                SELECT id, task_name, payload, state, attempts, max_attempts, idempotency_key,
                       lease_until, heartbeat_at, worker_id, available_at, created_at,
                       started_at, finished_at, failed_reason
                FROM jobs.jobs
                WHERE task_name = $1
                  AND idempotency_key = $2
                  AND state NOT IN ('completed', 'failed', 'expired')
                "#,
            )
            .bind(task_name)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                let job = row_to_job(&row)?;
                tx.commit().await?;
                return Ok(CreatedJob { job, outcome: CreateOutcome::AlreadyExists });
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO jobs.jobs (task_name, payload, state, max_attempts, idempotency_key, available_at)
            VALUES ($1, $2, 'pending', $3, $4, $5)
            RETURNING id, task_name, payload, state, attempts, max_attempts, idempotency_key,
                      lease_until, heartbeat_at, worker_id, available_at, created_at,
                      started_at, finished_at, failed_reason
            "#,
        )
        .bind(task_name)
        .bind(&payload)
        .bind(max_attempts)
        .bind(&opts.idempotency_key)
        .bind(available_at)
        .fetch_one(&mut *tx)
        .await;

        // A concurrent insert can still win the idempotency race between our SELECT and
        // INSERT; the partial unique index is the real guarantee, this is belt-and-braces.
        let row = match row {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some("jobs_idempotency_key_uniq") => {
                let key = opts.idempotency_key.as_deref().unwrap_or_default();
                let row = sqlx::query(
                    r#"
                    SELECT id, task_name, payload, state, attempts, max_attempts, idempotency_key,
                           lease_until, heartbeat_at, worker_id, available_at, created_at,
                           started_at, finished_at, failed_reason
                    FROM jobs.jobs
                    WHERE task_name = $1 AND idempotency_key = $2
                      AND state NOT IN ('completed', 'failed', 'expired')
                    "#,
                )
                .bind(task_name)
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(CreatedJob { job: row_to_job(&row)?, outcome: CreateOutcome::AlreadyExists });
            }
            Err(other) => return Err(other.into()),
        };

        tx.commit().await?;
        Ok(CreatedJob { job: row_to_job(&row)?, outcome: CreateOutcome::Created })
    }

    async fn reserve_next(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>> {
        let lease_secs = lease.as_secs_f64().max(0.0);
        let row = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs.jobs
                WHERE state = 'pending' AND available_at <= now()
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs.jobs AS j
            SET state = 'active',
                attempts = attempts + 1,
                started_at = now(),
                lease_until = now() + ($2::text || ' seconds')::interval,
                heartbeat_at = now(),
                worker_id = $3
            FROM picked
            WHERE j.id = picked.id
            RETURNING j.id, j.task_name, j.payload, j.state, j.attempts, j.max_attempts,
                      j.idempotency_key, j.lease_until, j.heartbeat_at, j.worker_id,
                      j.available_at, j.created_at, j.started_at, j.finished_at, j.failed_reason
            "#,
        )
        .bind(worker_id)
        .bind(lease_secs)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn wait_for_notification(&self, task_name: &str, timeout: Duration) -> Result<()> {
        use sqlx::postgres::PgListener;

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&format!("jobs_new_{task_name}")).await?;

        match tokio::time::timeout(timeout, listener.recv()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(()), // timeout: caller re-polls with reserve_next regardless
        }
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str, new_lease_until: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs.jobs
            SET lease_until = $3, heartbeat_at = now()
            WHERE id = $1 AND worker_id = $2 AND state = 'active' AND lease_until > now()
            RETURNING lease_until
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(new_lease_until)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("lease_until")?),
            None => Err(Error::LeaseLost),
        }
    }

    async fn complete(&self, job_id: Uuid, result: Option<Value>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE jobs.jobs
            SET state = 'completed', finished_at = now()
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if let Some(payload) = result {
            sqlx::query(
                r#"
                INSERT INTO jobs.job_results (job_id, outcome, payload)
                VALUES ($1, 'completed', $2)
                ON CONFLICT (job_id) DO UPDATE SET outcome = excluded.outcome, payload = excluded.payload, produced_at = now()
                "#,
            )
            .bind(job_id)
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: &str, retry: bool) -> Result<()> {
        if retry {
            // available_at backoff is base(2s)·2^(attempts-1), capped at 300s (§4.1).
            sqlx::query(
                r#"
                UPDATE jobs.jobs
                SET state = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                    finished_at = CASE WHEN attempts >= max_attempts THEN now() ELSE finished_at END,
                    available_at = CASE
                        WHEN attempts >= max_attempts THEN available_at
                        ELSE now() + (LEAST(2.0 * power(2.0, (attempts - 1)::double precision), 300.0) || ' seconds')::interval
                    END,
                    lease_until = NULL,
                    heartbeat_at = NULL,
                    worker_id = NULL,
                    failed_reason = $2
                WHERE id = $1 AND state = 'active'
                "#,
            )
            .bind(job_id)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs.jobs
                SET state = 'failed', finished_at = now(), failed_reason = $2
                WHERE id = $1 AND state = 'active'
                "#,
            )
            .bind(job_id)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn stats(&self, task_name: Option<&str>) -> Result<JobStats> {
        let row = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE state = 'pending') AS pending,
                count(*) FILTER (WHERE state = 'active') AS active,
                count(*) FILTER (WHERE state = 'failed' AND finished_at > now() - interval '1 hour') AS failed_last_hour
            FROM jobs.jobs
            WHERE $1::text IS NULL OR task_name = $1
            "#,
        )
        .bind(task_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            pending: row.try_get("pending")?,
            active: row.try_get("active")?,
            failed_last_hour: row.try_get("failed_last_hour")?,
        })
    }

    async fn count_in_states(&self, task_name: &str, states: &[JobState]) -> Result<i64> {
        let state_strs: Vec<&'static str> = states.iter().map(|s| s.as_str()).collect();
        let row = sqlx::query(
            r#"
            SELECT count(*) AS n
            FROM jobs.jobs
            WHERE task_name = $1 AND state = ANY($2)
            "#,
        )
        .bind(task_name)
        .bind(&state_strs[..])
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn fail_stale_pending(&self, max_age: Duration, batch: i64) -> Result<i64> {
        let max_age_secs = duration_millis(max_age) as f64 / 1000.0;
        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs.jobs
                WHERE state = 'pending' AND available_at < now() - ($1::text || ' seconds')::interval
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs.jobs AS j
            SET state = 'failed', finished_at = now(), failed_reason = 'stale-pending'
            FROM picked
            WHERE j.id = picked.id
            "#,
        )
        .bind(max_age_secs)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    async fn expire_leases(&self, batch: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs.jobs
                WHERE state = 'active' AND lease_until < now()
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs.jobs AS j
            SET state = CASE WHEN attempts >= max_attempts THEN 'expired' ELSE 'pending' END,
                finished_at = CASE WHEN attempts >= max_attempts THEN now() ELSE finished_at END,
                available_at = CASE
                    WHEN attempts >= max_attempts THEN available_at
                    ELSE now() + (LEAST(2.0 * power(2.0, (attempts - 1)::double precision), 300.0) || ' seconds')::interval
                END,
                lease_until = NULL,
                heartbeat_at = NULL,
                worker_id = NULL,
                failed_reason = 'lease expired'
            FROM picked
            WHERE j.id = picked.id
            "#,
        )
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    async fn delete_old_jobs(&self, older_than: Duration, states: &[JobState], batch: i64) -> Result<i64> {
        let older_secs = duration_millis(older_than) as f64 / 1000.0;
        let state_strs: Vec<&'static str> = states.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs.jobs
                WHERE state = ANY($1)
                  AND finished_at IS NOT NULL
                  AND finished_at < now() - ($2::text || ' seconds')::interval
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM jobs.jobs WHERE id IN (SELECT id FROM picked)
            "#,
        )
        .bind(&state_strs[..])
        .bind(older_secs)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }

    async fn delete_old_job_results(&self, older_than: Duration, batch: i64) -> Result<i64> {
        let older_secs = duration_millis(older_than) as f64 / 1000.0;
        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT job_id
                FROM jobs.job_results
                WHERE produced_at < now() - ($1::text || ' seconds')::interval
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM jobs.job_results WHERE job_id IN (SELECT job_id FROM picked)
            "#,
        )
        .bind(older_secs)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::env;

    async fn test_pool() -> Option<PgPool> {
        let url = env::var("JOBS_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.ok()?;
        sqlx::migrate!("./migrations/jobs").run(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    async fn create_is_idempotent_under_a_shared_key() {
        let Some(pool) = test_pool().await else { return };
        let store = PgJobStore::new(pool);

        let opts = CreateOpts::new(3).with_idempotency_key("scan:site-1");
        let first = store.create("scan", serde_json::json!({"url": "https://a"}), opts.clone()).await.unwrap();
        assert_eq!(first.outcome, CreateOutcome::Created);

        let second = store.create("scan", serde_json::json!({"url": "https://a"}), opts).await.unwrap();
        assert_eq!(second.outcome, CreateOutcome::AlreadyExists);
        assert_eq!(second.job.id, first.job.id);
    }

    #[tokio::test]
    async fn reserve_next_picks_oldest_pending_and_sets_lease() {
        let Some(pool) = test_pool().await else { return };
        let store = PgJobStore::new(pool);

        store.create("reserve-test", serde_json::json!({}), CreateOpts::new(3)).await.unwrap();
        let job = store.reserve_next("worker-a", Duration::from_secs(30)).await.unwrap();
        assert!(job.is_some());
        let job = job.unwrap();
        assert_eq!(job.state, JobState::Active);
        assert!(job.lease_until.is_some());
    }
}
