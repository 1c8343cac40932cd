//! Postgres-backed enrichment job queue.
//!
//! Correctness rests on two database mechanisms rather than process-local
//! locks: a partial unique index keeps at most one live (pending or
//! running) job per (kind, entity), and batch claiming runs a single
//! atomic UPDATE whose target set comes from a `FOR UPDATE SKIP LOCKED`
//! select, so concurrent workers never block or double-claim. A worker
//! crash leaves a running job with a stale lease; the claim predicate
//! reclaims it once the lease times out.

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::models::{
    EnqueueResult, EnrichmentJob, EntityKind, JobKind, JobStatus, KindCount, QueueStats,
};

pub struct JobQueueService {
    pool: PgPool,
    settings: QueueSettings,
}

impl JobQueueService {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Enqueue a job unless an active one already covers this
    /// (kind, entity); in that case the existing job id is returned.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        entity_id: Uuid,
        priority: i64,
    ) -> Result<EnqueueResult> {
        let entity_kind = kind.entity_kind();

        // Two rounds: the active job may reach a terminal status between
        // our conflicting insert and the lookup of the winner.
        for _ in 0..2 {
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r#"
                INSERT INTO enrichment_jobs (id, job_kind, entity_kind, entity_id, priority, max_attempts)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (job_kind, entity_kind, entity_id)
                    WHERE status IN ('pending', 'running')
                    DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(kind.as_str())
            .bind(entity_kind.as_str())
            .bind(entity_id)
            .bind(priority)
            .bind(self.settings.max_attempts)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((job_id,)) = inserted {
                tracing::debug!(%job_id, kind = %kind, %entity_id, "enqueued enrichment job");
                return Ok(EnqueueResult {
                    job_id,
                    created: true,
                    reason: None,
                });
            }

            let existing: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM enrichment_jobs
                WHERE job_kind = $1 AND entity_kind = $2 AND entity_id = $3
                  AND status IN ('pending', 'running')
                LIMIT 1
                "#,
            )
            .bind(kind.as_str())
            .bind(entity_kind.as_str())
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((job_id,)) = existing {
                return Ok(EnqueueResult {
                    job_id,
                    created: false,
                    reason: Some("already_active"),
                });
            }
        }

        Err(anyhow!(
            "enqueue raced repeatedly for {kind} on entity {entity_id}"
        ))
    }

    /// Atomically claim up to `limit` due jobs for `worker_id`.
    ///
    /// Eligible rows are pending-and-due, plus running rows whose lease
    /// has expired. Ordering is priority DESC, created_at ASC.
    pub async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<EnrichmentJob>> {
        let jobs: Vec<EnrichmentJob> = sqlx::query_as(
            r#"
            UPDATE enrichment_jobs
            SET status = 'running', locked_at = now(), locked_by = $1, updated_at = now()
            WHERE id IN (
                SELECT id FROM enrichment_jobs
                WHERE (status = 'pending' AND run_after <= now())
                   OR (status = 'running' AND locked_at < now() - make_interval(secs => $3))
                ORDER BY priority DESC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(limit)
        .bind(self.settings.lease_timeout_secs as f64)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Mark a job succeeded and stamp the entity's `last_enriched_at`.
    pub async fn complete(&self, job: &EnrichmentJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE enrichment_jobs
            SET status = 'succeeded', locked_at = NULL, locked_by = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        match job.entity_kind.parse::<EntityKind>() {
            Ok(entity_kind) => {
                let stamp = format!(
                    "UPDATE {} SET last_enriched_at = now(), updated_at = now() WHERE id = $1",
                    entity_kind.table()
                );
                sqlx::query(&stamp)
                    .bind(job.entity_id)
                    .execute(&self.pool)
                    .await?;
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "job has unknown entity kind");
            }
        }

        Ok(())
    }

    /// Record a failure: retry with backoff until attempts are exhausted,
    /// then park the job as failed.
    pub async fn fail(&self, job: &EnrichmentJob, error: &str) -> Result<()> {
        let attempts = job.attempts + 1;

        if attempts >= job.max_attempts {
            sqlx::query(
                r#"
                UPDATE enrichment_jobs
                SET status = 'failed', attempts = $2, locked_at = NULL, locked_by = NULL,
                    last_error = $3, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(attempts)
            .bind(error)
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                job_id = %job.id,
                kind = %job.job_kind,
                attempts,
                error,
                "enrichment job failed permanently"
            );
        } else {
            let backoff_secs = job_retry_backoff_secs(
                self.settings.backoff_base_secs,
                self.settings.backoff_multiplier,
                self.settings.backoff_cap_secs,
                attempts,
            );

            sqlx::query(
                r#"
                UPDATE enrichment_jobs
                SET status = 'pending', attempts = $2,
                    run_after = now() + make_interval(secs => $3),
                    locked_at = NULL, locked_by = NULL, last_error = $4, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(attempts)
            .bind(backoff_secs as f64)
            .bind(error)
            .execute(&self.pool)
            .await?;

            tracing::info!(
                job_id = %job.id,
                kind = %job.job_kind,
                attempts,
                backoff_secs,
                error,
                "enrichment job failed, retry scheduled"
            );
        }

        Ok(())
    }

    /// Delete terminal jobs older than the configured TTL.
    pub async fn reap(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM enrichment_jobs
            WHERE status IN ('succeeded', 'failed')
              AND updated_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(self.settings.reap_ttl_secs as f64)
        .execute(&self.pool)
        .await?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::info!(reaped, "reaped terminal enrichment jobs");
        }
        Ok(reaped)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<EnrichmentJob>> {
        let job = sqlx::query_as("SELECT * FROM enrichment_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let by_status: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM enrichment_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in by_status {
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Running => stats.running = count,
                JobStatus::Succeeded => stats.succeeded = count,
                JobStatus::Failed => stats.failed = count,
            }
        }

        let by_kind: Vec<KindCount> = sqlx::query_as(
            r#"
            SELECT job_kind, COUNT(*) AS count FROM enrichment_jobs
            WHERE status = 'pending'
            GROUP BY job_kind
            ORDER BY count DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        stats.pending_by_kind = by_kind;

        Ok(stats)
    }
}

/// Delay before retry number `attempt` (1-based): `min(base · mult^(n−1), cap)`.
pub fn job_retry_backoff_secs(base_secs: i64, multiplier: i64, cap_secs: i64, attempt: i64) -> i64 {
    let mut delay = base_secs;
    for _ in 1..attempt {
        delay = delay.saturating_mul(multiplier);
        if delay >= cap_secs {
            return cap_secs;
        }
    }
    delay.min(cap_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_is_exactly_base() {
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 1), 60);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 2), 120);
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 3), 240);
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 6), 1920);
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 7), 3600);
        assert_eq!(job_retry_backoff_secs(60, 2, 3600, 50), 3600);
    }
}
