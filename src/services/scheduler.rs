//! Runtime glue: the fast and slow ingestion loops, the enrichment
//! worker loop and the queue reaper, all cooperating with a shared
//! shutdown flag. Every sleep is jittered and raced against the flag so
//! shutdown interrupts waits immediately.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::services::enrichment::EnrichmentWorker;
use crate::services::job_queue::JobQueueService;
use crate::services::reconciler::Reconciler;
use crate::services::session_engine::SessionEngine;

/// Spread an interval uniformly over `[base·(1−fraction), base·(1+fraction)]`.
pub fn jittered(base: Duration, fraction: f64) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return base;
    }
    let spread = (base_ms as f64 * fraction) as i64;
    if spread == 0 {
        return base;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((base_ms as i64 + offset).max(0) as u64)
}

/// Sleep that aborts as soon as the shutdown flag flips.
async fn cancellable_sleep(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

/// Fast loop: currently-playing polls through the session engine.
pub async fn run_fast_loop(
    engine: Arc<SessionEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "fast loop started");
    while !*shutdown.borrow() {
        if let Err(err) = engine.run_cycle().await {
            tracing::error!(error = %err, "session engine cycle failed");
        }
        cancellable_sleep(jittered(interval, 0.1), &mut shutdown).await;
    }
    tracing::info!("fast loop stopped");
}

/// Slow loop: recently-played reconciliation.
pub async fn run_slow_loop(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "slow loop started");
    while !*shutdown.borrow() {
        if let Err(err) = reconciler.run_cycle().await {
            tracing::error!(error = %err, "reconciler cycle failed");
        }
        cancellable_sleep(jittered(interval, 0.1), &mut shutdown).await;
    }
    tracing::info!("slow loop stopped");
}

/// Enrichment worker loop: drain batches, idle-poll when the queue is dry.
pub async fn run_worker_loop(
    worker: Arc<EnrichmentWorker>,
    idle_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker_id = %worker.worker_id(), "enrichment worker started");
    while !*shutdown.borrow() {
        let claimed = match worker.run_cycle(&mut shutdown).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(error = %err, "enrichment worker cycle failed");
                0
            }
        };

        if claimed == 0 {
            cancellable_sleep(jittered(idle_interval, 0.1), &mut shutdown).await;
        }
    }
    tracing::info!(worker_id = %worker.worker_id(), "enrichment worker stopped");
}

/// Reaper loop: periodically delete terminal jobs past their TTL.
pub async fn run_reaper_loop(
    queue: Arc<JobQueueService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "job reaper started");
    while !*shutdown.borrow() {
        cancellable_sleep(jittered(interval, 0.1), &mut shutdown).await;
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = queue.reap().await {
            tracing::error!(error = %err, "job reap failed");
        }
    }
    tracing::info!("job reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_millis(8000);
        for _ in 0..100 {
            let value = jittered(base, 0.1);
            assert!(value >= Duration::from_millis(7200));
            assert!(value <= Duration::from_millis(8800));
        }
    }

    #[test]
    fn zero_duration_passes_through() {
        assert_eq!(jittered(Duration::ZERO, 0.1), Duration::ZERO);
    }

    #[tokio::test]
    async fn cancellable_sleep_aborts_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let start = std::time::Instant::now();
        tx.send(true).unwrap();
        cancellable_sleep(Duration::from_secs(30), &mut rx).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
