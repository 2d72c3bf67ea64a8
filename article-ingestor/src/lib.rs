use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_kafka::kafka_consumer::{Offset, RecvErr, SingleTopicConsumer};
use health::HealthHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::{BatchAccumulator, FlushReason};
use crate::checkpoint::ProgressTracker;
use crate::config::Config;
use crate::errors::{PipelineError, ReconcileError, StagingCommitError};
use crate::metrics_consts::{
    BATCHES_FLUSHED, BATCH_ACQUIRE_TIME, BATCH_SIZE, CANONICAL_UPSERTS, DECODE_ERRORS,
    EMPTY_PAYLOADS, EVENTS_RECEIVED, RECONCILE_RUNS, RECONCILE_TIME, RECV_DEQUEUED,
    STAGING_ATTEMPTS, STAGING_COMMIT_TIME, STAGING_ROWS_PURGED, STAGING_ROWS_WRITTEN,
    WORKER_BLOCKED,
};
use crate::reconcile::Reconciler;
use crate::types::Article;
use crate::warehouse::Warehouse;

pub mod app_context;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod metrics_consts;
pub mod reconcile;
pub mod test_utils;
pub mod types;
pub mod warehouse;

const STAGING_RETRY_DELAY_MS: u64 = 50;

/// Pulls from the broker, decodes, fingerprints, and hands (article, offset)
/// pairs to the staging loop. Decode failures are dropped here and never
/// surface further - their offsets are covered by the next staged batch on
/// the same partition.
pub async fn consumer_loop(
    consumer: SingleTopicConsumer,
    channel: mpsc::Sender<(Article, Offset)>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            r = consumer.recv() => r,
            _ = cancel.cancelled() => {
                info!("consumer loop stopping, no longer pulling events");
                return;
            }
        };
        let (payload, offset) = match received {
            Ok(r) => r,
            Err(RecvErr::Empty) => {
                warn!("Received empty payload");
                metrics::counter!(EMPTY_PAYLOADS).increment(1);
                continue;
            }
            Err(RecvErr::Kafka(e)) => {
                panic!("Kafka error: {:?}", e); // We just panic if we fail to recv from kafka, if it's down, we're down
            }
        };

        let article = match Article::decode(&payload) {
            Ok(article) => article,
            Err(e) => {
                metrics::counter!(DECODE_ERRORS).increment(1);
                warn!(payload = %e.payload, "dropping undecodable payload: {}", e.source);
                continue;
            }
        };

        metrics::counter!(EVENTS_RECEIVED).increment(1);

        match channel.try_send((article, offset)) {
            Ok(_) => {}
            Err(TrySendError::Full(pair)) => {
                warn!("Staging loop blocked");
                metrics::counter!(WORKER_BLOCKED).increment(1);
                if channel.send(pair).await.is_err() {
                    warn!("Channel closed, consumer loop exiting");
                    return;
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Channel closed, consumer loop exiting");
                return;
            }
        }
    }
}

/// Append one batch to staging, retrying transient failures as a whole unit.
/// The ingestion time is taken fresh per attempt, so the staged value is the
/// commit time of the attempt that actually landed.
pub async fn stage_batch<W: Warehouse>(
    warehouse: &W,
    articles: &[Article],
    max_attempts: u64,
) -> Result<DateTime<Utc>, StagingCommitError> {
    let mut tries: u64 = 1;
    loop {
        let ingested_at = Utc::now();
        let commit_time = common_metrics::timing_guard(STAGING_COMMIT_TIME, &[]);
        match warehouse.append_staging(articles, ingested_at).await {
            Ok(rows) => {
                metrics::counter!(STAGING_ATTEMPTS, &[("result", "success")]).increment(1);
                metrics::counter!(STAGING_ROWS_WRITTEN).increment(rows);
                commit_time.fin();
                return Ok(ingested_at);
            }
            Err(e) => {
                commit_time.fin();
                if tries >= max_attempts {
                    metrics::counter!(STAGING_ATTEMPTS, &[("result", "failed")]).increment(1);
                    error!(
                        "staging commit failed after {} attempts, giving up: {}",
                        tries, e
                    );
                    return Err(e);
                }

                metrics::counter!(STAGING_ATTEMPTS, &[("result", "retry")]).increment(1);
                let jitter = rand::random::<u64>() % 50;
                let delay = tries * STAGING_RETRY_DELAY_MS + jitter;
                warn!("staging commit failed: {}, sleeping for {}ms", e, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                tries += 1;
            }
        }
    }
}

/// Accumulates events into bounded batches, stages each batch durably, then
/// (and only then) advances the checkpoint and pokes the reconciler.
///
/// Returns when the channel drains after cancellation - the last partial
/// batch is staged on the way out. An exhausted staging retry or a failed
/// offset store is fatal: the process must not consume past either.
pub async fn staging_loop<W: Warehouse>(
    config: Config,
    warehouse: Arc<W>,
    mut tracker: ProgressTracker,
    mut channel: mpsc::Receiver<(Article, Offset)>,
    reconcile_tx: mpsc::Sender<()>,
    liveness: HealthHandle,
) -> Result<(), PipelineError> {
    let mut accumulator: BatchAccumulator<Offset> =
        BatchAccumulator::new(config.max_batch_size, config.batch_interval());
    let mut draining = false;

    loop {
        let batch_time = common_metrics::timing_guard(BATCH_ACQUIRE_TIME, &[]);
        let reason = loop {
            if let Some(reason) = accumulator.flush_reason() {
                break reason;
            }
            if draining {
                break FlushReason::Shutdown;
            }
            liveness.report_healthy().await;

            let mut buf = Vec::new();
            // We race these two, so the age bound gets re-checked about once
            // a second even when nothing arrives
            tokio::select! {
                got = channel.recv_many(&mut buf, accumulator.remaining_capacity()) => {
                    if got == 0 {
                        draining = true;
                    }
                    metrics::gauge!(RECV_DEQUEUED).set(got as f64);
                    for (article, offset) in buf {
                        accumulator.push(article, offset);
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        };
        batch_time.fin();

        if accumulator.is_empty() {
            // Only reachable when draining: nothing left to stage
            info!("channel drained, staging loop exiting");
            return Ok(());
        }

        metrics::histogram!(BATCH_SIZE).record(accumulator.len() as f64);
        metrics::counter!(BATCHES_FLUSHED, &[("reason", reason.as_str())]).increment(1);

        let (articles, offsets) = accumulator.drain();

        stage_batch(warehouse.as_ref(), &articles, config.staging_max_attempts).await?;

        tracker.advance(offsets)?;

        // A trigger already in the queue covers this batch too
        _ = reconcile_tx.try_send(());

        if draining {
            info!("final batch staged, staging loop exiting");
            return Ok(());
        }
    }
}

/// Runs reconcile passes one at a time: after every staged batch, plus a
/// fallback tick so retention purges happen on an idle stream. The first
/// tick fires immediately, which also folds whatever a crashed predecessor
/// left behind in staging.
///
/// Individual failures just wait for the next trigger (the run is
/// idempotent), but too many in a row means the warehouse is gone and the
/// process should hand over to its supervisor.
pub async fn reconciler_loop<W: Warehouse>(
    reconciler: Reconciler<W>,
    mut trigger: mpsc::Receiver<()>,
    interval: Duration,
    max_failures: u64,
    liveness: HealthHandle,
) -> Result<(), PipelineError> {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u64 = 0;
    loop {
        let last_run = tokio::select! {
            notified = trigger.recv() => {
                match notified {
                    Some(()) => false,
                    // Staging loop is gone; one last fold so shutdown
                    // leaves canonical current
                    None => true,
                }
            }
            _ = tick.tick() => false,
        };

        match run_reconcile(&reconciler, &liveness).await {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                if failures >= max_failures {
                    return Err(PipelineError::ReconcileStalled { failures, last: e });
                }
            }
        }

        if last_run {
            info!("reconciler loop exiting");
            return Ok(());
        }
    }
}

async fn run_reconcile<W: Warehouse>(
    reconciler: &Reconciler<W>,
    liveness: &HealthHandle,
) -> Result<(), ReconcileError> {
    liveness.report_healthy().await;
    let reconcile_time = common_metrics::timing_guard(RECONCILE_TIME, &[]);
    let result = reconciler.run().await;
    reconcile_time.fin();
    match result {
        Ok(outcome) => {
            metrics::counter!(RECONCILE_RUNS, &[("result", "success")]).increment(1);
            metrics::counter!(CANONICAL_UPSERTS).increment(outcome.upserted);
            if let Some(purged) = outcome.purged {
                metrics::counter!(STAGING_ROWS_PURGED).increment(purged);
            }
            info!(
                fingerprints = outcome.distinct_fingerprints,
                upserted = outcome.upserted,
                purged = ?outcome.purged,
                "reconcile run complete"
            );
            Ok(())
        }
        Err(e) => {
            metrics::counter!(RECONCILE_RUNS, &[("result", "error")]).increment(1);
            error!("reconcile failed, will retry next cycle: {}", e);
            Err(e)
        }
    }
}
