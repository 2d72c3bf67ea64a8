use common_kafka::kafka_consumer::OffsetErr;
use thiserror::Error;

/// A payload that could not be parsed into an article. Carries the original
/// payload so operators can see what the producer actually sent; the message
/// itself is dropped, never retried.
#[derive(Debug, Error)]
#[error("failed to decode article payload: {source}")]
pub struct DecodeError {
    #[source]
    pub source: serde_json::Error,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum StagingCommitError {
    #[error("staging append failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("staging dedup read failed: {0}")]
    Select(sqlx::Error),
    #[error("canonical merge failed: {0}")]
    Merge(sqlx::Error),
    #[error("staging purge failed: {0}")]
    Purge(sqlx::Error),
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),
}

/// Failing to persist a consumed position is fatal for the commit cycle -
/// consuming past an undurable checkpoint risks losing the batch on a crash.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("offset store failed: {0}")]
    Store(#[from] OffsetErr),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    StagingCommit(#[from] StagingCommitError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("reconciliation failed {failures} consecutive times, last error: {last}")]
    ReconcileStalled { failures: u64, last: ReconcileError },
}
