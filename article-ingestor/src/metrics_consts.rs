pub const EVENTS_RECEIVED: &str = "article_ingestor_events_received";
pub const EMPTY_PAYLOADS: &str = "article_ingestor_empty_payloads";
pub const DECODE_ERRORS: &str = "article_ingestor_decode_errors";
pub const WORKER_BLOCKED: &str = "article_ingestor_worker_blocked";
pub const RECV_DEQUEUED: &str = "article_ingestor_recv_dequeued";

pub const BATCH_ACQUIRE_TIME: &str = "article_ingestor_batch_acquire_time_ms";
pub const BATCH_SIZE: &str = "article_ingestor_batch_size";
pub const BATCHES_FLUSHED: &str = "article_ingestor_batches_flushed";

pub const STAGING_ATTEMPTS: &str = "article_ingestor_staging_attempts";
pub const STAGING_ROWS_WRITTEN: &str = "article_ingestor_staging_rows_written";
pub const STAGING_COMMIT_TIME: &str = "article_ingestor_staging_commit_time_ms";

pub const CHECKPOINT_ADVANCES: &str = "article_ingestor_checkpoint_advances";
pub const CHECKPOINT_SKIPPED: &str = "article_ingestor_checkpoint_skipped";

pub const RECONCILE_RUNS: &str = "article_ingestor_reconcile_runs";
pub const RECONCILE_TIME: &str = "article_ingestor_reconcile_time_ms";
pub const CANONICAL_UPSERTS: &str = "article_ingestor_canonical_upserts";
pub const STAGING_ROWS_PURGED: &str = "article_ingestor_staging_rows_purged";
pub const PURGE_FAILURES: &str = "article_ingestor_purge_failures";
