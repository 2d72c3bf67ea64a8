use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::errors::ReconcileError;
use crate::metrics_consts::PURGE_FAILURES;
use crate::warehouse::Warehouse;

/// What one reconcile run did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileOutcome {
    /// Distinct fingerprints seen in staging.
    pub distinct_fingerprints: usize,
    /// Canonical rows inserted or overwritten.
    pub upserted: u64,
    /// Staging rows purged; None when the purge step failed (it retries on
    /// the next run without invalidating the merge).
    pub purged: Option<u64>,
}

/// Folds the staging area into the canonical table and trims aged staging
/// rows. One instance runs at a time per canonical table - the driver owns
/// scheduling and serialization; this type owns only the three-step run.
pub struct Reconciler<W> {
    warehouse: Arc<W>,
    retention: Duration,
}

impl<W: Warehouse> Reconciler<W> {
    pub fn new(warehouse: Arc<W>, retention: Duration) -> Self {
        Self {
            warehouse,
            retention,
        }
    }

    /// One full pass: select the freshest staging row per fingerprint, merge
    /// those into canonical, then purge staging rows older than the retention
    /// window. Select/merge failures abort the run (both are idempotent and
    /// rerun on the next trigger). A purge failure does not - by then the
    /// merge has already landed, and the aged rows get another chance later.
    pub async fn run(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let latest = self.warehouse.latest_staged().await?;
        let mut outcome = ReconcileOutcome {
            distinct_fingerprints: latest.len(),
            ..Default::default()
        };

        if !latest.is_empty() {
            outcome.upserted = self.warehouse.upsert_canonical(&latest).await?;
        }

        let cutoff = Utc::now() - self.retention;
        match self.warehouse.purge_staging(cutoff).await {
            Ok(purged) => outcome.purged = Some(purged),
            Err(e) => {
                metrics::counter!(PURGE_FAILURES).increment(1);
                warn!("staging purge failed, retrying next cycle: {}", e);
            }
        }

        Ok(outcome)
    }
}
