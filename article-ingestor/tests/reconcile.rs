use std::sync::Arc;

use article_ingestor::reconcile::Reconciler;
use article_ingestor::test_utils::{make_article, MemoryWarehouse};
use article_ingestor::warehouse::Warehouse;
use chrono::{Duration, Utc};

fn reconciler(warehouse: &Arc<MemoryWarehouse>) -> Reconciler<MemoryWarehouse> {
    Reconciler::new(warehouse.clone(), Duration::hours(24))
}

#[tokio::test]
async fn newest_ingestion_wins_across_batches() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    // Same logical event (title, publishedAt, source name all equal),
    // redelivered later with different content
    let first = make_article("X", "2024-01-01T00:00:00Z", "S", "first version");
    let second = make_article("X", "2024-01-01T00:00:00Z", "S", "second version");
    assert_eq!(first.fingerprint, second.fingerprint);

    let t1 = Utc::now() - Duration::minutes(10);
    let t2 = Utc::now();

    warehouse.append_staging(&[first.clone()], t1).await.unwrap();
    reconciler.run().await.unwrap();
    warehouse.append_staging(&[second], t2).await.unwrap();
    reconciler.run().await.unwrap();

    let canonical = warehouse.canonical_snapshot();
    assert_eq!(canonical.len(), 1);
    let (article, ingested_at) = &canonical[&first.fingerprint];
    assert_eq!(article.content.as_deref(), Some("second version"));
    assert_eq!(*ingested_at, t2);
}

#[tokio::test]
async fn out_of_order_batch_commits_converge() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    let older = make_article("X", "2024-01-01T00:00:00Z", "S", "older");
    let newer = make_article("X", "2024-01-01T00:00:00Z", "S", "newer");

    let t1 = Utc::now() - Duration::minutes(10);
    let t2 = Utc::now();

    // The newer batch lands and reconciles first; the older one arrives
    // afterwards (an overlapping commit, or a redelivery)
    warehouse.append_staging(&[newer], t2).await.unwrap();
    reconciler.run().await.unwrap();
    warehouse.append_staging(&[older.clone()], t1).await.unwrap();
    reconciler.run().await.unwrap();

    let canonical = warehouse.canonical_snapshot();
    assert_eq!(canonical.len(), 1);
    let (article, ingested_at) = &canonical[&older.fingerprint];
    assert_eq!(article.content.as_deref(), Some("newer"));
    assert_eq!(*ingested_at, t2);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    let now = Utc::now();
    let batch = vec![
        make_article("A", "2024-01-01T00:00:00Z", "S", "a"),
        make_article("B", "2024-01-02T00:00:00Z", "S", "b"),
    ];
    warehouse.append_staging(&batch, now).await.unwrap();

    reconciler.run().await.unwrap();
    let first_pass = warehouse.canonical_snapshot();

    reconciler.run().await.unwrap();
    let second_pass = warehouse.canonical_snapshot();

    assert_eq!(first_pass, second_pass);
    assert_eq!(first_pass.len(), 2);
}

#[tokio::test]
async fn replay_after_crash_creates_no_duplicates() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    let batch = vec![
        make_article("A", "2024-01-01T00:00:00Z", "S", "a"),
        make_article("B", "2024-01-02T00:00:00Z", "S", "b"),
    ];

    // Batch staged and reconciled, but the process dies before the
    // checkpoint advances - on restart the broker redelivers the batch
    warehouse
        .append_staging(&batch, Utc::now() - Duration::minutes(5))
        .await
        .unwrap();
    reconciler.run().await.unwrap();

    warehouse.append_staging(&batch, Utc::now()).await.unwrap();
    reconciler.run().await.unwrap();

    let canonical = warehouse.canonical_snapshot();
    assert_eq!(canonical.len(), 2);
    let (article, _) = &canonical[&batch[0].fingerprint];
    assert_eq!(article.content.as_deref(), Some("a"));
}

#[tokio::test]
async fn arrival_order_breaks_ingestion_time_ties() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    // Two copies of the same logical event inside a single batch share an
    // ingestion time; the later arrival must win deterministically
    let first = make_article("X", "2024-01-01T00:00:00Z", "S", "first");
    let second = make_article("X", "2024-01-01T00:00:00Z", "S", "second");

    warehouse
        .append_staging(&[first, second.clone()], Utc::now())
        .await
        .unwrap();
    reconciler.run().await.unwrap();

    let canonical = warehouse.canonical_snapshot();
    assert_eq!(canonical.len(), 1);
    let (article, _) = &canonical[&second.fingerprint];
    assert_eq!(article.content.as_deref(), Some("second"));
}

#[tokio::test]
async fn purge_removes_only_aged_staging_rows() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    let aged = make_article("Old", "2024-01-01T00:00:00Z", "S", "old");
    let fresh = make_article("New", "2024-06-01T00:00:00Z", "S", "new");

    warehouse
        .append_staging(&[aged.clone()], Utc::now() - Duration::days(2))
        .await
        .unwrap();
    warehouse
        .append_staging(&[fresh.clone()], Utc::now())
        .await
        .unwrap();

    let outcome = reconciler.run().await.unwrap();
    assert_eq!(outcome.distinct_fingerprints, 2);
    assert_eq!(outcome.purged, Some(1));
    assert_eq!(warehouse.staging_len(), 1);

    // Canonical keeps the aged article: purge only trims staging
    let canonical = warehouse.canonical_snapshot();
    assert_eq!(canonical.len(), 2);
    assert!(canonical.contains_key(&aged.fingerprint));

    // And a later run never disturbs it
    reconciler.run().await.unwrap();
    assert_eq!(warehouse.canonical_snapshot().len(), 2);
}

#[tokio::test]
async fn purge_failure_does_not_fail_the_run() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let reconciler = reconciler(&warehouse);

    warehouse
        .append_staging(
            &[make_article("Old", "2024-01-01T00:00:00Z", "S", "old")],
            Utc::now() - Duration::days(2),
        )
        .await
        .unwrap();

    warehouse.fail_next_purges(1);
    let outcome = reconciler.run().await.unwrap();
    assert_eq!(outcome.upserted, 1);
    assert_eq!(outcome.purged, None);
    assert_eq!(warehouse.staging_len(), 1);

    // The next cycle gets the purge through
    let outcome = reconciler.run().await.unwrap();
    assert_eq!(outcome.purged, Some(1));
    assert_eq!(warehouse.staging_len(), 0);
}
