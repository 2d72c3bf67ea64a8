//! Shared test utilities for the article-ingestor crate.
//!
//! The in-memory warehouse mirrors the Postgres implementation's semantics
//! closely enough to exercise the reconciliation contract without a live
//! database: same latest-per-fingerprint selection, same freshness guard on
//! the canonical upsert, same append-only staging with a serial sequence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{ReconcileError, StagingCommitError};
use crate::types::{Article, RawArticle, StagingRow};
use crate::warehouse::Warehouse;

#[derive(Default)]
struct MemoryState {
    next_seq: i64,
    staging: Vec<StagingRow>,
    canonical: HashMap<String, (Article, DateTime<Utc>)>,
    fail_appends: u32,
    fail_purges: u32,
}

#[derive(Default)]
pub struct MemoryWarehouse {
    inner: Mutex<MemoryState>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` staging appends fail, to exercise batch retry.
    pub fn fail_next_appends(&self, n: u32) {
        self.inner.lock().unwrap().fail_appends = n;
    }

    /// Make the next `n` purges fail, to exercise purge-independent retry.
    pub fn fail_next_purges(&self, n: u32) {
        self.inner.lock().unwrap().fail_purges = n;
    }

    pub fn staging_len(&self) -> usize {
        self.inner.lock().unwrap().staging.len()
    }

    pub fn canonical_snapshot(&self) -> HashMap<String, (Article, DateTime<Utc>)> {
        self.inner.lock().unwrap().canonical.clone()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn append_staging(
        &self,
        articles: &[Article],
        ingested_at: DateTime<Utc>,
    ) -> Result<u64, StagingCommitError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(StagingCommitError::Unavailable(
                "injected append failure".to_string(),
            ));
        }
        for article in articles {
            state.next_seq += 1;
            let seq = state.next_seq;
            state.staging.push(StagingRow {
                seq,
                ingested_at,
                article: article.clone(),
            });
        }
        Ok(articles.len() as u64)
    }

    async fn latest_staged(&self) -> Result<Vec<StagingRow>, ReconcileError> {
        let state = self.inner.lock().unwrap();
        let mut best: HashMap<&str, &StagingRow> = HashMap::new();
        for row in &state.staging {
            match best.get(row.article.fingerprint.as_str()) {
                Some(current) if (current.ingested_at, current.seq) >= (row.ingested_at, row.seq) => {}
                _ => {
                    best.insert(&row.article.fingerprint, row);
                }
            }
        }
        let mut rows: Vec<StagingRow> = best.into_values().cloned().collect();
        rows.sort_by(|a, b| a.article.fingerprint.cmp(&b.article.fingerprint));
        Ok(rows)
    }

    async fn upsert_canonical(&self, rows: &[StagingRow]) -> Result<u64, ReconcileError> {
        let mut state = self.inner.lock().unwrap();
        let mut affected = 0;
        for row in rows {
            match state.canonical.get(&row.article.fingerprint) {
                // Stored row is strictly newer: leave it alone
                Some((_, stored_at)) if *stored_at > row.ingested_at => {}
                _ => {
                    state.canonical.insert(
                        row.article.fingerprint.clone(),
                        (row.article.clone(), row.ingested_at),
                    );
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn purge_staging(&self, cutoff: DateTime<Utc>) -> Result<u64, ReconcileError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_purges > 0 {
            state.fail_purges -= 1;
            return Err(ReconcileError::Unavailable(
                "injected purge failure".to_string(),
            ));
        }
        let before = state.staging.len();
        state.staging.retain(|row| row.ingested_at >= cutoff);
        Ok((before - state.staging.len()) as u64)
    }
}

/// A decoded article with the given key fields and content, the way the
/// pipeline would build it from a wire payload.
pub fn make_article(title: &str, published_at: &str, source_name: &str, content: &str) -> Article {
    Article::from(RawArticle {
        source: Some(crate::types::ArticleSource {
            id: None,
            name: Some(source_name.to_string()),
        }),
        title: Some(title.to_string()),
        published_at: Some(published_at.to_string()),
        content: Some(content.to_string()),
        ..Default::default()
    })
}
