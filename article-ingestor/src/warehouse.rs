use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::{ReconcileError, StagingCommitError};
use crate::types::{Article, StagingRow};

/// Storage contract for the staging area and the canonical table.
///
/// Reconciliation is deliberately a two-step contract - select the latest
/// staging row per fingerprint, then conditionally upsert - so any backend
/// with an atomic per-key upsert can implement it, whether natively, via
/// compare-and-swap, or in a transaction.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Append a whole batch to staging under one shared ingestion time.
    /// Durable on Ok. All-or-nothing: on Err none of the batch counts as
    /// committed and the caller retries it as a unit.
    async fn append_staging(
        &self,
        articles: &[Article],
        ingested_at: DateTime<Utc>,
    ) -> Result<u64, StagingCommitError>;

    /// For every fingerprint present in staging, the row with the greatest
    /// (ingested_at, seq).
    async fn latest_staged(&self) -> Result<Vec<StagingRow>, ReconcileError>;

    /// Fold rows into the canonical table: insert new fingerprints, overwrite
    /// existing ones unless the stored row has a newer ingestion time. Atomic
    /// per fingerprint. Callers must pass at most one row per fingerprint.
    async fn upsert_canonical(&self, rows: &[StagingRow]) -> Result<u64, ReconcileError>;

    /// Delete staging rows ingested before the cutoff. Canonical rows are
    /// never touched by this.
    async fn purge_staging(&self, cutoff: DateTime<Utc>) -> Result<u64, ReconcileError>;
}

const ARTICLE_COLUMNS: &str = "fingerprint, title, published_at, description, author, \
     content, url, url_to_image, source_id, source_name, ingested_at";

pub struct PostgresWarehouse {
    pool: PgPool,
    staging_table: String,
    canonical_table: String,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool, staging_table: &str, canonical_table: &str) -> Self {
        Self {
            pool,
            staging_table: staging_table.to_string(),
            canonical_table: canonical_table.to_string(),
        }
    }

    /// Idempotent DDL, run once at startup so a fresh database just works.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        let ddl = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    seq BIGSERIAL PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    title TEXT,
                    published_at TEXT,
                    description TEXT,
                    author TEXT,
                    content TEXT,
                    url TEXT,
                    url_to_image TEXT,
                    source_id TEXT,
                    source_name TEXT,
                    ingested_at TIMESTAMPTZ NOT NULL
                )",
                self.staging_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {}_latest_idx
                    ON {} (fingerprint, ingested_at DESC, seq DESC)",
                self.staging_table, self.staging_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {}_age_idx ON {} (ingested_at)",
                self.staging_table, self.staging_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    fingerprint TEXT PRIMARY KEY,
                    title TEXT,
                    published_at TEXT,
                    description TEXT,
                    author TEXT,
                    content TEXT,
                    url TEXT,
                    url_to_image TEXT,
                    source_id TEXT,
                    source_name TEXT,
                    ingested_at TIMESTAMPTZ NOT NULL
                )",
                self.canonical_table
            ),
        ];
        for statement in ddl {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Column arrays for one vectorized insert, UNNEST-style.
#[derive(Default)]
struct ArticleArrays {
    fingerprints: Vec<String>,
    titles: Vec<Option<String>>,
    published_ats: Vec<Option<String>>,
    descriptions: Vec<Option<String>>,
    authors: Vec<Option<String>>,
    contents: Vec<Option<String>>,
    urls: Vec<Option<String>>,
    url_to_images: Vec<Option<String>>,
    source_ids: Vec<Option<String>>,
    source_names: Vec<Option<String>>,
}

impl ArticleArrays {
    fn push(&mut self, article: &Article) {
        self.fingerprints.push(article.fingerprint.clone());
        self.titles.push(article.title.clone());
        self.published_ats.push(article.published_at.clone());
        self.descriptions.push(article.description.clone());
        self.authors.push(article.author.clone());
        self.contents.push(article.content.clone());
        self.urls.push(article.url.clone());
        self.url_to_images.push(article.url_to_image.clone());
        self.source_ids.push(article.source_id.clone());
        self.source_names.push(article.source_name.clone());
    }
}

#[derive(sqlx::FromRow)]
struct PgStagingRow {
    seq: i64,
    fingerprint: String,
    title: Option<String>,
    published_at: Option<String>,
    description: Option<String>,
    author: Option<String>,
    content: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    source_id: Option<String>,
    source_name: Option<String>,
    ingested_at: DateTime<Utc>,
}

impl From<PgStagingRow> for StagingRow {
    fn from(row: PgStagingRow) -> Self {
        StagingRow {
            seq: row.seq,
            ingested_at: row.ingested_at,
            article: Article {
                fingerprint: row.fingerprint,
                title: row.title,
                published_at: row.published_at,
                description: row.description,
                author: row.author,
                content: row.content,
                url: row.url,
                url_to_image: row.url_to_image,
                source_id: row.source_id,
                source_name: row.source_name,
            },
        }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn append_staging(
        &self,
        articles: &[Article],
        ingested_at: DateTime<Utc>,
    ) -> Result<u64, StagingCommitError> {
        let mut arrays = ArticleArrays::default();
        for article in articles {
            arrays.push(article);
        }

        let statement = format!(
            "INSERT INTO {} ({ARTICLE_COLUMNS})
             SELECT UNNEST($1::text[]), UNNEST($2::text[]), UNNEST($3::text[]),
                    UNNEST($4::text[]), UNNEST($5::text[]), UNNEST($6::text[]),
                    UNNEST($7::text[]), UNNEST($8::text[]), UNNEST($9::text[]),
                    UNNEST($10::text[]), $11::timestamptz",
            self.staging_table
        );
        let result = sqlx::query(&statement)
            .bind(&arrays.fingerprints)
            .bind(&arrays.titles)
            .bind(&arrays.published_ats)
            .bind(&arrays.descriptions)
            .bind(&arrays.authors)
            .bind(&arrays.contents)
            .bind(&arrays.urls)
            .bind(&arrays.url_to_images)
            .bind(&arrays.source_ids)
            .bind(&arrays.source_names)
            .bind(ingested_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn latest_staged(&self) -> Result<Vec<StagingRow>, ReconcileError> {
        let statement = format!(
            "SELECT DISTINCT ON (fingerprint) seq, {ARTICLE_COLUMNS} FROM {}
             ORDER BY fingerprint, ingested_at DESC, seq DESC",
            self.staging_table
        );
        let rows: Vec<PgStagingRow> = sqlx::query_as(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(ReconcileError::Select)?;

        Ok(rows.into_iter().map(StagingRow::from).collect())
    }

    async fn upsert_canonical(&self, rows: &[StagingRow]) -> Result<u64, ReconcileError> {
        let mut arrays = ArticleArrays::default();
        let mut ingested_ats: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());
        for row in rows {
            arrays.push(&row.article);
            ingested_ats.push(row.ingested_at);
        }

        let statement = format!(
            "INSERT INTO {} ({ARTICLE_COLUMNS})
             SELECT UNNEST($1::text[]), UNNEST($2::text[]), UNNEST($3::text[]),
                    UNNEST($4::text[]), UNNEST($5::text[]), UNNEST($6::text[]),
                    UNNEST($7::text[]), UNNEST($8::text[]), UNNEST($9::text[]),
                    UNNEST($10::text[]), UNNEST($11::timestamptz[])
             ON CONFLICT (fingerprint) DO UPDATE SET
                title = EXCLUDED.title,
                published_at = EXCLUDED.published_at,
                description = EXCLUDED.description,
                author = EXCLUDED.author,
                content = EXCLUDED.content,
                url = EXCLUDED.url,
                url_to_image = EXCLUDED.url_to_image,
                source_id = EXCLUDED.source_id,
                source_name = EXCLUDED.source_name,
                ingested_at = EXCLUDED.ingested_at
             WHERE {}.ingested_at <= EXCLUDED.ingested_at",
            self.canonical_table, self.canonical_table
        );
        let result = sqlx::query(&statement)
            .bind(&arrays.fingerprints)
            .bind(&arrays.titles)
            .bind(&arrays.published_ats)
            .bind(&arrays.descriptions)
            .bind(&arrays.authors)
            .bind(&arrays.contents)
            .bind(&arrays.urls)
            .bind(&arrays.url_to_images)
            .bind(&arrays.source_ids)
            .bind(&arrays.source_names)
            .bind(&ingested_ats)
            .execute(&self.pool)
            .await
            .map_err(ReconcileError::Merge)?;

        Ok(result.rows_affected())
    }

    async fn purge_staging(&self, cutoff: DateTime<Utc>) -> Result<u64, ReconcileError> {
        let statement = format!("DELETE FROM {} WHERE ingested_at < $1", self.staging_table);
        let result = sqlx::query(&statement)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(ReconcileError::Purge)?;

        Ok(result.rows_affected())
    }
}
