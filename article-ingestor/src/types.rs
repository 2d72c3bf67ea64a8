use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::fingerprint::fingerprint;

#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct ArticleSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Wire shape of one article event, exactly as producers publish it. Every
/// field is optional - a missing or null field is an absent value, not a
/// decode failure. `publishedAt` is opaque text from the producer and is
/// preserved as-is, never parsed as a timestamp.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    #[serde(default)]
    pub source: Option<ArticleSource>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A decoded article, enriched with its fingerprint. The fingerprint is
/// derived here and nowhere else; producers can't supply one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Article {
    pub fingerprint: String,
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
}

impl Article {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawArticle = serde_json::from_slice(payload).map_err(|source| DecodeError {
            source,
            payload: String::from_utf8_lossy(payload).into_owned(),
        })?;
        Ok(raw.into())
    }
}

impl From<RawArticle> for Article {
    fn from(raw: RawArticle) -> Self {
        let (source_id, source_name) = match raw.source {
            Some(source) => (source.id, source.name),
            None => (None, None),
        };
        let fingerprint = fingerprint(
            raw.title.as_deref().unwrap_or(""),
            raw.published_at.as_deref().unwrap_or(""),
            source_name.as_deref().unwrap_or(""),
        );
        Self {
            fingerprint,
            title: raw.title,
            published_at: raw.published_at,
            description: raw.description,
            author: raw.author,
            content: raw.content,
            url: raw.url,
            url_to_image: raw.url_to_image,
            source_id,
            source_name,
        }
    }
}

/// One staging row as the reconciler reads it back: the article plus the
/// batch ingestion time and the arrival sequence that breaks ingestion-time
/// ties deterministically.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagingRow {
    pub seq: i64,
    pub ingested_at: DateTime<Utc>,
    pub article: Article,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_full_article() {
        let payload = json!({
            "source": {"id": "reuters", "name": "Reuters"},
            "author": "A. Writer",
            "title": "Something happened",
            "description": "A description",
            "url": "https://example.com/a",
            "urlToImage": "https://example.com/a.jpg",
            "publishedAt": "2024-01-01T00:00:00Z",
            "content": "Full text"
        });
        let article = Article::decode(payload.to_string().as_bytes()).unwrap();

        assert_eq!(article.title.as_deref(), Some("Something happened"));
        assert_eq!(article.url_to_image.as_deref(), Some("https://example.com/a.jpg"));
        assert_eq!(article.published_at.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(article.source_id.as_deref(), Some("reuters"));
        assert_eq!(article.source_name.as_deref(), Some("Reuters"));
        assert_eq!(article.fingerprint.len(), 64);
    }

    #[test]
    fn missing_and_null_fields_are_absent_not_errors() {
        let article = Article::decode(br#"{"title": null}"#).unwrap();
        assert!(article.title.is_none());
        assert!(article.source_name.is_none());

        let article = Article::decode(b"{}").unwrap();
        assert!(article.published_at.is_none());
        // All key fields empty-default to the same identity
        assert_eq!(
            article.fingerprint,
            crate::fingerprint::fingerprint("", "", "")
        );
    }

    #[test]
    fn fingerprint_ignores_non_key_fields() {
        let a = Article::decode(
            br#"{"title":"X","publishedAt":"2024-01-01T00:00:00Z","source":{"name":"S"},"content":"one"}"#,
        )
        .unwrap();
        let b = Article::decode(
            br#"{"title":"X","publishedAt":"2024-01-01T00:00:00Z","source":{"id":"s-id","name":"S"},"content":"two","author":"someone"}"#,
        )
        .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);

        let c = Article::decode(
            br#"{"title":"X","publishedAt":"2024-01-02T00:00:00Z","source":{"name":"S"}}"#,
        )
        .unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn malformed_payloads_fail_and_carry_the_payload() {
        let err = Article::decode(b"not json at all").unwrap_err();
        assert_eq!(err.payload, "not json at all");

        // Valid JSON, wrong top-level shape
        let err = Article::decode(b"[1, 2, 3]").unwrap_err();
        assert_eq!(err.payload, "[1, 2, 3]");
    }
}
