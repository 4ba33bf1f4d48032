//! Tolerant decoding of gateway payloads.
//!
//! The gateway is observed to vary field names across endpoints: ids arrive
//! as `id`, `_id`, or `articleId`; images as `imageUrl` or `urlToImage`;
//! `source` as a bare string or a `{name}` object; page envelopes wrap the
//! items as `items`, `articles`, or `recommendations`. Everything decodes to
//! one normalized [`Article`]. Items without a usable id are skipped and
//! counted, never fatal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::store::{Article, MoreSignal};

use super::{FeedPage, GatewayError};

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct WireArticle {
    id: Option<String>,
    #[serde(rename = "_id")]
    mongo_id: Option<String>,
    #[serde(rename = "articleId")]
    article_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    #[serde(rename = "imageUrl", alias = "urlToImage")]
    image_url: Option<String>,
    source: Option<WireSource>,
    author: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    category: Option<String>,
}

/// `source` is sometimes `"BBC"`, sometimes `{"name": "BBC"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireSource {
    Name(String),
    Object { name: Option<String> },
}

impl WireSource {
    fn into_name(self) -> Option<String> {
        match self {
            WireSource::Name(name) => Some(name),
            WireSource::Object { name } => name,
        }
    }
}

impl WireArticle {
    /// Normalize into an [`Article`]. `None` when no id variant is usable.
    pub(crate) fn into_article(self) -> Option<Article> {
        let id = [self.id, self.mongo_id, self.article_id]
            .into_iter()
            .flatten()
            .find(|candidate| !candidate.is_empty())?;

        Some(Article {
            id,
            title: self.title.unwrap_or_default(),
            description: self.description,
            content: self.content,
            url: self.url,
            image_url: self.image_url,
            source_name: self.source.and_then(WireSource::into_name),
            author: self.author,
            published_at: self.published_at.as_deref().and_then(parse_timestamp),
            category: self.category,
            is_saved: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WirePage {
    items: Option<Vec<Value>>,
    articles: Option<Vec<Value>>,
    recommendations: Option<Vec<Value>>,
    #[serde(rename = "totalPages")]
    total_pages: Option<u32>,
    #[serde(rename = "hasMore")]
    has_more: Option<bool>,
}

// ============================================================================
// Decoding
// ============================================================================

/// ISO-ish timestamp parsing: RFC 3339 first, then RFC 2822, then a bare
/// date. Anything else becomes `None` and renders as "unknown" upstream.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    tracing::debug!(raw = raw, "Unparseable publishedAt, treating as unknown");
    None
}

fn collect_articles(values: Vec<Value>) -> (Vec<Article>, usize) {
    let mut items = Vec::with_capacity(values.len());
    let mut skipped = 0;
    for value in values {
        match serde_json::from_value::<WireArticle>(value) {
            Ok(wire) => match wire.into_article() {
                Some(article) => items.push(article),
                None => skipped += 1,
            },
            Err(_) => skipped += 1,
        }
    }
    (items, skipped)
}

/// Decode a list-endpoint body into a [`FeedPage`].
pub(crate) fn decode_page(body: &[u8]) -> Result<FeedPage, GatewayError> {
    let page: WirePage =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

    let values = page
        .items
        .or(page.articles)
        .or(page.recommendations)
        .unwrap_or_default();
    let (items, skipped) = collect_articles(values);

    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Items without a usable id skipped");
    }

    let signal = match (page.total_pages, page.has_more) {
        (Some(total), _) => MoreSignal::TotalPages(total),
        (None, Some(flag)) => MoreSignal::HasMore(flag),
        (None, None) => MoreSignal::FromCount,
    };

    Ok(FeedPage {
        items,
        signal,
        skipped,
    })
}

/// Decode a saved-list body: a bare array, or any of the page envelopes.
pub(crate) fn decode_list(body: &[u8]) -> Result<Vec<Article>, GatewayError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

    let values = match value {
        Value::Array(values) => values,
        other => {
            let page: WirePage = serde_json::from_value(other)
                .map_err(|e| GatewayError::Decode(e.to_string()))?;
            page.items
                .or(page.articles)
                .or(page.recommendations)
                .unwrap_or_default()
        }
    };

    let (items, skipped) = collect_articles(values);
    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Saved items without a usable id skipped");
    }
    Ok(items)
}

/// Decode a single-article body.
pub(crate) fn decode_article(body: &[u8]) -> Result<Article, GatewayError> {
    let wire: WireArticle =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    wire.into_article()
        .ok_or_else(|| GatewayError::Decode("article without a usable id".to_string()))
}

/// Render the save-article request body: the full item plus an `articleId`
/// field and a flattened `source` string, matching what the save endpoint
/// expects.
pub(crate) fn save_payload(article: &Article) -> Value {
    serde_json::json!({
        "_id": article.id,
        "articleId": article.id,
        "title": article.title,
        "description": article.description,
        "content": article.content,
        "url": article.url,
        "imageUrl": article.image_url,
        "source": article.source_name,
        "author": article.author,
        "publishedAt": article
            .published_at
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        "category": article.category,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_one(json: &str) -> Option<Article> {
        serde_json::from_str::<WireArticle>(json)
            .ok()
            .and_then(WireArticle::into_article)
    }

    #[test]
    fn test_id_variants_normalize() {
        let a = decode_one(r#"{"id": "aaa", "title": "T"}"#).unwrap();
        let b = decode_one(r#"{"_id": "aaa", "title": "T"}"#).unwrap();
        let c = decode_one(r#"{"articleId": "aaa", "title": "T"}"#).unwrap();
        assert_eq!(a.id, "aaa");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_plain_id_takes_precedence() {
        let article = decode_one(r#"{"id": "plain", "_id": "mongo"}"#).unwrap();
        assert_eq!(article.id, "plain");
    }

    #[test]
    fn test_missing_id_is_skipped() {
        assert!(decode_one(r#"{"title": "No id"}"#).is_none());
        assert!(decode_one(r#"{"id": "", "title": "Empty id"}"#).is_none());
    }

    #[test]
    fn test_image_url_variants() {
        let a = decode_one(r#"{"id": "x", "imageUrl": "https://img"}"#).unwrap();
        let b = decode_one(r#"{"id": "x", "urlToImage": "https://img"}"#).unwrap();
        assert_eq!(a.image_url.as_deref(), Some("https://img"));
        assert_eq!(a.image_url, b.image_url);
    }

    #[test]
    fn test_source_string_or_object() {
        let plain = decode_one(r#"{"id": "x", "source": "BBC"}"#).unwrap();
        let object = decode_one(r#"{"id": "x", "source": {"name": "BBC"}}"#).unwrap();
        let empty = decode_one(r#"{"id": "x", "source": {}}"#).unwrap();
        assert_eq!(plain.source_name.as_deref(), Some("BBC"));
        assert_eq!(object.source_name.as_deref(), Some("BBC"));
        assert_eq!(empty.source_name, None);
    }

    #[test]
    fn test_published_at_parse_and_fallback() {
        let rfc3339 = decode_one(r#"{"id": "x", "publishedAt": "2024-05-01T12:30:00Z"}"#).unwrap();
        assert!(rfc3339.published_at.is_some());

        let date_only = decode_one(r#"{"id": "x", "publishedAt": "2024-05-01"}"#).unwrap();
        assert!(date_only.published_at.is_some());

        let garbage = decode_one(r#"{"id": "x", "publishedAt": "unknown"}"#).unwrap();
        assert_eq!(garbage.published_at, None);
    }

    #[test]
    fn test_decode_page_envelope_variants() {
        let recommended = br#"{"recommendations": [{"_id": "a"}], "totalPages": 3}"#;
        let page = decode_page(recommended).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.signal, MoreSignal::TotalPages(3));

        let search = br#"{"articles": [{"_id": "a"}, {"_id": "b"}], "hasMore": false}"#;
        let page = decode_page(search).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.signal, MoreSignal::HasMore(false));

        let bare = br#"{"items": [{"_id": "a"}]}"#;
        let page = decode_page(bare).unwrap();
        assert_eq!(page.signal, MoreSignal::FromCount);
    }

    #[test]
    fn test_decode_page_skips_malformed_items() {
        let body = br#"{"items": [{"_id": "a"}, {"title": "no id"}, 42]}"#;
        let page = decode_page(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.skipped, 2);
    }

    #[test]
    fn test_decode_page_rejects_non_json() {
        assert!(matches!(
            decode_page(b"<html>not json</html>"),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_list_bare_array_and_envelope() {
        let bare = br#"[{"_id": "a"}, {"_id": "b"}]"#;
        assert_eq!(decode_list(bare).unwrap().len(), 2);

        let wrapped = br#"{"items": [{"_id": "a"}]}"#;
        assert_eq!(decode_list(wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_article_requires_id() {
        assert!(decode_article(br#"{"_id": "a", "title": "T", "content": "body"}"#).is_ok());
        assert!(matches!(
            decode_article(br#"{"title": "T"}"#),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_save_payload_flattens_source_and_duplicates_id() {
        let article = Article {
            id: "abc".to_string(),
            title: "T".to_string(),
            description: None,
            content: None,
            url: None,
            image_url: None,
            source_name: Some("BBC".to_string()),
            author: None,
            published_at: None,
            category: None,
            is_saved: false,
        };
        let payload = save_payload(&article);
        assert_eq!(payload["articleId"], "abc");
        assert_eq!(payload["_id"], "abc");
        assert_eq!(payload["source"], "BBC");
    }
}
