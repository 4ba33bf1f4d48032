//! Remote article gateway: the engine's only collaborator with the outside
//! world. The engine consumes the contract through [`ArticleGateway`]; the
//! production implementation is [`HttpArticleGateway`].

mod http;
pub(crate) mod wire;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::store::{Article, MoreSignal};

pub use http::HttpArticleGateway;

// ============================================================================
// Error Types
// ============================================================================

/// Failures surfaced by the gateway.
///
/// Payloads are plain strings rather than source errors so the whole enum
/// stays `Clone`: coalesced mutations hand one outcome to several callers.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, connection, TLS).
    #[error("network error: {0}")]
    Network(String),
    /// The request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response, with a best-effort message from the body.
    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },
    /// 401-class response. The engine turns this into a session-invalidated
    /// signal for the surrounding application.
    #[error("session credential rejected")]
    Unauthorized,
    /// The article id failed the format check before any request was made.
    #[error("article id failed format check")]
    InvalidId,
    /// Response body exceeded the configured size cap.
    #[error("response too large")]
    ResponseTooLarge,
    /// A 2xx response whose body could not be decoded.
    #[error("malformed response body: {0}")]
    Decode(String),
    /// Non-HTTPS base URL outside localhost, rejected at construction.
    #[error("insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    /// Base URL that does not parse at all, rejected at construction.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

// ============================================================================
// Page Results
// ============================================================================

/// One decoded page of a list endpoint.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<Article>,
    /// How the endpoint signalled further pages, see [`MoreSignal`].
    pub signal: MoreSignal,
    /// Items dropped during decoding (no usable id, wrong shape).
    pub skipped: usize,
}

// ============================================================================
// Gateway Contract
// ============================================================================

/// The remote article service, as consumed by the engine.
///
/// Object-safe so the engine can hold `Arc<dyn ArticleGateway>`; methods
/// return boxed futures for the same reason.
pub trait ArticleGateway: Send + Sync {
    /// `GET /articles/recommended?page=&limit=`
    fn recommended(&self, page: u32, limit: u32) -> BoxFuture<'_, Result<FeedPage, GatewayError>>;

    /// `GET /articles?search=&page=&limit=`
    fn search<'a>(
        &'a self,
        query: &'a str,
        page: u32,
        limit: u32,
    ) -> BoxFuture<'a, Result<FeedPage, GatewayError>>;

    /// `GET /articles/{id}`. Fails [`GatewayError::InvalidId`] before any
    /// network call when the id does not look server-assigned.
    fn article<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Article, GatewayError>>;

    /// `GET /users/saved-articles`, optionally server-filtered with
    /// `?search=`. Returned items are flagged saved.
    fn saved_articles<'a>(
        &'a self,
        query: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<Article>, GatewayError>>;

    /// `POST /users/save-article`. The body carries the full item plus an
    /// `articleId` field and a flattened `source` string.
    fn save_article<'a>(
        &'a self,
        article: &'a Article,
    ) -> BoxFuture<'a, Result<Article, GatewayError>>;

    /// `DELETE /users/saved-article/{id}`. A 404 surfaces as
    /// `Server { status: 404 }`; the mutation layer treats it as success.
    fn unsave_article<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;
}

/// Format check for server-assigned article ids: 24 hex digits.
pub fn valid_article_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

// ============================================================================
// Session Credential
// ============================================================================

/// Shared handle to the session bearer credential.
///
/// The credential is owned by the surrounding application's session state;
/// the gateway only reads it when decorating requests. Cloning the handle
/// shares the same slot.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(SecretString::from(token.into()));
    }

    pub fn clear(&self) {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    /// Render the `Authorization` header value, if a credential is present.
    pub(crate) fn bearer(&self) -> Option<String> {
        let slot = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }
}

/// Never reveal the credential in logs or debug output.
impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("TokenStore")
            .field("token", &if present { "[REDACTED]" } else { "None" })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_article_id() {
        assert!(valid_article_id("507f1f77bcf86cd799439011"));
        assert!(valid_article_id("ABCDEFabcdef012345678901"));

        assert!(!valid_article_id(""));
        assert!(!valid_article_id("507f1f77bcf86cd79943901")); // 23 chars
        assert!(!valid_article_id("507f1f77bcf86cd7994390111")); // 25 chars
        assert!(!valid_article_id("507f1f77bcf86cd79943901g")); // non-hex
    }

    #[test]
    fn test_token_store_roundtrip() {
        let tokens = TokenStore::new();
        assert!(tokens.bearer().is_none());

        tokens.set("abc123");
        assert_eq!(tokens.bearer().as_deref(), Some("Bearer abc123"));

        tokens.clear();
        assert!(tokens.bearer().is_none());
    }

    #[test]
    fn test_token_store_shared_between_clones() {
        let tokens = TokenStore::new();
        let clone = tokens.clone();
        tokens.set("abc123");
        assert_eq!(clone.bearer().as_deref(), Some("Bearer abc123"));
    }

    #[test]
    fn test_token_store_debug_masks_credential() {
        let tokens = TokenStore::new();
        tokens.set("super-secret-token");
        let output = format!("{tokens:?}");
        assert!(!output.contains("super-secret-token"));
        assert!(output.contains("[REDACTED]"));
    }
}
