//! Production [`ArticleGateway`] over HTTP.
//!
//! Every request is decorated with the session bearer credential, bounded by
//! the configured timeout, and read through a streaming size cap. Status
//! codes map onto the gateway error taxonomy; response bodies go through the
//! tolerant wire layer.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::{header, StatusCode};
use url::Url;

use crate::config::EngineConfig;
use crate::store::Article;

use super::wire;
use super::{valid_article_id, ArticleGateway, FeedPage, GatewayError, TokenStore};

/// Longest server message carried into a [`GatewayError::Server`].
const MAX_ERROR_MESSAGE_LEN: usize = 200;

pub struct HttpArticleGateway {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    timeout: Duration,
    max_body: usize,
}

impl HttpArticleGateway {
    /// Build a gateway against `config.base_url`.
    ///
    /// The base URL must parse and must be HTTPS; plain HTTP is allowed only
    /// for localhost so tests can run against a local mock server.
    pub fn new(config: &EngineConfig, tokens: TokenStore) -> Result<Self, GatewayError> {
        let parsed = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidBaseUrl(e.to_string()))?;

        if parsed.scheme() != "https" {
            let is_localhost = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
            if !is_localhost {
                tracing::error!(base_url = %config.base_url, "Rejecting non-HTTPS base URL");
                return Err(GatewayError::InsecureBaseUrl);
            }
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            timeout: config.request_timeout(),
            max_body: config.max_response_bytes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request with the bearer credential and timeout applied, and
    /// return the size-capped body of a 2xx response.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, GatewayError> {
        let request = match self.tokens.bearer() {
            Some(value) => request.header(header::AUTHORIZATION, value),
            None => request,
        };

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Gateway rejected session credential");
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let message = read_error_message(response, self.max_body).await;
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        read_limited_bytes(response, self.max_body).await
    }
}

impl ArticleGateway for HttpArticleGateway {
    fn recommended(&self, page: u32, limit: u32) -> BoxFuture<'_, Result<FeedPage, GatewayError>> {
        async move {
            let request = self
                .client
                .get(self.endpoint("/articles/recommended"))
                .query(&[("page", page), ("limit", limit)]);
            let body = self.execute(request).await?;
            wire::decode_page(&body)
        }
        .boxed()
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        page: u32,
        limit: u32,
    ) -> BoxFuture<'a, Result<FeedPage, GatewayError>> {
        async move {
            let request = self
                .client
                .get(self.endpoint("/articles"))
                .query(&[("search", query)])
                .query(&[("page", page), ("limit", limit)]);
            let body = self.execute(request).await?;
            wire::decode_page(&body)
        }
        .boxed()
    }

    fn article<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Article, GatewayError>> {
        async move {
            if !valid_article_id(id) {
                return Err(GatewayError::InvalidId);
            }
            let request = self.client.get(self.endpoint(&format!("/articles/{id}")));
            let body = self.execute(request).await?;
            wire::decode_article(&body)
        }
        .boxed()
    }

    fn saved_articles<'a>(
        &'a self,
        query: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<Article>, GatewayError>> {
        async move {
            let mut request = self.client.get(self.endpoint("/users/saved-articles"));
            if let Some(query) = query {
                request = request.query(&[("search", query)]);
            }
            let body = self.execute(request).await?;
            let mut items = wire::decode_list(&body)?;
            // Membership in the saved list is the authoritative signal.
            for item in &mut items {
                item.is_saved = true;
            }
            Ok(items)
        }
        .boxed()
    }

    fn save_article<'a>(
        &'a self,
        article: &'a Article,
    ) -> BoxFuture<'a, Result<Article, GatewayError>> {
        async move {
            let request = self
                .client
                .post(self.endpoint("/users/save-article"))
                .json(&wire::save_payload(article));
            let body = self.execute(request).await?;
            let mut confirmed = wire::decode_article(&body)?;
            confirmed.is_saved = true;
            Ok(confirmed)
        }
        .boxed()
    }

    fn unsave_article<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            let request = self
                .client
                .delete(self.endpoint(&format!("/users/saved-article/{id}")));
            self.execute(request).await?;
            Ok(())
        }
        .boxed()
    }
}

// ============================================================================
// Body Reading
// ============================================================================

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, GatewayError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(GatewayError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GatewayError::Network(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(GatewayError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Best-effort message extraction from an error response: a JSON `message`
/// field when present, otherwise the truncated body text.
async fn read_error_message(response: reqwest::Response, limit: usize) -> String {
    let bytes = match read_limited_bytes(response, limit).await {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }

    let mut text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.len() > MAX_ERROR_MESSAGE_LEN {
        text.truncate(
            (0..=MAX_ERROR_MESSAGE_LEN)
                .rev()
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(0),
        );
    }
    text
}

// ============================================================================
// Tests
// ============================================================================
