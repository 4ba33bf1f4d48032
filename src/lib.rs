//! Client-side article feed synchronization engine.
//!
//! One normalized store of articles backs three list views (recommended
//! feed, keyword search, saved list), with the concurrency bookkeeping the
//! surrounding screens should never have to reimplement:
//!
//! - per-kind request sequencing with a staleness guard, so only the latest
//!   request of a kind ever lands in a view
//! - a debounce window for keyword search, with empty queries falling back
//!   to the feed without a network call
//! - optimistic save/unsave with exact snapshot rollback and per-article
//!   request coalescing
//! - lazy, deduplicated detail fetching with merge-not-overwrite semantics
//!
//! The UI layer issues commands on [`Engine`] and reads state back as
//! [`ViewSnapshot`]s and cloned [`Article`]s; every operation resolves to a
//! typed outcome and never panics. A 401 from the gateway surfaces as an
//! [`EngineEvent::SessionInvalidated`] on the event channel for the
//! application's session handling to consume.
//!
//! ```no_run
//! use newswire::{Engine, EngineConfig, ListKind, TokenStore};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let tokens = TokenStore::new();
//! tokens.set("session-token");
//!
//! let (engine, _events) = Engine::over_http(&config, tokens)?;
//! engine.load_feed_page().await?;
//!
//! let feed = engine.view(ListKind::Feed);
//! println!("{} articles, has more: {}", feed.ids.len(), feed.has_more);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod coordinator;
pub mod engine;
pub mod gateway;
mod mutation;
mod selection;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, EngineEvent, PageOutcome};
pub use gateway::{ArticleGateway, FeedPage, GatewayError, HttpArticleGateway, TokenStore};
pub use mutation::MutationOutcome;
pub use store::{Article, ListKind, MoreSignal, ViewSnapshot};
