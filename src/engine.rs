//! The engine facade: one owner of the shared store, wiring the fetch
//! coordinator, mutation manager, and selection cache behind a small set of
//! public operations.
//!
//! Every operation resolves to a discriminated outcome; nothing panics
//! across this surface. Stale results and out-of-order pages resolve to
//! [`PageOutcome::Superseded`], never an error. The store mutex is only held
//! between suspension points, so every read-modify-write section runs
//! without interleaving.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::coordinator::{FetchCoordinator, RequestKind};
use crate::gateway::{ArticleGateway, GatewayError, HttpArticleGateway, TokenStore};
use crate::mutation::{MutationManager, MutationOutcome};
use crate::selection::SelectionCache;
use crate::store::{self, Article, FeedStore, ListKind, MergeOutcome, ViewSnapshot};

/// Events channel capacity. Teardown signals are rare; a small buffer is
/// plenty.
const EVENT_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// Outcomes and Events
// ============================================================================

/// Failure taxonomy of every public engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Missing or malformed article reference, caught before any network
    /// call.
    #[error("unknown or malformed article reference")]
    InvalidReference,
    /// Transport failure, recoverable by user retry.
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response, surfaced with the server's message.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// The gateway rejected the session credential. A
    /// [`EngineEvent::SessionInvalidated`] has been emitted alongside.
    #[error("session credential rejected by gateway")]
    Unauthorized,
}

/// Result of a list-fetch operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// The page was merged; `appended` new ids entered the view.
    Applied { appended: usize, view: ViewSnapshot },
    /// The response lost to a newer request of the same kind (or arrived
    /// with a page number the view has moved past) and was dropped silently.
    Superseded,
    /// An empty search query: the search view was cleared and the feed is
    /// the active collection again. No gateway call was made.
    RestoredFeed,
}

/// Out-of-band signals for the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// A gateway call was answered 401. The application is expected to tear
    /// down the session (logout + redirect) and call
    /// [`Engine::reset_session`].
    SessionInvalidated,
}

#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    fn session_invalidated(&self) {
        if let Err(e) = self.tx.try_send(EngineEvent::SessionInvalidated) {
            tracing::warn!(error = %e, "Failed to deliver session-invalidated event");
        }
    }
}

/// Translate a gateway failure into the public taxonomy, emitting the
/// session-invalidated signal for 401-class failures.
pub(crate) fn map_gateway(err: GatewayError, events: &EventSender) -> EngineError {
    match err {
        GatewayError::Network(message) => EngineError::Network(message),
        GatewayError::Timeout => EngineError::Timeout,
        GatewayError::Server { status, message } => EngineError::Server { status, message },
        GatewayError::Unauthorized => {
            events.session_invalidated();
            EngineError::Unauthorized
        }
        GatewayError::InvalidId => EngineError::InvalidReference,
        GatewayError::ResponseTooLarge => {
            EngineError::Network("response exceeded size cap".to_string())
        }
        GatewayError::Decode(message) => {
            EngineError::Network(format!("malformed response: {message}"))
        }
        e @ (GatewayError::InsecureBaseUrl | GatewayError::InvalidBaseUrl(_)) => {
            EngineError::Network(e.to_string())
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The article feed synchronization engine.
///
/// The UI layer issues commands through this type and reads state back as
/// [`ViewSnapshot`]s and cloned [`Article`]s; it never touches the store
/// directly.
pub struct Engine {
    store: Arc<Mutex<FeedStore>>,
    gateway: Arc<dyn ArticleGateway>,
    coordinator: FetchCoordinator,
    mutations: MutationManager,
    selection: SelectionCache,
    events: EventSender,
    page_limit: u32,
}

impl Engine {
    /// Build an engine over an arbitrary gateway implementation.
    ///
    /// Returns the engine plus the receiving end of its event channel.
    pub fn new(
        gateway: Arc<dyn ArticleGateway>,
        config: &EngineConfig,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let events = EventSender::new(tx);
        let store = Arc::new(Mutex::new(FeedStore::new(config.page_limit)));

        let engine = Self {
            mutations: MutationManager::new(
                Arc::clone(&store),
                Arc::clone(&gateway),
                events.clone(),
            ),
            selection: SelectionCache::new(
                Arc::clone(&store),
                Arc::clone(&gateway),
                events.clone(),
            ),
            coordinator: FetchCoordinator::new(config.search_debounce()),
            store,
            gateway,
            events,
            page_limit: config.page_limit,
        };
        (engine, rx)
    }

    /// Convenience constructor over the production HTTP gateway.
    pub fn over_http(
        config: &EngineConfig,
        tokens: TokenStore,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>), GatewayError> {
        let gateway = Arc::new(HttpArticleGateway::new(config, tokens)?);
        Ok(Self::new(gateway, config))
    }

    // ========================================================================
    // Feed
    // ========================================================================

    /// Fetch the feed view's next page and append it.
    pub async fn load_feed_page(&self) -> Result<PageOutcome, EngineError> {
        let ticket = self.coordinator.begin(RequestKind::Feed);
        let page = store::lock(&self.store).view(ListKind::Feed).cursor;

        let result = self.gateway.recommended(page, self.page_limit).await;
        if !self.coordinator.is_current(RequestKind::Feed, ticket) {
            tracing::debug!(ticket = ticket, "Feed page superseded at arrival, dropping");
            return Ok(PageOutcome::Superseded);
        }
        let fetched = result.map_err(|e| map_gateway(e, &self.events))?;

        let mut store = store::lock(&self.store);
        match store.merge_page(ListKind::Feed, "", page, fetched.items, fetched.signal) {
            MergeOutcome::Applied { appended } => Ok(PageOutcome::Applied {
                appended,
                view: store.view(ListKind::Feed),
            }),
            MergeOutcome::Rejected { .. } => Ok(PageOutcome::Superseded),
        }
    }

    /// Reload the feed from page 1, replacing the current sequence.
    pub async fn refresh_feed(&self) -> Result<PageOutcome, EngineError> {
        let ticket = self.coordinator.begin(RequestKind::Feed);

        let result = self.gateway.recommended(1, self.page_limit).await;
        if !self.coordinator.is_current(RequestKind::Feed, ticket) {
            return Ok(PageOutcome::Superseded);
        }
        let fetched = result.map_err(|e| map_gateway(e, &self.events))?;

        // Replace at acceptance time, not before the fetch, so the previous
        // sequence stays on screen until fresh data is actually here.
        let mut store = store::lock(&self.store);
        store.reset_view(ListKind::Feed);
        match store.merge_page(ListKind::Feed, "", 1, fetched.items, fetched.signal) {
            MergeOutcome::Applied { appended } => Ok(PageOutcome::Applied {
                appended,
                view: store.view(ListKind::Feed),
            }),
            MergeOutcome::Rejected { .. } => Ok(PageOutcome::Superseded),
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Debounced keyword search.
    ///
    /// Call once per keystroke: rapid calls collapse into a single gateway
    /// request carrying the last query. An empty or whitespace query resets
    /// the search view and reports [`PageOutcome::RestoredFeed`] without
    /// touching the gateway.
    pub async fn search(&self, query: &str) -> Result<PageOutcome, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            // Supersede any in-flight search so its late response is dropped.
            self.coordinator.begin(RequestKind::Search);
            store::lock(&self.store).reset_view(ListKind::Search);
            tracing::debug!("Empty query, restoring feed");
            return Ok(PageOutcome::RestoredFeed);
        }

        let ticket = self.coordinator.begin(RequestKind::Search);
        if !self.coordinator.debounce(RequestKind::Search, ticket).await {
            return Ok(PageOutcome::Superseded);
        }

        let result = self.gateway.search(query, 1, self.page_limit).await;
        if !self.coordinator.is_current(RequestKind::Search, ticket) {
            tracing::debug!(query = %query, "Search response superseded at arrival, dropping");
            return Ok(PageOutcome::Superseded);
        }
        let fetched = result.map_err(|e| map_gateway(e, &self.events))?;

        let mut store = store::lock(&self.store);
        store.begin_search(query);
        match store.merge_page(ListKind::Search, query, 1, fetched.items, fetched.signal) {
            MergeOutcome::Applied { appended } => Ok(PageOutcome::Applied {
                appended,
                view: store.view(ListKind::Search),
            }),
            MergeOutcome::Rejected { .. } => Ok(PageOutcome::Superseded),
        }
    }

    /// Fetch the next page of the current search query. Not debounced; this
    /// is a deliberate load-more, not a keystroke.
    pub async fn load_more_search(&self) -> Result<PageOutcome, EngineError> {
        let (query, page) = {
            let view = store::lock(&self.store).view(ListKind::Search);
            (view.query, view.cursor)
        };
        if query.is_empty() {
            tracing::debug!("Load-more with no active search, ignoring");
            return Ok(PageOutcome::Superseded);
        }

        let ticket = self.coordinator.begin(RequestKind::Search);
        let result = self.gateway.search(&query, page, self.page_limit).await;
        if !self.coordinator.is_current(RequestKind::Search, ticket) {
            return Ok(PageOutcome::Superseded);
        }
        let fetched = result.map_err(|e| map_gateway(e, &self.events))?;

        let mut store = store::lock(&self.store);
        match store.merge_page(ListKind::Search, &query, page, fetched.items, fetched.signal) {
            MergeOutcome::Applied { appended } => Ok(PageOutcome::Applied {
                appended,
                view: store.view(ListKind::Search),
            }),
            MergeOutcome::Rejected { .. } => Ok(PageOutcome::Superseded),
        }
    }

    // ========================================================================
    // Saved List
    // ========================================================================

    /// Fetch the full saved list, replacing the saved view.
    pub async fn load_saved(&self) -> Result<PageOutcome, EngineError> {
        let ticket = self.coordinator.begin(RequestKind::Saved);

        let result = self.gateway.saved_articles(None).await;
        if !self.coordinator.is_current(RequestKind::Saved, ticket) {
            return Ok(PageOutcome::Superseded);
        }
        let items = result.map_err(|e| map_gateway(e, &self.events))?;

        let mut store = store::lock(&self.store);
        let appended = store.replace_saved(items);
        Ok(PageOutcome::Applied {
            appended,
            view: store.view(ListKind::Saved),
        })
    }

    /// Server-filtered lookup across the saved list.
    ///
    /// Matches merge into the entity table and come back as ids; the saved
    /// view itself keeps its order and carries no query. An empty query
    /// answers from the local view without a gateway call.
    pub async fn search_saved(&self, query: &str) -> Result<Vec<String>, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(store::lock(&self.store).view(ListKind::Saved).ids);
        }

        let items = self
            .gateway
            .saved_articles(Some(query))
            .await
            .map_err(|e| map_gateway(e, &self.events))?;

        let mut store = store::lock(&self.store);
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.clone();
            store.upsert_entity(item);
            store.set_saved_flag(&id, true);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Optimistically save an article. See [`MutationOutcome`].
    pub async fn save(&self, id: &str) -> Result<MutationOutcome, EngineError> {
        self.mutations.save(id).await
    }

    /// Optimistically unsave an article. A gateway 404 resolves as
    /// [`MutationOutcome::AlreadyUnsaved`], which is success.
    pub async fn unsave(&self, id: &str) -> Result<MutationOutcome, EngineError> {
        self.mutations.unsave(id).await
    }

    // ========================================================================
    // Detail Viewing
    // ========================================================================

    /// Open an article for detail viewing, lazily fetching content on first
    /// open.
    pub async fn open(&self, id: &str) -> Result<Article, EngineError> {
        self.selection.open(id).await
    }

    /// Clear the "currently open" marker. Never evicts the entity.
    pub fn close(&self) {
        self.selection.close();
    }

    /// Id of the article currently open for detail viewing.
    pub fn current_article(&self) -> Option<String> {
        self.selection.current()
    }

    // ========================================================================
    // Read Surface
    // ========================================================================

    pub fn view(&self, kind: ListKind) -> ViewSnapshot {
        store::lock(&self.store).view(kind)
    }

    pub fn article(&self, id: &str) -> Option<Article> {
        store::lock(&self.store).article(id).cloned()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Logout/session teardown: supersede every in-flight list request,
    /// drop the selection state, and clear the store. The engine starts over
    /// from empty state on the next login.
    pub fn reset_session(&self) {
        self.coordinator.begin(RequestKind::Feed);
        self.coordinator.begin(RequestKind::Search);
        self.coordinator.begin(RequestKind::Saved);
        self.selection.reset();
        store::lock(&self.store).reset_all();
        tracing::info!("Session state reset");
    }
}

// ============================================================================
// Tests
// ============================================================================
