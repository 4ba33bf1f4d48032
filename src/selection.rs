//! Detail viewing: the "currently open" marker and lazy content fetching.
//!
//! Content is fetched at most once per article and merged into the store, so
//! reopening is instant. Concurrent opens of the same id share one pending
//! fetch; closes only clear the marker and never evict anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::engine::{map_gateway, EngineError, EventSender};
use crate::gateway::{valid_article_id, ArticleGateway};
use crate::store::{self, Article, FeedStore};

type SharedDetail = Shared<BoxFuture<'static, Result<Article, EngineError>>>;

#[derive(Default)]
struct SelectionState {
    open_id: Option<String>,
    pending: HashMap<String, SharedDetail>,
}

pub(crate) struct SelectionCache {
    store: Arc<Mutex<FeedStore>>,
    gateway: Arc<dyn ArticleGateway>,
    events: EventSender,
    state: Mutex<SelectionState>,
}

impl SelectionCache {
    pub fn new(
        store: Arc<Mutex<FeedStore>>,
        gateway: Arc<dyn ArticleGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            state: Mutex::new(SelectionState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SelectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an article for detail viewing.
    ///
    /// Returns immediately when the entity already carries content;
    /// otherwise issues (or joins) the detail fetch for this id and resolves
    /// once the result is merged into the store.
    pub async fn open(&self, id: &str) -> Result<Article, EngineError> {
        // Short-circuit: content already present.
        {
            let store = store::lock(&self.store);
            if let Some(entity) = store.article(id) {
                if entity.has_content() {
                    let entity = entity.clone();
                    drop(store);
                    self.state().open_id = Some(id.to_string());
                    return Ok(entity);
                }
            }
        }

        // Only a detail fetch needs a server-shaped id.
        if !valid_article_id(id) {
            tracing::warn!(article_id = %id, "Open refused: malformed article id");
            return Err(EngineError::InvalidReference);
        }

        let shared = {
            let mut state = self.state();
            match state.pending.get(id) {
                Some(pending) => {
                    tracing::debug!(article_id = %id, "Joining in-flight detail fetch");
                    pending.clone()
                }
                None => {
                    let shared = self.fetch(id.to_string()).boxed().shared();
                    state.pending.insert(id.to_string(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.await;
        let mut state = self.state();
        state.pending.remove(id);
        if result.is_ok() {
            state.open_id = Some(id.to_string());
        }
        result
    }

    /// Clear the open marker. The entity and its content stay cached.
    pub fn close(&self) {
        self.state().open_id = None;
    }

    /// Id of the article currently open for detail viewing, if any.
    pub fn current(&self) -> Option<String> {
        self.state().open_id.clone()
    }

    /// Drop the open marker and any pending fetch handles (session
    /// teardown). Fetches already in flight discard their store writes via
    /// the epoch check.
    pub fn reset(&self) {
        let mut state = self.state();
        state.open_id = None;
        state.pending.clear();
    }

    fn fetch(
        &self,
        id: String,
    ) -> impl std::future::Future<Output = Result<Article, EngineError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();

        async move {
            let epoch = store::lock(&store).epoch();
            match gateway.article(&id).await {
                Ok(fetched) => {
                    let mut store = store::lock(&store);
                    if store.epoch() != epoch {
                        // Session torn down mid-fetch; hand the result back
                        // without repopulating the cleared store.
                        return Ok(fetched);
                    }
                    store.upsert_entity(fetched);
                    // Read back the merged record: the store may hold richer
                    // fields than the detail payload.
                    store
                        .article(&id)
                        .cloned()
                        .ok_or(EngineError::InvalidReference)
                }
                Err(err) => {
                    tracing::warn!(article_id = %id, error = %err, "Detail fetch failed");
                    Err(map_gateway(err, &events))
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
