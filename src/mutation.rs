//! Optimistic save/unsave with snapshot rollback.
//!
//! The flip is applied locally before the gateway confirms, so the UI never
//! waits on the network to show a bookmark. On failure the snapshot is
//! restored in full, including the removed entry's original position in the
//! saved view, before the error reaches the caller. In-flight mutations are
//! kept as shared futures keyed by `(article_id, kind)`: a repeat call of
//! the same kind awaits the same outcome instead of issuing a second
//! gateway request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::engine::{map_gateway, EngineError, EventSender};
use crate::gateway::{ArticleGateway, GatewayError};
use crate::store::{self, FeedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MutationKind {
    Save,
    Unsave,
}

/// Successful end states of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Saved,
    Unsaved,
    /// The gateway answered 404 on unsave: the entity is already absent
    /// server-side, which is the desired end state.
    AlreadyUnsaved,
}

type SharedMutation = Shared<BoxFuture<'static, Result<MutationOutcome, EngineError>>>;

/// Everything needed to undo the optimistic flip.
#[derive(Debug, Clone, Copy)]
struct Rollback {
    prev_saved: bool,
    /// True when the optimistic save actually inserted into the saved view.
    inserted: bool,
    /// Original position of the entry an optimistic unsave removed.
    removed_at: Option<usize>,
    /// Store epoch at snapshot time. A session reset in between makes the
    /// confirmation or rollback a no-op against the fresh store.
    epoch: u64,
}

pub(crate) struct MutationManager {
    store: Arc<Mutex<FeedStore>>,
    gateway: Arc<dyn ArticleGateway>,
    events: EventSender,
    in_flight: Mutex<HashMap<(String, MutationKind), SharedMutation>>,
}

impl MutationManager {
    pub fn new(
        store: Arc<Mutex<FeedStore>>,
        gateway: Arc<dyn ArticleGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<(String, MutationKind), SharedMutation>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn save(&self, id: &str) -> Result<MutationOutcome, EngineError> {
        self.apply(id, MutationKind::Save).await
    }

    pub async fn unsave(&self, id: &str) -> Result<MutationOutcome, EngineError> {
        self.apply(id, MutationKind::Unsave).await
    }

    async fn apply(&self, id: &str, kind: MutationKind) -> Result<MutationOutcome, EngineError> {
        let key = (id.to_string(), kind);

        // Coalesce onto an in-flight mutation of the same kind for this id.
        let existing = self.pending().get(&key).cloned();
        if let Some(shared) = existing {
            tracing::debug!(
                article_id = %id,
                kind = ?kind,
                "Coalescing onto in-flight mutation"
            );
            return shared.await;
        }

        // Snapshot and optimistic flip, synchronously under the store lock.
        let rollback = {
            let mut store = store::lock(&self.store);
            let Some(prev_saved) = store.saved_flag(id) else {
                tracing::warn!(article_id = %id, "Mutation refused: unknown article reference");
                return Err(EngineError::InvalidReference);
            };
            let epoch = store.epoch();
            match kind {
                MutationKind::Save => {
                    store.set_saved_flag(id, true);
                    let inserted = store.saved_insert(id);
                    Rollback {
                        prev_saved,
                        inserted,
                        removed_at: None,
                        epoch,
                    }
                }
                MutationKind::Unsave => {
                    store.set_saved_flag(id, false);
                    let removed_at = store.saved_remove(id);
                    Rollback {
                        prev_saved,
                        inserted: false,
                        removed_at,
                        epoch,
                    }
                }
            }
        };

        let shared = self.confirm(key.0.clone(), kind, rollback).boxed().shared();
        self.pending().insert(key.clone(), shared.clone());

        let outcome = shared.await;
        self.pending().remove(&key);
        outcome
    }

    /// The gateway round-trip and its aftermath. Runs exactly once per
    /// in-flight key; coalesced callers share the resolved outcome.
    fn confirm(
        &self,
        id: String,
        kind: MutationKind,
        rollback: Rollback,
    ) -> impl Future<Output = Result<MutationOutcome, EngineError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();

        async move {
            let result: Result<MutationOutcome, GatewayError> = match kind {
                MutationKind::Save => {
                    let payload = store::lock(&store).article(&id).cloned();
                    match payload {
                        Some(article) => gateway.save_article(&article).await.map(|confirmed| {
                            let mut store = store::lock(&store);
                            if store.epoch() == rollback.epoch {
                                store.confirm_saved(&id, confirmed);
                            }
                            MutationOutcome::Saved
                        }),
                        // Entity vanished between the flip and the call
                        // (session teardown); surfaced as a bad reference.
                        None => Err(GatewayError::InvalidId),
                    }
                }
                MutationKind::Unsave => match gateway.unsave_article(&id).await {
                    Ok(()) => Ok(MutationOutcome::Unsaved),
                    Err(GatewayError::Server { status: 404, .. }) => {
                        tracing::debug!(
                            article_id = %id,
                            "Unsave answered 404, already absent server-side"
                        );
                        Ok(MutationOutcome::AlreadyUnsaved)
                    }
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    {
                        let mut store = store::lock(&store);
                        if store.epoch() == rollback.epoch {
                            store.set_saved_flag(&id, rollback.prev_saved);
                            if rollback.inserted {
                                store.saved_remove(&id);
                            }
                            if let Some(index) = rollback.removed_at {
                                store.saved_restore(&id, index);
                            }
                        }
                    }
                    tracing::warn!(
                        article_id = %id,
                        kind = ?kind,
                        error = %err,
                        "Mutation failed, optimistic state rolled back"
                    );
                    Err(map_gateway(err, &events))
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
