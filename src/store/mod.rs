//! Normalized article store shared by every list view.
//!
//! One `Article` record per id lives in the entity table; the feed, search,
//! and saved views are ordered id sequences referencing it. This replaces the
//! per-screen `articles`/`page`/`hasMore` copies of the original application
//! with a single source of truth.

mod types;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use types::{Article, ListKind, MoreSignal, ViewSnapshot};

/// Lock the shared store, recovering from a poisoned mutex.
///
/// The store is only ever locked for synchronous read-modify-write sections
/// between suspension points, so a poisoned lock means a panic mid-section;
/// the data itself is still structurally valid.
pub(crate) fn lock(store: &Mutex<FeedStore>) -> MutexGuard<'_, FeedStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// List Views
// ============================================================================

#[derive(Debug)]
struct ListView {
    ids: Vec<String>,
    cursor: u32,
    has_more: bool,
    query: String,
}

impl ListView {
    fn new() -> Self {
        Self {
            ids: Vec::new(),
            cursor: 1,
            has_more: true,
            query: String::new(),
        }
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.cursor = 1;
        self.has_more = true;
        self.query.clear();
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            ids: self.ids.clone(),
            cursor: self.cursor,
            has_more: self.has_more,
            query: self.query.clone(),
        }
    }
}

/// Result of a [`FeedStore::merge_page`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Page accepted; `appended` ids were added to the view.
    Applied { appended: usize },
    /// The page number did not match the view's cursor. Nothing was changed;
    /// the caller re-derives the cursor from a fresh snapshot.
    Rejected { expected: u32 },
}

// ============================================================================
// Feed Store
// ============================================================================

/// Entity table plus the three list views.
///
/// Owned and mutated exclusively by the engine's components; the UI layer
/// only sees [`ViewSnapshot`]s and cloned [`Article`]s.
pub struct FeedStore {
    entities: HashMap<String, Article>,
    feed: ListView,
    search: ListView,
    saved: ListView,
    page_limit: u32,
    /// Bumped by [`reset_all`](Self::reset_all). In-flight work captures the
    /// epoch it started under and skips its store writes when a session
    /// teardown happened in between.
    epoch: u64,
}

impl FeedStore {
    pub fn new(page_limit: u32) -> Self {
        Self {
            entities: HashMap::new(),
            feed: ListView::new(),
            search: ListView::new(),
            saved: ListView::new(),
            page_limit,
            epoch: 0,
        }
    }

    fn view_ref(&self, kind: ListKind) -> &ListView {
        match kind {
            ListKind::Feed => &self.feed,
            ListKind::Search => &self.search,
            ListKind::Saved => &self.saved,
        }
    }

    fn view_mut(&mut self, kind: ListKind) -> &mut ListView {
        match kind {
            ListKind::Feed => &mut self.feed,
            ListKind::Search => &mut self.search,
            ListKind::Saved => &mut self.saved,
        }
    }

    // ========================================================================
    // Read Surface
    // ========================================================================

    pub fn view(&self, kind: ListKind) -> ViewSnapshot {
        self.view_ref(kind).snapshot()
    }

    pub fn article(&self, id: &str) -> Option<&Article> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // ========================================================================
    // Page Merging
    // ========================================================================

    /// Append a fetched page to a view.
    ///
    /// A changed search term triggers a full replace of the search view
    /// before appending (only for page 1; a later page of a different query
    /// is rejected outright). The page number must equal the view's cursor,
    /// otherwise the merge is rejected and nothing changes. Ids already in
    /// the view are dropped, entities are upserted with the
    /// merge-not-overwrite policy, and at most `page_limit` new ids are
    /// surfaced per call.
    pub fn merge_page(
        &mut self,
        kind: ListKind,
        query: &str,
        page: u32,
        items: Vec<Article>,
        signal: MoreSignal,
    ) -> MergeOutcome {
        {
            let view = self.view_mut(kind);
            if kind == ListKind::Search && query != view.query {
                if page != 1 {
                    tracing::warn!(
                        kind = kind.as_str(),
                        page = page,
                        "Rejecting non-initial page for a different query"
                    );
                    return MergeOutcome::Rejected { expected: 1 };
                }
                view.reset();
                view.query = query.to_string();
            }
            if page != view.cursor {
                tracing::warn!(
                    kind = kind.as_str(),
                    page = page,
                    expected = view.cursor,
                    "Rejecting out-of-order page merge"
                );
                return MergeOutcome::Rejected {
                    expected: view.cursor,
                };
            }
        }

        let received = items.len();
        let has_more = match signal {
            MoreSignal::TotalPages(total) => page < total,
            MoreSignal::HasMore(flag) => flag,
            MoreSignal::FromCount => received as u32 >= self.page_limit,
        };

        let mut incoming_ids = Vec::with_capacity(received);
        for item in items {
            incoming_ids.push(item.id.clone());
            self.upsert_entity(item);
        }

        let limit = self.page_limit as usize;
        let view = self.view_mut(kind);
        let mut appended = 0;
        for id in incoming_ids {
            if appended >= limit {
                break;
            }
            if !view.contains(&id) {
                view.ids.push(id);
                appended += 1;
            }
        }
        view.cursor = page + 1;
        view.has_more = has_more;

        tracing::debug!(
            kind = kind.as_str(),
            page = page,
            received = received,
            appended = appended,
            has_more = has_more,
            "Merged page"
        );
        MergeOutcome::Applied { appended }
    }

    /// Full replace of the search view for a fresh query.
    pub fn begin_search(&mut self, query: &str) {
        self.search.reset();
        self.search.query = query.to_string();
    }

    /// Clear a view's id sequence, reset the cursor to 1 and `has_more` to
    /// true. Used on query change and explicit reload.
    pub fn reset_view(&mut self, kind: ListKind) {
        self.view_mut(kind).reset();
    }

    /// Session teardown: every view cleared, entity table emptied, epoch
    /// bumped so in-flight work discards its pending store writes.
    pub fn reset_all(&mut self) {
        self.entities.clear();
        self.feed.reset();
        self.search.reset();
        self.saved.reset();
        self.epoch = self.epoch.wrapping_add(1);
        tracing::info!(epoch = self.epoch, "Store reset");
    }

    // ========================================================================
    // Entity Merging
    // ========================================================================

    /// Insert or merge an entity record.
    ///
    /// Fields present in the incoming record win, with two exceptions:
    /// a non-empty `content` is never replaced by an absent or empty one,
    /// and `is_saved` is left to the mutation state machine.
    pub fn upsert_entity(&mut self, incoming: Article) {
        match self.entities.get_mut(&incoming.id) {
            Some(existing) => merge_into(existing, incoming),
            None => {
                self.entities.insert(incoming.id.clone(), incoming);
            }
        }
    }

    /// Replace the saved view with a freshly fetched saved list.
    ///
    /// Every item is flagged saved; ids are deduplicated in arrival order.
    pub fn replace_saved(&mut self, items: Vec<Article>) -> usize {
        self.saved.reset();
        for item in items {
            let id = item.id.clone();
            self.upsert_entity(item);
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.is_saved = true;
            }
            if !self.saved.contains(&id) {
                self.saved.ids.push(id);
            }
        }
        // A full fetch is the complete list; there is no second page.
        self.saved.has_more = false;
        self.saved.cursor = 1;
        self.saved.ids.len()
    }

    // ========================================================================
    // Mutation Support
    // ========================================================================

    /// Current `is_saved` for an id, or `None` when the entity is unknown.
    pub fn saved_flag(&self, id: &str) -> Option<bool> {
        self.entities.get(id).map(|a| a.is_saved)
    }

    /// Returns the previous value, or `None` when the entity is unknown.
    pub fn set_saved_flag(&mut self, id: &str, saved: bool) -> Option<bool> {
        self.entities.get_mut(id).map(|a| {
            let prev = a.is_saved;
            a.is_saved = saved;
            prev
        })
    }

    /// Idempotent append to the saved view. True when the id was inserted.
    pub fn saved_insert(&mut self, id: &str) -> bool {
        if self.saved.contains(id) {
            return false;
        }
        self.saved.ids.push(id.to_string());
        true
    }

    /// Remove an id from the saved view, returning its position for a
    /// possible positioned rollback.
    pub fn saved_remove(&mut self, id: &str) -> Option<usize> {
        let index = self.saved.ids.iter().position(|existing| existing == id)?;
        self.saved.ids.remove(index);
        Some(index)
    }

    /// Undo a [`saved_remove`](Self::saved_remove), restoring the original
    /// position.
    pub fn saved_restore(&mut self, id: &str, index: usize) {
        if self.saved.contains(id) {
            return;
        }
        let index = index.min(self.saved.ids.len());
        self.saved.ids.insert(index, id.to_string());
    }

    /// Apply a save confirmation: merge the confirmed record and make sure
    /// the flag and saved view reflect it.
    pub fn confirm_saved(&mut self, id: &str, confirmed: Article) {
        self.upsert_entity(confirmed);
        self.set_saved_flag(id, true);
        self.saved_insert(id);
    }
}

fn merge_into(existing: &mut Article, incoming: Article) {
    if !incoming.title.is_empty() {
        existing.title = incoming.title;
    }
    if incoming.description.is_some() {
        existing.description = incoming.description;
    }
    if incoming.content.as_deref().is_some_and(|c| !c.is_empty()) {
        existing.content = incoming.content;
    }
    if incoming.url.is_some() {
        existing.url = incoming.url;
    }
    if incoming.image_url.is_some() {
        existing.image_url = incoming.image_url;
    }
    if incoming.source_name.is_some() {
        existing.source_name = incoming.source_name;
    }
    if incoming.author.is_some() {
        existing.author = incoming.author;
    }
    if incoming.published_at.is_some() {
        existing.published_at = incoming.published_at;
    }
    if incoming.category.is_some() {
        existing.category = incoming.category;
    }
    // is_saved is deliberately untouched: a feed refresh must not undo an
    // optimistic save still awaiting confirmation.
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Title {id}"),
            description: Some(format!("Description {id}")),
            content: None,
            url: Some(format!("https://example.com/{id}")),
            image_url: None,
            source_name: Some("Example Wire".to_string()),
            author: None,
            published_at: None,
            category: Some("general".to_string()),
            is_saved: false,
        }
    }

    fn page(ids: &[&str]) -> Vec<Article> {
        ids.iter().map(|id| article(id)).collect()
    }

    #[test]
    fn test_merge_first_page() {
        let mut store = FeedStore::new(20);
        let outcome = store.merge_page(
            ListKind::Feed,
            "",
            1,
            page(&["a", "b", "c"]),
            MoreSignal::HasMore(true),
        );
        assert_eq!(outcome, MergeOutcome::Applied { appended: 3 });

        let view = store.view(ListKind::Feed);
        assert_eq!(view.ids, vec!["a", "b", "c"]);
        assert_eq!(view.cursor, 2);
        assert!(view.has_more);
    }

    #[test]
    fn test_merge_deduplicates_across_pages() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a", "b"]), MoreSignal::HasMore(true));
        let outcome = store.merge_page(
            ListKind::Feed,
            "",
            2,
            page(&["b", "c"]),
            MoreSignal::HasMore(false),
        );
        assert_eq!(outcome, MergeOutcome::Applied { appended: 1 });

        let view = store.view(ListKind::Feed);
        assert_eq!(view.ids, vec!["a", "b", "c"]);
        assert!(!view.has_more);
    }

    #[test]
    fn test_merge_deduplicates_within_page() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a", "a", "b"]), MoreSignal::FromCount);
        assert_eq!(store.view(ListKind::Feed).ids, vec!["a", "b"]);
    }

    #[test]
    fn test_out_of_order_page_rejected() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::HasMore(true));

        let outcome = store.merge_page(
            ListKind::Feed,
            "",
            4,
            page(&["z"]),
            MoreSignal::HasMore(true),
        );
        assert_eq!(outcome, MergeOutcome::Rejected { expected: 2 });

        // Nothing changed: no entity, no id, cursor intact.
        assert!(!store.contains("z"));
        let view = store.view(ListKind::Feed);
        assert_eq!(view.ids, vec!["a"]);
        assert_eq!(view.cursor, 2);
    }

    #[test]
    fn test_duplicate_page_rejected() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::HasMore(true));
        let outcome = store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::HasMore(true));
        assert_eq!(outcome, MergeOutcome::Rejected { expected: 2 });
    }

    #[test]
    fn test_new_query_replaces_search_view() {
        let mut store = FeedStore::new(20);
        store.merge_page(
            ListKind::Search,
            "moon",
            1,
            page(&["m1", "m2"]),
            MoreSignal::TotalPages(3),
        );
        assert_eq!(store.view(ListKind::Search).ids, vec!["m1", "m2"]);

        store.merge_page(
            ListKind::Search,
            "mars",
            1,
            page(&["r1"]),
            MoreSignal::TotalPages(1),
        );
        let view = store.view(ListKind::Search);
        assert_eq!(view.ids, vec!["r1"]);
        assert_eq!(view.query, "mars");
        assert_eq!(view.cursor, 2);
        assert!(!view.has_more);
    }

    #[test]
    fn test_later_page_of_stale_query_rejected() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Search, "mars", 1, page(&["r1"]), MoreSignal::TotalPages(2));

        // Page 2 of a query the view no longer holds must not reset anything.
        let outcome = store.merge_page(
            ListKind::Search,
            "moon",
            2,
            page(&["m9"]),
            MoreSignal::TotalPages(2),
        );
        assert_eq!(outcome, MergeOutcome::Rejected { expected: 1 });
        assert_eq!(store.view(ListKind::Search).query, "mars");
        assert_eq!(store.view(ListKind::Search).ids, vec!["r1"]);
    }

    #[test]
    fn test_has_more_from_total_pages() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Search, "q", 1, page(&["a"]), MoreSignal::TotalPages(2));
        assert!(store.view(ListKind::Search).has_more);
        store.merge_page(ListKind::Search, "q", 2, page(&["b"]), MoreSignal::TotalPages(2));
        assert!(!store.view(ListKind::Search).has_more);
    }

    #[test]
    fn test_has_more_from_count() {
        let mut store = FeedStore::new(2);
        store.merge_page(ListKind::Feed, "", 1, page(&["a", "b"]), MoreSignal::FromCount);
        assert!(store.view(ListKind::Feed).has_more, "full page implies more");

        store.merge_page(ListKind::Feed, "", 2, page(&["c"]), MoreSignal::FromCount);
        assert!(!store.view(ListKind::Feed).has_more, "short page implies end");
    }

    #[test]
    fn test_page_limit_caps_surfaced_ids() {
        let mut store = FeedStore::new(2);
        let outcome = store.merge_page(
            ListKind::Feed,
            "",
            1,
            page(&["a", "b", "c", "d"]),
            MoreSignal::FromCount,
        );
        assert_eq!(outcome, MergeOutcome::Applied { appended: 2 });
        assert_eq!(store.view(ListKind::Feed).ids, vec!["a", "b"]);
        // Overflow items still reach the entity table.
        assert!(store.contains("c"));
    }

    #[test]
    fn test_merge_never_clears_content() {
        let mut store = FeedStore::new(20);
        let mut rich = article("a");
        rich.content = Some("full body".to_string());
        store.upsert_entity(rich);

        // A sparse list record for the same id arrives later.
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::FromCount);
        assert_eq!(
            store.article("a").unwrap().content.as_deref(),
            Some("full body")
        );

        // Even an explicit empty content does not clear it.
        let mut empty = article("a");
        empty.content = Some(String::new());
        store.upsert_entity(empty);
        assert_eq!(
            store.article("a").unwrap().content.as_deref(),
            Some("full body")
        );
    }

    #[test]
    fn test_merge_updates_metadata_in_place() {
        let mut store = FeedStore::new(20);
        store.upsert_entity(article("a"));

        let mut updated = article("a");
        updated.title = "Fresh title".to_string();
        updated.category = Some("science".to_string());
        store.upsert_entity(updated);

        let entity = store.article("a").unwrap();
        assert_eq!(entity.title, "Fresh title");
        assert_eq!(entity.category.as_deref(), Some("science"));
    }

    #[test]
    fn test_merge_preserves_saved_flag() {
        let mut store = FeedStore::new(20);
        store.upsert_entity(article("a"));
        store.set_saved_flag("a", true);

        // Feed refresh carrying the same id must not undo the flag.
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::FromCount);
        assert_eq!(store.saved_flag("a"), Some(true));
    }

    #[test]
    fn test_saved_insert_idempotent() {
        let mut store = FeedStore::new(20);
        store.upsert_entity(article("a"));
        assert!(store.saved_insert("a"));
        assert!(!store.saved_insert("a"));
        assert_eq!(store.view(ListKind::Saved).ids, vec!["a"]);
    }

    #[test]
    fn test_saved_remove_and_restore_keeps_order() {
        let mut store = FeedStore::new(20);
        for id in ["a", "b", "c"] {
            store.upsert_entity(article(id));
            store.saved_insert(id);
        }

        let index = store.saved_remove("b").unwrap();
        assert_eq!(index, 1);
        assert_eq!(store.view(ListKind::Saved).ids, vec!["a", "c"]);

        store.saved_restore("b", index);
        assert_eq!(store.view(ListKind::Saved).ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_replace_saved_flags_and_dedupes() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a", "b"]), MoreSignal::FromCount);

        let count = store.replace_saved(page(&["b", "b", "c"]));
        assert_eq!(count, 2);
        assert_eq!(store.view(ListKind::Saved).ids, vec!["b", "c"]);
        assert_eq!(store.saved_flag("b"), Some(true));
        assert_eq!(store.saved_flag("c"), Some(true));
        assert_eq!(store.saved_flag("a"), Some(false));
        assert!(!store.view(ListKind::Saved).has_more);
    }

    #[test]
    fn test_reset_view() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Search, "q", 1, page(&["a"]), MoreSignal::TotalPages(5));
        store.reset_view(ListKind::Search);

        let view = store.view(ListKind::Search);
        assert!(view.ids.is_empty());
        assert_eq!(view.cursor, 1);
        assert!(view.has_more);
        assert!(view.query.is_empty());
        // The entity survives the view reset.
        assert!(store.contains("a"));
    }

    #[test]
    fn test_reset_all_clears_everything_and_bumps_epoch() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::FromCount);
        store.saved_insert("a");
        let epoch = store.epoch();

        store.reset_all();
        assert!(!store.contains("a"));
        assert!(store.view(ListKind::Feed).ids.is_empty());
        assert!(store.view(ListKind::Saved).ids.is_empty());
        assert_eq!(store.view(ListKind::Feed).cursor, 1);
        assert_ne!(store.epoch(), epoch);
    }

    #[test]
    fn test_shared_entity_across_views() {
        let mut store = FeedStore::new(20);
        store.merge_page(ListKind::Feed, "", 1, page(&["a"]), MoreSignal::FromCount);
        store.merge_page(ListKind::Search, "q", 1, page(&["a"]), MoreSignal::TotalPages(1));

        // One record serves both views; enriching it is visible everywhere.
        let mut detail = article("a");
        detail.content = Some("body".to_string());
        store.upsert_entity(detail);

        assert!(store.view(ListKind::Feed).ids.contains(&"a".to_string()));
        assert!(store.view(ListKind::Search).ids.contains(&"a".to_string()));
        assert!(store.article("a").unwrap().has_content());
    }

    proptest! {
        /// Any interleaving of page merges leaves every view duplicate-free.
        #[test]
        fn prop_views_never_hold_duplicates(
            pages in proptest::collection::vec(
                (0u8..3, 1u32..5, proptest::collection::vec(0u8..12, 0..8)),
                1..24,
            )
        ) {
            let mut store = FeedStore::new(20);
            for (kind, page_no, ids) in pages {
                let kind = match kind {
                    0 => ListKind::Feed,
                    1 => ListKind::Search,
                    _ => ListKind::Saved,
                };
                let items: Vec<Article> =
                    ids.iter().map(|n| article(&format!("id-{n}"))).collect();
                let query = if kind == ListKind::Search { "q" } else { "" };
                let _ = store.merge_page(kind, query, page_no, items, MoreSignal::FromCount);
            }

            for kind in [ListKind::Feed, ListKind::Search, ListKind::Saved] {
                let ids = store.view(kind).ids;
                let mut deduped = ids.clone();
                deduped.sort();
                deduped.dedup();
                prop_assert_eq!(ids.len(), deduped.len());
            }
        }
    }
}
