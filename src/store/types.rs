use chrono::{DateTime, Utc};

// ============================================================================
// Core Entities
// ============================================================================

/// A single article as known to the client.
///
/// Created on first appearance in any gateway response and updated in place
/// by later fetches of the same id. `content` is only populated by a detail
/// fetch (or an unusually rich list payload) and is never cleared by a
/// sparser record arriving afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// Server-assigned id, globally unique within a session.
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Full body text. Populated lazily, see [`crate::Engine::open`].
    pub content: Option<String>,
    /// Link to the article on its original site.
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub source_name: Option<String>,
    pub author: Option<String>,
    /// Publication timestamp. `None` when the gateway sent something
    /// unparseable, which the UI renders as "unknown".
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// Derived locally. Not server-authoritative until a save/unsave
    /// confirmation lands; owned by the mutation state machine.
    pub is_saved: bool,
}

impl Article {
    /// True once a detail fetch has populated a non-empty body.
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// The three logical article collections the UI can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Feed,
    Search,
    Saved,
}

impl ListKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ListKind::Feed => "feed",
            ListKind::Search => "search",
            ListKind::Saved => "saved",
        }
    }
}

// ============================================================================
// Pagination Signals
// ============================================================================

/// How a page response communicated "there is more after this".
///
/// The gateway is inconsistent: some endpoints return an explicit
/// `totalPages`, some a `hasMore` boolean, some neither. With neither,
/// `has_more` falls back to comparing the returned item count against the
/// page limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreSignal {
    TotalPages(u32),
    HasMore(bool),
    FromCount,
}

/// Read-only view state handed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    /// Display order. No duplicates.
    pub ids: Vec<String>,
    /// Next page to fetch, 1-based.
    pub cursor: u32,
    pub has_more: bool,
    /// Search term. Always empty for the feed and saved views.
    pub query: String,
}
