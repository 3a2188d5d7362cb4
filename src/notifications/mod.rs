//! Notifications inbox backed by the site's paginated REST API.

mod client;
mod inbox;

use serde::{Deserialize, Serialize};

pub use client::{
    Filter, NOTIFICATIONS_API_PATH, NotificationsClient, NotificationsQuery, Sort, WATCHED_API_PATH,
};
pub use inbox::{Inbox, InboxItem, Tab, UndoDelete};

/// Errors raised by the notifications client and inbox.
#[derive(Debug, thiserror::Error)]
pub enum NotificationsError {
    /// Transport failure or a non-2xx answer, rendered as `"<status> on <url>"`.
    #[error("{0}")]
    Http(String),
    #[error("Invalid site URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No notification with id {0}")]
    UnknownItem(u64),
}

/// One entry of the notifications list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// One page returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsPage {
    pub items: Vec<Notification>,
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
    /// Token the site expects back in `X-CSRFToken` on writes.
    #[serde(default, rename = "csrfmiddlewaretoken")]
    pub csrf_token: Option<String>,
}

/// A page the user watches for changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WatchedPage {
    pub(crate) items: Vec<WatchedItem>,
}
