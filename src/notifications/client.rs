//! Blocking client for the notifications and watched-pages endpoints.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::http_client;

use super::{NotificationsError, NotificationsPage, WatchedItem, WatchedPage};

pub const NOTIFICATIONS_API_PATH: &str = "api/v1/plus/notifications/";
pub const WATCHED_API_PATH: &str = "api/v1/plus/watched/";

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
const CSRF_HEADER: &str = "X-CSRFToken";

/// `filterType` values accepted by the list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Content,
    Compat,
}

impl Filter {
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Compat => "compat",
        }
    }
}

/// `sort` values accepted by the list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Date,
    Title,
}

impl Sort {
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Title => "title",
        }
    }
}

/// Search parameters for one list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationsQuery {
    pub page: u32,
    pub terms: String,
    pub starred: bool,
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
}

impl Default for NotificationsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            terms: String::new(),
            starred: false,
            filter: None,
            sort: None,
        }
    }
}

impl NotificationsQuery {
    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("page", &self.page.to_string());
        if !self.terms.is_empty() {
            pairs.append_pair("q", &self.terms);
        }
        if self.starred {
            pairs.append_pair("starred", "true");
        }
        if let Some(filter) = self.filter {
            pairs.append_pair("filterType", filter.as_param());
        }
        if let Some(sort) = self.sort {
            pairs.append_pair("sort", sort.as_param());
        }
    }
}

#[derive(Serialize)]
struct IdsBody<'a> {
    ids: &'a [u64],
}

/// Client bound to one site origin.
#[derive(Debug, Clone)]
pub struct NotificationsClient {
    site: Url,
    csrf_token: Option<String>,
}

impl NotificationsClient {
    pub fn new(site_base_url: &str) -> Result<Self, NotificationsError> {
        let mut site = Url::parse(site_base_url)?;
        if !site.path().ends_with('/') {
            let path = format!("{}/", site.path());
            site.set_path(&path);
        }
        Ok(Self {
            site,
            csrf_token: None,
        })
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn set_csrf_token(&mut self, token: impl Into<String>) {
        self.csrf_token = Some(token.into());
    }

    /// Full URL of the list endpoint for `query`.
    pub fn list_url(&self, query: &NotificationsQuery) -> Result<Url, NotificationsError> {
        let mut url = self.site.join(NOTIFICATIONS_API_PATH)?;
        query.apply(&mut url);
        Ok(url)
    }

    /// Fetch one page. A CSRF token carried by the page replaces the stored one.
    pub fn list(
        &mut self,
        query: &NotificationsQuery,
    ) -> Result<NotificationsPage, NotificationsError> {
        let url = self.list_url(query)?;
        let page: NotificationsPage = self.get_json(&url)?;
        if let Some(token) = &page.csrf_token {
            self.csrf_token = Some(token.clone());
        }
        debug!("Fetched {} notifications from {url}", page.items.len());
        Ok(page)
    }

    pub fn watched(&self, terms: &str) -> Result<Vec<WatchedItem>, NotificationsError> {
        let mut url = self.site.join(WATCHED_API_PATH)?;
        url.query_pairs_mut().append_pair("q", terms);
        let page: WatchedPage = self.get_json(&url)?;
        Ok(page.items)
    }

    pub fn mark_all_read(&self) -> Result<(), NotificationsError> {
        self.post("all/mark-as-read/", None)
    }

    pub fn toggle_star(&self, id: u64) -> Result<(), NotificationsError> {
        self.post(&format!("{id}/toggle-starred/"), None)
    }

    pub fn delete(&self, id: u64) -> Result<(), NotificationsError> {
        self.post(&format!("{id}/delete/"), None)
    }

    pub fn undo_delete(&self, id: u64) -> Result<(), NotificationsError> {
        self.post(&format!("{id}/undo-deletion/"), None)
    }

    pub fn star_ids(&self, ids: &[u64]) -> Result<(), NotificationsError> {
        self.post("star-ids/", Some(ids))
    }

    pub fn unstar_ids(&self, ids: &[u64]) -> Result<(), NotificationsError> {
        self.post("unstar-ids/", Some(ids))
    }

    pub fn delete_ids(&self, ids: &[u64]) -> Result<(), NotificationsError> {
        self.post("delete-ids/", Some(ids))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, NotificationsError> {
        let response = http_client::agent()
            .get(url.as_str())
            .set("Accept", "application/json")
            .call()
            .map_err(|err| NotificationsError::Http(http_client::describe_error(&err)))?;
        let bytes = http_client::read_response_bytes(response, MAX_RESPONSE_BYTES)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn post(&self, action: &str, ids: Option<&[u64]>) -> Result<(), NotificationsError> {
        let url = self.site.join(NOTIFICATIONS_API_PATH)?.join(action)?;
        let mut request = http_client::agent().post(url.as_str());
        if let Some(token) = &self.csrf_token {
            request = request.set(CSRF_HEADER, token);
        }
        let result = match ids {
            Some(ids) => {
                let body = serde_json::to_string(&IdsBody { ids })?;
                request.set("Content-Type", "text/plain").send_string(&body)
            }
            None => request.call(),
        };
        result.map_err(|err| NotificationsError::Http(http_client::describe_error(&err)))?;
        debug!("POST {url} ok");
        Ok(())
    }
}
