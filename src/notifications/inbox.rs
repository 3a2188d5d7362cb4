//! Inbox state: tabs, paging, selection and bulk actions.

use tracing::info;

use super::client::{Filter, NotificationsClient, NotificationsQuery, Sort};
use super::{Notification, NotificationsError, WatchedItem};

/// Inbox tabs and their page paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    All,
    Starred,
    Watching,
}

impl Tab {
    const ALL_PATH: &'static str = "/plus/notifications";
    const STARRED_PATH: &'static str = "/plus/notifications/starred";
    const WATCHING_PATH: &'static str = "/plus/notifications/watching";

    /// Tab shown for `path`; anything unrecognised is [`Tab::All`].
    pub fn from_path(locale: &str, path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if path == format!("/{locale}{}", Self::STARRED_PATH) {
            Self::Starred
        } else if path == format!("/{locale}{}", Self::WATCHING_PATH) {
            Self::Watching
        } else {
            Self::All
        }
    }

    pub fn path(self, locale: &str) -> String {
        let suffix = match self {
            Self::All => Self::ALL_PATH,
            Self::Starred => Self::STARRED_PATH,
            Self::Watching => Self::WATCHING_PATH,
        };
        format!("/{locale}{suffix}")
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::All => "Notifications",
            Self::Starred => "My Starred Pages",
            Self::Watching => "My Watched Pages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxItem {
    pub notification: Notification,
    pub checked: bool,
}

/// Returned by [`Inbox::delete`]; pass to [`Inbox::undo`] to restore the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoDelete {
    item: InboxItem,
    index: usize,
}

impl UndoDelete {
    pub fn id(&self) -> u64 {
        self.item.notification.id
    }

    /// Toast text for the deletion.
    pub fn message(&self) -> String {
        format!(
            "{} removed from your collection",
            self.item.notification.title
        )
    }
}

#[derive(Debug, Default)]
pub struct Inbox {
    tab: Tab,
    page: u32,
    items: Vec<InboxItem>,
    select_all: bool,
    terms: String,
    filter: Option<Filter>,
    sort: Option<Sort>,
    watched: Vec<WatchedItem>,
    total: Option<u64>,
}

impl Inbox {
    pub fn new(tab: Tab) -> Self {
        Self {
            tab,
            page: 1,
            ..Self::default()
        }
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn items(&self) -> &[InboxItem] {
        &self.items
    }

    pub fn watched(&self) -> &[WatchedItem] {
        &self.watched
    }

    pub fn select_all_checked(&self) -> bool {
        self.select_all
    }

    /// Whether more pages remain, when the server reported a total.
    pub fn has_more(&self) -> bool {
        self.total
            .is_none_or(|total| (self.items.len() as u64) < total)
    }

    pub fn switch_tab(&mut self, tab: Tab) {
        self.tab = tab;
        self.reset();
    }

    /// Change search terms, filter and sort; the list restarts at page 1.
    pub fn set_search(
        &mut self,
        terms: impl Into<String>,
        filter: Option<Filter>,
        sort: Option<Sort>,
    ) {
        self.terms = terms.into();
        self.filter = filter;
        self.sort = sort;
        self.reset();
    }

    fn reset(&mut self) {
        self.page = 1;
        self.items.clear();
        self.watched.clear();
        self.select_all = false;
        self.total = None;
    }

    pub fn query(&self) -> NotificationsQuery {
        NotificationsQuery {
            page: self.page,
            terms: self.terms.clone(),
            starred: self.tab == Tab::Starred,
            filter: self.filter,
            sort: self.sort,
        }
    }

    /// Fetch the current page and append it; returns how many items arrived.
    pub fn load(&mut self, client: &mut NotificationsClient) -> Result<usize, NotificationsError> {
        if self.tab == Tab::Watching {
            self.watched = client.watched(&self.terms)?;
            return Ok(self.watched.len());
        }
        let page = client.list(&self.query())?;
        if let Some(metadata) = page.metadata {
            self.total = Some(metadata.total);
        }
        let count = page.items.len();
        self.items.extend(page.items.into_iter().map(|notification| InboxItem {
            notification,
            checked: false,
        }));
        Ok(count)
    }

    /// Advance to the next page and append it. A failed fetch keeps the
    /// current page.
    pub fn load_more(
        &mut self,
        client: &mut NotificationsClient,
    ) -> Result<usize, NotificationsError> {
        self.page += 1;
        let loaded = self.load(client);
        if loaded.is_err() {
            self.page -= 1;
        }
        loaded
    }

    /// Flip the checked flag of `id`; returns the new value.
    pub fn toggle_checked(&mut self, id: u64) -> Result<bool, NotificationsError> {
        let item = self.item_mut(id)?;
        item.checked = !item.checked;
        Ok(item.checked)
    }

    pub fn set_select_all(&mut self, checked: bool) {
        self.select_all = checked;
        for item in &mut self.items {
            item.checked = checked;
        }
    }

    pub fn checked_ids(&self) -> Vec<u64> {
        self.items
            .iter()
            .filter(|item| item.checked)
            .map(|item| item.notification.id)
            .collect()
    }

    /// Star checked items that are not starred yet; returns the ids sent.
    pub fn star_checked(
        &mut self,
        client: &NotificationsClient,
    ) -> Result<Vec<u64>, NotificationsError> {
        let ids: Vec<u64> = self
            .items
            .iter()
            .filter(|item| item.checked && !item.notification.starred)
            .map(|item| item.notification.id)
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        client.star_ids(&ids)?;
        self.set_starred(&ids, true);
        Ok(ids)
    }

    pub fn unstar_checked(
        &mut self,
        client: &NotificationsClient,
    ) -> Result<Vec<u64>, NotificationsError> {
        let ids = self.checked_ids();
        if ids.is_empty() {
            return Ok(ids);
        }
        client.unstar_ids(&ids)?;
        self.set_starred(&ids, false);
        if self.tab == Tab::Starred {
            self.items.retain(|item| !ids.contains(&item.notification.id));
        }
        Ok(ids)
    }

    pub fn delete_checked(
        &mut self,
        client: &NotificationsClient,
    ) -> Result<Vec<u64>, NotificationsError> {
        let ids = self.checked_ids();
        if ids.is_empty() {
            return Ok(ids);
        }
        client.delete_ids(&ids)?;
        self.items.retain(|item| !ids.contains(&item.notification.id));
        info!("Deleted {} notifications", ids.len());
        Ok(ids)
    }

    pub fn toggle_star(
        &mut self,
        client: &NotificationsClient,
        id: u64,
    ) -> Result<bool, NotificationsError> {
        self.item_mut(id)?;
        client.toggle_star(id)?;
        let item = self.item_mut(id)?;
        item.notification.starred = !item.notification.starred;
        Ok(item.notification.starred)
    }

    pub fn delete(
        &mut self,
        client: &NotificationsClient,
        id: u64,
    ) -> Result<UndoDelete, NotificationsError> {
        let index = self
            .items
            .iter()
            .position(|item| item.notification.id == id)
            .ok_or(NotificationsError::UnknownItem(id))?;
        client.delete(id)?;
        let item = self.items.remove(index);
        Ok(UndoDelete { item, index })
    }

    /// Restore a deleted item at its old position.
    pub fn undo(
        &mut self,
        client: &NotificationsClient,
        undo: UndoDelete,
    ) -> Result<(), NotificationsError> {
        client.undo_delete(undo.id())?;
        let index = undo.index.min(self.items.len());
        self.items.insert(index, undo.item);
        Ok(())
    }

    pub fn mark_all_read(
        &mut self,
        client: &NotificationsClient,
    ) -> Result<(), NotificationsError> {
        client.mark_all_read()?;
        for item in &mut self.items {
            item.notification.read = true;
        }
        Ok(())
    }

    fn set_starred(&mut self, ids: &[u64], starred: bool) {
        for item in &mut self.items {
            if ids.contains(&item.notification.id) {
                item.notification.starred = starred;
            }
        }
    }

    fn item_mut(&mut self, id: u64) -> Result<&mut InboxItem, NotificationsError> {
        self.items
            .iter_mut()
            .find(|item| item.notification.id == id)
            .ok_or(NotificationsError::UnknownItem(id))
    }
}
