// Cursor pager
//
// Design Decision: The pager owns only the continuation cursor. Pages land in
// the shared Event Store, whose upsert rule reconciles records that arrive
// both through a page and through the push channel.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::store::{SharedStore, StreamItem};
use crate::types::Page;

/// Paged listing endpoint
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>, limit: Option<u32>) -> Result<Page<T>>;
}

/// Parameters of one page fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque token from a previous page; `None` requests the first page
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    /// Concatenate onto the held collection instead of replacing it
    pub append: bool,
}

impl PageRequest {
    /// First page, replacing whatever is held
    pub fn first() -> Self {
        Self::default()
    }

    /// Page after `cursor`, appended to what is held
    pub fn after(cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit: None,
            append: true,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

/// Fetches pages into an Event Store and tracks the continuation cursor
pub struct CursorPager<T: StreamItem> {
    store: SharedStore<T>,
    next_cursor: Mutex<Option<String>>,
}

impl<T: StreamItem> CursorPager<T> {
    pub fn new(store: SharedStore<T>) -> Self {
        Self {
            store,
            next_cursor: Mutex::new(None),
        }
    }

    /// Fetch one page and apply it. On failure the store and cursor are left
    /// untouched.
    pub async fn fetch<S>(&self, source: &S, request: &PageRequest) -> Result<Page<T>>
    where
        S: PageSource<T> + ?Sized,
    {
        let page = source
            .fetch_page(request.cursor.as_deref(), request.limit)
            .await?;

        {
            let mut store = self.store.lock();
            if request.append {
                store.extend(page.data.iter().cloned());
            } else {
                store.replace_all(page.data.iter().cloned());
            }
        }
        *self.next_cursor.lock() = page.cursor().map(str::to_string);

        Ok(page)
    }

    /// True iff the last page carried a non-empty cursor
    pub fn has_more(&self) -> bool {
        self.next_cursor.lock().is_some()
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.next_cursor.lock().clone()
    }

    pub fn store(&self) -> &SharedStore<T> {
        &self.store
    }
}
