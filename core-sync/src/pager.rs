//! Cursor-carrying pagination.
//!
//! A [`Pager`] holds the state of one paginated listing: the cursor for the
//! next page, the cursors already followed and the page count. It is finite
//! (a repeated cursor or too many pages is an error rather than a loop) and
//! restartable from the first page.

use crate::error::FetchError;
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on pages per listing. At 50-100 entries per page this is far
/// beyond any real playlist.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// One fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Pager {
    cursor: Option<String>,
    followed: HashSet<String>,
    pages: usize,
    max_pages: usize,
    done: bool,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAGES)
    }
}

impl Pager {
    pub fn new(max_pages: usize) -> Self {
        Self {
            cursor: None,
            followed: HashSet::new(),
            pages: 0,
            max_pages: max_pages.max(1),
            done: false,
        }
    }

    /// Cursor to request next; `None` means the first page.
    pub fn cursor(&self) -> Option<String> {
        self.cursor.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Records a fetched page and its continuation.
    pub fn advance(&mut self, next_cursor: Option<String>) -> Result<(), FetchError> {
        self.pages += 1;
        match next_cursor {
            None => {
                self.done = true;
                self.cursor = None;
                Ok(())
            }
            Some(next) => {
                if !self.followed.insert(next.clone()) {
                    return Err(FetchError::Pagination(format!(
                        "cursor {:?} returned twice",
                        next
                    )));
                }
                if self.pages >= self.max_pages {
                    return Err(FetchError::Pagination(format!(
                        "more than {} pages",
                        self.max_pages
                    )));
                }
                self.cursor = Some(next);
                Ok(())
            }
        }
    }

    /// Forgets all progress so the listing can be read again from the start.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.followed.clear();
        self.pages = 0;
        self.done = false;
    }

    /// Fetches pages until exhaustion and concatenates their items.
    ///
    /// Cancellation is checked between pages; a cancelled drain returns
    /// [`FetchError::Cancelled`] and discards what it collected.
    pub async fn drain<T, F, Fut>(
        &mut self,
        label: &str,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<Vec<T>, FetchError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>, FetchError>>,
    {
        let mut items = Vec::new();
        while !self.done {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let page = fetch(self.cursor()).await?;
            debug!(
                listing = label,
                page = self.pages + 1,
                items = page.items.len(),
                "Fetched page"
            );
            items.extend(page.items);
            self.advance(page.next_cursor)?;
        }
        Ok(items)
    }
}
