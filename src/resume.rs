//! Consumer-side resume tracking.
//!
//! A [`Checkpoint`](crate::Checkpoint) follows the paginator, which runs
//! ahead of whoever consumes the processed output. [`ResumeLedger`] instead
//! counts, per page, the items that have not been settled yet (written or
//! failed) and answers with the cursor of the oldest page that still has
//! unsettled items. Restarting from that cursor may repeat items but never
//! skips one.
//!
//! Wrap a page source in [`TrackedSource`] so every item carries the page it
//! came from, then call [`ResumeLedger::settle`] once the item is done.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::paginate::{Page, PageRequest, PageSource};

/// Where a new run should start to pick up every unsettled item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// From the first page, without a cursor.
    Start,
    /// From the page at this cursor.
    Cursor(String),
    /// Every page was fetched and every item settled.
    Complete,
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Cursor(cursor) => f.write_str(cursor),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// An item tagged with the sequence number of its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked<T> {
    /// Page sequence number, as returned by [`ResumeLedger::register_page`].
    pub page: u64,
    /// The item itself.
    pub item: T,
}

#[derive(Debug)]
struct PageEntry {
    seq: u64,
    cursor: Option<String>,
    outstanding: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Pages with unsettled items, oldest first. Settled pages at the front
    /// are popped, so `seq` values here are contiguous.
    pages: VecDeque<PageEntry>,
    next_seq: u64,
    /// Next cursor of the most recently registered page; `Some(None)` once
    /// the final page has been registered.
    tail: Option<Option<String>>,
}

/// Tracks unsettled items per page and derives a safe resume point.
#[derive(Debug)]
pub struct ResumeLedger {
    initial_cursor: Option<String>,
    state: Mutex<LedgerState>,
}

impl ResumeLedger {
    /// Creates a ledger for a run that starts at `initial_cursor`.
    #[must_use]
    pub fn new(initial_cursor: Option<String>) -> Self {
        Self {
            initial_cursor,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a fetched page and returns its sequence number.
    ///
    /// `cursor` is the cursor the page was requested with; `next_cursor` is
    /// `None` when this is the final page.
    pub fn register_page(
        &self,
        cursor: Option<String>,
        next_cursor: Option<String>,
        items: usize,
    ) -> u64 {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tail = Some(next_cursor);
        state.pages.push_back(PageEntry {
            seq,
            cursor,
            outstanding: items,
        });
        prune(&mut state);
        seq
    }

    /// Marks one item of page `seq` as written or failed.
    pub fn settle(&self, seq: u64) {
        let mut state = self.lock();
        let Some(front) = state.pages.front().map(|entry| entry.seq) else {
            warn!(page = seq, "settled an item of an unknown page");
            return;
        };
        let Some(entry) = seq
            .checked_sub(front)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|offset| state.pages.get_mut(offset))
        else {
            warn!(page = seq, "settled an item of an unknown page");
            return;
        };
        entry.outstanding = entry.outstanding.saturating_sub(1);
        prune(&mut state);
    }

    /// Number of pages that still have unsettled items.
    #[must_use]
    pub fn open_pages(&self) -> usize {
        self.lock().pages.len()
    }

    /// Where a new run should start so that no unsettled item is skipped.
    #[must_use]
    pub fn resume_point(&self) -> ResumePoint {
        let state = self.lock();
        if let Some(oldest) = state.pages.front() {
            return oldest
                .cursor
                .clone()
                .map_or(ResumePoint::Start, ResumePoint::Cursor);
        }
        match &state.tail {
            None => self
                .initial_cursor
                .clone()
                .map_or(ResumePoint::Start, ResumePoint::Cursor),
            Some(Some(next)) => ResumePoint::Cursor(next.clone()),
            Some(None) => ResumePoint::Complete,
        }
    }
}

fn prune(state: &mut LedgerState) {
    while state
        .pages
        .front()
        .is_some_and(|entry| entry.outstanding == 0)
    {
        if let Some(entry) = state.pages.pop_front() {
            debug!(page = entry.seq, "page fully settled");
        }
    }
}

/// Page source that registers every fetched page with a [`ResumeLedger`]
/// and tags its items with the page's sequence number.
pub struct TrackedSource<S: ?Sized> {
    inner: Arc<S>,
    ledger: Arc<ResumeLedger>,
}

impl<S: ?Sized> fmt::Debug for TrackedSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedSource")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized> TrackedSource<S> {
    /// Wraps `inner`, recording pages in `ledger`.
    #[must_use]
    pub fn new(inner: Arc<S>, ledger: Arc<ResumeLedger>) -> Self {
        Self { inner, ledger }
    }
}

#[async_trait]
impl<T, S> PageSource<Tracked<T>> for TrackedSource<S>
where
    T: Send + 'static,
    S: PageSource<T> + ?Sized + 'static,
{
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Tracked<T>>, ApiError> {
        let cursor = request.cursor.clone();
        let page = self.inner.fetch_page(request).await?;
        let next_cursor = page.next_cursor.clone().filter(|_| page.has_more);
        let seq = self
            .ledger
            .register_page(cursor, next_cursor, page.items.len());

        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(|item| Tracked { page: seq, item })
                .collect(),
            has_more: page.has_more,
            next_cursor: page.next_cursor,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Ledger ====================

    #[test]
    fn test_fresh_ledger_resumes_from_initial_cursor() {
        assert_eq!(ResumeLedger::new(None).resume_point(), ResumePoint::Start);
        assert_eq!(
            ResumeLedger::new(Some("c7".to_string())).resume_point(),
            ResumePoint::Cursor("c7".to_string())
        );
    }

    #[test]
    fn test_unsettled_first_page_resumes_from_start() {
        let ledger = ResumeLedger::new(None);
        let first = ledger.register_page(None, Some("c2".to_string()), 2);
        ledger.register_page(Some("c2".to_string()), Some("c3".to_string()), 2);

        ledger.settle(first);
        assert_eq!(ledger.resume_point(), ResumePoint::Start);
        assert_eq!(ledger.open_pages(), 2);
    }

    #[test]
    fn test_oldest_unsettled_page_wins() {
        let ledger = ResumeLedger::new(None);
        let first = ledger.register_page(None, Some("c2".to_string()), 1);
        let second = ledger.register_page(Some("c2".to_string()), Some("c3".to_string()), 2);
        let third = ledger.register_page(Some("c3".to_string()), Some("c4".to_string()), 1);

        ledger.settle(first);
        ledger.settle(third);
        ledger.settle(second);
        assert_eq!(ledger.resume_point(), ResumePoint::Cursor("c2".to_string()));

        ledger.settle(second);
        assert_eq!(ledger.resume_point(), ResumePoint::Cursor("c4".to_string()));
        assert_eq!(ledger.open_pages(), 0);
    }

    #[test]
    fn test_all_settled_after_final_page_is_complete() {
        let ledger = ResumeLedger::new(None);
        let only = ledger.register_page(None, None, 1);
        ledger.settle(only);
        assert_eq!(ledger.resume_point(), ResumePoint::Complete);
    }

    #[test]
    fn test_empty_page_is_settled_immediately() {
        let ledger = ResumeLedger::new(None);
        ledger.register_page(None, Some("c2".to_string()), 0);
        assert_eq!(ledger.open_pages(), 0);
        assert_eq!(ledger.resume_point(), ResumePoint::Cursor("c2".to_string()));
    }

    #[test]
    fn test_unknown_page_is_ignored() {
        let ledger = ResumeLedger::new(None);
        ledger.settle(3);
        let seq = ledger.register_page(None, None, 1);
        ledger.settle(seq + 5);
        assert_eq!(ledger.open_pages(), 1);
    }

    #[test]
    fn test_resume_point_display() {
        assert_eq!(ResumePoint::Cursor("c9".to_string()).to_string(), "c9");
        assert_eq!(ResumePoint::Complete.to_string(), "complete");
    }

    // ==================== Tracked Source ====================

    struct TwoPages;

    #[async_trait]
    impl PageSource<u32> for TwoPages {
        async fn fetch_page(&self, request: PageRequest) -> Result<Page<u32>, ApiError> {
            match request.cursor.as_deref() {
                None => Ok(Page::more(vec![1, 2], "c2")),
                Some("c2") => Ok(Page::last(vec![3])),
                Some(_) => Err(ApiError::http_status("two_pages", 404)),
            }
        }
    }

    fn request(cursor: Option<&str>) -> PageRequest {
        PageRequest {
            cursor: cursor.map(str::to_string),
            page_size: 10,
        }
    }

    #[tokio::test]
    async fn test_tracked_source_tags_items_with_page() {
        let ledger = Arc::new(ResumeLedger::new(None));
        let source = TrackedSource::new(Arc::new(TwoPages), Arc::clone(&ledger));

        let first = source.fetch_page(request(None)).await.unwrap();
        assert_eq!(first.next_cursor.as_deref(), Some("c2"));
        assert!(first.items.iter().all(|tracked| tracked.page == 0));
        let second = source.fetch_page(request(Some("c2"))).await.unwrap();
        assert_eq!(second.items, vec![Tracked { page: 1, item: 3 }]);

        for tracked in first.items.iter().chain(&second.items) {
            ledger.settle(tracked.page);
        }
        assert_eq!(ledger.resume_point(), ResumePoint::Complete);
    }

    #[tokio::test]
    async fn test_failed_fetch_registers_nothing() {
        let ledger = Arc::new(ResumeLedger::new(Some("gone".to_string())));
        let source = TrackedSource::new(Arc::new(TwoPages), Arc::clone(&ledger));

        assert!(source.fetch_page(request(Some("gone"))).await.is_err());
        assert_eq!(ledger.open_pages(), 0);
        assert_eq!(ledger.resume_point(), ResumePoint::Cursor("gone".to_string()));
    }
}
