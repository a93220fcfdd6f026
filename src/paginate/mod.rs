//! Cursor-driven pagination into a lazy, flattened item stream.
//!
//! [`PaginatedFetcher::stream`] turns a page-fetch function into a
//! [`PageStream`]. Pages are fetched one at a time, only when the consumer
//! has drained the previous one, so memory stays bounded by one page no
//! matter how large the collection is.
//!
//! Each fetch goes through the shared [`RequestExecutor`] and is preceded by
//! the inter-page delay. The stream is forward-only; to resume later,
//! persist [`Checkpoint::cursor`] and start a new stream with it as the
//! initial cursor.

mod page;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream};
use tracing::{debug, info, instrument};

pub use page::{Page, PageRequest, PageSource};

use crate::error::{ApiError, ErrorKind, ErrorRecord};
use crate::events::{Event, EventSink, NoopSink};
use crate::executor::RequestExecutor;
use crate::shutdown::Shutdown;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default pause before each page fetch.
pub const DEFAULT_INTER_PAGE_DELAY: Duration = Duration::from_millis(100);

/// Default number of items yielded between explicit scheduler yields.
pub const DEFAULT_YIELD_EVERY: usize = 1000;

/// Pagination settings.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Items requested per page.
    pub page_size: u32,
    /// Pause before every page fetch, including the first.
    pub inter_page_delay: Duration,
    /// Yield to the scheduler after this many items (0 disables).
    pub yield_every: usize,
    /// Cursor of the first page to fetch (resume point).
    pub initial_cursor: Option<String>,
    /// Ceiling on pages fetched by one stream.
    pub max_pages: Option<u64>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            inter_page_delay: DEFAULT_INTER_PAGE_DELAY,
            yield_every: DEFAULT_YIELD_EVERY,
            initial_cursor: None,
            max_pages: None,
        }
    }
}

#[derive(Debug, Default)]
struct CheckpointInner {
    cursor: Mutex<Option<String>>,
    complete: AtomicBool,
    pages: AtomicU64,
    items: AtomicU64,
}

/// Progress of a [`PageStream`], shareable while the stream runs.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    inner: Arc<CheckpointInner>,
}

impl Checkpoint {
    fn starting_at(cursor: Option<String>) -> Self {
        let checkpoint = Self::default();
        *checkpoint.lock_cursor() = cursor;
        checkpoint
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, cursor: Option<String>, complete: bool) {
        *self.lock_cursor() = cursor;
        self.inner.complete.store(complete, Ordering::SeqCst);
    }

    /// Cursor to resume from: the one after the last fully yielded page.
    ///
    /// `None` before the first page completes (when no initial cursor was
    /// given) and after the final page.
    #[must_use]
    pub fn cursor(&self) -> Option<String> {
        self.lock_cursor().clone()
    }

    /// Whether every page has been fetched and yielded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.complete.load(Ordering::SeqCst)
    }

    /// Pages fetched so far.
    #[must_use]
    pub fn pages_fetched(&self) -> u64 {
        self.inner.pages.load(Ordering::SeqCst)
    }

    /// Items yielded so far.
    #[must_use]
    pub fn items_yielded(&self) -> u64 {
        self.inner.items.load(Ordering::SeqCst)
    }
}

/// Lazy sequence of items across all pages.
///
/// Yields `Ok(item)` in page order. A page failure that survives the
/// executor, a stalled cursor or the page ceiling is yielded once as `Err`
/// and ends the stream.
pub struct PageStream<T> {
    inner: BoxStream<'static, Result<T, ErrorRecord>>,
    checkpoint: Checkpoint,
}

impl<T> fmt::Debug for PageStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStream")
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

impl<T> PageStream<T> {
    /// Returns a handle observing this stream's progress.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint.clone()
    }
}

impl<T> Stream for PageStream<T> {
    type Item = Result<T, ErrorRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Builds [`PageStream`]s over a shared executor.
#[derive(Clone)]
pub struct PaginatedFetcher {
    executor: Arc<RequestExecutor>,
    config: PaginationConfig,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for PaginatedFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedFetcher")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PaginatedFetcher {
    /// Creates a fetcher. Streams observe the executor's shutdown signal.
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, config: PaginationConfig) -> Self {
        Self {
            executor,
            config,
            events: Arc::new(NoopSink),
        }
    }

    /// Sends `fetch.page` events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Returns the pagination settings.
    #[must_use]
    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Streams every item reachable from the initial cursor.
    ///
    /// `fetch` is called once per page attempt with the page's cursor.
    pub fn stream<T, F, Fut>(&self, fetch: F) -> PageStream<T>
    where
        T: Send + 'static,
        F: FnMut(PageRequest) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Page<T>, ApiError>> + Send + 'static,
    {
        let checkpoint = Checkpoint::starting_at(self.config.initial_cursor.clone());
        info!(
            page_size = self.config.page_size,
            cursor = ?self.config.initial_cursor,
            "starting paginated stream"
        );

        let state = Paginator {
            fetch,
            executor: Arc::clone(&self.executor),
            shutdown: self.executor.shutdown().clone(),
            events: Arc::clone(&self.events),
            cursor: self.config.initial_cursor.clone(),
            config: self.config.clone(),
            buffer: Vec::new().into_iter(),
            uncommitted: false,
            finished: false,
            pending_error: None,
            checkpoint: checkpoint.clone(),
            pages: 0,
            yielded: 0,
        };

        let inner = stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        });

        PageStream {
            inner: Box::pin(inner),
            checkpoint,
        }
    }

    /// Streams every item of a [`PageSource`].
    pub fn stream_source<T, S>(&self, source: Arc<S>) -> PageStream<T>
    where
        T: Send + 'static,
        S: PageSource<T> + ?Sized + 'static,
    {
        self.stream(move |request| {
            let source = Arc::clone(&source);
            async move { source.fetch_page(request).await }
        })
    }
}

struct Paginator<T, F> {
    fetch: F,
    executor: Arc<RequestExecutor>,
    shutdown: Shutdown,
    events: Arc<dyn EventSink>,
    config: PaginationConfig,
    cursor: Option<String>,
    buffer: std::vec::IntoIter<T>,
    /// A fetched page whose items have not all been yielded yet.
    uncommitted: bool,
    /// No further page will be fetched.
    finished: bool,
    pending_error: Option<ErrorRecord>,
    checkpoint: Checkpoint,
    pages: u64,
    yielded: u64,
}

impl<T, F, Fut> Paginator<T, F>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    async fn next_item(&mut self) -> Option<Result<T, ErrorRecord>> {
        loop {
            if let Some(item) = self.buffer.next() {
                self.yielded += 1;
                self.checkpoint.inner.items.fetch_add(1, Ordering::SeqCst);
                if self.config.yield_every > 0
                    && self.yielded % self.config.yield_every as u64 == 0
                {
                    debug!(yielded = self.yielded, "yielding to scheduler");
                    tokio::task::yield_now().await;
                }
                return Some(Ok(item));
            }

            if std::mem::take(&mut self.uncommitted) {
                self.checkpoint.commit(self.cursor.clone(), self.finished);
            }

            if let Some(error) = self.pending_error.take() {
                self.finished = true;
                return Some(Err(error));
            }

            if self.finished {
                return None;
            }

            if let Err(error) = self.fetch_next_page().await {
                self.finished = true;
                return Some(Err(error));
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(page = self.pages + 1, cursor = ?self.cursor))]
    async fn fetch_next_page(&mut self) -> Result<(), ErrorRecord> {
        if let Some(max_pages) = self.config.max_pages {
            if self.pages >= max_pages {
                return Err(ErrorRecord::new(
                    ErrorKind::Validation,
                    format!("page limit ({max_pages}) reached before the collection ended"),
                )
                .with_context("pages", self.pages)
                .with_context("cursor", self.cursor.as_deref().unwrap_or("")));
            }
        }

        pause(self.shutdown.clone(), self.config.inter_page_delay).await?;

        let request = PageRequest {
            cursor: self.cursor.clone(),
            page_size: self.config.page_size,
        };
        let fetch = &mut self.fetch;
        let page = self
            .executor
            .execute("fetch_page", || fetch(request.clone()))
            .await
            .map_err(|error| {
                error.with_context("cursor", request.cursor.as_deref().unwrap_or(""))
            })?;

        self.pages += 1;
        self.checkpoint.inner.pages.store(self.pages, Ordering::SeqCst);

        let Page {
            items,
            has_more,
            next_cursor,
        } = page;
        let total_items = self.yielded + items.len() as u64;
        debug!(
            items = items.len(),
            has_more,
            next_cursor = ?next_cursor,
            "page fetched"
        );
        self.events.send(Event::fetch_page(
            self.pages,
            items.len(),
            total_items,
            has_more,
            next_cursor.as_deref(),
        ));

        match next_cursor {
            Some(next) if has_more => {
                if self.cursor.as_deref() == Some(next.as_str()) {
                    self.pending_error = Some(
                        ErrorRecord::new(
                            ErrorKind::Validation,
                            "next cursor did not advance; stopping to avoid an endless loop",
                        )
                        .with_context("cursor", &next)
                        .with_context("pages", self.pages),
                    );
                }
                self.cursor = Some(next);
            }
            _ => {
                self.cursor = None;
                self.finished = true;
                info!(pages = self.pages, items = total_items, "pagination complete");
            }
        }

        self.buffer = items.into_iter();
        self.uncommitted = true;
        Ok(())
    }
}

/// Waits out the inter-page delay unless shutdown arrives first.
///
/// Takes owned state so the paginator is not borrowed across the sleep.
async fn pause(shutdown: Shutdown, delay: Duration) -> Result<(), ErrorRecord> {
    if shutdown.is_triggered() {
        return Err(ErrorRecord::cancelled("fetch_page"));
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(ErrorRecord::cancelled("fetch_page")),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
