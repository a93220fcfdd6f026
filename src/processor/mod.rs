//! Bounded-parallelism transformation of a lazy source.
//!
//! [`ConcurrentProcessor::process`] wires three kinds of tasks around two
//! [`BoundedQueue`]s:
//!
//! ```text
//! source ──producer──▶ input queue ──N workers (transform)──▶ output queue ──▶ ProcessedStream
//! ```
//!
//! Backpressure is end to end: a slow consumer fills the output queue,
//! which stalls the workers, which fills the input queue, which stalls the
//! producer and therefore the source.
//!
//! A failing item never stops the run. Failures are recorded and surface as
//! one [`AggregateProcessingError`] after every successful result has been
//! yielded. Output order is not input order when more than one worker runs.

mod stats;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

pub use stats::ProcessingStats;

use stats::RunTracker;

use crate::error::{AggregateProcessingError, ErrorKind, ErrorRecord};
use crate::events::{Event, EventSink, NoopSink};
use crate::queue::{BoundedQueue, QueueError};
use crate::shutdown::Shutdown;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of worker tasks.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default capacity of the input queue.
pub const DEFAULT_INPUT_CAPACITY: usize = 1000;

/// Error type for processor construction.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Queue construction failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of worker tasks (1-100).
    pub concurrency: usize,
    /// Capacity of the input queue.
    pub input_capacity: usize,
    /// Capacity of the output queue; `None` means twice the concurrency.
    pub output_capacity: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            input_capacity: DEFAULT_INPUT_CAPACITY,
            output_capacity: None,
        }
    }
}

impl ProcessorConfig {
    /// Default settings with `concurrency` workers.
    #[must_use]
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Effective output queue capacity.
    #[must_use]
    pub fn effective_output_capacity(&self) -> usize {
        self.output_capacity.unwrap_or(2 * self.concurrency)
    }
}

/// Runs transforms over a lazy source with a fixed number of workers.
pub struct ConcurrentProcessor {
    config: ProcessorConfig,
    events: Arc<dyn EventSink>,
    shutdown: Shutdown,
}

impl fmt::Debug for ConcurrentProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentProcessor")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl ConcurrentProcessor {
    /// Creates a processor after validating `config`.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::InvalidConcurrency`] outside 1-100
    /// - [`ProcessorError::Queue`] when a queue capacity is 0
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(ProcessorError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        if config.input_capacity == 0 || config.effective_output_capacity() == 0 {
            return Err(QueueError::ZeroCapacity.into());
        }

        debug!(
            concurrency = config.concurrency,
            input_capacity = config.input_capacity,
            output_capacity = config.effective_output_capacity(),
            "processor created"
        );

        Ok(Self {
            config,
            events: Arc::new(NoopSink),
            shutdown: Shutdown::new(),
        })
    }

    /// Sends `processor.*` events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Stops runs when `shutdown` is triggered.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns the processor settings.
    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Starts a run over `source`, applying `transform` to every item.
    ///
    /// Must be called inside a tokio runtime; the producer and worker tasks
    /// are spawned immediately and run until the source is exhausted, the
    /// returned stream is dropped, or shutdown is triggered.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Queue`] if a queue cannot be allocated.
    #[instrument(level = "debug", skip_all, fields(concurrency = self.config.concurrency))]
    pub fn process<T, R, E, S, F, Fut>(
        &self,
        source: S,
        transform: F,
    ) -> Result<ProcessedStream<R>, ProcessorError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Into<ErrorRecord> + Send + 'static,
        S: Stream<Item = Result<T, ErrorRecord>> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let concurrency = self.config.concurrency;
        let input = Arc::new(BoundedQueue::new(self.config.input_capacity)?);
        let output = Arc::new(BoundedQueue::new(self.config.effective_output_capacity())?);
        let tracker = Arc::new(RunTracker::new(concurrency));
        let transform = Arc::new(transform);

        info!(
            concurrency,
            input_capacity = input.capacity(),
            output_capacity = output.capacity(),
            "starting processor run"
        );

        tokio::spawn(produce(
            source,
            Arc::clone(&input),
            Arc::clone(&tracker),
            self.shutdown.clone(),
        ));

        for worker_id in 0..concurrency {
            let guard = WorkerGuard {
                tracker: Arc::clone(&tracker),
                output: Arc::clone(&output),
                events: Arc::clone(&self.events),
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(work(
                worker_id,
                guard,
                Arc::clone(&input),
                Arc::clone(&transform),
                Arc::clone(&self.events),
            ));
        }

        tokio::spawn(watch_shutdown(
            self.shutdown.clone(),
            Arc::clone(&input),
            Arc::clone(&output),
            Arc::clone(&tracker),
        ));

        Ok(ProcessedStream::new(input, output, tracker))
    }
}

async fn produce<T, S>(
    source: S,
    input: Arc<BoundedQueue<(usize, T)>>,
    tracker: Arc<RunTracker>,
    shutdown: Shutdown,
) where
    S: Stream<Item = Result<T, ErrorRecord>>,
{
    tokio::pin!(source);
    let mut index = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracker.record_cancelled();
                break;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(item)) => {
                if input.enqueue((index, item)).await.is_err() {
                    debug!(index, "input queue closed, producer stopping");
                    break;
                }
                index += 1;
            }
            Some(Err(record)) => {
                warn!(error = %record, kind = %record.kind(), "source failed");
                if record.kind() == ErrorKind::Cancelled {
                    tracker.record_cancelled();
                } else {
                    tracker.record_error(record);
                }
                break;
            }
            None => break,
        }
    }

    debug!(items = index, "producer finished");
    input.close();
}

async fn work<T, R, E, F, Fut>(
    worker_id: usize,
    guard: WorkerGuard<R>,
    input: Arc<BoundedQueue<(usize, T)>>,
    transform: Arc<F>,
    events: Arc<dyn EventSink>,
) where
    E: Into<ErrorRecord>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    debug!(worker_id, "worker started");

    while let Some((index, item)) = input.dequeue().await {
        if guard.shutdown.is_triggered() {
            break;
        }

        let call = {
            let transform = Arc::clone(&transform);
            AssertUnwindSafe(async move { transform(item).await }).catch_unwind()
        };
        let outcome = tokio::select! {
            biased;
            () = guard.shutdown.cancelled() => break,
            outcome = call => outcome,
        };

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                fail_item(&guard.tracker, events.as_ref(), index, error.into());
                continue;
            }
            Err(panic) => {
                let record = ErrorRecord::new(
                    ErrorKind::Unknown,
                    format!("transform panicked: {}", panic_message(panic.as_ref())),
                );
                fail_item(&guard.tracker, events.as_ref(), index, record);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            () = guard.shutdown.cancelled() => break,
            sent = guard.output.enqueue(value) => sent,
        };
        if sent.is_err() {
            debug!(worker_id, "output queue closed, worker stopping");
            break;
        }
        guard.tracker.increment_processed();
    }

    debug!(worker_id, "worker finished");
}

fn fail_item(tracker: &RunTracker, events: &dyn EventSink, index: usize, record: ErrorRecord) {
    let record = record.with_context("item_index", index);
    warn!(item_index = index, kind = %record.kind(), error = %record, "item failed");
    events.send(Event::item_failed(index, &record));
    tracker.record_error(record);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Closes the input on shutdown. The output is left to the last worker, so
/// the stream only ends once every worker has recorded its outcome.
async fn watch_shutdown<T, R>(
    shutdown: Shutdown,
    input: Arc<BoundedQueue<T>>,
    output: Arc<BoundedQueue<R>>,
    tracker: Arc<RunTracker>,
) {
    tokio::select! {
        () = shutdown.cancelled() => {
            tracker.record_cancelled();
            input.close();
            info!("processor run cancelled");
        }
        () = output.closed() => {}
    }
}

/// Keeps worker accounting right however a worker exits, panics included.
struct WorkerGuard<R> {
    tracker: Arc<RunTracker>,
    output: Arc<BoundedQueue<R>>,
    events: Arc<dyn EventSink>,
    shutdown: Shutdown,
}

impl<R> Drop for WorkerGuard<R> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.tracker
                .record_error(ErrorRecord::new(ErrorKind::Unknown, "worker panicked"));
        }
        if self.tracker.worker_finished() {
            if self.shutdown.is_triggered() {
                self.tracker.record_cancelled();
            }
            let processed = self.tracker.processed();
            let errors = self.tracker.error_count();
            info!(processed, errors, "processor run complete");
            self.events.send(Event::processor_completed(processed, errors));
            self.output.close();
        }
    }
}

/// Type-erased view of the input queue held by the output stream.
trait InputQueue: Send + Sync {
    fn size(&self) -> usize;
    fn close(&self);
}

impl<T: Send> InputQueue for BoundedQueue<T> {
    fn size(&self) -> usize {
        BoundedQueue::size(self)
    }

    fn close(&self) {
        BoundedQueue::close(self);
    }
}

/// Lazy sequence of transformed results.
///
/// Yields every success as `Ok`, then, only if anything failed, exactly one
/// `Err` carrying every recorded failure, then ends. Dropping the stream
/// early closes both queues so the run winds down.
pub struct ProcessedStream<R> {
    inner: BoxStream<'static, Result<R, AggregateProcessingError>>,
    input: Arc<dyn InputQueue>,
    output: Arc<BoundedQueue<R>>,
    tracker: Arc<RunTracker>,
}

impl<R> fmt::Debug for ProcessedStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedStream")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> ProcessedStream<R> {
    fn new<T: Send + 'static>(
        input: Arc<BoundedQueue<(usize, T)>>,
        output: Arc<BoundedQueue<R>>,
        tracker: Arc<RunTracker>,
    ) -> Self {
        let inner = stream::unfold(
            (Arc::clone(&output), Arc::clone(&tracker), false),
            |(output, tracker, done)| async move {
                if done {
                    return None;
                }
                if let Some(value) = output.dequeue().await {
                    return Some((Ok(value), (output, tracker, false)));
                }
                let errors = tracker.take_errors();
                if errors.is_empty() {
                    None
                } else {
                    Some((
                        Err(AggregateProcessingError::new(errors)),
                        (output, tracker, true),
                    ))
                }
            },
        );

        Self {
            inner: Box::pin(inner),
            input,
            output,
            tracker,
        }
    }
}

impl<R> ProcessedStream<R> {
    /// Returns a snapshot of the run's counters.
    #[must_use]
    pub fn stats(&self) -> ProcessingStats {
        ProcessingStats {
            queue_size: self.input.size(),
            output_size: self.output.size(),
            active_workers: self.tracker.active_workers(),
            error_count: self.tracker.error_count(),
            processed: self.tracker.processed(),
        }
    }
}

impl<R> Stream for ProcessedStream<R> {
    type Item = Result<R, AggregateProcessingError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<R> Drop for ProcessedStream<R> {
    fn drop(&mut self) {
        self.input.close();
        self.output.close();
    }
}
