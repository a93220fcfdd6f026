//! CLI entry point for the streamfetch tool.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::Value;
use streamfetch::{
    AggregateProcessingError, ConcurrentProcessor, ErrorKind, ErrorRecord, EventSink,
    ExecutorConfig, HttpPageSource, HttpSourceConfig, PaginatedFetcher, PaginationConfig,
    ProcessorConfig, RateLimitPolicy, RequestExecutor, ResumeLedger, ResumePoint, RetryPolicy,
    Shutdown, Tracked, TrackedSource, TracingSink,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::RunSettings;
use cli::Args;
use progress::RunCounters;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, sources) = cli::parse_with_sources();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the NDJSON output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(url = %args.url, field = ?args.field, "CLI arguments parsed");

    let loaded = app_config::load_default_file_config()?;
    if let (Some(path), Some(_)) = (&loaded.path, &loaded.config) {
        debug!(path = %path.display(), "loaded config file");
    }
    let settings = app_config::resolve_settings(&args, &sources, loaded.config.as_ref());
    debug!(?settings, "resolved run settings");

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping");
                shutdown.trigger();
            }
        });
    }

    run(&args, &settings, shutdown).await
}

async fn run(args: &Args, settings: &RunSettings, shutdown: Shutdown) -> Result<ExitCode> {
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);

    let executor = RequestExecutor::new(ExecutorConfig {
        timeout: settings.timeout,
        retry: RetryPolicy::with_max_attempts(settings.max_attempts),
        rate_limit: RateLimitPolicy {
            max_retries: settings.max_rate_limit_retries,
            ..RateLimitPolicy::default()
        },
    })
    .with_event_sink(Arc::clone(&sink))
    .with_shutdown(shutdown.clone());

    let source = HttpPageSource::new(
        &args.url,
        HttpSourceConfig {
            cursor_param: settings.cursor_param.clone(),
            page_size_param: settings.page_size_param.clone(),
            bearer_token: args.token.clone(),
            ..HttpSourceConfig::default()
        },
    )
    .with_context(|| format!("Cannot use '{}' as a collection endpoint", args.url))?;

    let fetcher = PaginatedFetcher::new(
        Arc::new(executor),
        PaginationConfig {
            page_size: settings.page_size,
            inter_page_delay: settings.inter_page_delay,
            yield_every: settings.yield_every,
            initial_cursor: args.cursor.clone(),
            max_pages: args.max_pages,
        },
    )
    .with_event_sink(Arc::clone(&sink));

    // The checkpoint runs ahead of the output; resume from what was written.
    let ledger = Arc::new(ResumeLedger::new(args.cursor.clone()));
    let tracked = TrackedSource::new(Arc::new(source), Arc::clone(&ledger));
    let pages = fetcher.stream_source::<Tracked<Value>, _>(Arc::new(tracked));
    let checkpoint = pages.checkpoint();

    let processor = ConcurrentProcessor::new(ProcessorConfig {
        concurrency: settings.concurrency,
        input_capacity: settings.input_capacity,
        output_capacity: None,
    })?
    .with_event_sink(sink)
    .with_shutdown(shutdown);

    let field = args.field.clone().map(Arc::new);
    let settled = Arc::clone(&ledger);
    let mut results = processor.process(pages, move |tracked: Tracked<Value>| {
        let field = field.clone();
        let ledger = Arc::clone(&settled);
        async move {
            let Tracked { page, item } = tracked;
            match extract_field(item, field.as_deref().map(String::as_str)) {
                Ok(item) => Ok(Tracked { page, item }),
                Err(record) => {
                    ledger.settle(page);
                    Err(record)
                }
            }
        }
    })?;

    info!(url = %args.url, concurrency = settings.concurrency, "streamfetch starting");

    let counters = Arc::new(RunCounters::default());
    let (spinner, stop) =
        progress::spawn_progress_ui(!args.quiet, checkpoint.clone(), Arc::clone(&counters));

    let mut out = BufWriter::new(io::stdout());
    let mut failures = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(Tracked { page, item }) => {
                serde_json::to_writer(&mut out, &item).context("Failed to encode item")?;
                out.write_all(b"\n").context("Failed to write output")?;
                ledger.settle(page);
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(aggregate) => failures = Some(aggregate),
        }
    }
    out.flush().context("Failed to flush output")?;

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = spinner {
        let _ = handle.await;
    }

    let written = counters.written.load(Ordering::Relaxed);
    let resume = ledger.resume_point();
    info!(
        written,
        pages = checkpoint.pages_fetched(),
        complete = checkpoint.is_complete(),
        resume = %resume,
        "streamfetch finished"
    );

    match failures {
        None => Ok(ExitCode::SUCCESS),
        Some(aggregate) => {
            report_failures(&aggregate, written, &resume);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resolves `pointer` inside `item`; no pointer passes the item through.
fn extract_field(item: Value, pointer: Option<&str>) -> Result<Value, ErrorRecord> {
    let Some(pointer) = pointer else {
        return Ok(item);
    };
    item.pointer(pointer).cloned().ok_or_else(|| {
        ErrorRecord::new(ErrorKind::Validation, format!("item has no field at '{pointer}'"))
            .with_context("field", pointer)
    })
}

fn report_failures(aggregate: &AggregateProcessingError, written: u64, resume: &ResumePoint) {
    eprintln!("{written} items written, {} failed", aggregate.len());
    for (kind, count) in aggregate.count_by_kind() {
        eprintln!("  {kind}: {count}");
    }
    for record in aggregate.errors().iter().take(5) {
        eprintln!("  - {record}");
    }
    match resume {
        ResumePoint::Cursor(cursor) => eprintln!("resume with --cursor {cursor}"),
        ResumePoint::Start => eprintln!("resume by running again without --cursor"),
        ResumePoint::Complete => {}
    }
}
