//! Progress UI (spinner) for export runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use streamfetch::Checkpoint;

/// Counters the spinner reads while a run is in flight.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub written: AtomicU64,
}

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub fn spawn_progress_ui(
    use_spinner: bool,
    checkpoint: Checkpoint,
    counters: Arc<RunCounters>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(checkpoint, counters, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    checkpoint: Checkpoint,
    counters: Arc<RunCounters>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            spinner.set_message(format!(
                "{} items written ({} pages fetched)",
                counters.written.load(Ordering::Relaxed),
                checkpoint.pages_fetched(),
            ));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}
