//! CLI argument definitions using clap derive macros.

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use streamfetch::executor::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use streamfetch::paginate::{DEFAULT_INTER_PAGE_DELAY, DEFAULT_PAGE_SIZE, DEFAULT_YIELD_EVERY};
use streamfetch::processor::DEFAULT_CONCURRENCY;

/// Stream every item of a cursor-paginated JSON API as NDJSON.
///
/// Pages are fetched lazily with retry, backoff and rate-limit recovery;
/// items are transformed concurrently and written to stdout one per line.
#[derive(Parser, Debug)]
#[command(name = "streamfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Collection endpoint (http or https)
    pub url: String,

    /// JSON pointer extracted from every item (e.g. /properties/title)
    #[arg(long)]
    pub field: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of concurrent transform workers (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Items requested per page (1-1000)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub page_size: u32,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = (DEFAULT_MAX_ATTEMPTS - 1) as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Per-request timeout in seconds (1-3600)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs(), value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: u64,

    /// Pause before each page request in milliseconds (0 to disable, max 60000)
    #[arg(long, default_value_t = DEFAULT_INTER_PAGE_DELAY.as_millis() as u64, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub inter_page_delay_ms: u64,

    /// Yield to the scheduler after this many items (0 to disable)
    #[arg(long, default_value_t = DEFAULT_YIELD_EVERY)]
    pub yield_every: usize,

    /// Resume from this cursor (as logged by an earlier run)
    #[arg(long)]
    pub cursor: Option<String>,

    /// Bearer token sent with every request
    #[arg(long)]
    pub token: Option<String>,

    /// Stop with an error after this many pages
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_pages: Option<u64>,
}

/// Flags given explicitly on the command line (as opposed to defaults).
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CliValueSources {
    pub concurrency: bool,
    pub page_size: bool,
    pub max_retries: bool,
    pub timeout_secs: bool,
    pub inter_page_delay_ms: bool,
    pub yield_every: bool,
}

impl CliValueSources {
    /// Reads value sources out of parsed `matches`.
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            concurrency: is_commandline_value(matches, "concurrency"),
            page_size: is_commandline_value(matches, "page_size"),
            max_retries: is_commandline_value(matches, "max_retries"),
            timeout_secs: is_commandline_value(matches, "timeout_secs"),
            inter_page_delay_ms: is_commandline_value(matches, "inter_page_delay_ms"),
            yield_every: is_commandline_value(matches, "yield_every"),
        }
    }
}

/// Parses process arguments and records which values came from the user.
pub fn parse_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    (args, CliValueSources::from_matches(&matches))
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}
