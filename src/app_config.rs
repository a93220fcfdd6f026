//! Configuration file loading and merging with CLI values.
//!
//! The file is a flat list of `key = value` lines. Values given explicitly
//! on the command line win over the file, which wins over built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use streamfetch::http::{DEFAULT_CURSOR_PARAM, DEFAULT_PAGE_SIZE_PARAM};
use streamfetch::processor::DEFAULT_INPUT_CAPACITY;

use crate::cli::{Args, CliValueSources};

/// Config-file defaults for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Transform workers (1..=100).
    pub concurrency: Option<u8>,
    /// Items per page (1..=1000).
    pub page_size: Option<u32>,
    /// Retries for transient failures (0..=10).
    pub max_retries: Option<u8>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Pause before every page request in milliseconds.
    pub inter_page_delay_ms: Option<u64>,
    /// Items between scheduler yields.
    pub yield_every: Option<usize>,
    /// Capacity of the processor input queue.
    pub input_capacity: Option<usize>,
    /// Give up after this many consecutive rate-limit hits for one request.
    pub max_rate_limit_retries: Option<u32>,
    /// Query parameter carrying the cursor.
    pub cursor_param: Option<String>,
    /// Query parameter carrying the page size.
    pub page_size_param: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("concurrency", self.concurrency.map(u64::from), 1, 100)?;
        validate_range("page_size", self.page_size.map(u64::from), 1, 1000)?;
        validate_range("max_retries", self.max_retries.map(u64::from), 0, 10)?;
        validate_range("timeout_secs", self.timeout_secs, 1, 3600)?;
        validate_range("inter_page_delay_ms", self.inter_page_delay_ms, 0, 60_000)?;
        validate_range(
            "input_capacity",
            self.input_capacity.map(|v| v as u64),
            1,
            1_000_000,
        )?;
        validate_param_name("cursor_param", self.cursor_param.as_deref())?;
        validate_param_name("page_size_param", self.page_size_param.as_deref())?;
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

fn validate_param_name(field: &str, value: Option<&str>) -> Result<()> {
    if let Some(value) = value
        && value.trim().is_empty()
    {
        bail!("Invalid config value for `{field}`: must not be empty");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/streamfetch/config.toml`
/// 2. `$HOME/.config/streamfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("streamfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("streamfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

/// Reads and validates the config file at `path`.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "concurrency" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.concurrency = Some(narrow(key, parsed)?);
            }
            "page_size" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.page_size = Some(narrow(key, parsed)?);
            }
            "max_retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.max_retries = Some(narrow(key, parsed)?);
            }
            "timeout_secs" => {
                cfg.timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "inter_page_delay_ms" => {
                cfg.inter_page_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "yield_every" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.yield_every = Some(narrow(key, parsed)?);
            }
            "input_capacity" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.input_capacity = Some(narrow(key, parsed)?);
            }
            "max_rate_limit_retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.max_rate_limit_retries = Some(narrow(key, parsed)?);
            }
            "cursor_param" => {
                cfg.cursor_param = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "page_size_param" => {
                cfg.page_size_param = Some(parse_string_literal(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn narrow<T: TryFrom<u64>>(key: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| anyhow::anyhow!("`{key}` value {value} is out of range"))
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    pub page_size: u32,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub inter_page_delay: Duration,
    pub yield_every: usize,
    pub input_capacity: usize,
    pub max_rate_limit_retries: Option<u32>,
    pub cursor_param: String,
    pub page_size_param: String,
}

/// Merges CLI values with the config file; explicit flags win.
pub fn resolve_settings(
    args: &Args,
    sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> RunSettings {
    let file = file_config.cloned().unwrap_or_default();
    let pick = |explicit: bool, cli: u64, from_file: Option<u64>| {
        if explicit {
            cli
        } else {
            from_file.unwrap_or(cli)
        }
    };

    let concurrency = pick(
        sources.concurrency,
        u64::from(args.concurrency),
        file.concurrency.map(u64::from),
    );
    let page_size = if sources.page_size {
        args.page_size
    } else {
        file.page_size.unwrap_or(args.page_size)
    };
    let max_retries = pick(
        sources.max_retries,
        u64::from(args.max_retries),
        file.max_retries.map(u64::from),
    );
    let timeout_secs = pick(sources.timeout_secs, args.timeout_secs, file.timeout_secs);
    let inter_page_delay_ms = pick(
        sources.inter_page_delay_ms,
        args.inter_page_delay_ms,
        file.inter_page_delay_ms,
    );
    let yield_every = if sources.yield_every {
        args.yield_every
    } else {
        file.yield_every.unwrap_or(args.yield_every)
    };

    RunSettings {
        concurrency: usize::try_from(concurrency).unwrap_or(usize::MAX),
        page_size,
        max_attempts: u32::try_from(max_retries).unwrap_or(u32::MAX).saturating_add(1),
        timeout: Duration::from_secs(timeout_secs),
        inter_page_delay: Duration::from_millis(inter_page_delay_ms),
        yield_every,
        input_capacity: file.input_capacity.unwrap_or(DEFAULT_INPUT_CAPACITY),
        max_rate_limit_retries: file.max_rate_limit_retries,
        cursor_param: file
            .cursor_param
            .unwrap_or_else(|| DEFAULT_CURSOR_PARAM.to_string()),
        page_size_param: file
            .page_size_param
            .unwrap_or_else(|| DEFAULT_PAGE_SIZE_PARAM.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::{CommandFactory, FromArgMatches};

    use super::*;

    fn parse_cli(argv: &[&str]) -> (Args, CliValueSources) {
        let matches = Args::command().try_get_matches_from(argv).unwrap();
        let args = Args::from_arg_matches(&matches).unwrap();
        let sources = CliValueSources::from_matches(&matches);
        (args, sources)
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 8
cursor_param = "after"
"#,
        )
        .unwrap();
        assert_eq!(cfg.concurrency, Some(8));
        assert_eq!(cfg.cursor_param.as_deref(), Some("after"));
        assert!(cfg.page_size.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 4
page_size = 50
max_retries = 5
timeout_secs = 10
inter_page_delay_ms = 0
yield_every = 250
input_capacity = 64
max_rate_limit_retries = 20
cursor_param = "cursor"
page_size_param = "limit"
"#,
        )
        .unwrap();
        assert_eq!(
            cfg,
            FileConfig {
                concurrency: Some(4),
                page_size: Some(50),
                max_retries: Some(5),
                timeout_secs: Some(10),
                inter_page_delay_ms: Some(0),
                yield_every: Some(250),
                input_capacity: Some(64),
                max_rate_limit_retries: Some(20),
                cursor_param: Some("cursor".to_string()),
                page_size_param: Some("limit".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_u8() {
        let err = parse_config_str("max_retries = 300").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("page_size = 4 trailing").unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_parse_config_rejects_negative_values() {
        let err = parse_config_str("timeout_secs = -1").unwrap_err();
        assert!(format!("{err:#}").contains("non-negative"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("cursor_param = after").unwrap_err();
        assert!(err.to_string().contains("cursor_param"));
    }

    #[test]
    fn test_parse_config_rejects_empty_param_name() {
        let err = parse_config_str(r#"page_size_param = """#).unwrap_err();
        assert!(err.to_string().contains("page_size_param"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_key() {
        let err = parse_config_str("output_dir = \"/tmp\"").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("concurrency 4").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r##"
# defaults for the export job
concurrency = 4 # workers
cursor_param = "next#token" # hash inside quotes is kept
"##,
        )
        .unwrap();
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.cursor_param.as_deref(), Some("next#token"));
    }

    // ==================== File Loading Tests ====================

    #[test]
    fn test_load_file_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "page_size = 25\n").unwrap();

        let cfg = load_file_config(&path).unwrap();
        assert_eq!(cfg.page_size, Some(25));
    }

    #[test]
    fn test_load_file_config_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bogus = 1\n").unwrap();

        let err = load_file_config(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
        assert!(format!("{err:#}").contains("bogus"));
    }

    #[test]
    fn test_load_file_config_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    // ==================== Merge Tests ====================

    #[test]
    fn test_resolve_settings_defaults_without_file() {
        let (args, sources) = parse_cli(&["streamfetch", "https://x.test/items"]);
        let settings = resolve_settings(&args, &sources, None);
        assert_eq!(settings.concurrency, 5);
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.inter_page_delay, Duration::from_millis(100));
        assert_eq!(settings.input_capacity, DEFAULT_INPUT_CAPACITY);
        assert_eq!(settings.max_rate_limit_retries, None);
        assert_eq!(settings.cursor_param, "start_cursor");
        assert_eq!(settings.page_size_param, "page_size");
    }

    #[test]
    fn test_resolve_settings_file_overrides_defaults() {
        let (args, sources) = parse_cli(&["streamfetch", "https://x.test/items"]);
        let file = FileConfig {
            concurrency: Some(9),
            max_retries: Some(0),
            inter_page_delay_ms: Some(0),
            max_rate_limit_retries: Some(4),
            page_size_param: Some("limit".to_string()),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args, &sources, Some(&file));
        assert_eq!(settings.concurrency, 9);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.inter_page_delay, Duration::ZERO);
        assert_eq!(settings.max_rate_limit_retries, Some(4));
        assert_eq!(settings.page_size_param, "limit");
    }

    #[test]
    fn test_resolve_settings_cli_overrides_file() {
        let (args, sources) =
            parse_cli(&["streamfetch", "https://x.test/items", "-c", "5", "--page-size", "7"]);
        let file = FileConfig {
            concurrency: Some(9),
            page_size: Some(500),
            timeout_secs: Some(5),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args, &sources, Some(&file));
        assert_eq!(settings.concurrency, 5, "explicit flag wins even at default value");
        assert_eq!(settings.page_size, 7);
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }
}
