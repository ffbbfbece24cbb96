//! Defines the configuration settings for the advisor crawler.

use crate::error::{AppError, Result};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Rows fetched (and `resultsPerPage` requested) when running in test mode.
pub(crate) const TEST_MODE_ROW_LIMIT: usize = 5;

/// Command line arguments for the advisor crawler
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Crawls the public advisor register and exports contact details", long_about = None)]
pub(crate) struct AppArgs {
    /// Run in test mode (only crawl 5 entries)
    #[arg(long, env = "ADVISOR_CRAWLER_TEST")]
    pub test: bool,

    /// Show detailed logs
    #[arg(long, env = "ADVISOR_CRAWLER_DEBUG")]
    pub debug: bool,

    /// Path to configuration file (TOML format)
    #[arg(long, env = "ADVISOR_CRAWLER_CONFIG")]
    pub config_file: Option<String>,

    /// Listing page URL without query parameters
    #[arg(long, env = "ADVISOR_CRAWLER_BASE_URL")]
    pub base_url: Option<String>,

    /// Listing page number
    #[arg(long, env = "ADVISOR_CRAWLER_PAGE")]
    pub page: Option<u32>,

    /// Number of results requested on the listing page (ignored in test mode)
    #[arg(long, env = "ADVISOR_CRAWLER_RESULTS_PER_PAGE")]
    pub results_per_page: Option<u32>,

    /// Maximum number of concurrent detail requests
    #[arg(short, long, env = "ADVISOR_CRAWLER_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Maximum number of attempts per request
    #[arg(long, env = "ADVISOR_CRAWLER_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Minimum delay between request dispatches (seconds)
    #[arg(long, env = "ADVISOR_CRAWLER_DELAY")]
    pub delay: Option<f32>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "ADVISOR_CRAWLER_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// User agent string for HTTP requests
    #[arg(long, env = "ADVISOR_CRAWLER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Directory for exported result files
    #[arg(short, long, env = "ADVISOR_CRAWLER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for error logs
    #[arg(long, env = "ADVISOR_CRAWLER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum, env = "ADVISOR_CRAWLER_FORMAT")]
    pub format: Option<OutputFormat>,
}

/// File format of the exported record table.
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub(crate) fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    listing: Option<ListingConfig>,
    network: Option<NetworkConfig>,
    retry: Option<RetryConfig>,
    output: Option<OutputConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct ListingConfig {
    base_url: Option<String>,
    results_per_page: Option<u32>,
    page: Option<u32>,
    site_domain: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct NetworkConfig {
    request_timeout: Option<u64>,
    request_delay: Option<f32>,
    max_concurrency: Option<usize>,
    user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RetryConfig {
    max_attempts: Option<u32>,
    multiplier: Option<f32>,
    min_wait: Option<f32>,
    max_wait: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct OutputConfig {
    output_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    format: Option<OutputFormat>,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Caps the crawl at five rows and asks the listing for five results.
    pub test_mode: bool,
    /// Verbose logging; has no effect on extraction.
    pub debug_mode: bool,
    /// Listing page URL without query parameters.
    pub base_url: String,
    /// `resultsPerPage` outside test mode; large enough to mean "all".
    pub results_per_page: u32,
    /// Listing page number. Only this one page is fetched.
    pub page: u32,
    /// The register's own domain, excluded when looking for advisor websites.
    pub site_domain: String,
    /// Maximum number of detail requests in flight.
    pub max_concurrency: usize,
    /// Minimum spacing between request dispatches.
    pub request_delay: Duration,
    /// Timeout for individual HTTP requests.
    pub request_timeout: Duration,
    /// User agent string to use for HTTP requests.
    pub user_agent: String,
    /// Attempts per request before the request counts as failed.
    pub max_attempts: u32,
    /// Backoff multiplier, in seconds.
    pub backoff_multiplier: f32,
    /// Shortest wait between attempts.
    pub backoff_min: Duration,
    /// Longest wait between attempts.
    pub backoff_max: Duration,
    /// Directory for exported result files.
    pub output_dir: PathBuf,
    /// Directory for error logs.
    pub log_dir: PathBuf,
    pub output_format: OutputFormat,
    /// Draw a terminal progress bar during the detail phase.
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            test_mode: false,
            debug_mode: false,
            base_url: "https://elan1.bafa.bund.de/bafa-portal/audit-suche/showErgebnis".to_string(),
            results_per_page: 9999,
            page: 0,
            site_domain: "bafa.bund.de".to_string(),
            max_concurrency: 32,
            request_delay: Duration::from_millis(250),
            request_timeout: Duration::from_secs(15),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            max_attempts: 3,
            backoff_multiplier: 1.0,
            backoff_min: Duration::from_secs(4),
            backoff_max: Duration::from_secs(10),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            output_format: OutputFormat::Csv,
            show_progress: true,
        }
    }
}

impl Config {
    /// The listing URL with `resultsPerPage` and `page` parameters.
    pub(crate) fn listing_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let results_per_page = if self.test_mode {
            TEST_MODE_ROW_LIMIT as u32
        } else {
            self.results_per_page
        };
        url.query_pairs_mut()
            .append_pair("resultsPerPage", &results_per_page.to_string())
            .append_pair("page", &self.page.to_string());
        Ok(url)
    }

    /// Row cap applied after parsing the listing page.
    pub(crate) fn row_limit(&self) -> Option<usize> {
        self.test_mode.then_some(TEST_MODE_ROW_LIMIT)
    }

    pub(crate) fn mode_label(&self) -> &'static str {
        if self.test_mode { "test" } else { "full" }
    }
}

/// Converts a seconds value from the command line or config file.
///
/// Negative values clamp to zero; infinite or overflowing ones are rejected.
fn secs(name: &str, value: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(value.max(0.0))
        .map_err(|e| AppError::Config(format!("Invalid {} of {} seconds: {}", name, value, e)))
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!(target: "config_task", "Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!(target: "config_task", "Loaded configuration from {}", file_path);
    Ok(config)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) -> Result<()> {
    if let Some(listing) = &file_config.listing {
        if let Some(base_url) = &listing.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(results) = listing.results_per_page {
            config.results_per_page = results;
        }
        if let Some(page) = listing.page {
            config.page = page;
        }
        if let Some(domain) = &listing.site_domain {
            config.site_domain = domain.clone();
        }
    }

    if let Some(network) = &file_config.network {
        if let Some(timeout) = network.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(delay) = network.request_delay {
            config.request_delay = secs("request delay", delay)?;
        }
        if let Some(concurrency) = network.max_concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(user_agent) = &network.user_agent {
            config.user_agent = user_agent.clone();
        }
    }

    if let Some(retry) = &file_config.retry {
        if let Some(attempts) = retry.max_attempts {
            config.max_attempts = attempts;
        }
        if let Some(multiplier) = retry.multiplier {
            config.backoff_multiplier = multiplier;
        }
        if let Some(min_wait) = retry.min_wait {
            config.backoff_min = secs("minimum backoff", min_wait)?;
        }
        if let Some(max_wait) = retry.max_wait {
            config.backoff_max = secs("maximum backoff", max_wait)?;
        }
    }

    if let Some(output) = &file_config.output {
        if let Some(dir) = &output.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &output.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(format) = output.format {
            config.output_format = format;
        }
    }

    Ok(())
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &AppArgs) -> Result<()> {
    config.test_mode = args.test;
    config.debug_mode = args.debug;

    if let Some(ref base_url) = args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(page) = args.page {
        config.page = page;
    }
    if let Some(results) = args.results_per_page {
        config.results_per_page = results;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(attempts) = args.max_attempts {
        config.max_attempts = attempts;
    }
    if let Some(delay) = args.delay {
        config.request_delay = secs("request delay", delay)?;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(ref agent) = args.user_agent {
        config.user_agent = agent.clone();
    }
    if let Some(ref dir) = args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ref dir) = args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }

    Ok(())
}

fn validate_config(config: &mut Config) -> Result<()> {
    Url::parse(&config.base_url).map_err(|e| {
        AppError::Config(format!("Invalid listing base URL '{}': {}", config.base_url, e))
    })?;

    if config.max_concurrency == 0 {
        config.max_concurrency = 1;
        tracing::warn!(target: "config_task", "Concurrency was set to 0. Setting to 1.");
    }

    if config.max_attempts == 0 {
        config.max_attempts = 1;
        tracing::warn!(target: "config_task", "Max attempts was set to 0. Setting to 1.");
    }

    if config.results_per_page == 0 {
        config.results_per_page = 1;
        tracing::warn!(target: "config_task", "Results per page was set to 0. Setting to 1.");
    }

    if config.backoff_min > config.backoff_max {
        config.backoff_max = config.backoff_min;
        tracing::warn!(target: "config_task",
            "Min backoff was greater than max backoff. Setting both to {:?}",
            config.backoff_min
        );
    }

    Ok(())
}

/// Builds the final configuration: defaults, then the config file, then CLI/env.
pub(crate) fn build_config(args: &AppArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, &file_config)?;
    } else {
        for path in ["./advisor-crawler.toml", "./config.toml"] {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config)?;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(target: "config_task", "Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args)?;

    validate_config(&mut config)?;

    tracing::debug!(target: "config_task", "Final configuration: {:?}", config);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url_full_mode() {
        let config = Config::default();
        assert_eq!(
            config.listing_url().unwrap().as_str(),
            "https://elan1.bafa.bund.de/bafa-portal/audit-suche/showErgebnis?resultsPerPage=9999&page=0"
        );
        assert_eq!(config.row_limit(), None);
        assert_eq!(config.mode_label(), "full");
    }

    #[test]
    fn test_listing_url_test_mode() {
        let config = Config {
            test_mode: true,
            results_per_page: 200,
            page: 3,
            ..Config::default()
        };
        let url = config.listing_url().unwrap();
        assert_eq!(url.query(), Some("resultsPerPage=5&page=3"));
        assert_eq!(config.row_limit(), Some(TEST_MODE_ROW_LIMIT));
        assert_eq!(config.mode_label(), "test");
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let file: ConfigFile = toml::from_str(
            r#"
            [listing]
            base_url = "https://register.example.org/list"
            site_domain = "register.example.org"

            [network]
            max_concurrency = 4
            request_delay = 1.5

            [retry]
            max_attempts = 5
            min_wait = 0.5
            max_wait = 2.0

            [output]
            format = "json"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        apply_file_config(&mut config, &file).unwrap();
        assert_eq!(config.base_url, "https://register.example.org/list");
        assert_eq!(config.site_domain, "register.example.org");
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.request_delay, Duration::from_millis(1500));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_min, Duration::from_millis(500));
        assert_eq!(config.output_format, OutputFormat::Json);

        let args = AppArgs {
            test: true,
            concurrency: Some(8),
            format: Some(OutputFormat::Csv),
            ..AppArgs::default()
        };
        apply_cli_args(&mut config, &args).unwrap();
        assert!(config.test_mode);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.output_format, OutputFormat::Csv);
    }

    #[test]
    fn test_validate_repairs_values() {
        let mut config = Config {
            max_concurrency: 0,
            max_attempts: 0,
            results_per_page: 0,
            backoff_min: Duration::from_secs(12),
            ..Config::default()
        };
        validate_config(&mut config).unwrap();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.results_per_page, 1);
        assert_eq!(config.backoff_max, Duration::from_secs(12));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = Config {
            base_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(validate_config(&mut config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_negative_delay_clamps_to_zero() {
        let args = AppArgs {
            delay: Some(-2.0),
            ..AppArgs::default()
        };
        let mut config = Config::default();
        apply_cli_args(&mut config, &args).unwrap();
        assert_eq!(config.request_delay, Duration::ZERO);
    }

    #[test]
    fn test_unrepresentable_durations_are_config_errors() {
        let args = AppArgs {
            delay: Some(f32::INFINITY),
            ..AppArgs::default()
        };
        let mut config = Config::default();
        assert!(matches!(apply_cli_args(&mut config, &args), Err(AppError::Config(_))));
        assert!(build_config(&args).is_err());

        let file: ConfigFile = toml::from_str(
            r#"
            [retry]
            min_wait = 1e30
            "#,
        )
        .unwrap();
        assert!(matches!(
            apply_file_config(&mut Config::default(), &file),
            Err(AppError::Config(_))
        ));

        let file: ConfigFile = toml::from_str(
            r#"
            [network]
            request_delay = inf
            "#,
        )
        .unwrap();
        assert!(matches!(
            apply_file_config(&mut Config::default(), &file),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file_uses_defaults() {
        let args = AppArgs {
            config_file: Some("/nonexistent/advisor-crawler.toml".to_string()),
            ..AppArgs::default()
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.max_concurrency, 32);
        assert_eq!(config.max_attempts, 3);
    }
}
