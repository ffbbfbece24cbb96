//! Defines the custom error types for the advisor crawler.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for the crawl pipeline.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error while writing the tabular export.
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Transport-level failure making an HTTP request (connect, timeout, body read).
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered, but not with a 2xx status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that was requested.
        url: String,
        /// The numeric status code returned.
        status: u16,
    },

    /// A page did not have the structure the extractor expects.
    #[error("Data Extraction Error: {0}")]
    Extraction(String),

    /// An extracted record is missing a required field and was dropped.
    #[error("Validation Error: {0}")]
    Validation(String),

    /// The listing page could not be fetched at all; nothing to crawl.
    #[error("Listing page {url} unavailable: {reason}")]
    ListingUnavailable {
        /// The listing URL that was requested.
        url: String,
        /// Description of the last failure.
        reason: String,
    },

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
