use crate::models::RecordKind;
use thiserror::Error;

/// Failures that end a crawl run.
///
/// Rows that fail the numeric-first-cell gate and missing pagination
/// controls are not errors: the former are dropped, the latter end the loop.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("browser command failed: {0}")]
    Browser(String),

    #[error("invalid crawler configuration: {0}")]
    Config(String),

    #[error("a {0} crawl is already running")]
    RunInProgress(RecordKind),
}

impl CrawlError {
    pub fn navigation(url: &str, reason: impl ToString) -> Self {
        Self::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Durable-store failures. The persistence gateway always recovers from
/// these by falling back to the in-process cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("could not create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Query(#[from] duckdb::Error),

    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}
