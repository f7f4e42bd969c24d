//! Error types for the socks-rotor crate.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error returned when the pool holds no proxy at all, even after resetting
/// every blacklisted proxy.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxiesAvailable;

/// Why a page was judged not worth fetching or returning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsufficientReason {
    /// The server declared a body larger than the configured cap.
    #[error("declared content length {declared} exceeds the {limit} byte cap")]
    TooLarge { declared: u64, limit: u64 },
    /// The response carried no usable text.
    #[error("response body is empty")]
    Empty,
}

/// Failure of a single logical fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed on the network/proxy layer, or the pool was empty.
    #[error("all proxy attempts failed for {url} ({attempts} attempt(s)): {reason}")]
    ProxyFailure {
        url: String,
        attempts: usize,
        reason: String,
    },
    /// The page was reachable but not usable.
    #[error("insufficient content at {url}: {reason}")]
    InsufficientContent {
        url: String,
        reason: InsufficientReason,
    },
    /// The URL could not be parsed; no proxy was used.
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl FetchError {
    /// Whether the failure belongs to the network/proxy infrastructure rather
    /// than to the content of the target.
    pub fn is_infrastructure_error(&self) -> bool {
        matches!(self, FetchError::ProxyFailure { .. })
    }
}

/// Failure of one request attempt through one proxy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors touching the durable proxy file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read proxy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write proxy file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a validation candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("cannot use proxy: {0}")]
    InvalidProxy(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("target served a challenge page")]
    Blocked,
    #[error("only {found} result(s), {required} required")]
    TooFewResults { found: usize, required: usize },
}
