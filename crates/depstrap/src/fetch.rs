//! Artifact fetching
//!
//! A single-attempt primitive: one HTTP GET streamed into a staging file,
//! with a minimal integrity check before the bytes can be promoted into the
//! cache. Retry policy lives with the caller (the bootstrap orchestrator),
//! never here, so retries compose without duplicated side effects.

use crate::coordinate::DownloadDescriptor;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while fetching an artifact
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout, or mid-body transfer failure
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The repository does not have the artifact
    #[error("artifact not found: {url}")]
    NotFound { url: String },

    /// Any other non-success HTTP status
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Received size disagrees with the declared content length
    #[error("truncated download from {url}: expected {expected} bytes, got {actual}")]
    Truncated {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// The downloaded file is empty or is not a jar/zip archive
    #[error("corrupt artifact from {url}: {reason}")]
    Corrupt { url: String, reason: String },

    /// URL was not http(s)
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed
    #[error("failed to construct HTTP client: {0}")]
    Client(String),

    /// IO error writing the staging file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to retrieve a remote artifact into a local file
///
/// The pipeline only ever talks to this trait, so hosts can substitute a
/// mirror-aware implementation and tests can substitute a stub.
pub trait ArtifactFetch: Send + Sync {
    /// Retrieve `descriptor` into `destination`, replacing any existing file
    fn fetch(&self, descriptor: &DownloadDescriptor, destination: &Path) -> Result<(), FetchError>;
}

/// Blocking HTTP fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("depstrap/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl ArtifactFetch for HttpFetcher {
    fn fetch(&self, descriptor: &DownloadDescriptor, destination: &Path) -> Result<(), FetchError> {
        let url = &descriptor.url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(url.clone()));
        }

        debug!(url = %url, "fetching artifact");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { url: url.clone() });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.clone(),
            });
        }

        let expected = response.content_length();
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(destination)?;
        let actual = response
            .copy_to(&mut file)
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        file.sync_all()?;

        if let Some(expected) = expected {
            if expected != actual {
                return Err(FetchError::Truncated {
                    url: url.clone(),
                    expected,
                    actual,
                });
            }
        }

        verify_archive_header(destination, url)?;
        debug!(url = %url, bytes = actual, "fetched artifact");
        Ok(())
    }
}

/// Minimal integrity signal: the file must be non-empty and start with a
/// zip local-file or end-of-central-directory signature
pub fn verify_archive_header(path: &Path, url: &str) -> Result<(), FetchError> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) if header.starts_with(b"PK") => Ok(()),
        Ok(()) => Err(FetchError::Corrupt {
            url: url.to_string(),
            reason: "missing zip header".to_string(),
        }),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FetchError::Corrupt {
            url: url.to_string(),
            reason: "file too short to be an archive".to_string(),
        }),
        Err(e) => Err(FetchError::Io(e)),
    }
}
