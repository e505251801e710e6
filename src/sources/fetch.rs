//! Transfers of remote artifacts.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use url::Url;

/// A failed transfer from one URL. Recoverable: the next mirror is tried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transfer from {url} failed: {message}")]
pub struct TransferError {
    pub url: String,
    pub message: String,
}

impl TransferError {
    pub fn new(url: &Url, message: impl Into<String>) -> Self {
        TransferError {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// Copies the content behind a URL to a local file.
pub trait Fetcher: Send + Sync {
    /// Write the content of `url` to `dest`, replacing it.
    fn fetch(&self, url: &Url, dest: &Path) -> Result<(), TransferError>;
}

/// Fetcher for `http(s)://` and `file://` URLs.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    offline: bool,
}

impl HttpFetcher {
    pub fn new(offline: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("berth/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to initialize HTTP client")?;
        Ok(HttpFetcher { client, offline })
    }

    fn fetch_file(&self, url: &Url, dest: &Path) -> Result<(), TransferError> {
        let src = url
            .to_file_path()
            .map_err(|_| TransferError::new(url, "not a local file path"))?;
        std::fs::copy(&src, dest)
            .map(|_| ())
            .map_err(|e| TransferError::new(url, e.to_string()))
    }

    fn fetch_http(&self, url: &Url, dest: &Path) -> Result<(), TransferError> {
        if self.offline {
            return Err(TransferError::new(url, "offline mode is enabled"));
        }

        tracing::info!("Downloading {}", url);
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| TransferError::new(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransferError::new(url, format!("HTTP {}", response.status())));
        }

        let mut file = File::create(dest).map_err(|e| TransferError::new(url, e.to_string()))?;
        response
            .copy_to(&mut file)
            .map_err(|e| TransferError::new(url, format!("failed to read response body: {}", e)))?;
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> Result<(), TransferError> {
        match url.scheme() {
            "file" => self.fetch_file(url, dest),
            "http" | "https" => self.fetch_http(url, dest),
            other => Err(TransferError::new(
                url,
                format!("unsupported URL scheme `{}`", other),
            )),
        }
    }
}
