//! Test utilities and mocks for berth unit tests.
//!
//! This module provides in-memory stand-ins for the three seams the core
//! talks to the outside world through: imported suites ([`StaticSuites`]),
//! remote transfers ([`MockFetcher`]) and the per-node build collaborator
//! ([`RecordingBuilder`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use berth::test_support::{resolved, RecordingBuilder};
//!
//! #[test]
//! fn test_example() {
//!     let graph = resolved("name = \"demo\"\n[projects.P]\n");
//!     let builder = RecordingBuilder::new().fail("P");
//!     // Drive a build with `builder`...
//! }
//! ```

pub mod fixtures;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::builder::collaborator::{BuildFailure, BuildRequest, NodeBuilder};
use crate::core::import::SuiteImport;
use crate::core::manifest::parse_suite;
use crate::core::platform::Platform;
use crate::core::suite::Suite;
use crate::resolver::ResolvedGraph;
use crate::sources::fetch::{Fetcher, TransferError};
use crate::sources::import::{ImportError, SuiteProvider};

// Re-export fixtures for convenience
pub use fixtures::*;

/// Parse a TOML manifest as if it lived at `/work/<name>/suite.toml`.
pub fn suite(manifest: &str) -> Suite {
    let probe = parse_suite(manifest, Path::new("/work/suite.toml")).expect("fixture manifest");
    let path = PathBuf::from("/work").join(probe.name()).join("suite.toml");
    parse_suite(manifest, &path).expect("fixture manifest")
}

/// Resolve a single-suite manifest for `linux/amd64`.
pub fn resolved(manifest: &str) -> ResolvedGraph {
    crate::resolver::resolve(
        &suite(manifest),
        &StaticSuites::new(),
        &Platform::new("linux", "amd64"),
    )
    .expect("fixture graph")
}

/// Suite provider serving pre-loaded suites by name.
#[derive(Debug, Default)]
pub struct StaticSuites {
    suites: HashMap<String, Arc<Suite>>,
    requests: AtomicUsize,
}

impl StaticSuites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, suite: Suite) -> Self {
        self.suites.insert(suite.name().to_string(), Arc::new(suite));
        self
    }

    /// Number of `provide` calls so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl SuiteProvider for StaticSuites {
    fn provide(&self, import: &SuiteImport) -> Result<Arc<Suite>, ImportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.suites
            .get(&import.name)
            .cloned()
            .ok_or_else(|| ImportError::UnresolvedImport {
                suite: import.name.clone(),
                revision: import.revision.clone(),
                attempts: vec!["not provided by the test".to_string()],
            })
    }
}

/// Fetcher serving fixed content per URL and counting transfers.
#[derive(Debug, Default)]
pub struct MockFetcher {
    content: HashMap<String, Vec<u8>>,
    transfers: AtomicUsize,
    held: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` at `url`.
    pub fn serve(mut self, url: &str, data: &[u8]) -> Self {
        self.content.insert(url.to_string(), data.to_vec());
        self
    }

    /// Block every transfer until [`MockFetcher::release`] is called.
    pub fn held(self) -> Self {
        self.held.store(true, Ordering::SeqCst);
        self
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    /// Number of transfers attempted, successful or not.
    pub fn count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> Result<(), TransferError> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while self.held.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let data = self
            .content
            .get(url.as_str())
            .ok_or_else(|| TransferError::new(url, "404 Not Found"))?;
        std::fs::write(dest, data).map_err(|e| TransferError::new(url, e.to_string()))
    }
}

/// One recorded collaborator call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub label: String,
    pub output: PathBuf,
    pub dependencies: Vec<PathBuf>,
    pub generated_roots: Vec<PathBuf>,
}

/// Build collaborator that records its calls and fails on demand.
///
/// Successful builds return the requested output path as the artifact.
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    failing: HashSet<String>,
    fatal: HashSet<String>,
    cancelling: HashSet<String>,
    waiting: HashSet<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the node labelled `label`.
    pub fn fail(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    /// Fail the node labelled `label` and ask for the build to stop.
    pub fn fail_fatally(mut self, label: &str) -> Self {
        self.fatal.insert(label.to_string());
        self
    }

    /// Request cancellation while building `label`, as Ctrl-C would.
    pub fn cancel_on(mut self, label: &str) -> Self {
        self.cancelling.insert(label.to_string());
        self
    }

    /// Keep `label` running until cancellation is requested, then fail.
    pub fn wait_for_cancel(mut self, label: &str) -> Self {
        self.waiting.insert(label.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded().into_iter().map(|c| c.label).collect()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn call(&self, label: &str) -> Option<RecordedCall> {
        self.recorded().into_iter().find(|c| c.label == label)
    }

    pub fn dependencies_of(&self, label: &str) -> Vec<PathBuf> {
        self.call(label).map(|c| c.dependencies).unwrap_or_default()
    }

    pub fn generated_roots_of(&self, label: &str) -> Vec<PathBuf> {
        self.call(label).map(|c| c.generated_roots).unwrap_or_default()
    }
}

impl NodeBuilder for RecordingBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<PathBuf, BuildFailure> {
        let label = request.label().to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                label: label.clone(),
                output: request.output.clone(),
                dependencies: request.dependencies.iter().map(|d| d.artifact.clone()).collect(),
                generated_roots: request.generated_roots.clone(),
            });
        }

        if self.cancelling.contains(&label) {
            request.cancel.store(true, Ordering::SeqCst);
            return Err(BuildFailure::new("cancelled"));
        }
        if self.waiting.contains(&label) {
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
            while !request.cancel.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            return Err(BuildFailure::new(format!("{} was stopped", label)));
        }
        if self.fatal.contains(&label) {
            return Err(BuildFailure::fatal(format!("cannot start builder for {}", label)));
        }
        if self.failing.contains(&label) {
            return Err(BuildFailure::new(format!("{} does not compile", label)));
        }
        Ok(request.output.clone())
    }
}
