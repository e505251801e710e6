//! External inputs.
//!
//! Sources are responsible for everything that leaves the process: library
//! downloads and their verification, the shared library cache, and
//! imported suites (local overrides, git checkouts, binary snapshots).

pub mod cache;
pub mod fetch;
pub mod import;
pub mod verify;

pub use cache::LibraryCache;
pub use fetch::{Fetcher, HttpFetcher, TransferError};
pub use import::{ImportError, ImportResolver, SuiteProvider};
pub use verify::{LibraryRequest, Verifier, VerifyError};
