//! berth - dependency graph resolution and build ordering for suite manifests
//!
//! This crate provides the core library functionality for berth: loading
//! suite manifests, resolving them into a platform-specific dependency
//! graph, verifying third-party libraries, assembling distributions and
//! driving a build through an external per-node collaborator.

pub mod builder;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;

/// Test utilities and mocks for berth unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides in-memory suite providers, a counting
/// fetcher and a recording build collaborator.
#[cfg(test)]
pub mod test_support;

pub use core::{
    dependency::DependencyRef, manifest::ManifestError, node::Node, platform::Platform,
    suite::Suite,
};

pub use resolver::{GraphError, ResolvedGraph};
pub use util::context::GlobalContext;
