//! Core data structures for berth.
//!
//! This module contains the foundational types used throughout berth:
//! - The node model (libraries, projects, distributions)
//! - Typed dependency references and suite imports
//! - Platform variant tables
//! - Manifest loading

pub mod dependency;
pub mod import;
pub mod manifest;
pub mod node;
pub mod platform;
pub mod suite;

pub use dependency::{DepKind, DependencyRef, RefName};
pub use import::{ImportKind, SuiteImport};
pub use manifest::{load_suite, parse_suite, ManifestError};
pub use node::{Distribution, Library, Node, NodeKind, Project};
pub use platform::Platform;
pub use suite::Suite;
