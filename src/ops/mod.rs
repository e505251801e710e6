//! High-level operations.
//!
//! This module contains the implementation of berth commands.

pub mod build;
pub mod dist;
pub mod fetch;
pub mod resolve;

pub use build::{build, BuildOptions};
pub use dist::{assemble_all, assemble_distribution, format_assembly};
pub use fetch::{fetch, verify_libraries};
pub use resolve::{build_order, load, run_config, Session};
