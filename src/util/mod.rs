//! Shared utilities

pub mod config;
pub mod context;
pub mod diagnostic;
pub mod env;
pub mod fs;
pub mod hash;
pub mod ordered_map;
pub mod process;

pub use config::{Config, RunConfig};
pub use context::GlobalContext;
pub use diagnostic::Diagnostic;
