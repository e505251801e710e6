//! Build driving.
//!
//! This module walks a resolved graph and hands each node to an external
//! build collaborator, collecting every node's terminal status.

pub mod collaborator;
pub mod driver;
pub mod events;
pub mod report;

pub use collaborator::{BuildFailure, BuildRequest, BuiltDependency, CommandNodeBuilder, NodeBuilder};
pub use driver::BuildDriver;
pub use events::{BuildEvent, EventSink, JsonLines};
pub use report::{BuildReport, NodeStatus, RunOutcome};
