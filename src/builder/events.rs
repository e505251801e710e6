//! Build event types for JSON output.
//!
//! This module defines the stable JSON schema for machine-readable build output.
//! These events are emitted when using `--message-format=json`, one JSON
//! object per line.
//!
//! # Event Types
//!
//! - `build-started`: The build set is known and scheduling begins
//! - `node-started`: A node was handed to the build collaborator
//! - `node-finished`: A node reached its terminal status
//! - `build-finished`: Build completed (success or failure)
//! - `diagnostic`: A message that is not tied to one node
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

use crate::builder::report::{BuildReport, NodeReport, RunOutcome};
use crate::core::node::NodeKind;

/// A build event emitted during the build process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// Scheduling begins.
    #[serde(rename = "build-started")]
    BuildStarted {
        /// Target platform, `os/arch`
        platform: String,
        /// Number of nodes in the build set
        node_count: u64,
    },

    /// A node was handed to the collaborator.
    #[serde(rename = "node-started")]
    NodeStarted { label: String, kind: NodeKind },

    /// A node reached its terminal status.
    #[serde(rename = "node-finished")]
    NodeFinished {
        #[serde(flatten)]
        node: NodeReport,
        /// Time spent in the collaborator, if it ran
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// Build completed (success or failure).
    #[serde(rename = "build-finished")]
    BuildFinished {
        success: bool,
        /// Process exit code the run maps to
        exit_code: i32,
        built: u64,
        failed: u64,
        skipped: u64,
        duration_ms: u64,
    },

    /// A generic diagnostic message.
    #[serde(rename = "diagnostic")]
    Diagnostic {
        /// Severity level ("error", "warning", "note")
        level: String,
        message: String,
    },
}

impl BuildEvent {
    /// Create a build started event.
    pub fn started(platform: impl Into<String>, node_count: usize) -> Self {
        BuildEvent::BuildStarted {
            platform: platform.into(),
            node_count: node_count as u64,
        }
    }

    /// Create a build finished event from the final report.
    pub fn finished(report: &BuildReport) -> Self {
        let outcome = report.outcome();
        BuildEvent::BuildFinished {
            success: outcome == RunOutcome::Success,
            exit_code: outcome.exit_code(),
            built: report.built() as u64,
            failed: report.failed() as u64,
            skipped: report.skipped() as u64,
            duration_ms: report.duration.as_millis() as u64,
        }
    }

    /// Create a diagnostic event.
    pub fn diagnostic(level: impl Into<String>, message: impl Into<String>) -> Self {
        BuildEvent::Diagnostic {
            level: level.into(),
            message: message.into(),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives build events as they happen. Called from the scheduling thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BuildEvent);
}

/// Writes each event as one JSON line.
pub struct JsonLines<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(out: W) -> Self {
        JsonLines {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLines<W> {
    fn emit(&self, event: &BuildEvent) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", event.to_json()).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write build event: {}", e);
        }
    }
}
