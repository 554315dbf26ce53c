//! Typed error hierarchy for Jerai.
//!
//! Two top-level enums cover the two seams where callers need to match:
//! - `TrackerError`: issue store, lifecycle gate, and fix trigger rejections
//! - `ToolError`: external tool transport and protocol failures
//!
//! Everything else travels as `anyhow::Error` with context attached.

use std::time::Duration;

use thiserror::Error;

use crate::tracker::models::IssueState;

/// Errors from the issue tracker subsystem.
///
/// Store methods return `anyhow::Result`; these variants are raised inside
/// them and recovered at the HTTP layer with `downcast_ref`.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Issue {id} not found")]
    IssueNotFound { id: i64 },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: IssueState, to: IssueState },

    #[error("Issue {id} must be Active to start an AI fix (currently {state})")]
    FixRequiresActive { id: i64, state: IssueState },

    #[error("AI fix already running for issue {issue_id}")]
    FixAlreadyRunning { issue_id: i64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Errors from an external tool call.
///
/// The orchestrator never surfaces these to clients; every variant is
/// downgraded to a mock result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("Tool transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Tool protocol error: {0}")]
    Protocol(String),

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Tool {tool} timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Transport(err.to_string())
    }
}
