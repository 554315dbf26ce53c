//! Typed event payloads for the issue audit trail.
//!
//! Each event type carries its own payload schema. The store keeps the tag
//! and the payload in separate columns; on the wire they travel together as
//! `{"type": "...", "payload": {...}}`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::models::{IssueState, IssueType};

/// Test outcome summary attached to patch events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
    IssueCreated {
        title: String,
        issue_type: IssueType,
    },
    StateChanged {
        from: IssueState,
        to: IssueState,
    },
    #[serde(rename = "AIFixRequested")]
    AiFixRequested {
        title: String,
    },
    AnalysisComplete {
        analysis: String,
        likely_cause: String,
        affected_files: Vec<String>,
        mock: bool,
    },
    PatchProposed {
        patch: String,
        files_modified: Vec<String>,
        tests_passed: bool,
        test_results: TestResults,
        mock: bool,
    },
    PatchValidated {
        status: String,
        tests_passed: Vec<String>,
        tests_failed: Vec<String>,
        recommendation: String,
    },
    #[serde(rename = "AIFixFailed")]
    AiFixFailed {
        error: String,
        message: String,
    },
}

impl EventPayload {
    /// The tag stored in `events.type`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IssueCreated { .. } => "IssueCreated",
            Self::StateChanged { .. } => "StateChanged",
            Self::AiFixRequested { .. } => "AIFixRequested",
            Self::AnalysisComplete { .. } => "AnalysisComplete",
            Self::PatchProposed { .. } => "PatchProposed",
            Self::PatchValidated { .. } => "PatchValidated",
            Self::AiFixFailed { .. } => "AIFixFailed",
        }
    }

    /// Serialize only the payload body (without the tag) for storage.
    pub fn payload_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).context("Failed to serialize event payload")?;
        let body = value
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        serde_json::to_string(&body).context("Failed to serialize event payload body")
    }

    /// Rebuild a payload from the stored tag and body.
    pub fn from_parts(event_type: &str, payload_json: &str) -> Result<Self> {
        let body: serde_json::Value = serde_json::from_str(payload_json)
            .with_context(|| format!("Corrupt payload JSON for {} event", event_type))?;
        serde_json::from_value(serde_json::json!({ "type": event_type, "payload": body }))
            .with_context(|| format!("Payload does not match schema for {} event", event_type))
    }
}
