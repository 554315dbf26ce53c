//! AI-fix workflow: analyze, propose a patch, record validation.
//!
//! Each external call gets one attempt bounded by its own timeout. Any tool
//! failure is downgraded to a canned result flagged `mock = true` so the
//! demo always completes; only an audit-trail write failure aborts the run,
//! and that abort is itself recorded as `AIFixFailed`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::errors::{ToolError, TrackerError};
use crate::tools::{ANALYZE_BUG, GENERATE_PATCH, ToolClient};

use super::db::DbHandle;
use super::events::{EventPayload, TestResults};
use super::extract;
use super::models::Event;

pub const ANALYZER_ACTOR: &str = "ai-analyzer";
pub const PATCHER_ACTOR: &str = "ai-patcher";
pub const TEST_RUNNER_ACTOR: &str = "test-runner";
pub const SYSTEM_ACTOR: &str = "system";
/// Actor for the `Active → Resolved` move after a completed fix.
pub const RESOLVER_ACTOR: &str = "ai-agent";

pub const SUCCESS_MESSAGE: &str = "AI fix completed successfully";
pub const FAILURE_MESSAGE: &str = "AI fix failed";
pub const WORKFLOW_FAILED_MESSAGE: &str = "AI fix workflow failed";

pub const LIKELY_CAUSE_SEE_ANALYSIS: &str = "See analysis";

pub const MOCK_ANALYSIS: &str = "Mock analysis (AI unavailable): Floating-point precision issue in \
     src/shop/cart.rs. Use a decimal type for money calculations.";
pub const MOCK_LIKELY_CAUSE: &str = "Floating point arithmetic";
pub const MOCK_AFFECTED_FILE: &str = "src/shop/cart.rs";

pub const MOCK_PATCH: &str = r#"--- a/src/shop/cart.rs
+++ b/src/shop/cart.rs
@@ -6,2 +6,4 @@

 use serde::{Deserialize, Serialize};
+use rust_decimal::prelude::*;
+use rust_decimal::RoundingStrategy;
@@ -96,19 +98,21 @@ impl Cart {
     pub fn calculate_total(&self, discount_pct: f64, tax_pct: f64) -> CartTotals {
-        let subtotal: f64 = self
+        let money = |v: f64| Decimal::from_f64(v).unwrap_or_default();
+        let subtotal: Decimal = self
             .items
             .iter()
-            .map(|item| item.price * item.qty as f64)
+            .map(|item| money(item.price) * Decimal::from(item.qty))
             .sum();

-        let discounted = subtotal - subtotal * discount_pct;
-        let total = discounted + discounted * tax_pct;
+        let discounted = subtotal - subtotal * money(discount_pct);
+        let total = (discounted + discounted * money(tax_pct))
+            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

         CartTotals {
-            subtotal: round2(subtotal),
+            subtotal: subtotal.round_dp(2).to_f64().unwrap_or_default(),
             discount_pct,
             tax_pct,
-            total: round2(total),
+            total: total.to_f64().unwrap_or_default(),
             items_count: self.items.len(),
         }
     }"#;

const GENERATED_TEST_LABEL: &str = "Generated by AI";
const MOCK_TESTS_PASSED: [&str; 2] = ["test_basic_cart", "test_discount_then_tax"];

/// Append-only sink for workflow events.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, issue_id: i64, actor: &str, payload: EventPayload) -> Result<Event>;
}

#[async_trait]
impl EventLog for DbHandle {
    async fn append(&self, issue_id: i64, actor: &str, payload: EventPayload) -> Result<Event> {
        let actor = actor.to_string();
        self.call(move |db| db.append_event(issue_id, &actor, &payload))
            .await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub analysis: String,
    pub likely_cause: String,
    pub affected_files: Vec<String>,
    pub mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    fn from_text(analysis: String) -> Self {
        Self {
            affected_files: extract::affected_files(&analysis),
            analysis,
            likely_cause: LIKELY_CAUSE_SEE_ANALYSIS.to_string(),
            mock: false,
            error: None,
        }
    }

    fn mock(error: &ToolError) -> Self {
        Self {
            analysis: MOCK_ANALYSIS.to_string(),
            likely_cause: MOCK_LIKELY_CAUSE.to_string(),
            affected_files: vec![MOCK_AFFECTED_FILE.to_string()],
            mock: true,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchResult {
    pub patch: String,
    pub files_modified: Vec<String>,
    pub tests_passed: bool,
    pub test_results: TestResults,
    pub mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PatchResult {
    fn from_text(raw: &str) -> Self {
        let patch = extract::strip_code_fences(raw);
        Self {
            files_modified: extract::files_modified(&patch),
            patch,
            tests_passed: true,
            test_results: TestResults {
                passed: vec![GENERATED_TEST_LABEL.to_string()],
                failed: Vec::new(),
            },
            mock: false,
            error: None,
        }
    }

    fn mock(error: &ToolError) -> Self {
        Self {
            patch: MOCK_PATCH.to_string(),
            files_modified: extract::files_modified(MOCK_PATCH),
            tests_passed: true,
            test_results: TestResults {
                passed: MOCK_TESTS_PASSED.iter().map(|s| s.to_string()).collect(),
                failed: Vec::new(),
            },
            mock: true,
            error: Some(error.to_string()),
        }
    }
}

/// Result of one `start_fix` run.
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub success: bool,
    pub message: String,
    pub analysis: Option<AnalysisResult>,
    pub patch: Option<PatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-call time limits. Analysis is expected to be the faster call.
#[derive(Debug, Clone, Copy)]
pub struct FixTimeouts {
    pub analysis: Duration,
    pub patch: Duration,
}

impl Default for FixTimeouts {
    fn default() -> Self {
        Self {
            analysis: Duration::from_secs(10),
            patch: Duration::from_secs(30),
        }
    }
}

/// Held while a fix runs for an issue; releases the slot on drop.
pub struct FixGuard {
    issue_id: i64,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for FixGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.issue_id);
        }
    }
}

pub struct FixOrchestrator {
    tools: Arc<dyn ToolClient>,
    log: Arc<dyn EventLog>,
    timeouts: FixTimeouts,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl FixOrchestrator {
    pub fn new(tools: Arc<dyn ToolClient>, log: Arc<dyn EventLog>, timeouts: FixTimeouts) -> Self {
        Self {
            tools,
            log,
            timeouts,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reserve the issue for a fix run. A second claim while the first
    /// guard is alive is rejected.
    pub fn claim(&self, issue_id: i64) -> Result<FixGuard, TrackerError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| TrackerError::FixAlreadyRunning { issue_id })?;
        if !set.insert(issue_id) {
            return Err(TrackerError::FixAlreadyRunning { issue_id });
        }
        Ok(FixGuard {
            issue_id,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_running(&self, issue_id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&issue_id))
            .unwrap_or(false)
    }

    /// Run the workflow. The caller has already checked the issue is
    /// `Active` and recorded `AIFixRequested`. Never returns an error: a
    /// failed run comes back with `success = false`.
    pub async fn start_fix(&self, issue_id: i64, title: &str, description: &str) -> FixOutcome {
        tracing::info!(issue_id, title, "Starting AI fix");

        match self.run(issue_id, title, description).await {
            Ok((analysis, patch)) => {
                tracing::info!(
                    issue_id,
                    analysis_mock = analysis.mock,
                    patch_mock = patch.mock,
                    "AI fix completed"
                );
                FixOutcome {
                    success: true,
                    message: SUCCESS_MESSAGE.to_string(),
                    analysis: Some(analysis),
                    patch: Some(patch),
                    error: None,
                }
            }
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::error!(issue_id, error = %error, "AI fix workflow failed");
                let failed = EventPayload::AiFixFailed {
                    error: error.clone(),
                    message: WORKFLOW_FAILED_MESSAGE.to_string(),
                };
                if let Err(log_err) = self.log.append(issue_id, SYSTEM_ACTOR, failed).await {
                    tracing::warn!(issue_id, error = %log_err, "Could not record AIFixFailed");
                }
                FixOutcome {
                    success: false,
                    message: FAILURE_MESSAGE.to_string(),
                    analysis: None,
                    patch: None,
                    error: Some(error),
                }
            }
        }
    }

    async fn run(
        &self,
        issue_id: i64,
        title: &str,
        description: &str,
    ) -> Result<(AnalysisResult, PatchResult)> {
        let analysis = self.analyze(title, description).await;
        self.log
            .append(
                issue_id,
                ANALYZER_ACTOR,
                EventPayload::AnalysisComplete {
                    analysis: analysis.analysis.clone(),
                    likely_cause: analysis.likely_cause.clone(),
                    affected_files: analysis.affected_files.clone(),
                    mock: analysis.mock,
                },
            )
            .await?;

        let patch = self.generate_patch(title, &analysis.analysis).await;
        self.log
            .append(
                issue_id,
                PATCHER_ACTOR,
                EventPayload::PatchProposed {
                    patch: patch.patch.clone(),
                    files_modified: patch.files_modified.clone(),
                    tests_passed: patch.tests_passed,
                    test_results: patch.test_results.clone(),
                    mock: patch.mock,
                },
            )
            .await?;

        // Validation is recorded, not executed.
        self.log
            .append(
                issue_id,
                TEST_RUNNER_ACTOR,
                EventPayload::PatchValidated {
                    status: "success".to_string(),
                    tests_passed: patch.test_results.passed.clone(),
                    tests_failed: patch.test_results.failed.clone(),
                    recommendation: "Patch is safe to apply".to_string(),
                },
            )
            .await?;

        Ok((analysis, patch))
    }

    async fn analyze(&self, title: &str, description: &str) -> AnalysisResult {
        let args = json!({"title": title, "description": description});
        match self.call(ANALYZE_BUG, args, self.timeouts.analysis).await {
            Ok(text) => {
                tracing::debug!(chars = text.len(), "Analysis received");
                AnalysisResult::from_text(text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Analysis unavailable, using mock");
                AnalysisResult::mock(&e)
            }
        }
    }

    async fn generate_patch(&self, title: &str, analysis: &str) -> PatchResult {
        let args = json!({"title": title, "analysis": analysis});
        match self.call(GENERATE_PATCH, args, self.timeouts.patch).await {
            Ok(text) => {
                tracing::debug!(chars = text.len(), "Patch received");
                PatchResult::from_text(&text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Patch generation unavailable, using mock");
                PatchResult::mock(&e)
            }
        }
    }

    async fn call(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        limit: Duration,
    ) -> Result<String, ToolError> {
        match tokio::time::timeout(limit, self.tools.call_tool(tool, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: tool.to_string(),
                limit,
            }),
        }
    }
}
