use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::TrackerError;
use crate::shop;
use crate::tools::ToolClient;

use super::db::DbHandle;
use super::events::EventPayload;
use super::models::{Event, Issue, IssueState, IssueType, NewIssue};
use super::orchestrator::{
    EventLog, FixGuard, FixOrchestrator, FixOutcome, FixTimeouts, RESOLVER_ACTOR,
};
use super::ws::{self, WsMessage, broadcast_message};

/// Actor recorded on `AIFixRequested` and on transitions without one.
pub const DEFAULT_ACTOR: &str = "user";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub orchestrator: FixOrchestrator,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, tools: Arc<dyn ToolClient>, timeouts: FixTimeouts) -> Self {
        let (ws_tx, _) = broadcast::channel::<String>(256);
        let log = Arc::new(BroadcastLog {
            db: db.clone(),
            ws_tx: ws_tx.clone(),
        });
        Self {
            db,
            ws_tx,
            orchestrator: FixOrchestrator::new(tools, log, timeouts),
        }
    }

    fn publish_event(&self, event: Event) {
        broadcast_message(&self.ws_tx, &WsMessage::EventAppended { event });
    }
}

/// Event sink that persists, then announces the event on the live feed.
pub struct BroadcastLog {
    db: DbHandle,
    ws_tx: broadcast::Sender<String>,
}

#[async_trait]
impl EventLog for BroadcastLog {
    async fn append(
        &self,
        issue_id: i64,
        actor: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Event> {
        let event = EventLog::append(&self.db, issue_id, actor, payload).await?;
        broadcast_message(
            &self.ws_tx,
            &WsMessage::EventAppended {
                event: event.clone(),
            },
        );
        Ok(event)
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateIssueRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub issue_type: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub to: String,
    pub actor: Option<String>,
}

#[derive(Serialize)]
pub struct AiFixResponse {
    pub issue: Issue,
    #[serde(flatten)]
    pub outcome: FixOutcome,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let msg = err.to_string();
        match err {
            TrackerError::IssueNotFound { .. } => ApiError::NotFound(msg),
            TrackerError::InvalidTransition { .. } | TrackerError::BadRequest(_) => {
                ApiError::BadRequest(msg)
            }
            TrackerError::FixRequiresActive { .. } | TrackerError::FixAlreadyRunning { .. } => {
                ApiError::Conflict(msg)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TrackerError>() {
            Ok(tracker) => tracker.into(),
            Err(other) => ApiError::Internal(format!("{:#}", other)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(service_descriptor))
        .route("/health", get(health_check))
        .route("/api/issues", get(list_issues).post(create_issue))
        .route("/api/issues/{id}", get(get_issue).delete(delete_issue))
        .route("/api/issues/{id}/transition", post(transition_issue))
        .route("/api/issues/{id}/ai-fix", post(ai_fix))
        .route("/api/issues/{id}/events", get(list_events))
        .nest("/api/shop", shop::api::shop_router())
        .route("/ws", get(ws::ws_handler))
}

// ── Handlers ──────────────────────────────────────────────────────────

/// The fix run owns the issue's state until it finishes.
fn reject_if_fixing(state: &AppState, id: i64) -> Result<(), ApiError> {
    if state.orchestrator.is_running(id) {
        return Err(TrackerError::FixAlreadyRunning { issue_id: id }.into());
    }
    Ok(())
}

async fn service_descriptor() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "Jerai API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "issues": "/api/issues",
            "shop": "/api/shop",
            "health": "/health",
            "ws": "/ws"
        }
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "jerai-backend"}))
}

async fn list_issues(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let issues = state.db.call(|db| db.list_issues()).await?;
    Ok(Json(issues))
}

async fn create_issue(
    State(state): State<SharedState>,
    payload: Result<Json<CreateIssueRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let issue_type = match req.issue_type.as_deref() {
        Some(t) => IssueType::from_str(t).map_err(ApiError::BadRequest)?,
        None => IssueType::default(),
    };
    let new = NewIssue {
        title: req.title.unwrap_or_default(),
        issue_type,
        description: req.description.unwrap_or_default(),
        created_by: req.created_by.unwrap_or_default(),
    };
    let (issue, created) = state.db.call(move |db| db.create_issue(&new)).await?;
    tracing::info!(issue_id = issue.id, title = %issue.title, "Issue created");

    broadcast_message(
        &state.ws_tx,
        &WsMessage::IssueCreated {
            issue: issue.clone(),
        },
    );
    state.publish_event(created);
    Ok((StatusCode::CREATED, Json(issue)))
}

async fn get_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let issue = state.db.call(move |db| db.require_issue(id)).await?;
    Ok(Json(issue))
}

async fn delete_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    reject_if_fixing(&state, id)?;
    let deleted = state.db.call(move |db| db.delete_issue(id)).await?;
    if !deleted {
        return Err(TrackerError::IssueNotFound { id }.into());
    }
    tracing::info!(issue_id = id, "Issue deleted");
    broadcast_message(&state.ws_tx, &WsMessage::IssueDeleted { issue_id: id });
    Ok(StatusCode::NO_CONTENT)
}

async fn transition_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let to = IssueState::from_str(&req.to).map_err(ApiError::BadRequest)?;
    let actor = req.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    reject_if_fixing(&state, id)?;

    let (issue, changed) = state
        .db
        .call(move |db| db.transition_issue(id, to, &actor))
        .await?;
    tracing::info!(issue_id = id, to = %to, "Issue transitioned");

    broadcast_message(
        &state.ws_tx,
        &WsMessage::IssueUpdated {
            issue: issue.clone(),
        },
    );
    state.publish_event(changed);
    Ok(Json(issue))
}

async fn ai_fix(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let guard = state.orchestrator.claim(id)?;

    // Detached so a dropped connection cannot stop the run between steps.
    let run = tokio::spawn(run_fix(state.clone(), id, guard));
    let response = run
        .await
        .map_err(|e| ApiError::Internal(format!("AI fix task failed: {}", e)))??;
    Ok(Json(response))
}

async fn run_fix(
    state: SharedState,
    id: i64,
    _guard: FixGuard,
) -> Result<AiFixResponse, ApiError> {
    let (issue, requested) = state
        .db
        .call(move |db| db.begin_fix(id, DEFAULT_ACTOR))
        .await?;
    state.publish_event(requested);

    let outcome = state
        .orchestrator
        .start_fix(id, &issue.title, &issue.description)
        .await;

    let issue = if outcome.success {
        let (resolved, changed) = state
            .db
            .call(move |db| db.transition_issue(id, IssueState::Resolved, RESOLVER_ACTOR))
            .await?;
        broadcast_message(
            &state.ws_tx,
            &WsMessage::IssueUpdated {
                issue: resolved.clone(),
            },
        );
        state.publish_event(changed);
        resolved
    } else {
        issue
    };

    Ok(AiFixResponse { issue, outcome })
}

async fn list_events(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .db
        .call(move |db| {
            db.require_issue(id)?;
            db.list_events(id)
        })
        .await?;
    Ok(Json(events))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::db::TrackerDb;
    use crate::tracker::orchestrator::tests::MockToolClient;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(tools: MockToolClient) -> SharedState {
        let db = DbHandle::new(TrackerDb::new_in_memory().unwrap());
        Arc::new(AppState::new(db, Arc::new(tools), FixTimeouts::default()))
    }

    fn test_app_with(state: SharedState) -> Router {
        api_router().with_state(state)
    }

    fn test_app() -> Router {
        test_app_with(test_state(MockToolClient::default()))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn create(app: &Router, title: &str) -> Issue {
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/issues",
                serde_json::json!({"title": title, "description": "Total shows 21.52"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp.into_body()).await
    }

    async fn transition(app: &Router, id: i64, to: &str) -> Response {
        app.clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/issues/{}/transition", id),
                serde_json::json!({"to": to}),
            ))
            .await
            .unwrap()
    }

    async fn events(app: &Router, id: i64) -> Vec<Value> {
        let resp = app
            .clone()
            .oneshot(get_request(&format!("/api/issues/{}/events", id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp.into_body()).await
    }

    fn types(events: &[Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_health_check() {
        let resp = test_app().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "jerai-backend");
    }

    #[tokio::test]
    async fn test_service_descriptor_lists_endpoints() {
        let resp = test_app().oneshot(get_request("/")).await.unwrap();
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["endpoints"]["issues"], "/api/issues");
        assert_eq!(body["endpoints"]["shop"], "/api/shop");
    }

    #[tokio::test]
    async fn test_create_issue_defaults() {
        let app = test_app();
        let issue = create(&app, "Cart total off by a cent").await;
        assert_eq!(issue.state, IssueState::New);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.created_by, "system");
        assert_eq!(types(&events(&app, issue.id).await), vec!["IssueCreated"]);
    }

    #[tokio::test]
    async fn test_create_issue_with_type() {
        let app = test_app();
        let resp = app
            .oneshot(json_request(
                "POST",
                "/api/issues",
                serde_json::json!({"title": "Checkout page", "type": "story", "created_by": "pm"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["type"], "STORY");
        assert_eq!(body["created_by"], "pm");
    }

    #[tokio::test]
    async fn test_create_issue_rejects_bad_input() {
        let app = test_app();
        let blank = app
            .clone()
            .oneshot(json_request("POST", "/api/issues", serde_json::json!({"title": "  "})))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let bad_type = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/issues",
                serde_json::json!({"title": "x", "type": "EPIC"}),
            ))
            .await
            .unwrap();
        assert_eq!(bad_type.status(), StatusCode::BAD_REQUEST);

        let not_json = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/issues")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_issues_newest_first() {
        let app = test_app();
        let first = create(&app, "first").await;
        let second = create(&app, "second").await;

        let resp = app.oneshot(get_request("/api/issues")).await.unwrap();
        let issues: Vec<Issue> = body_json(resp.into_body()).await;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].id, second.id);
        assert_eq!(issues[1].id, first.id);
    }

    #[tokio::test]
    async fn test_get_missing_issue_is_404() {
        let resp = test_app().oneshot(get_request("/api/issues/999")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("999"));
    }

    #[tokio::test]
    async fn test_delete_issue() {
        let app = test_app();
        let issue = create(&app, "to delete").await;
        let uri = format!("/api/issues/{}", issue.id);

        let resp = app
            .clone()
            .oneshot(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let again = app
            .clone()
            .oneshot(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let events = app
            .oneshot(get_request(&format!("{}/events", uri)))
            .await
            .unwrap();
        assert_eq!(events.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transition_records_state_change() {
        let app = test_app();
        let issue = create(&app, "t").await;

        let resp = transition(&app, issue.id, "Active").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let updated: Issue = body_json(resp.into_body()).await;
        assert_eq!(updated.state, IssueState::Active);

        let trail = events(&app, issue.id).await;
        assert_eq!(types(&trail), vec!["IssueCreated", "StateChanged"]);
        assert_eq!(trail[1]["actor"], DEFAULT_ACTOR);
        assert_eq!(trail[1]["payload"]["from"], "New");
        assert_eq!(trail[1]["payload"]["to"], "Active");
    }

    #[tokio::test]
    async fn test_illegal_transition_is_400_and_writes_nothing() {
        let app = test_app();
        let issue = create(&app, "t").await;

        let resp = transition(&app, issue.id, "Closed").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let unknown = transition(&app, issue.id, "Done").await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(get_request(&format!("/api/issues/{}", issue.id)))
            .await
            .unwrap();
        let current: Issue = body_json(resp.into_body()).await;
        assert_eq!(current.state, IssueState::New);
        assert_eq!(types(&events(&app, issue.id).await), vec!["IssueCreated"]);
    }

    #[tokio::test]
    async fn test_ai_fix_requires_active() {
        let app = test_app();
        let issue = create(&app, "t").await;

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/issues/{}/ai-fix", issue.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(types(&events(&app, issue.id).await), vec!["IssueCreated"]);
    }

    #[tokio::test]
    async fn test_ai_fix_missing_issue_is_404() {
        let resp = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/issues/42/ai-fix")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ai_fix_full_sequence_resolves_issue() {
        let state = test_state(MockToolClient::default());
        let mut feed = state.ws_tx.subscribe();
        let app = test_app_with(state);
        let issue = create(&app, "Cart total off by a cent").await;
        assert_eq!(transition(&app, issue.id, "Active").await.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/issues/{}/ai-fix", issue.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["issue"]["state"], "Resolved");
        assert_eq!(body["analysis"]["mock"], true);
        assert_eq!(body["patch"]["mock"], true);

        let trail = events(&app, issue.id).await;
        assert_eq!(
            types(&trail),
            vec![
                "IssueCreated",
                "StateChanged",
                "AIFixRequested",
                "AnalysisComplete",
                "PatchProposed",
                "PatchValidated",
                "StateChanged"
            ]
        );
        let last = trail.last().unwrap();
        assert_eq!(last["actor"], RESOLVER_ACTOR);
        assert_eq!(last["payload"]["from"], "Active");
        assert_eq!(last["payload"]["to"], "Resolved");

        let mut appended = Vec::new();
        while let Ok(msg) = feed.try_recv() {
            let msg: Value = serde_json::from_str(&msg).unwrap();
            if msg["type"] == "EventAppended" {
                appended.push(msg["data"]["event"]["type"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(types(&trail), appended);
    }

    #[tokio::test]
    async fn test_ai_fix_with_live_analysis_and_patch() {
        let app = test_app_with(test_state(MockToolClient {
            analysis: None,
            patch: Some("```diff\n--- a/src/shop/cart.rs\n+++ b/src/shop/cart.rs\n```".to_string()),
            ..Default::default()
        }));
        let issue = create(&app, "t").await;
        transition(&app, issue.id, "Active").await;

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/issues/{}/ai-fix", issue.id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["issue"]["state"], "Resolved");
        assert_eq!(body["analysis"]["mock"], true);
        assert_eq!(body["patch"]["mock"], false);
        assert_eq!(body["patch"]["files_modified"][0], "src/shop/cart.rs");
    }

    #[tokio::test]
    async fn test_concurrent_ai_fix_is_rejected() {
        let state = test_state(MockToolClient {
            delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let app = test_app_with(state.clone());
        let issue = create(&app, "t").await;
        transition(&app, issue.id, "Active").await;

        let uri = format!("/api/issues/{}/ai-fix", issue.id);
        let fix = |app: Router, uri: String| async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        };

        let first = tokio::spawn(fix(app.clone(), uri.clone()));
        while !state.orchestrator.is_running(issue.id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = fix(app.clone(), uri).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let first = first.await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let requested = types(&events(&app, issue.id).await)
            .into_iter()
            .filter(|t| t == "AIFixRequested")
            .count();
        assert_eq!(requested, 1);
    }

    fn ai_fix_request(id: i64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/issues/{}/ai-fix", id))
            .body(Body::empty())
            .unwrap()
    }

    async fn wait_until_idle(state: &SharedState, id: i64) {
        while state.orchestrator.is_running(id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_ai_fix_finishes_after_client_disconnects() {
        let state = test_state(MockToolClient {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let app = test_app_with(state.clone());
        let issue = create(&app, "t").await;
        transition(&app, issue.id, "Active").await;

        // The client gives up while the patch call is still pending.
        let request = app.clone().oneshot(ai_fix_request(issue.id));
        let gave_up = tokio::time::timeout(Duration::from_millis(300), request).await;
        assert!(gave_up.is_err());

        wait_until_idle(&state, issue.id).await;
        let trail = events(&app, issue.id).await;
        assert_eq!(
            types(&trail)[3..],
            ["AnalysisComplete", "PatchProposed", "PatchValidated", "StateChanged"]
        );
        assert_eq!(trail.last().unwrap()["actor"], RESOLVER_ACTOR);

        let resp = app
            .oneshot(get_request(&format!("/api/issues/{}", issue.id)))
            .await
            .unwrap();
        let current: Issue = body_json(resp.into_body()).await;
        assert_eq!(current.state, IssueState::Resolved);
    }

    #[tokio::test]
    async fn test_issue_is_locked_while_fix_runs() {
        let state = test_state(MockToolClient {
            delay: Some(Duration::from_millis(150)),
            ..Default::default()
        });
        let app = test_app_with(state.clone());
        let issue = create(&app, "t").await;
        transition(&app, issue.id, "Active").await;

        let fix = tokio::spawn(app.clone().oneshot(ai_fix_request(issue.id)));
        while !state.orchestrator.is_running(issue.id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let manual = transition(&app, issue.id, "Resolved").await;
        assert_eq!(manual.status(), StatusCode::CONFLICT);
        let delete = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/issues/{}", issue.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::CONFLICT);

        let fixed = fix.await.unwrap().unwrap();
        assert_eq!(fixed.status(), StatusCode::OK);
        let body: Value = body_json(fixed.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["issue"]["state"], "Resolved");

        let trail = events(&app, issue.id).await;
        let changes: Vec<&Value> = trail.iter().filter(|e| e["type"] == "StateChanged").collect();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1]["actor"], RESOLVER_ACTOR);

        // Released once the run is over.
        assert_eq!(transition(&app, issue.id, "Closed").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_events_for_missing_issue_is_404() {
        let resp = test_app().oneshot(get_request("/api/issues/5/events")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shop_routes_are_mounted() {
        let resp = test_app().oneshot(get_request("/api/shop/products")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_tracker_errors_map_to_status() {
        let status = |e: TrackerError| ApiError::from(anyhow::Error::from(e)).into_response().status();
        assert_eq!(status(TrackerError::IssueNotFound { id: 1 }), StatusCode::NOT_FOUND);
        assert_eq!(
            status(TrackerError::InvalidTransition {
                from: IssueState::New,
                to: IssueState::Closed
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(TrackerError::FixAlreadyRunning { issue_id: 1 }),
            StatusCode::CONFLICT
        );
        let other = ApiError::from(anyhow::anyhow!("boom")).into_response().status();
        assert_eq!(other, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
