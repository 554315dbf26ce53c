//! Issue tracker with an AI-assisted fix workflow.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (router, CORS, bind + shutdown)      │
//! │  (React) │ <─────── │    └─ api.rs  (handlers, AppState, ApiError)     │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ begin_fix() → AIFixRequested            │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (FixOrchestrator, EventLog)    │
//!                       │         │                                        │
//!                       │         │ ToolClient::call_tool()                │
//!                       │         v                                        │
//!                       │  crate::tools  (chat / http / stdio transports)  │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `Issue`, `Event`, `IssueType`, `IssueState`               |
//! | `events`    | `EventPayload`, one typed payload per event tag           |
//! | `lifecycle` | Static successor table gating state transitions           |
//! | `db`        | SQLite access via `DbHandle` (`Arc<Mutex<_>>` + blocking) |
//! | `extract`   | File path extraction from analysis text and diffs         |
//! | `ws`        | `WsMessage` enum + `broadcast_message()` helper           |
//!
//! ## AI Fix Request Flow
//!
//! 1. `POST /api/issues/{id}/ai-fix` claims the issue's in-flight slot; a
//!    second trigger while one runs gets `409`.
//! 2. `begin_fix` checks the issue is `Active` and writes `AIFixRequested`.
//! 3. `FixOrchestrator::start_fix` writes `AnalysisComplete`,
//!    `PatchProposed`, `PatchValidated`, or `AIFixFailed` if the trail
//!    itself cannot be written.
//! 4. On success the handler moves the issue `Active → Resolved`.
//!
//! Every event written along the way is also pushed to `/ws` subscribers.

pub mod api;
pub mod db;
pub mod events;
pub mod extract;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod ws;
