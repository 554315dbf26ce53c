use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{Method, header},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::JeraiConfig;
use crate::tools::build_tool_client;

use super::api::{self, AppState};
use super::db::{DbHandle, TrackerDb};
use super::orchestrator::FixTimeouts;

/// Build the full application router.
///
/// The frontend is served from another origin, so `/api` always accepts
/// cross-origin calls; `dev_mode` drops every CORS restriction.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let cors = if dev_mode {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    api::api_router()
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Open (creating parent directories) and migrate the database file.
pub fn open_database(path: &Path) -> Result<TrackerDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory {}", parent.display())
        })?;
    }
    TrackerDb::new(path)
        .with_context(|| format!("Failed to initialize database at {}", path.display()))
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(config: &JeraiConfig) -> Result<()> {
    let db = DbHandle::new(open_database(&config.database.path)?);
    tracing::info!(path = %config.database.path.display(), "Database ready");

    let tools = build_tool_client(config)?;
    let timeouts = FixTimeouts {
        analysis: config.ai.analysis_timeout(),
        patch: config.ai.patch_timeout(),
    };
    let state = Arc::new(AppState::new(db, tools, timeouts));
    let app = build_router(state, config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        dev_mode = config.server.dev_mode,
        transport = %config.ai.transport,
        "Jerai backend listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::orchestrator::tests::MockToolClient;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = DbHandle::new(TrackerDb::new_in_memory().unwrap());
        let state = Arc::new(AppState::new(
            db,
            Arc::new(MockToolClient::default()),
            FixTimeouts::default(),
        ));
        build_router(state, dev_mode)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let resp = test_router(false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_header_on_api_routes() {
        let resp = test_router(false)
            .oneshot(
                Request::builder()
                    .uri("/api/issues")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let resp = test_router(true)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_open_database_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data").join("jerai.db");
        open_database(&path).unwrap();
        assert!(path.exists());
    }
}
