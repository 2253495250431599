use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::db::{DbHandle, WorkflowDb};
use crate::templates::TemplateSet;

/// Configuration for the workflow engine server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    /// Optional JSON template catalog; the built-in design-control
    /// lifecycle is used when absent.
    pub templates_path: Option<std::path::PathBuf>,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3172,
            db_path: std::path::PathBuf::from(".phasegate/workflow.db"),
            templates_path: None,
            dev_mode: false,
        }
    }
}

/// Resolve the template catalog for this run: a JSON file when configured,
/// the built-in lifecycle otherwise. Validation happens at seed time.
pub fn resolve_templates(config: &ServerConfig) -> Result<TemplateSet> {
    match &config.templates_path {
        Some(path) => TemplateSet::load(path),
        None => Ok(TemplateSet::builtin()),
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Start the workflow engine server. The template catalog is validated and
/// published before the listener binds, so a broken catalog fails startup.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = WorkflowDb::new(&config.db_path).context("Failed to initialize workflow database")?;
    let templates = resolve_templates(&config)?;
    db.seed_templates(&templates)
        .context("Template catalog rejected at startup")?;

    let state = Arc::new(AppState {
        db: DbHandle::new(db),
    });

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "phasegate workflow engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    // A failed signal hook would leave the server unkillable by ctrl-c;
    // better to fail loudly at install time.
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = WorkflowDb::new_in_memory().unwrap();
        db.seed_templates(&TemplateSet::builtin()).unwrap();
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
        });
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_templates_route_mounted() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/templates")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3172);
        assert_eq!(
            config.db_path,
            std::path::PathBuf::from(".phasegate/workflow.db")
        );
        assert!(config.templates_path.is_none());
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_resolve_templates_falls_back_to_builtin() {
        let set = resolve_templates(&ServerConfig::default()).unwrap();
        assert_eq!(set.templates.len(), 6);
    }
}
