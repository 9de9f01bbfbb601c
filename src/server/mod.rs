//! HTTP transport shell.
//!
//! Serves the read API over axum: the published diagram set and a health
//! probe that reports `initializing` until the first refresh lands.

pub mod refresh;
pub mod store;

pub use refresh::Orchestrator;
pub use store::{DiagramStore, PublishedDiagrams};

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::DiagramArtifact;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DiagramStore>,
}

#[derive(Serialize)]
struct DiagramsResponse {
    diagrams: Vec<DiagramArtifact>,
    generated_at: DateTime<Utc>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/diagrams", get(handle_diagrams))
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

async fn handle_diagrams(State(state): State<AppState>) -> Json<DiagramsResponse> {
    match state.store.current() {
        Some(published) => Json(DiagramsResponse {
            diagrams: published.diagrams.clone(),
            generated_at: published.generated_at,
        }),
        None => Json(DiagramsResponse {
            diagrams: Vec::new(),
            generated_at: DateTime::UNIX_EPOCH,
        }),
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "initializing"})),
        )
    }
}

/// Start the refresh loop and serve the API until SIGINT/SIGTERM. The
/// listener drains for at most five seconds on shutdown.
pub async fn serve(cfg: Config) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(&cfg).await?);
    let store = orchestrator.store();

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    tokio::spawn(orchestrator.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let router = build_router(AppState { store });
    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(
        addr,
        refresh = ?cfg.refresh_interval,
        data_sources = cfg.data_sources.len(),
        "starting server"
    );

    let mut graceful_rx = shutdown_rx.clone();
    let mut drain_rx = shutdown_rx;
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.changed().await;
        })
        .into_future();

    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        } => {
            tracing::warn!("shutdown drain timed out after 5s");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagramKind;

    #[tokio::test]
    async fn test_health_transitions() {
        let store = Arc::new(DiagramStore::new());
        let state = AppState {
            store: store.clone(),
        };

        let response = handle_health(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        store.publish(vec![DiagramArtifact {
            id: "x".to_string(),
            title: "x".to_string(),
            kind: DiagramKind::Markdown,
            content: "*empty*".to_string(),
        }]);

        let response = handle_health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_diagrams_response_shape() {
        let store = Arc::new(DiagramStore::new());
        store.publish(vec![DiagramArtifact {
            id: "security".to_string(),
            title: "Security Matrix".to_string(),
            kind: DiagramKind::Table,
            content: "[]".to_string(),
        }]);

        let Json(resp) = handle_diagrams(State(AppState { store })).await;
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["diagrams"][0]["id"], "security");
        assert_eq!(value["diagrams"][0]["type"], "table");
    }
}
