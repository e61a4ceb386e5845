pub mod config;
pub mod error;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use recall_sync::IdentityAuthority;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AuthorityConfig;
use crate::error::{ApiError, Result};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<IdentityAuthority>,
    snapshot: Option<PathBuf>,
    persist_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// State for an authority that lives in memory only.
    pub fn new(authority: Arc<IdentityAuthority>) -> Self {
        Self {
            authority,
            snapshot: None,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// State that saves the authority to `path` after every mutation.
    pub fn with_snapshot(authority: Arc<IdentityAuthority>, path: PathBuf) -> Self {
        Self {
            snapshot: Some(path),
            ..Self::new(authority)
        }
    }

    /// Write the snapshot, if one is configured. Saves are serialised so an
    /// older state never replaces a newer one on disk.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.snapshot.clone() else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let authority = Arc::clone(&self.authority);
        tokio::task::spawn_blocking(move || authority.save_snapshot(&path))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??;
        Ok(())
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        // Device routes
        .route("/api/device/status", get(routes::device::status))
        // Sync routes
        .route("/api/sync/upload", post(routes::sync::upload))
        .route("/api/sync/push-reviews", post(routes::sync::push_reviews))
        .route("/api/sync/pull", post(routes::sync::pull))
        .route("/api/sync/confirm-delete", post(routes::sync::confirm_delete))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/device/register", post(routes::device::register))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    let config = AuthorityConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = match &config.snapshot {
        Some(path) => {
            tracing::info!("Loading authority snapshot from {}", path.display());
            let authority = IdentityAuthority::load_snapshot(path)?;
            AppState::with_snapshot(Arc::new(authority), path.clone())
        }
        None => {
            tracing::warn!("AUTHORITY_SNAPSHOT not set, card identities will not survive a restart");
            AppState::new(Arc::new(IdentityAuthority::new()))
        }
    };

    let app = router(state);
    let addr = config.addr();

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
