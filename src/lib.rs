//! playlog
//!
//! Continuously ingests Spotify listening history into a normalized,
//! deduplicated scrobble store, and enriches the resulting catalog from
//! MusicBrainz and the Cover Art Archive.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::{AppConfig, ConfigError, Environment};
pub use error::{AppError, ErrorResponse, Result};

use config::AuthSettings;
use services::{CatalogService, JobQueueService};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub auth: Arc<AuthSettings>,
    pub catalog: Arc<CatalogService>,
    pub queue: Arc<JobQueueService>,
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        // Dashboard reads
        .route("/now-playing", get(handlers::dashboard::now_playing))
        .route("/recently-played", get(handlers::dashboard::recently_played))
        .route("/stats/top-groups", get(handlers::dashboard::top_groups))
        .route(
            "/stats/top-solo-artists",
            get(handlers::dashboard::top_solo_artists),
        )
        .route("/artists/:artist_id", get(handlers::dashboard::artist_detail))
        // Manual enrichment triggers
        .route("/sync/artists", post(handlers::sync::sync_artists_bulk))
        .route("/sync/artists/:artist_id", post(handlers::sync::sync_artist))
        .route("/sync/albums", post(handlers::sync::sync_albums_bulk))
        .route("/sync/albums/:album_id", post(handlers::sync::sync_album))
        .route("/sync/tracks", post(handlers::sync::sync_tracks_bulk))
        .route("/sync/tracks/:track_id", post(handlers::sync::sync_track))
        // Job inspection
        .route("/jobs", get(handlers::sync::queue_stats))
        .route("/jobs/:job_id", get(handlers::sync::get_job))
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint with a database connectivity probe.
async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    database::health_check(&state.db_pool)
        .await
        .map_err(AppError::from)?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
