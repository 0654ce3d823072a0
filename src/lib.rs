pub mod cache;
pub mod config;
pub mod github;
pub mod metrics;
pub mod querier;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use config::AppConfig;
use metrics::TeamReport;
use querier::MetricsQuerier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Optional merge-date range for a team stats query.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service for querying pull request metrics.
    pub querier: MetricsQuerier,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state, including the metrics querier.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let querier = MetricsQuerier::new(&config)?;
        Ok(Self { querier, config })
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/teams", get(list_teams))
        .route("/api/teams/{team}/stats", get(get_team_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "velocity-backend",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn list_teams(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.config.teams.keys().cloned().collect())
}

pub async fn get_team_stats(
    Path(team): Path<String>,
    Query(params): Query<StatsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TeamReport>, (StatusCode, String)> {
    let Some(members) = state.config.roster(&team) else {
        return Err((StatusCode::NOT_FOUND, format!("Unknown team: {team}")));
    };

    match state
        .querier
        .get_team_stats(&team, members, params.start_date, params.end_date)
        .await
    {
        Ok(report) => {
            tracing::debug!(team = %team, total_prs = report.metrics.total_prs, "Returning team stats");
            Ok(Json(report))
        }
        Err(e) => {
            tracing::error!("Failed to compute stats for {}: {}", team, e);

            // Rate limiting never reaches this point; the request layer
            // retries it internally.
            if let Some(octocrab::Error::GitHub { source, .. }) =
                e.downcast_ref::<octocrab::Error>()
            {
                if source.message.to_lowercase().contains("not found") {
                    return Err((
                        StatusCode::NOT_FOUND,
                        "Repository Not Found".to_string(),
                    ));
                }
            }

            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            ))
        }
    }
}
