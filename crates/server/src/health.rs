use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use querydesk_db::DbPool;
use serde::Serialize;
use tracing::error;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "querydesk-server runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(payload))
}

async fn database_check(db_pool: &DbPool) -> HealthCheck {
    match sqlx::query("SELECT 1").execute(db_pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database reachable".to_string() },
        Err(err) => {
            error!(event_name = "system.health.database_error", error = %err, "health probe failed");
            HealthCheck { status: "unavailable", detail: err.to_string() }
        }
    }
}
