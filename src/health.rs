use crate::db::DbPool;
use crate::dispatcher::RelayCommand;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub struct HealthState {
    pub db: DbPool,
    pub tx_cmd: mpsc::Sender<RelayCommand>,
}

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub session: String,
    pub channel: Option<String>,
    pub relay_enabled: bool,
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/readyz", get(readiness))
        .with_state(state)
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

pub async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let mut db_ok = true;
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&state.db).await {
        tracing::error!("Readiness check: DB error: {}", e);
        db_ok = false;
    }

    let (resp, rx) = oneshot::channel();
    let status = if state.tx_cmd.send(RelayCommand::Status { resp }).await.is_ok() {
        // The dispatcher may be mid-completion; do not hang the probe on it.
        tokio::time::timeout(Duration::from_secs(2), rx).await.ok().and_then(|r| r.ok())
    } else {
        None
    };

    let session = match &status {
        None => "unavailable",
        Some(s) if s.identity.is_none() => "no_session",
        Some(s) if s.active_credential.is_none() => "no_credential",
        Some(_) => "ok",
    };
    let ready = db_ok && session == "ok";

    (
        if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unready" }.to_string(),
            database: if db_ok { "ok" } else { "error" }.to_string(),
            session: session.to_string(),
            channel: status.as_ref().and_then(|s| s.channel.clone()),
            relay_enabled: status.as_ref().map(|s| s.enabled).unwrap_or(false),
        }),
    )
}
