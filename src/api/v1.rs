use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    risk::RiskProfile,
    service::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/networks", post(build_network))
        .route("/networks/:id", get(get_network).delete(delete_network))
        .route("/networks/:id/risk", post(compute_risk))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Items stay raw so one bad asset is skipped rather than rejecting the batch
#[derive(Debug, Deserialize)]
pub struct BuildNetworkRequest {
    pub assets: Vec<serde_json::Value>,
}

/// POST /api/v1/networks - build, enrich and orient a network
pub async fn build_network(
    State(st): State<AppState>,
    payload: Result<Json<BuildNetworkRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let started = Instant::now();

    // Dropping the request (client gone) cancels the pipeline.
    let cancel = st.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    tracing::info!(assets = req.assets.len(), "building network");
    let network = st.service.build_network_from_json(&req.assets, &cancel).await?;

    Ok(ApiResponse::success(network.as_ref())
        .with_duration(started.elapsed().as_millis() as u64)
        .into_response())
}

/// GET /api/v1/networks/:id
pub async fn get_network(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let network = st
        .service
        .network(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("network {id}")))?;
    Ok(ApiResponse::success(network.as_ref()).into_response())
}

/// DELETE /api/v1/networks/:id
pub async fn delete_network(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    st.service.remove_network(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/networks/:id/risk - flow accumulation for a built network
pub async fn compute_risk(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // No body means the default profile; a body that is present must parse.
    let profile = if body.iter().all(u8::is_ascii_whitespace) {
        RiskProfile::default()
    } else {
        let Json(profile) = Json::<RiskProfile>::from_bytes(&body)?;
        profile
    };
    profile.validate()?;
    let started = Instant::now();

    let cancel = st.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let result = st.service.compute_risk(id, profile, &cancel).await?;
    Ok(ApiResponse::success(result)
        .with_duration(started.elapsed().as_millis() as u64)
        .into_response())
}
