//! Handle-addressed registration endpoints.

use super::types::*;
use super::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use onboarding_core::{FlowHandle, FlowStatus};
use tracing::info;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_flows: state.repository.count_active().await,
        persistent: state.repository.is_persistent(),
    })
}

/// Start a flow and hand back its handle.
pub async fn start_registration(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let flow = state.machine.start(request.kind, request.join_token());
    let status = FlowStatus::from(&flow);
    let handle = state.repository.create(flow).await?;

    Ok((StatusCode::CREATED, Json(StartResponse { handle, status })))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = state.repository.bind(FlowHandle::new(handle));
    Ok(Json(state.machine.status(&store).await?))
}

pub async fn submit_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = state.repository.bind(request.handle);
    Ok(Json(state.machine.submit_profile(&store, request.profile).await?))
}

pub async fn verify_phone(
    State(state): State<AppState>,
    Json(request): Json<CodeRequest>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = state.repository.bind(request.handle);
    Ok(Json(state.machine.submit_phone_code(&store, &request.code).await?))
}

pub async fn resend_code(
    State(state): State<AppState>,
    Json(request): Json<HandleRequest>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = state.repository.bind(request.handle);
    Ok(Json(state.machine.resend_code(&store).await?))
}

pub async fn set_pin(
    State(state): State<AppState>,
    Json(request): Json<PinRequest>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = state.repository.bind(request.handle);
    Ok(Json(state.machine.submit_pin(&store, &request.pin).await?))
}

/// Confirm the PIN. A match finalizes the flow and returns the new account.
pub async fn confirm_pin(
    State(state): State<AppState>,
    Json(request): Json<PinRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let store = state.repository.bind(request.handle);
    let provisioned = state
        .machine
        .submit_pin_confirmation(&store, &request.pin)
        .await?;

    info!(account_id = %provisioned.account.id, "Registration completed via API");

    Ok((StatusCode::CREATED, Json(provisioned.into())))
}
