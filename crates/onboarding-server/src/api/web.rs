//! Session-addressed registration endpoints. The flow lives in the caller's session
//! and is never exposed by handle.

use super::session_store::SessionFlowStore;
use super::types::*;
use super::AppState;
use crate::error::ApiError;
use axum::{extract::State, http::StatusCode, Json};
use onboarding_core::{FlowStatus, ProfileSubmission};
use tower_sessions::Session;
use tracing::info;

fn store(session: Session) -> SessionFlowStore {
    SessionFlowStore::new(session)
}

/// Start a flow in this session, replacing any earlier one.
pub async fn start(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<FlowStatus>), ApiError> {
    let flow = state.machine.start(request.kind, request.join_token());
    store(session).begin(&flow).await?;

    Ok((StatusCode::CREATED, Json(FlowStatus::from(&flow))))
}

pub async fn status(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<FlowStatus>, ApiError> {
    Ok(Json(state.machine.status(&store(session)).await?))
}

pub async fn submit_profile(
    State(state): State<AppState>,
    session: Session,
    Json(profile): Json<ProfileSubmission>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = store(session);
    Ok(Json(state.machine.submit_profile(&store, profile).await?))
}

pub async fn verify_phone(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<CodeBody>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = store(session);
    Ok(Json(state.machine.submit_phone_code(&store, &body.code).await?))
}

pub async fn resend_code(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<FlowStatus>, ApiError> {
    Ok(Json(state.machine.resend_code(&store(session)).await?))
}

pub async fn set_pin(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<PinBody>,
) -> Result<Json<FlowStatus>, ApiError> {
    let store = store(session);
    Ok(Json(state.machine.submit_pin(&store, &body.pin).await?))
}

pub async fn confirm_pin(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<PinBody>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let store = store(session);
    let provisioned = state
        .machine
        .submit_pin_confirmation(&store, &body.pin)
        .await?;

    info!(account_id = %provisioned.account.id, "Registration completed via web");
    Ok((StatusCode::CREATED, Json(provisioned.into())))
}
