use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::dto::workflow_dto::{
    CancelResponse, OnboardingPayload, OnboardingStatusResponse, TriggerResponse,
};
use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::utils::validation::normalize_email;
use crate::AppState;

pub const WORKFLOW_TOKEN_HEADER: &str = "x-workflow-token";

#[axum::debug_handler]
pub async fn trigger_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OnboardingPayload>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    verify_workflow_token(&state, &headers)?;
    payload.validate()?;

    let run = state.workflow_client.trigger_onboarding(&payload).await?;

    let (status, label) = if run.created {
        (StatusCode::ACCEPTED, "started")
    } else {
        (StatusCode::OK, "existing")
    };
    Ok((
        status,
        Json(TriggerResponse {
            run_id: run.run_id,
            status: label.to_string(),
        }),
    ))
}

#[axum::debug_handler]
pub async fn get_onboarding_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(email): Path<String>,
) -> Result<Json<OnboardingStatusResponse>> {
    verify_workflow_token(&state, &headers)?;
    let email = normalize_email(&email);

    let Some((run, steps)) = state.workflow_client.onboarding_status(&email).await? else {
        return Err(Error::NotFound(format!("No onboarding run for {}", email)));
    };
    Ok(Json(OnboardingStatusResponse { run, steps }))
}

#[axum::debug_handler]
pub async fn cancel_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(email): Path<String>,
) -> Result<Json<CancelResponse>> {
    verify_workflow_token(&state, &headers)?;
    let cancelled = state
        .workflow_client
        .cancel_onboarding(&email)
        .await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// Lets a signed-in user stop their own onboarding emails.
#[axum::debug_handler]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CancelResponse>> {
    let cancelled = state
        .workflow_client
        .cancel_onboarding(&claims.email)
        .await?;
    Ok(Json(CancelResponse { cancelled }))
}

fn verify_workflow_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(token_hdr) = headers.get(WORKFLOW_TOKEN_HEADER) else {
        return Err(Error::Unauthorized("missing_workflow_token".into()));
    };
    let provided = token_hdr
        .to_str()
        .map_err(|_| Error::Unauthorized("invalid_workflow_token_header".into()))?;
    let expected = &state.config.workflow_token;
    if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid_workflow_token".into()))
    }
}
