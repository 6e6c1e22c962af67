use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use validator::Validate;

use crate::dto::auth_dto::{AuthResponse, SignInRequest, SignUpRequest};
use crate::dto::workflow_dto::OnboardingPayload;
use crate::error::{Error, Result};
use crate::models::user::NewUser;
use crate::utils::crypto::{hash_password, verify_password};
use crate::utils::token::issue_session_token;
use crate::utils::validation::normalize_email;
use crate::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[axum::debug_handler]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    let email = normalize_email(&req.email);

    if state.user_service.exists(&email).await? {
        tracing::info!(%email, "sign-up rejected, user already exists");
        return Err(Error::Conflict("User already exists".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .user_service
        .create(NewUser {
            full_name: req.full_name.trim().to_string(),
            email,
            password_hash,
            university_id: req.university_id,
            university_card: req.university_card,
        })
        .await?;
    tracing::info!(user_id = %user.id, email = %user.email, "user signed up");

    let payload = OnboardingPayload {
        email: user.email.clone(),
        full_name: user.full_name.clone(),
    };
    // The account stays valid even when onboarding could not be scheduled.
    if let Err(e) = state.workflow_client.trigger_onboarding(&payload).await {
        tracing::error!(error = ?e, email = %user.email, "failed to trigger onboarding workflow");
    }

    let token = issue_session_token(&user, &state.config.jwt_secret, state.config.jwt_ttl_hours)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User created successfully".to_string(),
            token: Some(token),
        }),
    ))
}

#[axum::debug_handler]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<AuthResponse>> {
    req.validate()?;
    let email = normalize_email(&req.email);

    let Some(user) = state.user_service.find_by_email(&email).await? else {
        return Err(Error::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };
    if !verify_password(&req.password, &user.password)? {
        tracing::info!(%email, "sign-in rejected, wrong password");
        return Err(Error::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    state.user_service.touch_activity(user.id, Utc::now()).await?;

    let token = issue_session_token(&user, &state.config.jwt_secret, state.config.jwt_ttl_hours)?;
    Ok(Json(AuthResponse {
        success: true,
        message: "Sign in successful".to_string(),
        token: Some(token),
    }))
}
