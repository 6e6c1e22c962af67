use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::onboarding::{OnboardingRun, OnboardingStep};

/// Captured once at account creation and carried by the run for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPayload {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub run_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingStatusResponse {
    pub run: OnboardingRun,
    pub steps: Vec<OnboardingStep>,
}
