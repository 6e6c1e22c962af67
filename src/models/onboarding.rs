use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::Error;

/// Position of a run on its onboarding timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnboardingStage {
    #[serde(rename = "new-signup")]
    NewSignup,
    #[serde(rename = "waiting-3-days")]
    Waiting3Days,
    #[serde(rename = "checking-state")]
    CheckingState,
    #[serde(rename = "non-active")]
    NonActive,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "waiting-1-month")]
    Waiting1Month,
}

impl OnboardingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStage::NewSignup => "new-signup",
            OnboardingStage::Waiting3Days => "waiting-3-days",
            OnboardingStage::CheckingState => "checking-state",
            OnboardingStage::NonActive => "non-active",
            OnboardingStage::Active => "active",
            OnboardingStage::Waiting1Month => "waiting-1-month",
        }
    }
}

impl fmt::Display for OnboardingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardingStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new-signup" => Ok(OnboardingStage::NewSignup),
            "waiting-3-days" => Ok(OnboardingStage::Waiting3Days),
            "checking-state" => Ok(OnboardingStage::CheckingState),
            "non-active" => Ok(OnboardingStage::NonActive),
            "active" => Ok(OnboardingStage::Active),
            "waiting-1-month" => Ok(OnboardingStage::Waiting1Month),
            other => Err(Error::Internal(format!("unknown onboarding stage: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserState {
    NonActive,
    Active,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::NonActive => "non-active",
            UserState::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRun {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub stage: String,
    pub user_state: Option<String>,
    pub wake_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub completed_cycles: i32,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingRun {
    pub fn stage(&self) -> Result<OnboardingStage, Error> {
        self.stage.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStep {
    pub id: i64,
    pub run_id: Uuid,
    pub step_name: String,
    pub from_stage: String,
    pub to_stage: String,
    pub user_state: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_survive_the_database_column() {
        let stages = [
            OnboardingStage::NewSignup,
            OnboardingStage::Waiting3Days,
            OnboardingStage::CheckingState,
            OnboardingStage::NonActive,
            OnboardingStage::Active,
            OnboardingStage::Waiting1Month,
        ];
        for stage in stages {
            assert_eq!(stage.as_str().parse::<OnboardingStage>().unwrap(), stage);
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json.as_str(), Some(stage.as_str()));
        }
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!("sleeping".parse::<OnboardingStage>().is_err());
    }

    #[test]
    fn user_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(UserState::NonActive).unwrap(),
            serde_json::json!("non-active")
        );
    }
}
