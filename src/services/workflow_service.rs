use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::dto::workflow_dto::OnboardingPayload;
use crate::error::Result;
use crate::models::onboarding::{OnboardingRun, OnboardingStep};
use crate::utils::validation::normalize_email;

pub(crate) const RUN_COLUMNS: &str = "id, email, full_name, stage, user_state, wake_at, attempts, \
     last_error, locked_until, completed_cycles, cancelled_at, failed_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggeredRun {
    pub run_id: Uuid,
    /// `false` when a live run already existed for the email.
    pub created: bool,
}

/// Explicit handle for triggering and cancelling onboarding runs.
#[derive(Clone)]
pub struct WorkflowClient {
    pool: PgPool,
}

impl WorkflowClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Starts a run due immediately. Triggering again while a run is live
    /// returns the existing run. The email is normalized before use.
    pub async fn trigger_onboarding(&self, payload: &OnboardingPayload) -> Result<TriggeredRun> {
        let email = normalize_email(&payload.email);
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO onboarding_runs (email, full_name, stage, wake_at)
            VALUES ($1, $2, 'new-signup', NOW())
            ON CONFLICT (email) WHERE cancelled_at IS NULL AND failed_at IS NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&email)
        .bind(payload.full_name.trim())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(run_id) = inserted {
            info!(%run_id, %email, "onboarding run started");
            return Ok(TriggeredRun {
                run_id,
                created: true,
            });
        }

        let run_id: Uuid = sqlx::query_scalar(
            r#"
            SELECT id FROM onboarding_runs
            WHERE email = $1 AND cancelled_at IS NULL AND failed_at IS NULL
            "#,
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?;
        info!(%run_id, %email, "onboarding run already live");
        Ok(TriggeredRun {
            run_id,
            created: false,
        })
    }

    pub async fn cancel_onboarding(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        let result = sqlx::query(
            r#"
            UPDATE onboarding_runs
            SET cancelled_at = NOW(), updated_at = NOW()
            WHERE email = $1 AND cancelled_at IS NULL AND failed_at IS NULL
            "#,
        )
        .bind(&email)
        .execute(&self.pool)
        .await?;

        let cancelled = result.rows_affected() > 0;
        if cancelled {
            info!(%email, "onboarding run cancelled");
        }
        Ok(cancelled)
    }

    /// Latest run for the email with its step log, oldest step first.
    pub async fn onboarding_status(
        &self,
        email: &str,
    ) -> Result<Option<(OnboardingRun, Vec<OnboardingStep>)>> {
        let email = normalize_email(email);
        let run = sqlx::query_as::<_, OnboardingRun>(&format!(
            "SELECT {} FROM onboarding_runs WHERE email = $1 ORDER BY created_at DESC LIMIT 1",
            RUN_COLUMNS
        ))
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(run) = run else { return Ok(None) };

        let steps = sqlx::query_as::<_, OnboardingStep>(
            r#"
            SELECT id, run_id, step_name, from_stage, to_stage, user_state, created_at
            FROM onboarding_steps
            WHERE run_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(run.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((run, steps)))
    }
}
