//! Durable execution of onboarding runs on Postgres.
//!
//! A run is claimed by taking a lease on its row, advanced by one step, and
//! its checkpoint committed together with a step log entry. Sleeping is a
//! `wake_at` in the future; nothing holds a task while a run waits.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::onboarding::OnboardingRun;
use crate::services::onboarding_service::{Checkpoint, OnboardingWorkflow};
use crate::services::workflow_service::RUN_COLUMNS;

const LEASE_SECS: f64 = 300.0;
const MAX_BACKOFF_SECS: i64 = 3600;
const BASE_BACKOFF_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    RetryAt(DateTime<Utc>),
    DeadLetter,
}

/// `min(3600, 30 * 2^(attempts - 1))` seconds.
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = (attempts.max(1) - 1).min(16) as u32;
    let secs = BASE_BACKOFF_SECS
        .saturating_mul(2_i64.saturating_pow(exponent))
        .min(MAX_BACKOFF_SECS);
    Duration::seconds(secs)
}

/// `attempts` counts the failure being handled.
pub fn failure_action(attempts: i32, max_attempts: i32, now: DateTime<Utc>) -> FailureAction {
    if attempts >= max_attempts.max(1) {
        FailureAction::DeadLetter
    } else {
        FailureAction::RetryAt(now + retry_delay(attempts))
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    pool: PgPool,
    workflow: OnboardingWorkflow,
    max_attempts: i32,
}

impl WorkflowEngine {
    pub fn new(pool: PgPool, workflow: OnboardingWorkflow, max_attempts: i32) -> Self {
        Self {
            pool,
            workflow,
            max_attempts,
        }
    }

    /// Advances one due run. Returns `false` when nothing was due.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(run) = self.claim_due_run().await? else {
            return Ok(false);
        };

        let now = Utc::now();
        match self.workflow.advance(&run, now).await {
            Ok(checkpoint) => self.commit(&run, &checkpoint).await?,
            Err(e) => self.record_failure(&run, &e, now).await?,
        }
        Ok(true)
    }

    async fn claim_due_run(&self) -> Result<Option<OnboardingRun>> {
        let run = sqlx::query_as::<_, OnboardingRun>(&format!(
            r#"
            UPDATE onboarding_runs
            SET locked_until = NOW() + make_interval(secs => $1), updated_at = NOW()
            WHERE id = (
                SELECT id FROM onboarding_runs
                WHERE cancelled_at IS NULL AND failed_at IS NULL
                  AND wake_at <= NOW()
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY wake_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            RUN_COLUMNS
        ))
        .bind(LEASE_SECS)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    async fn commit(&self, run: &OnboardingRun, checkpoint: &Checkpoint) -> Result<()> {
        let user_state = checkpoint.user_state.map(|s| s.as_str());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE onboarding_runs
            SET stage = $2,
                user_state = COALESCE($3, user_state),
                wake_at = $4,
                attempts = 0,
                last_error = NULL,
                locked_until = NULL,
                completed_cycles = completed_cycles + $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(checkpoint.next.as_str())
        .bind(user_state)
        .bind(checkpoint.wake_at)
        .bind(if checkpoint.cycle_completed { 1_i32 } else { 0 })
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO onboarding_steps (run_id, step_name, from_stage, to_stage, user_state)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(checkpoint.step)
        .bind(checkpoint.from.as_str())
        .bind(checkpoint.next.as_str())
        .bind(user_state)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            run_id = %run.id,
            email = %run.email,
            step = checkpoint.step,
            next = %checkpoint.next,
            wake_at = %checkpoint.wake_at,
            "onboarding checkpoint committed"
        );
        Ok(())
    }

    async fn record_failure(&self, run: &OnboardingRun, err: &Error, now: DateTime<Utc>) -> Result<()> {
        let attempts = run.attempts + 1;
        let message = err.to_string();

        match failure_action(attempts, self.max_attempts, now) {
            FailureAction::RetryAt(wake_at) => {
                tracing::warn!(
                    run_id = %run.id,
                    stage = %run.stage,
                    attempts,
                    retry_at = %wake_at,
                    error = %message,
                    "onboarding step failed, retrying"
                );
                self.mark_failed_attempt(run.id, attempts, &message, Some(wake_at))
                    .await
            }
            FailureAction::DeadLetter => {
                tracing::error!(
                    run_id = %run.id,
                    email = %run.email,
                    stage = %run.stage,
                    attempts,
                    error = %message,
                    "onboarding run dead-lettered"
                );
                self.mark_failed_attempt(run.id, attempts, &message, None)
                    .await
            }
        }
    }

    /// `retry_at = None` dead-letters the run.
    async fn mark_failed_attempt(
        &self,
        id: Uuid,
        attempts: i32,
        message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE onboarding_runs
            SET attempts = $2,
                last_error = $3,
                wake_at = COALESCE($4, wake_at),
                failed_at = CASE WHEN $4::timestamptz IS NULL THEN NOW() ELSE NULL END,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(message)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
