//! Onboarding notifier: the per-user timeline of delayed activity checks and
//! follow-up emails.
//!
//! [`OnboardingWorkflow::advance`] executes exactly one step for the stage a
//! run is in and returns the [`Checkpoint`] the engine commits. Waiting stages
//! are only advanced once their `wake_at` has passed, so advancing them has no
//! side effect beyond moving on to the activity check.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::{Config, MAX_ONBOARDING_DELAY_SECS};
use crate::error::{Error, Result};
use crate::models::onboarding::{OnboardingRun, OnboardingStage, UserState};
use crate::models::user::UserActivity;
use crate::services::email_service::{EmailMessage, Mailer};
use crate::services::user_service::UserDirectory;

pub const STEP_NEW_SIGNUP: &str = "new-signup";
pub const STEP_WAIT_3_DAYS: &str = "wait-for-3-days";
pub const STEP_CHECK_USER_STATE: &str = "check-user-state";
pub const STEP_SEND_NON_ACTIVE: &str = "send-email-non-active";
pub const STEP_SEND_ACTIVE: &str = "send-email-active";
pub const STEP_WAIT_1_MONTH: &str = "wait-for-1-month";

const ONE_DAY_SECS: i64 = 60 * 60 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingTiming {
    /// Sleep between the welcome email and the first activity check.
    pub first_check_delay: Duration,
    /// Sleep between a follow-up email and the next activity check.
    pub recheck_interval: Duration,
    /// Exclusive lower bound of the inactivity window.
    pub inactive_after: Duration,
    /// Exclusive upper bound of the inactivity window.
    pub inactive_until: Duration,
}

impl Default for OnboardingTiming {
    fn default() -> Self {
        Self {
            first_check_delay: Duration::seconds(3 * ONE_DAY_SECS),
            recheck_interval: Duration::seconds(30 * ONE_DAY_SECS),
            inactive_after: Duration::seconds(3 * ONE_DAY_SECS),
            inactive_until: Duration::seconds(30 * ONE_DAY_SECS),
        }
    }
}

impl OnboardingTiming {
    /// Delays are clamped to `0..=MAX_ONBOARDING_DELAY_SECS`.
    pub fn from_config(config: &Config) -> Self {
        let delay = |secs: i64| Duration::seconds(secs.clamp(0, MAX_ONBOARDING_DELAY_SECS));
        Self {
            first_check_delay: delay(config.onboarding_first_check_delay_secs),
            recheck_interval: delay(config.onboarding_recheck_interval_secs),
            ..Self::default()
        }
    }
}

fn wake_after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(delay).ok_or_else(|| {
        Error::Internal(format!("onboarding wake-up out of range: {} + {}", now, delay))
    })
}

/// Classifies a user for the follow-up email.
///
/// Only `inactive_after < elapsed < inactive_until` counts as non-active; users
/// idle longer than the window fall back to active. A record without a last
/// activity date counts from the Unix epoch.
pub fn classify_activity(
    record: Option<&UserActivity>,
    now: DateTime<Utc>,
    timing: &OnboardingTiming,
) -> UserState {
    let Some(record) = record else {
        return UserState::NonActive;
    };

    let last_activity = record.last_activity_date.unwrap_or_default();
    let elapsed = now - last_activity;

    if elapsed < timing.inactive_until && elapsed > timing.inactive_after {
        return UserState::NonActive;
    }
    UserState::Active
}

/// Outcome of one committed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub step: &'static str,
    pub from: OnboardingStage,
    pub next: OnboardingStage,
    pub wake_at: DateTime<Utc>,
    pub user_state: Option<UserState>,
    pub cycle_completed: bool,
}

pub fn welcome_email(email: &str, full_name: &str) -> EmailMessage {
    onboarding_email("New Account Created", email, full_name, "Welcome to our service!")
}

pub fn non_active_email(email: &str, full_name: &str) -> EmailMessage {
    onboarding_email("We miss you!", email, full_name, "Come back to our library!")
}

pub fn active_email(email: &str, full_name: &str) -> EmailMessage {
    onboarding_email("Welcome back!", email, full_name, "We truly missed you!")
}

fn onboarding_email(subject: &str, email: &str, full_name: &str, message: &str) -> EmailMessage {
    EmailMessage {
        subject: subject.to_string(),
        to_email: email.to_string(),
        from_name: full_name.to_string(),
        message: message.to_string(),
    }
}

#[derive(Clone)]
pub struct OnboardingWorkflow {
    mailer: Arc<dyn Mailer>,
    users: Arc<dyn UserDirectory>,
    timing: OnboardingTiming,
}

impl OnboardingWorkflow {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        users: Arc<dyn UserDirectory>,
        timing: OnboardingTiming,
    ) -> Self {
        Self {
            mailer,
            users,
            timing,
        }
    }

    pub async fn get_user_state(&self, email: &str, now: DateTime<Utc>) -> Result<UserState> {
        let record = self.users.find_activity(email).await?;
        Ok(classify_activity(record.as_ref(), now, &self.timing))
    }

    pub async fn advance(&self, run: &OnboardingRun, now: DateTime<Utc>) -> Result<Checkpoint> {
        let from = run.stage()?;
        let checkpoint = match from {
            OnboardingStage::NewSignup => {
                let wake_at = wake_after(now, self.timing.first_check_delay)?;
                self.mailer
                    .send(&welcome_email(&run.email, &run.full_name))
                    .await?;
                Checkpoint {
                    step: STEP_NEW_SIGNUP,
                    from,
                    next: OnboardingStage::Waiting3Days,
                    wake_at,
                    user_state: None,
                    cycle_completed: false,
                }
            }
            OnboardingStage::Waiting3Days | OnboardingStage::Waiting1Month => Checkpoint {
                step: if from == OnboardingStage::Waiting3Days {
                    STEP_WAIT_3_DAYS
                } else {
                    STEP_WAIT_1_MONTH
                },
                from,
                next: OnboardingStage::CheckingState,
                wake_at: now,
                user_state: None,
                cycle_completed: false,
            },
            OnboardingStage::CheckingState => {
                let state = self.get_user_state(&run.email, now).await?;
                let next = match state {
                    UserState::NonActive => OnboardingStage::NonActive,
                    UserState::Active => OnboardingStage::Active,
                };
                Checkpoint {
                    step: STEP_CHECK_USER_STATE,
                    from,
                    next,
                    wake_at: now,
                    user_state: Some(state),
                    cycle_completed: false,
                }
            }
            OnboardingStage::NonActive | OnboardingStage::Active => {
                let (step, message) = if from == OnboardingStage::NonActive {
                    (STEP_SEND_NON_ACTIVE, non_active_email(&run.email, &run.full_name))
                } else {
                    (STEP_SEND_ACTIVE, active_email(&run.email, &run.full_name))
                };
                let wake_at = wake_after(now, self.timing.recheck_interval)?;
                self.mailer.send(&message).await?;
                Checkpoint {
                    step,
                    from,
                    next: OnboardingStage::Waiting1Month,
                    wake_at,
                    user_state: None,
                    cycle_completed: true,
                }
            }
        };

        tracing::debug!(
            run_id = %run.id,
            step = checkpoint.step,
            next = %checkpoint.next,
            "onboarding step executed"
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email_service::MockMailer;
    use crate::services::user_service::MockUserDirectory;
    use chrono::TimeZone;
    use mockall::Sequence;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn active_since(days: i64) -> UserActivity {
        UserActivity {
            last_activity_date: Some(now() - Duration::days(days)),
        }
    }

    fn run_in(stage: OnboardingStage) -> OnboardingRun {
        OnboardingRun {
            id: Uuid::new_v4(),
            email: "a@b.com".into(),
            full_name: "A B".into(),
            stage: stage.as_str().to_string(),
            user_state: None,
            wake_at: now(),
            attempts: 0,
            last_error: None,
            locked_until: None,
            completed_cycles: 0,
            cancelled_at: None,
            failed_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn workflow(mailer: MockMailer, users: MockUserDirectory) -> OnboardingWorkflow {
        OnboardingWorkflow::new(Arc::new(mailer), Arc::new(users), OnboardingTiming::default())
    }

    #[test]
    fn missing_user_is_non_active() {
        let state = classify_activity(None, now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::NonActive);
    }

    #[test]
    fn exactly_three_days_idle_is_active() {
        let state = classify_activity(Some(&active_since(3)), now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::Active);
    }

    #[test]
    fn exactly_thirty_days_idle_is_active() {
        let state = classify_activity(Some(&active_since(30)), now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::Active);
    }

    #[test]
    fn ten_days_idle_is_non_active() {
        let state = classify_activity(Some(&active_since(10)), now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::NonActive);
    }

    #[test]
    fn forty_days_idle_falls_back_to_active() {
        let state = classify_activity(Some(&active_since(40)), now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::Active);
    }

    #[test]
    fn just_inside_the_window_is_non_active() {
        let timing = OnboardingTiming::default();
        let just_after = UserActivity {
            last_activity_date: Some(now() - Duration::days(3) - Duration::seconds(1)),
        };
        let just_before = UserActivity {
            last_activity_date: Some(now() - Duration::days(30) + Duration::seconds(1)),
        };
        assert_eq!(classify_activity(Some(&just_after), now(), &timing), UserState::NonActive);
        assert_eq!(classify_activity(Some(&just_before), now(), &timing), UserState::NonActive);
    }

    #[test]
    fn missing_activity_date_counts_from_epoch() {
        let record = UserActivity {
            last_activity_date: None,
        };
        let state = classify_activity(Some(&record), now(), &OnboardingTiming::default());
        assert_eq!(state, UserState::Active);
    }

    #[tokio::test]
    async fn fresh_signup_sends_one_welcome_email_and_sleeps_three_days() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|m: &EmailMessage| {
                m.to_email == "a@b.com"
                    && m.subject == "New Account Created"
                    && m.from_name == "A B"
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut users = MockUserDirectory::new();
        users.expect_find_activity().never();

        let workflow = workflow(mailer, users);
        let cp = workflow
            .advance(&run_in(OnboardingStage::NewSignup), now())
            .await
            .unwrap();

        assert_eq!(cp.step, STEP_NEW_SIGNUP);
        assert_eq!(cp.next, OnboardingStage::Waiting3Days);
        assert_eq!(cp.wake_at, now() + Duration::days(3));
        assert!(!cp.cycle_completed);
    }

    #[tokio::test]
    async fn waking_up_moves_to_check_without_side_effects() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().never();
        let mut users = MockUserDirectory::new();
        users.expect_find_activity().never();
        let workflow = workflow(mailer, users);

        let first = workflow
            .advance(&run_in(OnboardingStage::Waiting3Days), now())
            .await
            .unwrap();
        assert_eq!(first.step, STEP_WAIT_3_DAYS);
        assert_eq!(first.next, OnboardingStage::CheckingState);

        let later = workflow
            .advance(&run_in(OnboardingStage::Waiting1Month), now())
            .await
            .unwrap();
        assert_eq!(later.step, STEP_WAIT_1_MONTH);
        assert_eq!(later.next, OnboardingStage::CheckingState);
        assert_eq!(later.wake_at, now());
    }

    #[tokio::test]
    async fn check_routes_idle_user_to_non_active_branch() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().never();
        let mut users = MockUserDirectory::new();
        users
            .expect_find_activity()
            .withf(|email: &str| email == "a@b.com")
            .times(1)
            .returning(|_| Ok(Some(active_since(10))));

        let cp = workflow(mailer, users)
            .advance(&run_in(OnboardingStage::CheckingState), now())
            .await
            .unwrap();
        assert_eq!(cp.step, STEP_CHECK_USER_STATE);
        assert_eq!(cp.user_state, Some(UserState::NonActive));
        assert_eq!(cp.next, OnboardingStage::NonActive);
    }

    #[tokio::test]
    async fn each_branch_sends_its_own_email_then_sleeps_a_month() {
        let mut mailer = MockMailer::new();
        let mut seq = Sequence::new();
        mailer
            .expect_send()
            .withf(|m: &EmailMessage| m.subject == "We miss you!")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mailer
            .expect_send()
            .withf(|m: &EmailMessage| m.subject == "Welcome back!")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let workflow = workflow(mailer, MockUserDirectory::new());

        let missed = workflow
            .advance(&run_in(OnboardingStage::NonActive), now())
            .await
            .unwrap();
        assert_eq!(missed.step, STEP_SEND_NON_ACTIVE);
        assert_eq!(missed.next, OnboardingStage::Waiting1Month);
        assert_eq!(missed.wake_at, now() + Duration::days(30));
        assert!(missed.cycle_completed);

        let back = workflow
            .advance(&run_in(OnboardingStage::Active), now())
            .await
            .unwrap();
        assert_eq!(back.step, STEP_SEND_ACTIVE);
        assert_eq!(back.next, OnboardingStage::Waiting1Month);
    }

    #[tokio::test]
    async fn failed_send_surfaces_error_for_retry() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Err(Error::Email("status 503".into())));
        let result = workflow(mailer, MockUserDirectory::new())
            .advance(&run_in(OnboardingStage::NewSignup), now())
            .await;
        assert!(matches!(result, Err(Error::Email(_))));
    }

    #[tokio::test]
    async fn corrupt_stage_is_an_error() {
        let mut run = run_in(OnboardingStage::NewSignup);
        run.stage = "paused".into();
        let result = workflow(MockMailer::new(), MockUserDirectory::new())
            .advance(&run, now())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_wake_up_fails_before_any_email() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().never();
        let timing = OnboardingTiming {
            first_check_delay: Duration::days(365 * 1_000_000),
            recheck_interval: Duration::days(365 * 1_000_000),
            ..OnboardingTiming::default()
        };
        let workflow =
            OnboardingWorkflow::new(Arc::new(mailer), Arc::new(MockUserDirectory::new()), timing);

        let welcome = workflow
            .advance(&run_in(OnboardingStage::NewSignup), now())
            .await;
        assert!(matches!(welcome, Err(Error::Internal(_))));

        let follow_up = workflow
            .advance(&run_in(OnboardingStage::Active), now())
            .await;
        assert!(matches!(follow_up, Err(Error::Internal(_))));
    }

    #[test]
    fn timing_from_config_clamps_out_of_range_delays() {
        let config = Config {
            server_address: "127.0.0.1:0".into(),
            database_url: "postgres://localhost/atlas".into(),
            jwt_secret: "s3cret".into(),
            jwt_ttl_hours: 1,
            workflow_token: "token".into(),
            emailjs_service_id: "service".into(),
            emailjs_template_id: "template".into(),
            emailjs_public_key: "public".into(),
            emailjs_private_key: None,
            emailjs_api_url: crate::config::DEFAULT_EMAILJS_API_URL.into(),
            auth_rate_limit: 5,
            auth_rate_window_secs: 60,
            onboarding_first_check_delay_secs: 10_000_000_000_000_000,
            onboarding_recheck_interval_secs: -5,
            onboarding_poll_interval_ms: 1000,
            onboarding_max_attempts: 5,
            cors_origin: None,
        };
        let timing = OnboardingTiming::from_config(&config);
        assert_eq!(
            timing.first_check_delay,
            Duration::seconds(MAX_ONBOARDING_DELAY_SECS)
        );
        assert_eq!(timing.recheck_interval, Duration::zero());
    }

    #[test]
    fn configured_delays_override_sleeps_but_not_window() {
        let timing = OnboardingTiming {
            first_check_delay: Duration::seconds(5),
            recheck_interval: Duration::seconds(10),
            ..OnboardingTiming::default()
        };
        assert_eq!(timing.inactive_after, Duration::days(3));
        assert_eq!(timing.inactive_until, Duration::days(30));
    }
}
