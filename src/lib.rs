pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::services::{
    email_service::EmailJsMailer,
    engine_service::WorkflowEngine,
    onboarding_service::{OnboardingTiming, OnboardingWorkflow},
    user_service::UserService,
    workflow_service::WorkflowClient,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub user_service: UserService,
    pub workflow_client: WorkflowClient,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let user_service = UserService::new(pool.clone());
        let workflow_client = WorkflowClient::new(pool.clone());

        Self {
            pool,
            config: Arc::new(config),
            user_service,
            workflow_client,
        }
    }

    /// Engine wired to EmailJS and the users table.
    pub fn onboarding_engine(&self) -> Result<WorkflowEngine> {
        let mailer = EmailJsMailer::new(&self.config)?;
        let workflow = OnboardingWorkflow::new(
            Arc::new(mailer),
            Arc::new(self.user_service.clone()),
            OnboardingTiming::from_config(&self.config),
        );
        Ok(WorkflowEngine::new(
            self.pool.clone(),
            workflow,
            self.config.onboarding_max_attempts,
        ))
    }
}
