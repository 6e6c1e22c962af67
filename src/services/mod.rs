pub mod email_service;
pub mod engine_service;
pub mod onboarding_service;
pub mod user_service;
pub mod workflow_service;
