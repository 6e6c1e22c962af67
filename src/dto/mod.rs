pub mod auth_dto;
pub mod workflow_dto;
