//! Upload orchestration and its collaborators.

pub mod memory_backend;
pub mod part_planner;
pub mod s3_backend;
pub mod storage_backend;
pub mod upload_coordinator;
pub mod upload_repository;
