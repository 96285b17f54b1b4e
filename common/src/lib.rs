// Common library for batch job orchestration: job/step execution, job
// delegation and the chunk step handler contract

pub mod chunk;
pub mod config;
pub mod context;
pub mod errors;
pub mod job;
pub mod launch;
pub mod models;
pub mod repository;
pub mod step;
pub mod telemetry;
