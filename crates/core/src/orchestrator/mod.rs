//! Pipeline orchestrator.
//!
//! Workers lease deliveries from the `analysis` and `assets` queues and run
//! each job's stage plan:
//! - Batches run in order; stages within a batch run concurrently
//! - Every stage publishes its artifact before the job moves on
//! - Usage is recorded once, in the same transaction as completion

mod config;
mod runner;
mod types;
mod worker;

pub use config::OrchestratorConfig;
pub use runner::Orchestrator;
pub use types::{JobOutcome, OrchestratorError, OrchestratorStatus};
pub use worker::PipelineWorkers;
