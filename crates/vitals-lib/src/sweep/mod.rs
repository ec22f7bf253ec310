//! Bulk retraining
//!
//! This module provides:
//! - Batch orchestrator training every known entity with bounded parallelism
//! - Sweep scheduler for the startup and periodic triggers

mod orchestrator;
mod scheduler;


pub use orchestrator::{
    BatchOrchestrator, SweepConfig, SweepReport, SweepSummary, DEFAULT_MAX_CONCURRENCY,
};
pub use scheduler::{
    shutdown_signal, SchedulerConfig, SweepRecord, SweepScheduler, DEFAULT_SWEEP_INTERVAL,
};
