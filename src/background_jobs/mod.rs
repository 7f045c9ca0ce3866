//! Background job scheduling and execution.
//!
//! Startup restoration and periodic retention cleanup run here, outside
//! the ingestion path.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
