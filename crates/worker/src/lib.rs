//! Background Worker and Submission Service.
//!
//! Jobs enter through [`submission::SubmissionService`], are handed to the
//! [`pool::WorkerPool`] (or found later by the [`dispatcher::JobDispatcher`]
//! poll), and executed by [`runner::JobRunner`], which claims the job and
//! drives its workflow with [`executor::drive`]. The
//! [`watchdog`] fails jobs whose worker stopped heartbeating.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod pool;
pub mod runner;
pub mod services;
pub mod submission;
pub mod watchdog;
pub mod workflows;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use pool::WorkerPool;
pub use runner::{Dispatch, JobRunner, RunOutcome};
pub use services::{shutdown_signal, WorkerServices};
pub use submission::SubmissionService;
