//! Waypoint domain core.
//!
//! Pure types and logic shared by the store, worker, API and client crates.
//! Nothing in here touches the database or the network.

pub mod dispatch;
pub mod error;
pub mod job_events;
pub mod progress;
pub mod types;
pub mod validation;
pub mod workflow;
