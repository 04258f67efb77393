//! Client for the Waypoint job API.
//!
//! [`WaypointApi`] wraps the REST endpoints. [`ProgressConsumer`] follows a
//! job to its outcome: it subscribes over the WebSocket, catches up from the
//! job snapshot, and falls back to polling when push is unavailable.

pub mod api;
pub mod consumer;
pub mod error;
pub mod reconnect;
pub mod wire;

pub use api::WaypointApi;
pub use consumer::{ConsumerConfig, JobRun, Observation, Outcome, ProgressConsumer};
pub use error::ClientError;
pub use reconnect::ReconnectConfig;
