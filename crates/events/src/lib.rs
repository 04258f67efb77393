//! Waypoint progress channel plumbing.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`JobUpdate`]s.
//! - [`PgNotifier`]: publishes updates through Postgres `NOTIFY` so worker
//!   processes outside the API server reach its bus.
//! - [`PgRelay`]: `LISTEN`s on the notify channel and republishes onto a bus.
//! - [`Publisher`]: what a worker holds to announce changes, whichever of
//!   the two transports it runs next to.
//!
//! Updates are thin "row changed" signals. The job store stays the source
//! of truth; consumers re-read rows before acting on an update.

pub mod bus;
pub mod notify;

pub use bus::{EventBus, JobChange, JobUpdate, Publisher};
pub use notify::{PgNotifier, PgRelay, NOTIFY_CHANNEL};
