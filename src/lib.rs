//! encore — offline-first listening tracker.
//!
//! Records which tracks a user actually listened to, keeps the facts
//! in a crash-surviving local queue until a remote event store
//! acknowledges them, and aggregates the accumulated history into
//! ranked listening statistics on demand.
//!
//! - [`event`]: the immutable play fact and the recording policy
//! - [`pending`]: the durable local queue
//! - [`namespace`]: unguessable per-user storage keys
//! - [`sync`] / [`remote`]: at-least-once delivery to the store
//! - [`store`] / [`server`]: the remote event store service
//! - [`stats`]: the pure aggregation engine
//! - [`tracker`]: the facade the surrounding player talks to

pub mod api;
pub mod cache;
pub mod config;
pub mod event;
pub mod namespace;
pub mod pending;
pub mod remote;
pub mod server;
pub mod stats;
pub mod store;
pub mod sync;
pub mod tracker;
