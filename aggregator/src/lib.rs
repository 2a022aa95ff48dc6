//! Library interface for the aggregation worker's core components.
//! Exposes the pieces a binary wires together and integration tests exercise.

pub mod canonical;
pub mod control_plane;
pub mod error;
pub mod feed_source;
pub mod persistence;
pub mod pipeline;
pub mod pubsub;
pub mod scheduler;
pub mod types;
