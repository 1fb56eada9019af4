//! Infrastructure job state store implementations.
//!
//! The port and the in-memory store live in `aurasign-events`.

#[cfg(feature = "redis")]
pub mod redis_store;

#[cfg(feature = "redis")]
pub use redis_store::{DEFAULT_JOB_TTL, RedisJobStateStore};
