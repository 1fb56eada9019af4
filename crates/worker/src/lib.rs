//! `aurasign-worker`
//!
//! Composition root for one pipeline stage: configuration, adapter wiring,
//! connection supervision and signal handling. `main.rs` is a thin shell.

pub mod app;
pub mod config;

pub use app::{run, shutdown_signal, supervise};
pub use config::{Cli, ConfigError, LanguageBackend, WorkerConfig};
