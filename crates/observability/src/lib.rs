//! Process-wide logging setup shared by every AuraSign binary.

/// Tracing subscriber configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, ParseLogFormatError, init, init_with};
