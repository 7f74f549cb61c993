//! Observability: structured logging via `tracing`.
//!
//! Console output is configurable (pretty, compact, JSON) and every line can
//! also be appended to a log file for a persistent audit trail of runs.

mod tracing_init;

pub use tracing_init::*;
