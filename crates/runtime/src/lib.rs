//! Runtime utilities for portalsink: top-level program execution and
//! shutdown signal handling.

pub mod run;
pub mod shutdown;

pub use run::{init_tracing, run};
pub use shutdown::{run_until_shutdown, shutdown_signal};
