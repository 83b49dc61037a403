//! Shutdown signal handling.
//!
//! The engine has no internal cancel token: an operator signal simply ends
//! the process. Buffered rows that were not yet flushed are lost and get
//! rebuilt by reconciliation on the next run.

use std::future::Future;

use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// Completes when SIGINT or SIGTERM is received.
pub async fn shutdown_signal() {
    let mut term =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("Received SIGINT signal"),
        _ = term.recv() => debug!("Received SIGTERM signal"),
    }
}

/// Run a future until a shutdown signal is received. On signal, invoke
/// `on_shutdown` and exit the process.
pub async fn run_until_shutdown<F, O, C>(fut: F, on_shutdown: C) -> O
where
    F: Future<Output = O>,
    C: FnOnce(),
{
    tokio::select! {
        // NOTE: wrap with a `Box` so we don't allocate a
        // huge future state machine on the stack.
        result = Box::pin(fut) => result,
        _ = shutdown_signal() => {
            on_shutdown();
            std::process::exit(0);
        }
    }
}
