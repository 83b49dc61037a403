//! Scoped top-level execution.

use std::future::Future;

use tracing::{error, info};

/// Install the default fmt subscriber. Call once at the top of `main`.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
}

/// Run the program body to completion and exit the process: code 0 on
/// success, code 1 with a logged fatal on error. Never returns. No retries
/// at this layer; restart reconciliation makes a clean restart safe.
pub async fn run<F>(fut: F)
where
    F: Future<Output = eyre::Result<()>>,
{
    match fut.await {
        Ok(()) => {
            info!("done");
            std::process::exit(0);
        }
        Err(err) => {
            error!(error = ?err, "fatal error");
            std::process::exit(1);
        }
    }
}
