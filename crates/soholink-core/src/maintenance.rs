//! Background maintenance loops.
//!
//! Each loop runs on its own cadence, tolerates transient failures by
//! logging and continuing, and exits promptly when its cancellation token
//! fires. The Merkle batcher's loop lives with the batcher itself in the
//! accounting crate.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use soholink_accounting::compress_old_logs;
use soholink_store::Store;

/// Cadence of the log compactor.
pub const COMPACTOR_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Periodically delete nonces older than `max_age`. Ticks at the retention
/// window itself, so an expired nonce lives at most twice the window.
pub async fn run_nonce_pruner(store: Store, max_age: Duration, shutdown: CancellationToken) {
    let max_age = if max_age.is_zero() {
        Duration::from_secs(300)
    } else {
        max_age
    };

    let mut timer = tokio::time::interval(max_age);
    timer.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match store.prune_nonces(max_age).await {
                    Ok(0) => {}
                    Ok(pruned) => debug!(pruned, "pruned expired nonces"),
                    Err(e) => warn!(error = %e, "nonce pruner error"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("nonce pruner shutting down");
                return;
            }
        }
    }
}

/// Periodically gzip accounting day-files older than `max_age`.
pub async fn run_log_compactor(
    accounting_dir: PathBuf,
    max_age: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut timer = tokio::time::interval(every);
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match compress_old_logs(&accounting_dir, max_age) {
                    Ok(0) => {}
                    Ok(compressed) => debug!(compressed, "compressed old accounting logs"),
                    Err(e) => warn!(error = %e, "log compactor error"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("log compactor shutting down");
                return;
            }
        }
    }
}
