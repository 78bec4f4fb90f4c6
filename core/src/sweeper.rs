//! Background sweeper (component K): a daily timer that deletes clipboard
//! rows past their TTL. Adapted from the teacher's
//! `mesh.rs::start_clipboard_watcher` polling-task shape (`tokio::select!`
//! against a stop signal alongside a timer) — simplified here to a single
//! timer with nothing to watch but the clock.

use crate::history::ClipboardStore;
use crate::trust::now_ms;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// ~Daily, per spec §4.J. Exposed as a constant rather than buried in the
/// spawn call so a caller wiring up `Config` in the future has one place to
/// look.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn the sweep loop; drop the returned `JoinHandle` (or hold and abort
/// it) to stop. Runs one sweep immediately so a freshly started process
/// doesn't wait a full day to clear out rows that expired while it was down.
pub fn spawn(store: Arc<ClipboardStore>, interval: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deleted = store.sweep(now_ms());
            if deleted > 0 {
                tracing::info!(deleted, "swept expired clipboard rows");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
