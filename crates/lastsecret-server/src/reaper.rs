use std::time::Duration;

use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::store::Store;

/// Spawn a background Tokio task that calls `reap_expired()` every `interval`.
/// The returned handle can be aborted to stop the sweep.
pub fn spawn(store: Store, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // skip first immediate tick
        loop {
            ticker.tick().await;
            sweep(&store);
        }
    })
}

fn sweep(store: &Store) {
    match store.reap_expired() {
        Ok(0) => debug!("reaper: nothing to remove"),
        Ok(removed) => info!(removed, "reaped expired secrets"),
        Err(e) => warn!(error = %e, "background sweep error"),
    }
}
