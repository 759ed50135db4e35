use tracing::warn;

use crate::{error::StoreError, store::Store};

/// Reveals a secret at most once and then burns it.
#[derive(Clone)]
pub struct RevealCoordinator {
    store: Store,
}

impl RevealCoordinator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Claim, delete, then decrypt.
    ///
    /// The delete runs before decryption so a record is gone even when its
    /// ciphertext turns out to be unreadable. If the delete itself fails the
    /// record stays consumed and the reaper removes it on its next pass.
    pub fn reveal(&self, id: &str) -> Result<String, StoreError> {
        let consumed = self.store.try_consume(id)?;

        if let Err(e) = self.store.delete(id) {
            warn!(error = %e, "delete after reveal failed; leaving it to the reaper");
        }

        self.store.open_secret(&consumed)
    }
}
