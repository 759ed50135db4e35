use thiserror::Error;

use crate::store::ids::GenerationError;

/// Everything a store operation can report to its caller.
///
/// `NotFound` deliberately covers unknown, expired and already-revealed ids
/// alike. Callers must not be able to tell those apart.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ttl_seconds must be between 1 and {max}")]
    InvalidTtl { max: i64 },

    #[error("secret must not be empty")]
    EmptySecret,

    #[error("secret exceeds {max} bytes")]
    SecretTooLarge { max: usize },

    #[error("could not allocate a secret id: {0}")]
    Generation(String),

    #[error("not found or expired")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<GenerationError> for StoreError {
    fn from(e: GenerationError) -> Self {
        Self::Generation(e.to_string())
    }
}

impl StoreError {
    /// Validation failures the client can fix by changing its request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTtl { .. } | Self::EmptySecret | Self::SecretTooLarge { .. }
        )
    }
}
