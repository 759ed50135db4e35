//! Secret identifiers.
//!
//! An id is 16 bytes from the OS entropy source, encoded as unpadded URL-safe
//! base64 (22 characters). The id doubles as the bearer capability for the
//! reveal URL, so it must never be derived from anything predictable.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

pub const ID_BYTES: usize = 16;
pub const ID_LEN: usize = 22;

/// The entropy source refused to produce bytes.
#[derive(Debug, Error)]
#[error("entropy source failure: {0}")]
pub struct GenerationError(#[from] rand::Error);

/// Produce a fresh random identifier.
pub fn generate() -> Result<String, GenerationError> {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Cheap shape check for ids arriving from the outside.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
