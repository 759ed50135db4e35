use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Stored in redb as bincode-encoded bytes, keyed by the secret id.
/// `value_encrypted` is ChaCha20Poly1305 ciphertext over the raw secret value.
/// Timestamps are plaintext so the reaper can evict without decrypting.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// ChaCha20Poly1305 ciphertext (value + tag).
    pub value_encrypted: Vec<u8>,
    /// Per-record random 12-byte nonce.
    pub nonce: [u8; 12],
    /// Unix timestamp (milliseconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) at which the record stops being revealable.
    pub expires_at: i64,
    /// Set once, by the reveal that wins the record.
    pub consumed: bool,
}

impl SecretRecord {
    /// `now` is in milliseconds, `ttl_seconds` in seconds.
    pub fn new(value_encrypted: Vec<u8>, nonce: [u8; 12], now: i64, ttl_seconds: i64) -> Self {
        Self {
            value_encrypted,
            nonce,
            created_at: now,
            expires_at: now.saturating_add(ttl_seconds.saturating_mul(1000)),
            consumed: false,
        }
    }

    /// Returns true once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// A record can be revealed only while unconsumed and unexpired.
    pub fn is_revealable(&self, now: i64) -> bool {
        !self.consumed && !self.is_expired(now)
    }

    /// Whether the reaper may remove this record.
    /// Consumed records are normally deleted right after the reveal; any left
    /// behind are collected here too.
    pub fn is_reapable(&self, now: i64) -> bool {
        self.consumed || self.is_expired(now)
    }
}

/// Ciphertext handed out by a successful `try_consume`.
/// The record is already marked consumed when this exists.
#[derive(ZeroizeOnDrop)]
pub struct ConsumedSecret {
    pub(crate) value_encrypted: Vec<u8>,
    pub(crate) nonce: [u8; 12],
}

impl From<&SecretRecord> for ConsumedSecret {
    fn from(record: &SecretRecord) -> Self {
        Self {
            value_encrypted: record.value_encrypted.clone(),
            nonce: record.nonce,
        }
    }
}

/// Returned on create: everything the caller needs except the value.
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretReceipt {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
}
