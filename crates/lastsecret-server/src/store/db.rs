use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::debug;

use super::crypto::EncryptionKey;
use super::ids::{self, GenerationError};
use super::model::{ConsumedSecret, SecretReceipt, SecretRecord};
use crate::error::StoreError;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Leading byte of every encoded record.
const RECORD_V1_MARKER: u8 = 0x01;

/// How many fresh ids `put` tries before giving up.
pub const MAX_ID_ATTEMPTS: usize = 5;

/// Bounds applied by `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_secret_bytes: usize,
    pub max_ttl_seconds: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_secret_bytes: 20_000,
            max_ttl_seconds: 7 * 24 * 60 * 60,
        }
    }
}

/// Thread-safe handle to the redb store.
///
/// redb admits one write transaction at a time, so every method that mutates
/// does its check and its write inside a single transaction.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    key: Arc<EncryptionKey>,
    limits: Limits,
}

impl Store {
    /// Open (or create) the database at `path`, using `key` for encryption.
    pub fn open(path: &Path, key: EncryptionKey) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            key: Arc::new(key),
            limits: Limits::default(),
        })
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Unix time in milliseconds. Whole seconds would let a short TTL expire
    /// early when the put lands just before a second boundary.
    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Encrypt and store a new secret under a freshly generated id.
    pub fn put(&self, secret: &str, ttl_seconds: i64) -> Result<SecretReceipt, StoreError> {
        self.put_at(secret, ttl_seconds, Self::now())
    }

    pub(crate) fn put_at(
        &self,
        secret: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<SecretReceipt, StoreError> {
        self.put_with(secret, ttl_seconds, now, ids::generate)
    }

    /// `put` with the id source supplied by the caller.
    pub(crate) fn put_with(
        &self,
        secret: &str,
        ttl_seconds: i64,
        now: i64,
        mut next_id: impl FnMut() -> Result<String, GenerationError>,
    ) -> Result<SecretReceipt, StoreError> {
        if ttl_seconds <= 0 || ttl_seconds > self.limits.max_ttl_seconds {
            return Err(StoreError::InvalidTtl {
                max: self.limits.max_ttl_seconds,
            });
        }
        if secret.is_empty() {
            return Err(StoreError::EmptySecret);
        }
        if secret.len() > self.limits.max_secret_bytes {
            return Err(StoreError::SecretTooLarge {
                max: self.limits.max_secret_bytes,
            });
        }

        let (value_encrypted, nonce) =
            super::crypto::encrypt(&self.key, secret.as_bytes()).context("encrypt value")?;
        let record = SecretRecord::new(value_encrypted, nonce, now, ttl_seconds);
        let bytes = encode(&record)?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = next_id()?;
            if self.insert_if_absent(&id, &bytes)? {
                debug!(attempt, "stored secret");
                return Ok(SecretReceipt {
                    id,
                    created_at: record.created_at,
                    expires_at: record.expires_at,
                });
            }
            debug!(attempt, "secret id collision, retrying");
        }

        Err(StoreError::Generation(format!(
            "no free id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    fn insert_if_absent(&self, id: &str, bytes: &[u8]) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.get(id)?.is_some() {
                false
            } else {
                table.insert(id, bytes)?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Claim a secret for reveal.
    ///
    /// If the record is revealable it is marked consumed and its ciphertext is
    /// returned, all inside one write transaction. Any other outcome is
    /// `StoreError::NotFound`.
    pub fn try_consume(&self, id: &str) -> Result<ConsumedSecret, StoreError> {
        self.try_consume_at(id, Self::now())
    }

    pub(crate) fn try_consume_at(&self, id: &str, now: i64) -> Result<ConsumedSecret, StoreError> {
        self.consume_record(id, now)?.ok_or(StoreError::NotFound)
    }

    fn consume_record(&self, id: &str, now: i64) -> Result<Option<ConsumedSecret>> {
        let write_txn = self.db.begin_write()?;
        let consumed = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Copy the bytes out so the AccessGuard is dropped before we write.
            let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.is_revealable(now) {
                        record.consumed = true;
                        let updated = encode(&record)?;
                        table.insert(id, updated.as_slice())?;
                        Some(ConsumedSecret::from(&record))
                    } else {
                        None
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(consumed)
    }

    /// Decrypt ciphertext previously handed out by `try_consume`.
    pub fn open_secret(&self, consumed: &ConsumedSecret) -> Result<String, StoreError> {
        let plaintext =
            super::crypto::decrypt(&self.key, &consumed.value_encrypted, &consumed.nonce)
                .context("decrypt value")?;
        let value = String::from_utf8(plaintext).context("secret value is not valid UTF-8")?;
        Ok(value)
    }

    /// Remove a record. Returns true if it existed; removing twice is fine.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.remove(id)?)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SECRETS)?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Remove every reapable record in one transaction. Returns how many went.
    pub fn reap_expired(&self) -> Result<usize, StoreError> {
        Ok(self.reap_at(Self::now())?)
    }

    pub(crate) fn reap_at(&self, now: i64) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SECRETS)?;

            let mut doomed = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.is_reapable(now) {
                    doomed.push(k.value().to_owned());
                }
            }

            for id in &doomed {
                table.remove(id.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Number of records currently stored, consumed or not.
    pub fn count(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read().context("begin read")?;
        let table = read_txn.open_table(SECRETS).context("open secrets table")?;
        Ok(table.len().context("count secrets")?)
    }
}

/// Encode a SecretRecord as `[RECORD_V1_MARKER] + bincode(record)`.
fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    match bytes.split_first() {
        None => anyhow::bail!("empty record"),
        Some((&RECORD_V1_MARKER, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode")?;
            Ok(record)
        }
        Some((marker, _)) => anyhow::bail!("unknown record format {marker:#04x}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let key = super::super::crypto::generate_key();
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path, key).unwrap();
        (store, dir)
    }

    fn reveal(s: &Store, id: &str) -> Result<String, StoreError> {
        let consumed = s.try_consume(id)?;
        s.open_secret(&consumed)
    }

    #[test]
    fn put_then_consume_returns_secret_once() {
        let (s, _dir) = make_store();
        let receipt = s.put("hello", 3600).unwrap();
        assert_eq!(reveal(&s, &receipt.id).unwrap(), "hello");
        assert!(matches!(reveal(&s, &receipt.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn receipt_carries_expiry() {
        let (s, _dir) = make_store();
        let receipt = s.put_at("x", 600, 5_000_250).unwrap();
        assert_eq!(receipt.created_at, 5_000_250);
        assert_eq!(receipt.expires_at, 5_600_250);
        assert!(ids::is_well_formed(&receipt.id));
    }

    #[test]
    fn ids_are_distinct() {
        let (s, _dir) = make_store();
        let a = s.put("a", 60).unwrap();
        let b = s.put("a", 60).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn one_second_ttl_survives_second_boundary() {
        let (s, _dir) = make_store();
        // 1ms before a whole second.
        let created = 1_700_000_000_999;
        let receipt = s.put_at("x", 1, created).unwrap();
        assert_eq!(receipt.expires_at, created + 1000);
        assert!(s.try_consume_at(&receipt.id, created + 1).is_ok());
    }

    #[test]
    fn one_second_ttl_expires_after_a_full_second() {
        let (s, _dir) = make_store();
        let created = 1_700_000_000_500;
        let receipt = s.put_at("x", 1, created).unwrap();
        assert!(matches!(
            s.try_consume_at(&receipt.id, created + 1000),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn put_then_consume_with_short_ttl_never_misses() {
        let (s, _dir) = make_store();
        for _ in 0..200 {
            let receipt = s.put("x", 1).unwrap();
            assert!(s.try_consume(&receipt.id).is_ok());
        }
    }

    #[test]
    fn id_collision_is_retried() {
        let (s, _dir) = make_store();
        let taken = s.put("first", 60).unwrap().id;

        // Popped from the back: two collisions, then a free id.
        let mut candidates = vec![
            "BBBBBBBBBBBBBBBBBBBBBB".to_owned(),
            taken.clone(),
            taken.clone(),
        ];
        let mut calls = 0;
        let receipt = s
            .put_with("second", 60, Store::now(), || {
                calls += 1;
                Ok(candidates.pop().unwrap())
            })
            .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(receipt.id, "BBBBBBBBBBBBBBBBBBBBBB");
        assert_eq!(s.count().unwrap(), 2);
        assert_eq!(reveal(&s, &taken).unwrap(), "first");
        assert_eq!(reveal(&s, &receipt.id).unwrap(), "second");
    }

    #[test]
    fn persistent_collisions_give_generation_error() {
        let (s, _dir) = make_store();
        let taken = s.put("first", 60).unwrap().id;

        let mut calls = 0;
        let err = s
            .put_with("second", 60, Store::now(), || {
                calls += 1;
                Ok(taken.clone())
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Generation(_)));
        assert_eq!(calls, MAX_ID_ATTEMPTS);
        assert_eq!(s.count().unwrap(), 1);
        // The existing record was not overwritten.
        assert_eq!(reveal(&s, &taken).unwrap(), "first");
    }

    #[test]
    fn insert_if_absent_refuses_existing_id() {
        let (s, _dir) = make_store();
        assert!(s.insert_if_absent("CCCCCCCCCCCCCCCCCCCCCC", b"\x01a").unwrap());
        assert!(!s.insert_if_absent("CCCCCCCCCCCCCCCCCCCCCC", b"\x01b").unwrap());
    }

    #[test]
    fn validation_errors() {
        let (s, _dir) = make_store();
        assert!(matches!(s.put("", 3600), Err(StoreError::EmptySecret)));
        assert!(matches!(s.put("x", 0), Err(StoreError::InvalidTtl { .. })));
        assert!(matches!(s.put("x", -5), Err(StoreError::InvalidTtl { .. })));
        let too_long = Limits::default().max_ttl_seconds + 1;
        assert!(matches!(
            s.put("x", too_long),
            Err(StoreError::InvalidTtl { .. })
        ));
        assert_eq!(s.count().unwrap(), 0);
    }

    #[test]
    fn oversize_secret_rejected() {
        let (s, _dir) = make_store();
        let s = s.with_limits(Limits {
            max_secret_bytes: 4,
            ..Limits::default()
        });
        assert!(s.put("1234", 60).is_ok());
        assert!(matches!(
            s.put("12345", 60),
            Err(StoreError::SecretTooLarge { max: 4 })
        ));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (s, _dir) = make_store();
        assert!(matches!(
            s.try_consume("nonexistent-id"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn expired_secret_is_not_found() {
        let (s, _dir) = make_store();
        let now = Store::now();
        let receipt = s.put_at("value", 10, now).unwrap();
        assert!(matches!(
            s.try_consume_at(&receipt.id, now + 10_000),
            Err(StoreError::NotFound)
        ));
        // Still eligible just before the deadline, but the attempt above
        // must not have consumed it.
        assert!(s.try_consume_at(&receipt.id, now + 9_999).is_ok());
    }

    #[test]
    fn consume_does_not_delete() {
        let (s, _dir) = make_store();
        let receipt = s.put("v", 60).unwrap();
        s.try_consume(&receipt.id).unwrap();
        assert_eq!(s.count().unwrap(), 1);
        assert!(s.delete(&receipt.id).unwrap());
        assert_eq!(s.count().unwrap(), 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let (s, _dir) = make_store();
        let receipt = s.put("v", 60).unwrap();
        assert!(s.delete(&receipt.id).unwrap());
        assert!(!s.delete(&receipt.id).unwrap());
        assert!(!s.delete("never-existed").unwrap());
    }

    #[test]
    fn concurrent_consume_has_exactly_one_winner() {
        let (s, _dir) = make_store();
        let receipt = s.put("race", 3600).unwrap();

        let contenders = 8;
        let barrier = Barrier::new(contenders);
        let winners: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = (0..contenders)
                .map(|_| {
                    let s = s.clone();
                    let id = receipt.id.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        match s.try_consume(&id) {
                            Ok(consumed) => {
                                assert_eq!(s.open_secret(&consumed).unwrap(), "race");
                                true
                            }
                            Err(StoreError::NotFound) => false,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(winners.iter().filter(|w| **w).count(), 1);
    }

    #[test]
    fn reap_removes_expired_and_consumed_only() {
        let (s, _dir) = make_store();
        let now = Store::now();
        let live = s.put_at("live", 3600, now).unwrap();
        let expired = s.put_at("expired", 10, now).unwrap();
        let consumed = s.put_at("consumed", 3600, now).unwrap();
        s.try_consume_at(&consumed.id, now).unwrap();

        assert_eq!(s.reap_at(now + 20_000).unwrap(), 2);
        assert_eq!(s.count().unwrap(), 1);
        assert!(s.try_consume_at(&live.id, now + 20_000).is_ok());
        assert!(matches!(
            s.try_consume_at(&expired.id, now),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn reap_on_empty_store() {
        let (s, _dir) = make_store();
        assert_eq!(s.reap_expired().unwrap(), 0);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");
        let key = super::super::crypto::generate_key();
        let key_bytes = *key.as_bytes();

        let id = {
            let s = Store::open(&path, key).unwrap();
            s.put("durable", 3600).unwrap().id
        };

        let key = super::super::crypto::load_key(&key_bytes).unwrap();
        let s = Store::open(&path, key).unwrap();
        assert_eq!(reveal(&s, &id).unwrap(), "durable");
    }

    #[test]
    fn ciphertext_does_not_contain_plaintext() {
        let (s, _dir) = make_store();
        let receipt = s.put("plain-marker", 60).unwrap();
        let read_txn = s.db.begin_read().unwrap();
        let table = read_txn.open_table(SECRETS).unwrap();
        let raw = table.get(receipt.id.as_str()).unwrap().unwrap().value().to_vec();
        assert!(!raw.windows(12).any(|w| w == b"plain-marker"));
    }

    #[test]
    fn decode_rejects_unknown_marker() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x7f, 0, 0]).is_err());
    }
}
