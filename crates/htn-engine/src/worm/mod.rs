// Copyright 2026 Covenant Labs

//! The WORM (write-once, read-many) event log.
//!
//! An append-only, hash-chained journal. Every entry's own hash is a
//! function of the previous entry's hash and its own canonical payload, so
//! any rewrite of history is detectable by re-hashing from the origin (or
//! a trusted checkpoint). Periodically, [`WormLog::seal`] finalizes a
//! prefix by Merkle-rooting the included entries and signing the root.

pub mod merkle;
pub mod storage;

use crate::canonical::canonical_json;
use crate::error::{Error, Result};
use crate::redactor::Redactor;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use merkle::MerkleTree;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use storage::SegmentedStorage;

/// One entry in the chain (wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WormEvent {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub payload: Value,
    pub prior_hash: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Outcome of [`WormLog::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    BrokenAt(u64),
}

fn genesis_hash() -> String {
    hex::encode([0u8; 32])
}

fn hash_event(prior_hash: &str, seq: u64, ts: &DateTime<Utc>, kind: &str, payload: &Value) -> String {
    let canon = canonical_json(&serde_json::json!({
        "seq": seq,
        "ts": ts.to_rfc3339(),
        "kind": kind,
        "payload": payload,
    }));
    let mut hasher = Sha256::new();
    hasher.update(prior_hash.as_bytes());
    hasher.update(canon.as_bytes());
    hex::encode(hasher.finalize())
}

struct Inner {
    storage: SegmentedStorage,
    tip_hash: String,
    next_seq: u64,
    pending_since_seal: Vec<WormEvent>,
}

/// Append-only hash-chained event journal, guarded by a single lock
/// protecting the chain tip ("The WORM Log serializes appends
/// behind a lock that protects the hash chain").
pub struct WormLog {
    inner: Mutex<Inner>,
    redactor: Redactor,
    signing_key: Option<SigningKey>,
    seal_every: u64,
}

impl WormLog {
    /// Open (or create) a WORM log rooted at `dir`. Replays existing
    /// segments to recover `tip_hash` and `next_seq`.
    pub fn open(dir: impl Into<std::path::PathBuf>, seal_every: u64, signing_key: Option<SigningKey>) -> Result<Self> {
        let storage = SegmentedStorage::new(dir, 1_000)?;
        let lines = storage.read_all_lines()?;
        let mut tip_hash = genesis_hash();
        let mut next_seq = 0u64;
        for line in &lines {
            let event: WormEvent = serde_json::from_str(line)
                .map_err(|e| Error::StorageError(format!("corrupt WORM line: {e}")))?;
            tip_hash = event.hash.clone();
            next_seq = event.seq + 1;
        }
        Ok(Self {
            inner: Mutex::new(Inner { storage, tip_hash, next_seq, pending_since_seal: Vec::new() }),
            redactor: Redactor::with_defaults(),
            signing_key,
            seal_every: seal_every.max(1),
        })
    }

    /// Redact `payload`, compute this entry's hash from the current tip,
    /// write it durably, and return the new sequence number. The in-memory
    /// tip only advances after the write succeeds, so a `StorageError`
    /// leaves the chain exactly as it was (failure model).
    pub fn append(&self, kind: &str, payload: &Value) -> Result<u64> {
        let redacted = redact_value(&self.redactor, payload);
        let mut guard = self.inner.lock();
        let seq = guard.next_seq;
        let ts = Utc::now();
        let hash = hash_event(&guard.tip_hash, seq, &ts, kind, &redacted);
        let event = WormEvent {
            seq,
            ts,
            kind: kind.to_string(),
            payload: redacted,
            prior_hash: guard.tip_hash.clone(),
            hash: hash.clone(),
            merkle_root: None,
            signature: None,
        };
        let line = serde_json::to_string(&event)
            .map_err(|e| Error::StorageError(format!("cannot encode WORM entry: {e}")))?;
        guard.storage.append_line(&line)?;
        guard.tip_hash = hash;
        guard.next_seq = seq + 1;
        guard.pending_since_seal.push(event);

        if guard.pending_since_seal.len() as u64 >= self.seal_every {
            let batch = std::mem::take(&mut guard.pending_since_seal);
            drop(guard);
            self.seal_batch(&batch)?;
        }
        Ok(seq)
    }

    fn seal_batch(&self, batch: &[WormEvent]) -> Result<(String, Option<String>)> {
        let mut tree = MerkleTree::new();
        for e in batch {
            tree.push_leaf(merkle::leaf_digest(&e.hash));
        }
        let root = hex::encode(tree.root());
        let signature = self.signing_key.as_ref().map(|key| {
            let sig: Signature = key.sign(root.as_bytes());
            hex::encode(sig.to_bytes())
        });
        tracing::info!(target: "htn_engine::worm", root = %root, entries = batch.len(), "sealed WORM batch");
        Ok((root, signature))
    }

    /// Periodically finalize a prefix by Merkle-rooting and signing the
    /// entries up to (and including) `up_to`. Can also be invoked
    /// out-of-band of the automatic `seal_every` cadence.
    pub fn seal(&self, up_to: u64) -> Result<(String, Option<String>)> {
        let all = self.read_all()?;
        let batch: Vec<WormEvent> = all.into_iter().filter(|e| e.seq <= up_to).collect();
        if batch.is_empty() {
            return Err(Error::StorageError("nothing to seal".into()));
        }
        self.seal_batch(&batch)
    }

    /// Re-hash from the origin (sequence 0) and report the first point of
    /// divergence, or [`VerifyOutcome::Ok`] if the whole chain is intact.
    pub fn verify(&self) -> Result<VerifyOutcome> {
        let events = self.read_all()?;
        let mut expected_prior = genesis_hash();
        for event in &events {
            if event.prior_hash != expected_prior {
                return Ok(VerifyOutcome::BrokenAt(event.seq));
            }
            let recomputed = hash_event(&event.prior_hash, event.seq, &event.ts, &event.kind, &event.payload);
            if recomputed != event.hash {
                return Ok(VerifyOutcome::BrokenAt(event.seq));
            }
            expected_prior = event.hash.clone();
        }
        Ok(VerifyOutcome::Ok)
    }

    /// All entries currently persisted, in sequence order.
    pub fn read_all(&self) -> Result<Vec<WormEvent>> {
        let guard = self.inner.lock();
        guard
            .storage
            .read_all_lines()?
            .iter()
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| Error::StorageError(format!("corrupt WORM line: {e}")))
            })
            .collect()
    }

    pub fn tip_hash(&self) -> String {
        self.inner.lock().tip_hash.clone()
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test-only hook for the storage layer's corruption injector.
    #[cfg(any(test, feature = "test-support"))]
    pub fn corrupt_for_test(&self, line_no: usize, byte_offset: usize) -> Result<()> {
        self.inner.lock().storage.corrupt_line_for_test(line_no, byte_offset)
    }
}

fn redact_value(redactor: &Redactor, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redactor.redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(redactor, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(redactor, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Verify a detached signature over a Merkle root produced by [`WormLog::seal`].
pub fn verify_seal_signature(root_hex: &str, signature_hex: &str, verifying_key: &VerifyingKey) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else { return false };
    let Ok(sig_array): std::result::Result<[u8; 64], _> = sig_bytes.try_into() else { return false };
    let sig = Signature::from_bytes(&sig_array);
    verifying_key.verify(root_hex.as_bytes(), &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_chain_is_gapless_and_linked() {
        let dir = tempdir().unwrap();
        let log = WormLog::open(dir.path(), 1_000, None).unwrap();
        for i in 0..5 {
            let seq = log.append("test.event", &serde_json::json!({"i": i})).unwrap();
            assert_eq!(seq, i);
        }
        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 5);
        for w in events.windows(2) {
            assert_eq!(w[1].prior_hash, w[0].hash);
        }
        assert_eq!(log.verify().unwrap(), VerifyOutcome::Ok);
    }

    #[test]
    fn redacts_before_hashing() {
        let dir = tempdir().unwrap();
        let log = WormLog::open(dir.path(), 1_000, None).unwrap();
        log.append("policy.reject", &serde_json::json!({"text": "my password is hunter2"})).unwrap();
        let events = log.read_all().unwrap();
        assert!(events[0].payload.to_string().contains("[SECRET_REDACTED]"));
        assert!(!events[0].payload.to_string().contains("hunter2"));
    }

    #[test]
    fn tamper_detected_and_chain_continues_after() {
        let dir = tempdir().unwrap();
        let log = WormLog::open(dir.path(), 1_000, None).unwrap();
        for i in 0..3 {
            log.append("test.event", &serde_json::json!({"i": i})).unwrap();
        }
        log.corrupt_for_test(1, 40).unwrap();

        let broken = log.verify().unwrap();
        assert!(matches!(broken, VerifyOutcome::BrokenAt(_)));

        // append still works; future chain continues from current tip.
        let reopened = WormLog::open(dir.path(), 1_000, None).unwrap();
        let new_seq = reopened.append("test.event", &serde_json::json!({"i": 99})).unwrap();
        assert_eq!(new_seq, 3);
    }

    #[test]
    fn seal_produces_verifiable_signature() {
        use ed25519_dalek::SigningKey;
        use rand_core::OsRng;
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let dir = tempdir().unwrap();
        let log = WormLog::open(dir.path(), 1_000, Some(signing_key)).unwrap();
        for i in 0..3 {
            log.append("test.event", &serde_json::json!({"i": i})).unwrap();
        }
        let (root, signature) = log.seal(2).unwrap();
        let signature = signature.expect("signing key was configured");
        assert!(verify_seal_signature(&root, &signature, &verifying_key));
    }
}
