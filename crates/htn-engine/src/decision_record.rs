// Copyright 2026 Covenant Labs

//! Decision Record Manager.
//!
//! Builds and persists signed, canonical records of every significant
//! decision: plan creation, each tool invocation, each verification, and
//! the final response. Each record also emits a `decision.recorded` WORM
//! event, tying the audit trail together.

use crate::canonical::canonical_json;
use crate::error::{Error, Result};
use crate::worm::WormLog;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// The kind of decision a [`DecisionRecord`] documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Planning,
    ToolCall,
    Verification,
    Response,
    /// A query rejected by the Policy Guardian before any plan existed.
    PolicyReject,
}

/// Immutable once written. Construct via [`DecisionRecordManager::record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub dr_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub task_id: Option<String>,
    pub decision_type: DecisionKind,
    pub input_hash: String,
    pub plan_hash: String,
    pub result_hash: String,
    pub tools_used: Vec<String>,
    pub alternatives_considered: Vec<String>,
    pub frameworks: Vec<String>,
    pub signature: String,
}

fn sha256_hex_of(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Parameters for [`DecisionRecordManager::record`]. Grouped into a struct
/// because `record`'s contract has five independent
/// inputs plus free-form context.
pub struct DecisionInput<'a> {
    pub kind: DecisionKind,
    pub actor: &'a str,
    pub task_id: Option<&'a str>,
    pub input: &'a Value,
    pub plan: &'a Value,
    pub result: &'a Value,
    pub tools_used: Vec<String>,
    pub alternatives_considered: Vec<String>,
    pub frameworks: Vec<String>,
}

/// Builds and persists [`DecisionRecord`]s.
pub struct DecisionRecordManager {
    dir: PathBuf,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl DecisionRecordManager {
    pub fn new(dir: impl Into<PathBuf>, signing_key: SigningKey) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::StorageError(format!("cannot create DR dir {dir:?}: {e}")))?;
        let verifying_key = signing_key.verifying_key();
        Ok(Self { dir, signing_key, verifying_key })
    }

    fn dr_id(now: DateTime<Utc>) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("DR-{}-{}", now.format("%Y%m%d-%H%M%S"), &random[..8])
    }

    /// Hash inputs with SHA-256 over canonical JSON, sign the canonical
    /// record body, persist to `<dir>/DR-*.json`, and emit a WORM
    /// `decision.recorded` event.
    pub fn record(&self, input: DecisionInput<'_>, worm: &WormLog) -> Result<DecisionRecord> {
        let now = Utc::now();
        let input_hash = sha256_hex_of(input.input);
        let plan_hash = sha256_hex_of(input.plan);
        let result_hash = sha256_hex_of(input.result);

        let mut record = DecisionRecord {
            dr_id: Self::dr_id(now),
            timestamp: now,
            actor: input.actor.to_string(),
            task_id: input.task_id.map(str::to_string),
            decision_type: input.kind,
            input_hash,
            plan_hash,
            result_hash,
            tools_used: input.tools_used,
            alternatives_considered: input.alternatives_considered,
            frameworks: input.frameworks,
            signature: String::new(),
        };

        let signable = canonical_json(&serde_json::to_value(&record).map_err(|e| {
            Error::StorageError(format!("cannot serialize decision record: {e}"))
        })?);
        let signature: Signature = self.signing_key.sign(signable.as_bytes());
        record.signature = format!("ed25519:{}", BASE64.encode(signature.to_bytes()));

        let path = self.dir.join(format!("{}.json", record.dr_id));
        let body = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::StorageError(format!("cannot encode DR: {e}")))?;
        fs::write(&path, body).map_err(|e| Error::StorageError(format!("cannot write DR {path:?}: {e}")))?;

        worm.append(
            "decision.recorded",
            &serde_json::json!({
                "dr_id": record.dr_id,
                "decision_type": record.decision_type,
                "task_id": record.task_id,
            }),
        )?;

        Ok(record)
    }

    /// Re-derive the signable body and check the detached signature, then
    /// report whether it matches (`verify(dr)`). Hash
    /// equality against independently recomputed hashes is the caller's
    /// responsibility (it requires the original input/plan/result values,
    /// which are not retained by a `DecisionRecord`).
    pub fn verify(&self, record: &DecisionRecord) -> DrVerifyOutcome {
        let mut unsigned = record.clone();
        unsigned.signature = String::new();
        let signable = match serde_json::to_value(&unsigned) {
            Ok(v) => canonical_json(&v),
            Err(_) => return DrVerifyOutcome::BadHash,
        };

        let Some(sig_b64) = record.signature.strip_prefix("ed25519:") else {
            return DrVerifyOutcome::BadSignature;
        };
        let Ok(bytes) = BASE64.decode(sig_b64) else {
            return DrVerifyOutcome::BadSignature;
        };
        let Ok(sig_array): std::result::Result<[u8; 64], _> = bytes.try_into() else {
            return DrVerifyOutcome::BadSignature;
        };
        let sig = Signature::from_bytes(&sig_array);
        if self.verifying_key.verify(signable.as_bytes(), &sig).is_ok() {
            DrVerifyOutcome::Ok
        } else {
            DrVerifyOutcome::BadSignature
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    pub fn load(path: &Path) -> Result<DecisionRecord> {
        let body = fs::read_to_string(path)
            .map_err(|e| Error::StorageError(format!("cannot read DR {path:?}: {e}")))?;
        serde_json::from_str(&body).map_err(|e| Error::StorageError(format!("corrupt DR: {e}")))
    }
}

/// Recompute `input_hash`/`plan_hash`/`result_hash` against the values that
/// produced a record, and compare.
pub fn hashes_match(record: &DecisionRecord, input: &Value, plan: &Value, result: &Value) -> bool {
    record.input_hash == sha256_hex_of(input)
        && record.plan_hash == sha256_hex_of(plan)
        && record.result_hash == sha256_hex_of(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrVerifyOutcome {
    Ok,
    BadSignature,
    BadHash,
}
