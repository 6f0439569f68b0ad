// Copyright 2026 Covenant Labs

//! Governed hierarchical task network (HTN) planning and execution engine
//!: turns a natural-language request into a DAG of tasks,
//! runs it under a hybrid sequential/parallel scheduler, verifies each
//! result, and emits a tamper-evident audit trail.
//!
//! This crate implements three tightly coupled subsystems and the audit
//! core that ties them together:
//! - [`planner`] / [`plan`] / [`graph`] / [`task`]: decomposition and the
//!   Task Graph data model.
//! - [`executor`]: the DAG scheduler (work-stealing, retries, failure
//!   propagation).
//! - [`worm`] / [`decision_record`] / [`provenance`] / [`policy`] /
//!   [`redactor`]: the compliance/audit core.
//! - [`verifier`]: per-task and aggregate result checking.
//! - [`tool`]: the registry and invocation contract concrete tools are
//!   called through; this crate never implements a concrete tool.
//!
//! There is no process-global state besides the atomic [`metrics::Metrics`]
//! registry a caller chooses to share; every other component is wired
//! together once, explicitly, by [`Context::new`].

pub mod canonical;
pub mod config;
pub mod decision_record;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod provenance;
pub mod redactor;
pub mod task;
pub mod tool;
pub mod verifier;
pub mod worm;

use config::EngineConfig;
use decision_record::DecisionRecordManager;
use ed25519_dalek::SigningKey;
use error::{Error, Result};
use executor::TaskExecutor;
use metrics::Metrics;
use planner::model_based::LlmBackend;
use policy::PolicyGuardian;
use rand_core::OsRng;
use std::fs;
use std::sync::Arc;
use tool::{ToolPolicyCheck, ToolRegistry};
use verifier::Verifier;
use worm::WormLog;

/// The single construction point a caller uses ("Global
/// mutable state"): every configured dependency is wired together once and
/// shared by reference or `Arc` from here on, rather than reached for
/// through a singleton.
pub struct Context {
    pub config: EngineConfig,
    pub policy: Arc<PolicyGuardian>,
    pub tools: Arc<ToolRegistry>,
    pub worm: Arc<WormLog>,
    pub decisions: Arc<DecisionRecordManager>,
    pub metrics: Arc<Metrics>,
    pub executor: TaskExecutor,
    pub verifier: Verifier,
    backend: Option<Arc<dyn LlmBackend>>,
    provenance_dir: std::path::PathBuf,
}

impl Context {
    /// Build every subsystem from `config`. Tools must be registered by the
    /// caller afterward via `context.tools.register(...)` — the registry
    /// starts empty, since concrete tools are external collaborators
    ///.
    pub fn new(config: EngineConfig, backend: Option<Arc<dyn LlmBackend>>) -> Result<Self> {
        let policy = Arc::new(PolicyGuardian::new(&config.policy)?);
        let tools = Arc::new(ToolRegistry::new());
        let signing_key = load_or_create_signing_key(&config.audit.signing_key_path)?;
        let worm = Arc::new(WormLog::open(
            config.audit.worm_dir.clone(),
            config.audit.seal_every,
            Some(signing_key.clone()),
        )?);
        let decisions = Arc::new(DecisionRecordManager::new(config.audit.decisions_dir.clone(), signing_key)?);
        let metrics = Arc::new(Metrics::new().map_err(|e| Error::ConfigurationError(e.to_string()))?);
        let policy_check: Arc<dyn ToolPolicyCheck> = policy.clone();
        let executor = TaskExecutor::new(config.executor.clone(), tools.clone(), policy_check).with_metrics(metrics.clone());
        let verifier = Verifier::new(config.verifier.default_level, config.verifier.paranoid_sample_rate);

        Ok(Self {
            provenance_dir: config.audit.provenance_dir.clone(),
            config,
            policy,
            tools,
            worm,
            decisions,
            metrics,
            executor,
            verifier,
            backend,
        })
    }

    pub fn backend(&self) -> Option<&dyn LlmBackend> {
        self.backend.as_deref()
    }

    pub fn provenance_dir(&self) -> &std::path::Path {
        &self.provenance_dir
    }
}

/// Load a persisted ed25519 signing key, or generate and persist a fresh
/// one if `path` doesn't exist yet. The key is the raw 32-byte seed.
fn load_or_create_signing_key(path: &std::path::Path) -> Result<SigningKey> {
    if let Ok(bytes) = fs::read(path) {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::ConfigurationError(format!("signing key at {path:?} is not 32 bytes")))?;
        return Ok(SigningKey::from_bytes(&seed));
    }
    let key = SigningKey::generate(&mut OsRng);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::ConfigurationError(format!("cannot create {parent:?}: {e}")))?;
    }
    fs::write(path, key.to_bytes())
        .map_err(|e| Error::ConfigurationError(format!("cannot write signing key to {path:?}: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &tempfile::TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.audit.signing_key_path = dir.path().join("signing.key");
        config.audit.worm_dir = dir.path().join("worm");
        config.audit.decisions_dir = dir.path().join("decisions");
        config.audit.provenance_dir = dir.path().join("provenance");
        config
    }

    #[test]
    fn context_builds_from_default_config() {
        let dir = tempdir().unwrap();
        let context = Context::new(config_in(&dir), None).unwrap();
        assert!(context.tools.tool_names().is_empty());
        assert_eq!(context.worm.len(), 0);
    }

    #[test]
    fn signing_key_is_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);
        let first = Context::new(config.clone(), None).unwrap();
        let first_key = first.decisions.verifying_key();
        let second = Context::new(config, None).unwrap();
        assert_eq!(first_key, second.decisions.verifying_key());
    }
}
