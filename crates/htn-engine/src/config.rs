// Copyright 2026 Covenant Labs

//! Engine configuration.
//!
//! One struct per dotted config prefix (`planner.*` → [`PlannerConfig`],
//! `executor.*` → [`ExecutorConfig`], `verifier.*` → [`VerifierConfig`],
//! `policy.*` → [`PolicyConfig`], `audit.*` → [`AuditConfig`]), aggregated
//! into [`EngineConfig`]. Nothing here depends on a global singleton —
//! callers build an `EngineConfig` and pass it into
//! [`crate::Context::new`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Decomposition strategy selector for the [`crate::planner::Planner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    RuleBased,
    ModelBased,
    Hybrid,
}

impl Default for PlannerStrategy {
    fn default() -> Self {
        PlannerStrategy::Hybrid
    }
}

/// Execution strategy selector for the [`crate::executor::TaskExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStrategy {
    Sequential,
    Parallel,
    Adaptive,
}

impl Default for ExecutorStrategy {
    fn default() -> Self {
        ExecutorStrategy::Adaptive
    }
}

/// Verification thoroughness for the [`crate::verifier::Verifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    Basic,
    Strict,
    Paranoid,
}

impl Default for VerificationLevel {
    fn default() -> Self {
        VerificationLevel::Strict
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub default_strategy: PlannerStrategy,
    pub max_decomposition_depth: usize,
    pub max_tasks_per_plan: usize,
    pub planning_timeout_ms: u64,
    pub cache_max_entries: usize,
    pub cache_ttl_ms: u64,
    /// Confidence below which `hybrid` escalates from rule-based to model-based.
    pub hybrid_confidence_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_strategy: PlannerStrategy::default(),
            max_decomposition_depth: 8,
            max_tasks_per_plan: 64,
            planning_timeout_ms: 5_000,
            cache_max_entries: 256,
            cache_ttl_ms: 10 * 60 * 1000,
            hybrid_confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_strategy: ExecutorStrategy,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub task_timeout_ms: u64,
    pub graph_timeout_ms: u64,
    pub enable_work_stealing: bool,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    /// Factor applied to the backoff delay on each retry (spec default 2).
    pub retry_backoff_factor: f64,
    /// Jitter applied to backoff, expressed as a fraction (spec default 0.2 = ±20%).
    pub retry_backoff_jitter: f64,
    pub retry_backoff_cap_ms: u64,
    /// Grace period after a task's deadline before its worker is declared leaked.
    pub cancellation_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_strategy: ExecutorStrategy::default(),
            max_workers: 4,
            queue_capacity: 256,
            task_timeout_ms: 30_000,
            graph_timeout_ms: 5 * 60 * 1000,
            enable_work_stealing: true,
            max_retries: 2,
            retry_backoff_base_ms: 100,
            retry_backoff_factor: 2.0,
            retry_backoff_jitter: 0.2,
            retry_backoff_cap_ms: 5_000,
            cancellation_grace_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub default_level: VerificationLevel,
    /// Fraction of completed tasks paranoid mode cross-checks.
    pub paranoid_sample_rate: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_level: VerificationLevel::default(),
            paranoid_sample_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub strict_mode: bool,
    pub active_frameworks: Vec<String>,
    pub forbidden_patterns: Vec<String>,
    pub pii_patterns: Vec<String>,
    pub approval_required_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
    pub max_query_length: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strict_mode: true,
            active_frameworks: Vec::new(),
            forbidden_patterns: Vec::new(),
            pii_patterns: Vec::new(),
            approval_required_tools: Vec::new(),
            forbidden_tools: Vec::new(),
            max_query_length: 8_192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub seal_every: u64,
    pub signing_key_path: PathBuf,
    pub worm_dir: PathBuf,
    pub decisions_dir: PathBuf,
    pub provenance_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            seal_every: 100,
            signing_key_path: PathBuf::from("logs/signing.key"),
            worm_dir: PathBuf::from("logs/worm"),
            decisions_dir: PathBuf::from("logs/decisions"),
            provenance_dir: PathBuf::from("logs/provenance"),
        }
    }
}

/// Aggregate configuration for the whole engine. Loadable from TOML via
/// `serde`; every field also has a programmatic default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub verifier: VerifierConfig,
    pub policy: PolicyConfig,
    pub audit: AuditConfig,
}

impl EngineConfig {
    /// Parse an `EngineConfig` from a TOML document. Unknown fields are
    /// ignored; missing sections fall back to their defaults.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| {
            crate::error::Error::ConfigurationError(format!("failed to parse configuration: {e}"))
        })
    }
}
