// Copyright 2026 Covenant Labs

//! Error taxonomy for the HTN engine.
//!
//! Every fallible entry point in this crate returns [`Result<T>`]. Kinds are
//! grouped the way are grouped (policy, validation, planning,
//! execution, verification, infrastructure, fatal) rather than by which
//! module raises them, so callers can match on severity class instead of
//! chasing variants across modules.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The full error taxonomy. Variant names match the kinds named in
/// verbatim so audit records can carry `kind.to_string()` (via
/// [`Error::kind_label`]) without a translation table.
#[derive(Debug, Error)]
pub enum Error {
    // ---- Policy ----
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("tool '{tool}' blocked by policy: {reason}")]
    PolicyBlocked { tool: String, reason: String },

    #[error("tool '{tool}' requires approval before execution")]
    ApprovalRequired { tool: String },

    // ---- Validation ----
    #[error("argument validation failed for '{tool}': {reason}")]
    ValidationFailure { tool: String, reason: String },

    #[error("plan schema mismatch: {0}")]
    SchemaMismatch(String),

    // ---- Planning ----
    #[error("planning timed out after {0:?}")]
    PlanningTimeout(Duration),

    #[error("planner produced an empty plan for query")]
    EmptyPlan,

    #[error("tool '{0}' is not available in the registry")]
    ToolUnavailable(String),

    // ---- Execution ----
    #[error("task '{0}' timed out")]
    Timeout(String),

    #[error("ready queue overflowed: planning produced excessive fan-out")]
    OverfanOut,

    #[error("cycle detected: adding task '{0}' would create a cycle")]
    CycleDetected(String),

    #[error("worker crashed while executing task '{task_id}': {reason}")]
    WorkerCrashed { task_id: String, reason: String },

    #[error("unknown task id referenced: {0}")]
    UnknownTask(String),

    // ---- Verification ----
    #[error("postcondition failed for task '{task_id}': {predicate}")]
    PostconditionFailed { task_id: String, predicate: String },

    #[error("independent cross-check failed for task '{0}'")]
    IndependentCheckFailed(String),

    // ---- Infrastructure ----
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    // ---- Fatal ----
    #[error("WORM chain corruption detected at sequence {0}")]
    Corruption(u64),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl Error {
    /// Stable, lowercase-with-dots label used as the `kind` field of
    /// structured error responses ("kind, message, task_id?,
    /// retryable, correlation_id").
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::PolicyViolation(_) => "policy_violation",
            Error::PolicyBlocked { .. } => "policy_blocked",
            Error::ApprovalRequired { .. } => "approval_required",
            Error::ValidationFailure { .. } => "validation_failure",
            Error::SchemaMismatch(_) => "schema_mismatch",
            Error::PlanningTimeout(_) => "planning_timeout",
            Error::EmptyPlan => "empty_plan",
            Error::ToolUnavailable(_) => "tool_unavailable",
            Error::Timeout(_) => "timeout",
            Error::OverfanOut => "overfan_out",
            Error::CycleDetected(_) => "cycle_detected",
            Error::WorkerCrashed { .. } => "worker_crashed",
            Error::UnknownTask(_) => "unknown_task",
            Error::PostconditionFailed { .. } => "postcondition_failed",
            Error::IndependentCheckFailed(_) => "independent_check_failed",
            Error::StorageError(_) => "storage_error",
            Error::SignatureError(_) => "signature_error",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::Corruption(_) => "corruption",
            Error::ConfigurationError(_) => "configuration_error",
        }
    }

    /// Whether the executor's retry policy may retry an
    /// operation that failed with this error. Policy and validation
    /// failures are never retryable; timeouts and infrastructure hiccups
    /// are, up to `max_retries`.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::BackendUnavailable(_) | Error::StorageError(_)
        )
    }

    /// True for the `Fatal` class: these abort the request
    /// and are escalated out of the process rather than recovered at a
    /// boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ConfigurationError(_))
    }
}
