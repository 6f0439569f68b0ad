// Copyright 2026 Covenant Labs

//! The Verifier: three levels of scrutiny applied to a
//! completed task, from "did it finish with output" to "re-derive the
//! result independently."

use crate::config::VerificationLevel;
use crate::task::{Postcondition, Task, TaskState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An independent re-check a `paranoid`-level verification can perform,
/// e.g. re-reading a file or re-hashing content, rather than trusting the
/// tool's own report. Kept as a trait object so this module never depends
/// on a concrete tool implementation.
#[async_trait::async_trait]
pub trait CrossCheck: Send + Sync {
    /// Returns `true` if re-deriving the task's result independently
    /// agrees with `result`.
    async fn recheck(&self, task: &Task, result: &Value) -> bool;
}

/// Per-task outcome of [`Verifier::verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub task_id: String,
    pub passed: bool,
    pub level: VerificationLevel,
    pub failed_predicates: Vec<String>,
    pub cross_checked: bool,
}

/// Aggregate result over a batch of tasks (`{passed,
/// failed[], coverage}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub passed: usize,
    pub failed: Vec<String>,
    /// Fraction of verified tasks that passed, in `[0, 1]`.
    pub coverage: f64,
}

impl VerificationSummary {
    pub fn from_records(records: &[VerificationRecord]) -> Self {
        let failed: Vec<String> = records.iter().filter(|r| !r.passed).map(|r| r.task_id.clone()).collect();
        let passed = records.len() - failed.len();
        let coverage = if records.is_empty() { 1.0 } else { passed as f64 / records.len() as f64 };
        Self { passed, failed, coverage }
    }
}

pub struct Verifier {
    level: VerificationLevel,
    sample_rate: f64,
}

impl Verifier {
    pub fn new(level: VerificationLevel, sample_rate: f64) -> Self {
        Self { level, sample_rate: sample_rate.clamp(0.0, 1.0) }
    }

    /// Check a task that has already reached COMPLETED, for post-hoc
    /// audits of a finished graph.
    pub async fn verify(&self, task: &Task, sample_slot: f64, cross_check: Option<&dyn CrossCheck>) -> VerificationRecord {
        if task.state != TaskState::Completed {
            return VerificationRecord {
                task_id: task.id.clone(),
                passed: false,
                level: self.level,
                failed_predicates: vec![format!("task is not COMPLETED (state={:?})", task.state)],
                cross_checked: false,
            };
        }
        let Some(result) = task.result.clone() else {
            return VerificationRecord {
                task_id: task.id.clone(),
                passed: false,
                level: self.level,
                failed_predicates: vec!["completed task has no result".to_string()],
                cross_checked: false,
            };
        };
        self.verify_pending(task, &result, sample_slot, cross_check).await
    }

    /// Check a tentative result the executor is about to commit, *before*
    /// the task has transitioned to COMPLETED ("failed
    /// verifications demote the task to FAILED" instead, so this must run
    /// while the task is still RUNNING).
    ///
    /// `sample_slot` is a stable `[0, 1)` value (e.g. derived from the task
    /// id) deciding whether this task falls within the paranoid sampling
    /// rate, so sampling is deterministic rather than relying on runtime
    /// randomness.
    pub async fn verify_pending(
        &self,
        task: &Task,
        result: &crate::task::TaskResult,
        sample_slot: f64,
        cross_check: Option<&dyn CrossCheck>,
    ) -> VerificationRecord {
        let mut failed_predicates = Vec::new();

        if is_empty_value(&result.output) {
            failed_predicates.push("result output is empty".to_string());
        }

        if matches!(self.level, VerificationLevel::Strict | VerificationLevel::Paranoid) {
            for postcondition in &task.postconditions {
                if let Some(reason) = check_postcondition(postcondition, &result.output) {
                    failed_predicates.push(reason);
                }
            }
        }

        let mut cross_checked = false;
        if matches!(self.level, VerificationLevel::Paranoid) && sample_slot < self.sample_rate {
            if let Some(checker) = cross_check {
                cross_checked = true;
                if !checker.recheck(task, &result.output).await {
                    failed_predicates.push("independent cross-check disagreed with result".to_string());
                }
            }
        }

        VerificationRecord {
            task_id: task.id.clone(),
            passed: failed_predicates.is_empty(),
            level: self.level,
            failed_predicates,
            cross_checked,
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn check_postcondition(postcondition: &Postcondition, output: &Value) -> Option<String> {
    match postcondition {
        Postcondition::FieldPresent(field) => {
            let present = output.get(field).map(|v| !v.is_null()).unwrap_or(false);
            (!present).then(|| format!("postcondition failed: field '{field}' not present"))
        }
        Postcondition::FieldEquals { field, value } => {
            let matches = output.get(field) == Some(value);
            (!matches).then(|| format!("postcondition failed: field '{field}' does not equal expected value"))
        }
        Postcondition::NonEmpty => is_empty_value(output).then(|| "postcondition failed: output is empty".to_string()),
    }
}
