// Copyright 2026 Covenant Labs

//! The [`Task`] data model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stable task identifier, unique within a [`crate::graph::TaskGraph`].
pub type TaskId = String;

/// Scheduling priority. Ordered `Low < Normal < High < Critical` so
/// `Priority` can be compared directly when breaking scheduler ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A task's place in its lifecycle. Transitions are enforced by
/// [`Task::transition`]; see the allowed-edges diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskState {
    /// Terminal states never transition again once reached, *except*
    /// `Failed`, which is terminal only once retries are exhausted
    ///.
    pub fn is_terminal(&self, attempt_count: u32, max_retries: u32) -> bool {
        match self {
            TaskState::Completed | TaskState::Skipped | TaskState::Cancelled => true,
            TaskState::Failed => attempt_count >= max_retries,
            TaskState::Pending | TaskState::Ready | TaskState::Running => false,
        }
    }
}

/// The result payload recorded once a task finishes, successfully or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub output: Value,
    pub duration_ms: u64,
    /// Error message, present iff the task did not complete successfully.
    pub error: Option<String>,
}

/// Whether a dependency edge is optional: an optional prerequisite failing
/// does not skip its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    Required,
    Optional,
}

/// A declarative postcondition predicate evaluated by the [`crate::verifier::Verifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Postcondition {
    /// The result's `output` JSON must contain this non-null field.
    FieldPresent(String),
    /// The result's `output.<field>` must equal this value.
    FieldEquals { field: String, value: Value },
    /// The result's `output` must not be empty (null, "", [], or {}).
    NonEmpty,
}

/// An atomic unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Resolves to a tool name in the [`crate::tool::ToolRegistry`] or a
    /// recognized sub-plan marker.
    pub action: String,
    pub arguments: BTreeMap<String, Value>,
    pub prerequisites: Vec<(TaskId, DependencyKind)>,
    pub priority: Priority,
    pub state: TaskState,
    pub result: Option<TaskResult>,
    pub failure_reason: Option<String>,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub postconditions: Vec<Postcondition>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Side-effect class inherited from the resolved tool, used by the
    /// planner/executor for parallelism decisions.
    pub side_effect_class: SideEffectClass,
    /// Resource name this task must serialize on if its side effects are
    /// declared non-commutative.
    pub exclusive_resource: Option<String>,
}

/// Mirrors [`crate::tool::SideEffectClass`]; duplicated here (rather than a
/// `crate::tool` dependency edge) because a `Task` must be constructible
/// before a tool is resolved, e.g. by the rule-based planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffectClass {
    Pure,
    Read,
    Write,
    Network,
    Dangerous,
}

impl SideEffectClass {
    /// `pure` and `read` tasks may run concurrently without a resource
    /// token; everything else is sequential unless declared commutative.
    pub fn is_parallel_safe(&self) -> bool {
        matches!(self, SideEffectClass::Pure | SideEffectClass::Read)
    }
}

impl Task {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            action: action.into(),
            arguments: BTreeMap::new(),
            prerequisites: Vec::new(),
            priority: Priority::default(),
            state: TaskState::Pending,
            result: None,
            failure_reason: None,
            attempt_count: 0,
            max_retries: 2,
            postconditions: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            side_effect_class: SideEffectClass::Pure,
            exclusive_resource: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_prerequisite(mut self, id: impl Into<TaskId>, kind: DependencyKind) -> Self {
        self.prerequisites.push((id.into(), kind));
        self
    }

    #[must_use]
    pub fn with_side_effect_class(mut self, class: SideEffectClass) -> Self {
        self.side_effect_class = class;
        self
    }

    /// Required (non-optional) prerequisite ids.
    pub fn required_prerequisites(&self) -> impl Iterator<Item = &TaskId> {
        self.prerequisites
            .iter()
            .filter(|(_, kind)| *kind == DependencyKind::Required)
            .map(|(id, _)| id)
    }

    /// Attempt a state transition, rejecting edges not present in the
    /// diagram . `result` must be set iff the target state
    /// is `Completed` or `Failed` (the `Task` invariant ).
    pub fn transition(&mut self, to: TaskState, result: Option<TaskResult>) -> Result<(), String> {
        let allowed = matches!(
            (self.state, to),
            (TaskState::Pending, TaskState::Ready)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Ready, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Failed, TaskState::Ready)
                | (TaskState::Failed, TaskState::Skipped)
                | (TaskState::Running, TaskState::Cancelled)
                | (TaskState::Ready, TaskState::Cancelled)
        );
        if !allowed {
            return Err(format!("illegal transition {:?} -> {:?}", self.state, to));
        }
        let needs_result = matches!(to, TaskState::Completed | TaskState::Failed);
        if needs_result != result.is_some() {
            return Err(format!(
                "result must be set iff state is COMPLETED or FAILED (to={to:?})"
            ));
        }

        match to {
            TaskState::Running => self.started_at = Some(Utc::now()),
            TaskState::Completed | TaskState::Failed | TaskState::Skipped | TaskState::Cancelled => {
                self.ended_at = Some(Utc::now());
            }
            _ => {}
        }
        if to == TaskState::Failed {
            self.attempt_count += 1;
            if let Some(r) = &result {
                self.failure_reason = r.error.clone();
            }
        }
        if to == TaskState::Ready && self.state == TaskState::Failed {
            // retry: clear terminal bookkeeping from the failed attempt
            self.ended_at = None;
        }
        self.result = result;
        self.state = to;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.state == TaskState::Failed && self.attempt_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_highest() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn result_set_iff_terminal() {
        let mut t = Task::new("t1", "do it", "noop");
        t.transition(TaskState::Ready, None).unwrap();
        t.transition(TaskState::Running, None).unwrap();
        let err = t.transition(TaskState::Completed, None);
        assert!(err.is_err(), "COMPLETED without a result must be rejected");

        t.transition(
            TaskState::Completed,
            Some(TaskResult { output: Value::Null, duration_ms: 1, error: None }),
        )
        .unwrap();
        assert_eq!(t.state, TaskState::Completed);
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut t = Task::new("t1", "do it", "noop");
        let err = t.transition(TaskState::Completed, None);
        assert!(err.is_err());
    }

    #[test]
    fn retry_then_exhaust() {
        let mut t = Task::new("t1", "do it", "noop");
        t.max_retries = 1;
        t.transition(TaskState::Ready, None).unwrap();
        t.transition(TaskState::Running, None).unwrap();
        t.transition(
            TaskState::Failed,
            Some(TaskResult { output: Value::Null, duration_ms: 1, error: Some("boom".into()) }),
        )
        .unwrap();
        assert!(t.can_retry());
        t.transition(TaskState::Ready, None).unwrap();
        t.transition(TaskState::Running, None).unwrap();
        t.transition(
            TaskState::Failed,
            Some(TaskResult { output: Value::Null, duration_ms: 1, error: Some("boom again".into()) }),
        )
        .unwrap();
        assert!(!t.can_retry());
        assert!(t.state.is_terminal(t.attempt_count, t.max_retries));
    }
}
