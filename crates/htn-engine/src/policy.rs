// Copyright 2026 Covenant Labs

//! Policy / Compliance Guardian.
//!
//! Consulted at three points in a request's life: before planning
//! (`validate_query`), before execution (`validate_plan`), and after every
//! tool call (`audit_execution`). Strict mode rejects on any forbidden
//! pattern, denied tool, or missing approval; permissive mode redacts and
//! logs but lets execution continue.

use crate::config::PolicyConfig;
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::redactor::Redactor;
use crate::tool::{ToolDescriptor, ToolPolicyCheck};
use crate::worm::WormLog;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a rejected request stops the pipeline or only gets flagged
/// (see `PolicyConfig::strict_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    Strict,
    Permissive,
}

impl From<bool> for EnforcementMode {
    fn from(strict: bool) -> Self {
        if strict { EnforcementMode::Strict } else { EnforcementMode::Permissive }
    }
}

/// Outcome of a single guardian check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub violations: Vec<String>,
    pub pii_flags: Vec<String>,
    pub redacted_text: Option<String>,
}

impl PolicyVerdict {
    fn clean() -> Self {
        Self { allowed: true, violations: Vec::new(), pii_flags: Vec::new(), redacted_text: None }
    }
}

/// Compiles forbidden-pattern and PII regexes once and evaluates them
/// against queries, plans, and tool outputs. Also gates denied tools and
/// tools that require human approval before first use.
pub struct PolicyGuardian {
    forbidden: RegexSet,
    forbidden_sources: Vec<String>,
    pii: RegexSet,
    redactor: Redactor,
    mode: EnforcementMode,
    active_frameworks: Vec<String>,
    approval_required_tools: Vec<String>,
    forbidden_tools: Vec<String>,
    max_query_length: usize,
}

impl PolicyGuardian {
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        let forbidden = RegexSet::new(&config.forbidden_patterns)
            .map_err(|e| Error::ConfigurationError(format!("bad forbidden_patterns regex: {e}")))?;
        let pii = RegexSet::new(&config.pii_patterns)
            .map_err(|e| Error::ConfigurationError(format!("bad pii_patterns regex: {e}")))?;
        Ok(Self {
            forbidden,
            forbidden_sources: config.forbidden_patterns.clone(),
            pii,
            redactor: Redactor::with_defaults(),
            mode: EnforcementMode::from(config.strict_mode),
            active_frameworks: config.active_frameworks.clone(),
            approval_required_tools: config.approval_required_tools.clone(),
            forbidden_tools: config.forbidden_tools.clone(),
            max_query_length: config.max_query_length,
        })
    }

    pub fn active_frameworks(&self) -> &[String] {
        &self.active_frameworks
    }

    /// Step 1: screen the raw user query before any
    /// planning work begins.
    pub fn validate_query(&self, query: &str) -> PolicyVerdict {
        let mut violations = self.scan_forbidden(query);
        if query.len() > self.max_query_length {
            violations.push(format!(
                "query length {} exceeds max_query_length {}",
                query.len(),
                self.max_query_length
            ));
        }
        let pii_flags = self.scan_pii(query);
        self.finish(violations, pii_flags, Some(self.redactor.redact(query)))
    }

    /// Step 2: screen a freshly planned task graph before execution. Flags
    /// any task naming a forbidden tool, and separately reports which tasks
    /// still need human approval (`ApprovalRequired`).
    pub fn validate_plan(&self, graph: &TaskGraph) -> PolicyVerdict {
        let mut violations = Vec::new();
        for task in graph.tasks() {
            if self.forbidden_tools.iter().any(|d| d == &task.action) {
                violations.push(format!("task '{}' uses forbidden tool '{}'", task.id, task.action));
            }
            violations.extend(self.scan_forbidden(&task.name));
        }
        self.finish(violations, Vec::new(), None)
    }

    /// Returns `Err(Error::ApprovalRequired)` for the first task whose
    /// resolved tool is in `approval_required_tools` and has not already
    /// been approved by the caller.
    pub fn check_approvals(&self, graph: &TaskGraph, approved_tools: &[String]) -> Result<()> {
        for task in graph.tasks() {
            if self.approval_required_tools.iter().any(|t| t == &task.action)
                && !approved_tools.iter().any(|t| t == &task.action)
            {
                return Err(Error::ApprovalRequired { tool: task.action.clone() });
            }
        }
        Ok(())
    }

    /// Step 3: screen a tool's output after execution, before it is handed
    /// back into the plan or recorded. Redaction always happens regardless
    /// of mode; only the `allowed` verdict differs by mode.
    pub fn audit_execution(&self, tool: &ToolDescriptor, output: &Value) -> PolicyVerdict {
        let text = output.to_string();
        let mut violations = self.scan_forbidden(&text);
        if self.forbidden_tools.iter().any(|d| d == &tool.name) {
            violations.push(format!("tool '{}' is forbidden", tool.name));
        }
        let pii_flags = self.scan_pii(&text);
        self.finish(violations, pii_flags, Some(self.redactor.redact(&text)))
    }

    /// Emit a `policy.verdict` event for any non-clean check, so that a
    /// permissive-mode pass-through is still visible in the audit trail.
    pub fn record_verdict(&self, worm: &WormLog, stage: &str, verdict: &PolicyVerdict) -> Result<()> {
        if verdict.violations.is_empty() && verdict.pii_flags.is_empty() {
            return Ok(());
        }
        worm.append(
            "policy.verdict",
            &serde_json::json!({
                "stage": stage,
                "allowed": verdict.allowed,
                "violations": verdict.violations,
                "pii_flags": verdict.pii_flags,
                "strict_mode": matches!(self.mode, EnforcementMode::Strict),
            }),
        )?;
        Ok(())
    }

    fn scan_forbidden(&self, text: &str) -> Vec<String> {
        self.forbidden
            .matches(text)
            .into_iter()
            .map(|idx| format!("forbidden pattern matched: {}", self.forbidden_sources[idx]))
            .collect()
    }

    fn scan_pii(&self, text: &str) -> Vec<String> {
        self.pii.matches(text).into_iter().map(|idx| format!("pii_pattern[{idx}]")).collect()
    }

    fn finish(&self, violations: Vec<String>, pii_flags: Vec<String>, redacted_text: Option<String>) -> PolicyVerdict {
        if violations.is_empty() {
            return PolicyVerdict { pii_flags, redacted_text, ..PolicyVerdict::clean() };
        }
        PolicyVerdict {
            allowed: matches!(self.mode, EnforcementMode::Permissive),
            violations,
            pii_flags,
            redacted_text,
        }
    }
}

/// Adapts [`PolicyGuardian`] to the [`ToolPolicyCheck`] contract the tool
/// registry consults before dispatch (step 3).
impl ToolPolicyCheck for PolicyGuardian {
    fn check(&self, tool_name: &str) -> std::result::Result<(), String> {
        if self.forbidden_tools.iter().any(|d| d == tool_name) {
            return Err(format!("tool '{tool_name}' is forbidden by policy"));
        }
        Ok(())
    }
}
