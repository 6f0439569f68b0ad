// Copyright 2026 Covenant Labs

//! The Agent Orchestrator: the top-level loop a caller
//! drives one user message through. Classifies the message as a
//! single-action query (bounded simple loop, direct tool calls) or a
//! multi-step one (full HTN: Planner → Executor → Verifier), records a
//! Decision Record at every stage, and finalizes one provenance graph per
//! conversation.

use crate::decision_record::{DecisionInput, DecisionKind};
use crate::error::Error;
use crate::graph::TaskGraph;
use crate::planner::Planner;
use crate::policy::PolicyVerdict;
use crate::provenance::ProvenanceBuilder;
use crate::task::{Task, TaskState};
use crate::tool::{CancelSignal, ToolStatus};
use crate::verifier::VerificationSummary;
use crate::Context;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::error;

/// A single-action query handled without building a Task Graph
/// (step 3). Bounds how many direct tool-call attempts the
/// simple loop makes before giving up.
const MAX_SIMPLE_LOOP_ITERATIONS: usize = 3;

fn simple_query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(?:read|show|cat)\s+(\S+)\s*$").unwrap())
}

/// The caller-facing error shape for any recoverable or fatal failure
///: `{kind, message, task_id?, retryable, correlation_id}`.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub kind: String,
    pub message: String,
    pub task_id: Option<String>,
    pub retryable: bool,
    pub correlation_id: String,
}

impl StructuredError {
    fn from(error: &Error, task_id: Option<String>) -> Self {
        Self {
            kind: error.kind_label().to_string(),
            message: error.to_string(),
            task_id,
            retryable: error.retryable(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn critical_failure(task_id: impl Into<String>) -> Self {
        Self {
            kind: "critical_failure".to_string(),
            message: "a CRITICAL task failed and the simple-loop fallback did not recover".to_string(),
            task_id: Some(task_id.into()),
            retryable: false,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The outcome of [`handle_message`]: either a response with whatever
/// independent results completed, or a structured error.
/// Both can legitimately co-occur when partial results survive alongside a
/// later stage's failure.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorResponse {
    pub conversation_id: String,
    pub text: Option<String>,
    pub plan_fingerprint: Option<String>,
    pub verification: Option<VerificationSummary>,
    pub error: Option<StructuredError>,
}

impl OrchestratorResponse {
    fn new(conversation_id: &str) -> Self {
        Self { conversation_id: conversation_id.to_string(), ..Default::default() }
    }
}

/// Heuristic classifier (step 3): a single verb acting on a
/// single target is handled by the bounded simple loop; anything else goes
/// through full HTN planning.
fn is_simple_loop_query(query: &str) -> bool {
    simple_query_pattern().is_match(query)
}

/// Drive one user message through the full orchestration loop. Never
/// returns `Err`: every failure is folded into `response.error` so the
/// caller always gets a response object, with a Decision Record and a WORM
/// event recorded for the failure path too.
pub async fn handle_message(context: &Context, conversation_id: &str, message: &str, approved_tools: &[String]) -> OrchestratorResponse {
    let mut response = OrchestratorResponse::new(conversation_id);
    let mut provenance = ProvenanceBuilder::new(conversation_id);
    let user_agent = provenance.add_agent("user");
    let prompt_activity = provenance.start_generation(&user_agent);
    let prompt_entity = provenance.add_artifact("prompt", &prompt_activity, None);

    let query_verdict = context.policy.validate_query(message);
    record_verdict(context, "validate_query", &query_verdict, &mut response);

    if !query_verdict.allowed {
        let reason = query_verdict.violations.join("; ");
        record_decision(
            context,
            DecisionInput {
                kind: DecisionKind::PolicyReject,
                actor: "orchestrator",
                task_id: None,
                input: &serde_json::json!({"conversation_id": conversation_id, "message": message}),
                plan: &Value::Null,
                result: &serde_json::json!({"violations": query_verdict.violations}),
                tools_used: vec![],
                alternatives_considered: vec![],
                frameworks: context.policy.active_frameworks().to_vec(),
            },
            &mut response,
        );
        // the policy rejection itself is the primary error; it always wins
        // over any audit-write failure just logged above.
        response.error = Some(StructuredError {
            kind: "policy_violation".to_string(),
            message: reason,
            task_id: None,
            retryable: false,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        });
        finalize_provenance(provenance, context, &mut response);
        return response;
    }

    if is_simple_loop_query(message) {
        return run_simple_loop_path(context, response, provenance, &prompt_entity, message).await;
    }

    run_htn_path(context, response, provenance, &prompt_entity, message, approved_tools).await
}

async fn run_simple_loop_path(
    context: &Context,
    mut response: OrchestratorResponse,
    mut provenance: ProvenanceBuilder,
    prompt_entity: &str,
    message: &str,
) -> OrchestratorResponse {
    let Some(captures) = simple_query_pattern().captures(message) else {
        response.error = Some(StructuredError {
            kind: "empty_plan".to_string(),
            message: "simple-loop classifier matched but the action could not be re-parsed".to_string(),
            task_id: None,
            retryable: false,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        });
        finalize_provenance(provenance, context, &mut response);
        return response;
    };
    let target = captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let mut arguments = HashMap::new();
    arguments.insert("path".to_string(), Value::String(target));

    let outcome = direct_tool_call(context, "read_file", arguments, &mut provenance, prompt_entity).await;
    finish_with_tool_outcome(context, response, provenance, outcome, None)
}

/// Invoke one tool directly, outside any Task Graph, retrying transient
/// failures up to [`MAX_SIMPLE_LOOP_ITERATIONS`] (step 3:
/// "bounded simple loop").
async fn direct_tool_call(
    context: &Context,
    tool_name: &str,
    arguments: HashMap<String, Value>,
    provenance: &mut ProvenanceBuilder,
    prompt_entity: &str,
) -> crate::tool::ToolInvocationResult {
    let activity = provenance.add_tool_activity(tool_name, std::slice::from_ref(&prompt_entity.to_string()));
    let timeout = Duration::from_millis(context.config.executor.task_timeout_ms);
    let policy = context.policy.as_ref();

    let mut last = crate::tool::ToolInvocationResult {
        status: ToolStatus::Error,
        output: Value::Null,
        duration_ms: 0,
        error: Some("no attempt made".to_string()),
    };
    for _ in 0..MAX_SIMPLE_LOOP_ITERATIONS {
        let deadline = Instant::now() + timeout;
        last = context
            .tools
            .invoke(tool_name, arguments.clone(), deadline, CancelSignal::new(), policy)
            .await
            .unwrap_or_else(|e| crate::tool::ToolInvocationResult {
                status: ToolStatus::Error,
                output: Value::Null,
                duration_ms: 0,
                error: Some(e.to_string()),
            });
        if !matches!(last.status, ToolStatus::Timeout | ToolStatus::Error) {
            break;
        }
    }
    provenance.add_artifact("tool_output", &activity, Some(prompt_entity));
    last
}

fn finish_with_tool_outcome(
    context: &Context,
    mut response: OrchestratorResponse,
    provenance: ProvenanceBuilder,
    outcome: crate::tool::ToolInvocationResult,
    task_id: Option<String>,
) -> OrchestratorResponse {
    match outcome.status {
        ToolStatus::Success => {
            response.text = Some(outcome.output.to_string());
        }
        _ => {
            response.error = Some(StructuredError {
                kind: format!("{:?}", outcome.status).to_lowercase(),
                message: outcome.error.unwrap_or_else(|| "tool call did not succeed".to_string()),
                task_id,
                retryable: matches!(outcome.status, ToolStatus::Timeout),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            });
        }
    }
    record_decision(
        context,
        DecisionInput {
            kind: DecisionKind::Response,
            actor: "orchestrator",
            task_id: None,
            input: &Value::Null,
            plan: &Value::Null,
            result: &serde_json::json!({"status": format!("{:?}", outcome.status)}),
            tools_used: vec![],
            alternatives_considered: vec![],
            frameworks: context.policy.active_frameworks().to_vec(),
        },
        &mut response,
    );
    finalize_provenance(provenance, context, &mut response);
    response
}

async fn run_htn_path(
    context: &Context,
    mut response: OrchestratorResponse,
    mut provenance: ProvenanceBuilder,
    prompt_entity: &str,
    message: &str,
    approved_tools: &[String],
) -> OrchestratorResponse {
    let planning_activity = provenance.start_generation(prompt_entity);

    let planner = Planner::new(context.config.planner.clone(), context.backend());
    let plan = match planner.plan(message, &Value::Null, &context.tools, None).await {
        Ok(plan) => plan,
        Err(e) => {
            record_error_dr(context, &e, None, &mut response);
            response.error = Some(StructuredError::from(&e, None));
            finalize_provenance(provenance, context, &mut response);
            return response;
        }
    };
    response.plan_fingerprint = Some(plan.fingerprint.clone());
    provenance.add_artifact("plan", &planning_activity, Some(prompt_entity));

    let plan_verdict = context.policy.validate_plan(&plan.graph);
    record_verdict(context, "validate_plan", &plan_verdict, &mut response);
    if !plan_verdict.allowed {
        let e = Error::PolicyViolation(plan_verdict.violations.join("; "));
        record_error_dr(context, &e, None, &mut response);
        response.error = Some(StructuredError::from(&e, None));
        finalize_provenance(provenance, context, &mut response);
        return response;
    }

    if let Err(e) = context.policy.check_approvals(&plan.graph, approved_tools) {
        record_error_dr(context, &e, None, &mut response);
        response.error = Some(StructuredError::from(&e, None));
        finalize_provenance(provenance, context, &mut response);
        return response;
    }

    record_decision(
        context,
        DecisionInput {
            kind: DecisionKind::Planning,
            actor: "planner",
            task_id: None,
            input: &serde_json::json!({"query": message}),
            plan: &serde_json::json!({"fingerprint": plan.fingerprint, "tasks": plan.graph.len()}),
            result: &Value::Null,
            tools_used: plan.graph.tasks().map(|t| t.action.clone()).collect(),
            alternatives_considered: vec![],
            frameworks: context.policy.active_frameworks().to_vec(),
        },
        &mut response,
    );

    let report = match context.executor.execute(plan.graph, None, &context.worm, &context.verifier, None).await {
        Ok(report) => report,
        Err(e) => {
            record_error_dr(context, &e, None, &mut response);
            response.error = Some(StructuredError::from(&e, None));
            finalize_provenance(provenance, context, &mut response);
            return response;
        }
    };

    if let Some(critical_task_id) = &report.aborted_by_critical_failure {
        return fall_back_to_simple_loop(context, response, provenance, prompt_entity, &report.graph, critical_task_id).await;
    }

    let records: Vec<_> = {
        let mut out = Vec::new();
        for task in report.graph.tasks() {
            if task.state == TaskState::Completed {
                out.push(context.verifier.verify(task, 0.0, None).await);
            }
        }
        out
    };
    let summary = VerificationSummary::from_records(&records);
    record_decision(
        context,
        DecisionInput {
            kind: DecisionKind::Verification,
            actor: "verifier",
            task_id: None,
            input: &Value::Null,
            plan: &Value::Null,
            result: &serde_json::json!({"passed": summary.passed, "failed": summary.failed, "coverage": summary.coverage}),
            tools_used: vec![],
            alternatives_considered: vec![],
            frameworks: vec![],
        },
        &mut response,
    );

    let stats = report.graph.stats();
    response.text = Some(format!(
        "completed {}/{} tasks ({} failed, {} skipped)",
        stats.completed, stats.total, stats.failed, stats.skipped
    ));
    response.verification = Some(summary);

    record_decision(
        context,
        DecisionInput {
            kind: DecisionKind::Response,
            actor: "orchestrator",
            task_id: None,
            input: &Value::Null,
            plan: &Value::Null,
            result: &serde_json::json!({"text": response.text}),
            tools_used: vec![],
            alternatives_considered: vec![],
            frameworks: vec![],
        },
        &mut response,
    );

    finalize_provenance(provenance, context, &mut response);
    response
}

/// On a CRITICAL task's failure the HTN path gets
/// exactly one fallback attempt through the simple loop, with a reduced
/// task set (the first task that never got a chance to run). If there is
/// no such task, or the fallback call also fails, a structured
/// `critical_failure` error is returned — it never recurses into another
/// HTN attempt (the conservative reading).
async fn fall_back_to_simple_loop(
    context: &Context,
    mut response: OrchestratorResponse,
    mut provenance: ProvenanceBuilder,
    prompt_entity: &str,
    graph: &TaskGraph,
    critical_task_id: &str,
) -> OrchestratorResponse {
    let reduced: Option<&Task> = graph.tasks().find(|t| matches!(t.state, TaskState::Pending | TaskState::Ready));

    let Some(task) = reduced else {
        record_error_dr(
            context,
            &Error::WorkerCrashed { task_id: critical_task_id.to_string(), reason: "critical failure, no task left to retry".to_string() },
            Some(critical_task_id.to_string()),
            &mut response,
        );
        response.error = Some(StructuredError::critical_failure(critical_task_id));
        finalize_provenance(provenance, context, &mut response);
        return response;
    };

    let arguments: HashMap<String, Value> = task.arguments.clone().into_iter().collect();
    let action = task.action.clone();
    let task_id = task.id.clone();
    let outcome = direct_tool_call(context, &action, arguments, &mut provenance, prompt_entity).await;

    if !matches!(outcome.status, ToolStatus::Success) {
        response.error = Some(StructuredError::critical_failure(critical_task_id));
        finalize_provenance(provenance, context, &mut response);
        return response;
    }

    finish_with_tool_outcome(context, response, provenance, outcome, Some(task_id))
}

fn record_error_dr(context: &Context, error: &Error, task_id: Option<String>, response: &mut OrchestratorResponse) {
    record_decision(
        context,
        DecisionInput {
            kind: DecisionKind::Response,
            actor: "orchestrator",
            task_id: task_id.as_deref(),
            input: &Value::Null,
            plan: &Value::Null,
            result: &serde_json::json!({"error_kind": error.kind_label(), "message": error.to_string()}),
            tools_used: vec![],
            alternatives_considered: vec![],
            frameworks: vec![],
        },
        response,
    );
}

/// Record a Decision Record, logging and folding a write failure into
/// `response.error` rather than discarding it. Infrastructure errors on the
/// audit path must surface to the caller, not silently pass through as if
/// the write had succeeded (the response's own error, if any, already set,
/// takes priority — this only fills a still-empty slot).
fn record_decision(context: &Context, input: DecisionInput<'_>, response: &mut OrchestratorResponse) {
    if let Err(e) = context.decisions.record(input, &context.worm) {
        error!(error = %e, "failed to write decision record");
        if response.error.is_none() {
            response.error = Some(StructuredError::from(&e, None));
        }
    }
}

/// Same treatment for a policy verdict's WORM write.
fn record_verdict(context: &Context, stage: &str, verdict: &PolicyVerdict, response: &mut OrchestratorResponse) {
    if let Err(e) = context.policy.record_verdict(&context.worm, stage, verdict) {
        error!(error = %e, stage, "failed to write policy verdict to WORM log");
        if response.error.is_none() {
            response.error = Some(StructuredError::from(&e, None));
        }
    }
}

/// Seal and persist the conversation's provenance graph, logging and
/// folding a write failure into `response.error` rather than discarding it.
fn finalize_provenance(provenance: ProvenanceBuilder, context: &Context, response: &mut OrchestratorResponse) {
    if let Err(e) = provenance.finalize(context.provenance_dir()) {
        error!(error = %e, "failed to finalize provenance graph");
        if response.error.is_none() {
            response.error = Some(StructuredError::from(&e, None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::task::SideEffectClass;
    use crate::tool::{ArgSpec, ArgType, Tool, ToolDescriptor};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct ReadFileStub;
    #[async_trait]
    impl Tool for ReadFileStub {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "read_file".to_string(),
                version: "1".to_string(),
                description: String::new(),
                arguments: vec![ArgSpec { name: "path".to_string(), arg_type: ArgType::String, required: true }],
                capabilities: vec![],
                side_effect_class: SideEffectClass::Read,
                default_timeout: Duration::from_secs(5),
                commutative: true,
                exclusive_resource: None,
            }
        }
        async fn invoke(&self, arguments: HashMap<String, Value>, _deadline: Instant, _cancel: CancelSignal) -> crate::error::Result<Value> {
            Ok(serde_json::json!({"content": format!("contents of {}", arguments.get("path").and_then(|v| v.as_str()).unwrap_or(""))}))
        }
    }

    struct SummarizeStub;
    #[async_trait]
    impl Tool for SummarizeStub {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "summarize".to_string(),
                version: "1".to_string(),
                description: String::new(),
                arguments: vec![],
                capabilities: vec![],
                side_effect_class: SideEffectClass::Pure,
                default_timeout: Duration::from_secs(5),
                commutative: true,
                exclusive_resource: None,
            }
        }
        async fn invoke(&self, _arguments: HashMap<String, Value>, _deadline: Instant, _cancel: CancelSignal) -> crate::error::Result<Value> {
            Ok(serde_json::json!({"summary": "ok"}))
        }
    }

    fn context_with_tools(dir: &tempfile::TempDir) -> Context {
        let mut config = EngineConfig::default();
        config.audit.signing_key_path = dir.path().join("signing.key");
        config.audit.worm_dir = dir.path().join("worm");
        config.audit.decisions_dir = dir.path().join("decisions");
        config.audit.provenance_dir = dir.path().join("provenance");
        config.policy.forbidden_patterns = vec![r"(?i)password is \S+".to_string()];

        let context = Context::new(config, None).unwrap();
        context.tools.register(Arc::new(ReadFileStub));
        context.tools.register(Arc::new(SummarizeStub));
        context
    }

    #[tokio::test]
    async fn simple_loop_handles_single_action_query() {
        let dir = tempdir().unwrap();
        let context = context_with_tools(&dir);
        let response = handle_message(&context, "conv-1", "read report.txt", &[]).await;
        assert!(response.error.is_none());
        assert!(response.text.unwrap().contains("contents of report.txt"));
    }

    #[tokio::test]
    async fn htn_path_handles_multi_step_query() {
        let dir = tempdir().unwrap();
        let context = context_with_tools(&dir);
        let response = handle_message(&context, "conv-2", "summarize report.txt", &[]).await;
        assert!(response.error.is_none());
        assert!(response.plan_fingerprint.is_some());
        let summary = response.verification.unwrap();
        assert_eq!(summary.failed.len(), 0);
    }

    #[tokio::test]
    async fn policy_violation_short_circuits_before_planning() {
        let dir = tempdir().unwrap();
        let context = context_with_tools(&dir);
        let response = handle_message(&context, "conv-3", "my password is hunter2", &[]).await;
        assert!(response.error.is_some());
        assert_eq!(response.error.unwrap().kind, "policy_violation");
        assert!(response.plan_fingerprint.is_none());
    }
}
