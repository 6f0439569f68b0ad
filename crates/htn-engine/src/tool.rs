// Copyright 2026 Covenant Labs

//! Tool Registry & Tool Executor Adapter.
//!
//! Tools, like strategies and verification levels, are
//! "tagged variants plus a small capability set": any `Tool` implementation
//! registers into a keyed map at startup and is called only through
//! [`Tool::describe`]/[`Tool::invoke`]. This crate never implements a
//! concrete tool (calculator, sandbox, file reader, ...) — those are
//! external collaborators.

use crate::error::{Error, Result};
use crate::redactor::Redactor;
use crate::task::SideEffectClass;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimal internal schema, sufficient for the argument-validation step;
/// not an attempt at full JSON-Schema — rich validation belongs to the
/// collaborator that owns the tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgType {
    String,
    Number,
    Bool,
    Array,
    Object,
    Enum(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
}

/// Declarative description of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub arguments: Vec<ArgSpec>,
    pub capabilities: Vec<String>,
    pub side_effect_class: SideEffectClass,
    pub default_timeout: Duration,
    /// True if this tool's side effects are commutative and therefore do
    /// not need an exclusive resource token even when `write`/`network`/
    /// `dangerous`.
    pub commutative: bool,
    /// Resource name serialized non-commutative calls acquire a token on.
    pub exclusive_resource: Option<String>,
}

impl ToolDescriptor {
    pub fn validate_arguments(&self, args: &HashMap<String, Value>) -> Result<()> {
        for spec in &self.arguments {
            let value = args.get(&spec.name);
            if spec.required && value.is_none() {
                return Err(Error::ValidationFailure {
                    tool: self.name.clone(),
                    reason: format!("missing required argument '{}'", spec.name),
                });
            }
            if let Some(v) = value {
                if !type_matches(&spec.arg_type, v) {
                    return Err(Error::ValidationFailure {
                        tool: self.name.clone(),
                        reason: format!("argument '{}' has the wrong type", spec.name),
                    });
                }
            }
        }
        Ok(())
    }
}

fn type_matches(expected: &ArgType, value: &Value) -> bool {
    match expected {
        ArgType::String => value.is_string(),
        ArgType::Number => value.is_number(),
        ArgType::Bool => value.is_boolean(),
        ArgType::Array => value.is_array(),
        ArgType::Object => value.is_object(),
        ArgType::Enum(options) => value.as_str().map(|s| options.iter().any(|o| o == s)).unwrap_or(false),
    }
}

/// A cooperative cancellation flag, checked by tools between checkpoints.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A tool implementation, invoked only through this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    fn describe(&self) -> ToolDescriptor;
    async fn invoke(
        &self,
        arguments: HashMap<String, Value>,
        deadline: Instant,
        cancel: CancelSignal,
    ) -> Result<Value>;
}

/// Status reported by [`ToolRegistry::invoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Success,
    Error,
    Blocked,
    Timeout,
    ValidationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub status: ToolStatus,
    pub output: Value,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// A policy check the registry consults before dispatch. Kept as a trait
/// object so [`ToolRegistry`] does not depend on
/// [`crate::policy::PolicyGuardian`] directly; the orchestrator wires the
/// two together.
pub trait ToolPolicyCheck: Send + Sync {
    fn check(&self, tool_name: &str) -> std::result::Result<(), String>;
}

/// A keyed map of tool name to descriptor + invocable.
/// Concurrent-read via [`DashMap`], since the executor looks tools up from
/// many worker threads during execution.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    redactor: Redactor,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: DashMap::new(), redactor: Redactor::with_defaults() }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.describe().name;
        self.tools.insert(name, tool);
    }

    pub fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.describe())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// The full set of registered tool names, used by the planner to
    /// compute a plan's fingerprint before a graph exists.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    /// The 5-step invocation contract . Never raises for
    /// an expected failure mode (unknown tool, bad args, policy block,
    /// timeout) — those become `Err` only for genuinely unknown tools;
    /// everything else is folded into [`ToolInvocationResult::status`] so
    /// the executor can apply retry/propagation policy uniformly.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
        deadline: Instant,
        cancel: CancelSignal,
        policy: &dyn ToolPolicyCheck,
    ) -> Result<ToolInvocationResult> {
        let tool = self.tools.get(name).map(|e| e.clone()).ok_or_else(|| Error::ToolUnavailable(name.to_string()))?;
        let descriptor = tool.describe();

        if let Err(reason) = descriptor.validate_arguments(&arguments) {
            let reason = match reason {
                Error::ValidationFailure { reason, .. } => reason,
                other => other.to_string(),
            };
            return Ok(ToolInvocationResult {
                status: ToolStatus::ValidationFailed,
                output: Value::Null,
                duration_ms: 0,
                error: Some(reason),
            });
        }

        if let Err(reason) = policy.check(name) {
            return Ok(ToolInvocationResult {
                status: ToolStatus::Blocked,
                output: Value::Null,
                duration_ms: 0,
                error: Some(reason),
            });
        }

        let start = Instant::now();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(ToolInvocationResult {
                status: ToolStatus::Timeout,
                output: Value::Null,
                duration_ms: 0,
                error: Some("deadline already elapsed".to_string()),
            });
        }

        let invocation = tool.invoke(arguments, deadline, cancel.clone());
        let outcome = tokio::time::timeout(remaining, invocation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(output)) => ToolInvocationResult {
                status: ToolStatus::Success,
                output: redact_value(&self.redactor, &output),
                duration_ms,
                error: None,
            },
            Ok(Err(e)) => ToolInvocationResult {
                status: ToolStatus::Error,
                output: Value::Null,
                duration_ms,
                error: Some(e.to_string()),
            },
            Err(_) => {
                cancel.cancel();
                ToolInvocationResult {
                    status: ToolStatus::Timeout,
                    output: Value::Null,
                    duration_ms,
                    error: Some(format!("tool '{name}' exceeded its deadline")),
                }
            }
        };
        Ok(result)
    }
}

fn redact_value(redactor: &Redactor, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redactor.redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(redactor, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), redact_value(redactor, v))).collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    #[async_trait]
    impl Tool for Echo {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".to_string(),
                version: "1".to_string(),
                description: "echoes input".to_string(),
                arguments: vec![ArgSpec { name: "text".to_string(), arg_type: ArgType::String, required: true }],
                capabilities: vec![],
                side_effect_class: SideEffectClass::Pure,
                default_timeout: Duration::from_secs(5),
                commutative: true,
                exclusive_resource: None,
            }
        }
        async fn invoke(&self, arguments: HashMap<String, Value>, _deadline: Instant, _cancel: CancelSignal) -> Result<Value> {
            Ok(arguments.get("text").cloned().unwrap_or(Value::Null))
        }
    }

    struct SlowTool;
    #[async_trait]
    impl Tool for SlowTool {
        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "slow".to_string(),
                version: "1".to_string(),
                description: "sleeps".to_string(),
                arguments: vec![],
                capabilities: vec![],
                side_effect_class: SideEffectClass::Pure,
                default_timeout: Duration::from_millis(100),
                commutative: true,
                exclusive_resource: None,
            }
        }
        async fn invoke(&self, _arguments: HashMap<String, Value>, _deadline: Instant, cancel: CancelSignal) -> Result<Value> {
            for _ in 0..100 {
                if cancel.is_cancelled() {
                    return Err(Error::Timeout("slow".to_string()));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(Value::Null)
        }
    }

    struct AllowAll;
    impl ToolPolicyCheck for AllowAll {
        fn check(&self, _tool_name: &str) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct DenyAll;
    impl ToolPolicyCheck for DenyAll {
        fn check(&self, tool_name: &str) -> std::result::Result<(), String> {
            Err(format!("{tool_name} is denied"))
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let result = registry
            .invoke("nope", HashMap::new(), Instant::now() + Duration::from_secs(1), CancelSignal::new(), &AllowAll)
            .await;
        assert!(matches!(result, Err(Error::ToolUnavailable(_))));
    }

    #[tokio::test]
    async fn missing_required_argument_is_validation_failed() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry
            .invoke("echo", HashMap::new(), Instant::now() + Duration::from_secs(1), CancelSignal::new(), &AllowAll)
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn policy_block_short_circuits_execution() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let mut args = HashMap::new();
        args.insert("text".to_string(), Value::String("hi".to_string()));
        let result = registry
            .invoke("echo", args, Instant::now() + Duration::from_secs(1), CancelSignal::new(), &DenyAll)
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Blocked);
    }

    #[tokio::test]
    async fn timeout_cancels_and_reports() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let result = registry
            .invoke("slow", HashMap::new(), Instant::now() + Duration::from_millis(50), CancelSignal::new(), &AllowAll)
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Timeout);
    }

    #[tokio::test]
    async fn success_redacts_output() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let mut args = HashMap::new();
        args.insert("text".to_string(), Value::String("email me at a@b.com".to_string()));
        let result = registry
            .invoke("echo", args, Instant::now() + Duration::from_secs(1), CancelSignal::new(), &AllowAll)
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.output, Value::String("email me at [EMAIL_REDACTED]".to_string()));
    }
}
