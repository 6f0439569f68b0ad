// Copyright 2026 Covenant Labs

//! Model-based decomposition: delegates to an injected
//! [`LlmBackend`]. The prompt includes the tool catalog and constraints;
//! the response is parsed as a structured plan. Parse errors are the
//! caller's signal to fall back to rule-based, not a panic or a retry loop
//! here.

use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::task::{DependencyKind, SideEffectClass, Task};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use serde_json::Value;

/// One task as described by a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub priority: Option<crate::task::Priority>,
}

/// The structured decomposition a model backend must return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPlanResponse {
    pub root_goal: String,
    pub tasks: Vec<TaskSpec>,
}

/// Abstraction over an LLM decomposition call, so this crate never depends
/// on a concrete provider SDK (Non-goals).
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn decompose(&self, query: &str, tool_catalog: &[String], context: &Value) -> Result<ModelPlanResponse>;
}

pub struct ModelBasedPlanner<'a> {
    backend: &'a dyn LlmBackend,
}

impl<'a> ModelBasedPlanner<'a> {
    pub fn new(backend: &'a dyn LlmBackend) -> Self {
        Self { backend }
    }

    pub async fn plan(&self, query: &str, context: &Value, registry: &ToolRegistry, tool_catalog: &[String]) -> Result<TaskGraph> {
        let response = self.backend.decompose(query, tool_catalog, context).await?;
        if response.tasks.is_empty() {
            return Err(Error::EmptyPlan);
        }

        let mut graph = TaskGraph::new(query, response.root_goal);
        for spec in &response.tasks {
            if !registry.contains(&spec.action) {
                return Err(Error::ToolUnavailable(spec.action.clone()));
            }
            let side_effect_class = registry
                .describe(&spec.action)
                .map(|d| d.side_effect_class)
                .unwrap_or(SideEffectClass::Pure);
            let mut task = Task::new(spec.id.clone(), spec.name.clone(), spec.action.clone())
                .with_side_effect_class(side_effect_class);
            if let Some(priority) = spec.priority {
                task = task.with_priority(priority);
            }
            for prereq in &spec.prerequisites {
                task = task.with_prerequisite(prereq.clone(), DependencyKind::Required);
            }
            task.arguments = spec.arguments.clone();
            graph.add(task)?;
        }
        Ok(graph)
    }
}
