// Copyright 2026 Covenant Labs

//! Rule-based decomposition: pattern matches a query
//! against a library of templates. Fast, deterministic, no external
//! dependency on a model backend.

use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::task::{DependencyKind, SideEffectClass, Task};
use crate::tool::ToolRegistry;
use regex::Regex;
use serde_json::Value;

/// One task skeleton within a [`Template`]. Argument values are filled in
/// from the query's capture groups at match time.
pub struct TemplateAction {
    pub id: &'static str,
    pub name: &'static str,
    pub action: &'static str,
    pub prerequisites: &'static [&'static str],
    pub side_effect_class: SideEffectClass,
    /// `(argument name, capture group index)`. Group 0 is the whole match.
    pub capture_args: &'static [(&'static str, usize)],
}

/// A query template: a compiled pattern plus the task skeletons it expands
/// into. `specificity` breaks ties between templates that both match,
/// favoring longer/more constrained patterns ("confidence
/// is a function of match specificity").
pub struct Template {
    pub name: &'static str,
    pub pattern: Regex,
    pub specificity: f64,
    pub actions: Vec<TemplateAction>,
}

/// The fixed library of templates. Grows as new common query shapes are
/// identified; each entry is self-contained and order-independent (the
/// planner picks the most specific match, not the first match).
pub fn default_templates() -> Vec<Template> {
    vec![
        Template {
            name: "read_then_summarize",
            pattern: Regex::new(r"(?i)summarize\s+(\S+)").unwrap(),
            specificity: 0.9,
            actions: vec![
                TemplateAction {
                    id: "read",
                    name: "read source",
                    action: "read_file",
                    prerequisites: &[],
                    side_effect_class: SideEffectClass::Read,
                    capture_args: &[("path", 1)],
                },
                TemplateAction {
                    id: "summarize",
                    name: "summarize content",
                    action: "summarize",
                    prerequisites: &["read"],
                    side_effect_class: SideEffectClass::Pure,
                    capture_args: &[],
                },
            ],
        },
        Template {
            name: "read_only",
            pattern: Regex::new(r"(?i)(?:read|show|cat)\s+(\S+)").unwrap(),
            specificity: 0.6,
            actions: vec![TemplateAction {
                id: "read",
                name: "read source",
                action: "read_file",
                prerequisites: &[],
                side_effect_class: SideEffectClass::Read,
                capture_args: &[("path", 1)],
            }],
        },
    ]
}

/// Splits a comma/"and"-separated list of targets following a verb, e.g.
/// `"summarize a.txt, b.txt, and c.txt"` → `["a.txt", "b.txt", "c.txt"]`.
/// Returns `None` when the query doesn't name at least two distinct
/// targets, so single-target queries fall through to [`default_templates`].
fn fan_out_targets(query: &str) -> Option<(&'static str, Vec<String>)> {
    let list_pattern = Regex::new(r"(?i)^\s*summarize\s+(.+?)\s*$").unwrap();
    let captures = list_pattern.captures(query)?;
    let list = captures.get(1)?.as_str();
    let targets: Vec<String> = list
        .split(',')
        .flat_map(|segment| segment.split(" and "))
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if targets.len() < 2 {
        return None;
    }
    Some(("summarize", targets))
}

/// Matches a query against [`default_templates`] and expands the
/// highest-specificity match into a [`TaskGraph`].
pub struct RuleBasedPlanner {
    templates: Vec<Template>,
}

impl Default for RuleBasedPlanner {
    fn default() -> Self {
        Self { templates: default_templates() }
    }
}

impl RuleBasedPlanner {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Returns the expanded graph and the confidence of the chosen
    /// template, or `Err(EmptyPlan)` if nothing matches. A query naming
    /// several independent targets for the same action (/// end-to-end scenario 2: "Summarize a.txt, b.txt, and c.txt") expands
    /// to that many independent tasks with no edges between them, ahead of
    /// the single-target templates below.
    pub fn plan(&self, query: &str, registry: &ToolRegistry) -> Result<(TaskGraph, f64)> {
        if let Some((action, targets)) = fan_out_targets(query) {
            return self.plan_fan_out(query, action, targets, registry);
        }

        let best = self
            .templates
            .iter()
            .filter_map(|t| t.pattern.captures(query).map(|c| (t, c)))
            .max_by(|(a, _), (b, _)| a.specificity.partial_cmp(&b.specificity).unwrap());

        let Some((template, captures)) = best else {
            return Err(Error::EmptyPlan);
        };

        let mut graph = TaskGraph::new(query, template.name);
        for action in &template.actions {
            if !registry.contains(action.action) {
                return Err(Error::ToolUnavailable(action.action.to_string()));
            }
            let mut task = Task::new(action.id, action.name, action.action)
                .with_side_effect_class(action.side_effect_class);
            for prereq in action.prerequisites {
                task = task.with_prerequisite(*prereq, DependencyKind::Required);
            }
            for (arg_name, group_idx) in action.capture_args {
                if let Some(m) = captures.get(*group_idx) {
                    task.arguments.insert(arg_name.to_string(), Value::String(m.as_str().to_string()));
                }
            }
            graph.add(task)?;
        }

        Ok((graph, template.specificity))
    }

    fn plan_fan_out(
        &self,
        query: &str,
        action: &str,
        targets: Vec<String>,
        registry: &ToolRegistry,
    ) -> Result<(TaskGraph, f64)> {
        if !registry.contains(action) {
            return Err(Error::ToolUnavailable(action.to_string()));
        }
        let side_effect_class = registry.describe(action).map(|d| d.side_effect_class).unwrap_or(SideEffectClass::Pure);
        let mut graph = TaskGraph::new(query, format!("{action} each target independently"));
        for (i, target) in targets.iter().enumerate() {
            let mut task = Task::new(format!("{action}-{i}"), format!("{action} {target}"), action)
                .with_side_effect_class(side_effect_class);
            task.arguments.insert("path".to_string(), Value::String(target.clone()));
            graph.add(task)?;
        }
        Ok((graph, 0.85))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTool(&'static str);
    #[async_trait::async_trait]
    impl crate::tool::Tool for StubTool {
        fn describe(&self) -> crate::tool::ToolDescriptor {
            crate::tool::ToolDescriptor {
                name: self.0.to_string(),
                version: "1".to_string(),
                description: String::new(),
                arguments: vec![],
                capabilities: vec![],
                side_effect_class: SideEffectClass::Pure,
                default_timeout: std::time::Duration::from_secs(1),
                commutative: true,
                exclusive_resource: None,
            }
        }
        async fn invoke(
            &self,
            _arguments: std::collections::HashMap<String, Value>,
            _deadline: std::time::Instant,
            _cancel: crate::tool::CancelSignal,
        ) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(StubTool("read_file")));
        registry.register(std::sync::Arc::new(StubTool("summarize")));
        registry
    }

    #[test]
    fn matches_the_most_specific_template() {
        let planner = RuleBasedPlanner::default();
        let (graph, confidence) = planner.plan("please summarize report.txt", &registry()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(confidence, 0.9);
        assert_eq!(graph.get("read").unwrap().arguments.get("path").unwrap(), "report.txt");
    }

    #[test]
    fn no_match_is_empty_plan() {
        let planner = RuleBasedPlanner::default();
        let err = planner.plan("what is the weather", &registry()).unwrap_err();
        assert!(matches!(err, Error::EmptyPlan));
    }

    #[test]
    fn unresolvable_action_is_tool_unavailable() {
        let planner = RuleBasedPlanner::default();
        let err = planner.plan("summarize report.txt", &ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable(_)));
    }

    #[test]
    fn multiple_targets_fan_out_to_independent_tasks() {
        let planner = RuleBasedPlanner::default();
        let (graph, confidence) = planner.plan("Summarize a.txt, b.txt, and c.txt", &registry()).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(confidence, 0.85);
        for task in graph.tasks() {
            assert!(task.prerequisites.is_empty());
        }
        assert!(graph.ready_tasks().len() == 3);
    }

    #[test]
    fn single_target_does_not_fan_out() {
        let (graph, _) = RuleBasedPlanner::default().plan("summarize report.txt", &registry()).unwrap();
        assert_eq!(graph.len(), 2);
    }
}
