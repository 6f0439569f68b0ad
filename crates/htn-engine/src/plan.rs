// Copyright 2026 Covenant Labs

//! The Plan type: a Task Graph plus the metadata a caller
//! needs to decide whether to trust, cache, or re-derive it.

use crate::config::PlannerStrategy;
use crate::graph::TaskGraph;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// A Task Graph produced by a [`crate::planner::Planner`], annotated with
/// the strategy that produced it, a confidence score, and a stable
/// fingerprint used by the Plan Cache.
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: TaskGraph,
    pub strategy: PlannerStrategy,
    /// In `[0, 1]`. Rule-based confidence is a function of template match
    /// specificity; hybrid takes the max across the strategies it ran.
    pub confidence: f64,
    pub reasoning: String,
    pub fingerprint: String,
}

impl Plan {
    /// `tool_catalog` is the set of tool names registered in the
    /// [`crate::tool::ToolRegistry`] at planning time, not the subset this
    /// particular plan happens to use — that is what makes the fingerprint
    /// computable *before* a graph exists, so the Plan Cache can be
    /// consulted up front.
    pub fn new(
        graph: TaskGraph,
        strategy: PlannerStrategy,
        confidence: f64,
        reasoning: impl Into<String>,
        tool_catalog: &BTreeSet<String>,
    ) -> Self {
        let fingerprint = fingerprint_of(&graph.query, tool_catalog, strategy);
        Self { graph, strategy, confidence: confidence.clamp(0.0, 1.0), reasoning: reasoning.into(), fingerprint }
    }
}

/// A stable hash of the normalized query, the registry's tool catalog, and
/// the strategy that will produce the plan. Two plans for
/// the same normalized query, catalog, and strategy fingerprint
/// identically, which is what lets the Plan Cache and the idempotence
/// property hold.
pub fn fingerprint_of(query: &str, tool_catalog: &BTreeSet<String>, strategy: PlannerStrategy) -> String {
    let normalized_query = query.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized_query.as_bytes());
    hasher.update(b"|");
    for action in tool_catalog {
        hasher.update(action.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"|");
    hasher.update(format!("{strategy:?}").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn sample_graph(query: &str) -> TaskGraph {
        let mut graph = TaskGraph::new(query, "answer the query");
        graph.add(Task::new("t1", "read file", "read_file")).unwrap();
        graph
    }

    fn catalog() -> BTreeSet<String> {
        ["read_file", "summarize"].into_iter().map(String::from).collect()
    }

    #[test]
    fn identical_inputs_yield_identical_fingerprints() {
        let a = Plan::new(sample_graph("Summarize A.txt"), PlannerStrategy::RuleBased, 0.9, "matched template", &catalog());
        let b = Plan::new(sample_graph("summarize a.txt"), PlannerStrategy::RuleBased, 0.9, "matched template", &catalog());
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn different_strategy_yields_different_fingerprint() {
        let a = Plan::new(sample_graph("summarize a.txt"), PlannerStrategy::RuleBased, 0.9, "x", &catalog());
        let b = Plan::new(sample_graph("summarize a.txt"), PlannerStrategy::ModelBased, 0.9, "x", &catalog());
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn confidence_is_clamped() {
        let plan = Plan::new(sample_graph("q"), PlannerStrategy::RuleBased, 1.5, "x", &catalog());
        assert_eq!(plan.confidence, 1.0);
    }
}
