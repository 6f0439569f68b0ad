// Copyright 2026 Covenant Labs

//! The Planner: produces a [`Plan`] from a query under a
//! chosen strategy, consulting the [`PlanCache`] first.

pub mod cache;
pub mod model_based;
pub mod rule_based;

use crate::config::{PlannerConfig, PlannerStrategy};
use crate::error::{Error, Result};
use crate::plan::Plan;
use crate::tool::ToolRegistry;
use cache::PlanCache;
use model_based::{LlmBackend, ModelBasedPlanner};
use rule_based::RuleBasedPlanner;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

/// Produces Plans from queries. `backend` is optional: `rule_based` mode
/// never needs one, `model_based`/`hybrid` do, and construction does not
/// fail without one — it only fails a later `plan()` call if that call
/// actually needs the backend and none was supplied.
pub struct Planner<'a> {
    config: PlannerConfig,
    rule_based: RuleBasedPlanner,
    backend: Option<&'a dyn LlmBackend>,
    cache: PlanCache,
}

impl<'a> Planner<'a> {
    pub fn new(config: PlannerConfig, backend: Option<&'a dyn LlmBackend>) -> Self {
        let cache = PlanCache::new(config.cache_max_entries, Duration::from_millis(config.cache_ttl_ms));
        Self { config, rule_based: RuleBasedPlanner::default(), backend, cache }
    }

    fn tool_catalog(registry: &ToolRegistry) -> BTreeSet<String> {
        registry.tool_names().into_iter().collect()
    }

    /// Produce a Plan for `query` using `strategy` (or the configured
    /// default). Consults the cache by fingerprint first; a hit is
    /// returned immediately (the caller still re-runs policy validation,
    /// — this method does not call into policy at all).
    pub async fn plan(
        &self,
        query: &str,
        context: &Value,
        registry: &ToolRegistry,
        strategy: Option<PlannerStrategy>,
    ) -> Result<Plan> {
        if query.trim().is_empty() {
            return Err(Error::EmptyPlan);
        }
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        let catalog = Self::tool_catalog(registry);
        let fingerprint = crate::plan::fingerprint_of(query, &catalog, strategy);

        if let Some(cached) = self.cache.get(&fingerprint) {
            info!(fingerprint = %fingerprint, "plan cache hit");
            return Ok(cached);
        }

        let plan = match strategy {
            PlannerStrategy::RuleBased => self.plan_rule_based(query, registry, &catalog)?,
            PlannerStrategy::ModelBased => self.plan_model_based(query, context, registry, &catalog).await?,
            PlannerStrategy::Hybrid => self.plan_hybrid(query, context, registry, &catalog).await?,
        };

        self.validate_shape(&plan)?;
        self.cache.insert(plan.clone());
        Ok(plan)
    }

    fn plan_rule_based(&self, query: &str, registry: &ToolRegistry, catalog: &BTreeSet<String>) -> Result<Plan> {
        let (graph, confidence) = self.rule_based.plan(query, registry)?;
        Ok(Plan::new(graph, PlannerStrategy::RuleBased, confidence, "rule-based template match", catalog))
    }

    async fn plan_model_based(
        &self,
        query: &str,
        context: &Value,
        registry: &ToolRegistry,
        catalog: &BTreeSet<String>,
    ) -> Result<Plan> {
        let backend = self.backend.ok_or_else(|| Error::BackendUnavailable("no model backend configured".to_string()))?;
        let catalog_vec: Vec<String> = catalog.iter().cloned().collect();
        let model = ModelBasedPlanner::new(backend);
        match model.plan(query, context, registry, &catalog_vec).await {
            Ok(graph) => Ok(Plan::new(graph, PlannerStrategy::ModelBased, 1.0, "model decomposition", catalog)),
            Err(e) => {
                warn!(error = %e, "model-based decomposition failed, falling back to rule-based");
                self.plan_rule_based(query, registry, catalog)
            }
        }
    }

    /// Run rule-based first; escalate to model-based only if confidence is
    /// below the configured threshold, then take the max confidence of the
    /// two. Model-based subsumes rule-based on overlap:
    /// since both produce full graphs for the same query, "merge" here
    /// means preferring the model-based graph outright once it succeeds.
    async fn plan_hybrid(
        &self,
        query: &str,
        context: &Value,
        registry: &ToolRegistry,
        catalog: &BTreeSet<String>,
    ) -> Result<Plan> {
        let rule_plan = self.plan_rule_based(query, registry, catalog);
        let rule_confidence = rule_plan.as_ref().map(|p| p.confidence).unwrap_or(0.0);

        if rule_confidence >= self.config.hybrid_confidence_threshold {
            return rule_plan;
        }

        match self.plan_model_based(query, context, registry, catalog).await {
            Ok(model_plan) if model_plan.confidence >= rule_confidence => {
                let mut merged = model_plan;
                merged.strategy = PlannerStrategy::Hybrid;
                merged.confidence = merged.confidence.max(rule_confidence);
                Ok(merged)
            }
            Ok(_) => rule_plan,
            Err(_) if rule_plan.is_ok() => rule_plan,
            Err(e) => Err(e),
        }
    }

    /// Checks the two graph-shape bounds : total task
    /// count, and the longest chain of required prerequisites (depth).
    fn validate_shape(&self, plan: &Plan) -> Result<()> {
        if plan.graph.len() > self.config.max_tasks_per_plan {
            return Err(Error::SchemaMismatch(format!(
                "plan has {} tasks, exceeding max_tasks_per_plan {}",
                plan.graph.len(),
                self.config.max_tasks_per_plan
            )));
        }
        let depth = plan.graph.longest_chain();
        if depth > self.config.max_decomposition_depth {
            return Err(Error::SchemaMismatch(format!(
                "plan decomposition depth {depth} exceeds max_decomposition_depth {}",
                self.config.max_decomposition_depth
            )));
        }
        Ok(())
    }
}
