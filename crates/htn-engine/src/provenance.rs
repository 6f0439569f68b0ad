// Copyright 2026 Covenant Labs

//! Provenance Tracker: a W3C-PROV-shaped graph of
//! entities, activities, and agents per conversation, serialized as
//! PROV-JSON.
//!
//! A half-built graph is never exposed: [`ProvenanceBuilder::finalize`]
//! consumes `self` and hands back an immutable [`ProvenanceGraph`], so the
//! "partial graphs are never exposed outside the tracker" contract is
//! enforced at the type level rather than by convention.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

fn new_id(kind: &str) -> String {
    format!("urn:htn:{kind}:{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "prov:type")]
    pub prov_type: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "prov:type")]
    pub prov_type: String,
    #[serde(rename = "prov:startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(rename = "prov:endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    #[serde(rename = "prov:type")]
    pub prov_type: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "prov:activity", skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(rename = "prov:entity", skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(rename = "prov:agent", skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(rename = "prov:generatedEntity", skip_serializing_if = "Option::is_none")]
    pub generated_entity: Option<String>,
    #[serde(rename = "prov:usedEntity", skip_serializing_if = "Option::is_none")]
    pub used_entity: Option<String>,
}

/// An immutable, finalized PROV-JSON graph (top-level shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceGraph {
    pub entity: BTreeMap<String, Entity>,
    pub activity: BTreeMap<String, Activity>,
    pub agent: BTreeMap<String, Agent>,
    #[serde(rename = "wasGeneratedBy")]
    pub was_generated_by: BTreeMap<String, Relation>,
    pub used: BTreeMap<String, Relation>,
    #[serde(rename = "wasAssociatedWith")]
    pub was_associated_with: BTreeMap<String, Relation>,
    #[serde(rename = "wasDerivedFrom")]
    pub was_derived_from: BTreeMap<String, Relation>,
}

/// Accumulates entities/activities/agents for one conversation. Not
/// `Clone`/`Copy`-able on purpose: a half-built graph has exactly one owner.
pub struct ProvenanceBuilder {
    conversation_id: String,
    graph: ProvenanceGraph,
}

impl ProvenanceBuilder {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            graph: ProvenanceGraph {
                entity: BTreeMap::new(),
                activity: BTreeMap::new(),
                agent: BTreeMap::new(),
                was_generated_by: BTreeMap::new(),
                used: BTreeMap::new(),
                was_associated_with: BTreeMap::new(),
                was_derived_from: BTreeMap::new(),
            },
        }
    }

    /// Begin a `generate` activity (e.g. planning), associating it with the
    /// `agent` responsible.
    pub fn start_generation(&mut self, agent_id: &str) -> String {
        let activity_id = new_id("activity");
        self.graph.activity.insert(
            activity_id.clone(),
            Activity {
                prov_type: "generate".to_string(),
                start_time: Some(chrono::Utc::now().to_rfc3339()),
                end_time: None,
                attributes: BTreeMap::new(),
            },
        );
        let rel_id = new_id("rel");
        self.graph.was_associated_with.insert(
            rel_id,
            Relation {
                activity: Some(activity_id.clone()),
                agent: Some(agent_id.to_string()),
                entity: None,
                generated_entity: None,
                used_entity: None,
            },
        );
        activity_id
    }

    /// Add an `execute` activity for a tool call, linking the tool agent
    /// and any entities it used.
    pub fn add_tool_activity(&mut self, tool_agent_id: &str, used_entities: &[String]) -> String {
        let activity_id = new_id("activity");
        self.graph.activity.insert(
            activity_id.clone(),
            Activity {
                prov_type: "execute".to_string(),
                start_time: Some(chrono::Utc::now().to_rfc3339()),
                end_time: Some(chrono::Utc::now().to_rfc3339()),
                attributes: BTreeMap::new(),
            },
        );
        self.graph.was_associated_with.insert(
            new_id("rel"),
            Relation {
                activity: Some(activity_id.clone()),
                agent: Some(tool_agent_id.to_string()),
                entity: None,
                generated_entity: None,
                used_entity: None,
            },
        );
        for entity_id in used_entities {
            self.graph.used.insert(
                new_id("rel"),
                Relation {
                    activity: Some(activity_id.clone()),
                    entity: Some(entity_id.clone()),
                    agent: None,
                    generated_entity: None,
                    used_entity: None,
                },
            );
        }
        activity_id
    }

    /// Register an artifact (prompt, response, tool output) produced by
    /// `generated_by_activity`, optionally derived from a prior entity.
    pub fn add_artifact(
        &mut self,
        prov_type: &str,
        generated_by_activity: &str,
        derived_from: Option<&str>,
    ) -> String {
        let entity_id = new_id("entity");
        self.graph.entity.insert(
            entity_id.clone(),
            Entity { prov_type: prov_type.to_string(), attributes: BTreeMap::new() },
        );
        self.graph.was_generated_by.insert(
            new_id("rel"),
            Relation {
                entity: Some(entity_id.clone()),
                activity: Some(generated_by_activity.to_string()),
                agent: None,
                generated_entity: None,
                used_entity: None,
            },
        );
        if let Some(prior) = derived_from {
            self.graph.was_derived_from.insert(
                new_id("rel"),
                Relation {
                    generated_entity: Some(entity_id.clone()),
                    used_entity: Some(prior.to_string()),
                    activity: None,
                    entity: None,
                    agent: None,
                },
            );
        }
        entity_id
    }

    pub fn add_agent(&mut self, prov_type: &str) -> String {
        let agent_id = new_id("agent");
        self.graph.agent.insert(
            agent_id.clone(),
            Agent { prov_type: prov_type.to_string(), attributes: BTreeMap::new() },
        );
        agent_id
    }

    /// Consume the builder, producing an immutable [`ProvenanceGraph`] and
    /// writing it once to `<dir>/<conversation>.json`.
    pub fn finalize(self, dir: &std::path::Path) -> Result<ProvenanceGraph> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::StorageError(format!("cannot create provenance dir: {e}")))?;
        let path: PathBuf = dir.join(format!("{}.json", self.conversation_id));
        let body = serde_json::to_string_pretty(&self.graph)
            .map_err(|e| Error::StorageError(format!("cannot encode provenance graph: {e}")))?;
        fs::write(&path, body)
            .map_err(|e| Error::StorageError(format!("cannot write {path:?}: {e}")))?;
        Ok(self.graph)
    }
}
