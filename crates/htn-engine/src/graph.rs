// Copyright 2026 Covenant Labs

//! The Task Graph: a labeled DAG over [`Task`]s with
//! topological ordering and cycle detection.
//!
//! Backed by [`petgraph::stable_graph::StableDiGraph`] so removing a task
//! never invalidates another task's index, plus a side `id -> NodeIndex`
//! map for O(1) lookup by [`TaskId`].

use crate::error::{Error, Result};
use crate::task::{DependencyKind, Priority, Task, TaskId, TaskResult, TaskState};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Aggregate counters exposed by [`TaskGraph::stats`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GraphStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub running: usize,
    pub pending_or_ready: usize,
}

/// A labeled DAG over [`Task`]s, carrying the originating query, root goal,
/// and a strategy hint.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub query: String,
    pub root_goal: String,
    pub strategy_hint: String,
    graph: StableDiGraph<Task, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new(query: impl Into<String>, root_goal: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            root_goal: root_goal.into(),
            strategy_hint: String::new(),
            graph: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    fn node_of(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownTask(id.to_string()))
    }

    /// Insert `task` with its declared prerequisites. Performs a DFS from
    /// each new prerequisite edge's target back toward its source *before*
    /// committing the insertion, rejecting with [`Error::CycleDetected`] if
    /// a back-edge would result ("rejects... if the new
    /// edge would introduce a back-edge").
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.id) {
            return Err(Error::ConfigurationError(format!("duplicate task id: {}", task.id)));
        }
        for (prereq_id, _) in &task.prerequisites {
            if !self.index.contains_key(prereq_id) {
                return Err(Error::UnknownTask(prereq_id.clone()));
            }
        }

        let id = task.id.clone();
        let prereqs = task.prerequisites.clone();
        let idx = self.graph.add_node(task);
        self.index.insert(id.clone(), idx);

        for (prereq_id, _) in &prereqs {
            let prereq_idx = self.node_of(prereq_id)?;
            self.graph.add_edge(prereq_idx, idx, ());
            if self.creates_cycle(prereq_idx, idx) {
                // roll back fully: remove the node we just added.
                self.graph.remove_node(idx);
                self.index.remove(&id);
                return Err(Error::CycleDetected(id));
            }
        }
        Ok(())
    }

    /// DFS reachability check: true if `to` can already reach `from`,
    /// meaning the edge `from -> to` just added closes a cycle.
    fn creates_cycle(&self, _from: NodeIndex, to: NodeIndex) -> bool {
        let mut stack = vec![to];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            for succ in self.graph.neighbors_directed(n, Direction::Outgoing) {
                if succ == _from {
                    return true;
                }
                stack.push(succ);
            }
        }
        false
    }

    pub fn remove(&mut self, id: &str) -> Result<Task> {
        let idx = self.node_of(id)?;
        self.index.remove(id);
        self.graph
            .remove_node(idx)
            .ok_or_else(|| Error::UnknownTask(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<&Task> {
        let idx = self.node_of(id)?;
        Ok(&self.graph[idx])
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Task> {
        let idx = self.node_of(id)?;
        Ok(&mut self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.index.keys()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    pub fn predecessors(&self, id: &str) -> Result<Vec<TaskId>> {
        let idx = self.node_of(id)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    pub fn successors(&self, id: &str) -> Result<Vec<TaskId>> {
        let idx = self.node_of(id)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    /// `ready(t) ⇔ ∀p ∈ prereq(t): state(p) = COMPLETED` for required
    /// prerequisites; an optional prerequisite that is terminal-but-not-
    /// completed does not block readiness.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.index
            .keys()
            .filter(|id| self.is_ready(id))
            .cloned()
            .collect()
    }

    fn is_ready(&self, id: &str) -> bool {
        let Ok(task) = self.get(id) else { return false };
        if task.state != TaskState::Pending {
            return false;
        }
        task.required_prerequisites().all(|p| {
            self.get(p)
                .map(|t| t.state == TaskState::Completed)
                .unwrap_or(false)
        })
    }

    /// Mark `id`'s state, validating the transition via [`Task::transition`].
    pub fn mark(&mut self, id: &str, state: TaskState, result: Option<TaskResult>) -> Result<()> {
        let task = self.get_mut(id)?;
        task.transition(state, result).map_err(|reason| Error::ValidationFailure {
            tool: "state_machine".to_string(),
            reason,
        })
    }

    /// Kahn's algorithm, tie-broken deterministically on `(priority desc, id asc)`
    /// so topological order is stable given identical insertion order and
    /// priorities (invariant).
    pub fn topo_order(&self) -> Vec<TaskId> {
        let mut indegree: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in self.graph.node_indices() {
            indegree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
        }

        let mut frontier: Vec<NodeIndex> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while !frontier.is_empty() {
            frontier.sort_by(|&a, &b| {
                let ta = &self.graph[a];
                let tb = &self.graph[b];
                tb.priority.cmp(&ta.priority).then_with(|| ta.id.cmp(&tb.id))
            });
            let next = frontier.remove(0);
            order.push(self.graph[next].id.clone());
            for succ in self.graph.neighbors_directed(next, Direction::Outgoing) {
                let d = indegree.get_mut(&succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    frontier.push(succ);
                }
            }
        }
        order
    }

    /// Length of the longest prerequisite chain, counted in tasks (a
    /// single task with no prerequisites has depth 1). Used to bound
    /// decomposition depth.
    pub fn longest_chain(&self) -> usize {
        let order = self.topo_order();
        let mut depth: HashMap<TaskId, usize> = HashMap::new();
        let mut max_depth = 0;
        for id in &order {
            let idx = match self.node_of(id) {
                Ok(idx) => idx,
                Err(_) => continue,
            };
            let this_depth = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|pred| depth.get(&self.graph[pred].id).copied().unwrap_or(0))
                .max()
                .unwrap_or(0)
                + 1;
            depth.insert(id.clone(), this_depth);
            max_depth = max_depth.max(this_depth);
        }
        max_depth
    }

    /// Mark `id` terminal-non-success and cascade: its non-optional
    /// dependents become [`TaskState::Skipped`] unless the dependency was
    /// declared optional.
    pub fn cascade_skip(&mut self, id: &str) -> Result<Vec<TaskId>> {
        let mut skipped = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(cur) = frontier.pop() {
            for succ in self.successors(&cur)? {
                let task = self.get(&succ)?;
                if task.state != TaskState::Pending && task.state != TaskState::Ready {
                    continue;
                }
                let blocked_by_required = task
                    .prerequisites
                    .iter()
                    .any(|(p, kind)| p == &cur && *kind == DependencyKind::Required);
                if !blocked_by_required {
                    continue;
                }
                self.mark(&succ, TaskState::Cancelled, None).or_else(|_| {
                    // CANCELLED is reserved for graph teardown; a dependent of a
                    // failed predecessor that's still PENDING/READY flips straight
                    // to SKIPPED instead, since that transition isn't one of the
                    // state machine's own listed edges out of PENDING/READY.
                    self.force_skip(&succ)
                })?;
                skipped.push(succ.clone());
                frontier.push(succ);
            }
        }
        Ok(skipped)
    }

    fn force_skip(&mut self, id: &str) -> Result<()> {
        let task = self.get_mut(id)?;
        task.state = TaskState::Skipped;
        task.ended_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Cancel every [`TaskState::Pending`] or [`TaskState::Ready`] task
    /// (graph-wide cancellation).
    pub fn cancel_pending(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.all_ids().cloned().collect();
        let mut cancelled = Vec::new();
        for id in ids {
            let task = self.graph[self.index[&id]].clone();
            if matches!(task.state, TaskState::Pending | TaskState::Ready) {
                let _ = self.mark(&id, TaskState::Cancelled, None);
                cancelled.push(id);
            }
        }
        cancelled
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats { total: self.len(), ..Default::default() };
        for idx in self.graph.node_indices() {
            match self.graph[idx].state {
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Skipped => stats.skipped += 1,
                TaskState::Cancelled => stats.cancelled += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Pending | TaskState::Ready => stats.pending_or_ready += 1,
            }
        }
        stats
    }
}
