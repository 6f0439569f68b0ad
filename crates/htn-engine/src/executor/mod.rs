// Copyright 2026 Covenant Labs

//! The Task Executor: runs a Task Graph under a chosen strategy, invoking
//! tools through the
//! [`crate::tool::ToolRegistry`], applying retry/backoff and failure
//! propagation, and verifying every result before it is committed.

pub mod resource_token;
pub mod retry;
pub mod scheduler;

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::metrics::Metrics;
use crate::task::{Priority, SideEffectClass, Task, TaskId, TaskResult, TaskState};
use crate::tool::{CancelSignal, ToolPolicyCheck, ToolRegistry, ToolStatus};
use crate::verifier::{CrossCheck, Verifier};
use crate::worm::WormLog;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use resource_token::ResourceTokens;
use scheduler::WorkStealingQueues;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Re-exports the strategy enum under the name the rest of the module
/// uses, since [`crate::config`] already defines it.
pub use crate::config::ExecutorStrategy;

/// Result of running a graph to quiescence: either every task reached a
/// terminal state, or a CRITICAL task's failure aborted the rest.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub graph: TaskGraph,
    pub aborted_by_critical_failure: Option<TaskId>,
}

struct WorkerResult {
    task_id: TaskId,
    worker: usize,
    status: ToolStatus,
    output: serde_json::Value,
    duration_ms: u64,
    error: Option<String>,
}

pub struct TaskExecutor {
    config: ExecutorConfig,
    tools: Arc<ToolRegistry>,
    policy: Arc<dyn ToolPolicyCheck>,
    resource_tokens: Arc<ResourceTokens>,
    metrics: Option<Arc<Metrics>>,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig, tools: Arc<ToolRegistry>, policy: Arc<dyn ToolPolicyCheck>) -> Self {
        Self { config, tools, policy, resource_tokens: Arc::new(ResourceTokens::new()), metrics: None }
    }

    /// Attach a metrics sink; without one, execution runs
    /// identically but emits no counters.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `adaptive` resolves to `sequential` for tiny graphs or graphs with a
    /// CRITICAL task that writes shared state, `parallel` otherwise
    ///.
    fn resolve_strategy(&self, graph: &TaskGraph, requested: ExecutorStrategy) -> ExecutorStrategy {
        match requested {
            ExecutorStrategy::Adaptive => {
                let has_critical_writer = graph.tasks().any(|t| {
                    t.priority == Priority::Critical
                        && matches!(t.side_effect_class, SideEffectClass::Write | SideEffectClass::Dangerous)
                });
                if graph.len() <= 2 || has_critical_writer {
                    ExecutorStrategy::Sequential
                } else {
                    ExecutorStrategy::Parallel
                }
            }
            other => other,
        }
    }

    fn effective_deadline(&self, tool_timeout: Duration) -> Instant {
        let ceiling = Duration::from_millis(self.config.task_timeout_ms);
        Instant::now() + tool_timeout.min(ceiling)
    }

    /// Stable `[0, 1)` slot for paranoid sampling, derived from the task id
    /// so sampling is deterministic across runs.
    fn sample_slot(task_id: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(task_id.as_bytes());
        let digest = hasher.finalize();
        let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        bucket as f64 / u32::MAX as f64
    }

    /// Run `graph` to quiescence: dispatch every ready task, apply
    /// retry/backoff and failure propagation, and verify each result
    /// before committing it.
    pub async fn execute(
        &self,
        mut graph: TaskGraph,
        strategy: Option<ExecutorStrategy>,
        worm: &WormLog,
        verifier: &Verifier,
        cross_check: Option<&dyn CrossCheck>,
    ) -> Result<ExecutionReport> {
        let requested = strategy.unwrap_or(self.config.default_strategy);
        let effective = self.resolve_strategy(&graph, requested);
        let worker_count = match effective {
            ExecutorStrategy::Sequential => 1,
            _ => self.config.max_workers.max(1),
        };

        let queues = WorkStealingQueues::new(worker_count);
        let graph_cancel = Arc::new(AtomicBool::new(false));
        let mut dispatched_total: usize = 0;
        let mut concurrent_dispatches: usize = 0;
        let mut aborted_by: Option<TaskId> = None;
        let mut next_worker = 0usize;
        let start = Instant::now();

        for id in graph.ready_tasks() {
            graph.mark(&id, TaskState::Ready, None)?;
            let priority = graph.get(&id)?.priority;
            queues.push_ready(id, priority);
        }

        let mut in_flight: FuturesUnordered<tokio::task::JoinHandle<WorkerResult>> = FuturesUnordered::new();

        loop {
            while in_flight.len() < worker_count && !queues.is_empty() && aborted_by.is_none() {
                let worker = next_worker % worker_count;
                next_worker += 1;
                let Some(id) = queues.pop_own(worker).or_else(|| queues.steal(worker)) else { break };

                dispatched_total += 1;
                if dispatched_total > self.config.queue_capacity {
                    return Err(Error::OverfanOut);
                }
                if !in_flight.is_empty() {
                    concurrent_dispatches += 1;
                }

                let task = graph.get(&id)?.clone();
                graph.mark(&id, TaskState::Running, None)?;
                worm.append("task.started", &serde_json::json!({"task_id": id, "attempt": task.attempt_count}))?;

                in_flight.push(self.spawn_invocation(task, worker, graph_cancel.clone()));
            }

            if let Some(metrics) = &self.metrics {
                metrics.queue_depth.set(queues.len() as i64);
            }

            let Some(joined) = in_flight.next().await else {
                break;
            };
            let outcome = joined.map_err(|e| Error::WorkerCrashed { task_id: "unknown".to_string(), reason: e.to_string() })?;
            self.handle_completion(&mut graph, outcome, worm, verifier, cross_check, &queues, &graph_cancel, &mut aborted_by)
                .await?;

            if aborted_by.is_some() && in_flight.is_empty() {
                break;
            }
            if queues.is_empty() && in_flight.is_empty() {
                break;
            }
        }

        if let Some(critical) = &aborted_by {
            let cancelled = graph.cancel_pending();
            if let Some(metrics) = &self.metrics {
                metrics.tasks_cancelled.inc_by(cancelled.len() as u64);
            }
            warn!(task_id = %critical, "graph aborted by critical task failure");
        }

        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.set(0);
            metrics.graph_duration_seconds.observe(start.elapsed().as_secs_f64());
            metrics.record_parallelization_factor(concurrent_dispatches, dispatched_total);
        }

        Ok(ExecutionReport { graph, aborted_by_critical_failure: aborted_by })
    }

    fn spawn_invocation(&self, task: Task, worker: usize, graph_cancel: Arc<AtomicBool>) -> tokio::task::JoinHandle<WorkerResult> {
        let tools = self.tools.clone();
        let policy = self.policy.clone();
        let resource_tokens = self.resource_tokens.clone();
        let tool_timeout = tools
            .describe(&task.action)
            .map(|d| d.default_timeout)
            .unwrap_or(Duration::from_millis(self.config.task_timeout_ms));
        let deadline = self.effective_deadline(tool_timeout);

        tokio::spawn(async move {
            let cancel = CancelSignal::new();
            if graph_cancel.load(Ordering::SeqCst) {
                cancel.cancel();
            }
            let _resource_guard = match &task.exclusive_resource {
                Some(resource) => Some(resource_tokens.acquire(resource).await),
                None => None,
            };
            let args: HashMap<String, serde_json::Value> = task.arguments.clone().into_iter().collect();
            match tools.invoke(&task.action, args, deadline, cancel, policy.as_ref()).await {
                Ok(result) => WorkerResult {
                    task_id: task.id.clone(),
                    worker,
                    status: result.status,
                    output: result.output,
                    duration_ms: result.duration_ms,
                    error: result.error,
                },
                Err(e) => WorkerResult {
                    task_id: task.id.clone(),
                    worker,
                    status: ToolStatus::Error,
                    output: serde_json::Value::Null,
                    duration_ms: 0,
                    error: Some(e.to_string()),
                },
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_completion(
        &self,
        graph: &mut TaskGraph,
        outcome: WorkerResult,
        worm: &WormLog,
        verifier: &Verifier,
        cross_check: Option<&dyn CrossCheck>,
        queues: &WorkStealingQueues,
        graph_cancel: &Arc<AtomicBool>,
        aborted_by: &mut Option<TaskId>,
    ) -> Result<()> {
        let WorkerResult { task_id, worker, status, output, duration_ms, error } = outcome;
        if let Some(metrics) = &self.metrics {
            metrics.observe_task_duration(worker, duration_ms);
        }

        match status {
            ToolStatus::Success => {
                let tentative = TaskResult { output, duration_ms, error: None };
                let task = graph.get(&task_id)?.clone();
                let record = verifier.verify_pending(&task, &tentative, Self::sample_slot(&task_id), cross_check).await;

                if record.passed {
                    graph.mark(&task_id, TaskState::Completed, Some(tentative))?;
                    worm.append("task.completed", &serde_json::json!({"task_id": task_id, "duration_ms": duration_ms}))?;
                    if let Some(metrics) = &self.metrics {
                        metrics.tasks_completed.inc();
                    }
                    self.requeue_newly_ready(graph, queues)?;
                } else {
                    let reason = record.failed_predicates.join("; ");
                    worm.append("task.verification_failed", &serde_json::json!({"task_id": task_id, "reason": reason}))?;
                    self.fail_task(graph, &task_id, reason, worm, graph_cancel, aborted_by).await?;
                }
            }
            ToolStatus::Timeout | ToolStatus::Error => {
                let err = if matches!(status, ToolStatus::Timeout) {
                    Error::Timeout(task_id.clone())
                } else {
                    Error::BackendUnavailable(error.clone().unwrap_or_default())
                };
                graph.mark(
                    &task_id,
                    TaskState::Failed,
                    Some(TaskResult { output: serde_json::Value::Null, duration_ms, error: Some(err.to_string()) }),
                )?;
                let task = graph.get(&task_id)?.clone();

                if err.retryable() && task.can_retry() {
                    let delay = retry::backoff_delay(task.attempt_count, &self.config);
                    worm.append("task.retry_scheduled", &serde_json::json!({"task_id": task_id, "delay_ms": delay.as_millis()}))?;
                    if let Some(metrics) = &self.metrics {
                        metrics.tasks_retried.inc();
                    }
                    tokio::time::sleep(delay).await;
                    graph.mark(&task_id, TaskState::Ready, None)?;
                    let priority = graph.get(&task_id)?.priority;
                    queues.push_ready(task_id, priority);
                } else {
                    worm.append("task.failed", &serde_json::json!({"task_id": task_id, "reason": err.to_string()}))?;
                    self.propagate_failure(graph, &task_id, worm, graph_cancel, aborted_by).await?;
                }
            }
            ToolStatus::Blocked | ToolStatus::ValidationFailed => {
                let reason = error.unwrap_or_else(|| format!("{status:?}"));
                self.fail_task(graph, &task_id, reason, worm, graph_cancel, aborted_by).await?;
            }
        }
        Ok(())
    }

    /// Mark a task FAILED (terminal, since this is called only when no
    /// retry applies) and apply failure propagation: a
    /// CRITICAL task failing aborts the whole graph; otherwise its
    /// non-optional dependents are SKIPPED.
    async fn fail_task(
        &self,
        graph: &mut TaskGraph,
        task_id: &str,
        reason: String,
        worm: &WormLog,
        graph_cancel: &Arc<AtomicBool>,
        aborted_by: &mut Option<TaskId>,
    ) -> Result<()> {
        let priority = graph.get(task_id)?.priority;
        graph.mark(
            task_id,
            TaskState::Failed,
            Some(TaskResult { output: serde_json::Value::Null, duration_ms: 0, error: Some(reason.clone()) }),
        )?;
        worm.append("task.failed", &serde_json::json!({"task_id": task_id, "reason": reason}))?;
        if let Some(metrics) = &self.metrics {
            metrics.tasks_failed.inc();
        }

        if priority == Priority::Critical {
            graph_cancel.store(true, Ordering::SeqCst);
            *aborted_by = Some(task_id.to_string());
            error!(task_id = %task_id, "critical task failed, aborting graph");
        } else {
            let skipped = graph.cascade_skip(task_id)?;
            if !skipped.is_empty() {
                worm.append("task.cascade_skipped", &serde_json::json!({"from": task_id, "skipped": skipped}))?;
                if let Some(metrics) = &self.metrics {
                    metrics.tasks_skipped.inc_by(skipped.len() as u64);
                }
            }
        }
        Ok(())
    }

    fn requeue_newly_ready(&self, graph: &mut TaskGraph, queues: &WorkStealingQueues) -> Result<()> {
        for id in graph.ready_tasks() {
            if graph.get(&id)?.state == TaskState::Pending {
                graph.mark(&id, TaskState::Ready, None)?;
                let priority = graph.get(&id)?.priority;
                queues.push_ready(id, priority);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VerificationLevel;
    use crate::policy::PolicyGuardian;
    use crate::task::DependencyKind;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EchoTool;
    #[async_trait]
    impl crate::tool::Tool for EchoTool {
        fn describe(&self) -> crate::tool::ToolDescriptor {
            crate::tool::ToolDescriptor {
                name: "echo".to_string(),
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
        async fn invoke(
            &self,
            arguments: HashMap<String, serde_json::Value>,
            _deadline: Instant,
            _cancel: CancelSignal,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"echoed": arguments.get("text").cloned().unwrap_or(serde_json::Value::Null)}))
        }
    }

    struct AlwaysFailTool;
    #[async_trait]
    impl crate::tool::Tool for AlwaysFailTool {
        fn describe(&self) -> crate::tool::ToolDescriptor {
            crate::tool::ToolDescriptor {
                name: "boom".to_string(),
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
        async fn invoke(
            &self,
            _arguments: HashMap<String, serde_json::Value>,
            _deadline: Instant,
            _cancel: CancelSignal,
        ) -> Result<serde_json::Value> {
            Err(Error::BackendUnavailable("boom always fails".to_string()))
        }
    }

    fn executor_with(registry: ToolRegistry) -> (TaskExecutor, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let policy_config = crate::config::PolicyConfig::default();
        let policy = Arc::new(PolicyGuardian::new(&policy_config).unwrap());
        let executor = TaskExecutor::new(ExecutorConfig { max_retries: 1, retry_backoff_base_ms: 1, ..ExecutorConfig::default() }, Arc::new(registry), policy);
        (executor, dir)
    }

    fn worm(dir: &tempfile::TempDir) -> WormLog {
        WormLog::open(dir.path().join("worm"), 1_000, None).unwrap()
    }

    #[tokio::test]
    async fn runs_independent_fan_out_to_completion() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let (executor, dir) = executor_with(registry);
        let worm = worm(&dir);
        let verifier = Verifier::new(VerificationLevel::Basic, 0.0);

        let mut graph = TaskGraph::new("echo twice", "demo");
        graph.add(Task::new("a", "echo a", "echo")).unwrap();
        graph.add(Task::new("b", "echo b", "echo")).unwrap();

        let report = executor.execute(graph, Some(ExecutorStrategy::Parallel), &worm, &verifier, None).await.unwrap();
        assert!(report.aborted_by_critical_failure.is_none());
        let stats = report.graph.stats();
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn chained_dependency_runs_in_order() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let (executor, dir) = executor_with(registry);
        let worm = worm(&dir);
        let verifier = Verifier::new(VerificationLevel::Basic, 0.0);

        let mut graph = TaskGraph::new("chain", "demo");
        graph.add(Task::new("a", "first", "echo")).unwrap();
        graph.add(Task::new("b", "second", "echo").with_prerequisite("a", DependencyKind::Required)).unwrap();

        let report = executor.execute(graph, Some(ExecutorStrategy::Sequential), &worm, &verifier, None).await.unwrap();
        let stats = report.graph.stats();
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn critical_failure_aborts_remaining_tasks() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysFailTool));
        registry.register(Arc::new(EchoTool));
        let (executor, dir) = executor_with(registry);
        let worm = worm(&dir);
        let verifier = Verifier::new(VerificationLevel::Basic, 0.0);

        let mut graph = TaskGraph::new("critical path", "demo");
        graph.add(Task::new("critical", "boom", "boom").with_priority(Priority::Critical)).unwrap();
        graph.add(Task::new("other", "echo", "echo")).unwrap();

        let report = executor.execute(graph, Some(ExecutorStrategy::Parallel), &worm, &verifier, None).await.unwrap();
        assert_eq!(report.aborted_by_critical_failure, Some("critical".to_string()));
        let stats = report.graph.stats();
        assert!(stats.cancelled + stats.completed + stats.failed == stats.total);
    }

    #[tokio::test]
    async fn non_critical_failure_skips_dependents_only() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysFailTool));
        registry.register(Arc::new(EchoTool));
        let (executor, dir) = executor_with(registry);
        let worm = worm(&dir);
        let verifier = Verifier::new(VerificationLevel::Basic, 0.0);

        let mut graph = TaskGraph::new("two branches", "demo");
        graph.add(Task::new("fails", "boom", "boom")).unwrap();
        graph.add(Task::new("dependent", "echo", "echo").with_prerequisite("fails", DependencyKind::Required)).unwrap();
        graph.add(Task::new("independent", "echo", "echo")).unwrap();

        let report = executor.execute(graph, Some(ExecutorStrategy::Parallel), &worm, &verifier, None).await.unwrap();
        assert!(report.aborted_by_critical_failure.is_none());
        assert_eq!(report.graph.get("dependent").unwrap().state, TaskState::Skipped);
        assert_eq!(report.graph.get("independent").unwrap().state, TaskState::Completed);
    }
}
