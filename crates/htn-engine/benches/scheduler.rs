//! Scheduler throughput benchmarks.
//!
//! Run with: cargo bench --package htn-engine
//! Run a specific group: cargo bench --package htn-engine fan_out

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use htn_engine::config::{ExecutorConfig, ExecutorStrategy, VerificationLevel};
use htn_engine::error::Result;
use htn_engine::executor::TaskExecutor;
use htn_engine::graph::TaskGraph;
use htn_engine::config::PolicyConfig;
use htn_engine::policy::PolicyGuardian;
use htn_engine::task::{DependencyKind, SideEffectClass, Task};
use htn_engine::tool::{CancelSignal, Tool, ToolDescriptor, ToolRegistry};
use htn_engine::verifier::Verifier;
use htn_engine::worm::WormLog;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::runtime::Runtime;

struct NoopTool;

#[async_trait]
impl Tool for NoopTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "noop".to_string(),
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

    async fn invoke(&self, _arguments: HashMap<String, Value>, _deadline: Instant, _cancel: CancelSignal) -> Result<Value> {
        Ok(Value::Null)
    }
}

fn fan_out_graph(width: usize) -> TaskGraph {
    let mut graph = TaskGraph::new(format!("fan out {width}"), "bench");
    for i in 0..width {
        graph.add(Task::new(format!("t{i}"), format!("task {i}"), "noop")).unwrap();
    }
    graph
}

fn chain_graph(depth: usize) -> TaskGraph {
    let mut graph = TaskGraph::new(format!("chain {depth}"), "bench");
    graph.add(Task::new("t0", "task 0", "noop")).unwrap();
    for i in 1..depth {
        let task = Task::new(format!("t{i}"), format!("task {i}"), "noop")
            .with_prerequisite(format!("t{}", i - 1), DependencyKind::Required);
        graph.add(task).unwrap();
    }
    graph
}

fn executor_and_deps() -> (TaskExecutor, WormLog, Verifier, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let registry = ToolRegistry::new();
    registry.register(Arc::new(NoopTool));
    let policy = Arc::new(PolicyGuardian::new(&PolicyConfig::default()).unwrap());
    let executor = TaskExecutor::new(ExecutorConfig { max_workers: 8, ..ExecutorConfig::default() }, Arc::new(registry), policy);
    let worm = WormLog::open(dir.path().join("worm"), 10_000, None).unwrap();
    let verifier = Verifier::new(VerificationLevel::Basic, 0.0);
    (executor, worm, verifier, dir)
}

fn fan_out_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");
    for width in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let (executor, worm, verifier, _dir) = executor_and_deps();
                let graph = fan_out_graph(width);
                rt.block_on(executor.execute(graph, Some(ExecutorStrategy::Parallel), &worm, &verifier, None)).unwrap()
            });
        });
    }
    group.finish();
}

fn chain_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chain");
    for depth in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let (executor, worm, verifier, _dir) = executor_and_deps();
                let graph = chain_graph(depth);
                rt.block_on(executor.execute(graph, Some(ExecutorStrategy::Sequential), &worm, &verifier, None)).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, fan_out_benchmark, chain_benchmark);
criterion_main!(benches);
