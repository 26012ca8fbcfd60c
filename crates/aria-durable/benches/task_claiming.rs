//! Scheduling throughput benchmark: how fast [`WorkflowEngine`] drives a
//! fan-out of independent tasks to completion. Measures the dispatch/poll
//! loop itself, not any particular operation's cost — every task here
//! either completes in-process immediately (stub tasks) or runs a no-op
//! echo operation through [`ThreadExecutor`].

use std::sync::Arc;
use std::time::Duration;

use aria_durable::compiler::GraphCompiler;
use aria_durable::context::InMemoryResourceStore;
use aria_durable::engine::{EngineConfig, WorkflowEngine};
use aria_durable::executor::{OperationRegistry, ThreadExecutor};
use aria_durable::graph::{ApiGraph, OperationTask};
use aria_durable::model::{Execution, ExecutionStatus, ExecutorKind, RunsOn};
use aria_durable::persistence::{InMemoryModelStore, ModelStore};
use aria_durable::reliability::RetryPolicy;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Builds a graph of `width` independent operation tasks (all dependent
/// only on the compiler's own start stub) and drives it to completion,
/// returning once the execution reaches an end state.
async fn run_fanout(width: usize) {
    let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
    let execution = store
        .put_execution(Execution {
            id: Uuid::now_v7(),
            service_id: Uuid::now_v7(),
            workflow_name: "bench".into(),
            status: ExecutionStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            inputs: serde_json::json!({}),
            error: None,
            version: 0,
        })
        .await
        .unwrap();

    let mut graph = ApiGraph::new();
    let actor_id = Uuid::now_v7();
    let tasks = (0..width).map(|_| {
        OperationTask::new(actor_id, RunsOn::Node, "Standard", "noop", "bench.echo").into()
    });
    graph.add_tasks(tasks);

    let compiler = GraphCompiler::new(store.as_ref(), ExecutorKind::Thread);
    compiler.compile(execution.id, &graph, Vec::new()).await.unwrap();

    let mut registry = OperationRegistry::new();
    registry.register("bench.echo", |_ctx, args| async move { Ok(args) });
    let executor = Arc::new(ThreadExecutor::new(registry, width.max(1)));

    let engine = WorkflowEngine::new(
        store,
        Arc::new(InMemoryResourceStore::new()),
        RetryPolicy::fixed(Duration::from_millis(1), 1),
        EngineConfig::new().with_poll_interval(Duration::from_millis(1)),
    )
    .with_executor(ExecutorKind::Thread, executor);

    engine.execute(execution.id, false, false).await.unwrap();
}

fn bench_fanout_width(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("engine/fanout_to_completion");
    for width in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("width", width), &width, |b, &width| {
            b.to_async(&rt).iter(|| run_fanout(width));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fanout_width);
criterion_main!(benches);
