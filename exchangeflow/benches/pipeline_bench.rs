//! Benchmarks for node execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use exchangeflow::context::ExecutionContext;
use exchangeflow::core::{aggregate, ExecutionOptions, NodeStatus};
use exchangeflow::events::NoOpEventSink;
use exchangeflow::nodes::{run_pipeline, FnNode, ParallelNode, PipelineNode};
use std::sync::Arc;

fn aggregate_benchmark(c: &mut Criterion) {
    let statuses: Vec<NodeStatus> = (0..64)
        .map(|i| match i % 4 {
            0 => NodeStatus::NotRun,
            1 => NodeStatus::Succeeded,
            2 => NodeStatus::SucceededWithErrors,
            _ => NodeStatus::Failed,
        })
        .collect();

    c.bench_function("aggregate_64", |b| {
        b.iter(|| aggregate(black_box(&statuses), ExecutionOptions::lenient()));
    });
}

fn serial_pipeline(width: usize) -> PipelineNode<u64> {
    (0..width).fold(PipelineNode::new("serial"), |root, i| {
        root.with_child(FnNode::new(format!("step-{i}"), |count: &mut u64| {
            *count += 1;
            Ok(NodeStatus::Succeeded)
        }))
    })
}

fn parallel_pipeline(width: usize) -> ParallelNode<u64> {
    (0..width).fold(ParallelNode::new("parallel"), |root, i| {
        root.with_child(FnNode::new(format!("step-{i}"), |count: &mut u64| {
            *count += 1;
            Ok(NodeStatus::Succeeded)
        }))
    })
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let serial = serial_pipeline(16);
    let parallel = parallel_pipeline(16);

    c.bench_function("serial_16_fn_nodes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let ctx = ExecutionContext::new(0u64).with_event_sink(Arc::new(NoOpEventSink));
                black_box(run_pipeline(&serial, &ctx).await.expect("run"))
            })
        });
    });

    c.bench_function("parallel_16_fn_nodes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let ctx = ExecutionContext::new(0u64).with_event_sink(Arc::new(NoOpEventSink));
                black_box(run_pipeline(&parallel, &ctx).await.expect("run"))
            })
        });
    });
}

criterion_group!(benches, aggregate_benchmark, pipeline_benchmark);
criterion_main!(benches);
