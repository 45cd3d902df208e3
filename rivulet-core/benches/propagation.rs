//! Benchmarks for data propagation.
//!
//! Run with: cargo bench -p rivulet-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rivulet_core::executor::FlowAlg;
use rivulet_core::graph::{NodeBehavior, NodeContext, NodeId, NodeType, PortConfig, Value};
use rivulet_core::{Flow, NodeError};

struct Source;

impl NodeBehavior for Source {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
        ctx.set_output(0, 1)
    }
}

struct Add;

impl NodeBehavior for Add {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
        let mut total = 0;
        for index in 0..ctx.input_count() {
            if let Value::Int(v) = ctx.input(index)? {
                total += v;
            }
        }
        ctx.set_output(0, total)
    }
}

/// `layers` layers of `width` adders; every adder reads two nodes of the
/// previous layer. Naive push revisits nodes once per incoming edge path.
fn layered(alg: FlowAlg, width: usize, layers: usize) -> (Flow, NodeId) {
    let source = NodeType::new("source", || Source).output(PortConfig::data());
    let add = NodeType::new("add", || Add)
        .input(PortConfig::data().default_value(0))
        .input(PortConfig::data().default_value(0))
        .output(PortConfig::data());

    let mut flow = Flow::new("bench");
    flow.set_algorithm_mode(alg).unwrap();
    let root = flow.create_node(&source).unwrap();
    let mut previous = vec![root];
    for _ in 0..layers {
        let mut layer = Vec::with_capacity(width);
        for i in 0..width {
            let node = flow.create_node(&add).unwrap();
            let left = previous[i % previous.len()];
            let right = previous[(i + 1) % previous.len()];
            flow.connect_nodes(left, 0, node, 0).unwrap();
            flow.connect_nodes(right, 0, node, 1).unwrap();
            layer.push(node);
        }
        previous = layer;
    }
    (flow, root)
}

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");
    for layers in [4usize, 8] {
        for alg in [FlowAlg::Data, FlowAlg::DataOpt] {
            group.bench_with_input(BenchmarkId::new(alg.as_str(), layers), &layers, |b, &layers| {
                let (mut flow, root) = layered(alg, 4, layers);
                b.iter(|| {
                    flow.update_node(black_box(root), None).unwrap();
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_propagation);
criterion_main!(benches);
