//! Node types shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use rivulet_core::graph::{NodeBehavior, NodeContext, NodeId, NodeType, PortConfig, Value};
use rivulet_core::NodeError;

/// `(node, input index, value read from input 0)` per update.
pub type Calls = Arc<Mutex<Vec<(NodeId, Option<usize>, Value)>>>;

pub fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

struct Source(Value);

impl NodeBehavior for Source {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
        ctx.set_output(0, self.0.clone())
    }
}

/// No inputs; writes `value` to output 0 when updated.
pub fn source(value: impl Into<Value>) -> NodeType {
    let value = value.into();
    NodeType::new("source", move || Source(value.clone()))
        .prefix("it")
        .output(PortConfig::data())
}

struct Recorder(Calls);

impl NodeBehavior for Recorder {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError> {
        let value = ctx.input(0)?;
        self.0.lock().push((ctx.id(), inp, value));
        Ok(())
    }
}

/// One data input defaulting to `"d"`; records every update.
pub fn recorder(calls: &Calls) -> NodeType {
    let calls = calls.clone();
    NodeType::new("recorder", move || Recorder(calls.clone()))
        .prefix("it")
        .input(PortConfig::data().default_value("d"))
}

struct Adder;

impl NodeBehavior for Adder {
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

/// `inputs` integer inputs defaulting to 0; output 0 is their sum.
pub fn adder(inputs: usize) -> NodeType {
    let mut node_type = NodeType::new("add", || Adder).prefix("it");
    for _ in 0..inputs {
        node_type = node_type.input(PortConfig::data().default_value(0));
    }
    node_type.output(PortConfig::data())
}

/// Current value of `node`'s output `index`.
pub fn output_of(flow: &rivulet_core::Flow, node: NodeId, index: usize) -> Value {
    flow.node(node)
        .and_then(|n| n.output(index))
        .map(|o| o.value().clone())
        .unwrap_or(Value::Null)
}
