//! Node types shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::NodeError;
use crate::graph::{NodeBehavior, NodeContext, NodeId, NodeType, PortConfig, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub node: NodeId,
    pub inp: Option<usize>,
    pub value: Value,
}

/// Shared record of node updates.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<Entry>>>);

impl Log {
    pub fn push(&self, entry: Entry) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().clone()
    }

    pub fn count_for(&self, node: NodeId) -> usize {
        self.0.lock().iter().filter(|e| e.node == node).count()
    }
}

struct Emit(Value);

impl NodeBehavior for Emit {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
        ctx.set_output(0, self.0.clone())
    }
}

/// No inputs; writes `value` to its only output on every update.
pub(crate) fn emitter(value: impl Into<Value>) -> NodeType {
    let value = value.into();
    NodeType::new("emit", move || Emit(value.clone()))
        .prefix("test")
        .output(PortConfig::data())
}

struct Relay(Log);

impl NodeBehavior for Relay {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError> {
        let value = ctx.input(0)?;
        self.0.push(Entry {
            node: ctx.id(),
            inp,
            value: value.clone(),
        });
        ctx.set_output(0, value)
    }
}

/// One input (default `"d"`), one output; logs and forwards its input.
pub(crate) fn relay(log: &Log) -> NodeType {
    let log = log.clone();
    NodeType::new("relay", move || Relay(log.clone()))
        .prefix("test")
        .input(PortConfig::data().default_value("d"))
        .output(PortConfig::data())
}

struct Sum(Log);

impl NodeBehavior for Sum {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError> {
        let mut total = 0;
        for i in 0..ctx.input_count() {
            total += ctx.input(i)?.as_int().unwrap_or(0);
        }
        self.0.push(Entry {
            node: ctx.id(),
            inp,
            value: Value::Int(total),
        });
        ctx.set_output(0, total)
    }
}

/// `inputs` integer inputs (default 0), one output carrying their sum.
pub(crate) fn sum(log: &Log, inputs: usize) -> NodeType {
    let log = log.clone();
    let mut node_type = NodeType::new(format!("sum{inputs}"), move || Sum(log.clone())).prefix("test");
    for _ in 0..inputs {
        node_type = node_type.input(PortConfig::data().default_value(0));
    }
    node_type.output(PortConfig::data())
}
