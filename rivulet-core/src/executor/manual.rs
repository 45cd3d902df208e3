//! Pass-through executor for external drivers.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::{FlowAlg, FlowExecutor};
use crate::error::FlowResult;
use crate::graph::{Flow, NodeId, PortId, Value};

#[derive(Debug, Default)]
struct Updates {
    inputs: HashSet<PortId>,
    outputs: HashSet<PortId>,
}

/// Reads and writes port values without propagating anything.
///
/// Every output write (and exec fire) is recorded: the output is marked
/// updated and so is each input it feeds. A driver such as the
/// [`FlowPlayer`](crate::player::FlowPlayer) consumes those marks to decide
/// which node updates to run.
#[derive(Debug, Default)]
pub struct ManualFlow {
    updates: Mutex<Updates>,
}

impl ManualFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `input` carries data not consumed yet.
    pub fn should_input_update(&self, input: PortId) -> bool {
        self.updates.lock().inputs.contains(&input)
    }

    /// Consume the update mark of `input`, returning whether it was set.
    pub fn take_input_update(&self, input: PortId) -> bool {
        self.updates.lock().inputs.remove(&input)
    }

    /// Whether any output of `node` was written since the last clear.
    pub fn has_updated_outputs(&self, flow: &Flow, node: NodeId) -> bool {
        let Some(node) = flow.node(node) else {
            return false;
        };
        let updates = self.updates.lock();
        node.outputs().iter().any(|o| updates.outputs.contains(&o.id()))
    }

    /// Forget every mark.
    pub fn clear_updates(&self) {
        let mut updates = self.updates.lock();
        updates.inputs.clear();
        updates.outputs.clear();
    }

    fn mark(&self, flow: &Flow, node: NodeId, index: usize) -> FlowResult<()> {
        let out = flow.output_port(node, index)?;
        let mut updates = self.updates.lock();
        updates.outputs.insert(out);
        updates.inputs.extend(flow.connected_inputs(out).iter().copied());
        Ok(())
    }
}

impl FlowExecutor for ManualFlow {
    fn algorithm(&self) -> FlowAlg {
        FlowAlg::Manual
    }

    fn update_node(&self, flow: &mut Flow, node: NodeId, inp: Option<usize>) -> FlowResult<()> {
        flow.invoke_update(node, inp)
    }

    fn input(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<Value> {
        flow.read_input_value(node, index)
    }

    fn set_output(&self, flow: &mut Flow, node: NodeId, index: usize, value: Value) -> FlowResult<()> {
        flow.store_output_value(node, index, value)?;
        self.mark(flow, node, index)
    }

    fn exec_output(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        self.mark(flow, node, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{emitter, relay, Log};
    use std::sync::Arc;

    #[test]
    fn writes_do_not_propagate() {
        let log = Log::default();
        let mut flow = Flow::new("manual");
        let manual = Arc::new(ManualFlow::new());
        flow.set_executor(manual.clone(), true).unwrap();

        let x = flow.create_node(&emitter("Hello")).unwrap();
        let y = flow.create_node(&relay(&log)).unwrap();
        let conn = flow.connect_nodes(x, 0, y, 0).unwrap();

        flow.update_node(x, None).unwrap();
        assert!(log.entries().is_empty());
        assert!(manual.has_updated_outputs(&flow, x));
        assert!(!manual.has_updated_outputs(&flow, y));

        assert!(manual.should_input_update(conn.inp));
        assert!(manual.take_input_update(conn.inp));
        assert!(!manual.take_input_update(conn.inp));
        assert_eq!(flow.input(y, 0).unwrap(), Value::from("Hello"));
    }

    #[test]
    fn repeated_writes_are_marked() {
        let mut flow = Flow::new("manual");
        let manual = Arc::new(ManualFlow::new());
        flow.set_executor(manual.clone(), true).unwrap();
        let x = flow.create_node(&emitter("same")).unwrap();

        flow.update_node(x, None).unwrap();
        manual.clear_updates();
        assert!(!manual.has_updated_outputs(&flow, x));

        flow.update_node(x, None).unwrap();
        assert!(manual.has_updated_outputs(&flow, x));
    }
}
