//! Immediate push propagation.

use super::{FlowAlg, FlowExecutor};
use crate::error::FlowResult;
use crate::graph::{Flow, NodeId, Value};

/// Every write synchronously updates each connected node, in connection order.
///
/// Nothing is memoized: a node reachable along two paths runs once per
/// arriving signal. Feedback cycles never terminate; the graph is expected
/// to be free of them.
#[derive(Debug, Default)]
pub struct DataFlowNaive;

impl DataFlowNaive {
    pub fn new() -> Self {
        Self
    }

    fn fire(flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        for (target, inp) in flow.output_targets(node, index)? {
            flow.update_node(target, Some(inp))?;
        }
        Ok(())
    }
}

impl FlowExecutor for DataFlowNaive {
    fn algorithm(&self) -> FlowAlg {
        FlowAlg::Data
    }

    fn update_node(&self, flow: &mut Flow, node: NodeId, inp: Option<usize>) -> FlowResult<()> {
        flow.invoke_update(node, inp)
    }

    fn input(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<Value> {
        flow.read_input_value(node, index)
    }

    fn set_output(&self, flow: &mut Flow, node: NodeId, index: usize, value: Value) -> FlowResult<()> {
        flow.store_output_value(node, index, value)?;
        Self::fire(flow, node, index)
    }

    fn exec_output(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        Self::fire(flow, node, index)
    }
}
