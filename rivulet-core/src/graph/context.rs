//! Node Context
//!
//! The handle a [`NodeBehavior`](super::NodeBehavior) hook receives while it
//! runs. It ties the running computation to its node and routes every read
//! and write through the flow, which hands them to the active executor.
//!
//! While a hook runs its behavior has been taken out of the node, so the
//! context may freely borrow the flow mutably; calls that would run the same
//! node again fail with [`FlowError::Reentrant`](crate::error::FlowError).

use super::flow::Flow;
use super::node::{NodeId, ProgressState};
use super::value::Value;
use crate::error::NodeError;

/// Access to the flow from inside a node hook.
pub struct NodeContext<'a> {
    flow: &'a mut Flow,
    node: NodeId,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(flow: &'a mut Flow, node: NodeId) -> Self {
        Self { flow, node }
    }

    /// The node whose hook is running.
    pub fn id(&self) -> NodeId {
        self.node
    }

    /// Read input `index` through the active executor.
    ///
    /// Unconnected inputs yield their default. In exec mode, reading a
    /// connected data input first asks the producer to update.
    pub fn input(&mut self, index: usize) -> Result<Value, NodeError> {
        Ok(self.flow.input(self.node, index)?)
    }

    /// Write output `index` through the active executor.
    pub fn set_output(&mut self, index: usize, value: impl Into<Value>) -> Result<(), NodeError> {
        Ok(self.flow.set_output(self.node, index, value.into())?)
    }

    /// Fire exec output `index`.
    pub fn exec_output(&mut self, index: usize) -> Result<(), NodeError> {
        Ok(self.flow.exec_output(self.node, index)?)
    }

    /// Last value written through output `index`.
    pub fn output_value(&self, index: usize) -> Option<Value> {
        self.flow
            .node(self.node)
            .and_then(|n| n.output(index))
            .map(|o| o.value().clone())
    }

    pub fn input_count(&self) -> usize {
        self.flow.node(self.node).map_or(0, |n| n.inputs().len())
    }

    pub fn output_count(&self) -> usize {
        self.flow.node(self.node).map_or(0, |n| n.outputs().len())
    }

    /// Whether input `index` receives from an output.
    pub fn input_connected(&self, index: usize) -> bool {
        self.flow
            .node(self.node)
            .and_then(|n| n.input(index))
            .is_some_and(|inp| self.flow.connected_output(inp.id()).is_some())
    }

    /// Whether output `index` feeds at least one input.
    pub fn output_connected(&self, index: usize) -> bool {
        self.flow
            .node(self.node)
            .and_then(|n| n.output(index))
            .is_some_and(|out| !self.flow.connected_inputs(out.id()).is_empty())
    }

    /// Replace the node's progress record.
    pub fn set_progress(&mut self, progress: Option<ProgressState>, as_percentage: bool) {
        if let Some(node) = self.flow.node_mut(self.node) {
            node.set_progress(progress, as_percentage);
        }
    }

    /// The flow the node lives in.
    pub fn flow(&self) -> &Flow {
        self.flow
    }

    /// Mutable access, for nodes that edit the graph (adding ports and the like).
    pub fn flow_mut(&mut self) -> &mut Flow {
        self.flow
    }
}
