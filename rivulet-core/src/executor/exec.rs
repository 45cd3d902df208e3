//! Pull-based exec propagation.
//!
//! Exec outputs carry trigger signals. When a triggered node reads a
//! connected data input, the producer is asked to update first (with no
//! input index) and the freshly written value is returned. Data is generated
//! on demand, walking backwards from consumer to producer.
//!
//! # Resolve guard
//!
//! Every running update is pushed on a resolve stack for the duration of the
//! call and popped by a drop guard, so the stack stays correct when a node
//! fails or unwinds. Updating a node that is already on the stack is a cycle
//! and fails with [`FlowError::CycleDetected`] instead of recursing.
//!
//! A node on the stack may already have written the output being read, as
//! when it sets a data output and then fires an exec output whose target
//! reads that data. Such a read returns the stored value without a pull.

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::{FlowAlg, FlowExecutor};
use crate::error::{FlowError, FlowResult};
use crate::graph::{Flow, NodeId, PortKind, Value};

/// A running update and the outputs it has written so far.
#[derive(Debug)]
struct Frame {
    node: NodeId,
    written: SmallVec<[usize; 4]>,
}

/// Pops the resolve stack when dropped.
struct Resolving<'a> {
    stack: &'a Mutex<Vec<Frame>>,
    node: NodeId,
}

impl<'a> Resolving<'a> {
    fn enter(stack: &'a Mutex<Vec<Frame>>, node: NodeId) -> FlowResult<Self> {
        let mut frames = stack.lock();
        if frames.iter().any(|f| f.node == node) {
            return Err(FlowError::CycleDetected(node));
        }
        frames.push(Frame {
            node,
            written: SmallVec::new(),
        });
        Ok(Self { stack, node })
    }
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        let popped = self.stack.lock().pop().map(|f| f.node);
        debug_assert_eq!(popped, Some(self.node), "resolve stack mismatch");
    }
}

/// Exec-driven executor with backward data pulls.
#[derive(Debug, Default)]
pub struct ExecFlow {
    resolving: Mutex<Vec<Frame>>,
}

impl ExecFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes whose update is running, outermost first.
    pub fn resolve_stack(&self) -> Vec<NodeId> {
        self.resolving.lock().iter().map(|f| f.node).collect()
    }

    /// Whether `node` is mid-update and has already written output `index`.
    fn wrote_during_update(&self, node: NodeId, index: usize) -> bool {
        self.resolving
            .lock()
            .iter()
            .any(|f| f.node == node && f.written.contains(&index))
    }
}

impl FlowExecutor for ExecFlow {
    fn algorithm(&self) -> FlowAlg {
        FlowAlg::Exec
    }

    fn update_node(&self, flow: &mut Flow, node: NodeId, inp: Option<usize>) -> FlowResult<()> {
        let _resolving = Resolving::enter(&self.resolving, node)?;
        flow.invoke_update(node, inp)
    }

    fn input(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<Value> {
        let port = flow.input_port(node, index)?;
        let info = flow.port_info(port).ok_or(FlowError::PortNotFound(port))?;
        if info.kind != PortKind::Data {
            return Err(FlowError::WrongPortKind(port));
        }

        if let Some(out) = flow.connected_output(port) {
            let (producer, out_index) = flow
                .output_position(out)
                .ok_or(FlowError::PortNotFound(out))?;
            if self.wrote_during_update(producer, out_index) {
                trace!(consumer = %node, %producer, "reading output of running producer");
            } else {
                trace!(consumer = %node, %producer, "pulling input");
                flow.update_node(producer, None)?;
            }
        }
        flow.read_input_value(node, index)
    }

    fn set_output(&self, flow: &mut Flow, node: NodeId, index: usize, value: Value) -> FlowResult<()> {
        flow.store_output_value(node, index, value)?;
        let mut frames = self.resolving.lock();
        if let Some(frame) = frames.iter_mut().rev().find(|f| f.node == node) {
            if !frame.written.contains(&index) {
                frame.written.push(index);
            }
        }
        Ok(())
    }

    fn exec_output(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        for (target, inp) in flow.output_targets(node, index)? {
            flow.update_node(target, Some(inp))?;
        }
        Ok(())
    }
}
