//! Graph Nodes
//!
//! This module defines the computational vertices of a flow.
//!
//! A [`Node`] is the structural part the flow manages: identity, ports, flags,
//! progress, and events. What the node actually computes lives in a boxed
//! [`NodeBehavior`], a capability set of hooks that concrete node variants
//! implement.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::NodeContext;
use super::port::{NodeInput, NodeOutput, PortId};
use super::value::Value;
use crate::error::NodeError;
use crate::event::Event;

/// Unique identifier for a node.
///
/// Ids are handed out by an [`IdAllocator`](super::IdAllocator), increase
/// monotonically and are never reused while the allocator lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Updated only when triggered: directly, by upstream data, or by an exec signal.
    #[default]
    Standard,

    /// Additionally re-evaluated on every frame of a running player.
    Frame,
}

/// The hooks a concrete node variant implements.
///
/// Only [`update_event`](NodeBehavior::update_event) is required. Everything
/// else has a no-op default.
///
/// Hooks receive a [`NodeContext`] through which they read inputs and write
/// outputs; the active executor decides what those calls trigger.
pub trait NodeBehavior: Send + 'static {
    /// Main computation.
    ///
    /// `inp` is the index of the input that received a signal, or `None` when
    /// the node was triggered without data (a direct update, or a backward
    /// pull asking it to produce its outputs now).
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError>;

    /// Whether this node wants per-frame evaluation from a player.
    fn kind(&self) -> NodeKind {
        NodeKind::Standard
    }

    /// Per-frame hook for [`NodeKind::Frame`] nodes.
    ///
    /// Returns `true` if the frame produced new output.
    fn frame_update(&mut self, _ctx: &mut NodeContext<'_>) -> Result<bool, NodeError> {
        Ok(false)
    }

    /// A finished frame node is no longer evaluated per frame.
    fn is_finished(&self) -> bool {
        false
    }

    /// Called every time the node is placed into a flow, before any
    /// connection touching it exists.
    fn place_event(&mut self) {}

    /// Called when the node is removed from a flow.
    fn remove_event(&mut self) {}

    /// Called on every node when a player starts a run. Outputs written here
    /// seed the player's first propagation wave.
    fn reset(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Called on every node when a player run ends.
    fn stop(&mut self) {}

    /// Called after a restore placed the node and established its connections.
    fn rebuilt(&mut self) {}

    /// Custom state stored in snapshots.
    fn get_state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Counterpart to [`get_state`](NodeBehavior::get_state).
    fn set_state(&mut self, _state: serde_json::Value, _version: Option<&str>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Progress of a long-running node computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub value: f64,
    pub max: f64,
    pub message: String,
}

impl ProgressState {
    pub fn new(value: f64, max: f64, message: impl Into<String>) -> Self {
        Self {
            value,
            max,
            message: message.into(),
        }
    }

    /// Rescale to a 0..=100 range. A non-positive `max` yields zero.
    pub fn as_percentage(&self) -> Self {
        let value = if self.max > 0.0 {
            (self.value / self.max * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            value,
            max: 100.0,
            message: self.message.clone(),
        }
    }
}

/// A node update that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFault {
    pub node: NodeId,
    pub message: String,
}

/// Per-node notifications.
#[derive(Debug, Default)]
pub struct NodeEvents {
    /// Fired before the executor handles an update, with the input index.
    pub updating: Event<Option<usize>>,
    /// Fired after the node's computation returned successfully.
    pub updated: Event<Option<usize>>,
    /// Fired when the node's computation fails.
    pub update_error: Event<NodeFault>,
    /// `(index, port)` of a created input.
    pub input_added: Event<(usize, PortId)>,
    /// `(index, port)` of a deleted input.
    pub input_removed: Event<(usize, PortId)>,
    /// `(index, port)` of a created output.
    pub output_added: Event<(usize, PortId)>,
    /// `(index, port)` of a deleted output.
    pub output_removed: Event<(usize, PortId)>,
    /// `(index, value)` after an output write went through the executor.
    pub output_updated: Event<(usize, Value)>,
    /// New progress, or `None` when cleared.
    pub progress_updated: Event<Option<ProgressState>>,
}

/// A node in a flow.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// Identifier of the node type this node was built from.
    type_id: String,

    title: String,

    version: Option<String>,

    /// Cached from the behavior, which is absent while it runs.
    kind: NodeKind,

    pub(crate) inputs: Vec<NodeInput>,

    pub(crate) outputs: Vec<NodeOutput>,

    /// Suppresses update activation while set.
    block_updates: bool,

    progress: Option<ProgressState>,

    /// Taken out while one of its hooks runs.
    pub(crate) behavior: Option<Box<dyn NodeBehavior>>,

    events: NodeEvents,

    /// Id this node had in the snapshot it was restored from.
    prev_id: Option<u64>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        type_id: impl Into<String>,
        title: impl Into<String>,
        version: Option<String>,
        behavior: Box<dyn NodeBehavior>,
    ) -> Self {
        Self {
            id,
            type_id: type_id.into(),
            title: title.into(),
            version,
            kind: behavior.kind(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            block_updates: false,
            progress: None,
            behavior: Some(behavior),
            events: NodeEvents::default(),
            prev_id: None,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Identifier of the node type.
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_frame_node(&self) -> bool {
        self.kind == NodeKind::Frame
    }

    pub fn inputs(&self) -> &[NodeInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeOutput] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Option<&NodeInput> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&NodeOutput> {
        self.outputs.get(index)
    }

    pub fn input_ids(&self) -> Vec<PortId> {
        self.inputs.iter().map(|inp| inp.id).collect()
    }

    pub fn output_ids(&self) -> Vec<PortId> {
        self.outputs.iter().map(|out| out.id).collect()
    }

    /// Position of `port` among the inputs.
    pub fn input_index(&self, port: PortId) -> Option<usize> {
        self.inputs.iter().position(|inp| inp.id == port)
    }

    /// Position of `port` among the outputs.
    pub fn output_index(&self, port: PortId) -> Option<usize> {
        self.outputs.iter().position(|out| out.id == port)
    }

    /// Whether update activation is suppressed.
    pub fn is_blocked(&self) -> bool {
        self.block_updates
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.block_updates = blocked;
    }

    /// Copy of the in-flight progress record, if any.
    pub fn progress(&self) -> Option<ProgressState> {
        self.progress.clone()
    }

    /// Replace the progress record and notify subscribers.
    pub fn set_progress(&mut self, progress: Option<ProgressState>, as_percentage: bool) {
        let progress = match progress {
            Some(p) if as_percentage => Some(p.as_percentage()),
            other => other,
        };
        self.progress = progress;
        self.events.progress_updated.emit(&self.progress);
    }

    pub fn events(&self) -> &NodeEvents {
        &self.events
    }

    pub fn prev_id(&self) -> Option<u64> {
        self.prev_id
    }

    pub(crate) fn set_prev_id(&mut self, prev: u64) {
        self.prev_id = Some(prev);
    }

    /// Whether a frame node reports it is done. `false` while its hooks run.
    pub fn is_finished(&self) -> bool {
        self.behavior.as_ref().is_some_and(|b| b.is_finished())
    }

    /// `true` if any input or output is an exec port.
    pub fn is_active(&self) -> bool {
        use super::port::PortKind;
        self.inputs.iter().any(|i| i.kind == PortKind::Exec)
            || self.outputs.iter().any(|o| o.kind == PortKind::Exec)
    }

    pub(crate) fn behavior_mut(&mut self) -> Option<&mut Box<dyn NodeBehavior>> {
        self.behavior.as_mut()
    }

    pub(crate) fn behavior_ref(&self) -> Option<&dyn NodeBehavior> {
        self.behavior.as_deref()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("blocked", &self.block_updates)
            .finish()
    }
}
