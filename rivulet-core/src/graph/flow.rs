//! The Flow
//!
//! A [`Flow`] owns its nodes, the connection relation between their ports,
//! and exactly one active [`FlowExecutor`].
//!
//! # Adjacency
//!
//! Connections are not objects of their own. The flow keeps three relations
//! and updates all of them together on every connect and disconnect:
//!
//! - `graph_adj`: output port to the inputs it feeds, in connection order
//! - `graph_adj_rev`: input port to the output feeding it, if any
//! - `node_successors`: node to successor nodes, one entry per edge
//!
//! Every structural mutation is reported to the executor so it can drop any
//! cached plan before its next run.
//!
//! # Running node code
//!
//! Node hooks run through the `invoke_*` methods. The node's behavior is taken
//! out of its slot for the duration of the call, which lets the hook borrow
//! the whole flow mutably. An attempt to run a node whose behavior is already
//! out fails with [`FlowError::Reentrant`].

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, error};

use super::context::NodeContext;
use super::node::{Node, NodeBehavior, NodeFault, NodeId};
use super::port::{check_validity, ConnValidity, NodeInput, NodeOutput, PortConfig, PortId, PortInfo, PortKind};
use super::registry::{IdAllocator, NodeRegistry, NodeType};
use super::value::Value;
use crate::error::{FlowError, FlowResult, NodeError};
use crate::event::Event;
use crate::executor::{self, FlowAlg, FlowExecutor};

/// An edge from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub out: PortId,
    pub inp: PortId,
}

impl Connection {
    pub fn new(out: PortId, inp: PortId) -> Self {
        Self { out, inp }
    }
}

/// A connection expressed as node and port positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    pub out_node: NodeId,
    pub out_index: usize,
    pub inp_node: NodeId,
    pub inp_index: usize,
}

/// Structural notifications of a flow.
#[derive(Debug, Default)]
pub struct FlowEvents {
    /// A node was built from a node type by this flow.
    pub node_created: Event<NodeId>,
    pub node_added: Event<NodeId>,
    pub node_removed: Event<NodeId>,
    pub connection_added: Event<Connection>,
    pub connection_removed: Event<Connection>,
    /// Result of every validity query, including those made by connect and disconnect.
    pub connection_request_valid: Event<ConnValidity>,
    pub algorithm_mode_changed: Event<FlowAlg>,
    pub nodes_created_from_data: Event<Vec<NodeId>>,
    pub connections_created_from_data: Event<Vec<Connection>>,
    /// `(old, new)` title.
    pub renamed: Event<(String, String)>,
    pub node_update_failed: Event<NodeFault>,
}

/// A graph of nodes plus its active execution strategy.
pub struct Flow {
    gid: u64,
    title: String,
    ids: IdAllocator,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    port_owner: HashMap<PortId, NodeId>,
    graph_adj: HashMap<PortId, SmallVec<[PortId; 4]>>,
    graph_adj_rev: HashMap<PortId, Option<PortId>>,
    node_successors: HashMap<NodeId, SmallVec<[NodeId; 4]>>,
    executor: Arc<dyn FlowExecutor>,
    events: FlowEvents,
    prev_id: Option<u64>,
}

impl Flow {
    /// Create an empty flow with its own id allocator.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_ids(IdAllocator::new(), title)
    }

    /// Create an empty flow drawing ids from `ids`.
    pub fn with_ids(ids: IdAllocator, title: impl Into<String>) -> Self {
        Self {
            gid: ids.next_gid(),
            title: title.into(),
            ids,
            nodes: IndexMap::new(),
            port_owner: HashMap::new(),
            graph_adj: HashMap::new(),
            graph_adj_rev: HashMap::new(),
            node_successors: HashMap::new(),
            executor: executor::for_algorithm(FlowAlg::default()),
            events: FlowEvents::default(),
            prev_id: None,
        }
    }

    /// Create an empty flow drawing ids from the registry's allocator.
    pub fn in_registry(registry: &NodeRegistry, title: impl Into<String>) -> Self {
        Self::with_ids(registry.ids().clone(), title)
    }

    pub fn gid(&self) -> u64 {
        self.gid
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Change the title and emit `renamed`.
    pub fn rename(&mut self, title: impl Into<String>) {
        let old = std::mem::replace(&mut self.title, title.into());
        self.events.renamed.emit(&(old, self.title.clone()));
    }

    pub fn events(&self) -> &FlowEvents {
        &self.events
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn prev_id(&self) -> Option<u64> {
        self.prev_id
    }

    pub(crate) fn set_prev_id(&mut self, prev: u64) {
        self.prev_id = Some(prev);
    }

    // ---- Nodes ----

    /// Build a node of `node_type` and add it.
    pub fn create_node(&mut self, node_type: &NodeType) -> FlowResult<NodeId> {
        let node = node_type.instantiate(&self.ids);
        let id = node.id();
        self.events.node_created.emit(&id);
        self.add_node(node)
    }

    /// Build a node from the type registered as `identifier` and add it.
    pub fn create_node_by_id(&mut self, registry: &NodeRegistry, identifier: &str) -> FlowResult<NodeId> {
        let node_type = registry
            .find(identifier)
            .ok_or_else(|| FlowError::UnknownNodeType(identifier.to_owned()))?;
        self.create_node(&node_type)
    }

    /// Place a node. A previously removed node keeps its id and ports.
    pub fn add_node(&mut self, mut node: Node) -> FlowResult<NodeId> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(FlowError::DuplicateNode(id));
        }
        if self.executor.topology_locked() {
            return Err(FlowError::TopologyLocked);
        }

        for inp in &node.inputs {
            self.port_owner.insert(inp.id, id);
            self.graph_adj_rev.insert(inp.id, None);
        }
        for out in &node.outputs {
            self.port_owner.insert(out.id, id);
            self.graph_adj.insert(out.id, SmallVec::new());
        }
        self.node_successors.insert(id, SmallVec::new());

        if let Some(behavior) = node.behavior_mut() {
            behavior.place_event();
        }
        self.nodes.insert(id, node);

        debug!(node = %id, flow = %self.title, "node added");
        self.executor.flow_changed();
        self.events.node_added.emit(&id);
        Ok(id)
    }

    /// Remove a node, severing its connections first.
    ///
    /// The returned node may be added again later.
    pub fn remove_node(&mut self, id: NodeId) -> FlowResult<Node> {
        let node = self.nodes.get(&id).ok_or(FlowError::NodeNotFound(id))?;
        if node.behavior.is_none() {
            return Err(FlowError::Reentrant(id));
        }
        if self.executor.topology_locked() {
            return Err(FlowError::TopologyLocked);
        }

        let inputs = node.input_ids();
        let outputs = node.output_ids();
        for inp in &inputs {
            if let Some(out) = self.connected_output(*inp) {
                self.disconnect_ports(out, *inp)?;
            }
        }
        for out in &outputs {
            for inp in self.connected_inputs(*out).to_vec() {
                self.disconnect_ports(*out, inp)?;
            }
        }

        for port in inputs.iter().chain(outputs.iter()) {
            self.port_owner.remove(port);
            self.graph_adj.remove(port);
            self.graph_adj_rev.remove(port);
        }
        self.node_successors.remove(&id);

        let mut node = self
            .nodes
            .shift_remove(&id)
            .ok_or(FlowError::NodeNotFound(id))?;
        if let Some(behavior) = node.behavior_mut() {
            behavior.remove_event();
        }

        debug!(node = %id, flow = %self.title, "node removed");
        self.executor.flow_changed();
        self.events.node_removed.emit(&id);
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn node_or_err(&self, id: NodeId) -> FlowResult<&Node> {
        self.nodes.get(&id).ok_or(FlowError::NodeNotFound(id))
    }

    fn node_mut_or_err(&mut self, id: NodeId) -> FlowResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FlowError::NodeNotFound(id))
    }

    // ---- Ports ----

    /// The node owning `port`, if the port is in this flow.
    pub fn port_owner(&self, port: PortId) -> Option<NodeId> {
        self.port_owner.get(&port).copied()
    }

    pub fn port_info(&self, port: PortId) -> Option<PortInfo> {
        let node = self.nodes.get(self.port_owner.get(&port)?)?;
        node.inputs
            .iter()
            .find(|i| i.id == port)
            .map(NodeInput::info)
            .or_else(|| node.outputs.iter().find(|o| o.id == port).map(NodeOutput::info))
    }

    /// Id of input `index` of `node`.
    pub fn input_port(&self, node: NodeId, index: usize) -> FlowResult<PortId> {
        self.node_or_err(node)?
            .input(index)
            .map(|p| p.id)
            .ok_or(FlowError::InputIndex { node, index })
    }

    /// Id of output `index` of `node`.
    pub fn output_port(&self, node: NodeId, index: usize) -> FlowResult<PortId> {
        self.node_or_err(node)?
            .output(index)
            .map(|p| p.id)
            .ok_or(FlowError::OutputIndex { node, index })
    }

    /// `(node, index)` of an input port.
    pub fn input_position(&self, port: PortId) -> Option<(NodeId, usize)> {
        let owner = self.port_owner(port)?;
        let index = self.nodes.get(&owner)?.input_index(port)?;
        Some((owner, index))
    }

    /// `(node, index)` of an output port.
    pub fn output_position(&self, port: PortId) -> Option<(NodeId, usize)> {
        let owner = self.port_owner(port)?;
        let index = self.nodes.get(&owner)?.output_index(port)?;
        Some((owner, index))
    }

    /// Add an input to `node`, appended or inserted at `at`.
    pub fn create_input(&mut self, node: NodeId, config: PortConfig, at: Option<usize>) -> FlowResult<PortId> {
        self.ensure_unlocked()?;
        let port = self.ids.next_port_id();
        let target = self.node_mut_or_err(node)?;
        let index = at.unwrap_or(target.inputs.len()).min(target.inputs.len());
        target.inputs.insert(index, NodeInput::new(port, node, &config));

        self.port_owner.insert(port, node);
        self.graph_adj_rev.insert(port, None);
        self.executor.flow_changed();
        if let Some(target) = self.nodes.get(&node) {
            target.events().input_added.emit(&(index, port));
        }
        Ok(port)
    }

    /// Add an output to `node`, appended or inserted at `at`.
    pub fn create_output(&mut self, node: NodeId, config: PortConfig, at: Option<usize>) -> FlowResult<PortId> {
        self.ensure_unlocked()?;
        let port = self.ids.next_port_id();
        let target = self.node_mut_or_err(node)?;
        let index = at.unwrap_or(target.outputs.len()).min(target.outputs.len());
        target.outputs.insert(index, NodeOutput::new(port, node, &config));

        self.port_owner.insert(port, node);
        self.graph_adj.insert(port, SmallVec::new());
        self.executor.flow_changed();
        if let Some(target) = self.nodes.get(&node) {
            target.events().output_added.emit(&(index, port));
        }
        Ok(port)
    }

    /// Remove input `index`, disconnecting it first.
    pub fn delete_input(&mut self, node: NodeId, index: usize) -> FlowResult<()> {
        self.ensure_unlocked()?;
        let port = self.input_port(node, index)?;
        if let Some(out) = self.connected_output(port) {
            self.disconnect_ports(out, port)?;
        }

        self.node_mut_or_err(node)?.inputs.remove(index);
        self.port_owner.remove(&port);
        self.graph_adj_rev.remove(&port);
        self.executor.flow_changed();
        if let Some(target) = self.nodes.get(&node) {
            target.events().input_removed.emit(&(index, port));
        }
        Ok(())
    }

    /// Remove output `index`, disconnecting it first.
    pub fn delete_output(&mut self, node: NodeId, index: usize) -> FlowResult<()> {
        self.ensure_unlocked()?;
        let port = self.output_port(node, index)?;
        for inp in self.connected_inputs(port).to_vec() {
            self.disconnect_ports(port, inp)?;
        }

        self.node_mut_or_err(node)?.outputs.remove(index);
        self.port_owner.remove(&port);
        self.graph_adj.remove(&port);
        self.executor.flow_changed();
        if let Some(target) = self.nodes.get(&node) {
            target.events().output_removed.emit(&(index, port));
        }
        Ok(())
    }

    pub fn rename_input(&mut self, node: NodeId, index: usize, label: impl Into<String>) -> FlowResult<()> {
        let port = self
            .node_mut_or_err(node)?
            .inputs
            .get_mut(index)
            .ok_or(FlowError::InputIndex { node, index })?;
        port.label = label.into();
        Ok(())
    }

    pub fn rename_output(&mut self, node: NodeId, index: usize, label: impl Into<String>) -> FlowResult<()> {
        let port = self
            .node_mut_or_err(node)?
            .outputs
            .get_mut(index)
            .ok_or(FlowError::OutputIndex { node, index })?;
        port.label = label.into();
        Ok(())
    }

    fn ensure_unlocked(&self) -> FlowResult<()> {
        if self.executor.topology_locked() {
            return Err(FlowError::TopologyLocked);
        }
        Ok(())
    }

    // ---- Connections ----

    /// Validate connecting (`connecting == true`) or disconnecting `out` and `inp`.
    ///
    /// Emits `connection_request_valid` with the outcome.
    pub fn check_connection_validity(&self, out: PortId, inp: PortId, connecting: bool) -> FlowResult<ConnValidity> {
        let out_info = self.port_info(out).ok_or(FlowError::PortNotFound(out))?;
        let inp_info = self.port_info(inp).ok_or(FlowError::PortNotFound(inp))?;

        let mut validity = check_validity(&out_info, &inp_info);
        if validity.is_valid() {
            let current = self.graph_adj_rev.get(&inp).copied().flatten();
            validity = match (connecting, current) {
                (true, Some(existing)) if existing == out => ConnValidity::AlreadyConnected,
                (true, Some(_)) => ConnValidity::InputAlreadyTaken,
                (false, Some(existing)) if existing == out => ConnValidity::Valid,
                (false, _) => ConnValidity::AlreadyDisconnected,
                (true, None) => ConnValidity::Valid,
            };
        }

        self.events.connection_request_valid.emit(&validity);
        Ok(validity)
    }

    pub fn can_ports_connect(&self, out: PortId, inp: PortId) -> bool {
        matches!(self.check_connection_validity(out, inp, true), Ok(v) if v.is_valid())
    }

    pub fn can_ports_disconnect(&self, out: PortId, inp: PortId) -> bool {
        matches!(self.check_connection_validity(out, inp, false), Ok(v) if v.is_valid())
    }

    /// Connect output `out` to input `inp`.
    pub fn connect_ports(&mut self, out: PortId, inp: PortId) -> FlowResult<Connection> {
        let validity = self.check_connection_validity(out, inp, true)?;
        if !validity.is_valid() {
            debug!(%out, %inp, reason = %validity, "connection rejected");
            return Err(FlowError::Rejected(validity));
        }
        Ok(self.add_connection(out, inp))
    }

    /// Disconnect output `out` from input `inp`.
    pub fn disconnect_ports(&mut self, out: PortId, inp: PortId) -> FlowResult<Connection> {
        let validity = self.check_connection_validity(out, inp, false)?;
        if !validity.is_valid() {
            return Err(FlowError::Rejected(validity));
        }
        Ok(self.remove_connection(out, inp))
    }

    /// Connect output `out_index` of `out_node` to input `inp_index` of `inp_node`.
    pub fn connect_nodes(
        &mut self,
        out_node: NodeId,
        out_index: usize,
        inp_node: NodeId,
        inp_index: usize,
    ) -> FlowResult<Connection> {
        let out = self.output_port(out_node, out_index)?;
        let inp = self.input_port(inp_node, inp_index)?;
        self.connect_ports(out, inp)
    }

    /// Counterpart to [`connect_nodes`](Flow::connect_nodes).
    pub fn disconnect_nodes(
        &mut self,
        out_node: NodeId,
        out_index: usize,
        inp_node: NodeId,
        inp_index: usize,
    ) -> FlowResult<Connection> {
        let out = self.output_port(out_node, out_index)?;
        let inp = self.input_port(inp_node, inp_index)?;
        self.disconnect_ports(out, inp)
    }

    fn add_connection(&mut self, out: PortId, inp: PortId) -> Connection {
        self.graph_adj.entry(out).or_default().push(inp);
        self.graph_adj_rev.insert(inp, Some(out));
        if let (Some(from), Some(to)) = (self.port_owner(out), self.port_owner(inp)) {
            self.node_successors.entry(from).or_default().push(to);
        }

        let conn = Connection::new(out, inp);
        debug!(%out, %inp, flow = %self.title, "connected");
        self.executor.connection_added(conn);
        self.events.connection_added.emit(&conn);
        conn
    }

    fn remove_connection(&mut self, out: PortId, inp: PortId) -> Connection {
        if let Some(targets) = self.graph_adj.get_mut(&out) {
            targets.retain(|p| *p != inp);
        }
        self.graph_adj_rev.insert(inp, None);
        if let (Some(from), Some(to)) = (self.port_owner(out), self.port_owner(inp)) {
            if let Some(successors) = self.node_successors.get_mut(&from) {
                if let Some(pos) = successors.iter().position(|n| *n == to) {
                    successors.remove(pos);
                }
            }
        }

        let conn = Connection::new(out, inp);
        debug!(%out, %inp, flow = %self.title, "disconnected");
        self.executor.connection_removed(conn);
        self.events.connection_removed.emit(&conn);
        conn
    }

    /// Inputs fed by output `out`, in connection order.
    pub fn connected_inputs(&self, out: PortId) -> &[PortId] {
        self.graph_adj.get(&out).map_or(&[], |v| v.as_slice())
    }

    /// Output feeding input `inp`, if any.
    pub fn connected_output(&self, inp: PortId) -> Option<PortId> {
        self.graph_adj_rev.get(&inp).copied().flatten()
    }

    /// Successor nodes of `node`, one entry per outgoing edge.
    pub fn successors(&self, node: NodeId) -> &[NodeId] {
        self.node_successors.get(&node).map_or(&[], |v| v.as_slice())
    }

    pub fn any_input_connected(&self, node: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.inputs.iter().any(|i| self.connected_output(i.id).is_some()))
    }

    pub fn any_output_connected(&self, node: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.outputs.iter().any(|o| !self.connected_inputs(o.id).is_empty()))
    }

    /// `(node, input index)` pairs fed by output `index` of `node`.
    pub fn output_targets(&self, node: NodeId, index: usize) -> FlowResult<Vec<(NodeId, usize)>> {
        let out = self.output_port(node, index)?;
        Ok(self
            .connected_inputs(out)
            .iter()
            .filter_map(|inp| self.input_position(*inp))
            .collect())
    }

    /// Every connection, ordered by node, then output, then connection order.
    pub fn connections(&self) -> Vec<Connection> {
        self.nodes
            .values()
            .flat_map(|n| n.outputs.iter())
            .flat_map(|out| {
                self.connected_inputs(out.id)
                    .iter()
                    .map(move |inp| Connection::new(out.id, *inp))
            })
            .collect()
    }

    pub fn connection_info(&self, conn: Connection) -> Option<ConnectionInfo> {
        let (out_node, out_index) = self.output_position(conn.out)?;
        let (inp_node, inp_index) = self.input_position(conn.inp)?;
        Some(ConnectionInfo {
            out_node,
            out_index,
            inp_node,
            inp_index,
        })
    }

    // ---- Algorithm ----

    /// The active executor.
    pub fn executor(&self) -> Arc<dyn FlowExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn algorithm_mode(&self) -> FlowAlg {
        self.executor.algorithm()
    }

    /// Switch to a built-in executor; emits `algorithm_mode_changed` on change.
    pub fn set_algorithm_mode(&mut self, mode: FlowAlg) -> FlowResult<()> {
        if self.executor.algorithm() == mode {
            return Ok(());
        }
        self.set_executor(executor::for_algorithm(mode), false)?;
        Ok(())
    }

    /// Install `executor`, returning the previous one.
    ///
    /// A `silent` swap emits nothing. Fails while the current executor is
    /// mid-run.
    pub fn set_executor(
        &mut self,
        executor: Arc<dyn FlowExecutor>,
        silent: bool,
    ) -> FlowResult<Arc<dyn FlowExecutor>> {
        self.ensure_unlocked()?;
        executor.flow_changed();
        let old = std::mem::replace(&mut self.executor, executor);
        if !silent {
            let mode = self.executor.algorithm();
            debug!(flow = %self.title, %mode, "algorithm mode changed");
            self.events.algorithm_mode_changed.emit(&mode);
        }
        Ok(old)
    }

    // ---- Updates and values ----

    /// Request an update of `node`, triggered by input `inp` (`None`: no data).
    ///
    /// Blocked nodes ignore the request.
    pub fn update_node(&mut self, node: NodeId, inp: Option<usize>) -> FlowResult<()> {
        let target = self.node_or_err(node)?;
        if let Some(index) = inp {
            if index >= target.inputs.len() {
                return Err(FlowError::InputIndex { node, index });
            }
        }
        if target.is_blocked() {
            debug!(%node, "update suppressed, node is blocked");
            return Ok(());
        }
        target.events().updating.emit(&inp);

        let executor = self.executor();
        executor.update_node(self, node, inp)
    }

    /// Value of input `index` as the active executor resolves it.
    pub fn input(&mut self, node: NodeId, index: usize) -> FlowResult<Value> {
        self.input_port(node, index)?;
        let executor = self.executor();
        executor.input(self, node, index)
    }

    /// Write `value` to data output `index` through the active executor.
    pub fn set_output(&mut self, node: NodeId, index: usize, value: Value) -> FlowResult<()> {
        let port = self
            .node_or_err(node)?
            .output(index)
            .ok_or(FlowError::OutputIndex { node, index })?;
        if port.kind != PortKind::Data {
            return Err(FlowError::WrongPortKind(port.id));
        }
        if let Some(declared) = port.allowed_data {
            if !declared.accepts_value(&value) {
                return Err(FlowError::OutputType {
                    node,
                    index,
                    found: value.data_type(),
                });
            }
        }

        let executor = self.executor();
        executor.set_output(self, node, index, value.clone())?;
        if let Some(target) = self.nodes.get(&node) {
            target.events().output_updated.emit(&(index, value));
        }
        Ok(())
    }

    /// Fire exec output `index` through the active executor.
    pub fn exec_output(&mut self, node: NodeId, index: usize) -> FlowResult<()> {
        let port = self
            .node_or_err(node)?
            .output(index)
            .ok_or(FlowError::OutputIndex { node, index })?;
        if port.kind != PortKind::Exec {
            return Err(FlowError::WrongPortKind(port.id));
        }
        let executor = self.executor();
        executor.exec_output(self, node, index)
    }

    /// Value stored on the output feeding input `index`, or the input's default.
    ///
    /// Raw read for executors; triggers nothing.
    pub fn read_input_value(&self, node: NodeId, index: usize) -> FlowResult<Value> {
        let inp = self
            .node_or_err(node)?
            .input(index)
            .ok_or(FlowError::InputIndex { node, index })?;
        let value = self
            .connected_output(inp.id)
            .and_then(|out| {
                let owner = self.nodes.get(self.port_owner.get(&out)?)?;
                owner.outputs.iter().find(|o| o.id == out)
            })
            .map(|o| o.value.clone())
            .unwrap_or_else(|| inp.default.clone());
        Ok(value)
    }

    /// Store `value` on output `index`. Returns whether the value changed.
    ///
    /// Raw write for executors; triggers nothing.
    pub fn store_output_value(&mut self, node: NodeId, index: usize, value: Value) -> FlowResult<bool> {
        let port = self
            .node_mut_or_err(node)?
            .outputs
            .get_mut(index)
            .ok_or(FlowError::OutputIndex { node, index })?;
        if port.value == value {
            return Ok(false);
        }
        port.value = value;
        Ok(true)
    }

    // ---- Node hooks ----

    fn take_behavior(&mut self, id: NodeId) -> FlowResult<Box<dyn NodeBehavior>> {
        self.node_mut_or_err(id)?
            .behavior
            .take()
            .ok_or(FlowError::Reentrant(id))
    }

    fn restore_behavior(&mut self, id: NodeId, behavior: Box<dyn NodeBehavior>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.behavior = Some(behavior);
        }
    }

    /// Turn a node result into a flow result, reporting computation faults.
    fn settle(&self, id: NodeId, result: Result<(), NodeError>) -> FlowResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(NodeError::Failed(message)) => {
                error!(node = %id, flow = %self.title, %message, "node update failed");
                let fault = NodeFault {
                    node: id,
                    message: message.clone(),
                };
                if let Some(node) = self.nodes.get(&id) {
                    node.events().update_error.emit(&fault);
                }
                self.events.node_update_failed.emit(&fault);
                Err(FlowError::NodeFailed { node: id, message })
            }
            Err(NodeError::Flow(e)) => Err(e),
        }
    }

    /// Run the node's update computation. Executors call this.
    pub fn invoke_update(&mut self, id: NodeId, inp: Option<usize>) -> FlowResult<()> {
        let mut behavior = self.take_behavior(id)?;
        let result = behavior.update_event(&mut NodeContext::new(self, id), inp);
        self.restore_behavior(id, behavior);
        self.settle(id, result)?;
        if let Some(node) = self.nodes.get(&id) {
            node.events().updated.emit(&inp);
        }
        Ok(())
    }

    /// Run a frame node's per-frame hook.
    pub fn invoke_frame_update(&mut self, id: NodeId) -> FlowResult<bool> {
        let mut behavior = self.take_behavior(id)?;
        let result = behavior.frame_update(&mut NodeContext::new(self, id));
        self.restore_behavior(id, behavior);
        match result {
            Ok(produced) => Ok(produced),
            Err(e) => self.settle(id, Err(e)).map(|()| false),
        }
    }

    /// Run the node's per-run initialization hook.
    pub fn invoke_reset(&mut self, id: NodeId) -> FlowResult<()> {
        let mut behavior = self.take_behavior(id)?;
        let result = behavior.reset(&mut NodeContext::new(self, id));
        self.restore_behavior(id, behavior);
        self.settle(id, result)
    }

    /// Notify the node that a run ended.
    pub fn invoke_stop(&mut self, id: NodeId) {
        if let Some(behavior) = self.nodes.get_mut(&id).and_then(Node::behavior_mut) {
            behavior.stop();
        }
    }

    pub(crate) fn invoke_rebuilt(&mut self, id: NodeId) {
        if let Some(behavior) = self.nodes.get_mut(&id).and_then(Node::behavior_mut) {
            behavior.rebuilt();
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("gid", &self.gid)
            .field("title", &self.title)
            .field("nodes", &self.nodes.len())
            .field("algorithm", &self.executor.algorithm())
            .finish()
    }
}
