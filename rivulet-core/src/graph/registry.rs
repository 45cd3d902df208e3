//! Node type registry and identity allocation.
//!
//! Concrete node variants are registered as [`NodeType`] descriptors under a
//! stable string identifier (`prefix.name`). Snapshots refer to node types by
//! that identifier; older identifiers can be kept as legacy aliases so saved
//! graphs keep loading after a rename.
//!
//! Identity is allocated by an [`IdAllocator`] owned by the registry rather
//! than a process-wide counter. Ids are unique for the allocator's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::node::{Node, NodeBehavior, NodeId};
use super::port::{NodeInput, NodeOutput, PortConfig, PortId};
use crate::event::Event;

/// Monotonic id source shared by nodes, ports and flows.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: Arc<AtomicU64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_node_id(&self) -> NodeId {
        NodeId::from(self.next_raw())
    }

    pub fn next_port_id(&self) -> PortId {
        PortId::from(self.next_raw())
    }

    /// A graph-wide id for flows.
    pub fn next_gid(&self) -> u64 {
        self.next_raw()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a fresh behavior for every node instance.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>;

/// Descriptor of a node variant.
#[derive(Clone)]
pub struct NodeType {
    id_name: String,
    prefix: Option<String>,
    legacy_ids: Vec<String>,
    title: String,
    version: Option<String>,
    tags: Vec<String>,
    init_inputs: Vec<PortConfig>,
    init_outputs: Vec<PortConfig>,
    factory: NodeFactory,
}

impl NodeType {
    /// Describe a node variant named `id_name`, built by `factory`.
    pub fn new<F, B>(id_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: NodeBehavior,
    {
        let id_name = id_name.into();
        Self {
            title: id_name.clone(),
            id_name,
            prefix: None,
            legacy_ids: Vec::new(),
            version: None,
            tags: Vec::new(),
            init_inputs: Vec::new(),
            init_outputs: Vec::new(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn NodeBehavior>),
        }
    }

    /// Group under `prefix`; the identifier becomes `prefix.name`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Accept `legacy` as an alias when looking the type up.
    pub fn legacy_id(mut self, legacy: impl Into<String>) -> Self {
        self.legacy_ids.push(legacy.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Append an input created with every instance.
    pub fn input(mut self, config: PortConfig) -> Self {
        self.init_inputs.push(config);
        self
    }

    /// Append an output created with every instance.
    pub fn output(mut self, config: PortConfig) -> Self {
        self.init_outputs.push(config);
        self
    }

    /// The stable identifier, `prefix.name` or just `name`.
    pub fn identifier(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{}", self.id_name),
            None => self.id_name.clone(),
        }
    }

    pub fn id_name(&self) -> &str {
        &self.id_name
    }

    pub fn group(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn legacy_ids(&self) -> &[String] {
        &self.legacy_ids
    }

    pub fn title_str(&self) -> &str {
        &self.title
    }

    pub fn version_str(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn init_inputs(&self) -> &[PortConfig] {
        &self.init_inputs
    }

    pub fn init_outputs(&self) -> &[PortConfig] {
        &self.init_outputs
    }

    /// Build a detached node with fresh ids and the initial ports.
    pub fn instantiate(&self, ids: &IdAllocator) -> Node {
        self.instantiate_with(ids, &self.init_inputs, &self.init_outputs)
    }

    /// Build a detached node with the given port declarations instead of the
    /// initial ones.
    pub fn instantiate_with(&self, ids: &IdAllocator, inputs: &[PortConfig], outputs: &[PortConfig]) -> Node {
        let id = ids.next_node_id();
        let mut node = Node::new(
            id,
            self.identifier(),
            self.title.clone(),
            self.version.clone(),
            (self.factory)(),
        );
        for config in inputs {
            node.inputs.push(NodeInput::new(ids.next_port_id(), id, config));
        }
        for config in outputs {
            node.outputs.push(NodeOutput::new(ids.next_port_id(), id, config));
        }
        node
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("identifier", &self.identifier())
            .field("legacy_ids", &self.legacy_ids)
            .field("inputs", &self.init_inputs.len())
            .field("outputs", &self.init_outputs.len())
            .finish()
    }
}

/// Registration notifications, carrying the identifier.
#[derive(Debug, Default)]
pub struct RegistryEvents {
    pub registered: Event<String>,
    pub unregistered: Event<String>,
}

/// Registered node types plus the id allocator for everything built from them.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    types: RwLock<IndexMap<String, Arc<NodeType>>>,
    legacy: RwLock<HashMap<String, String>>,
    ids: IdAllocator,
    prev_ids: Mutex<HashMap<u64, NodeId>>,
    events: RegistryEvents,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Returns `false` if its identifier is taken.
    pub fn register(&self, node_type: NodeType) -> bool {
        let identifier = node_type.identifier();
        {
            let mut types = self.types.write();
            if types.contains_key(&identifier) {
                return false;
            }
            let mut legacy = self.legacy.write();
            for alias in node_type.legacy_ids() {
                legacy.insert(alias.clone(), identifier.clone());
            }
            types.insert(identifier.clone(), Arc::new(node_type));
        }
        debug!(node_type = %identifier, "registered node type");
        self.events.registered.emit(&identifier);
        true
    }

    /// Remove a node type and its legacy aliases.
    pub fn unregister(&self, identifier: &str) -> bool {
        let removed = self.types.write().shift_remove(identifier);
        let Some(node_type) = removed else {
            return false;
        };
        let mut legacy = self.legacy.write();
        for alias in node_type.legacy_ids() {
            legacy.remove(alias);
        }
        drop(legacy);
        self.events.unregistered.emit(&identifier.to_owned());
        true
    }

    /// Look a node type up by identifier, falling back to legacy aliases.
    pub fn find(&self, identifier: &str) -> Option<Arc<NodeType>> {
        let types = self.types.read();
        if let Some(found) = types.get(identifier) {
            return Some(found.clone());
        }
        let legacy = self.legacy.read();
        legacy
            .get(identifier)
            .and_then(|current| types.get(current))
            .cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.find(identifier).is_some()
    }

    /// Every node type registered under `prefix`, in registration order.
    pub fn group(&self, prefix: &str) -> Vec<Arc<NodeType>> {
        self.types
            .read()
            .values()
            .filter(|t| t.group() == Some(prefix))
            .cloned()
            .collect()
    }

    /// Identifiers in registration order.
    pub fn identifiers(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn events(&self) -> &RegistryEvents {
        &self.events
    }

    /// The live node that was restored from a snapshot node with id `prev`.
    pub fn node_from_prev_id(&self, prev: u64) -> Option<NodeId> {
        self.prev_ids.lock().get(&prev).copied()
    }

    pub(crate) fn record_prev_id(&self, prev: u64, node: NodeId) {
        self.prev_ids.lock().insert(prev, node);
    }

    /// Forget previous-id links, e.g. once a load has been fully relinked.
    pub fn clear_prev_ids(&self) {
        self.prev_ids.lock().clear();
    }
}
