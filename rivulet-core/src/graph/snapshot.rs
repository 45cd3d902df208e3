//! Serializable descriptions of flows.
//!
//! A snapshot lists node identities and port declarations, plus connections
//! expressed as indices into those lists. Restoring runs in two passes: every
//! node is built and placed before any connection is made.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::flow::{Connection, Flow};
use super::node::NodeId;
use super::port::{NodeInput, NodeOutput, PortConfig, PortKind};
use super::registry::NodeRegistry;
use super::value::{DataType, Value};
use crate::error::{FlowError, FlowResult, NodeError};
use crate::executor::FlowAlg;

/// A port declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub gid: u64,
    pub kind: PortKind,
    pub label: String,
    pub allowed_data: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PortSnapshot {
    fn of_input(port: &NodeInput) -> Self {
        Self {
            gid: port.id().raw(),
            kind: port.kind(),
            label: port.label().to_owned(),
            allowed_data: port.allowed_data(),
            default: Some(port.default_value().clone()).filter(|v| !v.is_null()),
        }
    }

    fn of_output(port: &NodeOutput) -> Self {
        Self {
            gid: port.id().raw(),
            kind: port.kind(),
            label: port.label().to_owned(),
            allowed_data: port.allowed_data(),
            default: None,
        }
    }

    fn config(&self) -> PortConfig {
        PortConfig {
            label: self.label.clone(),
            kind: self.kind,
            allowed_data: self.allowed_data,
            default: self.default.clone(),
        }
    }
}

/// A node: type identifier, declarations, and custom state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub gid: u64,
    pub identifier: String,
    pub version: Option<String>,
    pub title: String,
    pub inputs: Vec<PortSnapshot>,
    pub outputs: Vec<PortSnapshot>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub state: serde_json::Value,
}

/// A connection as positions in the snapshot's node and port lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub parent_node_index: usize,
    pub output_port_index: usize,
    pub connected_node_index: usize,
    pub connected_input_port_index: usize,
}

/// A whole flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub gid: u64,
    pub title: String,
    #[serde(default)]
    pub algorithm_mode: FlowAlg,
    pub nodes: Vec<NodeSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
}

/// Every flow of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub flows: Vec<FlowSnapshot>,
}

/// JSON and MessagePack encodings for snapshot types.
pub trait SnapshotCodec: Serialize + DeserializeOwned {
    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl SnapshotCodec for FlowSnapshot {}
impl SnapshotCodec for SessionSnapshot {}

impl Flow {
    /// Describe this flow.
    pub fn snapshot(&self) -> FlowSnapshot {
        let nodes = self
            .nodes()
            .map(|node| NodeSnapshot {
                gid: node.id().raw(),
                identifier: node.type_id().to_owned(),
                version: node.version().map(str::to_owned),
                title: node.title().to_owned(),
                inputs: node.inputs().iter().map(PortSnapshot::of_input).collect(),
                outputs: node.outputs().iter().map(PortSnapshot::of_output).collect(),
                blocked: node.is_blocked(),
                state: node
                    .behavior_ref()
                    .map_or(serde_json::Value::Null, |b| b.get_state()),
            })
            .collect();

        let connections = self
            .connections()
            .into_iter()
            .filter_map(|conn| {
                let info = self.connection_info(conn)?;
                Some(ConnectionSnapshot {
                    parent_node_index: self.nodes.get_index_of(&info.out_node)?,
                    output_port_index: info.out_index,
                    connected_node_index: self.nodes.get_index_of(&info.inp_node)?,
                    connected_input_port_index: info.inp_index,
                })
            })
            .collect();

        FlowSnapshot {
            gid: self.gid(),
            title: self.title().to_owned(),
            algorithm_mode: self.algorithm_mode(),
            nodes,
            connections,
        }
    }

    /// Build a new flow from `snapshot`, drawing ids from `registry`.
    pub fn from_snapshot(snapshot: &FlowSnapshot, registry: &NodeRegistry) -> FlowResult<Flow> {
        let mut flow = Flow::in_registry(registry, snapshot.title.clone());
        flow.set_prev_id(snapshot.gid);
        flow.restore(snapshot, registry)?;
        Ok(flow)
    }

    /// Add the nodes and connections of `snapshot` to this flow.
    ///
    /// Returns the created nodes in snapshot order. Each node's snapshot id
    /// is recorded in `registry` for [`NodeRegistry::node_from_prev_id`].
    pub fn restore(&mut self, snapshot: &FlowSnapshot, registry: &NodeRegistry) -> FlowResult<Vec<NodeId>> {
        let mut created = Vec::with_capacity(snapshot.nodes.len());
        for data in &snapshot.nodes {
            let node_type = registry
                .find(&data.identifier)
                .ok_or_else(|| FlowError::UnknownNodeType(data.identifier.clone()))?;
            let inputs: Vec<PortConfig> = data.inputs.iter().map(PortSnapshot::config).collect();
            let outputs: Vec<PortConfig> = data.outputs.iter().map(PortSnapshot::config).collect();

            let mut node = node_type.instantiate_with(self.ids(), &inputs, &outputs);
            node.set_blocked(data.blocked);
            node.set_prev_id(data.gid);
            if let Some(behavior) = node.behavior_mut() {
                behavior
                    .set_state(data.state.clone(), data.version.as_deref())
                    .map_err(|e| match e {
                        NodeError::Failed(message) => FlowError::InvalidSnapshot(message),
                        NodeError::Flow(e) => e,
                    })?;
            }

            let id = node.id();
            self.events().node_created.emit(&id);
            self.add_node(node)?;
            registry.record_prev_id(data.gid, id);
            created.push(id);
        }

        let mut connections = Vec::with_capacity(snapshot.connections.len());
        for data in &snapshot.connections {
            let out_node = node_at(&created, data.parent_node_index)?;
            let inp_node = node_at(&created, data.connected_node_index)?;
            let conn: Connection = self.connect_nodes(
                out_node,
                data.output_port_index,
                inp_node,
                data.connected_input_port_index,
            )?;
            connections.push(conn);
        }

        for id in &created {
            self.invoke_rebuilt(*id);
        }
        self.set_algorithm_mode(snapshot.algorithm_mode)?;

        debug!(
            flow = %self.title(),
            nodes = created.len(),
            connections = connections.len(),
            "restored from snapshot"
        );
        self.events().nodes_created_from_data.emit(&created);
        self.events().connections_created_from_data.emit(&connections);
        Ok(created)
    }
}

fn node_at(created: &[NodeId], index: usize) -> FlowResult<NodeId> {
    created
        .get(index)
        .copied()
        .ok_or_else(|| FlowError::InvalidSnapshot(format!("node index {index} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeBehavior, NodeContext, NodeType};

    struct Counter {
        count: i64,
    }

    impl NodeBehavior for Counter {
        fn update_event(&mut self, _ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
            self.count += 1;
            Ok(())
        }

        fn get_state(&self) -> serde_json::Value {
            serde_json::json!({ "count": self.count })
        }

        fn set_state(&mut self, state: serde_json::Value, _version: Option<&str>) -> Result<(), NodeError> {
            self.count = state
                .get("count")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| NodeError::msg("missing count"))?;
            Ok(())
        }
    }

    fn registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry.register(
            NodeType::new("counter", || Counter { count: 0 })
                .prefix("test")
                .legacy_id("OldCounter")
                .input(PortConfig::data().default_value(1))
                .output(PortConfig::data().allowing(DataType::Int)),
        );
        registry
    }

    #[test]
    fn snapshot_uses_indices() {
        let registry = registry();
        let mut flow = Flow::in_registry(&registry, "main");
        let a = flow.create_node_by_id(&registry, "test.counter").unwrap();
        let b = flow.create_node_by_id(&registry, "test.counter").unwrap();
        flow.connect_nodes(a, 0, b, 0).unwrap();

        let snapshot = flow.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(
            snapshot.connections,
            vec![ConnectionSnapshot {
                parent_node_index: 0,
                output_port_index: 0,
                connected_node_index: 1,
                connected_input_port_index: 0,
            }]
        );
        assert_eq!(snapshot.nodes[0].state, serde_json::json!({ "count": 0 }));
    }

    #[test]
    fn restore_relinks_previous_ids() {
        let registry = registry();
        let mut flow = Flow::in_registry(&registry, "main");
        let a = flow.create_node_by_id(&registry, "test.counter").unwrap();
        let snapshot = flow.snapshot();

        let restored = Flow::from_snapshot(&snapshot, &registry).unwrap();
        let new_id = registry.node_from_prev_id(a.raw()).unwrap();
        assert_ne!(new_id, a);
        assert_eq!(restored.node(new_id).unwrap().prev_id(), Some(a.raw()));
        assert_eq!(restored.prev_id(), Some(flow.gid()));
    }

    #[test]
    fn legacy_identifiers_load() {
        let registry = registry();
        let json = r#"{
            "gid": 1,
            "title": "old",
            "nodes": [{
                "gid": 5,
                "identifier": "OldCounter",
                "version": null,
                "title": "Counter",
                "inputs": [],
                "outputs": [],
                "state": { "count": 4 }
            }],
            "connections": []
        }"#;
        let snapshot = FlowSnapshot::from_json(json).unwrap();
        let flow = Flow::from_snapshot(&snapshot, &registry).unwrap();
        assert_eq!(flow.node_count(), 1);
        assert_eq!(flow.snapshot().nodes[0].state, serde_json::json!({ "count": 4 }));
    }

    #[test]
    fn bad_indices_are_rejected() {
        let registry = registry();
        let mut snapshot = Flow::in_registry(&registry, "main").snapshot();
        snapshot.connections.push(ConnectionSnapshot {
            parent_node_index: 0,
            output_port_index: 0,
            connected_node_index: 3,
            connected_input_port_index: 0,
        });
        assert!(matches!(
            Flow::from_snapshot(&snapshot, &registry),
            Err(FlowError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn msgpack_codec() {
        let registry = registry();
        let mut flow = Flow::in_registry(&registry, "main");
        flow.create_node_by_id(&registry, "test.counter").unwrap();
        let snapshot = flow.snapshot();

        let bytes = snapshot.to_msgpack().unwrap();
        assert_eq!(FlowSnapshot::from_msgpack(&bytes).unwrap(), snapshot);
    }
}
