//! Integration Tests for Flows and Executors
//!
//! These tests drive flows only through the public API.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rivulet_core::executor::{FlowAlg, FlowExecutor};
use rivulet_core::graph::{
    ConnValidity, NodeBehavior, NodeContext, NodeId, NodeRegistry, NodeType, PortConfig,
    SnapshotCodec, Value,
};
use rivulet_core::{Flow, FlowError, NodeError};

use common::{adder, calls, output_of, recorder, source};

/// A source connected to a recorder updates the recorder exactly once.
#[test]
fn push_reaches_downstream_once() {
    let seen = calls();
    let mut flow = Flow::new("push");
    let x = flow.create_node(&source("Hello")).unwrap();
    let y = flow.create_node(&recorder(&seen)).unwrap();
    flow.connect_nodes(x, 0, y, 0).unwrap();

    flow.update_node(x, None).unwrap();

    assert_eq!(*seen.lock(), vec![(y, Some(0), Value::from("Hello"))]);
    assert_eq!(flow.input(y, 0).unwrap(), Value::from("Hello"));
}

/// Unconnected inputs read their default.
#[test]
fn unconnected_input_reads_default() {
    let seen = calls();
    let mut flow = Flow::new("defaults");
    let y = flow.create_node(&recorder(&seen)).unwrap();

    flow.update_node(y, None).unwrap();
    assert_eq!(*seen.lock(), vec![(y, None, Value::from("d"))]);
}

/// Connecting two ports of one node is rejected and changes nothing.
#[test]
fn same_node_connection_is_rejected() {
    let mut flow = Flow::new("same");
    let node = flow.create_node(&adder(1)).unwrap();
    let out = flow.output_port(node, 0).unwrap();
    let inp = flow.input_port(node, 0).unwrap();

    let err = flow.connect_ports(out, inp).unwrap_err();
    assert_eq!(err, FlowError::Rejected(ConnValidity::SameNode));
    assert!(flow.connections().is_empty());
    assert!(flow.successors(node).is_empty());
    assert!(flow.connected_inputs(out).is_empty());
    assert_eq!(flow.connected_output(inp), None);
}

#[test]
fn input_takes_a_single_connection() {
    let mut flow = Flow::new("fan-in");
    let a = flow.create_node(&source(1)).unwrap();
    let b = flow.create_node(&source(2)).unwrap();
    let sink = flow.create_node(&adder(1)).unwrap();
    flow.connect_nodes(a, 0, sink, 0).unwrap();

    let err = flow.connect_nodes(b, 0, sink, 0).unwrap_err();
    assert_eq!(err, FlowError::Rejected(ConnValidity::InputAlreadyTaken));

    flow.disconnect_nodes(a, 0, sink, 0).unwrap();
    assert_eq!(
        flow.disconnect_nodes(a, 0, sink, 0).unwrap_err(),
        FlowError::Rejected(ConnValidity::AlreadyDisconnected)
    );
    flow.connect_nodes(b, 0, sink, 0).unwrap();
}

type Order = Arc<Mutex<Vec<(NodeId, Option<usize>)>>>;

struct Trigger;

impl NodeBehavior for Trigger {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
        ctx.exec_output(0)
    }
}

struct Producer(Order);

impl NodeBehavior for Producer {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError> {
        self.0.lock().push((ctx.id(), inp));
        ctx.set_output(0, 42)
    }
}

struct Consumer(Order, Arc<Mutex<Option<Value>>>);

impl NodeBehavior for Consumer {
    fn update_event(&mut self, ctx: &mut NodeContext<'_>, inp: Option<usize>) -> Result<(), NodeError> {
        let value = ctx.input(1)?;
        self.0.lock().push((ctx.id(), inp));
        *self.1.lock() = Some(value);
        Ok(())
    }
}

/// In exec mode the producer runs (untriggered) before the consumer's body
/// finishes reading its data input.
#[test]
fn exec_trigger_pulls_producer_first() {
    let order: Order = Arc::default();
    let pulled = Arc::new(Mutex::new(None));

    let mut flow = Flow::new("exec");
    flow.set_algorithm_mode(FlowAlg::Exec).unwrap();

    let trigger = flow
        .create_node(&NodeType::new("trigger", || Trigger).output(PortConfig::exec()))
        .unwrap();
    let o = order.clone();
    let producer = flow
        .create_node(&NodeType::new("producer", move || Producer(o.clone())).output(PortConfig::data()))
        .unwrap();
    let (o, p) = (order.clone(), pulled.clone());
    let consumer = flow
        .create_node(
            &NodeType::new("consumer", move || Consumer(o.clone(), p.clone()))
                .input(PortConfig::exec())
                .input(PortConfig::data()),
        )
        .unwrap();
    flow.connect_nodes(trigger, 0, consumer, 0).unwrap();
    flow.connect_nodes(producer, 0, consumer, 1).unwrap();

    flow.exec_output(trigger, 0).unwrap();

    assert_eq!(*order.lock(), vec![(producer, None), (consumer, Some(0))]);
    assert_eq!(*pulled.lock(), Some(Value::Int(42)));
}

/// Build `a -> {b, c} -> d` with adders and run it under `alg`.
fn diamond(alg: FlowAlg) -> (Flow, [NodeId; 4]) {
    let mut flow = Flow::new(alg.as_str());
    flow.set_algorithm_mode(alg).unwrap();
    let a = flow.create_node(&source(5)).unwrap();
    let b = flow.create_node(&adder(1)).unwrap();
    let c = flow.create_node(&adder(1)).unwrap();
    let d = flow.create_node(&adder(2)).unwrap();
    flow.connect_nodes(a, 0, b, 0).unwrap();
    flow.connect_nodes(a, 0, c, 0).unwrap();
    flow.connect_nodes(b, 0, d, 0).unwrap();
    flow.connect_nodes(c, 0, d, 1).unwrap();
    flow.update_node(a, None).unwrap();
    (flow, [a, b, c, d])
}

#[test]
fn naive_and_optimized_agree_on_diamond() {
    let (naive, n) = diamond(FlowAlg::Data);
    let (opt, o) = diamond(FlowAlg::DataOpt);
    for (x, y) in n.iter().zip(o.iter()) {
        assert_eq!(output_of(&naive, *x, 0), output_of(&opt, *y, 0));
    }
    assert_eq!(output_of(&opt, o[3], 0), Value::Int(10));
}

#[test]
fn switching_algorithm_mode_replaces_executor() {
    let mut flow = Flow::new("modes");
    assert_eq!(flow.algorithm_mode(), FlowAlg::Data);

    let changes = Arc::new(Mutex::new(Vec::new()));
    let c = changes.clone();
    flow.events()
        .algorithm_mode_changed
        .connect(move |mode| c.lock().push(*mode));

    flow.set_algorithm_mode(FlowAlg::Exec).unwrap();
    assert_eq!(flow.executor().algorithm(), FlowAlg::Exec);
    assert_eq!(*changes.lock(), vec![FlowAlg::Exec]);
}

#[test]
fn failing_node_surfaces_as_error() {
    struct Broken;
    impl NodeBehavior for Broken {
        fn update_event(&mut self, _ctx: &mut NodeContext<'_>, _inp: Option<usize>) -> Result<(), NodeError> {
            Err(NodeError::msg("boom"))
        }
    }

    let mut flow = Flow::new("faults");
    let node = flow.create_node(&NodeType::new("broken", || Broken)).unwrap();
    let failures = Arc::new(Mutex::new(0));
    let f = failures.clone();
    flow.events().node_update_failed.connect(move |_| *f.lock() += 1);

    let err = flow.update_node(node, None).unwrap_err();
    assert_eq!(
        err,
        FlowError::NodeFailed {
            node,
            message: "boom".to_owned()
        }
    );
    assert_eq!(*failures.lock(), 1);
}

#[test]
fn snapshot_restores_nodes_and_connections() {
    let registry = NodeRegistry::new();
    registry.register(source(3));
    registry.register(adder(1));

    let mut flow = Flow::in_registry(&registry, "saved");
    flow.set_algorithm_mode(FlowAlg::DataOpt).unwrap();
    let a = flow.create_node_by_id(&registry, "it.source").unwrap();
    let b = flow.create_node_by_id(&registry, "it.add").unwrap();
    flow.connect_nodes(a, 0, b, 0).unwrap();

    let json = flow.snapshot().to_json().unwrap();
    let snapshot = rivulet_core::graph::FlowSnapshot::from_json(&json).unwrap();
    let bytes = snapshot.to_msgpack().unwrap();
    let snapshot = rivulet_core::graph::FlowSnapshot::from_msgpack(&bytes).unwrap();

    let mut restored = Flow::from_snapshot(&snapshot, &registry).unwrap();
    assert_eq!(restored.title(), "saved");
    assert_eq!(restored.algorithm_mode(), FlowAlg::DataOpt);
    assert_eq!(restored.node_count(), 2);
    assert_eq!(restored.connections().len(), 1);

    let ids = restored.node_ids();
    restored.update_node(ids[0], None).unwrap();
    assert_eq!(output_of(&restored, ids[1], 0), Value::Int(3));
}

#[test]
fn unknown_node_type_fails_restore() {
    let registry = NodeRegistry::new();
    registry.register(source(3));
    let mut flow = Flow::in_registry(&registry, "saved");
    flow.create_node_by_id(&registry, "it.source").unwrap();
    let snapshot = flow.snapshot();

    let empty = NodeRegistry::new();
    assert_eq!(
        Flow::from_snapshot(&snapshot, &empty).unwrap_err(),
        FlowError::UnknownNodeType("it.source".to_owned())
    );
}
