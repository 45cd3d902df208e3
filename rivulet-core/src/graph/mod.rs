//! Graph Model
//!
//! This module implements the dataflow graph: nodes, their ports, and the
//! connections between them.
//!
//! # Overview
//!
//! - A [`Node`] is a computational vertex with ordered input and output ports
//! - A port is either `data` (carries a [`Value`]) or `exec` (carries a trigger)
//! - A [`Connection`] joins exactly one output to exactly one input
//! - A [`Flow`] owns nodes and connections plus the active executor
//!
//! An output may feed any number of inputs; an input receives from at most
//! one output. Self-loops, mixed kinds and unassignable declared types are
//! rejected with a [`ConnValidity`] reason.
//!
//! Node variants are described by [`NodeType`]s kept in a [`NodeRegistry`],
//! which also owns the [`IdAllocator`] everything built from it draws ids from.

mod context;
mod flow;
mod node;
mod port;
mod registry;
mod snapshot;
mod value;

pub use context::NodeContext;
pub use flow::{Connection, ConnectionInfo, Flow, FlowEvents};
pub use node::{Node, NodeBehavior, NodeEvents, NodeFault, NodeId, NodeKind, ProgressState};
pub use port::{
    check_validity, ConnValidity, NodeInput, NodeOutput, PortConfig, PortId, PortInfo, PortKind,
    PortRole,
};
pub use registry::{IdAllocator, NodeFactory, NodeRegistry, NodeType, RegistryEvents};
pub use snapshot::{
    ConnectionSnapshot, FlowSnapshot, NodeSnapshot, PortSnapshot, SessionSnapshot, SnapshotCodec,
};
pub use value::{is_assignable, DataType, Value};
