//! Rivulet Core
//!
//! This crate provides a dataflow graph execution engine. It implements:
//!
//! - Prioritized event channels with one-off subscribers
//! - Typed nodes and ports, a node-type registry, and flows connecting them
//! - Interchangeable execution strategies (manual, push, topologically
//!   ordered push, exec-triggered pull)
//! - A frame-based player that runs a whole flow as a program
//! - A session coordinating many flows on a worker pool
//! - JSON and MessagePack snapshots of flows and sessions
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `event`: Event channels
//! - `graph`: Values, ports, nodes, the registry, flows and snapshots
//! - `executor`: Strategies deciding what a write or read triggers
//! - `player`: The real-time player and its state machine
//! - `session`: Flow ownership and asynchronous playback actions
//!
//! # Example
//!
//! ```rust,ignore
//! use rivulet_core::executor::FlowAlg;
//! use rivulet_core::graph::{Flow, NodeType, PortConfig};
//!
//! let source = NodeType::new("source", || Source).output(PortConfig::data());
//! let double = NodeType::new("double", || Double)
//!     .input(PortConfig::data())
//!     .output(PortConfig::data());
//!
//! let mut flow = Flow::new("demo");
//! flow.set_algorithm_mode(FlowAlg::DataOpt)?;
//! let a = flow.create_node(&source)?;
//! let b = flow.create_node(&double)?;
//! flow.connect_nodes(a, 0, b, 0)?;
//!
//! // Writing the source output updates `double` once.
//! flow.update_node(a, None)?;
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod player;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{PlayerConfig, SessionConfig};
pub use error::{EventError, FlowError, FlowResult, NodeError, PlayerError, SessionError};
pub use executor::{FlowAlg, FlowExecutor};
pub use graph::{Flow, NodeBehavior, NodeContext, NodeId, NodeRegistry, NodeType, PortConfig, Value};
pub use player::{FlowPlayer, GraphPlayer, GraphState};
pub use session::{GraphActionResponse, PlayMode, Session};
