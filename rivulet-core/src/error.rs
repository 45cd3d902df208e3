//! Error types.
//!
//! Structural rejections are ordinary values callers branch on; they are
//! never turned into panics.

use thiserror::Error;

use crate::graph::{ConnValidity, NodeId, PortId};

/// Errors raised by graph and executor operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("{0} is not part of this flow")]
    NodeNotFound(NodeId),

    #[error("{0} is not part of this flow")]
    PortNotFound(PortId),

    #[error("{node} has no input at index {index}")]
    InputIndex { node: NodeId, index: usize },

    #[error("{node} has no output at index {index}")]
    OutputIndex { node: NodeId, index: usize },

    #[error("{0} is already part of this flow")]
    DuplicateNode(NodeId),

    #[error("connection rejected: {0}")]
    Rejected(ConnValidity),

    #[error("no node type registered as '{0}'")]
    UnknownNodeType(String),

    #[error("{0} is the wrong kind of port for this operation")]
    WrongPortKind(PortId),

    #[error("output {index} of {node} does not accept a {found} value")]
    OutputType {
        node: NodeId,
        index: usize,
        found: crate::graph::DataType,
    },

    #[error("{0} was updated while its own update is still running")]
    Reentrant(NodeId),

    #[error("cycle detected at {0}")]
    CycleDetected(NodeId),

    #[error("topology is locked while a propagation run is in progress")]
    TopologyLocked,

    #[error("update of {node} failed: {message}")]
    NodeFailed { node: NodeId, message: String },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Errors returned by node code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// The node's own computation failed.
    #[error("{0}")]
    Failed(String),

    /// A nested flow call failed; already reported where it originated.
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl NodeError {
    /// Shorthand for [`NodeError::Failed`].
    pub fn msg(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }
}

/// Errors from subscribing to an [`Event`](crate::event::Event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("priority {0} is outside -5..=10")]
    PriorityOutOfRange(i8),

    #[error("callback is already subscribed")]
    AlreadySubscribed,
}

/// Errors escaping a player's run loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Errors from session management.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no flow titled '{0}'")]
    FlowNotFound(String),

    #[error("a flow titled '{0}' already exists")]
    FlowExists(String),

    #[error("flow titles must not be empty")]
    InvalidTitle,

    #[error("flow '{0}' is playing")]
    FlowBusy(String),

    #[error("failed to build worker pool: {0}")]
    Io(#[from] std::io::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Result alias for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
