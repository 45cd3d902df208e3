//! Node ports and connection validity.
//!
//! A port belongs to exactly one node for its whole life. Inputs carry a
//! default used while unconnected; outputs remember the last value written
//! through them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::value::{is_assignable, DataType, Value};

/// Unique identifier for a port.
///
/// Port ids come from the same allocator as node ids and stay stable while a
/// node is removed from and re-added to a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(u64);

impl PortId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for PortId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Whether a port receives or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    /// Receives from at most one output.
    Input,
    /// Feeds zero or more inputs.
    Output,
}

/// What a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Values.
    #[default]
    Data,
    /// Trigger signals without payload.
    Exec,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Data => f.write_str("data"),
            PortKind::Exec => f.write_str("exec"),
        }
    }
}

/// Declaration used to create a port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Display label.
    pub label: String,
    /// Data or exec.
    pub kind: PortKind,
    /// Declared type; `None` accepts anything.
    pub allowed_data: Option<DataType>,
    /// Default for inputs while unconnected. Ignored for outputs.
    pub default: Option<Value>,
}

impl PortConfig {
    /// An open data port.
    pub fn data() -> Self {
        Self::default()
    }

    /// An exec port.
    pub fn exec() -> Self {
        Self {
            kind: PortKind::Exec,
            ..Self::default()
        }
    }

    /// Set the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Restrict accepted data.
    pub fn allowing(mut self, data_type: DataType) -> Self {
        self.allowed_data = Some(data_type);
        self
    }

    /// Set the unconnected default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// An input port.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub(crate) id: PortId,
    pub(crate) node: NodeId,
    pub(crate) kind: PortKind,
    pub(crate) label: String,
    pub(crate) allowed_data: Option<DataType>,
    pub(crate) default: Value,
}

impl NodeInput {
    pub(crate) fn new(id: PortId, node: NodeId, config: &PortConfig) -> Self {
        Self {
            id,
            node,
            kind: config.kind,
            label: config.label.clone(),
            allowed_data: config.allowed_data,
            default: config.default.clone().unwrap_or_default(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allowed_data(&self) -> Option<DataType> {
        self.allowed_data
    }

    /// Value returned while the input is unconnected.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub(crate) fn info(&self) -> PortInfo {
        PortInfo {
            id: self.id,
            node: self.node,
            role: PortRole::Input,
            kind: self.kind,
            allowed_data: self.allowed_data,
        }
    }
}

/// An output port.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub(crate) id: PortId,
    pub(crate) node: NodeId,
    pub(crate) kind: PortKind,
    pub(crate) label: String,
    pub(crate) allowed_data: Option<DataType>,
    pub(crate) value: Value,
}

impl NodeOutput {
    pub(crate) fn new(id: PortId, node: NodeId, config: &PortConfig) -> Self {
        Self {
            id,
            node,
            kind: config.kind,
            label: config.label.clone(),
            allowed_data: config.allowed_data,
            value: Value::Null,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allowed_data(&self) -> Option<DataType> {
        self.allowed_data
    }

    /// The last value written through this output.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn info(&self) -> PortInfo {
        PortInfo {
            id: self.id,
            node: self.node,
            role: PortRole::Output,
            kind: self.kind,
            allowed_data: self.allowed_data,
        }
    }
}

/// The structural facts about a port that connection checks need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub id: PortId,
    pub node: NodeId,
    pub role: PortRole,
    pub kind: PortKind,
    pub allowed_data: Option<DataType>,
}

/// Outcome of a connection validity check.
///
/// Checks run in a fixed order and stop at the first violation; callers show
/// the first reason found, so the order is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnValidity {
    Valid,
    /// Both ports belong to the same node.
    SameNode,
    /// Both ports are inputs, or both are outputs.
    SameIoRole,
    /// The port passed as the output is an input.
    IoRoleMismatch,
    /// Data port paired with an exec port.
    KindMismatch,
    /// The output's declared type doesn't fit the input's.
    TypeMismatch,
    /// The pair is already connected.
    AlreadyConnected,
    /// The input already receives from another output.
    InputAlreadyTaken,
    /// The pair is not connected.
    AlreadyDisconnected,
}

impl ConnValidity {
    pub fn is_valid(self) -> bool {
        self == ConnValidity::Valid
    }
}

impl fmt::Display for ConnValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnValidity::Valid => "connection is valid",
            ConnValidity::SameNode => "ports belong to the same node",
            ConnValidity::SameIoRole => "ports are both inputs or both outputs",
            ConnValidity::IoRoleMismatch => "the first port must be an output",
            ConnValidity::KindMismatch => "cannot connect a data port to an exec port",
            ConnValidity::TypeMismatch => "output type is not assignable to input type",
            ConnValidity::AlreadyConnected => "ports are already connected",
            ConnValidity::InputAlreadyTaken => "input is connected to another output",
            ConnValidity::AlreadyDisconnected => "ports are not connected",
        };
        f.write_str(text)
    }
}

/// Structural validity of connecting `out` to `inp`.
///
/// Doesn't look at existing connections; [`Flow`](super::Flow) layers the
/// `AlreadyConnected` and `InputAlreadyTaken` checks on top.
pub fn check_validity(out: &PortInfo, inp: &PortInfo) -> ConnValidity {
    if out.node == inp.node {
        return ConnValidity::SameNode;
    }
    if out.role == inp.role {
        return ConnValidity::SameIoRole;
    }
    if out.role != PortRole::Output {
        return ConnValidity::IoRoleMismatch;
    }
    if out.kind != inp.kind {
        return ConnValidity::KindMismatch;
    }
    if !is_assignable(out.allowed_data, inp.allowed_data) {
        return ConnValidity::TypeMismatch;
    }
    ConnValidity::Valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: u64, node: u64, role: PortRole, kind: PortKind, ty: Option<DataType>) -> PortInfo {
        PortInfo {
            id: PortId::from(id),
            node: NodeId::from(node),
            role,
            kind,
            allowed_data: ty,
        }
    }

    #[test]
    fn same_node_wins_over_everything() {
        let a = port(1, 7, PortRole::Input, PortKind::Exec, None);
        let b = port(2, 7, PortRole::Input, PortKind::Data, Some(DataType::Int));
        assert_eq!(check_validity(&a, &b), ConnValidity::SameNode);
    }

    #[test]
    fn role_checks_come_before_kind() {
        let a = port(1, 1, PortRole::Output, PortKind::Exec, None);
        let b = port(2, 2, PortRole::Output, PortKind::Data, None);
        assert_eq!(check_validity(&a, &b), ConnValidity::SameIoRole);

        let inp = port(3, 1, PortRole::Input, PortKind::Exec, None);
        let out = port(4, 2, PortRole::Output, PortKind::Data, None);
        assert_eq!(check_validity(&inp, &out), ConnValidity::IoRoleMismatch);
    }

    #[test]
    fn kind_then_type() {
        let out = port(1, 1, PortRole::Output, PortKind::Exec, Some(DataType::Text));
        let inp = port(2, 2, PortRole::Input, PortKind::Data, Some(DataType::Int));
        assert_eq!(check_validity(&out, &inp), ConnValidity::KindMismatch);

        let out = port(1, 1, PortRole::Output, PortKind::Data, Some(DataType::Text));
        assert_eq!(check_validity(&out, &inp), ConnValidity::TypeMismatch);

        let out = port(1, 1, PortRole::Output, PortKind::Data, Some(DataType::Int));
        assert_eq!(check_validity(&out, &inp), ConnValidity::Valid);
    }

    #[test]
    fn port_config_builder() {
        let config = PortConfig::data()
            .label("amount")
            .allowing(DataType::Number)
            .default_value(1.5);
        assert_eq!(config.kind, PortKind::Data);
        assert_eq!(config.label, "amount");
        assert_eq!(config.default, Some(Value::Float(1.5)));
        assert_eq!(PortConfig::exec().kind, PortKind::Exec);
    }
}
