//! Execution Strategies
//!
//! A [`FlowExecutor`] decides when a node's computation runs and what reading
//! an input or writing an output triggers. Every [`Flow`] holds exactly one.
//!
//! # Strategies
//!
//! | [`FlowAlg`] | Executor | Behavior |
//! |---|---|---|
//! | `Manual` | [`ManualFlow`] | raw reads and writes; records which ports changed for an external driver |
//! | `Data` | [`DataFlowNaive`] | a write immediately updates every connected node |
//! | `DataOpt` | [`DataFlowOptimized`] | like `Data`, but each edge fires at most once per run, in topological order |
//! | `Exec` | [`ExecFlow`] | exec outputs trigger nodes; reading a data input pulls the producer first |
//!
//! The flow clones the executor's `Arc` out before calling into it, so an
//! executor is free to call back into the flow (and from there into node code)
//! without holding any borrow of it.

mod exec;
mod manual;
mod naive;
mod optimized;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FlowResult;
use crate::graph::{Connection, Flow, NodeId, Value};

pub use exec::ExecFlow;
pub use manual::ManualFlow;
pub use naive::DataFlowNaive;
pub use optimized::DataFlowOptimized;

/// The strategy contract.
///
/// `update_node`, `input`, `set_output` and `exec_output` are entered through
/// the matching [`Flow`] methods, which validate indices and port kinds first.
pub trait FlowExecutor: Send + Sync {
    fn algorithm(&self) -> FlowAlg;

    /// Run the node's computation for input `inp` (`None`: no data).
    fn update_node(&self, flow: &mut Flow, node: NodeId, inp: Option<usize>) -> FlowResult<()>;

    /// Resolve the value of input `index`.
    fn input(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<Value>;

    /// Store `value` on data output `index` and propagate it.
    fn set_output(&self, flow: &mut Flow, node: NodeId, index: usize, value: Value) -> FlowResult<()>;

    /// Fire exec output `index`.
    fn exec_output(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()>;

    fn connection_added(&self, _conn: Connection) {}

    fn connection_removed(&self, _conn: Connection) {}

    /// Any other structural change: nodes or ports added or removed.
    fn flow_changed(&self) {}

    /// While `true`, the flow refuses port and node mutations.
    fn topology_locked(&self) -> bool {
        false
    }
}

/// Names of the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowAlg {
    #[serde(rename = "manual")]
    Manual,
    #[default]
    #[serde(rename = "data", alias = "data flow")]
    Data,
    #[serde(rename = "data opt")]
    DataOpt,
    #[serde(rename = "exec", alias = "exec flow")]
    Exec,
}

impl FlowAlg {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowAlg::Manual => "manual",
            FlowAlg::Data => "data",
            FlowAlg::DataOpt => "data opt",
            FlowAlg::Exec => "exec",
        }
    }
}

impl fmt::Display for FlowAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown algorithm mode '{0}'")]
pub struct ParseFlowAlgError(pub String);

impl FromStr for FlowAlg {
    type Err = ParseFlowAlgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(FlowAlg::Manual),
            "data" | "data flow" => Ok(FlowAlg::Data),
            "data opt" | "data flow opt" => Ok(FlowAlg::DataOpt),
            "exec" | "exec flow" => Ok(FlowAlg::Exec),
            _ => Err(ParseFlowAlgError(s.to_owned())),
        }
    }
}

/// A fresh executor for `alg`.
pub fn for_algorithm(alg: FlowAlg) -> Arc<dyn FlowExecutor> {
    match alg {
        FlowAlg::Manual => Arc::new(ManualFlow::new()),
        FlowAlg::Data => Arc::new(DataFlowNaive::new()),
        FlowAlg::DataOpt => Arc::new(DataFlowOptimized::new()),
        FlowAlg::Exec => Arc::new(ExecFlow::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_and_legacy_names() {
        assert_eq!("data".parse::<FlowAlg>(), Ok(FlowAlg::Data));
        assert_eq!("Data Flow".parse::<FlowAlg>(), Ok(FlowAlg::Data));
        assert_eq!(" data opt ".parse::<FlowAlg>(), Ok(FlowAlg::DataOpt));
        assert_eq!("exec flow".parse::<FlowAlg>(), Ok(FlowAlg::Exec));
        assert_eq!("manual".parse::<FlowAlg>(), Ok(FlowAlg::Manual));
        assert!("push".parse::<FlowAlg>().is_err());
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&FlowAlg::DataOpt).unwrap(), "\"data opt\"");
        let legacy: FlowAlg = serde_json::from_str("\"exec flow\"").unwrap();
        assert_eq!(legacy, FlowAlg::Exec);
    }

    #[test]
    fn factory_matches_mode() {
        for alg in [FlowAlg::Manual, FlowAlg::Data, FlowAlg::DataOpt, FlowAlg::Exec] {
            assert_eq!(for_algorithm(alg).algorithm(), alg);
        }
    }
}
