//! Batched push propagation.
//!
//! # Algorithm
//!
//! A run starts when a node is updated (or written to) while no run is in
//! progress; that node is the run's trigger.
//!
//! 1. Look up the plan for the trigger, building it if needed:
//!    - BFS over successors collects every node reachable from the trigger
//!    - count each reachable node's fan-in edges from inside that set
//!    - Kahn's algorithm turns the set into a topological order; nodes left
//!      over mean a cycle and the run is refused
//! 2. Run the trigger. Writes made during the run don't update targets right
//!    away; they only mark the target input as activated.
//! 3. Walk the plan order. A node with activated inputs runs once per
//!    activated input, in ascending input order; its own writes activate
//!    nodes further down the order.
//!
//! Because inputs are activated as a set, each edge fires at most once per
//! run, and every node runs after all of its reachable predecessors.
//!
//! Plans are cached per trigger and dropped together on the first run after
//! any topology change. A connection made mid-run only takes effect on the
//! next run; port and node mutations are refused while a run is in progress.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{FlowAlg, FlowExecutor};
use crate::error::{FlowError, FlowResult};
use crate::graph::{Connection, Flow, NodeId, Value};

/// Topological order of everything reachable from one trigger.
#[derive(Debug)]
struct Plan {
    order: Vec<NodeId>,
    position: HashMap<NodeId, usize>,
}

impl Plan {
    fn build(flow: &Flow, trigger: NodeId) -> FlowResult<Plan> {
        let mut reachable = IndexSet::new();
        let mut queue = VecDeque::new();
        reachable.insert(trigger);
        queue.push_back(trigger);
        while let Some(node) = queue.pop_front() {
            for &next in flow.successors(node) {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        // Fan-in, one count per edge.
        let mut in_degree: HashMap<NodeId, usize> = reachable.iter().map(|n| (*n, 0)).collect();
        for node in &reachable {
            for next in flow.successors(*node) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree += 1;
                }
            }
        }

        // Kahn's algorithm
        let mut order = Vec::with_capacity(reachable.len());
        let mut ready = VecDeque::new();
        if in_degree.get(&trigger) == Some(&0) {
            ready.push_back(trigger);
        }
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for next in flow.successors(node) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }

        if order.len() < reachable.len() {
            let stuck = reachable
                .iter()
                .find(|n| in_degree.get(n).is_some_and(|d| *d > 0))
                .copied()
                .unwrap_or(trigger);
            return Err(FlowError::CycleDetected(stuck));
        }

        let position = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        Ok(Plan { order, position })
    }
}

/// State of the run in progress.
#[derive(Debug)]
struct Run {
    plan: Arc<Plan>,
    /// Position in `plan.order` of the node running now.
    cursor: usize,
    activated: HashMap<NodeId, BTreeSet<usize>>,
}

impl Run {
    fn is_pending(&self, node: NodeId) -> bool {
        self.plan
            .position
            .get(&node)
            .is_some_and(|pos| *pos > self.cursor)
    }
}

/// Ends the run when dropped, including on error paths.
struct RunGuard<'a> {
    executor: &'a DataFlowOptimized,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.executor.run.lock() = None;
    }
}

/// Push propagation where each edge fires at most once per run.
///
/// Final port values match [`DataFlowNaive`](super::DataFlowNaive) on acyclic
/// graphs; intermediate nodes may run fewer times.
#[derive(Debug)]
pub struct DataFlowOptimized {
    plans: Mutex<HashMap<NodeId, Arc<Plan>>>,
    dirty: AtomicBool,
    run: Mutex<Option<Run>>,
    plans_built: AtomicU64,
}

impl DataFlowOptimized {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            run: Mutex::new(None),
            plans_built: AtomicU64::new(0),
        }
    }

    /// Number of plans computed so far.
    pub fn plans_built(&self) -> u64 {
        self.plans_built.load(Ordering::Relaxed)
    }

    /// Number of cached plans.
    pub fn cached_plans(&self) -> usize {
        self.plans.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    fn plan_for(&self, flow: &Flow, trigger: NodeId) -> FlowResult<Arc<Plan>> {
        let mut plans = self.plans.lock();
        if self.dirty.swap(false, Ordering::AcqRel) {
            trace!("topology changed, dropping cached plans");
            plans.clear();
        }
        if let Some(plan) = plans.get(&trigger) {
            return Ok(Arc::clone(plan));
        }

        let plan = Arc::new(Plan::build(flow, trigger)?);
        debug!(trigger = %trigger, nodes = plan.order.len(), "built propagation plan");
        self.plans_built.fetch_add(1, Ordering::Relaxed);
        plans.insert(trigger, Arc::clone(&plan));
        Ok(plan)
    }

    fn begin(&self, flow: &Flow, trigger: NodeId) -> FlowResult<RunGuard<'_>> {
        let plan = self.plan_for(flow, trigger)?;
        *self.run.lock() = Some(Run {
            plan,
            cursor: 0,
            activated: HashMap::new(),
        });
        Ok(RunGuard { executor: self })
    }

    /// Record activations; targets outside the pending part of the plan are
    /// updated right away.
    fn activate(&self, flow: &mut Flow, targets: Vec<(NodeId, usize)>) -> FlowResult<()> {
        let mut immediate = Vec::new();
        {
            let mut run = self.run.lock();
            match run.as_mut() {
                Some(run) => {
                    for (node, inp) in targets {
                        if run.is_pending(node) {
                            run.activated.entry(node).or_default().insert(inp);
                        } else {
                            immediate.push((node, inp));
                        }
                    }
                }
                None => immediate = targets,
            }
        }
        for (node, inp) in immediate {
            flow.update_node(node, Some(inp))?;
        }
        Ok(())
    }

    /// Walk the rest of the plan.
    fn drain(&self, flow: &mut Flow) -> FlowResult<()> {
        loop {
            let (node, inputs) = {
                let mut run = self.run.lock();
                let Some(run) = run.as_mut() else {
                    return Ok(());
                };
                run.cursor += 1;
                let Some(node) = run.plan.order.get(run.cursor).copied() else {
                    return Ok(());
                };
                (node, run.activated.remove(&node))
            };
            for inp in inputs.into_iter().flatten() {
                flow.update_node(node, Some(inp))?;
            }
        }
    }

    fn propagate(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        let targets = flow.output_targets(node, index)?;
        if self.is_running() {
            return self.activate(flow, targets);
        }
        let _run = self.begin(flow, node)?;
        self.activate(flow, targets)?;
        self.drain(flow)
    }
}

impl Default for DataFlowOptimized {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowExecutor for DataFlowOptimized {
    fn algorithm(&self) -> FlowAlg {
        FlowAlg::DataOpt
    }

    fn update_node(&self, flow: &mut Flow, node: NodeId, inp: Option<usize>) -> FlowResult<()> {
        if self.is_running() {
            return flow.invoke_update(node, inp);
        }
        let _run = self.begin(flow, node)?;
        flow.invoke_update(node, inp)?;
        self.drain(flow)
    }

    fn input(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<Value> {
        flow.read_input_value(node, index)
    }

    fn set_output(&self, flow: &mut Flow, node: NodeId, index: usize, value: Value) -> FlowResult<()> {
        flow.store_output_value(node, index, value)?;
        self.propagate(flow, node, index)
    }

    fn exec_output(&self, flow: &mut Flow, node: NodeId, index: usize) -> FlowResult<()> {
        self.propagate(flow, node, index)
    }

    fn connection_added(&self, _conn: Connection) {
        self.dirty.store(true, Ordering::Release);
    }

    fn connection_removed(&self, _conn: Connection) {
        self.dirty.store(true, Ordering::Release);
    }

    fn flow_changed(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn topology_locked(&self) -> bool {
        self.is_running()
    }
}
