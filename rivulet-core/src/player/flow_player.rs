//! The default frame-paced player.
//!
//! # Run loop
//!
//! 1. Swap in a [`ManualFlow`] executor so propagation is driven here.
//! 2. Reset every node. Outputs written during reset are the initial data.
//! 3. Run one BFS wave seeded at the root nodes (no input connected, at
//!    least one output connected).
//! 4. Without frame nodes the run ends here. Otherwise, per frame: run each
//!    unfinished frame node's frame hook, run a BFS wave seeded at the
//!    successors of frame nodes that wrote outputs, and sleep for the rest of
//!    the frame. Once every frame node is finished the loop keeps pacing
//!    empty frames until stopped.
//!
//! A BFS wave updates every node of the current wave once per input carrying
//! unconsumed data, then moves on to the successors of the nodes that ran.
//!
//! Pause and stop are cooperative: the loop looks at them once per frame,
//! before the frame starts, and a wave looks at the stop flag between steps.
//! A node computation that never returns can't be interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::state::{GraphEvents, GraphState, GraphTime};
use super::GraphPlayer;
use crate::config::PlayerConfig;
use crate::error::{FlowResult, PlayerError};
use crate::executor::{FlowExecutor, ManualFlow};
use crate::graph::{Flow, Node, NodeId};

/// Frame-paced evaluator of a flow.
#[derive(Debug)]
pub struct FlowPlayer {
    state: Mutex<GraphState>,
    stop_flag: AtomicBool,
    time: Mutex<GraphTime>,
    events: GraphEvents,
    executor: Arc<ManualFlow>,
    pause_poll: Duration,
}

/// Runs the stop transition when a run ends, however it ends.
struct StopGuard<'a> {
    player: &'a FlowPlayer,
    flow: &'a mut Flow,
    previous: Option<Arc<dyn FlowExecutor>>,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.player.finish(self.flow, self.previous.take());
    }
}

impl FlowPlayer {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            state: Mutex::new(GraphState::Stopped),
            stop_flag: AtomicBool::new(false),
            time: Mutex::new(GraphTime::new(config.frames)),
            events: GraphEvents::default(),
            executor: Arc::new(ManualFlow::new()),
            pause_poll: config.pause_poll(),
        }
    }

    /// A player targeting `frames` per second.
    pub fn with_frames(frames: u32) -> Self {
        Self::new(&PlayerConfig {
            frames,
            ..PlayerConfig::default()
        })
    }

    /// Shortcut for `graph_time().delta_time()`.
    pub fn delta_time(&self) -> Duration {
        self.time.lock().delta_time()
    }

    fn enter_playing(&self) -> bool {
        let mut state = self.state.lock();
        if *state != GraphState::Stopped {
            return false;
        }
        *state = GraphState::Playing;
        true
    }

    fn run(&self, flow: &mut Flow) -> FlowResult<()> {
        self.executor.clear_updates();

        let nodes = flow.node_ids();
        let roots: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|n| !flow.any_input_connected(*n) && flow.any_output_connected(*n))
            .collect();
        let has_frame_nodes = flow.nodes().any(Node::is_frame_node);
        debug!(
            flow = %flow.title(),
            nodes = nodes.len(),
            roots = roots.len(),
            "gathered nodes"
        );

        for node in &nodes {
            flow.invoke_reset(*node)?;
        }
        self.propagate(flow, roots)?;

        if !has_frame_nodes {
            return Ok(());
        }

        let mut successors = IndexSet::new();
        loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            if *self.state.lock() == GraphState::Paused {
                thread::sleep(self.pause_poll);
                continue;
            }

            let frame_dur = {
                let mut time = self.time.lock();
                time.begin_frame();
                time.frame_dur()
            };
            let start = Instant::now();

            // Finished frame nodes are skipped; the loop still runs until stopped.
            let frame_nodes: Vec<NodeId> = flow
                .nodes()
                .filter(|n| n.is_frame_node() && !n.is_finished())
                .map(Node::id)
                .collect();
            successors.clear();
            for node in frame_nodes {
                let produced = flow.invoke_frame_update(node)?;
                if produced || self.executor.has_updated_outputs(flow, node) {
                    successors.extend(flow.successors(node).iter().copied());
                }
            }
            self.propagate(flow, successors.drain(..).collect())?;

            let elapsed = start.elapsed();
            if elapsed < frame_dur {
                thread::sleep(frame_dur - elapsed);
            }
            self.time.lock().set_delta_time(start.elapsed());
        }
        Ok(())
    }

    /// BFS wave seeded at `wave`.
    ///
    /// A node passes the wave on to its successors only if it ran. Seeds,
    /// which may have written during `reset`, also pass it on if an output
    /// carries data. A stop request ends the wave between two steps; the
    /// seeds themselves always run.
    fn propagate(&self, flow: &mut Flow, mut wave: Vec<NodeId>) -> FlowResult<()> {
        let mut next = IndexSet::new();
        let mut seeds = true;
        while !wave.is_empty() {
            if !seeds && self.stop_flag.load(Ordering::Acquire) {
                debug!(flow = %flow.title(), "wave abandoned, stop requested");
                break;
            }
            for node in &wave {
                let inputs = flow.node(*node).map(Node::input_ids).unwrap_or_default();
                let mut ran = false;
                for (index, port) in inputs.into_iter().enumerate() {
                    if self.executor.take_input_update(port) {
                        flow.update_node(*node, Some(index))?;
                        ran = true;
                    }
                }
                if ran || (seeds && self.executor.has_updated_outputs(flow, *node)) {
                    next.extend(flow.successors(*node).iter().copied());
                }
            }
            seeds = false;
            wave = next.drain(..).collect();
        }
        self.executor.clear_updates();
        Ok(())
    }

    /// The transition into `Stopped`; runs once per run.
    fn finish(&self, flow: &mut Flow, previous: Option<Arc<dyn FlowExecutor>>) {
        let old = {
            let mut state = self.state.lock();
            if *state == GraphState::Stopped {
                return;
            }
            std::mem::replace(&mut *state, GraphState::Stopped)
        };

        // Skip node hooks while unwinding so a second panic can't abort.
        if !thread::panicking() {
            for node in flow.node_ids() {
                flow.invoke_stop(node);
            }
        }
        if let Some(previous) = previous {
            if let Err(e) = flow.set_executor(previous, true) {
                warn!(flow = %flow.title(), error = %e, "failed to restore executor");
            }
        }
        self.executor.clear_updates();

        self.events.transition(old, GraphState::Stopped);
        let frames = {
            let mut time = self.time.lock();
            let frames = time.frame_count();
            time.reset();
            frames
        };
        info!(flow = %flow.title(), frames, "player stopped");
    }
}

impl Default for FlowPlayer {
    fn default() -> Self {
        Self::new(&PlayerConfig::default())
    }
}

impl GraphPlayer for FlowPlayer {
    fn play(&self, flow: &mut Flow) -> Result<(), PlayerError> {
        if !self.enter_playing() {
            debug!(flow = %flow.title(), "play ignored, player is not stopped");
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::Release);
        info!(flow = %flow.title(), "player started");
        self.events.transition(GraphState::Stopped, GraphState::Playing);

        let manual: Arc<dyn FlowExecutor> = self.executor.clone();
        let swapped = flow.set_executor(manual, true);
        let mut guard = StopGuard {
            player: self,
            flow,
            previous: None,
        };
        let result = match swapped {
            Ok(previous) => {
                guard.previous = Some(previous);
                self.run(guard.flow)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(flow = %guard.flow.title(), error = %e, "player run failed");
        }
        drop(guard);
        result.map_err(PlayerError::from)
    }

    fn pause(&self) {
        {
            let mut state = self.state.lock();
            if *state != GraphState::Playing {
                return;
            }
            *state = GraphState::Paused;
        }
        debug!("player paused");
        self.events.transition(GraphState::Playing, GraphState::Paused);
    }

    fn resume(&self) {
        {
            let mut state = self.state.lock();
            if *state != GraphState::Paused {
                return;
            }
            *state = GraphState::Playing;
        }
        debug!("player resumed");
        self.events.transition(GraphState::Paused, GraphState::Playing);
    }

    fn stop(&self) {
        if *self.state.lock() != GraphState::Stopped {
            self.stop_flag.store(true, Ordering::Release);
        }
    }

    fn state(&self) -> GraphState {
        *self.state.lock()
    }

    fn events(&self) -> &GraphEvents {
        &self.events
    }

    fn graph_time(&self) -> GraphTime {
        self.time.lock().clone()
    }

    fn set_frames(&self, frames: u32) -> bool {
        if frames == 0 || self.state() != GraphState::Stopped {
            return false;
        }
        self.time.lock().set_frames(frames);
        true
    }
}
