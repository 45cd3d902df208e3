//! Real-Time Player
//!
//! A graph player treats a flow as a running program. It owns a small state
//! machine:
//!
//! ```text
//! stopped -> playing <-> paused
//!    ^          |          |
//!    +----------+----------+
//! ```
//!
//! `play` is blocking: it returns when the run ends, either because nothing
//! is left to evaluate or because `stop` was requested from another thread.
//! The [`Session`](crate::session::Session) runs players on worker threads.

mod flow_player;
mod state;

pub use flow_player::FlowPlayer;
pub use state::{GraphEvents, GraphState, GraphStateEvent, GraphTime};

use crate::error::PlayerError;
use crate::graph::Flow;

/// A scheduler that evaluates a whole flow.
pub trait GraphPlayer: Send + Sync {
    /// Run the flow until it completes or is stopped. Ignored unless stopped.
    fn play(&self, flow: &mut Flow) -> Result<(), PlayerError>;

    /// Only effective while playing.
    fn pause(&self);

    /// Only effective while paused.
    fn resume(&self);

    /// Request the run to end at its next frame boundary.
    fn stop(&self);

    fn state(&self) -> GraphState;

    fn events(&self) -> &GraphEvents;

    /// Copy of the current timing information.
    fn graph_time(&self) -> GraphTime;

    /// Change the target frame rate. Only allowed while stopped.
    fn set_frames(&self, frames: u32) -> bool;
}
