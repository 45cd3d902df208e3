//! Player state machine, its events, and frame timing.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// State of a graph player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    /// Initial and terminal state of every run.
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphState::Stopped => f.write_str("stopped"),
            GraphState::Playing => f.write_str("playing"),
            GraphState::Paused => f.write_str("paused"),
        }
    }
}

/// A state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStateEvent {
    pub old: GraphState,
    pub new: GraphState,
}

impl fmt::Display for GraphStateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.old, self.new)
    }
}

/// Transition notifications of a player.
///
/// On every transition `state_changed` fires first, then the event named
/// after the new state.
#[derive(Debug, Default)]
pub struct GraphEvents {
    pub state_changed: Event<GraphStateEvent>,
    pub on_play: Event<()>,
    pub on_pause: Event<()>,
    pub on_stop: Event<()>,
}

impl GraphEvents {
    /// The event fired on entering `state`.
    pub fn event(&self, state: GraphState) -> &Event<()> {
        match state {
            GraphState::Playing => &self.on_play,
            GraphState::Paused => &self.on_pause,
            GraphState::Stopped => &self.on_stop,
        }
    }

    /// Lookup by name: `"play"`, `"pause"` or `"stop"`.
    pub fn event_by_name(&self, name: &str) -> Option<&Event<()>> {
        match name {
            "play" => Some(&self.on_play),
            "pause" => Some(&self.on_pause),
            "stop" => Some(&self.on_stop),
            _ => None,
        }
    }

    pub(crate) fn transition(&self, old: GraphState, new: GraphState) {
        self.state_changed.emit(&GraphStateEvent { old, new });
        self.event(new).emit(&());
    }
}

/// Frame and time accounting of a player.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTime {
    frames: u32,
    frame_count: u64,
    time: Duration,
    delta_time: Duration,
}

impl GraphTime {
    pub fn new(frames: u32) -> Self {
        Self {
            frames: frames.max(1),
            frame_count: 0,
            time: Duration::ZERO,
            delta_time: Duration::ZERO,
        }
    }

    /// Target frame rate.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Frames started since the run began.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Time since the run began.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Duration of the last frame.
    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// Target duration of one frame.
    pub fn frame_dur(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frames))
    }

    pub fn avg_fps(&self) -> f64 {
        let secs = self.time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.frame_count as f64 / secs
    }

    pub fn current_fps(&self) -> f64 {
        let secs = self.delta_time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        1.0 / secs
    }

    pub(crate) fn set_frames(&mut self, frames: u32) {
        self.frames = frames.max(1);
    }

    pub(crate) fn begin_frame(&mut self) {
        self.frame_count += 1;
    }

    pub(crate) fn set_delta_time(&mut self, delta: Duration) {
        self.delta_time = delta;
        self.time += delta;
    }

    /// Zero the counters; the target rate is kept.
    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.time = Duration::ZERO;
        self.delta_time = Duration::ZERO;
    }
}

impl Default for GraphTime {
    fn default() -> Self {
        Self::new(30)
    }
}
