//! Session and player configuration.
//!
//! Both structs deserialize with defaults for every missing field, so a
//! partial JSON document is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of a [`FlowPlayer`](crate::player::FlowPlayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Target frame rate of the run loop.
    pub frames: u32,
    /// Sleep between state checks while paused, in milliseconds.
    pub pause_poll_ms: u64,
}

impl PlayerConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            pause_poll_ms: 10,
        }
    }
}

/// Settings of a [`Session`](crate::session::Session).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Worker threads running players in the background. `None` uses the
    /// runtime default.
    pub worker_threads: Option<usize>,
    /// Settings for every player the session creates.
    pub player: PlayerConfig,
}

impl SessionConfig {
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
