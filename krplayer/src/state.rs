//! Published playback state

use serde::{Deserialize, Serialize};

/// The value published on the coordinator's state channel.
///
/// `playing` is `true` only while audio is actually audible: it drops to
/// `false` on pause, stop, focus loss, and during the silent recovery
/// window that follows a stream error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub playing: bool,
}

impl PlaybackState {
    pub fn new(playing: bool) -> Self {
        Self { playing }
    }

    /// Human-readable label for controller surfaces.
    pub fn as_str(&self) -> &'static str {
        if self.playing { "PLAYING" } else { "PAUSED" }
    }
}
