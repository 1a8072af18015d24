//! Inbound command contract of the playback coordinator

/// Commands accepted by the playback coordinator.
///
/// Commands are fire-and-forget and idempotent with respect to the
/// coordinator's state table: `Play` while already playing and `Stop`
/// after the coordinator stopped are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    /// Begin playback of the configured stream. Equivalent to [`Play`]
    /// once a source has been prepared.
    ///
    /// [`Play`]: PlayerCommand::Play
    Start,
    /// Resume (or begin) audible playback.
    Play,
    /// Suspend audible playback without releasing the stream source.
    Pause,
    /// Release every resource and end the coordinator's lifecycle.
    Stop,
}

impl PlayerCommand {
    /// Parse a controller-surface action string.
    ///
    /// Returns `None` for anything that is not one of the four actions.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" => Some(PlayerCommand::Start),
            "play" => Some(PlayerCommand::Play),
            "pause" => Some(PlayerCommand::Pause),
            "stop" | "quit" | "exit" => Some(PlayerCommand::Stop),
            _ => None,
        }
    }
}
