//! Transport surface seam
//!
//! Whatever keeps the player user-visible while audio is active (a media
//! session, a persistent notification) only ever needs the published
//! playing/paused flag. The coordinator mirrors every state change into
//! this seam and clears it on teardown.

/// Outward mirror of the coordinator's transport state.
pub trait TransportSurface: Send {
    /// Reflect the latest published state.
    fn set_playing(&mut self, playing: bool);

    /// Tear the surface down; called exactly once, on stop.
    fn clear(&mut self);
}

/// Transport surface backed by structured logs.
///
/// Headless deployments have no system notification area; operators watch
/// the logs instead, so the station name and live text from the
/// configuration are carried on every transition.
#[derive(Debug)]
pub struct LogSurface {
    station: String,
    live_text: String,
}

impl LogSurface {
    pub fn new(station: String, live_text: String) -> Self {
        Self { station, live_text }
    }
}

impl TransportSurface for LogSurface {
    fn set_playing(&mut self, playing: bool) {
        if playing {
            tracing::info!(station = %self.station, "▶ {}", self.live_text);
        } else {
            tracing::info!(station = %self.station, "⏸ paused");
        }
    }

    fn clear(&mut self) {
        tracing::info!(station = %self.station, "Transport surface cleared");
    }
}
