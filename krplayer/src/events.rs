//! Event types consumed by the coordinator's serialized loop
//!
//! Engine and focus notifications are plain enums delivered over `mpsc`
//! channels, not listener interfaces: the coordinator owns the receiving
//! side of both channels and processes events one at a time, in arrival
//! order, interleaved with controller commands.

/// Notifications pushed by a [`StreamEngine`] implementation.
///
/// [`StreamEngine`]: crate::engine::StreamEngine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Audible playback actually started (first decoded audio flowing
    /// after a prepare/resume).
    Started,
    /// The engine stopped delivering audio on its own accord.
    Stopped,
    /// A mid-stream failure (network drop, decode failure). Recoverable:
    /// the coordinator re-issues the source and resumes silently.
    PlaybackError(String),
}

/// Notifications pushed by a [`FocusArbiter`] implementation.
///
/// [`FocusArbiter`]: crate::focus::FocusArbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    /// Another producer took the output for a short interruption.
    TransientLoss,
    /// The grant is gone for good; the claim must be released.
    PermanentLoss,
    /// The arbiter handed the output back. The coordinator never
    /// auto-resumes on this: the user must issue a fresh `Play`.
    Gain,
    /// The audio route is about to become noisy (e.g. wired output
    /// disappeared); playback pauses exactly like a transient loss.
    BecomingNoisy,
}
