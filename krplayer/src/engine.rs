//! Stream engine seam
//!
//! The engine owns everything the coordinator does not want to know about:
//! transport, decoding, and the output device. The coordinator drives it
//! through four operations and hears back through [`EngineEvent`]s on the
//! channel registered at wiring time.
//!
//! [`EngineEvent`]: crate::events::EngineEvent

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::EngineEvent;

/// Playback engine for a single fixed stream source.
///
/// All operations are idempotent: preparing an already prepared engine
/// re-issues the source, pausing a paused engine is a no-op, and `stop`
/// may be called any number of times.
#[async_trait]
pub trait StreamEngine: Send {
    /// (Re-)issue the configured source: connect and stand ready to
    /// deliver audio. Does not start audible output by itself.
    async fn prepare(&mut self) -> Result<()>;

    /// Begin or resume audible output. Requires a prepared source.
    async fn resume(&mut self) -> Result<()>;

    /// Suspend audible output without releasing the source.
    async fn pause(&mut self) -> Result<()>;

    /// Release the source, the output device, and every internal task.
    async fn stop(&mut self) -> Result<()>;

    /// Register the channel on which engine events are delivered.
    fn subscribe(&mut self, events: mpsc::Sender<EngineEvent>);
}
