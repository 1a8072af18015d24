//! # krplayer - Playback core for KioskRadio
//!
//! This crate implements the playback coordinator of KioskRadio: a single
//! long-lived task that owns one stream engine, one audio-focus claim, and
//! one transport surface, and that serializes every command and callback
//! through one event loop.
//!
//! # Architecture
//!
//! ```text
//!                commands (mpsc)
//! Controller ───────────────────────┐
//!                                   ▼
//!                          ┌─────────────────┐      EngineEvent
//!                          │ RadioCoordinator│ ◄──────────────── StreamEngine
//!                          │  (one task)     │      FocusEvent
//!                          │                 │ ◄──────────────── FocusArbiter
//!                          └─────────────────┘
//!                                   │
//!                state (watch) ─────┼───── persisted flag (krconfig)
//!                                   │
//!                                   └───── TransportSurface
//! ```
//!
//! The coordinator is the only writer of the engine and the focus claim;
//! observers read state through the watch channel or the persisted flag,
//! never under a lock.
//!
//! # Example
//!
//! ```no_run
//! use krplayer::{HttpStreamEngine, LogSurface, PlayerCommand, RadioCoordinator, StandaloneFocus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = krconfig::get_config();
//!
//!     let (handle, task) = RadioCoordinator::spawn(
//!         Box::new(HttpStreamEngine::new(config.get_stream_url()?)),
//!         Box::new(StandaloneFocus::new()),
//!         Box::new(LogSurface::new(
//!             config.get_station_name(),
//!             config.get_live_text(),
//!         )),
//!         config,
//!     );
//!
//!     handle.command(PlayerCommand::Start);
//!     tokio::signal::ctrl_c().await?;
//!     handle.command(PlayerCommand::Stop);
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod focus;
pub mod http_engine;
pub mod session;
pub mod state;

pub use command::PlayerCommand;
pub use coordinator::{RadioCoordinator, RadioHandle, RetryPolicy};
pub use engine::StreamEngine;
pub use error::{Error, Result};
pub use events::{EngineEvent, FocusEvent};
pub use focus::{FocusArbiter, StandaloneFocus};
pub use http_engine::HttpStreamEngine;
pub use session::{LogSurface, TransportSurface};
pub use state::PlaybackState;
