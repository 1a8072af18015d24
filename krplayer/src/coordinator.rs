//! Playback coordinator
//!
//! One long-lived task owning exactly one [`StreamEngine`], one
//! [`FocusArbiter`] claim, and one [`TransportSurface`]. Controller
//! commands, engine events, and focus events all funnel into a single
//! `select!` loop, so no two transitions ever race on the engine or the
//! focus claim.
//!
//! State machine: `Idle` → `Playing` ⇄ `Paused`, with `Stopped` terminal.
//! Playback is audible only while the focus grant is held; a denied grant
//! is a soft failure and stream errors are recovered silently with a
//! capped exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use krplayer::{HttpStreamEngine, LogSurface, PlayerCommand, RadioCoordinator, StandaloneFocus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = krconfig::get_config();
//!     let engine = HttpStreamEngine::new(config.get_stream_url()?);
//!     let surface = LogSurface::new(config.get_station_name(), config.get_live_text());
//!
//!     let (handle, task) = RadioCoordinator::spawn(
//!         Box::new(engine),
//!         Box::new(StandaloneFocus::new()),
//!         Box::new(surface),
//!         config,
//!     );
//!
//!     handle.command(PlayerCommand::Start);
//!     // ... later
//!     handle.command(PlayerCommand::Stop);
//!     task.await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use krconfig::Config;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::PlayerCommand;
use crate::engine::StreamEngine;
use crate::events::{EngineEvent, FocusEvent};
use crate::focus::FocusArbiter;
use crate::session::TransportSurface;
use crate::state::PlaybackState;

const COMMAND_CHANNEL_SIZE: usize = 16;
const EVENT_CHANNEL_SIZE: usize = 32;

/// Silent-recovery backoff for stream errors.
///
/// The delay for attempt `n` is `initial * factor^n`, capped at `max`.
/// The counter resets as soon as playback resumes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: u64,
    pub max: Duration,
}

impl RetryPolicy {
    /// Build the policy from the `playback.retry` configuration section.
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial: Duration::from_millis(config.get_retry_initial_ms()),
            factor: config.get_retry_factor().max(1),
            max: Duration::from_millis(config.get_retry_max_ms()),
        }
    }

    /// Delay to wait before retry attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mult = self.factor.saturating_pow(attempt);
        let ms = (self.initial.as_millis() as u64).saturating_mul(mult);
        Duration::from_millis(ms.min(self.max.as_millis() as u64))
    }
}

/// Internal coordinator state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

/// Clonable public contract of the coordinator.
///
/// Commands are fire-and-forget; state is observed through the watch
/// channel, never polled under a lock. Before the coordinator publishes
/// anything, [`state`](RadioHandle::state) reflects the flag persisted in
/// the configuration store (or `false` if none).
#[derive(Clone)]
pub struct RadioHandle {
    cmd_tx: mpsc::Sender<PlayerCommand>,
    state_rx: watch::Receiver<PlaybackState>,
}

impl RadioHandle {
    /// Send a command to the coordinator. No-op once it has stopped.
    pub fn command(&self, cmd: PlayerCommand) {
        if self.cmd_tx.try_send(cmd).is_err() {
            debug!(?cmd, "Command dropped: coordinator not running");
        }
    }

    /// Last published playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    /// Live state channel for observers.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }
}

/// The playback coordinator task.
///
/// Exactly one instance exists per process while playback is live; it
/// exclusively owns the engine, the focus claim, and the transport
/// surface. See the module documentation for the state table.
pub struct RadioCoordinator {
    engine: Box<dyn StreamEngine>,
    focus: Box<dyn FocusArbiter>,
    surface: Box<dyn TransportSurface>,
    config: Arc<Config>,
    retry: RetryPolicy,

    state: RunState,
    has_focus: bool,
    prepared: bool,
    retry_attempt: u32,
    retry_at: Option<Instant>,
    // What this coordinator actually published, as opposed to the
    // persisted seed the watch channel starts from.
    last_published: Option<bool>,

    published: watch::Sender<PlaybackState>,
    cmd_rx: mpsc::Receiver<PlayerCommand>,
    engine_rx: mpsc::Receiver<EngineEvent>,
    focus_rx: mpsc::Receiver<FocusEvent>,
}

impl RadioCoordinator {
    /// Wire up the channels and spawn the coordinator task.
    ///
    /// The engine and the arbiter get their event channels registered
    /// here, before the task starts, so no event can be lost.
    pub fn spawn(
        mut engine: Box<dyn StreamEngine>,
        mut focus: Box<dyn FocusArbiter>,
        surface: Box<dyn TransportSurface>,
        config: Arc<Config>,
    ) -> (RadioHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (engine_tx, engine_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (focus_tx, focus_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        engine.subscribe(engine_tx);
        focus.subscribe(focus_tx);

        // Seed observers with the last persisted flag: a controller started
        // later renders the last-known label without waiting for an event.
        let initial = PlaybackState::new(config.get_last_playing());
        let (published, state_rx) = watch::channel(initial);

        let retry = RetryPolicy::from_config(&config);
        let coordinator = Self {
            engine,
            focus,
            surface,
            config,
            retry,
            state: RunState::Idle,
            has_focus: false,
            prepared: false,
            retry_attempt: 0,
            retry_at: None,
            last_published: None,
            published,
            cmd_rx,
            engine_rx,
            focus_rx,
        };

        let task = tokio::spawn(coordinator.run());
        (RadioHandle { cmd_tx, state_rx }, task)
    }

    async fn run(mut self) {
        debug!("Playback coordinator started");
        while self.state != RunState::Stopped {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Every controller handle is gone: same as STOP.
                    None => self.shutdown().await,
                },
                Some(ev) = self.engine_rx.recv() => self.handle_engine_event(ev).await,
                Some(ev) = self.focus_rx.recv() => self.handle_focus_event(ev).await,
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)),
                    if retry_at.is_some() =>
                {
                    self.attempt_recovery().await;
                }
            }
        }
        debug!("Playback coordinator terminated");
    }

    async fn handle_command(&mut self, cmd: PlayerCommand) {
        debug!(?cmd, state = ?self.state, "Handling command");
        match (cmd, self.state) {
            (PlayerCommand::Stop, _) => self.shutdown().await,
            (PlayerCommand::Start | PlayerCommand::Play, RunState::Idle | RunState::Paused) => {
                self.begin_playback().await;
            }
            // Play while playing, pause while not playing: no-ops.
            (PlayerCommand::Start | PlayerCommand::Play, _) => {}
            (PlayerCommand::Pause, RunState::Playing) => self.pause_playback(true).await,
            (PlayerCommand::Pause, _) => {}
        }
    }

    /// Acquire focus and start (or resume) the engine.
    async fn begin_playback(&mut self) {
        if !self.focus.request() {
            // Soft failure: remain in the current state, no retry. The
            // request must come again from a new command.
            info!(state = ?self.state, "Audio focus denied");
            return;
        }
        self.has_focus = true;
        self.state = RunState::Playing;

        match self.ensure_streaming().await {
            Ok(()) => {
                self.clear_retry();
                self.publish(true);
            }
            Err(err) => {
                // Stream trouble is never surfaced as an error state.
                warn!(%err, "Engine failed to start, scheduling silent recovery");
                self.prepared = false;
                self.publish(false);
                self.schedule_retry();
            }
        }
    }

    /// Prepare the source if needed, then request audible output.
    async fn ensure_streaming(&mut self) -> crate::error::Result<()> {
        if !self.prepared {
            self.engine.prepare().await?;
            self.prepared = true;
        }
        self.engine.resume().await
    }

    async fn pause_playback(&mut self, release_focus: bool) {
        self.clear_retry();
        if let Err(err) = self.engine.pause().await {
            warn!(%err, "Engine pause failed");
        }
        if release_focus {
            self.focus.release();
            self.has_focus = false;
        }
        self.state = RunState::Paused;
        self.publish(false);
    }

    /// Terminal teardown. Idempotent: a second call is a no-op.
    async fn shutdown(&mut self) {
        if self.state == RunState::Stopped {
            return;
        }
        info!("Stopping playback coordinator");
        self.clear_retry();
        if let Err(err) = self.engine.stop().await {
            warn!(%err, "Engine stop failed");
        }
        if self.has_focus {
            self.focus.release();
            self.has_focus = false;
        }
        self.publish(false);
        self.surface.clear();
        self.state = RunState::Stopped;
    }

    async fn handle_engine_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::Started => {
                if self.state == RunState::Playing {
                    self.clear_retry();
                    self.publish(true);
                }
            }
            EngineEvent::Stopped => {
                debug!("Engine reported stop");
            }
            EngineEvent::PlaybackError(msg) => {
                self.prepared = false;
                if self.state == RunState::Playing {
                    // Diagnostics only: recovery is silent and automatic.
                    warn!(error = %msg, "Stream error, scheduling silent recovery");
                    self.publish(false);
                    self.schedule_retry();
                } else {
                    debug!(error = %msg, "Stream error while not playing, source dropped");
                }
            }
        }
    }

    async fn handle_focus_event(&mut self, ev: FocusEvent) {
        match (ev, self.state) {
            // Short interruption or the route turned noisy: pause but keep
            // the claim.
            (FocusEvent::TransientLoss | FocusEvent::BecomingNoisy, RunState::Playing) => {
                info!(?ev, "Pausing playback");
                self.pause_playback(false).await;
            }
            (FocusEvent::PermanentLoss, RunState::Playing) => {
                info!("Permanent focus loss, pausing playback");
                self.pause_playback(true).await;
            }
            (FocusEvent::PermanentLoss, _) => {
                if self.has_focus {
                    self.focus.release();
                    self.has_focus = false;
                }
            }
            (FocusEvent::Gain, _) => {
                // Never steal the output back: the user must issue Play.
                debug!("Focus regained, waiting for an explicit Play");
            }
            _ => {}
        }
    }

    /// Fired by the backoff timer: re-issue the source and resume.
    async fn attempt_recovery(&mut self) {
        self.retry_at = None;
        if self.state != RunState::Playing {
            return;
        }
        let attempt = self.retry_attempt;
        debug!(attempt, "Attempting stream recovery");
        match self.ensure_streaming().await {
            Ok(()) => {
                info!(attempt, "Stream recovered");
                self.clear_retry();
                self.publish(true);
            }
            Err(err) => {
                self.retry_attempt = self.retry_attempt.saturating_add(1);
                let delay = self.retry.delay(self.retry_attempt);
                debug!(%err, attempt = self.retry_attempt, ?delay, "Recovery failed, backing off");
                self.prepared = false;
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry.delay(self.retry_attempt);
        self.retry_at = Some(Instant::now() + delay);
    }

    fn clear_retry(&mut self) {
        self.retry_at = None;
        self.retry_attempt = 0;
    }

    /// Publish `playing` to every observer: the watch channel, the durable
    /// configuration flag, and the transport surface. Unchanged values are
    /// not re-published; the comparison is against what this coordinator
    /// published, not against the persisted seed, so the first transition
    /// after a restart always goes out even when it matches the seed.
    fn publish(&mut self, playing: bool) {
        if self.last_published == Some(playing) {
            return;
        }
        self.last_published = Some(playing);
        self.published.send_modify(|state| state.playing = playing);
        if let Err(err) = self.config.set_last_playing(playing) {
            warn!(%err, "Failed to persist playback state");
        }
        self.surface.set_playing(playing);
        debug!(playing, "Published playback state");
    }
}
