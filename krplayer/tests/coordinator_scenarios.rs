//! End-to-end tests of the playback coordinator state machine, driven
//! through scripted engine and focus doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use krconfig::Config;
use krplayer::{
    EngineEvent, FocusArbiter, FocusEvent, PlaybackState, PlayerCommand, RadioCoordinator,
    RadioHandle, StreamEngine, TransportSurface,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(100);

/// Shared recorder for everything the coordinator does to its
/// collaborators, plus the injection points for their event channels.
#[derive(Default)]
struct Probe {
    engine_calls: Mutex<Vec<&'static str>>,
    prepare_fails: AtomicBool,
    engine_tx: Mutex<Option<mpsc::Sender<EngineEvent>>>,
    focus_grants: Mutex<VecDeque<bool>>,
    focus_releases: Mutex<usize>,
    focus_tx: Mutex<Option<mpsc::Sender<FocusEvent>>>,
    surface_states: Mutex<Vec<bool>>,
    surface_clears: Mutex<usize>,
}

impl Probe {
    fn engine_calls(&self) -> Vec<&'static str> {
        self.engine_calls.lock().unwrap().clone()
    }

    fn deny_next_focus(&self) {
        self.focus_grants.lock().unwrap().push_back(false);
    }

    fn send_engine(&self, ev: EngineEvent) -> bool {
        match &*self.engine_tx.lock().unwrap() {
            Some(tx) => tx.try_send(ev).is_ok(),
            None => false,
        }
    }

    fn send_focus(&self, ev: FocusEvent) -> bool {
        match &*self.focus_tx.lock().unwrap() {
            Some(tx) => tx.try_send(ev).is_ok(),
            None => false,
        }
    }
}

struct ScriptEngine(Arc<Probe>);

#[async_trait]
impl StreamEngine for ScriptEngine {
    async fn prepare(&mut self) -> krplayer::Result<()> {
        self.0.engine_calls.lock().unwrap().push("prepare");
        if self.0.prepare_fails.load(Ordering::Relaxed) {
            Err(krplayer::Error::Other("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn resume(&mut self) -> krplayer::Result<()> {
        self.0.engine_calls.lock().unwrap().push("resume");
        Ok(())
    }

    async fn pause(&mut self) -> krplayer::Result<()> {
        self.0.engine_calls.lock().unwrap().push("pause");
        Ok(())
    }

    async fn stop(&mut self) -> krplayer::Result<()> {
        self.0.engine_calls.lock().unwrap().push("stop");
        Ok(())
    }

    fn subscribe(&mut self, events: mpsc::Sender<EngineEvent>) {
        *self.0.engine_tx.lock().unwrap() = Some(events);
    }
}

struct ScriptFocus(Arc<Probe>);

impl FocusArbiter for ScriptFocus {
    fn request(&mut self) -> bool {
        // Granted unless the script queued a denial
        self.0
            .focus_grants
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true)
    }

    fn release(&mut self) {
        *self.0.focus_releases.lock().unwrap() += 1;
    }

    fn subscribe(&mut self, events: mpsc::Sender<FocusEvent>) {
        *self.0.focus_tx.lock().unwrap() = Some(events);
    }
}

struct ProbeSurface(Arc<Probe>);

impl TransportSurface for ProbeSurface {
    fn set_playing(&mut self, playing: bool) {
        self.0.surface_states.lock().unwrap().push(playing);
    }

    fn clear(&mut self) {
        *self.0.surface_clears.lock().unwrap() += 1;
    }
}

fn fast_config() -> (TempDir, Arc<Config>) {
    let dir = TempDir::new().unwrap();
    let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
    // Quick backoff so retry tests stay fast
    config.set_retry_initial_ms(20).unwrap();
    config.set_retry_max_ms(100).unwrap();
    (dir, Arc::new(config))
}

fn spawn_player(probe: &Arc<Probe>, config: Arc<Config>) -> (RadioHandle, JoinHandle<()>) {
    RadioCoordinator::spawn(
        Box::new(ScriptEngine(probe.clone())),
        Box::new(ScriptFocus(probe.clone())),
        Box::new(ProbeSurface(probe.clone())),
        config,
    )
}

/// Wait for the next published transition and return the new flag.
async fn next_state(rx: &mut watch::Receiver<PlaybackState>) -> bool {
    timeout(WAIT, rx.changed())
        .await
        .expect("timed out waiting for a state transition")
        .expect("state channel closed");
    rx.borrow_and_update().playing
}

async fn assert_no_transition(rx: &mut watch::Receiver<PlaybackState>) {
    assert!(
        timeout(SETTLE, rx.changed()).await.is_err(),
        "unexpected state transition: {:?}",
        *rx.borrow()
    );
}

#[tokio::test]
async fn test_start_pause_play_stop_publishes_expected_sequence() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, task) = spawn_player(&probe, config.clone());
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);
    assert!(config.get_last_playing());

    handle.command(PlayerCommand::Pause);
    assert!(!next_state(&mut rx).await);
    assert!(!config.get_last_playing());

    handle.command(PlayerCommand::Play);
    assert!(next_state(&mut rx).await);

    handle.command(PlayerCommand::Stop);
    assert!(!next_state(&mut rx).await);

    timeout(WAIT, task).await.unwrap().unwrap();

    assert_eq!(
        probe.engine_calls(),
        vec!["prepare", "resume", "pause", "resume", "stop"]
    );
    assert_eq!(*probe.surface_clears.lock().unwrap(), 1);
    assert_eq!(
        *probe.surface_states.lock().unwrap(),
        vec![true, false, true, false]
    );
    assert!(!handle.state().playing);
}

#[tokio::test]
async fn test_focus_denied_is_a_soft_failure() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    probe.deny_next_focus();
    let (handle, _task) = spawn_player(&probe, config.clone());
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert_no_transition(&mut rx).await;

    // Still idle: the engine was never touched, nothing persisted
    assert!(probe.engine_calls().is_empty());
    assert!(!handle.state().playing);
    assert!(!config.get_last_playing());

    // A fresh command asks the arbiter again
    handle.command(PlayerCommand::Play);
    assert!(next_state(&mut rx).await);
}

#[tokio::test]
async fn test_permanent_focus_loss_pauses_and_gain_never_resumes() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    assert!(probe.send_focus(FocusEvent::PermanentLoss));
    assert!(!next_state(&mut rx).await);
    assert_eq!(*probe.focus_releases.lock().unwrap(), 1);

    // The grant coming back must not restart audio
    assert!(probe.send_focus(FocusEvent::Gain));
    assert_no_transition(&mut rx).await;
    assert!(!handle.state().playing);
}

#[tokio::test]
async fn test_transient_focus_loss_keeps_the_claim() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    assert!(probe.send_focus(FocusEvent::TransientLoss));
    assert!(!next_state(&mut rx).await);
    assert_eq!(*probe.focus_releases.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_becoming_noisy_pauses_playback() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    assert!(probe.send_focus(FocusEvent::BecomingNoisy));
    assert!(!next_state(&mut rx).await);
    assert!(probe.engine_calls().contains(&"pause"));
}

#[tokio::test]
async fn test_engine_error_recovers_silently() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    // Mid-stream failure: observers see a transient false, then audio is
    // back, and no error ever crosses the state channel.
    assert!(probe.send_engine(EngineEvent::PlaybackError(
        "connection reset".to_string()
    )));
    assert!(!next_state(&mut rx).await);
    assert!(next_state(&mut rx).await);

    // The source was re-issued from scratch
    let calls = probe.engine_calls();
    assert_eq!(calls.iter().filter(|c| **c == "prepare").count(), 2);
}

#[tokio::test]
async fn test_play_while_playing_is_a_no_op() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    handle.command(PlayerCommand::Play);
    assert_no_transition(&mut rx).await;
    assert_eq!(probe.engine_calls(), vec!["prepare", "resume"]);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    handle.command(PlayerCommand::Stop);
    handle.command(PlayerCommand::Stop);
    assert!(!next_state(&mut rx).await);
    timeout(WAIT, task).await.unwrap().unwrap();

    // Resources released exactly once
    let calls = probe.engine_calls();
    assert_eq!(calls.iter().filter(|c| **c == "stop").count(), 1);
    assert_eq!(*probe.surface_clears.lock().unwrap(), 1);
    assert_eq!(*probe.focus_releases.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_no_callback_reaches_a_stopped_coordinator() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);
    handle.command(PlayerCommand::Stop);
    assert!(!next_state(&mut rx).await);
    timeout(WAIT, task).await.unwrap().unwrap();

    // The event channels died with the coordinator
    assert!(!probe.send_engine(EngineEvent::PlaybackError("late".to_string())));
    assert!(!probe.send_focus(FocusEvent::Gain));
    assert_eq!(probe.engine_calls().last(), Some(&"stop"));

    // Late commands are dropped too
    handle.command(PlayerCommand::Play);
    assert!(!handle.state().playing);
}

#[tokio::test]
async fn test_stop_mid_retry_aborts_the_backoff_loop() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    probe.prepare_fails.store(true, Ordering::Relaxed);
    let (handle, task) = spawn_player(&probe, config);

    handle.command(PlayerCommand::Start);

    // Let at least one silent recovery attempt happen
    tokio::time::sleep(Duration::from_millis(60)).await;
    let attempts_before = probe
        .engine_calls()
        .iter()
        .filter(|c| **c == "prepare")
        .count();
    assert!(attempts_before >= 2, "expected retries, saw {attempts_before}");

    handle.command(PlayerCommand::Stop);
    timeout(WAIT, task).await.unwrap().unwrap();

    // No further attempts once stopped
    tokio::time::sleep(Duration::from_millis(200)).await;
    let attempts_after = probe
        .engine_calls()
        .iter()
        .filter(|c| **c == "prepare")
        .count();
    assert_eq!(attempts_before, attempts_after);
    assert!(!handle.state().playing);
}

#[tokio::test]
async fn test_initial_state_reflects_the_persisted_flag() {
    let (_dir, config) = fast_config();
    config.set_last_playing(true).unwrap();

    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);

    // Readable before any command, straight from the durable store
    assert!(handle.state().playing);
}

#[tokio::test]
async fn test_first_transition_after_restart_is_published() {
    // The process stopped while playing, so the store says true; the
    // first real start must still reach every observer even though it
    // lands on the same value the channel was seeded with.
    let (_dir, config) = fast_config();
    config.set_last_playing(true).unwrap();

    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config.clone());
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);

    assert_eq!(*probe.surface_states.lock().unwrap(), vec![true]);
    assert!(config.get_last_playing());
}

#[tokio::test]
async fn test_engine_error_while_paused_does_not_resume() {
    let (_dir, config) = fast_config();
    let probe = Arc::new(Probe::default());
    let (handle, _task) = spawn_player(&probe, config);
    let mut rx = handle.subscribe();

    handle.command(PlayerCommand::Start);
    assert!(next_state(&mut rx).await);
    handle.command(PlayerCommand::Pause);
    assert!(!next_state(&mut rx).await);

    // A stream error while paused only drops the source; audio must not
    // restart until an explicit Play.
    assert!(probe.send_engine(EngineEvent::PlaybackError("drop".to_string())));
    assert_no_transition(&mut rx).await;

    handle.command(PlayerCommand::Play);
    assert!(next_state(&mut rx).await);
    // The source was prepared again after being dropped
    let calls = probe.engine_calls();
    assert_eq!(calls.iter().filter(|c| **c == "prepare").count(), 2);
}
