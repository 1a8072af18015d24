use krplayer::{
    HttpStreamEngine, LogSurface, PlayerCommand, RadioCoordinator, StandaloneFocus,
};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ========== PHASE 1 : Configuration & logging ==========

    let config = krconfig::get_config();

    let default_level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "INFO".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("📻 KioskRadio v{}", env!("CARGO_PKG_VERSION"));
    info!(
        station = %config.get_station_name(),
        "Last known state: {}",
        if config.get_last_playing() { "PLAYING" } else { "PAUSED" }
    );

    // ========== PHASE 2 : Playback coordinator ==========

    let engine = HttpStreamEngine::new(config.get_stream_url()?);
    let surface = LogSurface::new(config.get_station_name(), config.get_live_text());

    let (handle, task) = RadioCoordinator::spawn(
        Box::new(engine),
        Box::new(StandaloneFocus::new()),
        Box::new(surface),
        config,
    );

    // Echo every published state for whoever watches the console
    let mut state_rx = handle.subscribe();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!("🔊 State: {}", state.as_str());
        }
    });

    info!("▶ Starting playback...");
    handle.command(PlayerCommand::Start);

    // ========== PHASE 3 : Controller surface ==========

    info!("Commands: play | pause | stop (Ctrl+C stops too)");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                handle.command(PlayerCommand::Stop);
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match PlayerCommand::parse(trimmed) {
                        Some(cmd) => {
                            handle.command(cmd);
                            if cmd == PlayerCommand::Stop {
                                break;
                            }
                        }
                        None => warn!(input = %trimmed, "Unknown command"),
                    }
                }
                // stdin is gone (daemonized): wait for a signal
                Ok(None) | Err(_) => {
                    shutdown_signal().await;
                    info!("Shutdown signal received");
                    handle.command(PlayerCommand::Stop);
                    break;
                }
            },
        }
    }

    task.await?;
    info!("✅ KioskRadio stopped");
    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
