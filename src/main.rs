use std::path::PathBuf;
use std::time::Duration;

use mc_runner::config::{ServerConfig, DEFAULT_CONFIG_PATH};
use mc_runner::scheduler::RestartTimer;
use mc_runner::{EventKind, ServerHandle, State, Supervisor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Events worth a line in the daemon log; raw console output is only
/// logged when `debug = true`.
const LOGGED_EVENTS: &[EventKind] = &[
    EventKind::VersionDetected,
    EventKind::Authenticated,
    EventKind::Joined,
    EventKind::Left,
    EventKind::Message,
    EventKind::Killed,
    EventKind::Banned,
    EventKind::Unbanned,
    EventKind::Opped,
    EventKind::Deopped,
    EventKind::Stopping,
    EventKind::Stopped,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MC_RUNNER_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let cfg = ServerConfig::load(&config_path)?;
    tracing::info!("Loaded config from {}", config_path.display());

    let mut supervisor = Supervisor::new(cfg.launch_spec(), cfg.supervisor_options());
    for kind in LOGGED_EVENTS {
        supervisor.subscribe(*kind, |event, _| {
            tracing::info!("{}", serde_json::to_string(event)?);
            Ok(())
        });
    }

    let (started_tx, started_rx) = mpsc::unbounded_channel();
    supervisor.subscribe(EventKind::Started, move |_, _| {
        let _ = started_tx.send(());
        Ok(())
    });

    let server = supervisor.spawn();

    if let Some(delay) = cfg.restart_delay() {
        tokio::spawn(auto_restart(server.clone(), started_rx, delay, cfg.restart_warning()));
    }
    tokio::spawn(forward_console(server.clone()));

    match server.start().await {
        Ok(()) => tracing::info!("Started without errors"),
        Err(e) => tracing::error!("Start error: {} ({})", e, e.error_code()),
    }

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received, stopping server...");
    server.stop().await;
    tracing::info!("Server stopped, exiting");
    Ok(())
}

/// Re-arm the restart timer every time the server reports it is ready.
async fn auto_restart(
    server: ServerHandle,
    mut started: mpsc::UnboundedReceiver<()>,
    delay: Duration,
    warning: Duration,
) {
    let mut timer = RestartTimer::new();
    while started.recv().await.is_some() {
        tracing::info!("Next restart in {:?}", delay);
        timer.schedule(server.clone(), delay, warning);
    }
}

/// Pass lines typed into the daemon's terminal to the server console.
async fn forward_console(server: ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if server.state() != State::Running {
            tracing::warn!("Game is not running now.");
            continue;
        }
        if let Err(e) = server.send([line]).await {
            tracing::warn!("Console command failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_runner::GameEvent;

    #[test]
    fn logged_events_serialize_with_their_kind() {
        let event = GameEvent::Stopped { exit_code: Some(0) };
        assert!(LOGGED_EVENTS.contains(&event.kind()));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"stopped","exit_code":0}"#);
    }
}
