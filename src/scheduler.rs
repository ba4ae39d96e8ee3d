//! Periodic restart timer
//!
//! Arming the timer schedules: wait `delay`, warn the players, wait
//! `warning`, then `restart`. Cancelling is idempotent and may happen at any
//! point before the restart request is sent. Arming again replaces the
//! previous timer.

use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::supervisor::state_machine::State;
use crate::supervisor::ServerHandle;

#[derive(Debug, Default)]
pub struct RestartTimer {
    armed: Option<(CancellationToken, JoinHandle<()>)>,
}

impl RestartTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, server: ServerHandle, delay: Duration, warning: Duration) {
        self.cancel();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled.cancelled() => return,
            }
            if server.state() != State::Running {
                tracing::info!("Scheduled restart skipped, server is {:?}", server.state());
                return;
            }

            tracing::info!("Server restarting in {:?}", warning);
            let notice = json!([{
                "text": format!("Restarting in {} seconds", warning.as_secs()),
                "color": "red",
            }]);
            if let Err(e) = server.tell_raw("@a", notice).await {
                tracing::warn!("Could not announce restart: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(warning) => {}
                _ = cancelled.cancelled() => {
                    tracing::info!("Scheduled restart cancelled during warning period");
                    return;
                }
            }
            match server.restart().await {
                Ok(()) => tracing::info!("Scheduled restart complete"),
                Err(e) => tracing::error!("Scheduled restart failed: {}", e),
            }
        });
        self.armed = Some((token, task));
    }

    /// Returns true if a pending timer was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((token, task)) if !task.is_finished() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|(token, task)| !token.is_cancelled() && !task.is_finished())
    }
}

impl Drop for RestartTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
