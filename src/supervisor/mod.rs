//! Process supervisor
//!
//! One tokio task owns everything mutable about a server instance: the child
//! process handle, the lifecycle state, the roster and the event bus. Helper
//! tasks (see `process`) and `ServerHandle`s talk to it over channels, so the
//! state is never shared and needs no locks.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! `start`, `stop` and `restart` resolve exactly once through a oneshot.

pub mod command;
pub mod error;
pub mod process;
pub mod roster;
pub mod state_machine;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, EventKind, GameEvent, Listener};
use crate::parser::{classify, LineKind};
use crate::patterns::PatternMatcher;

use command::CommandChannel;
use error::{CommandError, StartError};
use process::{LaunchSpec, ProcessHandle, ProcessSignal};
use roster::Roster;
use state_machine::{State, StateMachine};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

type StartReply = oneshot::Sender<Result<(), StartError>>;

/// Tunables of a supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Console command that asks the server to shut down
    pub stop_command: String,
    /// Force-kill the child if it has not exited this long after a stop.
    /// `None` waits forever.
    pub stop_timeout: Option<Duration>,
    /// Log every console line at INFO instead of TRACE
    pub echo_output: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_command: "stop".to_string(),
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            echo_output: false,
        }
    }
}

/// Read-only view published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: State,
    pub players: Vec<String>,
    pub version: Option<String>,
    pub pid: Option<u32>,
}

enum StopWaiter {
    Notify(oneshot::Sender<()>),
    /// `restart`: start once the process is gone
    ThenStart(StartReply),
}

enum Request {
    Start(StartReply),
    Stop(oneshot::Sender<()>),
    Restart(StartReply),
    Send(Vec<String>, oneshot::Sender<Result<(), CommandError>>),
    TellRaw(String, Value, oneshot::Sender<Result<(), CommandError>>),
    Subscribe(EventKind, Listener),
    SyncRoster(Vec<String>),
}

pub struct Supervisor {
    launch: LaunchSpec,
    options: SupervisorOptions,
    machine: StateMachine,
    roster: Roster,
    bus: EventBus,
    commands: CommandChannel,
    matcher: PatternMatcher,
    process: Option<ProcessHandle>,
    generation: u64,
    /// The current generation hit a fatal line before it was ready
    start_failed: bool,
    version: Option<String>,
    start_waiters: Vec<StartReply>,
    stop_waiters: Vec<StopWaiter>,
    stop_watchdog: Option<CancellationToken>,
    signals_tx: mpsc::UnboundedSender<ProcessSignal>,
    signals_rx: Option<mpsc::UnboundedReceiver<ProcessSignal>>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Supervisor {
    pub fn new(launch: LaunchSpec, options: SupervisorOptions) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Self {
            launch,
            options,
            machine: StateMachine::new(),
            roster: Roster::new(),
            bus: EventBus::new(),
            commands: CommandChannel::detached(),
            matcher: PatternMatcher::new(),
            process: None,
            generation: 0,
            start_failed: false,
            version: None,
            start_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            stop_watchdog: None,
            signals_tx,
            signals_rx: Some(signals_rx),
            snapshot_tx,
        }
    }

    /// Register a listener before the supervisor task starts.
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&GameEvent, &CommandChannel) -> anyhow::Result<()> + Send + 'static,
    {
        self.bus.subscribe(kind, Box::new(listener));
    }

    /// Move the supervisor onto its own task and return a handle to it.
    ///
    /// Must be called within a tokio runtime. When every handle is dropped
    /// the task ends and a still running child is killed.
    pub fn spawn(self) -> ServerHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let snapshot = self.snapshot_tx.subscribe();
        tokio::spawn(self.run(requests_rx));
        ServerHandle {
            requests: requests_tx,
            snapshot,
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let Some(mut signals) = self.signals_rx.take() else {
            return;
        };
        tracing::info!("Supervisor started for '{}'", self.launch.program);
        loop {
            tokio::select! {
                Some(signal) = signals.recv() => self.handle_signal(signal),
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }
        if let Some(process) = &self.process {
            process.kill();
        }
        tracing::info!("Supervisor for '{}' shut down", self.launch.program);
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start(reply) => self.start(reply),
            Request::Stop(reply) => self.stop(StopWaiter::Notify(reply)),
            Request::Restart(reply) => self.stop(StopWaiter::ThenStart(reply)),
            Request::Send(parts, reply) => {
                let _ = reply.send(self.commands.send(parts));
            }
            Request::TellRaw(target, data, reply) => {
                let _ = reply.send(self.commands.tell_raw(&target, &data));
            }
            Request::Subscribe(kind, listener) => self.bus.subscribe(kind, listener),
            Request::SyncRoster(players) => {
                self.roster.sync(players);
                self.publish_snapshot();
            }
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────

    fn start(&mut self, reply: StartReply) {
        match self.machine.state() {
            State::Running => {
                let _ = reply.send(Ok(()));
            }
            State::Starting => self.start_waiters.push(reply),
            // a start during shutdown waits for the old process to go away
            State::Stopping => self.stop_waiters.push(StopWaiter::ThenStart(reply)),
            State::Stopped => self.spawn_process(reply),
        }
    }

    fn spawn_process(&mut self, reply: StartReply) {
        self.publish(GameEvent::StartRequested);
        self.transition(State::Starting);
        self.generation += 1;
        self.start_failed = false;

        match process::spawn(&self.launch, self.generation, self.signals_tx.clone()) {
            Ok((handle, stdin_tx)) => {
                self.commands.attach(stdin_tx);
                self.process = Some(handle);
                self.start_waiters.push(reply);
                self.publish_snapshot();
            }
            Err(e) => {
                let err = StartError::Spawn {
                    program: self.launch.program.clone(),
                    reason: e.to_string(),
                };
                tracing::error!("{}", err);
                self.transition(State::Stopped);
                self.publish(GameEvent::Error {
                    message: err.to_string(),
                });
                let _ = reply.send(Err(err));
            }
        }
    }

    fn stop(&mut self, waiter: StopWaiter) {
        if self.process.is_none() {
            match waiter {
                StopWaiter::Notify(reply) => {
                    let _ = reply.send(());
                }
                StopWaiter::ThenStart(reply) => self.start(reply),
            }
            return;
        }

        self.stop_waiters.push(waiter);
        if self.machine.state() == State::Stopping {
            return;
        }

        self.publish(GameEvent::StopRequested);
        self.transition(State::Stopping);
        if let Err(e) = self.commands.send([self.options.stop_command.as_str()]) {
            tracing::warn!("Could not send stop command: {}", e);
            self.kill_process();
        }
        self.arm_stop_watchdog();
    }

    fn arm_stop_watchdog(&mut self) {
        let Some(timeout) = self.options.stop_timeout else {
            return;
        };
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let signals = self.signals_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = signals.send(ProcessSignal::StopTimeout { generation });
                }
                _ = cancelled.cancelled() => {}
            }
        });
        self.stop_watchdog = Some(token);
    }

    fn kill_process(&self) {
        if let Some(process) = &self.process {
            process.kill();
        }
    }

    fn transition(&mut self, to: State) {
        if let Err(e) = self.machine.transition(to) {
            tracing::warn!("Ignoring lifecycle change: {}", e);
        }
    }

    // ─── Process signals ─────────────────────────────────────

    fn handle_signal(&mut self, signal: ProcessSignal) {
        match signal {
            ProcessSignal::Line { generation, line, .. } => {
                if generation == self.generation && self.process.is_some() {
                    self.handle_line(&line);
                }
            }
            ProcessSignal::Exited {
                generation,
                exit_code,
            } => self.handle_exit(generation, exit_code),
            ProcessSignal::StopTimeout { generation } => {
                if generation == self.generation && self.machine.state() == State::Stopping {
                    tracing::warn!(
                        "Server did not exit within {:?} of the stop command",
                        self.options.stop_timeout.unwrap_or_default()
                    );
                    self.kill_process();
                }
            }
        }
    }

    /// Parse one complete console line and deliver everything it produces
    /// before returning.
    fn handle_line(&mut self, line: &str) {
        if self.options.echo_output {
            tracing::info!(target: "server", "{}", line.trim_end());
        } else {
            tracing::trace!(target: "server", "{}", line.trim_end());
        }

        match classify(line) {
            LineKind::Fatal(message) => self.dispatch(GameEvent::Error { message }),
            LineKind::Java(line) => self.dispatch(GameEvent::JavaOutput { line }),
            LineKind::Log(record) => {
                let events = self.matcher.apply(&record, &mut self.roster);
                self.dispatch(GameEvent::Log(record));
                for event in events {
                    self.dispatch(event);
                }
            }
        }
    }

    /// Apply the supervisor's own reaction to an event, then publish it.
    fn dispatch(&mut self, event: GameEvent) {
        match &event {
            GameEvent::Started => {
                if self.start_failed {
                    tracing::debug!("Ignoring ready line of a failed start");
                    return;
                }
                if self.machine.state() == State::Starting {
                    self.transition(State::Running);
                    tracing::info!("Server is ready");
                    for reply in self.start_waiters.drain(..) {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            GameEvent::Error { message } => {
                tracing::warn!("Server reported a fatal error: {}", message);
                if self.machine.state() == State::Starting && self.process.is_some() {
                    self.start_failed = true;
                    self.kill_process();
                    for reply in self.start_waiters.drain(..) {
                        let _ = reply.send(Err(StartError::Fatal(message.clone())));
                    }
                }
            }
            GameEvent::VersionDetected { version } => {
                tracing::info!("Server version {}", version);
                self.version = Some(version.clone());
            }
            _ => {}
        }
        self.publish(event);
        self.publish_snapshot();
    }

    fn handle_exit(&mut self, generation: u64, exit_code: Option<i32>) {
        if generation != self.generation || self.process.is_none() {
            tracing::debug!("Ignoring exit of stale process generation {}", generation);
            return;
        }

        self.transition(State::Stopped);
        self.process = None;
        self.commands.detach();
        if !self.roster.is_empty() {
            tracing::info!("Dropping {} player(s) from the roster", self.roster.len());
            self.roster.clear();
        }
        if let Some(token) = self.stop_watchdog.take() {
            token.cancel();
        }
        for reply in self.start_waiters.drain(..) {
            let _ = reply.send(Err(StartError::ExitedEarly(exit_code)));
        }

        self.publish(GameEvent::Stopped { exit_code });
        self.publish_snapshot();

        for waiter in std::mem::take(&mut self.stop_waiters) {
            match waiter {
                StopWaiter::Notify(reply) => {
                    let _ = reply.send(());
                }
                StopWaiter::ThenStart(reply) => self.start(reply),
            }
        }
    }

    // ─── Publishing ──────────────────────────────────────────

    fn publish(&mut self, event: GameEvent) {
        self.bus.publish(&event, &self.commands);
    }

    fn publish_snapshot(&self) {
        let snapshot = Snapshot {
            state: self.machine.state(),
            players: self.roster.names().to_vec(),
            version: self.version.clone(),
            pid: self.process.as_ref().and_then(|p| p.pid),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

// ─── Server Handle ───────────────────────────────────────────

/// Cloneable front end to a running `Supervisor` task.
#[derive(Clone)]
pub struct ServerHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<Snapshot>,
}

impl ServerHandle {
    /// Start the server. Resolves once it is ready, or with the reason it
    /// never got there. Succeeds immediately if it is already running.
    pub async fn start(&self) -> Result<(), StartError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Start(tx)).map_err(|_| StartError::SupervisorGone)?;
        rx.await.unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Ask the server to stop and wait for the process to exit.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.request(Request::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop, then start once the old process is gone.
    pub async fn restart(&self) -> Result<(), StartError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Restart(tx)).map_err(|_| StartError::SupervisorGone)?;
        rx.await.unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Write one command line to the server's stdin.
    pub async fn send<I, S>(&self, parts: I) -> Result<(), CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = parts.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();
        self.request(Request::Send(parts, tx)).map_err(|_| CommandError::SupervisorGone)?;
        rx.await.unwrap_or(Err(CommandError::SupervisorGone))
    }

    /// Send a JSON text component to `target` with `tellraw`.
    pub async fn tell_raw(&self, target: &str, data: Value) -> Result<(), CommandError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::TellRaw(target.to_string(), data, tx))
            .map_err(|_| CommandError::SupervisorGone)?;
        rx.await.unwrap_or(Err(CommandError::SupervisorGone))
    }

    /// Register a listener. Events already delivered are not replayed.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> bool
    where
        F: FnMut(&GameEvent, &CommandChannel) -> anyhow::Result<()> + Send + 'static,
    {
        self.request(Request::Subscribe(kind, Box::new(listener))).is_ok()
    }

    /// Replace the roster, e.g. with the result of a `list` command.
    pub fn sync_roster<I, S>(&self, players: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let players = players.into_iter().map(Into::into).collect();
        self.request(Request::SyncRoster(players)).is_ok()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> State {
        self.snapshot.borrow().state
    }

    pub fn players(&self) -> Vec<String> {
        self.snapshot.borrow().players.clone()
    }

    pub fn is_online(&self, player: &str) -> bool {
        self.snapshot.borrow().players.iter().any(|p| p == player)
    }

    /// Receiver that is notified on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    fn request(&self, request: Request) -> Result<(), ()> {
        self.requests.send(request).map_err(|_| {
            tracing::warn!("Supervisor task is gone, request dropped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(supervisor: &mut Supervisor, kinds: &[EventKind]) -> Arc<Mutex<Vec<GameEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let seen = seen.clone();
            supervisor.subscribe(*kind, move |event, _| {
                seen.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        seen
    }

    #[tokio::test]
    async fn send_without_process_fails() {
        let handle = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default()).spawn();
        let result = handle.send(["say", "hello"]).await;
        assert!(matches!(result, Err(CommandError::NotAttached)));
        assert_eq!(handle.state(), State::Stopped);
    }

    #[tokio::test]
    async fn tell_raw_goes_through_command_channel() {
        let handle = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default()).spawn();
        let notice = serde_json::json!([{ "text": "Restarting in 30 seconds", "color": "red" }]);
        let result = handle.tell_raw("@a", notice).await;
        assert!(matches!(result, Err(CommandError::NotAttached)));
    }

    #[tokio::test]
    async fn stop_while_stopped_resolves_immediately() {
        let handle = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default()).spawn();
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop on a stopped server should not wait");
    }

    #[tokio::test]
    async fn spawn_failure_fails_start_once() {
        let mut supervisor = Supervisor::new(
            LaunchSpec::new("/nonexistent/definitely-not-java"),
            SupervisorOptions::default(),
        );
        let seen = recorder(&mut supervisor, &[EventKind::StartRequested, EventKind::Error]);
        let handle = supervisor.spawn();

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, StartError::Spawn { .. }));
        assert_eq!(handle.state(), State::Stopped);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], GameEvent::StartRequested);
        assert!(matches!(seen[1], GameEvent::Error { .. }));
    }

    #[tokio::test]
    async fn stale_exit_is_ignored() {
        let mut supervisor = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default());
        let seen = recorder(&mut supervisor, &[EventKind::Stopped]);
        supervisor.handle_exit(0, Some(0));
        supervisor.handle_exit(42, None);
        assert_eq!(supervisor.machine.state(), State::Stopped);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lines_update_roster_and_version() {
        let mut supervisor = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default());
        let seen = recorder(&mut supervisor, &[EventKind::Log, EventKind::Joined, EventKind::Message]);

        supervisor.handle_line("[12:00:00] [Server thread/INFO]: Starting minecraft server version 1.8.9");
        supervisor.handle_line("[12:00:01] [Server thread/INFO]: Alice logged in with entity id 5 at (1.0, 64.0, 1.0)");
        supervisor.handle_line("[12:00:02] [Server thread/INFO]: <Bob> hello");

        let snapshot = supervisor.snapshot_tx.borrow().clone();
        assert_eq!(snapshot.version.as_deref(), Some("1.8.9"));
        assert_eq!(snapshot.players, vec!["Alice".to_string()]);

        let seen = seen.lock().unwrap();
        let kinds: Vec<EventKind> = seen.iter().map(GameEvent::kind).collect();
        // the log record of a line is delivered before what was matched in it
        assert_eq!(
            kinds,
            vec![
                EventKind::Log,
                EventKind::Log,
                EventKind::Joined,
                EventKind::Log,
                EventKind::Message,
            ]
        );
        assert_eq!(
            seen[4],
            GameEvent::Message { player: "Bob".into(), text: "hello".into() }
        );
    }

    #[tokio::test]
    async fn ready_line_after_failed_start_is_ignored() {
        let mut supervisor = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default());
        let seen = recorder(&mut supervisor, &[EventKind::Started, EventKind::Error]);
        supervisor.transition(State::Starting);
        supervisor.start_failed = true;

        supervisor.handle_line("[12:00:01] [Server thread/INFO]: Done (0.5s)!");
        assert_eq!(supervisor.machine.state(), State::Starting);
        assert!(seen.lock().unwrap().is_empty());

        supervisor.start_failed = false;
        supervisor.handle_line("[12:00:01] [Server thread/INFO]: Done (0.5s)!");
        assert_eq!(supervisor.machine.state(), State::Running);
        assert_eq!(*seen.lock().unwrap(), vec![GameEvent::Started]);
    }

    #[tokio::test]
    async fn fatal_raw_line_becomes_error_event() {
        let mut supervisor = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default());
        let seen = recorder(&mut supervisor, &[EventKind::Error, EventKind::JavaOutput, EventKind::Log]);

        supervisor.handle_line("Error: Unable to access jarfile server.jar");
        supervisor.handle_line("\tat net.minecraft.server.Main.main(Main.java:1)");

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                GameEvent::Error { message: "Error: Unable to access jarfile server.jar".into() },
                GameEvent::JavaOutput { line: "\tat net.minecraft.server.Main.main(Main.java:1)".into() },
            ]
        );
    }

    #[tokio::test]
    async fn sync_roster_replaces_players() {
        let handle = Supervisor::new(LaunchSpec::new("java"), SupervisorOptions::default()).spawn();
        assert!(handle.sync_roster(["Bob", "Alice", "Bob"]));

        let mut watch = handle.watch();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(1),
            watch.wait_for(|s| !s.players.is_empty()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(snapshot.players, vec!["Bob".to_string(), "Alice".to_string()]);
        assert!(handle.is_online("Alice"));
    }
}
