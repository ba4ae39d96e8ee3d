//! Child process plumbing
//!
//! `spawn` starts the server and wires it up with helper tasks that only move
//! data; all interpretation happens on the supervisor task:
//! - stdout/stderr readers forward complete lines as `ProcessSignal::Line`
//! - the stdin writer drains queued command lines
//! - the waiter reports `ProcessSignal::Exited` after both readers are done,
//!   so no output is ever delivered after the exit notification

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long the waiter lets readers drain after the child is gone. A
/// grandchild holding the pipe open must not delay the exit notification.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Program, arguments and working directory of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Notifications from the helper tasks to the supervisor task. Every signal
/// carries the generation of the process it belongs to.
#[derive(Debug)]
pub enum ProcessSignal {
    Line {
        generation: u64,
        stream: Stream,
        line: String,
    },
    Exited {
        generation: u64,
        exit_code: Option<i32>,
    },
    StopTimeout {
        generation: u64,
    },
}

/// The supervisor's reference to a running child.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub generation: u64,
    kill: CancellationToken,
}

impl ProcessHandle {
    /// Force-kill the child. The exit still arrives as `ProcessSignal::Exited`.
    pub fn kill(&self) {
        if !self.kill.is_cancelled() {
            tracing::warn!("Killing server process (pid: {:?})", self.pid);
            self.kill.cancel();
        }
    }
}

/// Spawn the server and its helper tasks.
///
/// Returns the handle and the sender feeding the stdin writer.
pub fn spawn(
    spec: &LaunchSpec,
    generation: u64,
    signals: mpsc::UnboundedSender<ProcessSignal>,
) -> std::io::Result<(ProcessHandle, mpsc::UnboundedSender<String>)> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    apply_creation_flags(&mut cmd);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    tracing::info!("Spawned '{}' with PID {:?}", spec.program, pid);

    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<String>();
    let kill = CancellationToken::new();

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Stream::Stdout, generation, signals.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Stream::Stderr, generation, signals.clone()));
    }

    // ── stdin writer ─────────────────────────────────────
    if let Some(mut stdin) = child.stdin.take() {
        let mut rx = stdin_rx;
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!("Failed to write to server stdin: {}", e);
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });
    }

    // ── process waiter ───────────────────────────────────
    tokio::spawn(wait_for_exit(child, readers, kill.clone(), generation, signals));

    Ok((
        ProcessHandle {
            pid,
            generation,
            kill,
        },
        stdin_tx,
    ))
}

fn spawn_reader<R>(
    reader: R,
    stream: Stream,
    generation: u64,
    signals: mpsc::UnboundedSender<ProcessSignal>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                // EOF; a trailing fragment without newline was returned by the previous read
                Ok(0) => break,
                Ok(_) => {
                    let signal = ProcessSignal::Line {
                        generation,
                        stream,
                        line: decode_line(&buf),
                    };
                    if signals.send(signal).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read server {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

async fn wait_for_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    kill: CancellationToken,
    generation: u64,
    signals: mpsc::UnboundedSender<ProcessSignal>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill server process: {}", e);
            }
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => {
            tracing::info!("Server process exited with {}", status);
            status.code()
        }
        Err(e) => {
            tracing::error!("Failed to wait for server process: {}", e);
            None
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            tracing::warn!("Output reader still open after exit, dropping the rest");
            reader.abort();
        }
    }

    let _ = signals.send(ProcessSignal::Exited {
        generation,
        exit_code,
    });
}

/// Hide the console window of the child on Windows.
#[cfg(target_os = "windows")]
fn apply_creation_flags(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(target_os = "windows"))]
fn apply_creation_flags(_cmd: &mut Command) {}
