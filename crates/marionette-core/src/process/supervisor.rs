//! Interpreter process lifecycle.
//!
//! A [`Supervisor`] owns at most one [`InterpreterProcess`]. The process is
//! spawned lazily by [`Supervisor::ensure_ready`], and a dead process (exited,
//! killed, or crashed) is replaced on the next call to it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use super::kill::KillHandle;
use crate::error::{Error, Result};

/// Size of a single read from an interpreter stream.
const READ_CHUNK: usize = 8 * 1024;

/// How long to wait for the exit status of a process whose stdout closed.
const REAP_GRACE: Duration = Duration::from_millis(100);

/// How an interpreter signals that it can accept requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Usable as soon as it is spawned; input is buffered until read.
    Immediate,
    /// Usable once `marker` appears as a full line on stderr.
    StderrMarker { marker: String, timeout: Duration },
}

/// Everything needed to launch an interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterSpec {
    /// Channel name used in logs and errors.
    pub name: &'static str,
    /// Program name (looked up in PATH) or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Readiness handshake.
    pub readiness: Readiness,
}

/// Liveness of an interpreter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, readiness not yet confirmed.
    Starting,
    /// Accepting requests.
    Ready,
    /// Exited or killed.
    Dead,
}

/// Something observed on the interpreter's output streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk from stdout.
    Stdout(Vec<u8>),
    /// A chunk from stderr.
    Stderr(Vec<u8>),
    /// Stdout reached end-of-file: the process is gone.
    Closed,
}

/// Which stream a chunk came from.
enum Source {
    Stdout,
    Stderr,
}

/// A running interpreter with captured streams.
///
/// Output streams are drained by background tasks into unbounded channels, so
/// the interpreter never blocks on a full pipe while no call is reading.
pub struct InterpreterProcess {
    name: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: UnboundedReceiver<Vec<u8>>,
    stderr: UnboundedReceiver<Vec<u8>>,
    stdout_open: bool,
    stderr_open: bool,
    state: ProcessState,
    kill_handle: Option<KillHandle>,
}

impl InterpreterProcess {
    /// Spawn the interpreter and wait for its readiness signal.
    pub async fn spawn(spec: &InterpreterSpec) -> Result<Self> {
        let program = resolve_program(&spec.program)?;

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a kill reaches the interpreter's children too.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| Error::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc(format!("Failed to get {} stdin", spec.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc(format!("Failed to get {} stdout", spec.name)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Ipc(format!("Failed to get {} stderr", spec.name)))?;

        let pid = child.id();
        info!(
            "Spawned {} '{}' (pid {:?})",
            spec.name,
            program.display(),
            pid
        );

        let mut process = Self {
            name: spec.name,
            child,
            stdin: Some(stdin),
            stdout: pump(stdout),
            stderr: pump(stderr),
            stdout_open: true,
            stderr_open: true,
            state: ProcessState::Starting,
            kill_handle: pid.map(KillHandle::new),
        };

        process.wait_ready(&spec.readiness, &program).await?;
        Ok(process)
    }

    async fn wait_ready(&mut self, readiness: &Readiness, program: &Path) -> Result<()> {
        let (marker, timeout) = match readiness {
            Readiness::Immediate => {
                self.state = ProcessState::Ready;
                return Ok(());
            }
            Readiness::StderrMarker { marker, timeout } => (marker.as_str(), *timeout),
        };

        let mut diagnostics = String::new();
        let found = tokio::time::timeout(timeout, self.read_until_marker(marker, &mut diagnostics))
            .await;

        match found {
            Ok(true) => {
                info!("{} ready (pid {:?})", self.name, self.pid());
                self.state = ProcessState::Ready;
                Ok(())
            }
            Ok(false) => {
                let status = self.exit_status();
                self.kill().await;
                Err(Error::Spawn {
                    program: program.display().to_string(),
                    message: format!(
                        "exited before signalling readiness{}{}",
                        status.map(|s| format!(" ({})", s)).unwrap_or_default(),
                        format_diagnostics(&diagnostics)
                    ),
                })
            }
            Err(_) => {
                self.kill().await;
                Err(Error::Spawn {
                    program: program.display().to_string(),
                    message: format!(
                        "no readiness signal within {}ms{}",
                        timeout.as_millis(),
                        format_diagnostics(&diagnostics)
                    ),
                })
            }
        }
    }

    /// Read stderr until a line equal to `marker`. Returns `false` on EOF.
    async fn read_until_marker(&mut self, marker: &str, diagnostics: &mut String) -> bool {
        let mut partial: Vec<u8> = Vec::new();
        while let Some(chunk) = self.stderr.recv().await {
            partial.extend_from_slice(&chunk);
            while let Some(newline) = partial.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = partial.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line == marker {
                    return true;
                }
                debug!("{} startup: {}", self.name, line);
                diagnostics.push_str(line);
                diagnostics.push('\n');
            }
        }
        self.stderr_open = false;
        false
    }

    /// Write raw bytes to the interpreter's stdin.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Ipc(format!("{} stdin is closed", self.name)))?;
        stdin
            .write_all(bytes)
            .await
            .map_err(|e| Error::Ipc(format!("Failed to write to {}: {}", self.name, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Ipc(format!("Failed to flush {} stdin: {}", self.name, e)))?;
        Ok(())
    }

    /// Wait for the next chunk on either output stream.
    ///
    /// Cancel-safe: dropping the future loses no data.
    pub async fn next_event(&mut self) -> StreamEvent {
        loop {
            let (source, chunk) = tokio::select! {
                chunk = self.stdout.recv(), if self.stdout_open => (Source::Stdout, chunk),
                chunk = self.stderr.recv(), if self.stderr_open => (Source::Stderr, chunk),
                else => return StreamEvent::Closed,
            };

            match (source, chunk) {
                (Source::Stdout, Some(chunk)) => return StreamEvent::Stdout(chunk),
                (Source::Stderr, Some(chunk)) => return StreamEvent::Stderr(chunk),
                (Source::Stdout, None) => {
                    self.stdout_open = false;
                    return StreamEvent::Closed;
                }
                (Source::Stderr, None) => self.stderr_open = false,
            }
        }
    }

    /// Drop output that arrived while no call was listening.
    ///
    /// Returns the number of bytes discarded.
    pub fn discard_buffered(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(chunk) = self.stdout.try_recv() {
            discarded += chunk.len();
        }
        while let Ok(chunk) = self.stderr.try_recv() {
            discarded += chunk.len();
        }
        if discarded > 0 {
            debug!("Discarded {} stale bytes from {}", discarded, self.name);
        }
        discarded
    }

    /// Collect stderr already delivered, after waiting `grace` for stragglers.
    pub async fn collect_stderr(&mut self, grace: Duration) -> Vec<u8> {
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        let mut collected = Vec::new();
        while let Ok(chunk) = self.stderr.try_recv() {
            collected.extend_from_slice(&chunk);
        }
        collected
    }

    /// Whether the process has exited.
    pub fn has_exited(&mut self) -> bool {
        if self.state == ProcessState::Dead {
            return true;
        }
        // A SIGKILL sent through the handle may not be reapable yet.
        if self.kill_handle.as_ref().is_some_and(KillHandle::is_killed) {
            self.state = ProcessState::Dead;
            return true;
        }
        match self.child.try_wait() {
            Ok(None) => false,
            Ok(Some(_)) | Err(_) => {
                self.state = ProcessState::Dead;
                true
            }
        }
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            _ => None,
        }
    }

    /// Wait up to `grace` for the process to exit and return its status.
    pub async fn wait_exit(&mut self, grace: Duration) -> Option<String> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.state = ProcessState::Dead;
                Some(status.to_string())
            }
            _ => None,
        }
    }

    /// Kill the process (and its process group) and reap it.
    pub async fn kill(&mut self) {
        if let Some(ref handle) = self.kill_handle {
            handle.kill();
        }
        if let Err(e) = self.child.kill().await {
            // The child may already have been reaped.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill {}: {}", self.name, e);
            }
        }
        self.state = ProcessState::Dead;
    }

    /// Close stdin and give the process `grace` to exit on its own.
    pub async fn shutdown(&mut self, grace: Duration) {
        drop(self.stdin.take());
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited: {}", self.name, status),
            _ => self.kill().await,
        }
        self.state = ProcessState::Dead;
    }

    /// Operating-system process ID.
    pub fn pid(&self) -> Option<u32> {
        self.kill_handle.as_ref().map(KillHandle::pid)
    }

    /// Handle for killing this process from another task or thread.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.kill_handle.clone()
    }

    /// Current liveness state.
    pub fn state(&self) -> ProcessState {
        self.state
    }
}

/// Forward everything read from `reader` into a channel, chunk by chunk.
fn pump<R>(mut reader: R) -> UnboundedReceiver<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Interpreter stream read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn format_diagnostics(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Resolve a program name to an executable path.
///
/// Names containing a path separator are used as-is; bare names are looked up
/// in PATH.
pub(crate) fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Spawn {
            program: program.to_string(),
            message: "no such file".to_string(),
        });
    }

    which::which(program).map_err(|e| Error::Spawn {
        program: program.to_string(),
        message: format!("not found in PATH ({})", e),
    })
}

/// Owner of the single interpreter process of one channel.
pub struct Supervisor {
    spec: InterpreterSpec,
    process: Option<InterpreterProcess>,
    spawn_count: u64,
}

impl Supervisor {
    /// Create a supervisor. Nothing is spawned until first use.
    pub fn new(spec: InterpreterSpec) -> Self {
        Self {
            spec,
            process: None,
            spawn_count: 0,
        }
    }

    /// The launch specification.
    pub fn spec(&self) -> &InterpreterSpec {
        &self.spec
    }

    /// Return the live interpreter, spawning a new one if there is none or
    /// the previous one has died.
    ///
    /// A failed spawn is reported and not retried; the next call tries again.
    pub async fn ensure_ready(&mut self) -> Result<&mut InterpreterProcess> {
        if self.process.as_mut().is_some_and(InterpreterProcess::has_exited) {
            if let Some(mut dead) = self.process.take() {
                info!(
                    "{} exited{}; will respawn",
                    self.spec.name,
                    dead.exit_status()
                        .map(|s| format!(" ({})", s))
                        .unwrap_or_default()
                );
            }
        }

        if self.process.is_none() {
            let process = InterpreterProcess::spawn(&self.spec).await?;
            self.spawn_count += 1;
            self.process = Some(process);
        }

        self.process
            .as_mut()
            .ok_or_else(|| Error::Ipc(format!("{} is not running", self.spec.name)))
    }

    /// Kill the current interpreter, if any. The next use respawns.
    pub async fn kill(&mut self) {
        if let Some(mut process) = self.process.take() {
            warn!("Killing {} (pid {:?})", self.spec.name, process.pid());
            process.kill().await;
        }
    }

    /// Forget an interpreter whose output stream has closed, returning its
    /// exit status if known.
    pub async fn reap(&mut self) -> Option<String> {
        let mut process = self.process.take()?;
        let status = process.wait_exit(REAP_GRACE).await;
        if status.is_none() {
            process.kill().await;
        }
        status
    }

    /// Close the interpreter's input and wait up to `grace` for it to exit.
    pub async fn shutdown(&mut self, grace: Duration) {
        if let Some(mut process) = self.process.take() {
            info!("Shutting down {}", self.spec.name);
            process.shutdown(grace).await;
        }
    }

    /// Whether a live interpreter is currently held.
    pub fn is_running(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| !process.has_exited())
    }

    /// Process ID of the current interpreter.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(InterpreterProcess::pid)
    }

    /// Kill handle for the current interpreter.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.process.as_ref().and_then(InterpreterProcess::kill_handle)
    }

    /// Number of interpreters spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count
    }
}
