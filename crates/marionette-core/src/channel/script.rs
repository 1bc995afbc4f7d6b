//! Script engine channel.
//!
//! Each call appends a statement that prints `<sentinel>_<token>` to the
//! script, writes it to the long-lived interpreter, and collects stdout up to
//! that marker. Any stderr seen during the call turns the result into a
//! classified error, even if the marker arrived.

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::classify::{ErrorClass, classify};
use crate::config::{ScriptEngineConfig, ScriptMode};
use crate::error::{Error, Result};
use crate::framing::SentinelFramer;
use crate::governor::PendingRequest;
use crate::process::{KillHandle, StreamEvent, Supervisor, resolve_program};

const CHANNEL: &str = "script engine";

/// How long `shutdown` waits for the interpreter to exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Channel to the script-automation interpreter.
///
/// Calls are serialized: a call holds the channel for its whole duration, so
/// concurrent callers queue instead of reading each other's output.
pub struct ScriptChannel {
    config: ScriptEngineConfig,
    inner: Mutex<ScriptState>,
    /// Kill handle of the current interpreter, readable while a call holds
    /// `inner`.
    current_kill: Arc<StdMutex<Option<KillHandle>>>,
}

struct ScriptState {
    supervisor: Supervisor,
    next_token: u64,
    /// Set while a call is waiting on the interpreter. Still set at the start
    /// of a call means the previous caller was dropped mid-call and its
    /// output may still be in flight.
    in_flight: bool,
}

impl ScriptChannel {
    /// Create a channel. The interpreter is spawned on first use.
    pub fn new(config: ScriptEngineConfig) -> Self {
        let supervisor = Supervisor::new(config.interpreter_spec());
        Self {
            config,
            inner: Mutex::new(ScriptState {
                supervisor,
                next_token: 0,
                in_flight: false,
            }),
            current_kill: Arc::new(StdMutex::new(None)),
        }
    }

    /// Channel configuration.
    pub fn config(&self) -> &ScriptEngineConfig {
        &self.config
    }

    /// Run a script with the configured timeout.
    pub async fn execute(&self, script: &str) -> Result<String> {
        self.execute_with_timeout(script, self.config.timeout()).await
    }

    /// Run a script with an explicit timeout.
    pub async fn execute_with_timeout(&self, script: &str, timeout: Duration) -> Result<String> {
        match self.config.mode {
            ScriptMode::Persistent => self.execute_persistent(script, timeout).await,
            ScriptMode::OneShot => self.execute_once_with_timeout(script, timeout).await,
        }
    }

    async fn execute_persistent(&self, script: &str, timeout: Duration) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        if state.in_flight {
            warn!("Previous script call was abandoned mid-call; restarting {}", CHANNEL);
            state.supervisor.kill().await;
            state.in_flight = false;
        }

        state.next_token += 1;
        let token = state.next_token;
        let marker = SentinelFramer::marker(&self.config.sentinel, token);
        let request = build_request(script, &self.config.render_sentinel(&marker));

        let process = state.supervisor.ensure_ready().await?;
        self.publish_kill_handle(process.kill_handle());
        process.discard_buffered();

        debug!(token, bytes = request.len(), "Sending script");
        let mut pending = PendingRequest::new(token, SentinelFramer::new(marker), timeout);
        state.in_flight = true;

        if let Err(e) = process.write_all(request.as_bytes()).await {
            state.in_flight = false;
            state.supervisor.kill().await;
            self.publish_kill_handle(None);
            return Err(e);
        }

        let mut diagnostics: Vec<u8> = Vec::new();
        let mut exited = false;

        while !pending.is_settled() {
            let event = tokio::select! {
                event = process.next_event() => Some(event),
                _ = tokio::time::sleep_until(pending.deadline()) => None,
            };

            match event {
                Some(StreamEvent::Stdout(chunk)) => {
                    if let Some(output) = pending.feed(&chunk) {
                        // stdout and stderr are not ordered relative to each
                        // other; give trailing diagnostics a moment to land.
                        let late = process.collect_stderr(self.config.stderr_grace()).await;
                        diagnostics.extend_from_slice(&late);
                        pending.settle(into_result(output, &diagnostics));
                    }
                }
                Some(StreamEvent::Stderr(chunk)) => diagnostics.extend_from_slice(&chunk),
                Some(StreamEvent::Closed) => {
                    exited = true;
                    break;
                }
                None => {
                    pending.expire(CHANNEL);
                }
            }
        }

        state.in_flight = false;

        if exited {
            let status = state.supervisor.reap().await;
            self.publish_kill_handle(None);
            warn!(token, ?status, "{} exited mid-call", CHANNEL);
            pending.settle(Err(Error::ProcessExited {
                channel: CHANNEL,
                status,
            }));
        } else if pending.timed_out() {
            warn!(
                token,
                "Script timed out after {}ms; killing {}",
                timeout.as_millis(),
                CHANNEL
            );
            state.supervisor.kill().await;
            self.publish_kill_handle(None);
        }

        pending.into_outcome()
    }

    /// Run a script in a fresh interpreter with the configured timeout.
    pub async fn execute_once(&self, script: &str) -> Result<String> {
        self.execute_once_with_timeout(script, self.config.timeout()).await
    }

    /// Run a script in a fresh interpreter, passing it as an argument.
    ///
    /// Pays the full startup cost, but needs no framing: process exit ends
    /// the response.
    pub async fn execute_once_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<String> {
        let program = resolve_program(&self.config.program)?;

        let mut command = Command::new(&program);
        command
            .args(&self.config.one_shot_args)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| Error::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;
        let kill_handle = child.id().map(KillHandle::new);
        debug!(pid = ?child.id(), "Running one-shot script");

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("One-shot script timed out after {}ms", timeout.as_millis());
                if let Some(handle) = kill_handle {
                    handle.kill();
                }
                return Err(Error::Timeout {
                    channel: CHANNEL,
                    after: timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();

        if !stderr.is_empty() {
            return Err(Error::Script {
                class: classify(stderr),
                message: stderr.to_string(),
            });
        }
        if !output.status.success() {
            return Err(Error::Script {
                class: ErrorClass::Unknown,
                message: format!("{} exited with {}", program.display(), output.status),
            });
        }
        Ok(stdout)
    }

    /// Start the interpreter without submitting a request.
    pub async fn prewarm(&self) -> Result<()> {
        if self.config.mode == ScriptMode::OneShot {
            return Ok(());
        }
        let mut state = self.inner.lock().await;
        let process = state.supervisor.ensure_ready().await?;
        self.publish_kill_handle(process.kill_handle());
        Ok(())
    }

    /// Kill handle for the current interpreter, usable while a call is
    /// running. `None` when no interpreter is live.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.current_kill
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    /// Number of interpreters spawned by this channel.
    pub async fn spawn_count(&self) -> u64 {
        self.inner.lock().await.supervisor.spawn_count()
    }

    /// Process ID of the current interpreter.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.supervisor.pid()
    }

    /// Stop the interpreter. The next call starts a new one.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        state.supervisor.shutdown(SHUTDOWN_GRACE).await;
        state.in_flight = false;
        self.publish_kill_handle(None);
    }

    fn publish_kill_handle(&self, handle: Option<KillHandle>) {
        if let Ok(mut slot) = self.current_kill.lock() {
            *slot = handle;
        }
    }
}

/// Script text followed by the sentinel statement, newline-terminated.
fn build_request(script: &str, sentinel_statement: &str) -> String {
    let script = script.trim_end_matches(['\n', '\r']);
    let mut request = String::with_capacity(script.len() + sentinel_statement.len() + 2);
    if !script.is_empty() {
        request.push_str(script);
        request.push('\n');
    }
    request.push_str(sentinel_statement);
    request.push('\n');
    request
}

/// Diagnostics take precedence over output.
fn into_result(output: String, diagnostics: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(diagnostics);
    let text = text.trim();
    if text.is_empty() {
        Ok(output)
    } else {
        Err(Error::Script {
            class: classify(text),
            message: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        assert_eq!(
            build_request("echo hi\n\n", "echo M_1"),
            "echo hi\necho M_1\n"
        );
        assert_eq!(build_request("", "echo M_2"), "echo M_2\n");
    }

    #[test]
    fn test_diagnostics_take_precedence() {
        let result = into_result(
            "partial output".to_string(),
            b"execution error: not allowed assistive access. (-1719)\n",
        );
        match result {
            Err(Error::Script { class, message }) => {
                assert_eq!(class, ErrorClass::AccessibilityDenied);
                assert!(message.contains("assistive access"));
            }
            other => panic!("Expected script error, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_diagnostics_are_ignored() {
        assert_eq!(into_result("ok".to_string(), b" \n").unwrap(), "ok");
    }
}
