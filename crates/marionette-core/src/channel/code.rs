//! Code helper channel.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::CodeHelperConfig;
use crate::error::{Error, Result};
use crate::framing::LineFramer;
use crate::governor::PendingRequest;
use crate::process::{KillHandle, StreamEvent, Supervisor};
use crate::protocol::CodeRequest;

const CHANNEL: &str = "code helper";

/// How long `shutdown` waits for the helper to exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Channel to the code-execution helper.
///
/// The helper's imports are expensive, so a timed-out call does not kill it:
/// the call is abandoned, the helper keeps running, and its late answer is
/// recognized by id and dropped when it eventually arrives.
pub struct CodeChannel {
    config: CodeHelperConfig,
    inner: Mutex<CodeState>,
    current_kill: Arc<StdMutex<Option<KillHandle>>>,
}

struct CodeState {
    supervisor: Supervisor,
    next_token: u64,
}

impl CodeChannel {
    /// Create a channel. The helper is spawned on first use.
    pub fn new(config: CodeHelperConfig) -> Self {
        let supervisor = Supervisor::new(config.interpreter_spec());
        Self {
            config,
            inner: Mutex::new(CodeState {
                supervisor,
                next_token: 0,
            }),
            current_kill: Arc::new(StdMutex::new(None)),
        }
    }

    /// Channel configuration.
    pub fn config(&self) -> &CodeHelperConfig {
        &self.config
    }

    /// Execute code with the configured default timeout.
    pub async fn execute(&self, code: &str) -> Result<String> {
        self.execute_with_timeout(code, self.config.timeout()).await
    }

    /// Execute code with an explicit timeout.
    ///
    /// The timeout covers the request itself; a cold helper's startup is
    /// bounded separately by the startup timeout.
    pub async fn execute_with_timeout(&self, code: &str, timeout: Duration) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        state.next_token += 1;
        let token = state.next_token;
        let request = CodeRequest { id: token, code }.to_line()?;

        let process = state.supervisor.ensure_ready().await?;
        self.publish_kill_handle(process.kill_handle());

        debug!(token, bytes = request.len(), "Sending code");
        let mut pending = PendingRequest::new(token, LineFramer::new(token), timeout);

        if let Err(e) = process.write_all(request.as_bytes()).await {
            state.supervisor.kill().await;
            self.publish_kill_handle(None);
            return Err(e);
        }

        let mut exited = false;

        while !pending.is_settled() {
            let event = tokio::select! {
                event = process.next_event() => Some(event),
                _ = tokio::time::sleep_until(pending.deadline()) => None,
            };

            match event {
                Some(StreamEvent::Stdout(chunk)) => {
                    if let Some(response) = pending.feed(&chunk) {
                        pending.settle(response.into_result());
                    }
                }
                Some(StreamEvent::Stderr(chunk)) => {
                    debug!(
                        "{} stderr: {}",
                        CHANNEL,
                        String::from_utf8_lossy(&chunk).trim_end()
                    );
                }
                Some(StreamEvent::Closed) => {
                    exited = true;
                    break;
                }
                None => {
                    pending.expire(CHANNEL);
                }
            }
        }

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
                "Code timed out after {}ms; abandoning the call and keeping {} alive",
                timeout.as_millis(),
                CHANNEL
            );
        }

        pending.into_outcome()
    }

    /// Start the helper and wait until it is ready, without sending code.
    pub async fn prewarm(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let process = state.supervisor.ensure_ready().await?;
        self.publish_kill_handle(process.kill_handle());
        Ok(())
    }

    /// Kill handle for the current helper. `None` when no helper is live.
    pub fn kill_handle(&self) -> Option<KillHandle> {
        self.current_kill
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    /// Number of helpers spawned by this channel.
    pub async fn spawn_count(&self) -> u64 {
        self.inner.lock().await.supervisor.spawn_count()
    }

    /// Process ID of the current helper.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.supervisor.pid()
    }

    /// Stop the helper. The next call starts a new one.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        state.supervisor.shutdown(SHUTDOWN_GRACE).await;
        self.publish_kill_handle(None);
    }

    fn publish_kill_handle(&self, handle: Option<KillHandle>) {
        if let Ok(mut slot) = self.current_kill.lock() {
            *slot = handle;
        }
    }
}
