//! Per-call deadline and settlement.
//!
//! A [`PendingRequest`] represents one in-flight call. It owns the call's
//! framer, its deadline, and a settlement slot that accepts exactly one
//! outcome: the first of boundary, diagnostic, process exit or timeout wins,
//! and every later event is ignored.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::framing::Framer;

/// One in-flight logical call.
#[derive(Debug)]
pub struct PendingRequest<F> {
    token: u64,
    framer: F,
    timeout: Duration,
    deadline: Instant,
    outcome: Option<Result<String>>,
}

impl<F: Framer> PendingRequest<F> {
    /// Arm a new call. The deadline starts now.
    pub fn new(token: u64, framer: F, timeout: Duration) -> Self {
        Self {
            token,
            framer,
            timeout,
            deadline: Instant::now() + timeout,
            outcome: None,
        }
    }

    /// Correlation token of this call.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Instant at which the call expires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Feed a stdout chunk to the framer.
    ///
    /// Returns the framed response, or `None` if the boundary has not been
    /// seen yet or the call is already settled.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<F::Output> {
        if self.is_settled() {
            return None;
        }
        self.framer.feed(chunk)
    }

    /// Settle the call. Returns `false` if it was already settled, in which
    /// case `outcome` is dropped.
    pub fn settle(&mut self, outcome: Result<String>) -> bool {
        if self.outcome.is_some() {
            debug!(token = self.token, "Ignoring event for settled call");
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Settle with a timeout error.
    pub fn expire(&mut self, channel: &'static str) -> bool {
        let after = self.timeout;
        self.settle(Err(Error::Timeout { channel, after }))
    }

    /// Whether an outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether the call settled with a timeout.
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, Some(Err(Error::Timeout { .. })))
    }

    /// Consume the call and return its outcome.
    pub fn into_outcome(self) -> Result<String> {
        self.outcome.unwrap_or_else(|| {
            Err(Error::Ipc(format!(
                "call {} finished without being settled",
                self.token
            )))
        })
    }
}
