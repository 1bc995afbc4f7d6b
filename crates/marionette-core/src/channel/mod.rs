//! Request/response channels over supervised interpreters.
//!
//! - `script` - script engine, sentinel framing, destructive timeouts
//! - `code` - code helper, JSON lines, non-destructive timeouts

mod code;
mod script;

use std::time::Instant;

use tracing::info;

pub use code::CodeChannel;
pub use script::ScriptChannel;

use crate::config::Config;
use crate::error::Result;

/// The two channels of a running agent.
pub struct Channels {
    /// Script engine channel.
    pub script: ScriptChannel,
    /// Code helper channel.
    pub code: CodeChannel,
}

/// Outcome of prewarming one channel.
#[derive(Debug)]
pub struct Prewarm {
    /// Result of starting the interpreter.
    pub result: Result<()>,
    /// Time spent, in milliseconds.
    pub elapsed_ms: u128,
}

impl Channels {
    /// Build both channels from configuration. Nothing is spawned yet.
    pub fn from_config(config: &Config) -> Self {
        Self {
            script: ScriptChannel::new(config.script.clone()),
            code: CodeChannel::new(config.code.clone()),
        }
    }

    /// Start both interpreters concurrently so that first use does not pay
    /// the cold-start cost. Returns the script and code outcomes.
    pub async fn prewarm_all(&self) -> (Prewarm, Prewarm) {
        let (script, code) = tokio::join!(
            timed(self.script.prewarm()),
            timed(self.code.prewarm())
        );
        info!(
            script_ms = script.elapsed_ms,
            code_ms = code.elapsed_ms,
            "Prewarm finished"
        );
        (script, code)
    }

    /// Stop both interpreters.
    pub async fn shutdown(&self) {
        tokio::join!(self.script.shutdown(), self.code.shutdown());
    }
}

/// Run a prewarm future and measure how long it took.
pub async fn timed(future: impl Future<Output = Result<()>>) -> Prewarm {
    let start = Instant::now();
    let result = future.await;
    Prewarm {
        result,
        elapsed_ms: start.elapsed().as_millis(),
    }
}
