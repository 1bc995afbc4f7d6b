//! Supervised channels to long-lived automation interpreters.
//!
//! This crate provides:
//! - Process supervision with lazy spawn, readiness handshake and respawn
//! - Sentinel framing for a script-automation engine
//! - JSON-lines framing with resynchronization for a code helper
//! - Per-call deadlines that settle every call exactly once
//! - Classification of interpreter diagnostics into actionable errors
//!
//! ```no_run
//! # async fn demo() -> marionette_core::Result<()> {
//! use marionette_core::{Channels, Config};
//!
//! let channels = Channels::from_config(&Config::load()?);
//! let _ = channels.prewarm_all().await;
//! let title = channels
//!     .script
//!     .execute("tell application \"Finder\" to get name of front window")
//!     .await?;
//! let output = channels.code.execute("print(1 + 1)").await?;
//! # let _ = (title, output);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod classify;
pub mod config;
pub mod error;
pub mod framing;
pub mod governor;
pub mod process;
pub mod protocol;

pub use channel::{Channels, CodeChannel, Prewarm, ScriptChannel};
pub use classify::{ErrorClass, classify};
pub use config::{CodeHelperConfig, Config, ScriptEngineConfig, ScriptMode};
pub use error::{Error, Result};
pub use process::KillHandle;
