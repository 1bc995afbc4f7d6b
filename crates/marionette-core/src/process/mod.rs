//! Supervision of long-lived interpreter processes.
//!
//! ```text
//! Supervisor (one per channel)
//!     │
//!     └── InterpreterProcess (at most one live)
//!             │
//!             ├── stdin   <- requests
//!             ├── stdout  -> pump task -> chunk channel
//!             ├── stderr  -> pump task -> chunk channel
//!             └── KillHandle (SIGKILL to the process group)
//! ```

mod kill;
mod supervisor;

pub(crate) use supervisor::resolve_program;
pub use kill::KillHandle;
pub use supervisor::{
    InterpreterProcess, InterpreterSpec, ProcessState, Readiness, StreamEvent, Supervisor,
};
