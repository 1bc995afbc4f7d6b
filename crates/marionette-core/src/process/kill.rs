//! Out-of-band termination of an interpreter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe handle for killing an interpreter from outside its channel.
///
/// The interpreter is spawned as the leader of its own process group, so the
/// kill also reaches anything it started (a shell pipeline, a `do shell
/// script`). The supervisor notices the death on its next use.
#[derive(Debug, Clone)]
pub struct KillHandle {
    /// Process ID of the interpreter (and its process group).
    pid: u32,
    /// Whether the kill has been requested.
    killed: Arc<AtomicBool>,
}

impl KillHandle {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            pid,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process ID this handle targets.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the interpreter immediately. Only the first call has an effect.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(unix)]
        {
            let pid = self.pid as libc::pid_t;
            // SAFETY: kill(2) has no memory-safety preconditions. ESRCH for an
            // already-reaped group is harmless.
            unsafe {
                if libc::kill(-pid, libc::SIGKILL) != 0 {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }

        #[cfg(not(unix))]
        {
            tracing::warn!(
                pid = self.pid,
                "Out-of-band kill is not supported on this platform"
            );
        }
    }

    /// Check if kill has been requested.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_kill_flag() {
        // A pid that cannot exist; kill(2) just fails with ESRCH.
        let handle = KillHandle::new(i32::MAX as u32);
        let clone = handle.clone();
        assert!(!clone.is_killed());
        handle.kill();
        assert!(clone.is_killed());
        assert_eq!(clone.pid(), i32::MAX as u32);
    }
}
