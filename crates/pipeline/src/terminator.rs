//! OS-level termination of job processes.

use inkdex_core::capability::ProcessTerminator;
use inkdex_core::types::ProcessHandle;

/// Sends `SIGTERM` to the process id stored as the job's handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

impl ProcessTerminator for SignalTerminator {
    #[cfg(unix)]
    fn terminate(&self, handle: ProcessHandle) -> bool {
        send_signal(handle, libc::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&self, handle: ProcessHandle) -> bool {
        tracing::warn!(handle, "Process termination is not supported on this platform");
        false
    }
}

/// Deliver `signal` to `pid`. Returns `false` for pids that do not fit the
/// platform type, non-positive pids, and failed `kill` calls.
#[cfg(unix)]
pub(crate) fn send_signal(pid: ProcessHandle, signal: libc::c_int) -> bool {
    // 0 and negative values address process groups; never do that.
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) has no memory-safety preconditions; pid is a plain
    // positive integer and signal is one of libc's constants.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(pid, signal, error = %err, "kill failed");
        return false;
    }
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn refuses_group_and_invalid_pids() {
        assert!(!SignalTerminator.terminate(0));
        assert!(!SignalTerminator.terminate(-1));
        assert!(!SignalTerminator.terminate(i64::MAX));
    }

    #[tokio::test]
    async fn terminates_a_live_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid") as ProcessHandle;

        assert!(SignalTerminator.terminate(pid));
        let status = child.wait().await.expect("wait");
        assert!(!status.success());
    }
}
