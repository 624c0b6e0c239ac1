//! Process launcher: pipes, spawn, and parent-side guard wiring.

use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use spout_common::BridgeError;
use tracing::debug;

use crate::pipe::{into_owned_fd, FdGuard, PipeTriple};

/// A freshly spawned command with its parent-side descriptors guarded.
#[derive(Debug)]
pub struct SpawnedSession {
    pub stdin: Arc<FdGuard>,
    pub stdout: Arc<FdGuard>,
    pub stderr: Arc<FdGuard>,
    pub pid: u32,
    pub child: Child,
}

/// The platform command interpreter and its "run this string" flag.
pub fn interpreter() -> (&'static str, &'static str) {
    #[cfg(unix)]
    {
        ("/bin/sh", "-c")
    }

    #[cfg(windows)]
    {
        ("cmd", "/C")
    }
}

/// Spawn `command` through the platform interpreter with all three
/// standard streams piped.
///
/// Failure order matches the protocol contract: an empty command is
/// rejected before anything is allocated, pipe allocation failure maps to
/// `ResourceExhausted`, and a failed spawn maps to `SpawnFailed` with the
/// already-allocated pipes released by drop. A command that exits before
/// writing anything is still a successful spawn; its closure is observed
/// by the stream readers, not here.
pub fn spawn_session(command: &str) -> Result<SpawnedSession, BridgeError> {
    if command.is_empty() {
        return Err(BridgeError::InvalidArgument("no command argument".into()));
    }

    let pipes = PipeTriple::allocate().map_err(|e| BridgeError::ResourceExhausted(e.to_string()))?;

    let (shell, flag) = interpreter();
    let child = Command::new(shell)
        .arg(flag)
        .arg(command)
        .stdin(Stdio::from(pipes.child_stdin))
        .stdout(Stdio::from(pipes.child_stdout))
        .stderr(Stdio::from(pipes.child_stderr))
        .spawn()
        .map_err(|e| BridgeError::SpawnFailed(e.to_string()))?;

    // The child-side ends were consumed by the Command and are closed on
    // the parent side once spawn returns; only the guarded ends remain.
    let pid = child.id();
    let session = SpawnedSession {
        stdin: Arc::new(FdGuard::new(into_owned_fd(pipes.stdin_write))),
        stdout: Arc::new(FdGuard::new(into_owned_fd(pipes.stdout_read))),
        stderr: Arc::new(FdGuard::new(into_owned_fd(pipes.stderr_read))),
        pid,
        child,
    };

    debug!(
        pid,
        stdin = session.stdin.raw(),
        stdout = session.stdout.raw(),
        stderr = session.stderr.raw(),
        "spawned command"
    );
    Ok(session)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_invalid_argument() {
        let err = spawn_session("").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    #[cfg(unix)]
    fn spawn_yields_pid_and_distinct_guards() {
        let mut session = spawn_session("true").expect("spawn true");
        assert!(session.pid > 0);
        assert_ne!(session.stdin.raw(), session.stdout.raw());
        assert_ne!(session.stdout.raw(), session.stderr.raw());

        session.child.wait().expect("wait");
    }

    #[test]
    #[cfg(unix)]
    fn immediately_exiting_command_still_spawns() {
        // The child may be gone before we look at it; the session is valid
        // regardless and closure shows up as EOF on the output pipes.
        let mut session = spawn_session("exit 3").expect("spawn");
        let status = session.child.wait().expect("wait");
        assert_eq!(status.code(), Some(3));

        let mut buf = [0u8; 8];
        assert_eq!(session.stdout.read(&mut buf).expect("read"), 0);
    }
}
