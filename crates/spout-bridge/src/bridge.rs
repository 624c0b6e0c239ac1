//! Bridge protocol handlers: `open`, `write`, `close`, and `notify`.

use std::os::fd::RawFd;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde_json::Value;
use spout_common::{BridgeError, ChunkNotification, SessionKey};
use tracing::{debug, warn};

use crate::dispatch::Dispatch;
use crate::ipc::{self, OpenResponse};
use crate::launcher;
use crate::reader;
use crate::registry::SessionTable;

/// Resolves or rejects one pending frontend call, exactly once.
///
/// Consumed by value so a handler cannot answer the same request twice;
/// the embedding runtime supplies the implementation that carries the
/// request sequence id back across the boundary.
pub trait Responder {
    fn resolve(self, value: Value);
    fn reject(self, message: String);
}

/// One process bridge instance: a session table plus the privileged-thread
/// dispatcher all notifications are marshaled through.
pub struct Bridge {
    table: Arc<SessionTable>,
    dispatch: Arc<dyn Dispatch>,
}

impl Bridge {
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            table: Arc::new(SessionTable::new()),
            dispatch,
        }
    }

    /// The session table, for embedders that pull notifications directly.
    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    // -- open ---------------------------------------------------------------

    /// `open(command)`: spawn a command and register its session.
    pub fn handle_open<R: Responder>(&self, request: &str, responder: R) {
        let command = match ipc::parse_open(request) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "open rejected");
                responder.reject(e.to_string());
                return;
            }
        };
        match self.open(&command) {
            Ok(response) => {
                responder.resolve(serde_json::to_value(&response).unwrap_or(Value::Null))
            }
            Err(e) => {
                warn!(command = %command, error = %e, "open failed");
                responder.reject(e.to_string());
            }
        }
    }

    /// Spawn `command`, start both stream readers, and register the session.
    pub fn open(&self, command: &str) -> Result<OpenResponse, BridgeError> {
        let spawned = launcher::spawn_session(command)?;
        let (stdin, stdout, stderr) = (
            spawned.stdin.clone(),
            spawned.stdout.clone(),
            spawned.stderr.clone(),
        );
        let response = OpenResponse {
            fds: [stdin.raw(), stdout.raw(), stderr.raw()],
            pid: spawned.pid,
        };
        let key = self.table.insert(spawned);

        if let Err(e) = reader::spawn_stream_readers(
            self.table.clone(),
            self.dispatch.clone(),
            key,
            stdin,
            stdout,
            stderr,
        ) {
            // Roll back: nothing may keep descriptors alive on the failure
            // path of open.
            self.rollback_session(key, response.fds);
            return Err(BridgeError::SpawnFailed(format!(
                "failed to start stream readers: {e}"
            )));
        }

        debug!(key, pid = response.pid, "session open");
        Ok(response)
    }

    fn rollback_session(&self, key: SessionKey, fds: [RawFd; 3]) {
        for fd in fds {
            if let Some(guard) = self.table.take_descriptor(fd) {
                let _ = guard.close();
            }
        }
        self.table.evict(key);
    }

    // -- write --------------------------------------------------------------

    /// `write(sessionKey, message)`: blocking write to the child's stdin.
    pub fn handle_write<R: Responder>(&self, request: &str, responder: R) {
        let result = ipc::parse_write(request).and_then(|(fd, message)| self.write(fd, &message));
        match result {
            Ok(()) => responder.resolve(Value::Null),
            Err(e) => {
                warn!(error = %e, "write rejected");
                responder.reject(e.to_string());
            }
        }
    }

    /// Write `message` to the stdin descriptor `fd`.
    ///
    /// Liveness is not consulted; a closed or unknown descriptor fails the
    /// write the same way a broken pipe does. Blocks the calling thread
    /// until the pipe accepts the bytes.
    pub fn write(&self, fd: SessionKey, message: &str) -> Result<(), BridgeError> {
        if fd == 0 {
            return Err(BridgeError::InvalidArgument("fd".into()));
        }
        if message.is_empty() {
            return Err(BridgeError::InvalidArgument("msg".into()));
        }
        let guard = self
            .table
            .descriptor(fd)
            .ok_or_else(|| BridgeError::WriteFailed(format!("unknown descriptor: {fd}")))?;
        guard
            .write_all(message.as_bytes())
            .map_err(|e| BridgeError::WriteFailed(e.to_string()))
    }

    // -- close --------------------------------------------------------------

    /// `close(stdinWrite, stdoutRead, stderrRead)`: release all three.
    pub fn handle_close<R: Responder>(&self, request: &str, responder: R) {
        let result = ipc::parse_close(request).and_then(|fds| self.close(fds));
        match result {
            Ok(()) => responder.resolve(Value::Null),
            Err(e) => {
                warn!(error = %e, "close rejected");
                responder.reject(e.to_string());
            }
        }
    }

    /// Close each descriptor independently; all three attempts are made
    /// even after a failure, and failures (including already-closed and
    /// unknown descriptors) are reported once, aggregated. Descriptors
    /// cannot be un-closed, so partial success stands.
    pub fn close(&self, fds: [RawFd; 3]) -> Result<(), BridgeError> {
        if fds.iter().any(|fd| *fd == 0) {
            return Err(BridgeError::InvalidArgument("fds".into()));
        }

        let mut failures = Vec::new();
        for fd in fds {
            match self.table.take_descriptor(fd) {
                None => failures.push(format!("fd {fd}: unknown or already closed")),
                Some(guard) => {
                    if let Err(e) = guard.close() {
                        failures.push(format!("fd {fd}: {e}"));
                    }
                }
            }
        }

        if failures.is_empty() {
            debug!(fd_in = fds[0], fd_out = fds[1], fd_err = fds[2], "session descriptors closed");
            Ok(())
        } else {
            Err(BridgeError::CloseFailed(failures.join(", ")))
        }
    }

    // -- notify -------------------------------------------------------------

    /// Privileged-thread entry point for chunk delivery; embedders that
    /// evaluate script instead can render the same notification with
    /// [`ipc::js_notify_call`].
    pub fn notify(&self, key: SessionKey, chunk: ChunkNotification) {
        self.table.notify(key, chunk);
    }

    /// Arm the single pending consumer for a session.
    pub fn next(&self, key: SessionKey) -> Result<Receiver<ChunkNotification>, BridgeError> {
        self.table.next(key)
    }
}
