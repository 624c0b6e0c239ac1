//! Session registry: the bridge-owned table of live sessions.
//!
//! Keyed by the stdin write-end descriptor. Mutated from the `open`
//! handler (insertion), the privileged thread (`notify`), and whichever
//! handler thread resolves wire descriptors — so everything sits behind
//! mutexes on the table, not on a process-wide global.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use spout_common::{BridgeError, ChunkNotification, SessionKey};
use tracing::{debug, trace};

use crate::launcher::SpawnedSession;
use crate::pipe::FdGuard;

/// One spawned command and its bridge-side state.
struct Session {
    stdin: Arc<FdGuard>,
    stdout: Arc<FdGuard>,
    stderr: Arc<FdGuard>,
    pid: u32,
    child: Child,
    /// Set when the close record has been accepted; any later
    /// notification is dropped.
    closed: bool,
    /// Chunks that arrived while no consumer was armed, in arrival order.
    queue: VecDeque<ChunkNotification>,
    /// The capacity-1 handoff to the currently awaiting consumer, if any.
    /// Taken (cleared) immediately before delivery.
    consumer: Option<SyncSender<ChunkNotification>>,
}

/// Thread-safe map of sessions plus a wire-fd -> guard index.
///
/// Owned by a [`crate::Bridge`] instance; independent bridges get
/// independent tables.
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionKey, Session>>,
    descriptors: Mutex<HashMap<RawFd, Arc<FdGuard>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn descriptors(&self) -> MutexGuard<'_, HashMap<RawFd, Arc<FdGuard>>> {
        self.descriptors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a spawned session. Returns its key (the stdin write fd).
    pub fn insert(&self, spawned: SpawnedSession) -> SessionKey {
        let key = spawned.stdin.raw();
        {
            let mut descriptors = self.descriptors();
            descriptors.insert(spawned.stdin.raw(), spawned.stdin.clone());
            descriptors.insert(spawned.stdout.raw(), spawned.stdout.clone());
            descriptors.insert(spawned.stderr.raw(), spawned.stderr.clone());
        }
        let session = Session {
            stdin: spawned.stdin,
            stdout: spawned.stdout,
            stderr: spawned.stderr,
            pid: spawned.pid,
            child: spawned.child,
            closed: false,
            queue: VecDeque::new(),
            consumer: None,
        };
        debug!(key, pid = session.pid, "session registered");
        self.sessions().insert(key, session);
        key
    }

    /// Privileged-thread entry point: deliver one chunk notification.
    ///
    /// An unknown key is a late notification from a reader that raced with
    /// eviction — a silent no-op. The armed consumer, if any, is cleared
    /// before delivery so each arm observes at most one notification.
    pub fn notify(&self, key: SessionKey, chunk: ChunkNotification) {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(&key) else {
            trace!(key, "notification for unknown session");
            return;
        };
        if session.closed {
            trace!(key, "notification after close record");
            return;
        }
        if chunk.done {
            session.closed = true;
        }

        if let Some(tx) = session.consumer.take() {
            if let Err(mpsc::TrySendError::Disconnected(chunk)) = tx.try_send(chunk) {
                // The puller vanished; keep the chunk for the next one.
                session.queue.push_back(chunk);
            }
        } else {
            session.queue.push_back(chunk);
        }

        if session.closed && session.queue.is_empty() {
            if let Some(mut evicted) = sessions.remove(&key) {
                let _ = evicted.child.try_wait();
                self.purge_descriptors(&evicted);
                debug!(key, "session evicted");
            }
        }
    }

    /// Arm the single pending consumer for `key`.
    ///
    /// Returns a receiver that yields exactly one chunk. Buffered chunks
    /// are served first; arming while a pull is outstanding is a usage
    /// error (`ConsumerBusy`). Once the close record has been delivered
    /// the session is gone and the key is unknown.
    pub fn next(&self, key: SessionKey) -> Result<Receiver<ChunkNotification>, BridgeError> {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(&key) else {
            return Err(BridgeError::InvalidArgument(format!(
                "unknown session: {key}"
            )));
        };
        if session.consumer.is_some() {
            return Err(BridgeError::ConsumerBusy);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        if let Some(chunk) = session.queue.pop_front() {
            let _ = tx.send(chunk);
            if session.closed && session.queue.is_empty() {
                if let Some(mut evicted) = sessions.remove(&key) {
                    let _ = evicted.child.try_wait();
                    self.purge_descriptors(&evicted);
                    debug!(key, "session evicted");
                }
            }
        } else {
            session.consumer = Some(tx);
        }
        Ok(rx)
    }

    /// Drop a session outright. Used to roll back a failed `open`.
    pub(crate) fn evict(&self, key: SessionKey) {
        if let Some(mut session) = self.sessions().remove(&key) {
            let _ = session.child.try_wait();
            self.purge_descriptors(&session);
            debug!(key, "session evicted");
        }
    }

    /// Drop a session's three entries from the wire-fd index. The `close`
    /// handler may already have taken some of them; removal is a no-op
    /// then.
    fn purge_descriptors(&self, session: &Session) {
        let mut descriptors = self.descriptors();
        descriptors.remove(&session.stdin.raw());
        descriptors.remove(&session.stdout.raw());
        descriptors.remove(&session.stderr.raw());
    }

    /// Resolve a wire descriptor number to its guard, if the bridge owns it.
    pub fn descriptor(&self, fd: RawFd) -> Option<Arc<FdGuard>> {
        self.descriptors().get(&fd).cloned()
    }

    /// Remove a wire descriptor from the index, handing back its guard.
    pub fn take_descriptor(&self, fd: RawFd) -> Option<Arc<FdGuard>> {
        self.descriptors().remove(&fd)
    }

    /// Child process id for a live session.
    pub fn pid(&self, key: SessionKey) -> Option<u32> {
        self.sessions().get(&key).map(|s| s.pid)
    }

    /// The three parent-side descriptor numbers for a live session.
    pub fn descriptor_triple(&self, key: SessionKey) -> Option<[RawFd; 3]> {
        self.sessions()
            .get(&key)
            .map(|s| [s.stdin.raw(), s.stdout.raw(), s.stderr.raw()])
    }

    /// Non-blocking exit-status query for an external collaborator.
    pub fn exit_status(&self, key: SessionKey) -> spout_common::Result<Option<ExitStatus>> {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(&key) else {
            return Err(BridgeError::InvalidArgument(format!("unknown session: {key}")).into());
        };
        Ok(session.child.try_wait()?)
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors().len()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
