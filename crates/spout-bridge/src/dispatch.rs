//! Privileged-thread dispatch.
//!
//! The embedding runtime's scripting state may only be mutated from one
//! thread. Everything the reader threads want delivered crosses through a
//! [`Dispatch`], which schedules closures onto that thread in FIFO order.

use std::io;
use std::sync::mpsc;
use std::thread;

use tracing::debug;

/// A unit of work scheduled onto the privileged thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedules closures for execution on the privileged thread.
///
/// Embedders adapt their UI-loop dispatch primitive; tests and the CLI use
/// [`SingleThreadExecutor`]. `dispatch` only enqueues — it must not block
/// on the job running.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// A dedicated thread draining jobs in submission order.
///
/// Dropping the executor stops accepting work, drains what was already
/// queued, and joins the thread.
pub struct SingleThreadExecutor {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SingleThreadExecutor {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("bridge-dispatch".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!("dispatch thread exiting");
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl Dispatch for SingleThreadExecutor {
    fn dispatch(&self, job: Job) {
        // A send after shutdown began is discarded, like a dispatch against
        // a window that is already gone.
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
