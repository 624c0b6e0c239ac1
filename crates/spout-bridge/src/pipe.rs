//! Pipe allocation and close-once descriptor guards.
//!
//! Every parent-side descriptor is owned by a [`FdGuard`]: an idempotent
//! close-once handle that tolerates the teardown race between the two
//! stream readers and the frontend's `close` call. The raw fd number is
//! recorded at construction and stays valid as a map key and wire value
//! even after the descriptor is closed.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Mutex;

/// Why a [`FdGuard::close`] call did not release a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("already closed")]
    AlreadyClosed,

    #[error(transparent)]
    Os(#[from] io::Error),
}

/// Close-once owner of a single descriptor.
///
/// The descriptor transitions open -> closed exactly once; every later
/// `close` reports [`CloseError::AlreadyClosed`] instead of issuing a
/// second `close(2)`.
pub struct FdGuard {
    raw: RawFd,
    slot: Mutex<Option<OwnedFd>>,
}

impl FdGuard {
    pub fn new(fd: OwnedFd) -> Self {
        let raw = fd.as_raw_fd();
        Self {
            raw,
            slot: Mutex::new(Some(fd)),
        }
    }

    /// The descriptor number this guard was created with.
    pub fn raw(&self) -> RawFd {
        self.raw
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Blocking read into `buf`.
    ///
    /// The lock is not held across the read, so another thread may close
    /// the guard while this one is blocked; the resulting `EBADF` on the
    /// next attempt is an error the caller folds into end-of-stream. The
    /// closed check and the raw read are not atomic either: a concurrent
    /// close can let the OS reuse the descriptor number before the read
    /// lands, directing it at an unrelated descriptor. Only a
    /// frontend-initiated close races with a live reader, and that close
    /// is tearing the whole session down.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let n = unsafe { libc::read(self.raw, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Blocking write of the whole buffer, retrying on `EINTR`.
    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            if self.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "descriptor closed",
                ));
            }
            let remaining = &data[written..];
            let n = unsafe {
                libc::write(
                    self.raw,
                    remaining.as_ptr() as *const libc::c_void,
                    remaining.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            written += n as usize;
        }
        Ok(())
    }

    /// Release the descriptor. At most one call succeeds.
    pub fn close(&self) -> Result<(), CloseError> {
        let fd = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match fd {
            None => Err(CloseError::AlreadyClosed),
            Some(fd) => {
                let raw = fd.into_raw_fd();
                if unsafe { libc::close(raw) } == -1 {
                    Err(CloseError::Os(io::Error::last_os_error()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl std::fmt::Debug for FdGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdGuard")
            .field("raw", &self.raw)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The three descriptor pairs created before spawn.
///
/// The `child_*` ends are handed to the spawned process as its standard
/// streams; the parent-side ends stay here until the launcher wraps them
/// in guards. Dropping the triple releases whatever has not been consumed,
/// which is what rolls back a partially failed `open`.
pub struct PipeTriple {
    pub child_stdin: os_pipe::PipeReader,
    pub stdin_write: os_pipe::PipeWriter,
    pub child_stdout: os_pipe::PipeWriter,
    pub stdout_read: os_pipe::PipeReader,
    pub child_stderr: os_pipe::PipeWriter,
    pub stderr_read: os_pipe::PipeReader,
}

impl PipeTriple {
    /// Allocate the stdin, stdout, and stderr pipes.
    ///
    /// A failed allocation drops the pairs created so far before mapping
    /// the error, so the failure path leaks nothing.
    pub fn allocate() -> io::Result<Self> {
        let (child_stdin, stdin_write) = os_pipe::pipe()?;
        let (stdout_read, child_stdout) = os_pipe::pipe()?;
        let (stderr_read, child_stderr) = os_pipe::pipe()?;
        Ok(Self {
            child_stdin,
            stdin_write,
            child_stdout,
            stdout_read,
            child_stderr,
            stderr_read,
        })
    }
}

/// Convert a pipe end into an `OwnedFd` without an extra dup.
pub(crate) fn into_owned_fd(fd: impl IntoRawFd) -> OwnedFd {
    unsafe { OwnedFd::from_raw_fd(fd.into_raw_fd()) }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
