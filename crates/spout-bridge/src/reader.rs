//! Stream readers: one blocking drain loop per child output stream.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use spout_common::{ChunkNotification, SessionKey, StreamTag};
use tracing::{debug, trace};

use crate::dispatch::Dispatch;
use crate::pipe::FdGuard;
use crate::registry::SessionTable;

/// Fixed read size; chunking may split output but never reorders it.
pub const CHUNK_SIZE: usize = 1024;

/// Start the stdout and stderr readers for a session.
///
/// Each reader owns one output guard and additionally knows the stdin
/// guard. On end of stream it releases stdin and its own guard only;
/// the peer's descriptor stays open until the peer has drained to EOF,
/// so bytes still buffered in the slower pipe are never discarded. The
/// child's exit delivers that EOF on its own. The readers share a
/// countdown so the close record is dispatched once, by whichever loop
/// finishes last, after every data chunk from both streams.
pub fn spawn_stream_readers(
    table: Arc<SessionTable>,
    dispatch: Arc<dyn Dispatch>,
    key: SessionKey,
    stdin: Arc<FdGuard>,
    stdout: Arc<FdGuard>,
    stderr: Arc<FdGuard>,
) -> io::Result<()> {
    let live_streams = Arc::new(AtomicUsize::new(2));
    let _ = spawn_reader(
        StreamTag::Stdout,
        stdout,
        stdin.clone(),
        live_streams.clone(),
        key,
        table.clone(),
        dispatch.clone(),
    )?;
    let _ = spawn_reader(
        StreamTag::Stderr,
        stderr,
        stdin,
        live_streams,
        key,
        table,
        dispatch,
    )?;
    Ok(())
}

fn spawn_reader(
    tag: StreamTag,
    own: Arc<FdGuard>,
    stdin: Arc<FdGuard>,
    live_streams: Arc<AtomicUsize>,
    key: SessionKey,
    table: Arc<SessionTable>,
    dispatch: Arc<dyn Dispatch>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("stream-reader-{}-{}", tag.name(), own.raw()))
        .spawn(move || {
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match own.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let chunk = ChunkNotification::chunk(text, tag);
                        let table = table.clone();
                        // The next read waits until this enqueue returns:
                        // delivery order equals read order, and the pipe
                        // itself is the only buffer ahead of the consumer.
                        dispatch.dispatch(Box::new(move || table.notify(key, chunk)));
                    }
                    Err(e) => {
                        // Read errors (including EBADF from a concurrent
                        // close) end the stream the same as EOF.
                        debug!(key, stream = %tag, error = %e, "read error, treating as end of stream");
                        break;
                    }
                }
            }

            debug!(key, stream = %tag, "end of read, releasing session descriptors");

            // Both readers close stdin; losing that race is benign. Each
            // reader closes only its own stream so the peer can finish
            // draining whatever its pipe still holds.
            if let Err(e) = stdin.close() {
                trace!(key, fd = stdin.raw(), error = %e, "stdin already released");
            }
            if let Err(e) = own.close() {
                trace!(key, fd = own.raw(), error = %e, "stream already released");
            }

            // Only the last stream to end emits the close record; by then
            // every data chunk from both streams is already in the FIFO
            // dispatch queue ahead of it.
            if live_streams.fetch_sub(1, Ordering::AcqRel) == 1 {
                dispatch.dispatch(Box::new(move || {
                    table.notify(key, ChunkNotification::done())
                }));
            }
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
