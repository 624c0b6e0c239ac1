//! End-to-end bridge scenarios against real `/bin/sh` children.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use spout_common::{BridgeError, ChunkNotification, SessionKey, StreamTag};

use crate::bridge::{Bridge, Responder};
use crate::dispatch::{Dispatch, SingleThreadExecutor};
use crate::ipc::OpenResponse;
use crate::registry::SessionTable;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Channel-backed responder standing in for the frontend's pending call.
pub(crate) struct TestResponder(mpsc::Sender<Result<Value, String>>);

impl Responder for TestResponder {
    fn resolve(self, value: Value) {
        let _ = self.0.send(Ok(value));
    }

    fn reject(self, message: String) {
        let _ = self.0.send(Err(message));
    }
}

pub(crate) fn make_responder() -> (TestResponder, mpsc::Receiver<Result<Value, String>>) {
    let (tx, rx) = mpsc::channel();
    (TestResponder(tx), rx)
}

pub(crate) fn test_bridge() -> Bridge {
    let executor: Arc<dyn Dispatch> = Arc::new(SingleThreadExecutor::new().expect("executor"));
    Bridge::new(executor)
}

fn open(bridge: &Bridge, command: &str) -> OpenResponse {
    let (responder, rx) = make_responder();
    bridge.handle_open(&serde_json::to_string(&[command]).unwrap(), responder);
    let value = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("open response")
        .expect("open resolved");
    serde_json::from_value(value).expect("open payload")
}

fn open_err(bridge: &Bridge, request: &str) -> String {
    let (responder, rx) = make_responder();
    bridge.handle_open(request, responder);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("open response")
        .expect_err("open rejected")
}

/// Pull notifications per the single-consumer contract (one outstanding
/// receiver at a time) until the close record or the deadline.
pub(crate) fn collect_until_done(
    table: &SessionTable,
    key: SessionKey,
    deadline: Duration,
) -> Vec<ChunkNotification> {
    let mut chunks = Vec::new();
    let end = Instant::now() + deadline;
    'pull: while Instant::now() < end {
        let rx = match table.next(key) {
            Ok(rx) => rx,
            // Evicted after the close record was delivered.
            Err(BridgeError::InvalidArgument(_)) => break,
            Err(e) => panic!("unexpected pull error: {e}"),
        };
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => {
                    let done = chunk.done;
                    chunks.push(chunk);
                    if done {
                        break 'pull;
                    }
                    continue 'pull; // re-arm for the next notification
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= end {
                        break 'pull;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break 'pull,
            }
        }
    }
    chunks
}

fn concat_stream(chunks: &[ChunkNotification], tag: StreamTag) -> String {
    chunks
        .iter()
        .filter_map(|c| c.value.as_ref())
        .filter(|(_, t)| *t == tag)
        .map(|(text, _)| text.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn echo_hello_round_trip() {
    let bridge = test_bridge();
    let opened = open(&bridge, "echo hello");
    assert!(opened.pid > 0);
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert_eq!(concat_stream(&chunks, StreamTag::Stdout), "hello\n");
    assert_eq!(concat_stream(&chunks, StreamTag::Stderr), "");
    assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
}

#[test]
fn stderr_chunks_are_tagged_two() {
    let bridge = test_bridge();
    let opened = open(&bridge, "echo oops 1>&2");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert_eq!(concat_stream(&chunks, StreamTag::Stderr), "oops\n");
    assert_eq!(concat_stream(&chunks, StreamTag::Stdout), "");
}

#[test]
fn done_is_delivered_exactly_once_even_for_silent_children() {
    let bridge = test_bridge();
    let opened = open(&bridge, "true");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].done);

    // The close record is emitted once, by the last stream to end, and
    // the session is gone.
    assert!(matches!(
        bridge.table().next(key).unwrap_err(),
        BridgeError::InvalidArgument(_)
    ));
    assert_eq!(bridge.table().session_count(), 0);
}

#[test]
fn cat_write_round_trip_then_close() {
    let bridge = test_bridge();
    let opened = open(&bridge, "cat");
    let key = opened.fds[0];

    let (responder, rx) = make_responder();
    bridge.handle_write(&format!("[{key}, \"ping\\n\"]"), responder);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("write response")
        .expect("write resolved");

    let pull = bridge.table().next(key).expect("arm");
    let chunk = pull.recv_timeout(Duration::from_secs(5)).expect("chunk");
    assert_eq!(chunk, ChunkNotification::chunk("ping\n", StreamTag::Stdout));

    let [fd_in, fd_out, fd_err] = [opened.fds[0], opened.fds[1], opened.fds[2]];
    let (responder, rx) = make_responder();
    bridge.handle_close(&format!("[{fd_in}, {fd_out}, {fd_err}]"), responder);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("close response")
        .expect("close resolved");
}

#[test]
fn stdout_concatenation_preserves_child_output() {
    let bridge = test_bridge();
    let opened = open(&bridge, "printf abc; sleep 0.05; printf def");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert_eq!(concat_stream(&chunks, StreamTag::Stdout), "abcdef");
}

#[test]
fn natural_teardown_purges_descriptor_index() {
    let bridge = test_bridge();
    let opened = open(&bridge, "true");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert!(chunks.iter().any(|c| c.done));

    // Eviction runs on the dispatch thread right after the close record is
    // handed over; give it a moment to finish purging.
    let end = Instant::now() + Duration::from_secs(5);
    while Instant::now() < end {
        if bridge.table().session_count() == 0 && bridge.table().descriptor_count() == 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!(
        "stale entries after teardown: {} sessions, {} descriptors",
        bridge.table().session_count(),
        bridge.table().descriptor_count()
    );
}

#[test]
fn large_output_splits_into_chunks_without_loss() {
    let bridge = test_bridge();
    let opened = open(&bridge, "yes x | head -n 3000");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(10));
    let data_chunks = chunks.iter().filter(|c| c.value.is_some()).count();
    assert!(data_chunks >= 2, "one read swallowed 6000 bytes");
    assert_eq!(concat_stream(&chunks, StreamTag::Stdout), "x\n".repeat(3000));
}

#[test]
fn open_empty_command_rejects_without_leaking() {
    let bridge = test_bridge();
    let message = open_err(&bridge, r#"[""]"#);
    assert!(message.contains("invalid argument"), "got: {message}");
    assert_eq!(bridge.table().session_count(), 0);
    assert_eq!(bridge.table().descriptor_count(), 0);
}

#[test]
fn open_missing_command_rejects_without_leaking() {
    let bridge = test_bridge();
    let message = open_err(&bridge, "[]");
    assert!(message.contains("invalid argument"), "got: {message}");
    assert_eq!(bridge.table().descriptor_count(), 0);
}

#[test]
fn double_close_fails_second_call_without_affecting_others() {
    let bridge = test_bridge();
    let victim = open(&bridge, "cat");
    let bystander = open(&bridge, "cat");

    let request = serde_json::to_string(&victim.fds).unwrap();
    let (responder, rx) = make_responder();
    bridge.handle_close(&request, responder);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("close response")
        .expect("first close resolves");

    let (responder, rx) = make_responder();
    bridge.handle_close(&request, responder);
    let message = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("close response")
        .expect_err("second close rejects");
    assert!(message.contains("close"), "got: {message}");

    // The bystander session still works end to end.
    let key = bystander.fds[0];
    let (responder, rx) = make_responder();
    bridge.handle_write(&format!("[{key}, \"still alive\\n\"]"), responder);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("write response")
        .expect("bystander write resolves");
    let pull = bridge.table().next(key).expect("arm");
    let chunk = pull.recv_timeout(Duration::from_secs(5)).expect("chunk");
    assert_eq!(
        chunk,
        ChunkNotification::chunk("still alive\n", StreamTag::Stdout)
    );
}

#[test]
fn write_after_teardown_fails_with_write_failed() {
    let bridge = test_bridge();
    let opened = open(&bridge, "true");
    let key = opened.fds[0];

    let chunks = collect_until_done(bridge.table(), key, Duration::from_secs(5));
    assert!(chunks.iter().any(|c| c.done));

    // Release whatever the readers left behind.
    let request = serde_json::to_string(&opened.fds).unwrap();
    let (responder, rx) = make_responder();
    bridge.handle_close(&request, responder);
    let _ = rx.recv_timeout(Duration::from_secs(5)).expect("close response");

    let err = bridge.write(key, "too late\n").unwrap_err();
    assert!(matches!(err, BridgeError::WriteFailed(_)));
}

#[test]
fn write_validates_arguments() {
    let bridge = test_bridge();

    let (responder, rx) = make_responder();
    bridge.handle_write(r#"[0, "msg"]"#, responder);
    let message = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("response")
        .expect_err("zero fd rejected");
    assert!(message.contains("invalid argument"), "got: {message}");

    let opened = open(&bridge, "cat");
    let key = opened.fds[0];
    let (responder, rx) = make_responder();
    bridge.handle_write(&format!("[{key}, \"\"]"), responder);
    let message = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("response")
        .expect_err("empty message rejected");
    assert!(message.contains("invalid argument"), "got: {message}");
}

#[test]
fn close_validates_arguments() {
    let bridge = test_bridge();
    let (responder, rx) = make_responder();
    bridge.handle_close("[0, 5, 6]", responder);
    let message = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("response")
        .expect_err("zero fd rejected");
    assert!(message.contains("invalid argument"), "got: {message}");
}

#[test]
fn independent_bridges_do_not_share_sessions() {
    let first = test_bridge();
    let second = test_bridge();

    let opened = open(&first, "cat");
    let key = opened.fds[0];

    assert!(second.table().next(key).is_err());
    assert_eq!(second.table().session_count(), 0);
    assert_eq!(first.table().session_count(), 1);
}

#[test]
fn exit_status_is_queryable_while_session_is_live() {
    let bridge = test_bridge();
    let opened = open(&bridge, "cat");
    let key = opened.fds[0];

    // cat is blocked on stdin, so it cannot have exited yet.
    assert!(bridge.table().exit_status(key).expect("query").is_none());

    let request = serde_json::to_string(&opened.fds).unwrap();
    let (responder, rx) = make_responder();
    bridge.handle_close(&request, responder);
    let _ = rx.recv_timeout(Duration::from_secs(5)).expect("close response");
}
