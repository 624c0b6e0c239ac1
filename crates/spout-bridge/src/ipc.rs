//! Wire payloads between the frontend and the bridge handlers.
//!
//! Requests arrive as JSON argument arrays, the shape the embedding
//! runtime produces for a bound native function call:
//! - `open`:  `["command"]`
//! - `write`: `[fd, "message"]`
//! - `close`: `[fdIn, fdOut, fdErr]`
//!
//! Responses flow back through the caller's [`crate::Responder`];
//! notifications are pushed by evaluating [`js_notify_call`] output (or by
//! pulling from the session table directly in headless embeddings).

use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spout_common::{BridgeError, ChunkNotification, SessionKey};

/// Success payload of `open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenResponse {
    /// `[stdinWrite, stdoutRead, stderrRead]` — the session key is `fds[0]`.
    pub fds: [RawFd; 3],
    /// Child process id.
    pub pid: u32,
}

fn parse_args(request: &str) -> Result<Vec<Value>, BridgeError> {
    serde_json::from_str(request)
        .map_err(|e| BridgeError::InvalidArgument(format!("malformed request: {e}")))
}

/// Extract the command string from an `open` request.
pub fn parse_open(request: &str) -> Result<String, BridgeError> {
    let args = parse_args(request)?;
    match args.first() {
        Some(Value::String(command)) if !command.is_empty() => Ok(command.clone()),
        _ => Err(BridgeError::InvalidArgument("no command argument".into())),
    }
}

/// Extract `(fd, message)` from a `write` request.
pub fn parse_write(request: &str) -> Result<(SessionKey, String), BridgeError> {
    let args = parse_args(request)?;
    let fd = args
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| BridgeError::InvalidArgument("fd".into()))? as SessionKey;
    let message = match args.get(1) {
        Some(Value::String(message)) => message.clone(),
        _ => return Err(BridgeError::InvalidArgument("msg".into())),
    };
    Ok((fd, message))
}

/// Extract the descriptor triple from a `close` request.
pub fn parse_close(request: &str) -> Result<[RawFd; 3], BridgeError> {
    let args = parse_args(request)?;
    let mut fds = [0; 3];
    for (i, fd) in fds.iter_mut().enumerate() {
        *fd = args
            .get(i)
            .and_then(Value::as_i64)
            .ok_or_else(|| BridgeError::InvalidArgument("fds".into()))? as RawFd;
    }
    Ok(fds)
}

/// Render the script that pushes one notification into the frontend.
pub fn js_notify_call(key: SessionKey, chunk: &ChunkNotification) -> String {
    let payload = serde_json::to_string(chunk).unwrap_or_else(|_| r#"{"done":true}"#.to_string());
    format!("Native._nativeToJs({key}, {payload});")
}

/// Initialization script establishing the frontend consumption contract.
///
/// Injected into the embedding runtime before any page script runs. The
/// `Native` constructor opens a session; each instance exposes `write`,
/// `close`, and a single-consumer async iterator whose `next()` throws if
/// a pull is already outstanding. `_nativeToJs` tolerates unknown keys and
/// marks the session closed when the close record arrives.
pub const NATIVE_INIT_SCRIPT: &str = r#"
function Native(cmd, callback) {
    this.closed = false;
    this.fds = null;
    this.callback = callback;
    return _jsToNative_open(cmd).then(({fds, pid}) => {
        this.fds = fds;
        this.pid = pid;
        Native._table[fds[0]] = this;
        return this;
    }).catch((err) => {
        throw new Error(err);
    });
}
Native.prototype.write = function (msg) {
    return _jsToNative_write(this.fds[0], msg).catch((err) => {
        throw new Error(err);
    });
};
Native.prototype.close = function () {
    if (this.closed) return;
    return _jsToNative_close(...this.fds).catch((err) => {
        throw new Error(err);
    });
};
Native._table = Object.create(null);
Native._nativeToJs = function (id, data) {
    const native = Native._table[id];
    if (native == null) return;
    const callback = native.callback;
    if (callback != null) callback(data);
    if (data.done) {
        Native._table[id] = null;
        native.closed = true;
    }
};
Native.prototype[Symbol.asyncIterator] = function () {
    return {
        next: () => {
            return new Promise((resolve) => {
                if (this.callback != null) throw new Error('Reader already in use');
                this.callback = (data) => {
                    this.callback = null;
                    resolve(data);
                };
            });
        }
    };
};
"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
