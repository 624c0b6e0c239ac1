//! Headless frontend harness for the process bridge.
//!
//! Opens one session, streams its stdout/stderr chunks to the matching
//! local streams, and forwards this process's own stdin lines to the
//! child — the same traffic a webview frontend would generate, without a
//! window.

use std::io::{BufRead, Write};
use std::sync::{mpsc, Arc};

use clap::Parser;
use serde_json::Value;
use spout_bridge::ipc::OpenResponse;
use spout_bridge::{Bridge, Dispatch, Responder, SingleThreadExecutor};
use spout_common::StreamTag;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spout", about = "Run a command through the process bridge")]
struct Args {
    /// Command line, run through the platform interpreter.
    command: String,

    /// Log filter directive, e.g. `spout=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

/// Carries a handler's resolution back to the main thread.
struct CliResponder(mpsc::Sender<Result<Value, String>>);

impl Responder for CliResponder {
    fn resolve(self, value: Value) {
        let _ = self.0.send(Ok(value));
    }

    fn reject(self, message: String) {
        let _ = self.0.send(Err(message));
    }
}

fn call<F: FnOnce(CliResponder)>(handler: F) -> Result<Value, String> {
    let (tx, rx) = mpsc::channel();
    handler(CliResponder(tx));
    rx.recv().map_err(|e| e.to_string())?
}

fn main() {
    let args = Args::parse();

    let log_directive = args.log_level.as_deref().unwrap_or("spout=info");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| "spout=info".parse().unwrap()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let executor: Arc<dyn Dispatch> = match SingleThreadExecutor::new() {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            eprintln!("spout: failed to start dispatcher: {e}");
            std::process::exit(1);
        }
    };
    let bridge = Arc::new(Bridge::new(executor));

    let request = serde_json::to_string(&[args.command.as_str()])
        .unwrap_or_else(|_| String::from("[]"));
    let opened = match call(|responder| bridge.handle_open(&request, responder)) {
        Ok(value) => match serde_json::from_value::<OpenResponse>(value) {
            Ok(opened) => opened,
            Err(e) => {
                eprintln!("spout: malformed open response: {e}");
                std::process::exit(1);
            }
        },
        Err(message) => {
            eprintln!("spout: {message}");
            std::process::exit(1);
        }
    };
    let key = opened.fds[0];
    info!(pid = opened.pid, key, "session open");

    // Forward our own stdin to the child, line by line.
    {
        let bridge = bridge.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(mut line) = line else { break };
                line.push('\n');
                if let Err(e) = bridge.write(key, &line) {
                    warn!(error = %e, "stdin forward failed");
                    break;
                }
            }
            debug!("stdin forwarder exiting");
        });
    }

    // Pull notifications until the close record.
    loop {
        let rx = match bridge.next(key) {
            Ok(rx) => rx,
            Err(e) => {
                debug!(error = %e, "session gone before close record");
                break;
            }
        };
        let Ok(chunk) = rx.recv() else { break };
        if chunk.done {
            info!(key, "session closed");
            break;
        }
        if let Some((text, tag)) = chunk.value {
            let result = match tag {
                StreamTag::Stdout => {
                    let mut out = std::io::stdout();
                    out.write_all(text.as_bytes()).and_then(|_| out.flush())
                }
                StreamTag::Stderr => {
                    let mut err = std::io::stderr();
                    err.write_all(text.as_bytes()).and_then(|_| err.flush())
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "local stream write failed");
                break;
            }
        }
    }

    // Release whatever the readers left open; already-closed descriptors
    // make this a reportable no-op.
    let request = serde_json::to_string(&opened.fds).unwrap_or_else(|_| String::from("[]"));
    if let Err(message) = call(|responder| bridge.handle_close(&request, responder)) {
        debug!(%message, "close after session end");
    }
}
