//! Message protocol between the controller and the execution worker.
//!
//! Requests flow controller → worker and carry live session handles, so they
//! stay plain Rust values. Events flow worker → controller on a single FIFO
//! queue (which is what preserves output ordering) and are serde-tagged so a
//! host can forward them to a UI verbatim.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::{InputChannel, InterruptFlag};

/// Handles the worker needs to serve one session.
///
/// The worker has no notion of session identity beyond these: the regions it
/// was given are the session.
pub struct SessionWiring {
    /// Base directory the interpreter resolves its assets from.
    pub assets_dir: PathBuf,
    /// Single-slot input mailbox shared with the controller.
    pub input: Arc<InputChannel>,
    /// Interrupt byte shared with the controller.
    pub interrupt: InterruptFlag,
}

/// Requests sent from the controller to the worker.
pub enum WorkerRequest {
    /// Record the session wiring. Idempotent; must precede `Run`. The worker
    /// replies [`WorkerEvent::Ready`] without touching the interpreter.
    Init(SessionWiring),

    /// Execute one source text. Replies with a stream of output/input events
    /// and exactly one terminal [`WorkerEvent::Result`].
    Run { code: String },

    /// Trigger lazy interpreter initialization without executing user code,
    /// moving startup latency off the interactive path.
    Ping,
}

/// Which output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Machine-readable cause of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorCode {
    /// The run unwound because the interrupt flag was raised.
    Interrupted,
    /// The interpreter raised an ordinary execution error.
    ExecutionFailed,
}

/// Events sent from the worker back to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Initialization or pre-warm finished.
    Ready,

    /// The running code requested a line of input; the worker thread is
    /// blocked until the controller deposits one.
    AwaitingInput,

    /// The blocked read consumed a line and execution resumed.
    GotInput,

    /// A stdout chunk, forwarded the moment the interpreter wrote it.
    Stdout { data: String },

    /// A stderr chunk.
    Stderr { data: String },

    /// Terminal outcome of one run. Exactly one per `Run` request.
    Result {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<WorkerErrorCode>,
    },

    /// The worker itself is broken: the interpreter failed to load, or
    /// panicked. Not a run result — the worker is unusable and a fresh one
    /// must be spawned.
    Fault { message: String },
}

impl WorkerEvent {
    /// Stdout chunk.
    pub fn stdout(data: impl Into<String>) -> Self {
        WorkerEvent::Stdout { data: data.into() }
    }

    /// Stderr chunk.
    pub fn stderr(data: impl Into<String>) -> Self {
        WorkerEvent::Stderr { data: data.into() }
    }

    /// Successful terminal result.
    pub fn success() -> Self {
        WorkerEvent::Result {
            ok: true,
            error: None,
            code: None,
        }
    }

    /// Failed terminal result.
    pub fn failure(error: impl Into<String>, code: WorkerErrorCode) -> Self {
        WorkerEvent::Result {
            ok: false,
            error: Some(error.into()),
            code: Some(code),
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Result { .. })
    }
}
