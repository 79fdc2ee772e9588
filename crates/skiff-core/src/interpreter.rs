//! The interpreter embedding contract.
//!
//! The language runtime is an external collaborator: skiff drives any
//! interpreter that can accept byte-sink stdout/stderr, a blocking stdin
//! callable, an interrupt byte to poll at its own safepoints, and a
//! prefetch/execute entry point. The whole capability bundle is installed
//! once, at initialization, rather than through per-hook registration.

use std::path::Path;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::channel::InterruptFlag;
use crate::error::Result;

/// Slice length for the cooperative sleep loop.
///
/// Trades interrupt latency against wake-up overhead; interrupt latency
/// inside a sleep is bounded by roughly one slice.
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Byte sink backing interpreter stdout or stderr.
pub trait OutputSink: Send {
    /// Write a chunk, returning the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
}

/// Blocking-or-null line source backing interpreter stdin.
pub trait InputSource: Send {
    /// Block until a line is available and return it, or return `None` when
    /// no input can ever arrive (channel closed or interrupt requested).
    /// Interpreters should treat `None` as end-of-input.
    fn read_line(&mut self) -> Option<String>;
}

/// Why a run ended without completing normally.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Execution observed the interrupt flag and unwound.
    #[error("interrupted")]
    Interrupted,

    /// The interpreter raised an error while running user code.
    #[error("{0}")]
    Failed(String),
}

/// Capabilities handed to the interpreter when it is initialized.
pub struct Bindings {
    /// Sink for interpreter stdout writes.
    pub stdout: Box<dyn OutputSink>,
    /// Sink for interpreter stderr writes.
    pub stderr: Box<dyn OutputSink>,
    /// Blocking stdin source.
    pub stdin: Box<dyn InputSource>,
    /// Interrupt byte the interpreter polls between its own execution steps.
    pub interrupt: InterruptFlag,
    /// Interruptible sleep exposed to interpreted code.
    pub sleep: CooperativeSleep,
}

/// An embedded interpreter instance.
///
/// At most one instance lives per worker lifetime, created lazily on first
/// use so a pre-warm ping and a run share initialization.
pub trait Interpreter: Send {
    /// Install the I/O and interrupt capabilities. Called once after
    /// construction, and again whenever the worker is re-initialized with
    /// fresh session regions.
    fn install(&mut self, bindings: Bindings);

    /// Resolve and load any dependencies implied by `source` before running.
    fn prefetch(&mut self, source: &str) -> std::result::Result<(), ExecError>;

    /// Execute `source` to completion on the calling thread. Blocking in
    /// here (on stdin, on sleep) is expected.
    fn execute(&mut self, source: &str) -> std::result::Result<(), ExecError>;
}

/// Constructs interpreter instances on demand.
pub trait InterpreterLoader: Send + Sync {
    /// Load a fresh interpreter, resolving its assets under `assets_dir`.
    fn load(&self, assets_dir: &Path) -> Result<Box<dyn Interpreter>>;
}

/// Chunked interruptible sleep.
///
/// A delay of arbitrary length is decomposed into slices of at most
/// [`SLEEP_SLICE`] with an interrupt check after every slice, so a sleeping
/// program stays cancellable instead of blocking uninterruptibly.
#[derive(Clone)]
pub struct CooperativeSleep {
    interrupt: InterruptFlag,
    slice: Duration,
}

impl CooperativeSleep {
    /// Sleep primitive observing `interrupt` with the default slice.
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self {
            interrupt,
            slice: SLEEP_SLICE,
        }
    }

    /// Override the slice length (minimum 1 ms).
    pub fn with_slice(mut self, slice: Duration) -> Self {
        self.slice = slice.max(Duration::from_millis(1));
        self
    }

    /// Sleep for `total`, returning `Err(ExecError::Interrupted)` as soon as
    /// the interrupt flag is observed between slices. The flag is checked at
    /// least once even for a zero-length sleep.
    pub fn sleep(&self, total: Duration) -> std::result::Result<(), ExecError> {
        let mut remaining = total;
        loop {
            let nap = remaining.min(self.slice);
            thread::sleep(nap);
            if self.interrupt.is_raised() {
                return Err(ExecError::Interrupted);
            }
            remaining = remaining.saturating_sub(nap);
            if remaining.is_zero() {
                return Ok(());
            }
        }
    }
}
