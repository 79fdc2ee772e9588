//! UI-facing session events.
//!
//! Everything a host needs to render a terminal: one totally-ordered stream
//! of output chunks, discrete phase transitions, local notices, and exactly
//! one terminal outcome per run. All types serialize to tagged JSON so they
//! can be forwarded to a frontend verbatim.

use serde::{Deserialize, Serialize};
use skiff_core::protocol::{OutputStream, WorkerErrorCode};

/// Liveness of the current execution session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session yet.
    #[default]
    Idle,
    /// Worker created, initialization in flight.
    Spawning,
    /// The worker reported ready.
    Ready,
    /// User code is executing.
    Running,
    /// User code is blocked waiting for an input line.
    AwaitingInput,
    /// Run finished normally.
    Completed,
    /// Run finished with an execution error, or the worker itself failed.
    Errored,
    /// Interrupt requested; the run unwound (or is still unwinding).
    Stopped,
    /// The grace period expired and the worker was forcibly terminated.
    Terminated,
}

impl SessionPhase {
    /// Whether user code may still produce output in this phase.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionPhase::Running | SessionPhase::AwaitingInput | SessionPhase::Stopped
        )
    }

    /// Whether the session has reached a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Errored | SessionPhase::Terminated
        )
    }
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Whether the run completed without raising.
    pub ok: bool,
    /// Human-readable error description when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable cause when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<WorkerErrorCode>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Whether the failure was interrupt-induced.
    pub fn interrupted(&self) -> bool {
        self.code == Some(WorkerErrorCode::Interrupted)
    }
}

/// Events streamed to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Discrete session state transition.
    Phase { phase: SessionPhase },

    /// One output chunk. Chunks arrive in emission order across both
    /// streams; interleaving is preserved for terminal fidelity.
    Output { stream: OutputStream, text: String },

    /// Local notice that an interrupt was requested (`^C`).
    Interrupted,

    /// The worker missed the grace deadline and was forcibly terminated.
    ForceStopped,

    /// The worker context itself failed: interpreter load failure, panic,
    /// or unexpected worker exit. Recovery is a fresh `run`.
    WorkerError { message: String },

    /// Terminal outcome of the run. Exactly one per `run` call that reaches
    /// the interpreter.
    Finished { outcome: RunOutcome },
}
