//! The main-thread controller.
//!
//! Owns the worker lifecycle: spawn, initialize, run, stop, respawn.
//! Exactly one session is live at a time; starting a new run tears down and
//! replaces the prior one, including both shared regions, so stale pending
//! input or stale interrupt state can never leak into a new run. The
//! orchestrating thread never blocks: `stop` and `send_input` are
//! fire-and-forget, and everything the worker produces reaches the UI
//! through an append-only event stream pumped on a dedicated thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use skiff_core::channel::{INPUT_CAPACITY, INTERRUPT_SIGINT, InputChannel, InterruptFlag};
use skiff_core::interpreter::InterpreterLoader;
use skiff_core::protocol::{
    OutputStream, SessionWiring, WorkerErrorCode, WorkerEvent, WorkerRequest,
};
use skiff_core::worker::WorkerHandle;

use crate::error::{Error, Result};
use crate::events::{RunOutcome, SessionEvent, SessionPhase};

/// Grace period between a cooperative interrupt and forced termination.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(400);

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Directory the interpreter resolves its assets from.
    pub assets_dir: PathBuf,
    /// Input mailbox payload capacity in bytes.
    pub input_capacity: usize,
    /// How long a cooperative interrupt may run before the worker is
    /// forcibly terminated.
    pub grace_period: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("."),
            input_capacity: INPUT_CAPACITY,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Main-thread coordinator for interactive code execution.
pub struct Console {
    loader: Arc<dyn InterpreterLoader>,
    config: ConsoleConfig,
    events: Sender<SessionEvent>,
    session: Option<Session>,
}

/// One live worker plus its shared regions and bookkeeping.
struct Session {
    worker: WorkerHandle,
    input: Arc<InputChannel>,
    interrupt: InterruptFlag,
    shared: Arc<SessionShared>,
}

/// State shared between the controller, the event pump and the grace timer.
struct SessionShared {
    /// Transcript and delivery permission live under one lock, so revoking
    /// a session stops its events and transcript writes atomically: a
    /// replaced session can never leak residue into its successor.
    gate: Mutex<Gate>,
    phase: Mutex<SessionPhase>,
    /// A terminal result or fault has been seen.
    finished: AtomicBool,
    stop_requested: AtomicBool,
    force_stopped: AtomicBool,
    /// Spawned to run code (greeting + running transition on ready) rather
    /// than as a silent pre-warm. Controller-side interpretation only; the
    /// worker behaves identically either way.
    for_run: bool,
    started: Mutex<Option<Instant>>,
}

struct Gate {
    revoked: bool,
    transcript: String,
}

impl SessionShared {
    fn new(for_run: bool) -> Self {
        Self {
            gate: Mutex::new(Gate {
                revoked: false,
                transcript: String::new(),
            }),
            phase: Mutex::new(SessionPhase::Idle),
            finished: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            force_stopped: AtomicBool::new(false),
            for_run,
            started: Mutex::new(None),
        }
    }

    /// Append transcript text and/or deliver an event, unless revoked.
    fn deliver(&self, tx: &Sender<SessionEvent>, text: Option<&str>, event: Option<SessionEvent>) {
        let mut gate = lock(&self.gate);
        if gate.revoked {
            return;
        }
        if let Some(text) = text {
            gate.transcript.push_str(text);
        }
        if let Some(event) = event {
            let _ = tx.send(event);
        }
    }

    fn set_phase(&self, tx: &Sender<SessionEvent>, phase: SessionPhase) {
        {
            let mut current = lock(&self.phase);
            if *current == phase {
                return;
            }
            *current = phase;
        }
        self.deliver(tx, None, Some(SessionEvent::Phase { phase }));
    }

    fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    fn revoke(&self) {
        lock(&self.gate).revoked = true;
    }

    fn is_revoked(&self) -> bool {
        lock(&self.gate).revoked
    }

    fn transcript(&self) -> String {
        lock(&self.gate).transcript.clone()
    }
}

impl Console {
    /// Create a controller and the event stream a UI drains.
    pub fn new(
        loader: Arc<dyn InterpreterLoader>,
        config: ConsoleConfig,
    ) -> (Self, Receiver<SessionEvent>) {
        let (events, receiver) = mpsc::channel();
        (
            Self {
                loader,
                config,
                events,
                session: None,
            },
            receiver,
        )
    }

    /// Spawn a fresh session and initialize the interpreter without running
    /// user code, moving startup latency off the interactive path. The
    /// resulting ready transition is silent (no greeting).
    pub fn prewarm(&mut self) -> Result<()> {
        self.spawn(false)?;
        self.request(WorkerRequest::Ping)
    }

    /// Execute `code` in a fresh session.
    ///
    /// Any prior session is torn down first and its accumulated output
    /// discarded; at most one run is ever active.
    pub fn run(&mut self, code: &str) -> Result<()> {
        self.spawn(true)?;
        if let Some(session) = &self.session {
            *lock(&session.shared.started) = Some(Instant::now());
        }
        self.request(WorkerRequest::Run {
            code: code.to_string(),
        })
    }

    /// Request cooperative cancellation of the current run. Fire-and-forget.
    ///
    /// Raises the interrupt byte, wakes a blocked input wait, appends a
    /// local `^C` notice and arms the grace timer; if the worker has not
    /// reported a terminal result by the deadline it is forcibly
    /// terminated. Clean interpreter-level unwinding is preferred, hard
    /// termination is the fallback.
    pub fn stop(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let shared = &session.shared;
        if shared.finished.load(Ordering::SeqCst) || shared.force_stopped.load(Ordering::SeqCst) {
            return;
        }
        if shared.stop_requested.swap(true, Ordering::SeqCst) {
            // Grace timer already armed by a previous stop.
            return;
        }

        session.interrupt.raise(INTERRUPT_SIGINT);
        session.input.wake();
        shared.deliver(&self.events, Some("^C\n"), Some(SessionEvent::Interrupted));
        shared.set_phase(&self.events, SessionPhase::Stopped);

        let shared = Arc::clone(shared);
        let input = Arc::clone(&session.input);
        let events = self.events.clone();
        let grace = self.config.grace_period;
        let timer = thread::Builder::new()
            .name("skiff-grace".to_string())
            .spawn(move || {
                thread::sleep(grace);
                if shared.finished.load(Ordering::SeqCst) {
                    return;
                }
                if shared.force_stopped.swap(true, Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "grace period expired, force-terminating worker"
                );
                shared.deliver(
                    &events,
                    Some("[force stop]\n"),
                    Some(SessionEvent::ForceStopped),
                );
                shared.set_phase(&events, SessionPhase::Terminated);
                shared.revoke();
                input.close();
            });
        if let Err(err) = timer {
            tracing::warn!(%err, "failed to arm grace timer");
        }
    }

    /// Deposit one input line for the blocked program and wake it.
    ///
    /// A trailing newline is appended if missing. Oversized lines are
    /// rejected locally, without contacting the worker and without touching
    /// the pending slot; so is a line raced in before the previous one was
    /// consumed.
    pub fn send_input(&mut self, line: &str) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::NoSession);
        };
        let mut text = line.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        match session.input.write_line(text.as_bytes()) {
            Ok(()) => Ok(()),
            Err(err @ skiff_core::Error::LineTooLong { .. }) => {
                let notice = format!("[error] {err}\n");
                session.shared.deliver(&self.events, Some(&notice), None);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map_or(SessionPhase::Idle, |session| session.shared.phase())
    }

    /// Whether the program is blocked waiting for input.
    pub fn awaiting_input(&self) -> bool {
        self.phase() == SessionPhase::AwaitingInput
    }

    /// Accumulated output and notices of the current session.
    pub fn transcript(&self) -> String {
        self.session
            .as_ref()
            .map_or_else(String::new, |session| session.shared.transcript())
    }

    fn request(&self, request: WorkerRequest) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::NoSession);
        };
        session.worker.send(request)?;
        Ok(())
    }

    /// Tear down any live session and spawn a fresh, initialized one: new
    /// shared regions, new worker thread, new event pump.
    ///
    /// `for_run` only affects how the resulting ready transition is
    /// interpreted (greeting plus running transition vs. silent pre-warm);
    /// the worker behaves identically either way.
    pub fn spawn(&mut self, for_run: bool) -> Result<()> {
        self.teardown();

        let input = Arc::new(InputChannel::new(self.config.input_capacity));
        let interrupt = InterruptFlag::new();
        let (worker, worker_events) = WorkerHandle::spawn(Arc::clone(&self.loader))?;
        let shared = Arc::new(SessionShared::new(for_run));

        shared.set_phase(&self.events, SessionPhase::Spawning);

        let pump_shared = Arc::clone(&shared);
        let pump_tx = self.events.clone();
        // The pump is deliberately detached; it exits with its session.
        let _ = thread::Builder::new()
            .name("skiff-events".to_string())
            .spawn(move || pump_events(worker_events, pump_shared, pump_tx))
            .map_err(skiff_core::Error::Io)?;

        self.session = Some(Session {
            worker,
            input: Arc::clone(&input),
            interrupt: interrupt.clone(),
            shared,
        });
        self.request(WorkerRequest::Init(SessionWiring {
            assets_dir: self.config.assets_dir.clone(),
            input,
            interrupt,
        }))
    }

    /// Sever a session: revoke its gate, raise the interrupt, close the
    /// mailbox and abandon its threads. A cooperative program unwinds at
    /// its next safepoint; an uncooperative one can no longer observe or
    /// affect anything.
    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.shared.revoke();
            session.interrupt.raise(INTERRUPT_SIGINT);
            session.input.close();
            // Dropping the handle drops the request sender; the worker
            // thread exits after its current request.
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Forward worker events to the UI stream, keeping session state and the
/// transcript current. Runs on its own thread per session.
fn pump_events(
    worker_events: Receiver<WorkerEvent>,
    shared: Arc<SessionShared>,
    tx: Sender<SessionEvent>,
) {
    loop {
        match worker_events.recv() {
            Ok(event) => handle_worker_event(event, &shared, &tx),
            Err(_) => {
                // Worker hung up. Anything but a finished run or a forced
                // stop means the worker context itself died.
                if !shared.finished.load(Ordering::SeqCst)
                    && !shared.force_stopped.load(Ordering::SeqCst)
                {
                    report_worker_error(&shared, &tx, "worker exited unexpectedly".to_string());
                }
                return;
            }
        }
        if shared.is_revoked() {
            return;
        }
    }
}

fn handle_worker_event(event: WorkerEvent, shared: &SessionShared, tx: &Sender<SessionEvent>) {
    match event {
        WorkerEvent::Ready => {
            shared.set_phase(tx, SessionPhase::Ready);
            if shared.for_run {
                shared.deliver(tx, Some("Running...\n"), None);
                shared.set_phase(tx, SessionPhase::Running);
            }
        }
        WorkerEvent::AwaitingInput => shared.set_phase(tx, SessionPhase::AwaitingInput),
        WorkerEvent::GotInput => shared.set_phase(tx, SessionPhase::Running),
        WorkerEvent::Stdout { data } => {
            let event = SessionEvent::Output {
                stream: OutputStream::Stdout,
                text: data.clone(),
            };
            shared.deliver(tx, Some(&data), Some(event));
        }
        WorkerEvent::Stderr { data } => {
            let event = SessionEvent::Output {
                stream: OutputStream::Stderr,
                text: data.clone(),
            };
            shared.deliver(tx, Some(&data), Some(event));
        }
        WorkerEvent::Result { ok, error, code } => {
            shared.finished.store(true, Ordering::SeqCst);
            let started = *lock(&shared.started);
            let duration_ms =
                started.map_or(0, |started| started.elapsed().as_millis() as u64);

            let notice = if ok {
                "\nExecution completed\n".to_string()
            } else {
                format!("\nError: {}\n", error.as_deref().unwrap_or("unknown error"))
            };
            let phase = if ok {
                SessionPhase::Completed
            } else if shared.stop_requested.load(Ordering::SeqCst)
                && code == Some(WorkerErrorCode::Interrupted)
            {
                // User asked for this; keep it a stop, not a program error.
                SessionPhase::Stopped
            } else {
                SessionPhase::Errored
            };

            let outcome = RunOutcome {
                ok,
                error,
                code,
                duration_ms,
            };
            shared.deliver(tx, Some(&notice), Some(SessionEvent::Finished { outcome }));
            shared.set_phase(tx, phase);
        }
        WorkerEvent::Fault { message } => report_worker_error(shared, tx, message),
    }
}

fn report_worker_error(shared: &SessionShared, tx: &Sender<SessionEvent>, message: String) {
    shared.finished.store(true, Ordering::SeqCst);
    let notice = format!("[worker error] {message}\n");
    shared.deliver(tx, Some(&notice), Some(SessionEvent::WorkerError { message }));
    shared.set_phase(tx, SessionPhase::Errored);
}

/// A poisoned lock only means another session thread panicked mid-update;
/// the guarded state stays structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
