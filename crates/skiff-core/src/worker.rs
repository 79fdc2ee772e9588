//! The execution worker.
//!
//! One worker thread serves one session. It owns at most one interpreter
//! instance for its whole lifetime, created lazily so a pre-warm ping and a
//! run share initialization. Interpreter stdout/stderr writes are forwarded
//! as decoded text events immediately; stdin requests block on the shared
//! input mailbox; runs end with exactly one terminal result event.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::channel::{InputChannel, InterruptFlag};
use crate::error::{Error, Result};
use crate::interpreter::{
    Bindings, CooperativeSleep, ExecError, InputSource, Interpreter, InterpreterLoader, OutputSink,
};
use crate::protocol::{OutputStream, SessionWiring, WorkerErrorCode, WorkerEvent, WorkerRequest};

/// Handle to a spawned worker thread.
///
/// Dropping the handle drops the request sender; the worker exits once it
/// finishes whatever it is doing. The thread is never joined implicitly — a
/// worker blocked inside user code must not be able to block its controller.
pub struct WorkerHandle {
    requests: Sender<WorkerRequest>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker thread serving one session.
    ///
    /// Returns the request handle and the event stream. Events for one
    /// worker arrive in exactly the order the worker produced them.
    pub fn spawn(
        loader: Arc<dyn InterpreterLoader>,
    ) -> Result<(WorkerHandle, Receiver<WorkerEvent>)> {
        let (request_tx, request_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("skiff-worker".to_string())
            .spawn(move || Worker::new(loader, event_tx).run(request_rx))?;
        Ok((
            WorkerHandle {
                requests: request_tx,
                thread,
            },
            event_rx,
        ))
    }

    /// Queue a request for the worker.
    pub fn send(&self, request: WorkerRequest) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::WorkerGone)
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

struct Worker {
    loader: Arc<dyn InterpreterLoader>,
    events: Sender<WorkerEvent>,
    wiring: Option<SessionWiring>,
    interpreter: Option<Box<dyn Interpreter>>,
    /// Sticky failure from a load error or a panic. A poisoned worker keeps
    /// refusing work until it is respawned; nothing is retried automatically.
    poisoned: Option<String>,
}

impl Worker {
    fn new(loader: Arc<dyn InterpreterLoader>, events: Sender<WorkerEvent>) -> Self {
        Self {
            loader,
            events,
            wiring: None,
            interpreter: None,
            poisoned: None,
        }
    }

    fn run(mut self, requests: Receiver<WorkerRequest>) {
        while let Ok(request) = requests.recv() {
            match request {
                WorkerRequest::Init(wiring) => self.handle_init(wiring),
                WorkerRequest::Ping => self.handle_ping(),
                WorkerRequest::Run { code } => self.handle_run(&code),
            }
        }
        tracing::debug!("worker: request channel closed, exiting");
    }

    /// The controller may already have torn the session down; a dead event
    /// channel is not an error from the worker's side.
    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn handle_init(&mut self, wiring: SessionWiring) {
        // Re-point an already-loaded interpreter at the new regions.
        if let Some(interpreter) = self.interpreter.as_mut() {
            interpreter.install(bindings(&wiring, &self.events));
        }
        self.wiring = Some(wiring);
        self.emit(WorkerEvent::Ready);
    }

    fn handle_ping(&mut self) {
        match self.ensure_interpreter() {
            Ok(()) => self.emit(WorkerEvent::Ready),
            Err(message) => self.emit(WorkerEvent::Fault { message }),
        }
    }

    fn handle_run(&mut self, code: &str) {
        if let Err(message) = self.ensure_interpreter() {
            self.emit(WorkerEvent::Fault { message });
            return;
        }
        let Some(interpreter) = self.interpreter.as_mut() else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            interpreter.prefetch(code)?;
            interpreter.execute(code)
        }));

        match outcome {
            Ok(Ok(())) => self.emit(WorkerEvent::success()),
            Ok(Err(ExecError::Interrupted)) => {
                // Expected control flow, kept out of fault-level logging.
                tracing::debug!("worker: run interrupted");
                self.emit(WorkerEvent::failure(
                    ExecError::Interrupted.to_string(),
                    WorkerErrorCode::Interrupted,
                ));
            }
            Ok(Err(ExecError::Failed(message))) => {
                tracing::debug!(%message, "worker: run failed");
                self.emit(WorkerEvent::failure(message, WorkerErrorCode::ExecutionFailed));
            }
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(%message, "worker: interpreter panicked");
                self.interpreter = None;
                self.poisoned = Some(message.clone());
                self.emit(WorkerEvent::Fault { message });
            }
        }
    }

    /// Lazily create the interpreter owned by this worker's lifetime.
    fn ensure_interpreter(&mut self) -> std::result::Result<(), String> {
        if let Some(message) = &self.poisoned {
            return Err(message.clone());
        }
        if self.interpreter.is_some() {
            return Ok(());
        }
        let Some(wiring) = &self.wiring else {
            return Err("worker not initialized: init must precede run".to_string());
        };
        match self.loader.load(&wiring.assets_dir) {
            Ok(mut interpreter) => {
                interpreter.install(bindings(wiring, &self.events));
                self.interpreter = Some(interpreter);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(%message, "worker: initialization failed");
                self.poisoned = Some(message.clone());
                Err(message)
            }
        }
    }
}

/// Build the capability bundle the interpreter runs against.
fn bindings(wiring: &SessionWiring, events: &Sender<WorkerEvent>) -> Bindings {
    Bindings {
        stdout: Box::new(StreamSink {
            events: events.clone(),
            stream: OutputStream::Stdout,
        }),
        stderr: Box::new(StreamSink {
            events: events.clone(),
            stream: OutputStream::Stderr,
        }),
        stdin: Box::new(MailboxInput {
            channel: Arc::clone(&wiring.input),
            interrupt: wiring.interrupt.clone(),
            events: events.clone(),
        }),
        interrupt: wiring.interrupt.clone(),
        sleep: CooperativeSleep::new(wiring.interrupt.clone()),
    }
}

/// Forwards interpreter output as decoded chunks, one event per write.
/// Latency matters more than throughput here, so there is no batching.
struct StreamSink {
    events: Sender<WorkerEvent>,
    stream: OutputStream,
}

impl OutputSink for StreamSink {
    fn write(&mut self, bytes: &[u8]) -> usize {
        let data = String::from_utf8_lossy(bytes).into_owned();
        let event = match self.stream {
            OutputStream::Stdout => WorkerEvent::Stdout { data },
            OutputStream::Stderr => WorkerEvent::Stderr { data },
        };
        let _ = self.events.send(event);
        bytes.len()
    }
}

/// Blocking stdin bridge over the shared input mailbox.
///
/// Announces `AwaitingInput`, blocks on the channel, and announces
/// `GotInput` before handing the line back to the interpreter.
struct MailboxInput {
    channel: Arc<InputChannel>,
    interrupt: InterruptFlag,
    events: Sender<WorkerEvent>,
}

impl InputSource for MailboxInput {
    fn read_line(&mut self) -> Option<String> {
        let _ = self.events.send(WorkerEvent::AwaitingInput);
        let line = self.channel.read_line(&self.interrupt);
        if line.is_some() {
            let _ = self.events.send(WorkerEvent::GotInput);
        }
        line
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "interpreter panicked".to_string()
    }
}
