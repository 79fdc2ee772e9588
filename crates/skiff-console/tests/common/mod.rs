#![allow(dead_code)]

//! Shared fixtures: a scripted interpreter implementing the embedding
//! contract, and event-stream helpers for scenario assertions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use skiff_console::{Console, ConsoleConfig, RunOutcome, SessionEvent, SessionPhase};
use skiff_core::interpreter::{Bindings, ExecError, Interpreter, InterpreterLoader};
use skiff_core::protocol::OutputStream;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Observability into the scripted interpreter for assertions.
#[derive(Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Probe {
    pub fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Loader for the scripted interpreter. The first `fail_loads` loads fail,
/// modelling missing interpreter assets; `panic_on_install` models an
/// interpreter that brings its whole worker context down.
pub struct ScriptedLoader {
    probe: Arc<Probe>,
    fail_loads: AtomicUsize,
    panic_on_install: bool,
}

impl InterpreterLoader for ScriptedLoader {
    fn load(&self, _assets_dir: &Path) -> skiff_core::Result<Box<dyn Interpreter>> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) > 0 {
            self.fail_loads.fetch_sub(1, Ordering::SeqCst);
            return Err(skiff_core::Error::InterpreterLoad(
                "script assets unavailable".to_string(),
            ));
        }
        Ok(Box::new(ScriptedInterpreter {
            bindings: None,
            vars: HashMap::new(),
            probe: Arc::clone(&self.probe),
            panic_on_install: self.panic_on_install,
        }))
    }
}

/// Line-oriented scripted interpreter used to drive end-to-end scenarios.
///
/// Commands:
/// - `use <dep>` — dependency declaration, resolved during prefetch
///   (`use missing` fails resolution)
/// - `print <words>` / `eprint <words>` — write a line to stdout/stderr,
///   substituting `$name` with variables read via `input`
/// - `input <name>` — blocking read of one line into a variable
/// - `sleep <ms>` — cooperative interruptible sleep
/// - `loop` — infinite loop with an interrupt check per iteration
/// - `spin` — long busy loop with no interrupt checks at all
/// - `raise <msg>` — execution error
/// - `panic` — interpreter crash
pub struct ScriptedInterpreter {
    bindings: Option<Bindings>,
    vars: HashMap<String, String>,
    probe: Arc<Probe>,
    panic_on_install: bool,
}

impl Interpreter for ScriptedInterpreter {
    fn install(&mut self, bindings: Bindings) {
        if self.panic_on_install {
            panic!("interpreter context corrupted during install");
        }
        self.bindings = Some(bindings);
    }

    fn prefetch(&mut self, source: &str) -> Result<(), ExecError> {
        self.probe.record("prefetch");
        for line in source.lines() {
            if let Some(dep) = line.trim().strip_prefix("use ")
                && dep == "missing"
            {
                return Err(ExecError::Failed(format!("no package named '{dep}'")));
            }
        }
        Ok(())
    }

    fn execute(&mut self, source: &str) -> Result<(), ExecError> {
        self.probe.record("execute");
        let io = self
            .bindings
            .as_mut()
            .ok_or_else(|| ExecError::Failed("no bindings installed".to_string()))?;
        for raw in source.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("use ") {
                continue;
            }
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "print" | "eprint" => {
                    let mut text = render(rest, &self.vars);
                    text.push('\n');
                    if command == "print" {
                        io.stdout.write(text.as_bytes());
                    } else {
                        io.stderr.write(text.as_bytes());
                    }
                }
                "input" => {
                    let Some(value) = io.stdin.read_line() else {
                        return Err(ExecError::Interrupted);
                    };
                    self.vars
                        .insert(rest.to_string(), value.trim_end_matches('\n').to_string());
                }
                "sleep" => {
                    let ms: u64 = rest
                        .parse()
                        .map_err(|_| ExecError::Failed(format!("invalid sleep: {rest}")))?;
                    io.sleep.sleep(Duration::from_millis(ms))?;
                }
                "loop" => loop {
                    if io.interrupt.is_raised() {
                        return Err(ExecError::Interrupted);
                    }
                    thread::sleep(Duration::from_millis(1));
                },
                "spin" => {
                    // Deliberately never checks the interrupt flag. Long
                    // enough to outlive any grace period, bounded so an
                    // abandoned thread eventually drains out of the process.
                    for _ in 0..12_000 {
                        thread::sleep(Duration::from_millis(5));
                    }
                }
                "raise" => return Err(ExecError::Failed(rest.to_string())),
                "panic" => panic!("scripted interpreter panic"),
                other => return Err(ExecError::Failed(format!("unknown command: {other}"))),
            }
        }
        Ok(())
    }
}

fn render(args: &str, vars: &HashMap<String, String>) -> String {
    args.split_whitespace()
        .map(|word| {
            word.strip_prefix('$')
                .and_then(|name| vars.get(name).map(String::as_str))
                .unwrap_or(word)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Console wired to a fresh scripted interpreter.
pub fn scripted_console() -> (Console, Receiver<SessionEvent>, Arc<Probe>) {
    scripted_console_with(ConsoleConfig::default(), 0)
}

/// Console whose first `fail_loads` interpreter loads fail.
pub fn failing_console(fail_loads: usize) -> (Console, Receiver<SessionEvent>, Arc<Probe>) {
    scripted_console_with(ConsoleConfig::default(), fail_loads)
}

/// Console whose interpreter tears its worker context down on install.
pub fn crashing_console() -> (Console, Receiver<SessionEvent>, Arc<Probe>) {
    build_console(ConsoleConfig::default(), 0, true)
}

pub fn scripted_console_with(
    config: ConsoleConfig,
    fail_loads: usize,
) -> (Console, Receiver<SessionEvent>, Arc<Probe>) {
    build_console(config, fail_loads, false)
}

fn build_console(
    config: ConsoleConfig,
    fail_loads: usize,
    panic_on_install: bool,
) -> (Console, Receiver<SessionEvent>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let loader = Arc::new(ScriptedLoader {
        probe: Arc::clone(&probe),
        fail_loads: AtomicUsize::new(fail_loads),
        panic_on_install,
    });
    let (console, events) = Console::new(loader, config);
    (console, events, probe)
}

pub fn next_event(events: &Receiver<SessionEvent>) -> SessionEvent {
    events.recv_timeout(EVENT_TIMEOUT).expect("session event")
}

/// Drain events until `pred` matches; returns everything seen, match last.
pub fn wait_for(
    events: &Receiver<SessionEvent>,
    what: &str,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("timed out waiting for {what}; saw {seen:?}"));
        let found = pred(&event);
        seen.push(event);
        if found {
            return seen;
        }
    }
}

pub fn wait_for_phase(events: &Receiver<SessionEvent>, phase: SessionPhase) -> Vec<SessionEvent> {
    wait_for(events, &format!("phase {phase:?}"), |event| {
        matches!(event, SessionEvent::Phase { phase: seen } if *seen == phase)
    })
}

pub fn drain_until_finished(events: &Receiver<SessionEvent>) -> (Vec<SessionEvent>, RunOutcome) {
    let seen = wait_for(events, "finished", |event| {
        matches!(event, SessionEvent::Finished { .. })
    });
    let outcome = seen
        .iter()
        .find_map(|event| match event {
            SessionEvent::Finished { outcome } => Some(outcome.clone()),
            _ => None,
        })
        .expect("finished event carries an outcome");
    (seen, outcome)
}

pub fn wait_for_worker_error(events: &Receiver<SessionEvent>) -> String {
    let seen = wait_for(events, "worker error", |event| {
        matches!(event, SessionEvent::WorkerError { .. })
    });
    seen.iter()
        .find_map(|event| match event {
            SessionEvent::WorkerError { message } => Some(message.clone()),
            _ => None,
        })
        .expect("worker error carries a message")
}

/// Concatenated stdout text from a slice of events.
pub fn stdout_text(events: &[SessionEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Output {
                stream: OutputStream::Stdout,
                text,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Output chunks in delivery order, both streams.
pub fn output_chunks(events: &[SessionEvent]) -> Vec<(OutputStream, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Output { stream, text } => Some((*stream, text.clone())),
            _ => None,
        })
        .collect()
}
