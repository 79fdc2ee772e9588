//! Core building blocks for Skiff interactive consoles.
//!
//! This crate provides:
//! - Single-slot input mailbox and interrupt flag shared per session
//! - The message protocol spoken across the worker boundary
//! - The interpreter embedding contract
//! - The execution worker hosting an interpreter on its own thread

pub mod channel;
pub mod error;
pub mod interpreter;
pub mod protocol;
pub mod worker;

pub use channel::{
    INPUT_CAPACITY, INTERRUPT_CLEAR, INTERRUPT_SIGINT, InputChannel, InterruptFlag,
};
pub use error::{Error, Result};
pub use interpreter::{
    Bindings, CooperativeSleep, ExecError, InputSource, Interpreter, InterpreterLoader, OutputSink,
    SLEEP_SLICE,
};
pub use protocol::{OutputStream, SessionWiring, WorkerErrorCode, WorkerEvent, WorkerRequest};
pub use worker::WorkerHandle;
