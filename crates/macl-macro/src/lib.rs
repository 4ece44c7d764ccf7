//! Macro commands over buffers.
//!
//! This crate is the embedding layer: it owns the documents macros act
//! on, wires the interpreter's native-routine bridge to them, and
//! drives each macro through starting, time-sliced continuation,
//! suspension on shell commands, and teardown.

pub mod builtins;
pub mod command;
pub mod compile;
pub mod document;

pub use command::{
    EventLoop, ProcessShellRunner, ShellResult, ShellRunner, TimerEvent, TimerId, Workspace,
    BANNER_WAIT_MS,
};
pub use compile::read_check_macro_string;
pub use document::{Buffer, DocumentStore};
