//! The macro-command subsystem.
//!
//! A [`Workspace`] owns the buffers and one [`Machine`], and drives
//! each running macro through its life cycle: start, time-sliced
//! continuation, suspension on shell commands, the busy banner, and
//! teardown. Timers and shell execution are behind traits so the whole
//! cycle is testable without an event loop or a real `/bin/sh`.

use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::rc::Rc;

use macl_interp::{
    DocumentId, ExecStatus, Machine, MacroError, Program, SharedContext, Value,
};

use crate::builtins;
use crate::document::{Buffer, DocumentStore};

/// How long a macro may run before the busy banner goes up.
pub const BANNER_WAIT_MS: u64 = 6000;

const BANNER_TEXT: &str = "Macro Command in Progress -- Press ^C to Cancel";

/// Handle for a scheduled timer, issued by the [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Events the workspace asks its event loop to deliver later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Put up the busy banner for this buffer's macro.
    Banner(DocumentId),
    /// Run the next instruction slice of this buffer's macro.
    Continuation(DocumentId),
}

/// The host application's timer facility. Fired events come back
/// through [`Workspace::handle_timer`].
pub trait EventLoop {
    fn start_timer(&mut self, delay_ms: u64, event: TimerEvent) -> TimerId;
    fn cancel_timer(&mut self, timer: TimerId);
}

/// Outcome of one shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    pub output: String,
    pub exit_status: i32,
}

/// Launches the shell commands macros suspend on.
///
/// A synchronous runner finishes the command and returns its result
/// directly. A host with a real event loop launches the subprocess,
/// returns `None`, and hands the output back later through
/// [`Workspace::return_shell_command_output`]; the macro stays
/// suspended in between.
pub trait ShellRunner {
    fn launch(
        &mut self,
        document: DocumentId,
        command: &str,
        input: &str,
    ) -> io::Result<Option<ShellResult>>;
}

/// Spawns `sh -c` with the macro's input piped to stdin and waits for
/// it to finish.
#[derive(Debug, Default)]
pub struct ProcessShellRunner;

impl ShellRunner for ProcessShellRunner {
    fn launch(
        &mut self,
        _document: DocumentId,
        command: &str,
        input: &str,
    ) -> io::Result<Option<ShellResult>> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let out = child.wait_with_output()?;
        Ok(Some(ShellResult {
            output: String::from_utf8_lossy(&out.stdout).into_owned(),
            exit_status: out.status.code().unwrap_or(-1),
        }))
    }
}

/// Per-buffer state of a running macro command.
pub(crate) struct MacroCommandData {
    pub banner_timer: Option<TimerId>,
    pub continuation_timer: Option<TimerId>,
    pub banner_is_up: bool,
    pub close_on_completion: bool,
    pub context: SharedContext,
}

/// Buffers plus one macro machine, with the glue that keeps long
/// macros cooperative.
pub struct Workspace {
    store: DocumentStore,
    machine: Machine,
    event_loop: Box<dyn EventLoop>,
    shell: Box<dyn ShellRunner>,
}

impl Workspace {
    pub fn new(event_loop: Box<dyn EventLoop>, shell: Box<dyn ShellRunner>) -> Self {
        let mut machine = Machine::new(&builtins::registry());
        machine.set_global("$shell_cmd_status", Value::Int(0));
        Self {
            store: DocumentStore::new(),
            machine,
            event_loop,
            shell,
        }
    }

    pub fn create_buffer(&mut self, name: &str) -> DocumentId {
        self.store.create(name)
    }

    pub fn buffer(&self, id: DocumentId) -> Option<&Buffer> {
        self.store.get(id)
    }

    pub fn buffer_mut(&mut self, id: DocumentId) -> Option<&mut Buffer> {
        self.store.get_mut(id)
    }

    /// Value of a global macro variable, if set.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.machine.global(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.machine.set_global(name, value);
    }

    /// Compile macro source against the workspace's symbol table.
    /// Definitions are installed as a side effect; the returned program
    /// is the file's top-level code, if it has any.
    pub fn compile(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<Option<Rc<Program>>, macl_types::CompileErrors> {
        crate::compile::read_check_macro_string(name, source, self.machine.symbols_mut())
    }

    /// Start `program` on the given buffer. If that buffer already has
    /// a macro in flight, the new program runs as a subroutine of it
    /// and finishes before the interrupted code continues.
    pub fn run_macro(
        &mut self,
        id: DocumentId,
        program: Rc<Program>,
        args: &[Value],
    ) -> Result<(), MacroError> {
        let Some(buffer) = self.store.get_mut(id) else {
            return Err(MacroError::new("no such buffer for macro execution", None));
        };

        if let Some(cmd) = &buffer.macro_cmd {
            tracing::debug!(buffer = %buffer.name, "stacking macro on active run");
            let context = Rc::clone(&cmd.context);
            self.machine.run_as_subroutine(&context, program, args)?;
            return self.resume(id);
        }

        let context = self.machine.prepare(id, program, args)?;
        let banner_timer = self
            .event_loop
            .start_timer(BANNER_WAIT_MS, TimerEvent::Banner(id));

        // Re-borrow: prepare needed &mut self.machine.
        if let Some(buffer) = self.store.get_mut(id) {
            buffer.macro_cmd = Some(MacroCommandData {
                banner_timer: Some(banner_timer),
                continuation_timer: None,
                banner_is_up: false,
                close_on_completion: false,
                context,
            });
        }
        self.resume(id)
    }

    /// Deliver a fired timer event.
    pub fn handle_timer(&mut self, event: TimerEvent) -> Result<(), MacroError> {
        match event {
            TimerEvent::Banner(id) => {
                if let Some(buffer) = self.store.get_mut(id) {
                    if let Some(cmd) = &mut buffer.macro_cmd {
                        cmd.banner_timer = None;
                        cmd.banner_is_up = true;
                        buffer.banner = Some(BANNER_TEXT.to_string());
                    }
                }
                Ok(())
            }
            TimerEvent::Continuation(id) => {
                let still_running = self
                    .store
                    .get_mut(id)
                    .and_then(|buffer| buffer.macro_cmd.as_mut())
                    .map(|cmd| cmd.continuation_timer = None)
                    .is_some();
                if still_running {
                    self.resume(id)
                } else {
                    // The macro finished or was cancelled before the
                    // timer fired; nothing to do.
                    Ok(())
                }
            }
        }
    }

    /// Abort the buffer's macro, if any.
    pub fn cancel_macro(&mut self, id: DocumentId) {
        self.teardown(id);
    }

    /// Close a buffer. If a macro is suspended on it, the buffer stays
    /// alive until the macro is torn down.
    pub fn close_buffer(&mut self, id: DocumentId) {
        let running = self
            .store
            .get(id)
            .map(Buffer::macro_running)
            .unwrap_or(false);
        if running {
            if let Some(cmd) = self.store.get_mut(id).and_then(|b| b.macro_cmd.as_mut()) {
                cmd.close_on_completion = true;
            }
            self.teardown(id);
        } else {
            self.store.remove(id);
        }
    }

    /// Run one instruction slice and act on how it ended.
    fn resume(&mut self, id: DocumentId) -> Result<(), MacroError> {
        let Some(cmd) = self.store.get(id).and_then(|b| b.macro_cmd.as_ref()) else {
            return Ok(());
        };
        let context = Rc::clone(&cmd.context);

        match self.machine.continue_macro(&mut self.store, &context) {
            Ok(status) => self.dispatch(id, status),
            Err(err) => {
                self.fail(id, err.clone());
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, id: DocumentId, status: ExecStatus) -> Result<(), MacroError> {
        match status {
            ExecStatus::Done(value) => {
                tracing::debug!(buffer = id.0, "macro finished");
                if let Some(buffer) = self.store.get_mut(id) {
                    buffer.last_result = Some(value);
                }
                self.teardown(id);
                Ok(())
            }
            ExecStatus::TimeLimit => {
                self.schedule_continuation(id);
                Ok(())
            }
            ExecStatus::Preempted => {
                let pending = self
                    .store
                    .get_mut(id)
                    .and_then(|buffer| buffer.pending_shell.take());
                match pending {
                    Some(shell) => self.launch_shell_command(id, &shell),
                    // Preempted for a reason the workspace does not
                    // drive; the macro stays suspended until the host
                    // resumes it.
                    None => Ok(()),
                }
            }
        }
    }

    fn launch_shell_command(
        &mut self,
        id: DocumentId,
        shell: &crate::document::PendingShell,
    ) -> Result<(), MacroError> {
        tracing::debug!(command = %shell.command, "launching shell command");
        match self.shell.launch(id, &shell.command, &shell.input) {
            Ok(Some(result)) => {
                self.return_shell_command_output(id, &result.output, result.exit_status);
                Ok(())
            }
            // Launched asynchronously; the host calls
            // return_shell_command_output when the process finishes.
            Ok(None) => Ok(()),
            Err(e) => {
                let err = MacroError::new(format!("failed to execute shell command: {e}"), None);
                self.fail(id, err.clone());
                Err(err)
            }
        }
    }

    /// Hand subprocess output back into a macro suspended on
    /// `shell_command`: the output becomes the call's return value,
    /// `$shell_cmd_status` gets the exit status, and a continuation is
    /// scheduled. A buffer with no suspended macro is ignored.
    pub fn return_shell_command_output(&mut self, id: DocumentId, output: &str, status: i32) {
        let Some(cmd) = self.store.get(id).and_then(|b| b.macro_cmd.as_ref()) else {
            return;
        };
        let context = Rc::clone(&cmd.context);
        self.machine
            .modify_returned_value(&context, Value::Str(output.to_string()));
        self.machine
            .set_global("$shell_cmd_status", Value::Int(status));
        self.schedule_continuation(id);
    }

    fn schedule_continuation(&mut self, id: DocumentId) {
        let timer = self
            .event_loop
            .start_timer(0, TimerEvent::Continuation(id));
        if let Some(cmd) = self.store.get_mut(id).and_then(|b| b.macro_cmd.as_mut()) {
            cmd.continuation_timer = Some(timer);
        }
    }

    fn fail(&mut self, id: DocumentId, err: MacroError) {
        tracing::warn!(buffer = id.0, error = %err.message, "macro aborted");
        if let Some(buffer) = self.store.get_mut(id) {
            buffer.last_error = Some(err.message);
        }
        self.teardown(id);
    }

    /// Dismantle the buffer's macro command: drop the context, clear
    /// the banner, cancel outstanding timers, and honor a deferred
    /// close.
    fn teardown(&mut self, id: DocumentId) {
        let Some(buffer) = self.store.get_mut(id) else {
            return;
        };
        let Some(cmd) = buffer.macro_cmd.take() else {
            return;
        };
        if cmd.banner_is_up {
            buffer.banner = None;
        }
        buffer.pending_shell = None;
        if let Some(timer) = cmd.banner_timer {
            self.event_loop.cancel_timer(timer);
        }
        if let Some(timer) = cmd.continuation_timer {
            self.event_loop.cancel_timer(timer);
        }
        if cmd.close_on_completion {
            self.store.remove(id);
        }
    }
}
