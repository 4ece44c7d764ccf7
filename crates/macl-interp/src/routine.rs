//! The native routine bridge.
//!
//! An editor operation exposed to macro code is a plain function
//! pointer with a fixed shape: it receives the target document, a
//! mutable view of its stacked arguments, and a result slot, and it
//! reports continue-or-suspend through its status code. Routines are
//! registered once at startup and installed into the machine's symbol
//! table as first-class subroutine values.

use crate::error::RoutineError;
use crate::host::Document;
use crate::value::Value;

/// What the machine should do after a routine returns successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep executing instructions.
    Continue,
    /// Suspend the macro; the host will resume it later.
    Preempt,
}

/// A native routine.
///
/// `args` is a bounds-checked view into the VM stack — the routine may
/// read and overwrite argument slots but can never resize the stack.
/// A routine that produces a value writes `Some` into `result`;
/// leaving it `None` means "no return value", which is an error if the
/// call site wanted one.
pub type LibraryRoutine = fn(
    document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError>;

/// Immutable set of native routines, built once during startup.
#[derive(Debug, Default)]
pub struct RoutineRegistry {
    entries: Vec<(String, LibraryRoutine)>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a routine under the given macro-visible name.
    pub fn with(mut self, name: &str, routine: LibraryRoutine) -> Self {
        self.entries.push((name.to_string(), routine));
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, LibraryRoutine)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), *r))
    }
}

// ── Argument helpers ─────────────────────────────────────────────
//
// Shared argument-reading helpers so every routine checks arity and
// coerces types the same way.

/// Require between `min` and `max` arguments.
pub fn arg_count(args: &[Value], min: usize, max: usize) -> Result<(), RoutineError> {
    if args.len() < min {
        Err(RoutineError::TooFewArguments)
    } else if args.len() > max {
        Err(RoutineError::TooManyArguments)
    } else {
        Ok(())
    }
}

/// Read argument `index` as an integer, with the usual string
/// coercion.
pub fn arg_int(args: &[Value], index: usize) -> Result<i32, RoutineError> {
    let value = args.get(index).ok_or(RoutineError::TooFewArguments)?;
    value.coerce_to_int().map_err(|_| RoutineError::NotAnInteger)
}

/// Read argument `index` as a string, with the usual integer coercion.
pub fn arg_string(args: &[Value], index: usize) -> Result<String, RoutineError> {
    let value = args.get(index).ok_or(RoutineError::TooFewArguments)?;
    value.coerce_to_string().map_err(|_| RoutineError::NotAString)
}
