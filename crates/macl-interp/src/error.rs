//! Runtime error types for the interpreter.

use thiserror::Error;

/// A failure detected while executing instructions.
///
/// Every variant aborts the current macro run; none of them is ever
/// silently turned into a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    /// A value had the wrong variant for the operation.
    #[error("expected {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A string failed the implicit string-to-number conversion.
    #[error("can't convert string \"{0}\" to number")]
    NotANumber(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("zero raised to a negative power")]
    ZeroToNegativePower,

    /// The value stack hit its fixed capacity.
    #[error("macro stack overflow")]
    StackOverflow,

    /// An instruction popped more values than were pushed.
    #[error("macro stack underflow")]
    StackUnderflow,

    /// The array an iterator was walking was structurally modified.
    #[error("array modified during iteration")]
    InvalidIterator,

    #[error("referenced array value not in array: \"{0}\"")]
    KeyNotFound(String),

    #[error("{0} is not an array")]
    NotAnArray(String),

    #[error("attempt to iterate over a non-array value")]
    NotIterable,

    /// Array subscripts must be integers or strings.
    #[error("array keys must be integers or strings")]
    BadArrayKey,

    #[error("can't call {0}: not a macro or subroutine")]
    NotCallable(String),

    #[error("macro function {0} was never defined")]
    NotDefined(String),

    #[error("can't assign to {0}")]
    BadAssignTarget(String),

    /// A routine or macro function used in an expression produced nothing.
    #[error("{0} does not return a value")]
    NoReturnValue(String),

    #[error("referenced undefined macro argument {0}")]
    ArgumentOutOfRange(i32),

    #[error("incompatible types to compare")]
    CompareIncompatible,

    /// An array set operation was given one array and one scalar.
    #[error("both operands of {0} must be arrays")]
    MixedArrayOperands(&'static str),

    /// The document a native call needed no longer exists.
    #[error("document was closed during macro execution")]
    DocumentVanished,

    /// A native routine reported a failure.
    #[error("{name} {source}")]
    Routine {
        name: String,
        source: RoutineError,
    },

    /// A consistency check inside the machine failed.
    #[error("internal interpreter error: {0}")]
    Internal(String),
}

/// Result alias for interpreter operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Status codes a native routine can report back to the machine.
///
/// The routine's name is not part of the message; the machine prefixes
/// it when it builds the macro-level diagnostic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutineError {
    #[error("subroutine called with too few arguments")]
    TooFewArguments,

    #[error("subroutine called with too many arguments")]
    TooManyArguments,

    #[error("subroutine called with the wrong number of arguments")]
    WrongNumberOfArguments,

    #[error("called with a non-integer argument")]
    NotAnInteger,

    #[error("called with a non-string argument")]
    NotAString,

    #[error("called with an unrecognized argument")]
    UnrecognizedArgument,

    /// The routine cannot run in the current execution context.
    #[error("can't be called from this context")]
    InvalidContext,

    /// The routine does not apply to the document's current state.
    #[error("can't be applied to this document")]
    NotApplicable,

    #[error("failed: {0}")]
    Other(String),
}

/// A macro-level failure, carrying the source line of the faulting
/// instruction when the program recorded one.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroError {
    pub message: String,
    pub line: Option<u32>,
}

impl std::error::Error for MacroError {}

impl MacroError {
    pub fn new(message: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl std::fmt::Display for MacroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {})", self.message, line),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_error_prefixed_with_name() {
        let err = ExecError::Routine {
            name: "substring".into(),
            source: RoutineError::TooFewArguments,
        };
        assert_eq!(
            err.to_string(),
            "substring subroutine called with too few arguments"
        );
    }

    #[test]
    fn test_macro_error_display() {
        let err = MacroError::new("division by zero", Some(12));
        assert_eq!(err.to_string(), "division by zero (line 12)");
        let err = MacroError::new("division by zero", None);
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_string_conversion_message() {
        let err = ExecError::NotANumber("abc".into());
        assert_eq!(err.to_string(), "can't convert string \"abc\" to number");
    }
}
