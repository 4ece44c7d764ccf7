//! The macl bytecode interpreter.
//!
//! A small stack machine for an editor macro language. A compiled
//! [`Program`] is a flat instruction vector executed against a value
//! stack; subroutine calls lay down stack frames addressed through a
//! frame pointer, and native editor operations are reached through the
//! [`routine`] bridge. Execution is cooperative: the machine runs a
//! bounded instruction slice per call and can be suspended by a native
//! routine (for example while a shell command runs) and resumed later
//! from the exact suspension point.

pub mod array;
pub mod error;
pub mod host;
pub mod program;
pub mod routine;
pub mod symbol;
pub mod value;
pub mod vm;

pub use array::{make_array_key, Array, ArrayIterator, ArrayPtr, ARRAY_DIM_SEP};
pub use error::{ExecError, ExecResult, MacroError, RoutineError};
pub use host::{Document, DocumentId, Host};
pub use program::{CodeAddr, Inst, Program, ProgramBuilder, ProgramTooLarge, PROGRAM_SIZE};
pub use routine::{arg_count, arg_int, arg_string, Flow, LibraryRoutine, RoutineRegistry};
pub use symbol::{Symbol, SymbolKind, SymbolRef, SymbolTable};
pub use value::Value;
pub use vm::{ExecStatus, Machine, MacroContext, SharedContext, INSTRUCTION_LIMIT, STACK_SIZE};
