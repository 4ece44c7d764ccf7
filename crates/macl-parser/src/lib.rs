//! macl compiler: converts macro source text into interpreter bytecode.
//!
//! There is no AST. The parser is a single-pass recursive-descent
//! compiler that emits instructions directly into a
//! [`macl_interp::ProgramBuilder`] as it recognises each construct.

mod parse_expr;
mod parse_stmt;
mod parser;

pub use parser::{compile, CompileResult, Parser};
