//! Shared types for the macl macro-language toolchain.
//!
//! This crate defines source spans, the source-file wrapper used for
//! diagnostics, and the structured compile-error types shared by the
//! lexer and the parser.

mod error;
mod span;

pub use error::{CompileErrors, ErrorCategory, ErrorCode, MaclError, Severity, MAX_ERRORS};
pub use span::{SourceFile, Span};

/// Result type used by the compilation stages.
pub type Result<T> = std::result::Result<T, MaclError>;
