use crate::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of errors reported before fail-fast.
pub const MAX_ERRORS: usize = 20;

/// Error severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Error category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Name,
    Structure,
}

/// Numeric error code (E100–E399).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Syntax errors (E100–E199) ──
    pub const UNEXPECTED_TOKEN: Self = Self(100);
    pub const UNTERMINATED_STRING: Self = Self(101);
    pub const INVALID_ESCAPE: Self = Self(102);
    pub const UNCLOSED_BRACE: Self = Self(103);
    pub const MISSING_OPERAND: Self = Self(104);

    // ── Name errors (E200–E299) ──
    pub const UNDEFINED_VARIABLE: Self = Self(200);
    pub const NOT_A_FUNCTION: Self = Self(201);
    pub const BREAK_OUTSIDE_LOOP: Self = Self(202);
    pub const CONTINUE_OUTSIDE_LOOP: Self = Self(203);
    pub const REDEFINED_BUILTIN: Self = Self(204);

    // ── Structure errors (E300–E399) ──
    pub const MACRO_TOO_LARGE: Self = Self(300);
    pub const NESTED_DEFINE: Self = Self(301);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Syntax,
            200..=299 => ErrorCategory::Name,
            _ => ErrorCategory::Structure,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => f.write_str("syntax"),
            Self::Name => f.write_str("name"),
            Self::Structure => f.write_str("structure"),
        }
    }
}

/// A structured macl compile error.
///
/// Host UIs render these from the structured fields (or their JSON
/// serialization) — they must not parse free-form strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaclError {
    /// Source file name.
    pub file: String,
    /// Error code (e.g., E100).
    pub code: ErrorCode,
    /// Error severity.
    pub severity: Severity,
    /// Error category (derived from code).
    pub category: ErrorCategory,
    /// Human-readable error message.
    pub message: String,
    /// Source location.
    #[serde(flatten)]
    pub span: Span,
    /// The exact source line for context.
    pub source_line: String,
}

impl MaclError {
    /// Create a new error.
    pub fn new(
        file: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        span: Span,
        source_line: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            code,
            severity: Severity::Error,
            category: code.category(),
            message: message.into(),
            span,
            source_line: source_line.into(),
        }
    }
}

impl fmt::Display for MaclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} [{}] {}",
            self.span, self.code, self.category, self.message
        )
    }
}

impl std::error::Error for MaclError {}

/// Accumulated diagnostics for one compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileErrors {
    pub errors: Vec<MaclError>,
    pub total_errors: usize,
}

impl CompileErrors {
    /// Create an empty result (no errors).
    pub fn empty() -> Self {
        Self {
            errors: Vec::new(),
            total_errors: 0,
        }
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Add an error, respecting the MAX_ERRORS limit.
    pub fn push_error(&mut self, error: MaclError) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(error);
        }
        self.total_errors += 1;
    }

    /// Merge another batch of diagnostics into this one.
    pub fn extend(&mut self, other: CompileErrors) {
        for err in other.errors {
            if self.errors.len() < MAX_ERRORS {
                self.errors.push(err);
            }
        }
        self.total_errors += other.total_errors;
    }
}
