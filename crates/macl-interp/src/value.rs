//! The tagged value type flowing through the interpreter.
//!
//! Every slot on the value stack, every array element, and every symbol
//! holds a [`Value`]. Copying a value copies the tag plus either the
//! string buffer or a shared handle; array bodies are never deep-copied
//! by a value copy.

use std::rc::Rc;

use crate::array::{ArrayIterator, ArrayPtr};
use crate::error::{ExecError, ExecResult};
use crate::program::{CodeAddr, Program};
use crate::routine::LibraryRoutine;

/// A single interpreter value.
///
/// The first four variants are the ones macro code can observe; the
/// rest are machine-internal (iterator state, routine pointers, return
/// addresses, and saved frame pointers living in call frames).
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent / empty. A fresh local or an unset global reads as this.
    #[default]
    Unset,
    /// 32-bit signed integer.
    Int(i32),
    /// Text.
    Str(String),
    /// Shared handle to an array body.
    Array(ArrayPtr),
    /// In-progress array traversal (handle + cursor + revision).
    Iterator(ArrayIterator),
    /// Native routine, first-class.
    Subroutine(LibraryRoutine),
    /// Compiled macro function.
    Code(Rc<Program>),
    /// Address of one instruction (saved return PC).
    InstAddr(CodeAddr),
    /// Index of another stack slot (saved frame pointer).
    StackRef(usize),
}

/// Scalars compare by content, shared handles by identity. This is the
/// machine's internal notion of sameness; macro-level `==` has its own
/// coercing rules.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unset, Value::Unset) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Rc::ptr_eq(a, b),
            (Value::InstAddr(a), Value::InstAddr(b)) => a == b,
            (Value::StackRef(a), Value::StackRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unset => "empty",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Iterator(_) => "array iterator",
            Value::Subroutine(_) => "subroutine",
            Value::Code(_) => "macro function",
            Value::InstAddr(_) => "instruction address",
            Value::StackRef(_) => "stack reference",
        }
    }

    /// Narrow a host 64-bit integer into the macro language's 32-bit
    /// range. Values outside the range are truncated two's-complement
    /// style; the loss is surfaced as a warning, not a failure.
    pub fn from_wide_int(n: i64) -> Value {
        if i64::from(n as i32) != n {
            tracing::warn!(value = n, truncated = n as i32, "integer truncated to 32 bits");
        }
        Value::Int(n as i32)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    fn mismatch(&self, expected: &'static str) -> ExecError {
        ExecError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    // ── Strict extractors ────────────────────────────────────────

    /// The integer payload. No coercion: a string is an error here.
    pub fn as_int(&self) -> ExecResult<i32> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(other.mismatch("integer")),
        }
    }

    /// The string payload. No coercion.
    pub fn as_str(&self) -> ExecResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_array(&self) -> ExecResult<&ArrayPtr> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(other.mismatch("array")),
        }
    }

    pub fn as_iterator_mut(&mut self) -> ExecResult<&mut ArrayIterator> {
        match self {
            Value::Iterator(it) => Ok(it),
            other => Err(other.mismatch("array iterator")),
        }
    }

    pub fn as_subroutine(&self) -> ExecResult<LibraryRoutine> {
        match self {
            Value::Subroutine(f) => Ok(*f),
            other => Err(other.mismatch("subroutine")),
        }
    }

    pub fn as_program(&self) -> ExecResult<&Rc<Program>> {
        match self {
            Value::Code(p) => Ok(p),
            other => Err(other.mismatch("macro function")),
        }
    }

    pub fn as_inst_addr(&self) -> ExecResult<&CodeAddr> {
        match self {
            Value::InstAddr(a) => Ok(a),
            other => Err(other.mismatch("instruction address")),
        }
    }

    pub fn as_stack_ref(&self) -> ExecResult<usize> {
        match self {
            Value::StackRef(i) => Ok(*i),
            other => Err(other.mismatch("stack reference")),
        }
    }

    // ── Implicit coercions ───────────────────────────────────────

    /// Numeric coercion used by arithmetic and comparisons: integers
    /// pass through, strings go through the lenient historical parse,
    /// everything else is an error.
    pub fn coerce_to_int(&self) -> ExecResult<i32> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(s) => {
                parse_leniently(s).ok_or_else(|| ExecError::NotANumber(s.clone()))
            }
            other => Err(other.mismatch("integer")),
        }
    }

    /// String coercion used wherever text is consumed: strings pass
    /// through, integers render as decimal text.
    pub fn coerce_to_string(&self) -> ExecResult<String> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(n) => Ok(n.to_string()),
            other => Err(other.mismatch("string")),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b as i32)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ArrayPtr> for Value {
    fn from(a: ArrayPtr) -> Self {
        Value::Array(a)
    }
}

/// The historical lenient string-to-number parse: optional surrounding
/// blanks, an optional sign, then decimal digits. A bare sign or an
/// empty string reads as zero; anything else fails.
pub fn parse_leniently(s: &str) -> Option<i32> {
    let trimmed = s.trim_matches([' ', '\t']);
    let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        // Out-of-range and digit-free inputs scan as zero
        Some(trimmed.parse().unwrap_or(0))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;

    #[test]
    fn test_default_is_unset() {
        assert!(Value::default().is_unset());
    }

    #[test]
    fn test_constructors_and_extractors() {
        assert_eq!(Value::from(7).as_int().unwrap(), 7);
        assert_eq!(Value::from(true).as_int().unwrap(), 1);
        assert_eq!(Value::from(false).as_int().unwrap(), 0);
        assert_eq!(Value::from("hi").as_str().unwrap(), "hi");
        assert_eq!(Value::from(String::from("ho")).as_str().unwrap(), "ho");
        assert!(Value::from(Array::new().into_ptr()).is_array());
    }

    #[test]
    fn test_extractor_rejects_wrong_variant() {
        let err = Value::from("text").as_int().unwrap_err();
        assert_eq!(
            err,
            ExecError::TypeMismatch {
                expected: "integer",
                found: "string"
            }
        );
        assert!(Value::Int(3).as_str().is_err());
        assert!(Value::Unset.as_array().is_err());
    }

    #[test]
    fn test_wide_int_narrowing_truncates() {
        // 5_000_000_000 mod 2^32, reinterpreted as i32
        assert_eq!(Value::from_wide_int(5_000_000_000).as_int().unwrap(), 705_032_704);
        assert_eq!(Value::from_wide_int(-5_000_000_000).as_int().unwrap(), -705_032_704);
        assert_eq!(Value::from_wide_int(42).as_int().unwrap(), 42);
        assert_eq!(Value::from_wide_int(i64::from(i32::MIN)).as_int().unwrap(), i32::MIN);
    }

    #[test]
    fn test_coerce_to_int() {
        assert_eq!(Value::from("42").coerce_to_int().unwrap(), 42);
        assert_eq!(Value::from(" -7 ").coerce_to_int().unwrap(), -7);
        assert_eq!(Value::from(9).coerce_to_int().unwrap(), 9);
        assert_eq!(
            Value::from("4x").coerce_to_int().unwrap_err(),
            ExecError::NotANumber("4x".into())
        );
        assert!(Value::Unset.coerce_to_int().is_err());
    }

    #[test]
    fn test_coerce_to_string() {
        assert_eq!(Value::from(42).coerce_to_string().unwrap(), "42");
        assert_eq!(Value::from(-3).coerce_to_string().unwrap(), "-3");
        assert_eq!(Value::from("x").coerce_to_string().unwrap(), "x");
        assert!(Value::Unset.coerce_to_string().is_err());
    }

    #[test]
    fn test_parse_leniently_quirks() {
        assert_eq!(parse_leniently("123"), Some(123));
        assert_eq!(parse_leniently("  +9	"), Some(9));
        assert_eq!(parse_leniently("-12"), Some(-12));
        // A bare sign and the empty string scan as zero
        assert_eq!(parse_leniently("+"), Some(0));
        assert_eq!(parse_leniently(""), Some(0));
        // Out-of-range digit strings scan as zero rather than failing
        assert_eq!(parse_leniently("99999999999"), Some(0));
        assert_eq!(parse_leniently("12.5"), None);
        assert_eq!(parse_leniently("7 up"), None);
        assert_eq!(parse_leniently("- 5"), None);
    }

    #[test]
    fn test_value_copy_shares_array_body() {
        let original = Value::from(Array::new().into_ptr());
        let copy = original.clone();
        original
            .as_array()
            .unwrap()
            .borrow_mut()
            .insert("k".into(), Value::from(1));
        let through_copy = copy.as_array().unwrap().borrow().lookup("k");
        assert_eq!(through_copy.unwrap().as_int().unwrap(), 1);
    }
}
