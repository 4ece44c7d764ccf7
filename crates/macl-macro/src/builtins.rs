//! The built-in macro subroutines.
//!
//! Each routine follows the machine's native calling convention: it
//! receives the run document, a mutable slice of argument values, and a
//! result slot, and reports either normal completion or preemption.

use macl_interp::{
    arg_count, arg_int, arg_string, value::parse_leniently, Array, Document, Flow, RoutineError,
    RoutineRegistry, Value,
};

use crate::document::{Buffer, PendingShell};

/// All builtins, ready to install into a machine.
pub fn registry() -> RoutineRegistry {
    RoutineRegistry::new()
        .with("length", length)
        .with("min", min)
        .with("max", max)
        .with("toupper", toupper)
        .with("tolower", tolower)
        .with("substring", substring)
        .with("replace_substring", replace_substring)
        .with("search_string", search_string)
        .with("string_compare", string_compare)
        .with("split", split)
        .with("valid_number", valid_number)
        .with("t_print", t_print)
        .with("getenv", getenv)
        .with("shell_command", shell_command)
}

fn buffer_mut(document: &mut dyn Document) -> Result<&mut Buffer, RoutineError> {
    document
        .as_any_mut()
        .downcast_mut::<Buffer>()
        .ok_or(RoutineError::InvalidContext)
}

/// Normalize a user-supplied character index: negative counts from the
/// end, out of range clamps.
fn normalize_index(index: i32, len: i32) -> i32 {
    let index = if index < 0 { index + len } else { index };
    index.clamp(0, len)
}

// ─────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────

fn length(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, 1)?;
    let s = arg_string(args, 0)?;
    *result = Some(Value::Int(s.chars().count() as i32));
    Ok(Flow::Continue)
}

fn toupper(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, 1)?;
    *result = Some(Value::Str(arg_string(args, 0)?.to_uppercase()));
    Ok(Flow::Continue)
}

fn tolower(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, 1)?;
    *result = Some(Value::Str(arg_string(args, 0)?.to_lowercase()));
    Ok(Flow::Continue)
}

/// `substring(string, start [, end])` — characters from `start` up to
/// but not including `end`. Indices may be negative to count from the
/// end of the string and are clamped into range.
fn substring(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 2, 3)?;
    let s = arg_string(args, 0)?;
    let len = s.chars().count() as i32;
    let from = normalize_index(arg_int(args, 1)?, len);
    let to = if args.len() == 3 {
        normalize_index(arg_int(args, 2)?, len)
    } else {
        len
    };
    let to = to.max(from);
    let out: String = s
        .chars()
        .skip(from as usize)
        .take((to - from) as usize)
        .collect();
    *result = Some(Value::Str(out));
    Ok(Flow::Continue)
}

/// `replace_substring(string, start, end, replacement)`.
fn replace_substring(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 4, 4)?;
    let s = arg_string(args, 0)?;
    let len = s.chars().count() as i32;
    let from = normalize_index(arg_int(args, 1)?, len);
    let to = normalize_index(arg_int(args, 2)?, len).max(from);
    let replacement = arg_string(args, 3)?;

    let mut out: String = s.chars().take(from as usize).collect();
    out.push_str(&replacement);
    out.extend(s.chars().skip(to as usize));
    *result = Some(Value::Str(out));
    Ok(Flow::Continue)
}

/// `search_string(string, searchFor, start)` — character index of the
/// first match at or after `start`, or -1.
fn search_string(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 3, 3)?;
    let s = arg_string(args, 0)?;
    let needle = arg_string(args, 1)?;
    let len = s.chars().count() as i32;
    let start = normalize_index(arg_int(args, 2)?, len) as usize;

    let haystack: String = s.chars().skip(start).collect();
    let found = haystack
        .find(&needle)
        .map(|byte_index| haystack[..byte_index].chars().count() + start);
    *result = Some(match found {
        Some(index) => Value::Int(index as i32),
        None => Value::Int(-1),
    });
    Ok(Flow::Continue)
}

/// `string_compare(a, b)` — -1, 0, or 1.
fn string_compare(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 2, 2)?;
    let a = arg_string(args, 0)?;
    let b = arg_string(args, 1)?;
    *result = Some(Value::Int(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }));
    Ok(Flow::Continue)
}

/// `split(string, separator)` — pieces keyed `"0"`, `"1"`, ... An
/// empty separator splits into single characters.
fn split(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 2, 2)?;
    let s = arg_string(args, 0)?;
    let separator = arg_string(args, 1)?;

    let mut array = Array::new();
    if separator.is_empty() {
        for (i, ch) in s.chars().enumerate() {
            array.insert(i.to_string(), Value::Str(ch.to_string()));
        }
    } else {
        for (i, piece) in s.split(&separator).enumerate() {
            array.insert(i.to_string(), Value::Str(piece.to_string()));
        }
    }
    *result = Some(Value::Array(array.into_ptr()));
    Ok(Flow::Continue)
}

// ─────────────────────────────────────────────────────────────────
// Numbers
// ─────────────────────────────────────────────────────────────────

fn min(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, usize::MAX)?;
    let mut best = arg_int(args, 0)?;
    for index in 1..args.len() {
        best = best.min(arg_int(args, index)?);
    }
    *result = Some(Value::Int(best));
    Ok(Flow::Continue)
}

fn max(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, usize::MAX)?;
    let mut best = arg_int(args, 0)?;
    for index in 1..args.len() {
        best = best.max(arg_int(args, index)?);
    }
    *result = Some(Value::Int(best));
    Ok(Flow::Continue)
}

/// `valid_number(string)` — whether the string scans as an integer.
fn valid_number(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, 1)?;
    let s = arg_string(args, 0)?;
    *result = Some(Value::from(parse_leniently(&s).is_some()));
    Ok(Flow::Continue)
}

// ─────────────────────────────────────────────────────────────────
// Host access
// ─────────────────────────────────────────────────────────────────

/// `t_print(...)` — write each argument to the buffer's output.
fn t_print(
    document: &mut dyn Document,
    args: &mut [Value],
    _result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, usize::MAX)?;
    let mut text = String::new();
    for index in 0..args.len() {
        text.push_str(&arg_string(args, index)?);
    }
    buffer_mut(document)?.printed.push_str(&text);
    Ok(Flow::Continue)
}

fn getenv(
    _document: &mut dyn Document,
    args: &mut [Value],
    result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 1, 1)?;
    let name = arg_string(args, 0)?;
    *result = Some(Value::Str(std::env::var(name).unwrap_or_default()));
    Ok(Flow::Continue)
}

/// `shell_command(command, input)` — stash the request on the buffer
/// and suspend; the workspace runs the command and resumes the macro
/// with its output.
fn shell_command(
    document: &mut dyn Document,
    args: &mut [Value],
    _result: &mut Option<Value>,
) -> Result<Flow, RoutineError> {
    arg_count(args, 2, 2)?;
    let command = arg_string(args, 0)?;
    let input = arg_string(args, 1)?;
    buffer_mut(document)?.pending_shell = Some(PendingShell { command, input });
    Ok(Flow::Preempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(
        routine: macl_interp::LibraryRoutine,
        args: &[Value],
    ) -> Result<Option<Value>, RoutineError> {
        let mut store = crate::document::DocumentStore::new();
        let id = store.create("test");
        let document = match store.get_mut(id) {
            Some(b) => b as &mut dyn Document,
            None => unreachable!(),
        };
        let mut args: Vec<Value> = args.to_vec();
        let mut result = None;
        routine(document, &mut args, &mut result)?;
        Ok(result)
    }

    fn call_str(routine: macl_interp::LibraryRoutine, args: &[Value]) -> String {
        match call(routine, args).unwrap().unwrap() {
            Value::Str(s) => s,
            other => panic!("expected string result, got {other:?}"),
        }
    }

    fn call_int(routine: macl_interp::LibraryRoutine, args: &[Value]) -> i32 {
        call(routine, args).unwrap().unwrap().as_int().unwrap()
    }

    #[test]
    fn test_length_and_case() {
        assert_eq!(call_int(length, &[Value::from("hello")]), 5);
        assert_eq!(call_int(length, &[Value::from("")]), 0);
        assert_eq!(call_str(toupper, &[Value::from("MiXed")]), "MIXED");
        assert_eq!(call_str(tolower, &[Value::from("MiXed")]), "mixed");
    }

    #[test]
    fn test_substring_indexing() {
        let s = Value::from("abcdef");
        assert_eq!(
            call_str(substring, &[s.clone(), Value::from(1), Value::from(4)]),
            "bcd"
        );
        assert_eq!(call_str(substring, &[s.clone(), Value::from(4)]), "ef");
        // Negative indices count from the end
        assert_eq!(call_str(substring, &[s.clone(), Value::from(-2)]), "ef");
        assert_eq!(
            call_str(substring, &[s.clone(), Value::from(0), Value::from(-3)]),
            "abc"
        );
        // Out-of-range clamps; inverted range is empty
        assert_eq!(call_str(substring, &[s.clone(), Value::from(99)]), "");
        assert_eq!(
            call_str(substring, &[s, Value::from(4), Value::from(2)]),
            ""
        );
    }

    #[test]
    fn test_replace_substring() {
        assert_eq!(
            call_str(
                replace_substring,
                &[
                    Value::from("hello world"),
                    Value::from(6),
                    Value::from(11),
                    Value::from("there")
                ]
            ),
            "hello there"
        );
    }

    #[test]
    fn test_search_string() {
        let s = Value::from("one two two");
        assert_eq!(
            call_int(search_string, &[s.clone(), Value::from("two"), Value::from(0)]),
            4
        );
        assert_eq!(
            call_int(search_string, &[s.clone(), Value::from("two"), Value::from(5)]),
            8
        );
        assert_eq!(
            call_int(search_string, &[s, Value::from("three"), Value::from(0)]),
            -1
        );
    }

    #[test]
    fn test_string_compare() {
        assert_eq!(
            call_int(string_compare, &[Value::from("a"), Value::from("b")]),
            -1
        );
        assert_eq!(
            call_int(string_compare, &[Value::from("b"), Value::from("b")]),
            0
        );
        assert_eq!(
            call_int(string_compare, &[Value::from("c"), Value::from("b")]),
            1
        );
    }

    #[test]
    fn test_split_keys_count_from_zero() {
        let result = call(split, &[Value::from("a:b:c"), Value::from(":")])
            .unwrap()
            .unwrap();
        let Value::Array(array) = result else {
            panic!("expected array");
        };
        let array = array.borrow();
        assert_eq!(array.len(), 3);
        assert_eq!(array.lookup("0"), Some(Value::from("a")));
        assert_eq!(array.lookup("2"), Some(Value::from("c")));
    }

    #[test]
    fn test_min_max_variadic() {
        let args = [Value::from(3), Value::from(-1), Value::from("7")];
        assert_eq!(call_int(min, &args), -1);
        assert_eq!(call_int(max, &args), 7);
    }

    #[test]
    fn test_valid_number() {
        assert_eq!(call_int(valid_number, &[Value::from(" 42 ")]), 1);
        assert_eq!(call_int(valid_number, &[Value::from("-7")]), 1);
        assert_eq!(call_int(valid_number, &[Value::from("4x")]), 0);
    }

    #[test]
    fn test_wrong_argument_counts_are_rejected() {
        assert_eq!(
            call(length, &[]).unwrap_err(),
            RoutineError::TooFewArguments
        );
        assert_eq!(
            call(length, &[Value::from("a"), Value::from("b")]).unwrap_err(),
            RoutineError::TooManyArguments
        );
    }

    #[test]
    fn test_registry_contains_every_builtin() {
        let registry = registry();
        let names: Vec<&str> = registry.entries().map(|(name, _)| name).collect();
        for expected in [
            "length",
            "substring",
            "split",
            "t_print",
            "shell_command",
            "getenv",
        ] {
            assert!(names.contains(&expected), "missing builtin '{expected}'");
        }
    }
}
