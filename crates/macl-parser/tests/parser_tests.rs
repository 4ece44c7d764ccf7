//! End-to-end compiler tests: compile macro source and execute it on
//! the machine.

use macl_interp::{
    Document, DocumentId, ExecStatus, Host, Machine, MacroError, RoutineError, RoutineRegistry,
    SymbolKind, SymbolTable, Value,
};
use macl_parser::compile;
use macl_types::ErrorCode;

struct Doc;

impl Document for Doc {
    fn id(&self) -> DocumentId {
        DocumentId(1)
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

struct SoloHost {
    doc: Doc,
}

impl Host for SoloHost {
    fn document(&mut self, id: DocumentId) -> Option<&mut dyn Document> {
        if id == DocumentId(1) {
            Some(&mut self.doc)
        } else {
            None
        }
    }
}

fn run_in(machine: &mut Machine, source: &str, args: &[Value]) -> Result<Value, MacroError> {
    let result = compile("test.macl", source, machine.symbols_mut());
    assert!(
        !result.errors.has_errors(),
        "unexpected compile errors: {:?}",
        result.errors.errors
    );
    let main = result.main.expect("source should produce a main program");
    let mut host = SoloHost { doc: Doc };
    let (context, mut status) = machine.execute_macro(&mut host, DocumentId(1), main, args)?;
    loop {
        match status {
            ExecStatus::Done(value) => return Ok(value),
            ExecStatus::TimeLimit => status = machine.continue_macro(&mut host, &context)?,
            ExecStatus::Preempted => panic!("unexpected preemption"),
        }
    }
}

fn run(source: &str) -> Result<Value, MacroError> {
    let registry = RoutineRegistry::new();
    let mut machine = Machine::new(&registry);
    run_in(&mut machine, source, &[])
}

fn eval(source: &str) -> Value {
    run(source).unwrap()
}

fn error_codes(source: &str) -> Vec<ErrorCode> {
    let mut symbols = SymbolTable::new();
    let result = compile("test.macl", source, &mut symbols);
    result.errors.errors.iter().map(|e| e.code).collect()
}

// ─────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval("return 2 + 3 * 4"), Value::Int(14));
    assert_eq!(eval("return (2 + 3) * 4"), Value::Int(20));
    assert_eq!(eval("return 17 % 5"), Value::Int(2));
}

#[test]
fn test_unary_binds_looser_than_power() {
    assert_eq!(eval("return -2^2"), Value::Int(-4));
    assert_eq!(eval("return 2^3^2"), Value::Int(512));
    assert_eq!(eval("return 2^-1"), Value::Int(0));
}

#[test]
fn test_string_concatenation_by_juxtaposition() {
    assert_eq!(eval("return \"a\" 1 + 2"), Value::Str("a3".into()));
    assert_eq!(
        eval("return \"line \" 4 \":\""),
        Value::Str("line 4:".into())
    );
}

#[test]
fn test_comparisons_and_logic() {
    assert_eq!(eval("return 3 < 5 && 5 <= 5"), Value::Int(1));
    assert_eq!(eval("return 1 > 2 || 0"), Value::Int(0));
    assert_eq!(eval("return !0"), Value::Int(1));
    assert_eq!(eval("return \"12\" == 12"), Value::Int(1));
    assert_eq!(eval("return \"abc\" != 12"), Value::Int(1));
}

#[test]
fn test_bitwise_operators_on_numbers() {
    assert_eq!(eval("return 12 & 10"), Value::Int(8));
    assert_eq!(eval("return 12 | 10"), Value::Int(14));
}

// ─────────────────────────────────────────────────────────────────
// Control flow
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_if_else_chain() {
    let source = "\
x = 7
if (x > 10)
    return \"big\"
else if (x > 5)
    return \"medium\"
else
    return \"small\"
";
    assert_eq!(eval(source), Value::Str("medium".into()));
}

#[test]
fn test_while_with_break() {
    let source = "\
i = 0
while (1) {
    i++
    if (i == 5)
        break
}
return i
";
    assert_eq!(eval(source), Value::Int(5));
}

#[test]
fn test_classic_for_loop() {
    let source = "\
s = 0
for (i = 1; i <= 10; i++)
    s += i
return s
";
    assert_eq!(eval(source), Value::Int(55));
}

#[test]
fn test_continue_runs_the_increment() {
    let source = "\
s = 0
for (i = 0; i < 10; i++) {
    if (i % 2)
        continue
    s += i
}
return s
";
    assert_eq!(eval(source), Value::Int(20));
}

#[test]
fn test_long_loop_survives_time_slicing() {
    let source = "\
i = 0
while (i < 500)
    i = i + 1
return i
";
    assert_eq!(eval(source), Value::Int(500));
}

// ─────────────────────────────────────────────────────────────────
// Arrays
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_array_element_round_trip() {
    let source = "\
a[\"greeting\"] = \"hi\"
a[2, 3] = 6
return a[\"greeting\"] a[2, 3]
";
    assert_eq!(eval(source), Value::Str("hi6".into()));
}

#[test]
fn test_compound_array_assignment_and_increment() {
    let source = "\
a[\"n\"] = 40
a[\"n\"] += 1
++a[\"n\"]
return a[\"n\"]
";
    assert_eq!(eval(source), Value::Int(42));
}

#[test]
fn test_delete_and_membership() {
    let source = "\
a[\"x\"] = 1
a[\"y\"] = 2
delete a[\"x\"]
return (\"x\" in a) (\"y\" in a)
";
    assert_eq!(eval(source), Value::Str("01".into()));
}

#[test]
fn test_array_assignment_aliases() {
    let source = "\
a[\"k\"] = 1
b = a
b[\"k\"] = 2
return a[\"k\"]
";
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn test_for_in_iterates_in_key_order() {
    let source = "\
a[\"b\"] = 1
a[\"a\"] = 1
a[\"c\"] = 1
acc = \"\"
for (k in a)
    acc = acc k
return acc
";
    assert_eq!(eval(source), Value::Str("abc".into()));
}

// ─────────────────────────────────────────────────────────────────
// define and calls
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_define_and_recursive_call() {
    let source = "\
define fact {
    if ($1 <= 1)
        return 1
    return $1 * fact($1 - 1)
}
return fact(5)
";
    assert_eq!(eval(source), Value::Int(120));
}

#[test]
fn test_define_only_source_has_no_main() {
    let mut symbols = SymbolTable::new();
    let source = "\
define greet {
    return \"hello \" $1
}
";
    let result = compile("greet.macl", source, &mut symbols);
    assert!(!result.errors.has_errors());
    assert!(result.main.is_none());
    assert_eq!(result.definitions, vec!["greet".to_string()]);
    let sym = symbols.lookup("greet").unwrap();
    assert_eq!(sym.borrow().kind, SymbolKind::MacroFunction);
}

#[test]
fn test_forward_call_before_define() {
    let source = "\
define outer {
    return inner() + 1
}
define inner {
    return 41
}
return outer()
";
    assert_eq!(eval(source), Value::Int(42));
}

#[test]
fn test_macro_arguments() {
    let registry = RoutineRegistry::new();
    let mut machine = Machine::new(&registry);
    let args = [Value::Str("a".into()), Value::Str("b".into())];
    let value = run_in(&mut machine, "return $args[1] $2 $n_args", &args).unwrap();
    assert_eq!(value, Value::Str("ab2".into()));
}

#[test]
fn test_host_defined_special_variable() {
    let registry = RoutineRegistry::new();
    let mut machine = Machine::new(&registry);
    machine.set_global("$status", Value::Int(7));
    let value = run_in(&mut machine, "return $status + 1", &[]).unwrap();
    assert_eq!(value, Value::Int(8));
}

#[test]
fn test_globals_persist_between_compilations() {
    let registry = RoutineRegistry::new();
    let mut machine = Machine::new(&registry);
    machine.set_global("total", Value::Int(0));
    run_in(&mut machine, "total = total + 5\nreturn 0", &[]).unwrap();
    let value = run_in(&mut machine, "return total", &[]).unwrap();
    assert_eq!(value, Value::Int(5));
}

// ─────────────────────────────────────────────────────────────────
// Compile errors
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_break_outside_loop_is_rejected() {
    assert_eq!(error_codes("break\n"), vec![ErrorCode::BREAK_OUTSIDE_LOOP]);
    assert_eq!(
        error_codes("continue\n"),
        vec![ErrorCode::CONTINUE_OUTSIDE_LOOP]
    );
}

#[test]
fn test_calling_a_variable_is_rejected() {
    let registry = RoutineRegistry::new();
    let mut machine = Machine::new(&registry);
    machine.set_global("counter", Value::Int(1));
    let result = compile("test.macl", "counter()\n", machine.symbols_mut());
    let codes: Vec<ErrorCode> = result.errors.errors.iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorCode::NOT_A_FUNCTION]);
}

#[test]
fn test_unterminated_block_is_rejected() {
    assert!(error_codes("if (1) {\n    x = 1\n").contains(&ErrorCode::UNCLOSED_BRACE));
}

#[test]
fn test_undefined_special_variable_is_rejected() {
    assert_eq!(
        error_codes("x = $no_such_thing\n"),
        vec![ErrorCode::UNDEFINED_VARIABLE]
    );
}

#[test]
fn test_assigning_to_argument_forms_is_rejected() {
    assert_eq!(error_codes("$1 = 3\n"), vec![ErrorCode::UNEXPECTED_TOKEN]);
    assert_eq!(
        error_codes("$n_args = 3\n"),
        vec![ErrorCode::UNEXPECTED_TOKEN]
    );
}

#[test]
fn test_nested_define_is_rejected() {
    let source = "\
define f {
    define g {
    }
}
";
    assert!(error_codes(source).contains(&ErrorCode::NESTED_DEFINE));
}

#[test]
fn test_redefining_a_builtin_is_rejected() {
    fn beep(
        _document: &mut dyn Document,
        _args: &mut [Value],
        _result: &mut Option<Value>,
    ) -> Result<macl_interp::Flow, RoutineError> {
        Ok(macl_interp::Flow::Continue)
    }
    let registry = RoutineRegistry::new().with("beep", beep);
    let mut machine = Machine::new(&registry);
    let result = compile("test.macl", "define beep {\n}\n", machine.symbols_mut());
    let codes: Vec<_> = result.errors.errors.iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![ErrorCode::REDEFINED_BUILTIN]);
}

#[test]
fn test_two_statements_on_one_line_are_rejected() {
    assert!(error_codes("x = 5 y = 6\n").contains(&ErrorCode::UNEXPECTED_TOKEN));
}

#[test]
fn test_lex_errors_surface_through_compile() {
    let codes = error_codes("x = \"unterminated\n");
    assert!(codes.contains(&ErrorCode::UNTERMINATED_STRING));
}

#[test]
fn test_error_spans_carry_lines() {
    let mut symbols = SymbolTable::new();
    let result = compile("test.macl", "x = 1\nbreak\n", &mut symbols);
    assert_eq!(result.errors.errors.len(), 1);
    assert_eq!(result.errors.errors[0].span.line, 2);
    assert_eq!(result.errors.errors[0].source_line, "break");
}
