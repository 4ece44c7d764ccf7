//! The execution machine.
//!
//! Programs run against a fixed-capacity value stack. A subroutine
//! call lays down a frame: the arguments, the return address, the saved
//! frame pointer, the argument count, a cache slot for the argument
//! array, and then the callee's locals. The frame pointer addresses the
//! first local; the bookkeeping slots sit at small negative offsets
//! below it.
//!
//! Execution is sliced: each [`Machine::continue_macro`] call runs at
//! most [`INSTRUCTION_LIMIT`] instructions before reporting
//! [`ExecStatus::TimeLimit`], so a runaway macro cannot starve the
//! host. A native routine can additionally report preemption, which
//! suspends the run mid-statement; the shared context carries enough
//! state to resume from exactly that point.

use std::cell::RefCell;
use std::rc::Rc;

use crate::array::{make_array_key, Array, ArrayIterator};
use crate::error::{ExecError, ExecResult, MacroError};
use crate::host::{DocumentId, Host};
use crate::program::{CodeAddr, Inst, Program};
use crate::routine::{Flow, LibraryRoutine, RoutineRegistry};
use crate::symbol::{SymbolKind, SymbolRef, SymbolTable};
use crate::value::{parse_leniently, Value};

/// Capacity of the value stack.
pub const STACK_SIZE: usize = 1024;

/// Instructions executed per slice before yielding back to the host.
pub const INSTRUCTION_LIMIT: usize = 100;

// Frame-pointer-relative offsets of the bookkeeping slots.
const FP_ARG_ARRAY_CACHE_INDEX: isize = -1;
const FP_ARG_COUNT_INDEX: isize = -2;
const FP_OLD_FP_INDEX: isize = -3;
const FP_RET_PC_INDEX: isize = -4;
/// Distance from the frame pointer back to the end of the arguments.
const FP_TO_ARGS_DIST: usize = 4;

/// The resumable state of one macro run.
#[derive(Debug)]
pub struct MacroContext {
    pub stack: Vec<Value>,
    /// Index of the current frame's first local slot.
    pub frame_ptr: usize,
    /// Next instruction to execute.
    pub pc: CodeAddr,
    /// Document the macro runs against.
    pub run_document: DocumentId,
    /// Document the macro's editing operations currently target.
    pub focus_document: DocumentId,
}

/// Shared handle to a run's context; held by the machine's caller so a
/// suspended run can be resumed later.
pub type SharedContext = Rc<RefCell<MacroContext>>;

/// How a slice of execution ended (errors travel separately).
#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    /// The outermost frame returned; the value is the macro's result.
    Done(Value),
    /// A native routine suspended the run.
    Preempted,
    /// The instruction slice was used up; call again to keep going.
    TimeLimit,
}

/// Outcome of one instruction.
enum Step {
    Next,
    Done(Value),
    Preempt,
}

impl MacroContext {
    fn new(document: DocumentId, program: &Rc<Program>) -> Self {
        Self {
            stack: Vec::new(),
            frame_ptr: 0,
            pc: CodeAddr::new(Rc::clone(program), 0),
            run_document: document,
            focus_document: document,
        }
    }

    fn push(&mut self, value: Value) -> ExecResult<()> {
        if self.stack.len() >= STACK_SIZE {
            return Err(ExecError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> ExecResult<Value> {
        self.stack.pop().ok_or(ExecError::StackUnderflow)
    }

    fn pop_int(&mut self) -> ExecResult<i32> {
        self.pop()?.coerce_to_int()
    }

    fn pop_string(&mut self) -> ExecResult<String> {
        self.pop()?.coerce_to_string()
    }

    fn frame_slot(&self, offset: isize) -> ExecResult<usize> {
        let index = self.frame_ptr as isize + offset;
        if index < 0 || index as usize >= self.stack.len() {
            return Err(ExecError::Internal(format!(
                "frame slot {offset} out of range"
            )));
        }
        Ok(index as usize)
    }

    fn frame_value(&self, offset: isize) -> ExecResult<&Value> {
        let slot = self.frame_slot(offset)?;
        Ok(&self.stack[slot])
    }

    fn n_args(&self) -> ExecResult<usize> {
        Ok(self.frame_value(FP_ARG_COUNT_INDEX)?.as_int()? as usize)
    }

    /// Stack index of the 1-based argument `position` of the current
    /// frame.
    fn arg_slot(&self, position: i32) -> ExecResult<usize> {
        let n_args = self.n_args()?;
        if position < 1 || position as usize > n_args {
            return Err(ExecError::ArgumentOutOfRange(position));
        }
        Ok(self.frame_ptr - FP_TO_ARGS_DIST - n_args + (position as usize - 1))
    }
}

/// The macro execution machine: the global symbol table plus the
/// execution engine. One machine serves every document of a host.
#[derive(Debug)]
pub struct Machine {
    symbols: SymbolTable,
}

impl Machine {
    /// Create a machine with the given native routines installed.
    pub fn new(registry: &RoutineRegistry) -> Self {
        let mut symbols = SymbolTable::new();
        for (name, routine) in registry.entries() {
            symbols.install_subroutine(name, routine);
        }
        Self { symbols }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Read a global variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.symbols.lookup(name).map(|s| s.borrow().value.clone())
    }

    /// Set a global variable, installing it if needed.
    pub fn set_global(&mut self, name: &str, value: Value) {
        match self.symbols.lookup(name) {
            Some(sym) => sym.borrow_mut().value = value,
            None => {
                self.symbols.install(name, SymbolKind::Global, value);
            }
        }
    }

    /// Build a fresh context with the program's outermost frame pushed,
    /// ready to execute.
    pub fn prepare(
        &mut self,
        document: DocumentId,
        program: Rc<Program>,
        args: &[Value],
    ) -> Result<SharedContext, MacroError> {
        let mut ctx = MacroContext::new(document, &program);
        let setup = (|| -> ExecResult<()> {
            for arg in args {
                ctx.push(arg.clone())?;
            }
            push_frame(&mut ctx, &program, args.len(), Value::Unset)
        })();
        setup.map_err(|e| MacroError::new(e.to_string(), None))?;
        Ok(Rc::new(RefCell::new(ctx)))
    }

    /// Start a macro: build its context and run the first slice.
    pub fn execute_macro(
        &mut self,
        host: &mut dyn Host,
        document: DocumentId,
        program: Rc<Program>,
        args: &[Value],
    ) -> Result<(SharedContext, ExecStatus), MacroError> {
        let context = self.prepare(document, program, args)?;
        let status = self.continue_macro(host, &context)?;
        Ok((context, status))
    }

    /// Run one instruction slice of a prepared or suspended context.
    pub fn continue_macro(
        &mut self,
        host: &mut dyn Host,
        context: &SharedContext,
    ) -> Result<ExecStatus, MacroError> {
        let ctx = &mut *context.borrow_mut();
        let mut inst_count = 0usize;
        loop {
            let index = ctx.pc.index;
            let program = Rc::clone(&ctx.pc.program);
            let inst = match program.code.get(index) {
                Some(inst) => inst.clone(),
                None => {
                    return Err(MacroError::new(
                        ExecError::Internal("ran past end of program".into()).to_string(),
                        None,
                    ))
                }
            };
            ctx.pc.index += 1;

            match step(ctx, host, &inst, index) {
                Ok(Step::Next) => {}
                Ok(Step::Done(value)) => return Ok(ExecStatus::Done(value)),
                Ok(Step::Preempt) => return Ok(ExecStatus::Preempted),
                Err(err) => {
                    return Err(MacroError::new(err.to_string(), program.line_at(index)))
                }
            }

            inst_count += 1;
            if inst_count >= INSTRUCTION_LIMIT {
                return Ok(ExecStatus::TimeLimit);
            }
        }
    }

    /// Play `program` as a subroutine call inside an existing run. Used
    /// when a new macro is requested while one is already active: the
    /// new code runs first, then the interrupted code continues.
    pub fn run_as_subroutine(
        &mut self,
        context: &SharedContext,
        program: Rc<Program>,
        args: &[Value],
    ) -> Result<(), MacroError> {
        let ctx = &mut *context.borrow_mut();
        let ret_pc = Value::InstAddr(ctx.pc.clone());
        let setup = (|| -> ExecResult<()> {
            for arg in args {
                ctx.push(arg.clone())?;
            }
            push_frame(ctx, &program, args.len(), ret_pc)
        })();
        setup.map_err(|e| MacroError::new(e.to_string(), None))
    }

    /// Replace the value a just-preempted native call produced, so the
    /// macro resumes seeing the host-supplied result. Only applies when
    /// the preceding instruction fetched a return value; returns
    /// whether the replacement happened.
    pub fn modify_returned_value(&self, context: &SharedContext, value: Value) -> bool {
        let ctx = &mut *context.borrow_mut();
        let Some(prev) = ctx.pc.index.checked_sub(1) else {
            return false;
        };
        if !matches!(ctx.pc.program.code.get(prev), Some(Inst::FetchRetVal)) {
            return false;
        }
        match ctx.stack.last_mut() {
            Some(top) => {
                *top = value;
                true
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Frame management
// ─────────────────────────────────────────────────────────────────

/// Push a call frame over `n_args` already-stacked arguments and aim
/// the program counter at the callee's first instruction.
fn push_frame(
    ctx: &mut MacroContext,
    program: &Rc<Program>,
    n_args: usize,
    ret_pc: Value,
) -> ExecResult<()> {
    ctx.push(ret_pc)?;
    ctx.push(Value::StackRef(ctx.frame_ptr))?;
    ctx.push(Value::Int(n_args as i32))?;
    ctx.push(Value::Unset)?; // argument-array cache
    ctx.frame_ptr = ctx.stack.len();
    for _ in &program.locals {
        ctx.push(Value::Unset)?;
    }
    ctx.pc = CodeAddr::new(Rc::clone(program), 0);
    Ok(())
}

/// Discard the current frame including its arguments. Returns the
/// saved return address and the finished program's name.
fn pop_frame(ctx: &mut MacroContext) -> ExecResult<(Value, String)> {
    let finished = ctx.pc.program.name.clone();
    let ret_pc = ctx.frame_value(FP_RET_PC_INDEX)?.clone();
    let old_fp = ctx.frame_value(FP_OLD_FP_INDEX)?.as_stack_ref()?;
    let n_args = ctx.frame_value(FP_ARG_COUNT_INDEX)?.as_int()? as usize;
    let base = ctx.frame_ptr - FP_TO_ARGS_DIST - n_args;
    ctx.stack.truncate(base);
    ctx.frame_ptr = old_fp;
    Ok((ret_pc, finished))
}

// ─────────────────────────────────────────────────────────────────
// Symbol access
// ─────────────────────────────────────────────────────────────────

/// Read a symbol's value out of its storage location. `ProcValue`
/// symbols are not handled here; the caller decides whether computed
/// reads are allowed.
fn read_symbol(ctx: &MacroContext, sym: &SymbolRef) -> ExecResult<Value> {
    let (kind, value) = {
        let s = sym.borrow();
        (s.kind, s.value.clone())
    };
    match kind {
        SymbolKind::Const
        | SymbolKind::Global
        | SymbolKind::Subroutine
        | SymbolKind::MacroFunction
        | SymbolKind::ProcValue => Ok(value),
        SymbolKind::Local => {
            let slot = ctx.frame_slot(value.as_int()? as isize)?;
            Ok(ctx.stack[slot].clone())
        }
        SymbolKind::Arg => {
            let slot = ctx.arg_slot(value.as_int()?)?;
            Ok(ctx.stack[slot].clone())
        }
    }
}

/// Store a value into a symbol's storage location.
fn store_symbol(ctx: &mut MacroContext, sym: &SymbolRef, value: Value) -> ExecResult<()> {
    let (kind, location, name) = {
        let s = sym.borrow();
        (s.kind, s.value.clone(), s.name.clone())
    };
    match kind {
        SymbolKind::Global => {
            sym.borrow_mut().value = value;
            Ok(())
        }
        SymbolKind::Local => {
            let slot = ctx.frame_slot(location.as_int()? as isize)?;
            ctx.stack[slot] = value;
            Ok(())
        }
        SymbolKind::Arg => {
            let slot = ctx.arg_slot(location.as_int()?)?;
            ctx.stack[slot] = value;
            Ok(())
        }
        SymbolKind::Const
        | SymbolKind::ProcValue
        | SymbolKind::Subroutine
        | SymbolKind::MacroFunction => Err(ExecError::BadAssignTarget(name)),
    }
}

// ─────────────────────────────────────────────────────────────────
// Instruction dispatch
// ─────────────────────────────────────────────────────────────────

fn jump(ctx: &mut MacroContext, index: usize, offset: isize) -> ExecResult<Step> {
    let target = index as isize + offset;
    if target < 0 {
        return Err(ExecError::Internal("branch before start of program".into()));
    }
    ctx.pc.index = target as usize;
    Ok(Step::Next)
}

fn step(
    ctx: &mut MacroContext,
    host: &mut dyn Host,
    inst: &Inst,
    index: usize,
) -> ExecResult<Step> {
    match inst {
        Inst::ReturnNoValue | Inst::Return => {
            let value = if matches!(inst, Inst::Return) {
                Some(ctx.pop()?)
            } else {
                None
            };
            let (ret_pc, finished) = pop_frame(ctx)?;
            match ret_pc {
                Value::Unset => Ok(Step::Done(value.unwrap_or_default())),
                Value::InstAddr(addr) => {
                    ctx.pc = addr;
                    if matches!(ctx.pc.program.code.get(ctx.pc.index), Some(Inst::FetchRetVal)) {
                        match value {
                            Some(v) => {
                                ctx.push(v)?;
                                ctx.pc.index += 1;
                            }
                            None => return Err(ExecError::NoReturnValue(finished)),
                        }
                    }
                    Ok(Step::Next)
                }
                other => Err(ExecError::Internal(format!(
                    "corrupt frame: return address is {}",
                    other.type_name()
                ))),
            }
        }

        Inst::PushSym(sym) => {
            let kind = sym.borrow().kind;
            if kind == SymbolKind::ProcValue {
                let (name, routine) = {
                    let s = sym.borrow();
                    (s.name.clone(), s.value.as_subroutine()?)
                };
                let document = host
                    .document(ctx.focus_document)
                    .ok_or(ExecError::DocumentVanished)?;
                let mut result = None;
                routine(document, &mut [], &mut result).map_err(|source| {
                    ExecError::Routine {
                        name: name.clone(),
                        source,
                    }
                })?;
                let value = result.ok_or(ExecError::NoReturnValue(name))?;
                ctx.push(value)?;
            } else {
                let value = read_symbol(ctx, sym)?;
                ctx.push(value)?;
            }
            Ok(Step::Next)
        }

        Inst::Dup => {
            let top = ctx.stack.last().cloned().ok_or(ExecError::StackUnderflow)?;
            ctx.push(top)?;
            Ok(Step::Next)
        }

        Inst::Assign(sym) => {
            let value = ctx.pop()?;
            store_symbol(ctx, sym, value)?;
            Ok(Step::Next)
        }

        // ── Arithmetic ───────────────────────────────────────────
        Inst::Add => binary_or_array_op(ctx, "+", i32::wrapping_add, Array::union),
        Inst::Sub => binary_or_array_op(ctx, "-", i32::wrapping_sub, Array::difference),
        Inst::BitAnd => binary_or_array_op(ctx, "&", |a, b| a & b, Array::intersection),
        Inst::BitOr => binary_or_array_op(ctx, "|", |a, b| a | b, Array::symmetric_difference),
        Inst::Mul => int_binary(ctx, |a, b| Ok(a.wrapping_mul(b))),
        Inst::Div => int_binary(ctx, |a, b| {
            if b == 0 {
                Err(ExecError::DivideByZero)
            } else {
                Ok(a.wrapping_div(b))
            }
        }),
        Inst::Mod => int_binary(ctx, |a, b| {
            if b == 0 {
                Err(ExecError::ModuloByZero)
            } else {
                Ok(a.wrapping_rem(b))
            }
        }),
        Inst::Power => int_binary(ctx, power),
        Inst::Negate => {
            let n = ctx.pop_int()?;
            ctx.push(Value::Int(n.wrapping_neg()))?;
            Ok(Step::Next)
        }
        Inst::Incr => {
            let n = ctx.pop_int()?;
            ctx.push(Value::Int(n.wrapping_add(1)))?;
            Ok(Step::Next)
        }
        Inst::Decr => {
            let n = ctx.pop_int()?;
            ctx.push(Value::Int(n.wrapping_sub(1)))?;
            Ok(Step::Next)
        }

        // ── Comparison & logic ───────────────────────────────────
        Inst::Gt => int_compare(ctx, |a, b| a > b),
        Inst::Lt => int_compare(ctx, |a, b| a < b),
        Inst::Ge => int_compare(ctx, |a, b| a >= b),
        Inst::Le => int_compare(ctx, |a, b| a <= b),
        Inst::Eq => {
            let v2 = ctx.pop()?;
            let v1 = ctx.pop()?;
            let equal = values_equal(&v1, &v2)?;
            ctx.push(Value::from(equal))?;
            Ok(Step::Next)
        }
        Inst::Ne => {
            let v2 = ctx.pop()?;
            let v1 = ctx.pop()?;
            let equal = values_equal(&v1, &v2)?;
            ctx.push(Value::from(!equal))?;
            Ok(Step::Next)
        }
        Inst::And => int_compare(ctx, |a, b| a != 0 && b != 0),
        Inst::Or => int_compare(ctx, |a, b| a != 0 || b != 0),
        Inst::Not => {
            let n = ctx.pop_int()?;
            ctx.push(Value::from(n == 0))?;
            Ok(Step::Next)
        }

        Inst::Concat => {
            let right = ctx.pop_string()?;
            let left = ctx.pop_string()?;
            ctx.push(Value::Str(left + &right))?;
            Ok(Step::Next)
        }

        // ── Calls ────────────────────────────────────────────────
        Inst::SubrCall { sym, n_args } => call_subroutine(ctx, host, sym, *n_args),
        Inst::FetchRetVal => {
            // Call sites consume this instruction inline when they
            // push their result; reaching it directly means the
            // preceding call produced nothing to fetch.
            Err(ExecError::Internal("no return value to fetch".into()))
        }

        // ── Branches ─────────────────────────────────────────────
        Inst::Branch(offset) => jump(ctx, index, *offset),
        Inst::BranchTrue(offset) => {
            if ctx.pop_int()? != 0 {
                jump(ctx, index, *offset)
            } else {
                Ok(Step::Next)
            }
        }
        Inst::BranchFalse(offset) => {
            if ctx.pop_int()? == 0 {
                jump(ctx, index, *offset)
            } else {
                Ok(Step::Next)
            }
        }
        Inst::BranchNever(_) => Ok(Step::Next),

        // ── Arrays ───────────────────────────────────────────────
        Inst::ArrayRef(n_dim) => {
            let key = pop_subscript_key(ctx, *n_dim)?;
            let container = ctx.pop()?;
            let array = container.as_array()?;
            let value = array
                .borrow()
                .lookup(&key)
                .ok_or(ExecError::KeyNotFound(key))?;
            ctx.push(value)?;
            Ok(Step::Next)
        }

        Inst::ArrayAssign(n_dim) => {
            let value = ctx.pop()?;
            let key = pop_subscript_key(ctx, *n_dim)?;
            let container = ctx.pop()?;
            container.as_array()?.borrow_mut().insert(key, value);
            Ok(Step::Next)
        }

        Inst::ArrayRefAssignSetup { bin_op, n_dim } => {
            let rhs = if *bin_op { Some(ctx.pop()?) } else { None };
            let len = ctx.stack.len();
            if len < n_dim + 1 {
                return Err(ExecError::StackUnderflow);
            }
            let key = make_array_key(&ctx.stack[len - n_dim..len])?;
            let current = ctx.stack[len - n_dim - 1]
                .as_array()?
                .borrow()
                .lookup(&key)
                .ok_or(ExecError::KeyNotFound(key))?;
            ctx.push(current)?;
            if let Some(rhs) = rhs {
                ctx.push(rhs)?;
            }
            Ok(Step::Next)
        }

        Inst::BeginArrayIter { iterator } => {
            let container = ctx.pop()?;
            let array = match container {
                Value::Array(a) => a,
                _ => return Err(ExecError::NotIterable),
            };
            store_symbol(ctx, iterator, Value::Iterator(ArrayIterator::first(array)))?;
            Ok(Step::Next)
        }

        Inst::ArrayIter {
            item,
            iterator,
            end_offset,
        } => {
            let slot = {
                let location = iterator.borrow().value.clone();
                ctx.frame_slot(location.as_int()? as isize)?
            };
            let next = ctx.stack[slot].as_iterator_mut()?.next()?;
            match next {
                Some(key) => {
                    store_symbol(ctx, item, Value::Str(key))?;
                    Ok(Step::Next)
                }
                None => jump(ctx, index, *end_offset),
            }
        }

        Inst::InArray => {
            let container = ctx.pop()?;
            let array = container.as_array()?;
            let probe = ctx.pop()?;
            let found = match &probe {
                Value::Array(sub) => sub.borrow().is_subset_of(&array.borrow()),
                _ => {
                    let key = make_array_key(std::slice::from_ref(&probe))?;
                    array.borrow().contains_key(&key)
                }
            };
            ctx.push(Value::from(found))?;
            Ok(Step::Next)
        }

        Inst::ArrayDelete(n_dim) => {
            if *n_dim == 0 {
                let container = ctx.pop()?;
                container.as_array()?.borrow_mut().clear();
            } else {
                let key = pop_subscript_key(ctx, *n_dim)?;
                let container = ctx.pop()?;
                container.as_array()?.borrow_mut().erase(&key);
            }
            Ok(Step::Next)
        }

        Inst::PushArraySym { sym, create } => {
            let current = read_symbol(ctx, sym)?;
            match current {
                Value::Array(_) => ctx.push(current)?,
                Value::Unset if *create => {
                    let fresh = Array::new().into_ptr();
                    store_symbol(ctx, sym, Value::Array(Rc::clone(&fresh)))?;
                    ctx.push(Value::Array(fresh))?;
                }
                _ => return Err(ExecError::NotAnArray(sym.borrow().name.clone())),
            }
            Ok(Step::Next)
        }

        // ── Arguments ────────────────────────────────────────────
        Inst::PushArg => {
            let position = ctx.pop_int()?;
            let slot = ctx.arg_slot(position)?;
            let value = ctx.stack[slot].clone();
            ctx.push(value)?;
            Ok(Step::Next)
        }
        Inst::PushArgCount => {
            let n = ctx.n_args()?;
            ctx.push(Value::Int(n as i32))?;
            Ok(Step::Next)
        }
        Inst::PushArgArray => {
            let cache_slot = ctx.frame_slot(FP_ARG_ARRAY_CACHE_INDEX)?;
            if ctx.stack[cache_slot].is_unset() {
                let n = ctx.n_args()?;
                let mut array = Array::new();
                for position in 1..=n {
                    let slot = ctx.arg_slot(position as i32)?;
                    array.insert(position.to_string(), ctx.stack[slot].clone());
                }
                ctx.stack[cache_slot] = Value::Array(array.into_ptr());
            }
            let cached = ctx.stack[cache_slot].clone();
            ctx.push(cached)?;
            Ok(Step::Next)
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Operation helpers
// ─────────────────────────────────────────────────────────────────

fn int_binary(
    ctx: &mut MacroContext,
    op: impl Fn(i32, i32) -> ExecResult<i32>,
) -> ExecResult<Step> {
    let right = ctx.pop_int()?;
    let left = ctx.pop_int()?;
    ctx.push(Value::Int(op(left, right)?))?;
    Ok(Step::Next)
}

fn int_compare(ctx: &mut MacroContext, op: impl Fn(i32, i32) -> bool) -> ExecResult<Step> {
    let right = ctx.pop_int()?;
    let left = ctx.pop_int()?;
    ctx.push(Value::from(op(left, right)))?;
    Ok(Step::Next)
}

/// `+ - & |` work on two numbers or on two arrays; mixing is an error.
fn binary_or_array_op(
    ctx: &mut MacroContext,
    op_name: &'static str,
    int_op: impl Fn(i32, i32) -> i32,
    array_op: impl Fn(&Array, &Array) -> Array,
) -> ExecResult<Step> {
    let right = ctx.pop()?;
    let left = ctx.pop()?;
    let result = match (&left, &right) {
        (Value::Array(a), Value::Array(b)) => {
            Value::Array(array_op(&a.borrow(), &b.borrow()).into_ptr())
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => {
            return Err(ExecError::MixedArrayOperands(op_name))
        }
        _ => Value::Int(int_op(left.coerce_to_int()?, right.coerce_to_int()?)),
    };
    ctx.push(result)?;
    Ok(Step::Next)
}

/// Equality across the observable value kinds. A string compared with
/// an integer is equal when the string scans as that number; a string
/// that does not scan compares unequal rather than failing.
fn values_equal(v1: &Value, v2: &Value) -> ExecResult<bool> {
    match (v1, v2) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            Ok(parse_leniently(s) == Some(*n))
        }
        _ => Err(ExecError::CompareIncompatible),
    }
}

/// Integer exponentiation with the historical rounding: computed in
/// floating point, rounded half away from zero; negative exponents
/// collapse to zero except for bases 1 and -1.
fn power(base: i32, exponent: i32) -> ExecResult<i32> {
    if exponent < 0 && base != 1 && base != -1 {
        return if base == 0 {
            Err(ExecError::ZeroToNegativePower)
        } else {
            Ok(0)
        };
    }
    let raw = f64::from(base).powi(exponent);
    if base < 0 && exponent & 1 == 1 {
        Ok((raw - 0.5) as i32)
    } else {
        Ok((raw + 0.5) as i32)
    }
}

/// Pop `n_dim` subscript components (last on top) and build the key.
fn pop_subscript_key(ctx: &mut MacroContext, n_dim: usize) -> ExecResult<String> {
    if n_dim == 0 {
        return Err(ExecError::Internal("array access without subscripts".into()));
    }
    let mut components = vec![Value::Unset; n_dim];
    for slot in components.iter_mut().rev() {
        *slot = ctx.pop()?;
    }
    make_array_key(&components)
}

/// Dispatch a call through a symbol: macro functions get a new frame,
/// native routines run immediately against the host document.
fn call_subroutine(
    ctx: &mut MacroContext,
    host: &mut dyn Host,
    sym: &SymbolRef,
    n_args: usize,
) -> ExecResult<Step> {
    let (kind, name, value) = {
        let s = sym.borrow();
        (s.kind, s.name.clone(), s.value.clone())
    };
    match kind {
        SymbolKind::Subroutine => {
            let routine = value.as_subroutine()?;
            call_native(ctx, host, &name, routine, n_args)
        }
        SymbolKind::MacroFunction => match value {
            Value::Code(program) => {
                let ret_pc = Value::InstAddr(ctx.pc.clone());
                push_frame(ctx, &program, n_args, ret_pc)?;
                Ok(Step::Next)
            }
            Value::Unset => Err(ExecError::NotDefined(name)),
            _ => Err(ExecError::NotCallable(name)),
        },
        _ => Err(ExecError::NotCallable(name)),
    }
}

fn call_native(
    ctx: &mut MacroContext,
    host: &mut dyn Host,
    name: &str,
    routine: LibraryRoutine,
    n_args: usize,
) -> ExecResult<Step> {
    let stack_len = ctx.stack.len();
    if stack_len < n_args {
        return Err(ExecError::StackUnderflow);
    }
    let args_start = stack_len - n_args;

    // Native calls target the focus document, which the host may move
    // mid-run; the run document stays fixed for the macro's lifetime.
    let document = host
        .document(ctx.focus_document)
        .ok_or(ExecError::DocumentVanished)?;
    let mut result = None;
    let flow = routine(document, &mut ctx.stack[args_start..], &mut result).map_err(
        |source| ExecError::Routine {
            name: name.to_string(),
            source,
        },
    )?;
    ctx.stack.truncate(args_start);

    let preempted = flow == Flow::Preempt;
    // Consume a following fetch inline, so a suspended call leaves a
    // placeholder the host can later overwrite with the real result.
    if matches!(ctx.pc.program.code.get(ctx.pc.index), Some(Inst::FetchRetVal)) {
        if result.is_none() && !preempted {
            return Err(ExecError::NoReturnValue(name.to_string()));
        }
        ctx.push(result.unwrap_or_default())?;
        ctx.pc.index += 1;
    }

    Ok(if preempted { Step::Preempt } else { Step::Next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;

    struct NoDocuments;
    impl Host for NoDocuments {
        fn document(&mut self, _id: DocumentId) -> Option<&mut dyn crate::host::Document> {
            None
        }
    }

    fn run(program: Rc<Program>) -> Result<Value, MacroError> {
        let registry = RoutineRegistry::new();
        let mut machine = Machine::new(&registry);
        let mut host = NoDocuments;
        let (context, mut status) =
            machine.execute_macro(&mut host, DocumentId(1), program, &[])?;
        loop {
            match status {
                ExecStatus::Done(value) => return Ok(value),
                ExecStatus::TimeLimit => {
                    status = machine.continue_macro(&mut host, &context)?;
                }
                ExecStatus::Preempted => panic!("unexpected preemption without routines"),
            }
        }
    }

    fn return_int_program(build: impl FnOnce(&mut ProgramBuilder, &mut SymbolTable)) -> Rc<Program> {
        let mut table = SymbolTable::new();
        let mut b = ProgramBuilder::new("test");
        build(&mut b, &mut table);
        b.emit(Inst::Return).unwrap();
        b.finish()
    }

    #[test]
    fn test_push_and_return() {
        let p = return_int_program(|b, t| {
            let c = t.number_const(41);
            b.emit(Inst::PushSym(c)).unwrap();
            b.emit(Inst::Incr).unwrap();
        });
        assert_eq!(run(p).unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_arithmetic_coerces_strings() {
        let p = return_int_program(|b, t| {
            let a = t.string_const("20");
            let c = t.number_const(22);
            b.emit(Inst::PushSym(a)).unwrap();
            b.emit(Inst::PushSym(c)).unwrap();
            b.emit(Inst::Add).unwrap();
        });
        assert_eq!(run(p).unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_division_by_zero_reports_line() {
        let mut table = SymbolTable::new();
        let mut b = ProgramBuilder::new("test");
        b.set_line(3);
        let one = table.number_const(1);
        let zero = table.number_const(0);
        b.emit(Inst::PushSym(one)).unwrap();
        b.emit(Inst::PushSym(zero)).unwrap();
        b.emit(Inst::Div).unwrap();
        b.emit(Inst::Return).unwrap();
        let err = run(b.finish()).unwrap_err();
        assert_eq!(err.message, "division by zero");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_power_rounding() {
        assert_eq!(power(2, 10).unwrap(), 1024);
        assert_eq!(power(-2, 3).unwrap(), -8);
        assert_eq!(power(-2, 2).unwrap(), 4);
        assert_eq!(power(2, -1).unwrap(), 0);
        assert_eq!(power(1, -5).unwrap(), 1);
        assert_eq!(power(-1, -5).unwrap(), -1);
        assert_eq!(power(0, -1).unwrap_err(), ExecError::ZeroToNegativePower);
    }

    #[test]
    fn test_values_equal_mixed_types() {
        assert!(values_equal(&Value::from(5), &Value::from("5")).unwrap());
        assert!(!values_equal(&Value::from(5), &Value::from("5x")).unwrap());
        assert!(values_equal(&Value::from("a"), &Value::from("a")).unwrap());
        assert!(values_equal(&Value::Unset, &Value::from(1)).is_err());
    }

    #[test]
    fn test_time_limit_and_resume() {
        // An empty infinite loop: Branch back to itself never finishes,
        // so every slice must end with TimeLimit.
        let mut b = ProgramBuilder::new("spin");
        let at = b.emit(Inst::Branch(0)).unwrap();
        b.patch_branch(at, at);
        let program = b.finish();

        let registry = RoutineRegistry::new();
        let mut machine = Machine::new(&registry);
        let mut host = NoDocuments;
        let (context, status) = machine
            .execute_macro(&mut host, DocumentId(1), program, &[])
            .unwrap();
        assert_eq!(status, ExecStatus::TimeLimit);
        let status = machine.continue_macro(&mut host, &context).unwrap();
        assert_eq!(status, ExecStatus::TimeLimit);
    }

    #[test]
    fn test_stack_overflow_detected() {
        // Push the same constant forever; the stack cap stops it.
        let mut table = SymbolTable::new();
        let mut b = ProgramBuilder::new("flood");
        let c = table.number_const(1);
        let at = b.emit(Inst::PushSym(c)).unwrap();
        let br = b.emit(Inst::Branch(0)).unwrap();
        b.patch_branch(br, at);
        let program = b.finish();

        let registry = RoutineRegistry::new();
        let mut machine = Machine::new(&registry);
        let mut host = NoDocuments;
        let (context, mut status) = machine
            .execute_macro(&mut host, DocumentId(1), program, &[])
            .unwrap();
        let err = loop {
            match status {
                ExecStatus::TimeLimit => {
                    status = match machine.continue_macro(&mut host, &context) {
                        Ok(s) => s,
                        Err(e) => break e,
                    };
                }
                other => panic!("expected stack overflow, got {other:?}"),
            }
        };
        assert_eq!(err.message, "macro stack overflow");
    }
}
