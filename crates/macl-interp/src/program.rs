//! Compiled programs, the instruction set, and the program builder.

use std::rc::Rc;

use crate::symbol::{Symbol, SymbolKind, SymbolRef};
use crate::value::Value;

/// Maximum number of instructions in one compiled program.
pub const PROGRAM_SIZE: usize = 4096;

/// One machine instruction.
///
/// Branch offsets are relative to the branching instruction's own
/// index, so code blocks can be assembled without knowing their final
/// position.
#[derive(Debug, Clone)]
pub enum Inst {
    /// Pop the current frame and yield no value.
    ReturnNoValue,
    /// Pop a value, pop the current frame, yield the value.
    Return,
    /// Push a symbol's value.
    PushSym(SymbolRef),
    /// Duplicate the top of the stack.
    Dup,

    // Arithmetic. Operands arrive as [lhs, rhs] with rhs on top.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
    Incr,
    Decr,
    Power,

    // Comparisons push 1 or 0.
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,

    /// `&`: bitwise and on numbers, intersection on arrays.
    BitAnd,
    /// `|`: bitwise or on numbers, symmetric difference on arrays.
    BitOr,
    /// Logical and (not short-circuiting).
    And,
    /// Logical or (not short-circuiting).
    Or,
    Not,
    /// String concatenation.
    Concat,

    /// Pop a value and store it into the symbol's location.
    Assign(SymbolRef),
    /// Call a macro function or native routine with `n_args` stacked
    /// arguments.
    SubrCall { sym: SymbolRef, n_args: usize },
    /// Push the most recent call's returned value. Emitted directly
    /// after a call in expression position.
    FetchRetVal,

    Branch(isize),
    /// Pop a number; branch when it is non-zero.
    BranchTrue(isize),
    /// Pop a number; branch when it is zero.
    BranchFalse(isize),
    /// Never branches; holds a patched address slot for dead paths.
    BranchNever(isize),

    /// Pop `n_dim` subscripts and an array; push the element.
    ArrayRef(usize),
    /// Pop a value, `n_dim` subscripts, and an array; store the value.
    ArrayAssign(usize),
    /// Prepare a read-modify-write of an array element: with the
    /// subscripts and array still on the stack, push the current
    /// element value (below the pending right-hand side if `bin_op`).
    ArrayRefAssignSetup { bin_op: bool, n_dim: usize },
    /// Pop an array and store a fresh iterator into `iterator`.
    BeginArrayIter { iterator: SymbolRef },
    /// Bind the next key to `item` and advance, or branch to the end
    /// of the loop when the traversal is exhausted.
    ArrayIter {
        item: SymbolRef,
        iterator: SymbolRef,
        end_offset: isize,
    },
    /// Pop an array and a key (or key array); push the membership test.
    InArray,
    /// Pop `n_dim` subscripts and an array and erase the element;
    /// with zero subscripts, erase every element.
    ArrayDelete(usize),
    /// Push the symbol's array value, optionally creating an empty
    /// array if the symbol is unset.
    PushArraySym { sym: SymbolRef, create: bool },

    /// Pop an argument position; push that argument of the frame.
    PushArg,
    /// Push the frame's argument count.
    PushArgCount,
    /// Push the frame's arguments as an array keyed "1".."n".
    PushArgArray,
}

/// Address of a single instruction: the owning program plus an index.
#[derive(Debug, Clone)]
pub struct CodeAddr {
    pub program: Rc<Program>,
    pub index: usize,
}

impl CodeAddr {
    pub fn new(program: Rc<Program>, index: usize) -> Self {
        Self { program, index }
    }
}

impl PartialEq for CodeAddr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.program, &other.program) && self.index == other.index
    }
}

/// A compiled program: instructions, a parallel source-line table for
/// error positions, and the local symbols of its frame.
#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub code: Vec<Inst>,
    /// Source line of each instruction, parallel to `code`.
    pub lines: Vec<u32>,
    /// Local symbols in frame-offset order.
    pub locals: Vec<SymbolRef>,
}

impl Program {
    /// Source line recorded for the instruction at `index`.
    pub fn line_at(&self, index: usize) -> Option<u32> {
        self.lines.get(index).copied().filter(|&l| l != 0)
    }
}

/// Emitting past [`PROGRAM_SIZE`] instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramTooLarge;

/// Per-loop bookkeeping for break/continue patching.
#[derive(Debug, Default)]
struct LoopFrame {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Accumulates instructions for one program.
///
/// Code generation emits forward branches with placeholder offsets and
/// patches them once the target address is known; loop frames collect
/// the break/continue branches emitted inside a loop body so the loop's
/// construct can patch them all at once.
#[derive(Debug)]
pub struct ProgramBuilder {
    name: String,
    code: Vec<Inst>,
    lines: Vec<u32>,
    locals: Vec<SymbolRef>,
    loop_stack: Vec<LoopFrame>,
    iter_count: usize,
    current_line: u32,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: Vec::new(),
            lines: Vec::new(),
            locals: Vec::new(),
            loop_stack: Vec::new(),
            iter_count: 0,
            current_line: 0,
        }
    }

    /// Record the source line for subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Index the next instruction will be emitted at.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Append an instruction; returns its index.
    pub fn emit(&mut self, inst: Inst) -> Result<usize, ProgramTooLarge> {
        if self.code.len() >= PROGRAM_SIZE {
            return Err(ProgramTooLarge);
        }
        let at = self.code.len();
        self.code.push(inst);
        self.lines.push(self.current_line);
        Ok(at)
    }

    /// Point the branch at `at` to the absolute index `target`.
    ///
    /// Panics if `at` does not hold a branch; emitting and patching are
    /// both under the code generator's control, so a mismatch is a bug
    /// in the caller.
    pub fn patch_branch(&mut self, at: usize, target: usize) {
        let offset = target as isize - at as isize;
        match &mut self.code[at] {
            Inst::Branch(o)
            | Inst::BranchTrue(o)
            | Inst::BranchFalse(o)
            | Inst::BranchNever(o) => *o = offset,
            Inst::ArrayIter { end_offset, .. } => *end_offset = offset,
            other => panic!("patch target is not a branch: {other:?}"),
        }
    }

    // ── Loop bookkeeping ─────────────────────────────────────────

    /// Open a loop scope for break/continue collection.
    pub fn begin_loop(&mut self) {
        self.loop_stack.push(LoopFrame::default());
    }

    pub fn in_loop(&self) -> bool {
        !self.loop_stack.is_empty()
    }

    /// Record an emitted break branch. Returns `false` outside a loop.
    pub fn add_break(&mut self, at: usize) -> bool {
        match self.loop_stack.last_mut() {
            Some(frame) => {
                frame.breaks.push(at);
                true
            }
            None => false,
        }
    }

    /// Record an emitted continue branch. Returns `false` outside a loop.
    pub fn add_continue(&mut self, at: usize) -> bool {
        match self.loop_stack.last_mut() {
            Some(frame) => {
                frame.continues.push(at);
                true
            }
            None => false,
        }
    }

    /// Close the innermost loop scope, patching its collected branches.
    pub fn end_loop(&mut self, break_target: usize, continue_target: usize) {
        let Some(frame) = self.loop_stack.pop() else {
            return;
        };
        for at in frame.breaks {
            self.patch_branch(at, break_target);
        }
        for at in frame.continues {
            self.patch_branch(at, continue_target);
        }
    }

    // ── Local symbols ────────────────────────────────────────────

    /// Find a local declared in this program.
    pub fn lookup_local(&self, name: &str) -> Option<SymbolRef> {
        self.locals
            .iter()
            .find(|s| s.borrow().name == name)
            .cloned()
    }

    /// Declare a local variable. Its frame offset is assigned when the
    /// program is finished.
    pub fn create_local(&mut self, name: &str) -> SymbolRef {
        let sym = Symbol::new(name, SymbolKind::Local, Value::Unset);
        self.locals.push(Rc::clone(&sym));
        sym
    }

    /// Create an anonymous local to hold a `for (x in array)` iterator.
    pub fn iterator_symbol(&mut self) -> SymbolRef {
        self.iter_count += 1;
        self.create_local(&format!("aryiter {}", self.iter_count))
    }

    /// Seal the program: terminate it, assign frame offsets to its
    /// locals, and hand it over in shared form.
    pub fn finish(mut self) -> Rc<Program> {
        // A program always ends by returning, even if the source fell
        // off the end.
        self.code.push(Inst::ReturnNoValue);
        self.lines.push(self.current_line);
        for (offset, sym) in self.locals.iter().enumerate() {
            sym.borrow_mut().value = Value::Int(offset as i32);
        }
        Rc::new(Program {
            name: self.name,
            code: self.code,
            lines: self.lines,
            locals: self.locals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_finish() {
        let mut b = ProgramBuilder::new("main");
        b.set_line(1);
        b.emit(Inst::Dup).unwrap();
        b.set_line(2);
        b.emit(Inst::Add).unwrap();
        let p = b.finish();
        assert_eq!(p.code.len(), 3); // trailing ReturnNoValue
        assert!(matches!(p.code[2], Inst::ReturnNoValue));
        assert_eq!(p.line_at(0), Some(1));
        assert_eq!(p.line_at(1), Some(2));
    }

    #[test]
    fn test_line_zero_reads_as_unknown() {
        let mut b = ProgramBuilder::new("main");
        b.emit(Inst::Dup).unwrap();
        let p = b.finish();
        assert_eq!(p.line_at(0), None);
    }

    #[test]
    fn test_branch_patching() {
        let mut b = ProgramBuilder::new("main");
        let br = b.emit(Inst::BranchFalse(0)).unwrap();
        b.emit(Inst::Dup).unwrap();
        b.emit(Inst::Dup).unwrap();
        let target = b.here();
        b.patch_branch(br, target);
        let p = b.finish();
        match p.code[br] {
            Inst::BranchFalse(off) => assert_eq!(off, 3),
            ref other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn test_loop_frames_patch_breaks_and_continues() {
        let mut b = ProgramBuilder::new("main");
        b.begin_loop();
        let start = b.here();
        b.emit(Inst::Dup).unwrap();
        let brk = b.emit(Inst::Branch(0)).unwrap();
        assert!(b.add_break(brk));
        let cont = b.emit(Inst::Branch(0)).unwrap();
        assert!(b.add_continue(cont));
        let end = b.here();
        b.end_loop(end, start);
        let p = b.finish();
        match (&p.code[brk], &p.code[cont]) {
            (Inst::Branch(b_off), Inst::Branch(c_off)) => {
                assert_eq!(brk as isize + b_off, end as isize);
                assert_eq!(cont as isize + c_off, start as isize);
            }
            other => panic!("unexpected instructions {other:?}"),
        }
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let mut b = ProgramBuilder::new("main");
        assert!(!b.in_loop());
        assert!(!b.add_break(0));
        assert!(!b.add_continue(0));
    }

    #[test]
    fn test_locals_get_frame_offsets() {
        let mut b = ProgramBuilder::new("main");
        let x = b.create_local("x");
        let y = b.create_local("y");
        assert!(b.lookup_local("x").is_some());
        assert!(b.lookup_local("z").is_none());
        let _ = b.finish();
        assert_eq!(x.borrow().value.as_int().unwrap(), 0);
        assert_eq!(y.borrow().value.as_int().unwrap(), 1);
    }

    #[test]
    fn test_iterator_symbols_are_distinct() {
        let mut b = ProgramBuilder::new("main");
        let a = b.iterator_symbol();
        let c = b.iterator_symbol();
        assert_ne!(a.borrow().name, c.borrow().name);
    }

    #[test]
    fn test_program_size_cap() {
        let mut b = ProgramBuilder::new("main");
        for _ in 0..PROGRAM_SIZE {
            b.emit(Inst::Dup).unwrap();
        }
        assert_eq!(b.emit(Inst::Dup), Err(ProgramTooLarge));
    }
}
