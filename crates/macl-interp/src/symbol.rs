//! Symbols and the global symbol table.
//!
//! A symbol binds a name to a storage kind plus a value. Globals,
//! constants, and routines live in the machine-wide [`SymbolTable`];
//! locals and arguments live in the program that declared them, with
//! their frame offset stored in the symbol's value. Symbols are shared
//! mutable objects: an instruction that names a symbol holds the same
//! [`SymbolRef`] the table does, so defining a forward-referenced macro
//! function updates every call site at once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::program::Program;
use crate::routine::LibraryRoutine;
use crate::value::Value;

/// Storage class of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Immutable value (literals are interned as these).
    Const,
    /// Machine-wide variable; the value lives in the symbol itself.
    Global,
    /// Per-frame variable; the value holds the frame offset.
    Local,
    /// Named argument; the value holds the argument position.
    Arg,
    /// Read-only variable computed by a native routine on each read.
    ProcValue,
    /// Native routine.
    Subroutine,
    /// Compiled macro function.
    MacroFunction,
}

/// A named binding.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub value: Value,
}

/// Shared mutable handle to a symbol.
pub type SymbolRef = Rc<RefCell<Symbol>>;

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, value: Value) -> SymbolRef {
        Rc::new(RefCell::new(Symbol {
            name: name.into(),
            kind,
            value,
        }))
    }
}

/// The machine-wide symbol table: globals, constants, routines, and
/// macro functions, plus interning for literal constants.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolRef>,
    string_consts: HashMap<String, SymbolRef>,
    number_consts: HashMap<i32, SymbolRef>,
    string_const_count: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a global-scope symbol by name.
    pub fn lookup(&self, name: &str) -> Option<SymbolRef> {
        self.symbols.get(name).cloned()
    }

    /// Install a symbol, replacing any previous binding of the name.
    pub fn install(&mut self, name: &str, kind: SymbolKind, value: Value) -> SymbolRef {
        let sym = Symbol::new(name, kind, value);
        self.symbols.insert(name.to_string(), Rc::clone(&sym));
        sym
    }

    /// Install a native routine.
    pub fn install_subroutine(&mut self, name: &str, routine: LibraryRoutine) -> SymbolRef {
        self.install(name, SymbolKind::Subroutine, Value::Subroutine(routine))
    }

    /// Install a dynamically computed read-only variable.
    pub fn install_proc_value(&mut self, name: &str, routine: LibraryRoutine) -> SymbolRef {
        self.install(name, SymbolKind::ProcValue, Value::Subroutine(routine))
    }

    /// Intern a string literal. Repeated literals share one symbol.
    pub fn string_const(&mut self, text: &str) -> SymbolRef {
        if let Some(sym) = self.string_consts.get(text) {
            return Rc::clone(sym);
        }
        self.string_const_count += 1;
        let name = format!("string #{}", self.string_const_count);
        let sym = Symbol::new(name, SymbolKind::Const, Value::from(text));
        self.string_consts.insert(text.to_string(), Rc::clone(&sym));
        sym
    }

    /// Intern a number literal.
    pub fn number_const(&mut self, n: i32) -> SymbolRef {
        if let Some(sym) = self.number_consts.get(&n) {
            return Rc::clone(sym);
        }
        let sym = Symbol::new(n.to_string(), SymbolKind::Const, Value::from(n));
        self.number_consts.insert(n, Rc::clone(&sym));
        sym
    }

    /// Bind a name to a compiled macro function.
    ///
    /// If the name already has a symbol (for example from a forward
    /// reference compiled before the definition was seen), that symbol
    /// is updated in place so existing call sites resolve to the new
    /// code.
    pub fn define_macro_function(&mut self, name: &str, code: Rc<Program>) -> SymbolRef {
        if let Some(sym) = self.symbols.get(name) {
            let mut s = sym.borrow_mut();
            s.kind = SymbolKind::MacroFunction;
            s.value = Value::Code(code);
            return Rc::clone(sym);
        }
        self.install(name, SymbolKind::MacroFunction, Value::Code(code))
    }

    /// Declare a macro function name whose body has not been seen yet.
    pub fn forward_declare(&mut self, name: &str) -> SymbolRef {
        if let Some(sym) = self.symbols.get(name) {
            return Rc::clone(sym);
        }
        self.install(name, SymbolKind::MacroFunction, Value::Unset)
    }

    /// Move a symbol compiled as a local out to global scope.
    ///
    /// The symbol object is reused, so instructions already referring
    /// to it see the promotion.
    pub fn promote_to_global(&mut self, sym: &SymbolRef) {
        let name = {
            let mut s = sym.borrow_mut();
            s.kind = SymbolKind::Global;
            s.name.clone()
        };
        self.symbols.entry(name).or_insert_with(|| Rc::clone(sym));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;

    #[test]
    fn test_install_and_lookup() {
        let mut table = SymbolTable::new();
        assert!(table.lookup("x").is_none());
        table.install("x", SymbolKind::Global, Value::from(5));
        let sym = table.lookup("x").unwrap();
        assert_eq!(sym.borrow().kind, SymbolKind::Global);
        assert_eq!(sym.borrow().value.as_int().unwrap(), 5);
    }

    #[test]
    fn test_string_const_interning() {
        let mut table = SymbolTable::new();
        let a = table.string_const("hello");
        let b = table.string_const("hello");
        let c = table.string_const("other");
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(a.borrow().value.as_str().unwrap(), "hello");
        assert_eq!(a.borrow().name, "string #1");
        assert_eq!(c.borrow().name, "string #2");
    }

    #[test]
    fn test_number_const_interning() {
        let mut table = SymbolTable::new();
        let a = table.number_const(42);
        let b = table.number_const(42);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().name, "42");
        assert_eq!(a.borrow().kind, SymbolKind::Const);
    }

    #[test]
    fn test_forward_declare_then_define() {
        let mut table = SymbolTable::new();
        let forward = table.forward_declare("helper");
        assert!(forward.borrow().value.is_unset());

        let code = ProgramBuilder::new("helper").finish();
        let defined = table.define_macro_function("helper", code);
        // Same symbol object, now carrying the compiled body
        assert!(Rc::ptr_eq(&forward, &defined));
        assert!(forward.borrow().value.as_program().is_ok());
    }

    #[test]
    fn test_promote_to_global() {
        let mut table = SymbolTable::new();
        let sym = Symbol::new("shared", SymbolKind::Local, Value::Unset);
        table.promote_to_global(&sym);
        assert_eq!(sym.borrow().kind, SymbolKind::Global);
        assert!(Rc::ptr_eq(&table.lookup("shared").unwrap(), &sym));
    }
}
