//! Core compiler infrastructure: token cursor, error reporting, symbol
//! resolution, and instruction emission.

use std::rc::Rc;

use macl_interp::{Inst, Program, ProgramBuilder, SymbolKind, SymbolRef, SymbolTable};
use macl_lexer::{Lexer, Token, TokenKind};
use macl_types::{CompileErrors, ErrorCode, MaclError, SourceFile, Span};

/// Result of compiling one macro source.
pub struct CompileResult {
    /// Code that appeared outside any `define`, if there was any.
    pub main: Option<Rc<Program>>,
    /// Names of the macro functions the source defined. The functions
    /// themselves are installed in the symbol table.
    pub definitions: Vec<String>,
    pub errors: CompileErrors,
}

/// Compile macro source text against a symbol table.
///
/// `define` blocks become macro functions in `symbols`; statements
/// outside any `define` become the returned main program. Nothing is
/// installed when the source has errors.
pub fn compile(file_name: &str, source: &str, symbols: &mut SymbolTable) -> CompileResult {
    let source_file = SourceFile::new(file_name, source);
    let lexed = Lexer::new(&source_file).lex();
    let mut errors = lexed.errors;

    let parser = Parser::new(lexed.tokens, &source_file, symbols);
    let (main, definitions, parse_errors) = parser.run();
    errors.extend(parse_errors);

    if errors.has_errors() {
        return CompileResult {
            main: None,
            definitions: Vec::new(),
            errors,
        };
    }

    let mut names = Vec::with_capacity(definitions.len());
    for (name, program) in definitions {
        symbols.define_macro_function(&name, program);
        names.push(name);
    }
    CompileResult {
        main,
        definitions: names,
        errors,
    }
}

/// The macl compiler.
///
/// Consumes a token stream and emits instructions directly into a
/// [`ProgramBuilder`]. Collects errors and attempts recovery at
/// statement boundaries.
pub struct Parser<'src> {
    /// The token stream.
    tokens: Vec<Token>,
    /// Current index into `tokens`.
    pos: usize,
    /// Source file for error context.
    source_file: &'src SourceFile,
    /// File name for error messages.
    file_name: String,
    /// Collected errors.
    errors: CompileErrors,
    /// The interpreter's symbol table: globals, constants, builtins.
    pub(crate) symbols: &'src mut SymbolTable,
    /// The program currently being emitted into. Swapped out while a
    /// `define` body is compiled.
    pub(crate) builder: ProgramBuilder,
    /// Compiled `define` bodies, in source order.
    pub(crate) definitions: Vec<(String, Rc<Program>)>,
    /// The current program hit the instruction cap (reported once).
    overflowed: bool,
}

impl<'src> Parser<'src> {
    /// Create a new parser from a token stream and source file.
    pub fn new(
        tokens: Vec<Token>,
        source_file: &'src SourceFile,
        symbols: &'src mut SymbolTable,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            file_name: source_file.name.clone(),
            source_file,
            errors: CompileErrors::empty(),
            symbols,
            builder: ProgramBuilder::new(source_file.name.clone()),
            definitions: Vec::new(),
            overflowed: false,
        }
    }

    /// Parse the whole token stream.
    pub(crate) fn run(
        mut self,
    ) -> (
        Option<Rc<Program>>,
        Vec<(String, Rc<Program>)>,
        CompileErrors,
    ) {
        self.skip_newlines();
        let mut has_code = false;
        while !self.at_end() && !self.too_many_errors() {
            if self.check_exact(&TokenKind::Define) {
                self.parse_define();
            } else {
                has_code = true;
                self.parse_statement();
            }
            self.skip_newlines();
        }
        let main = if has_code && !self.errors.has_errors() {
            Some(self.builder.finish())
        } else {
            None
        };
        (main, self.definitions, self.errors)
    }

    // ── Token cursor ─────────────────────────────────────────────

    /// Returns the current token without advancing.
    pub(crate) fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream should end with Eof")
        })
    }

    /// Returns the kind of the current token.
    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    /// Advance the cursor by one and return the consumed token.
    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Returns the span of the current token.
    pub(crate) fn current_span(&self) -> Span {
        self.peek().span
    }

    /// Returns `true` if the current token is `Eof`.
    pub(crate) fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    /// Check if the current token matches the given kind exactly.
    pub(crate) fn check_exact(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    /// If the current token matches, advance and return `true`.
    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check_exact(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Look ahead by `n` tokens from the current position.
    pub(crate) fn look_ahead(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Save the cursor so a clause can be re-parsed later.
    pub(crate) fn mark(&self) -> usize {
        self.pos
    }

    /// Restore a previously saved cursor position.
    pub(crate) fn rewind(&mut self, mark: usize) {
        self.pos = mark;
    }

    // ── Newline handling ─────────────────────────────────────────

    /// Skip all consecutive newline tokens.
    pub(crate) fn skip_newlines(&mut self) {
        while self.check_exact(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// Expect a statement terminator: newline or end of file. A closing
    /// brace also ends the statement (the block consumes it).
    pub(crate) fn expect_newline_or_eof(&mut self) {
        if self.at_end() {
            return;
        }
        if self.check_exact(&TokenKind::Newline) {
            self.advance();
            self.skip_newlines();
        } else if !self.check_exact(&TokenKind::RBrace) {
            self.error_at_current(
                ErrorCode::UNEXPECTED_TOKEN,
                format!("expected newline, got '{}'", self.peek_kind()),
            );
            self.synchronize();
        }
    }

    // ── Expect helpers ───────────────────────────────────────────

    /// Expect a specific token kind. Returns the token if matched, or
    /// emits an error.
    pub(crate) fn expect(&mut self, expected: &TokenKind) -> Option<Token> {
        if self.check_exact(expected) {
            Some(self.advance())
        } else {
            self.error_at_current(
                ErrorCode::UNEXPECTED_TOKEN,
                format!("expected '{}', got '{}'", expected, self.peek_kind()),
            );
            None
        }
    }

    /// Expect an identifier token. Returns its name.
    pub(crate) fn expect_identifier(&mut self) -> Option<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected identifier, got '{}'", self.peek_kind()),
                );
                None
            }
        }
    }

    // ── Symbol resolution ────────────────────────────────────────

    /// Resolve a plain variable name: locals of the current program
    /// shadow globals; an unknown name becomes a new local.
    pub(crate) fn resolve_variable(&mut self, name: &str) -> SymbolRef {
        if let Some(sym) = self.builder.lookup_local(name) {
            return sym;
        }
        if let Some(sym) = self.symbols.lookup(name) {
            return sym;
        }
        self.builder.create_local(name)
    }

    /// Resolve a name in call position. An unknown name is forward
    /// declared as a macro function so mutually recursive `define`s
    /// work; the machine reports it if it is never defined.
    pub(crate) fn resolve_callee(&mut self, name: &str) -> SymbolRef {
        match self.symbols.lookup(name) {
            Some(sym) => {
                let callable = matches!(
                    sym.borrow().kind,
                    SymbolKind::Subroutine | SymbolKind::ProcValue | SymbolKind::MacroFunction
                );
                if !callable {
                    self.error_at_current(
                        ErrorCode::NOT_A_FUNCTION,
                        format!("'{name}' is not a function"),
                    );
                }
                sym
            }
            None => self.symbols.forward_declare(name),
        }
    }

    /// Resolve a `$`-prefixed special variable. These are supplied by
    /// the host; referencing an unknown one is a compile error.
    pub(crate) fn resolve_special(&mut self, name: &str) -> Option<SymbolRef> {
        match self.symbols.lookup(name) {
            Some(sym) => Some(sym),
            None => {
                self.error_at_current(
                    ErrorCode::UNDEFINED_VARIABLE,
                    format!("undefined variable '{name}'"),
                );
                None
            }
        }
    }

    // ── Instruction emission ─────────────────────────────────────

    /// Record the current token's line for subsequently emitted code.
    pub(crate) fn mark_line(&mut self) {
        let line = self.current_span().line;
        self.builder.set_line(line);
    }

    /// Emit an instruction into the current program. On overflow the
    /// error is reported once and a sentinel index is returned.
    pub(crate) fn emit(&mut self, inst: Inst) -> usize {
        match self.builder.emit(inst) {
            Ok(at) => at,
            Err(_) => {
                if !self.overflowed {
                    self.overflowed = true;
                    self.error_at_current(ErrorCode::MACRO_TOO_LARGE, "macro too large");
                }
                usize::MAX
            }
        }
    }

    /// Patch a branch emitted earlier, tolerating overflow sentinels.
    pub(crate) fn patch(&mut self, at: usize, target: usize) {
        if at != usize::MAX {
            self.builder.patch_branch(at, target);
        }
    }

    // ── Error reporting ──────────────────────────────────────────

    /// Report an error at the current token position.
    pub(crate) fn error_at_current(&mut self, code: ErrorCode, message: impl Into<String>) {
        let span = self.current_span();
        self.error_at(code, message, span);
    }

    /// Report an error at a specific span.
    pub(crate) fn error_at(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.line).unwrap_or("").to_string();
        let error = MaclError::new(&self.file_name, code, message, span, source_line);
        self.errors.push_error(error);
    }

    /// Returns `true` if we've hit the error limit and should stop.
    pub(crate) fn too_many_errors(&self) -> bool {
        self.errors.has_errors() && self.errors.total_errors >= macl_types::MAX_ERRORS
    }

    // ── Synchronization ──────────────────────────────────────────

    /// Skip tokens until a statement boundary. Used after an error to
    /// resume at a known-good position.
    pub(crate) fn synchronize(&mut self) {
        while !self.at_end() {
            if self.check_exact(&TokenKind::Newline) {
                self.advance();
                self.skip_newlines();
                return;
            }
            match self.peek_kind() {
                TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::Delete
                | TokenKind::Define
                | TokenKind::RBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}
