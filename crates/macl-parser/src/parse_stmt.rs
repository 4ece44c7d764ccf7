//! Statement compilation: blocks, control flow, assignments, `define`.

use std::rc::Rc;

use macl_interp::{Inst, ProgramBuilder, SymbolKind, SymbolRef};
use macl_lexer::TokenKind;
use macl_types::ErrorCode;

use crate::parser::Parser;

impl Parser<'_> {
    /// Compile one statement, including its terminator.
    pub(crate) fn parse_statement(&mut self) {
        if self.too_many_errors() {
            return;
        }
        self.mark_line();
        match self.peek_kind().clone() {
            TokenKind::LBrace => {
                self.parse_block();
                self.skip_newlines();
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                self.advance();
                if self.builder.in_loop() {
                    let at = self.emit(Inst::Branch(0));
                    self.builder.add_break(at);
                } else {
                    self.error_at_current(
                        ErrorCode::BREAK_OUTSIDE_LOOP,
                        "'break' outside of any loop",
                    );
                }
                self.expect_newline_or_eof();
            }
            TokenKind::Continue => {
                self.advance();
                if self.builder.in_loop() {
                    let at = self.emit(Inst::Branch(0));
                    self.builder.add_continue(at);
                } else {
                    self.error_at_current(
                        ErrorCode::CONTINUE_OUTSIDE_LOOP,
                        "'continue' outside of any loop",
                    );
                }
                self.expect_newline_or_eof();
            }
            TokenKind::Delete => {
                self.parse_delete();
                self.expect_newline_or_eof();
            }
            TokenKind::Define => {
                self.error_at_current(
                    ErrorCode::NESTED_DEFINE,
                    "macro definitions can only appear at the top level",
                );
                self.advance();
                self.synchronize();
            }
            TokenKind::Ident(_) | TokenKind::Incr | TokenKind::Decr => {
                self.parse_simple_statement();
                self.expect_newline_or_eof();
            }
            other => {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected statement, got '{other}'"),
                );
                self.advance();
                self.synchronize();
            }
        }
    }

    /// `{ statements }`
    pub(crate) fn parse_block(&mut self) {
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        while !self.check_exact(&TokenKind::RBrace) && !self.at_end() && !self.too_many_errors() {
            self.parse_statement();
            self.skip_newlines();
        }
        if self.at_end() {
            self.error_at_current(ErrorCode::UNCLOSED_BRACE, "unterminated block".to_string());
        } else {
            self.expect(&TokenKind::RBrace);
        }
    }

    /// The body of a control statement: a block or a single statement,
    /// possibly on the next line.
    fn parse_body(&mut self) {
        self.skip_newlines();
        if self.check_exact(&TokenKind::LBrace) {
            self.parse_block();
        } else {
            self.parse_statement();
        }
    }

    fn parse_if(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen);
        self.compile_expression();
        self.expect(&TokenKind::RParen);
        let bf = self.emit(Inst::BranchFalse(0));
        self.parse_body();
        self.skip_newlines();
        if self.eat(&TokenKind::Else) {
            let skip_else = self.emit(Inst::Branch(0));
            let else_start = self.builder.here();
            self.patch(bf, else_start);
            self.parse_body();
            self.skip_newlines();
            let end = self.builder.here();
            self.patch(skip_else, end);
        } else {
            let end = self.builder.here();
            self.patch(bf, end);
        }
    }

    fn parse_while(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen);
        self.builder.begin_loop();
        let top = self.builder.here();
        self.compile_expression();
        self.expect(&TokenKind::RParen);
        let exit = self.emit(Inst::BranchFalse(0));
        self.parse_body();
        let back = self.emit(Inst::Branch(0));
        self.patch(back, top);
        let end = self.builder.here();
        self.patch(exit, end);
        self.builder.end_loop(end, top);
    }

    /// Both for-loop forms: `for (init; cond; incr)` and
    /// `for (item in array)`.
    fn parse_for(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen);
        if matches!(self.peek_kind(), TokenKind::Ident(_))
            && self.look_ahead(1) == &TokenKind::In
        {
            self.parse_for_in();
        } else {
            self.parse_for_classic();
        }
    }

    /// `for (item in array) body` — array traversal in key order.
    fn parse_for_in(&mut self) {
        let name = match self.advance().kind {
            TokenKind::Ident(name) => name,
            _ => unreachable!("caller checked for an identifier"),
        };
        self.advance(); // `in`
        self.compile_expression();
        self.expect(&TokenKind::RParen);

        let item = self.resolve_variable(&name);
        let iterator = self.builder.iterator_symbol();
        self.emit(Inst::BeginArrayIter {
            iterator: Rc::clone(&iterator),
        });
        self.builder.begin_loop();
        let top = self.builder.here();
        let iter_at = self.emit(Inst::ArrayIter {
            item,
            iterator,
            end_offset: 0,
        });
        self.parse_body();
        let back = self.emit(Inst::Branch(0));
        self.patch(back, top);
        let end = self.builder.here();
        self.patch(iter_at, end);
        self.builder.end_loop(end, top);
    }

    /// `for (init; cond; incr) body`.
    ///
    /// The increment clause executes after the body but is written
    /// before it, so its tokens are skipped on the first pass and the
    /// cursor rewinds to compile them once the body has been emitted.
    /// `continue` targets the increment code.
    fn parse_for_classic(&mut self) {
        if !self.check_exact(&TokenKind::Semicolon) {
            self.parse_simple_statement();
        }
        self.expect(&TokenKind::Semicolon);

        self.builder.begin_loop();
        let top = self.builder.here();
        let exit = if self.check_exact(&TokenKind::Semicolon) {
            None
        } else {
            self.compile_expression();
            Some(self.emit(Inst::BranchFalse(0)))
        };
        self.expect(&TokenKind::Semicolon);

        let incr_mark = self.mark();
        self.skip_to_close_paren();
        self.parse_body();

        let continue_target = self.builder.here();
        let after_body = self.mark();
        self.rewind(incr_mark);
        if !self.check_exact(&TokenKind::RParen) {
            self.parse_simple_statement();
        }
        self.rewind(after_body);

        let back = self.emit(Inst::Branch(0));
        self.patch(back, top);
        let end = self.builder.here();
        if let Some(exit) = exit {
            self.patch(exit, end);
        }
        self.builder.end_loop(end, continue_target);
    }

    /// Skip over the increment clause to the `)` that closes the
    /// for-header, balancing nested parentheses.
    fn skip_to_close_paren(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                TokenKind::Newline | TokenKind::Eof => {
                    self.error_at_current(
                        ErrorCode::UNEXPECTED_TOKEN,
                        "unterminated for-loop header",
                    );
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_return(&mut self) {
        self.advance();
        if matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::RBrace
        ) {
            self.emit(Inst::ReturnNoValue);
        } else {
            self.compile_expression();
            self.emit(Inst::Return);
        }
        self.expect_newline_or_eof();
    }

    /// `delete a[subs]` removes one element; `delete a` or `delete a[]`
    /// empties the whole array.
    fn parse_delete(&mut self) {
        self.advance();
        let Some(name) = self.expect_identifier() else {
            self.synchronize();
            return;
        };
        let sym = self.resolve_variable(&name);
        self.emit(Inst::PushArraySym { sym, create: false });
        if self.eat(&TokenKind::LBracket) {
            if self.eat(&TokenKind::RBracket) {
                self.emit(Inst::ArrayDelete(0));
            } else {
                let n_dim = self.parse_subscripts();
                self.emit(Inst::ArrayDelete(n_dim));
            }
        } else {
            self.emit(Inst::ArrayDelete(0));
        }
    }

    // ── Simple statements ────────────────────────────────────────

    /// An assignment, call, or increment, with no terminator handling.
    /// Also used for the init and increment clauses of a for-loop.
    pub(crate) fn parse_simple_statement(&mut self) {
        match self.peek_kind().clone() {
            TokenKind::Incr => {
                self.advance();
                self.parse_prefix_mutation(Inst::Incr);
            }
            TokenKind::Decr => {
                self.advance();
                self.parse_prefix_mutation(Inst::Decr);
            }
            TokenKind::Ident(name) => {
                self.advance();
                match self.peek_kind().clone() {
                    TokenKind::LParen => self.compile_call(&name, false),
                    TokenKind::LBracket => self.parse_array_target(&name),
                    TokenKind::Assign => {
                        self.advance();
                        let target = self.resolve_assign_target(&name);
                        self.compile_expression();
                        if let Some(sym) = target {
                            self.emit(Inst::Assign(sym));
                        }
                    }
                    TokenKind::Incr => {
                        self.advance();
                        self.mutate_scalar(&name, Inst::Incr);
                    }
                    TokenKind::Decr => {
                        self.advance();
                        self.mutate_scalar(&name, Inst::Decr);
                    }
                    other => match compound_op(&other) {
                        Some(op) => {
                            self.advance();
                            let target = self.resolve_assign_target(&name);
                            if let Some(sym) = &target {
                                self.emit(Inst::PushSym(Rc::clone(sym)));
                            }
                            self.compile_expression();
                            self.emit(op);
                            if let Some(sym) = target {
                                self.emit(Inst::Assign(sym));
                            }
                        }
                        None => {
                            self.error_at_current(
                                ErrorCode::UNEXPECTED_TOKEN,
                                format!("expected assignment or call, got '{other}'"),
                            );
                            self.synchronize();
                        }
                    },
                }
            }
            other => {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected statement, got '{other}'"),
                );
                self.advance();
                self.synchronize();
            }
        }
    }

    /// `++x`, `--a[k]`.
    fn parse_prefix_mutation(&mut self, op: Inst) {
        let Some(name) = self.expect_identifier() else {
            self.synchronize();
            return;
        };
        if self.check_exact(&TokenKind::LBracket) {
            let sym = self.resolve_variable(&name);
            self.emit(Inst::PushArraySym { sym, create: true });
            self.advance();
            let n_dim = self.parse_subscripts();
            self.emit(Inst::ArrayRefAssignSetup {
                bin_op: false,
                n_dim,
            });
            self.emit(op);
            self.emit(Inst::ArrayAssign(n_dim));
        } else {
            self.mutate_scalar(&name, op);
        }
    }

    /// Emit read-modify-write of a scalar variable.
    fn mutate_scalar(&mut self, name: &str, op: Inst) {
        let Some(sym) = self.resolve_assign_target(name) else {
            return;
        };
        self.emit(Inst::PushSym(Rc::clone(&sym)));
        self.emit(op);
        self.emit(Inst::Assign(sym));
    }

    /// `a[subs] = e`, `a[subs] op= e`, `a[subs]++`.
    fn parse_array_target(&mut self, name: &str) {
        let sym = self.resolve_variable(name);
        self.emit(Inst::PushArraySym { sym, create: true });
        self.advance(); // `[`
        let n_dim = self.parse_subscripts();
        match self.peek_kind().clone() {
            TokenKind::Assign => {
                self.advance();
                self.compile_expression();
                self.emit(Inst::ArrayAssign(n_dim));
            }
            TokenKind::Incr | TokenKind::Decr => {
                let op = if self.advance().kind == TokenKind::Incr {
                    Inst::Incr
                } else {
                    Inst::Decr
                };
                self.emit(Inst::ArrayRefAssignSetup {
                    bin_op: false,
                    n_dim,
                });
                self.emit(op);
                self.emit(Inst::ArrayAssign(n_dim));
            }
            other => match compound_op(&other) {
                Some(op) => {
                    self.advance();
                    self.compile_expression();
                    self.emit(Inst::ArrayRefAssignSetup {
                        bin_op: true,
                        n_dim,
                    });
                    self.emit(op);
                    self.emit(Inst::ArrayAssign(n_dim));
                }
                None => {
                    self.error_at_current(
                        ErrorCode::UNEXPECTED_TOKEN,
                        format!("expected assignment to array element, got '{other}'"),
                    );
                    self.synchronize();
                }
            },
        }
    }

    /// Resolve the target of a scalar assignment. `$`-prefixed names
    /// must already exist and the argument forms are read-only.
    fn resolve_assign_target(&mut self, name: &str) -> Option<SymbolRef> {
        if name.starts_with('$') {
            if is_args_form(name) {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("can't assign to '{name}'"),
                );
                return None;
            }
            self.resolve_special(name)
        } else {
            Some(self.resolve_variable(name))
        }
    }

    // ── define ───────────────────────────────────────────────────

    /// `define name { body }` — compiles the body as a separate
    /// program and records it for installation as a macro function.
    pub(crate) fn parse_define(&mut self) {
        let span = self.current_span();
        self.advance();
        let Some(name) = self.expect_identifier() else {
            self.synchronize();
            return;
        };

        let mut shadows_builtin = false;
        if let Some(sym) = self.symbols.lookup(&name) {
            let kind = sym.borrow().kind;
            if matches!(
                kind,
                SymbolKind::Subroutine | SymbolKind::ProcValue | SymbolKind::Const
            ) {
                shadows_builtin = true;
                self.error_at(
                    ErrorCode::REDEFINED_BUILTIN,
                    format!("'{name}' is a built-in and can not be redefined"),
                    span,
                );
            }
        }

        self.skip_newlines();
        let outer = std::mem::replace(&mut self.builder, ProgramBuilder::new(name.clone()));
        self.parse_block();
        let body = std::mem::replace(&mut self.builder, outer).finish();
        if !shadows_builtin {
            self.definitions.push((name, body));
        }
    }
}

/// Map a compound-assignment token to the instruction it applies.
fn compound_op(kind: &TokenKind) -> Option<Inst> {
    Some(match kind {
        TokenKind::AddAssign => Inst::Add,
        TokenKind::SubAssign => Inst::Sub,
        TokenKind::MulAssign => Inst::Mul,
        TokenKind::DivAssign => Inst::Div,
        TokenKind::ModAssign => Inst::Mod,
        TokenKind::AndAssign => Inst::BitAnd,
        TokenKind::OrAssign => Inst::BitOr,
        _ => return None,
    })
}

/// The read-only argument forms: `$args`, `$n_args`, `$1`..
fn is_args_form(name: &str) -> bool {
    if name == "$args" || name == "$n_args" {
        return true;
    }
    let rest = &name[1..];
    !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
}
