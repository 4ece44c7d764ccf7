//! Expression compilation.
//!
//! Precedence, loosest to tightest: concatenation (juxtaposition),
//! `||`, `&&`, `|`, `&`, comparisons and `in` (non-associative),
//! additive, multiplicative, unary `!` and `-`, `^` (right
//! associative), then calls and subscripts.

use macl_interp::Inst;
use macl_lexer::TokenKind;
use macl_types::ErrorCode;

use crate::parser::Parser;

impl Parser<'_> {
    /// Compile one expression; its value is left on the stack.
    pub(crate) fn compile_expression(&mut self) {
        self.compile_concat();
    }

    /// Adjacent operands concatenate: `"line " i ":"`.
    fn compile_concat(&mut self) {
        self.compile_or();
        while starts_operand(self.peek_kind()) {
            self.compile_or();
            self.emit(Inst::Concat);
        }
    }

    fn compile_or(&mut self) {
        self.compile_and();
        while self.eat(&TokenKind::OrOr) {
            self.compile_and();
            self.emit(Inst::Or);
        }
    }

    fn compile_and(&mut self) {
        self.compile_bit_or();
        while self.eat(&TokenKind::AndAnd) {
            self.compile_bit_or();
            self.emit(Inst::And);
        }
    }

    fn compile_bit_or(&mut self) {
        self.compile_bit_and();
        while self.eat(&TokenKind::Pipe) {
            self.compile_bit_and();
            self.emit(Inst::BitOr);
        }
    }

    fn compile_bit_and(&mut self) {
        self.compile_comparison();
        while self.eat(&TokenKind::Amp) {
            self.compile_comparison();
            self.emit(Inst::BitAnd);
        }
    }

    /// Comparisons do not chain: `a < b < c` is a syntax error.
    fn compile_comparison(&mut self) {
        self.compile_additive();
        let op = match self.peek_kind() {
            TokenKind::Gt => Inst::Gt,
            TokenKind::Lt => Inst::Lt,
            TokenKind::Ge => Inst::Ge,
            TokenKind::Le => Inst::Le,
            TokenKind::EqEq => Inst::Eq,
            TokenKind::Ne => Inst::Ne,
            TokenKind::In => Inst::InArray,
            _ => return,
        };
        self.advance();
        self.compile_additive();
        self.emit(op);
    }

    fn compile_additive(&mut self) {
        self.compile_multiplicative();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => Inst::Add,
                TokenKind::Minus => Inst::Sub,
                _ => return,
            };
            self.advance();
            self.compile_multiplicative();
            self.emit(op);
        }
    }

    fn compile_multiplicative(&mut self) {
        self.compile_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => Inst::Mul,
                TokenKind::Slash => Inst::Div,
                TokenKind::Percent => Inst::Mod,
                _ => return,
            };
            self.advance();
            self.compile_unary();
            self.emit(op);
        }
    }

    /// Unary operators bind looser than `^`, so `-2^2` is `-(2^2)`.
    fn compile_unary(&mut self) {
        if self.eat(&TokenKind::Bang) {
            self.compile_unary();
            self.emit(Inst::Not);
        } else if self.eat(&TokenKind::Minus) {
            self.compile_unary();
            self.emit(Inst::Negate);
        } else {
            self.compile_power();
        }
    }

    /// `^` is right associative and accepts a signed exponent.
    fn compile_power(&mut self) {
        self.compile_primary();
        if self.eat(&TokenKind::Caret) {
            self.compile_unary();
            self.emit(Inst::Power);
        }
    }

    fn compile_primary(&mut self) {
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                let sym = self.symbols.number_const(n);
                self.emit(Inst::PushSym(sym));
            }
            TokenKind::Str(s) => {
                self.advance();
                let sym = self.symbols.string_const(&s);
                self.emit(Inst::PushSym(sym));
            }
            TokenKind::LParen => {
                self.advance();
                self.compile_expression();
                self.expect(&TokenKind::RParen);
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.compile_name(&name);
            }
            other => {
                self.error_at_current(
                    ErrorCode::MISSING_OPERAND,
                    format!("expected a value, got '{other}'"),
                );
            }
        }
    }

    /// An identifier in value position: variable, call, or array
    /// element.
    fn compile_name(&mut self, name: &str) {
        if name.starts_with('$') {
            self.compile_special(name);
            return;
        }
        match self.peek_kind() {
            TokenKind::LParen => self.compile_call(name, true),
            TokenKind::LBracket => {
                let sym = self.resolve_variable(name);
                self.emit(Inst::PushArraySym { sym, create: false });
                self.advance();
                let n_dim = self.parse_subscripts();
                self.emit(Inst::ArrayRef(n_dim));
            }
            _ => {
                let sym = self.resolve_variable(name);
                self.emit(Inst::PushSym(sym));
            }
        }
    }

    /// `$`-prefixed names: the macro argument forms compile to their
    /// own instructions, everything else is a host-defined symbol.
    fn compile_special(&mut self, name: &str) {
        match name {
            "$n_args" => {
                self.emit(Inst::PushArgCount);
            }
            "$args" => {
                if self.eat(&TokenKind::LBracket) {
                    self.compile_expression();
                    self.expect(&TokenKind::RBracket);
                    self.emit(Inst::PushArg);
                } else {
                    self.emit(Inst::PushArgArray);
                }
            }
            _ => {
                let rest = &name[1..];
                if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                    match rest.parse::<i32>() {
                        Ok(position) => {
                            let sym = self.symbols.number_const(position);
                            self.emit(Inst::PushSym(sym));
                            self.emit(Inst::PushArg);
                        }
                        Err(_) => {
                            self.error_at_current(
                                ErrorCode::UNDEFINED_VARIABLE,
                                format!("undefined variable '{name}'"),
                            );
                        }
                    }
                } else if let Some(sym) = self.resolve_special(name) {
                    self.emit(Inst::PushSym(sym));
                }
            }
        }
    }

    /// `name(args)`. In expression position the returned value is
    /// fetched onto the stack.
    pub(crate) fn compile_call(&mut self, name: &str, want_value: bool) {
        let sym = self.resolve_callee(name);
        self.expect(&TokenKind::LParen);
        let mut n_args = 0usize;
        if !self.check_exact(&TokenKind::RParen) {
            loop {
                self.compile_expression();
                n_args += 1;
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen);
        self.emit(Inst::SubrCall { sym, n_args });
        if want_value {
            self.emit(Inst::FetchRetVal);
        }
    }

    /// The bracketed subscript list of an array reference. Returns the
    /// number of dimensions; the subscript values are on the stack.
    pub(crate) fn parse_subscripts(&mut self) -> usize {
        let mut n_dim = 0usize;
        if !self.check_exact(&TokenKind::RBracket) {
            loop {
                self.compile_expression();
                n_dim += 1;
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket);
        if n_dim == 0 {
            self.error_at_current(ErrorCode::MISSING_OPERAND, "expected array subscript");
        }
        n_dim
    }
}

/// Tokens that can begin a concatenation operand. `-` is excluded;
/// it always parses as subtraction.
fn starts_operand(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Number(_)
            | TokenKind::Str(_)
            | TokenKind::Ident(_)
            | TokenKind::LParen
            | TokenKind::Bang
    )
}
