//! Token types for the macl lexer.
//!
//! Defines [`TokenKind`] covering every lexeme in the macro language and
//! [`Token`], which pairs a kind with a source [`Span`].

use macl_types::Span;
use std::fmt;

/// All reserved identifiers in the macro language.
///
/// These cannot be used as variable or function names. The lexer
/// recognises each one and emits a specific keyword token instead of
/// [`TokenKind::Ident`].
pub const ALL_KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "break", "continue", "return", "in", "delete", "define",
];

// ─────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────

/// A single token produced by the macl lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What kind of token this is.
    pub kind: TokenKind,
    /// Source location.
    pub span: Span,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Returns `true` if this token is a reserved keyword.
    pub fn is_keyword(&self) -> bool {
        self.kind.is_keyword()
    }
}

// ─────────────────────────────────────────────────────────────────────
// TokenKind
// ─────────────────────────────────────────────────────────────────────

/// Every token kind in the macro language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ── Literals ──────────────────────────────────────────────

    /// Integer literal: `42`
    Number(i32),
    /// String literal with escapes already resolved: `"hello"`
    Str(String),

    // ── Identifiers ──────────────────────────────────────────

    /// Variable or function name: `my_var`, `t_print`. Names of
    /// special variables keep their `$` prefix: `$1`, `$n_args`.
    Ident(String),

    // ── Keywords ─────────────────────────────────────────────

    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `for`
    For,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `return`
    Return,
    /// `in`
    In,
    /// `delete`
    Delete,
    /// `define`
    Define,

    // ── Assignment operators ─────────────────────────────────

    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
    /// `%=`
    ModAssign,
    /// `&=`
    AndAssign,
    /// `|=`
    OrAssign,
    /// `++`
    Incr,
    /// `--`
    Decr,

    // ── Operators ────────────────────────────────────────────

    /// `==`
    EqEq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `!`
    Bang,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `^`
    Caret,

    // ── Punctuation ──────────────────────────────────────────

    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `;`
    Semicolon,

    // ── Special ──────────────────────────────────────────────

    /// Newline (statement terminator)
    Newline,
    /// End of file
    Eof,
}

impl TokenKind {
    /// Look up a reserved identifier. Returns `Some(kind)` for reserved
    /// words, `None` for user identifiers.
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        Some(match s {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "in" => TokenKind::In,
            "delete" => TokenKind::Delete,
            "define" => TokenKind::Define,
            _ => return None,
        })
    }

    /// Returns `true` if this token kind is a reserved keyword.
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::If
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::In
                | TokenKind::Delete
                | TokenKind::Define
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::Str(s) => write!(f, "\"{s}\""),
            TokenKind::Ident(s) => f.write_str(s),
            TokenKind::If => f.write_str("if"),
            TokenKind::Else => f.write_str("else"),
            TokenKind::While => f.write_str("while"),
            TokenKind::For => f.write_str("for"),
            TokenKind::Break => f.write_str("break"),
            TokenKind::Continue => f.write_str("continue"),
            TokenKind::Return => f.write_str("return"),
            TokenKind::In => f.write_str("in"),
            TokenKind::Delete => f.write_str("delete"),
            TokenKind::Define => f.write_str("define"),
            TokenKind::Assign => f.write_str("="),
            TokenKind::AddAssign => f.write_str("+="),
            TokenKind::SubAssign => f.write_str("-="),
            TokenKind::MulAssign => f.write_str("*="),
            TokenKind::DivAssign => f.write_str("/="),
            TokenKind::ModAssign => f.write_str("%="),
            TokenKind::AndAssign => f.write_str("&="),
            TokenKind::OrAssign => f.write_str("|="),
            TokenKind::Incr => f.write_str("++"),
            TokenKind::Decr => f.write_str("--"),
            TokenKind::EqEq => f.write_str("=="),
            TokenKind::Ne => f.write_str("!="),
            TokenKind::Lt => f.write_str("<"),
            TokenKind::Gt => f.write_str(">"),
            TokenKind::Le => f.write_str("<="),
            TokenKind::Ge => f.write_str(">="),
            TokenKind::AndAnd => f.write_str("&&"),
            TokenKind::OrOr => f.write_str("||"),
            TokenKind::Amp => f.write_str("&"),
            TokenKind::Pipe => f.write_str("|"),
            TokenKind::Bang => f.write_str("!"),
            TokenKind::Plus => f.write_str("+"),
            TokenKind::Minus => f.write_str("-"),
            TokenKind::Star => f.write_str("*"),
            TokenKind::Slash => f.write_str("/"),
            TokenKind::Percent => f.write_str("%"),
            TokenKind::Caret => f.write_str("^"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::LBracket => f.write_str("["),
            TokenKind::RBracket => f.write_str("]"),
            TokenKind::LBrace => f.write_str("{"),
            TokenKind::RBrace => f.write_str("}"),
            TokenKind::Comma => f.write_str(","),
            TokenKind::Semicolon => f.write_str(";"),
            TokenKind::Newline => f.write_str("newline"),
            TokenKind::Eof => f.write_str("end of file"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_keyword_recognises_all() {
        for &kw in ALL_KEYWORDS {
            let kind = TokenKind::from_keyword(kw);
            assert!(kind.is_some(), "from_keyword should recognise '{kw}'");
            assert!(kind.unwrap().is_keyword());
        }
    }

    #[test]
    fn test_from_keyword_returns_none_for_identifiers() {
        for name in ["foo", "t_print", "IF", "Define", "inx", "$1", "whileX"] {
            assert!(
                TokenKind::from_keyword(name).is_none(),
                "from_keyword should not recognise '{name}'"
            );
        }
    }

    #[test]
    fn test_is_keyword_false_for_non_keywords() {
        let non_keyword_kinds = [
            TokenKind::Number(42),
            TokenKind::Str("hi".into()),
            TokenKind::Ident("foo".into()),
            TokenKind::Plus,
            TokenKind::LBrace,
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        for kind in &non_keyword_kinds {
            assert!(!kind.is_keyword(), "is_keyword should be false for {kind:?}");
        }
    }

    #[test]
    fn test_token_construction() {
        let span = Span::new(1, 1, 1, 5);
        let token = Token::new(TokenKind::While, span);
        assert_eq!(token.kind, TokenKind::While);
        assert_eq!(token.span, span);
        assert!(token.is_keyword());
    }

    #[test]
    fn test_display_roundtrip_keywords() {
        for &kw in ALL_KEYWORDS {
            let kind = TokenKind::from_keyword(kw).unwrap();
            assert_eq!(kind.to_string(), kw);
        }
    }

    #[test]
    fn test_display_operators() {
        assert_eq!(TokenKind::AddAssign.to_string(), "+=");
        assert_eq!(TokenKind::Incr.to_string(), "++");
        assert_eq!(TokenKind::EqEq.to_string(), "==");
        assert_eq!(TokenKind::AndAnd.to_string(), "&&");
        assert_eq!(TokenKind::Caret.to_string(), "^");
        assert_eq!(TokenKind::Amp.to_string(), "&");
    }

    #[test]
    fn test_display_literals() {
        assert_eq!(TokenKind::Number(42).to_string(), "42");
        assert_eq!(TokenKind::Str("hello".into()).to_string(), "\"hello\"");
        assert_eq!(TokenKind::Ident("$n_args".into()).to_string(), "$n_args");
    }
}
