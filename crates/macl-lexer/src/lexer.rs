//! Core macl lexer — converts macro source text to a token stream.
//!
//! Features:
//! - Newline-terminated statements; `\` at end of line continues the statement
//! - `#` comments to end of line
//! - `$`-prefixed special variable names lexed as single identifiers
//! - String escapes: `\n \t \r \\ \" \'`
//! - Error recovery: collects up to 20 errors instead of stopping at the first

use macl_types::{CompileErrors, ErrorCode, MaclError, SourceFile, Span};

use crate::token::{Token, TokenKind};

/// The macl lexer.
///
/// Converts macro source text into a vector of [`Token`]s, collecting up
/// to [`macl_types::MAX_ERRORS`] errors along the way.
pub struct Lexer<'src> {
    /// The full source text as bytes.
    source: &'src [u8],
    /// Source file for error reporting.
    source_file: &'src SourceFile,
    /// File name (for errors).
    file_name: &'src str,
    /// Current byte offset into `source`.
    pos: usize,
    /// Current line number (1-based).
    line: u32,
    /// Current column number (1-based).
    col: u32,
    /// Collected errors.
    errors: CompileErrors,
}

/// Result of lexing: tokens + any errors collected.
pub struct LexResult {
    /// The token stream (always ends with [`TokenKind::Eof`]).
    pub tokens: Vec<Token>,
    /// Errors encountered during lexing.
    pub errors: CompileErrors,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source file.
    pub fn new(source_file: &'src SourceFile) -> Self {
        Self {
            source: source_file.source.as_bytes(),
            source_file,
            file_name: &source_file.name,
            pos: 0,
            line: 1,
            col: 1,
            errors: CompileErrors::empty(),
        }
    }

    /// Lex the entire source file into a token stream.
    pub fn lex(mut self) -> LexResult {
        let mut tokens = Vec::new();

        loop {
            if self.errors.total_errors >= macl_types::MAX_ERRORS {
                break;
            }
            let token = self.scan_token();
            let is_eof = token.kind == TokenKind::Eof;
            // Collapse runs of newlines into one terminator
            let redundant = token.kind == TokenKind::Newline
                && matches!(
                    tokens.last().map(|t: &Token| &t.kind),
                    None | Some(TokenKind::Newline)
                );
            if !redundant {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }

        // Ensure token stream always ends with Eof
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            tokens.push(Token::new(TokenKind::Eof, self.current_span()));
        }

        LexResult {
            tokens,
            errors: self.errors,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Character-level helpers
    // ─────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn current_span(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn span_from(&self, start_line: u32, start_col: u32) -> Span {
        Span::new(
            start_line,
            start_col,
            self.line,
            self.col.saturating_sub(1).max(1),
        )
    }

    fn emit_error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.line).unwrap_or("").to_string();
        let err = MaclError::new(self.file_name, code, message, span, source_line);
        self.errors.push_error(err);
    }

    // ─────────────────────────────────────────────────────────────
    // Whitespace, comments, continuations
    // ─────────────────────────────────────────────────────────────

    /// Skip spaces, tabs, `#` comments, and backslash-newline
    /// continuations. Newlines themselves are tokens and are not skipped.
    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.advance();
                }
                Some(b'#') => {
                    // Comment runs to end of line (newline not consumed)
                    while let Some(ch) = self.peek() {
                        if ch == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\r') && self.peek_at(2) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Token scanning
    // ─────────────────────────────────────────────────────────────

    fn scan_token(&mut self) -> Token {
        self.skip_blanks();

        if self.at_end() {
            return Token::new(TokenKind::Eof, self.current_span());
        }

        let start_line = self.line;
        let start_col = self.col;
        // skip_blanks guarantees a character is available
        let Some(ch) = self.advance() else {
            return Token::new(TokenKind::Eof, self.current_span());
        };

        let simple = |lexer: &Self, kind| Token::new(kind, lexer.span_from(start_line, start_col));

        match ch {
            b'\n' => simple(self, TokenKind::Newline),
            b'"' => self.scan_string(start_line, start_col),
            b'0'..=b'9' => self.scan_number(start_line, start_col),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => self.scan_identifier(start_line, start_col),

            b'+' => match self.peek() {
                Some(b'+') => {
                    self.advance();
                    simple(self, TokenKind::Incr)
                }
                Some(b'=') => {
                    self.advance();
                    simple(self, TokenKind::AddAssign)
                }
                _ => simple(self, TokenKind::Plus),
            },
            b'-' => match self.peek() {
                Some(b'-') => {
                    self.advance();
                    simple(self, TokenKind::Decr)
                }
                Some(b'=') => {
                    self.advance();
                    simple(self, TokenKind::SubAssign)
                }
                _ => simple(self, TokenKind::Minus),
            },
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::MulAssign)
                } else {
                    simple(self, TokenKind::Star)
                }
            }
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::DivAssign)
                } else {
                    simple(self, TokenKind::Slash)
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::ModAssign)
                } else {
                    simple(self, TokenKind::Percent)
                }
            }
            b'&' => match self.peek() {
                Some(b'&') => {
                    self.advance();
                    simple(self, TokenKind::AndAnd)
                }
                Some(b'=') => {
                    self.advance();
                    simple(self, TokenKind::AndAssign)
                }
                _ => simple(self, TokenKind::Amp),
            },
            b'|' => match self.peek() {
                Some(b'|') => {
                    self.advance();
                    simple(self, TokenKind::OrOr)
                }
                Some(b'=') => {
                    self.advance();
                    simple(self, TokenKind::OrAssign)
                }
                _ => simple(self, TokenKind::Pipe),
            },
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::EqEq)
                } else {
                    simple(self, TokenKind::Assign)
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::Ne)
                } else {
                    simple(self, TokenKind::Bang)
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::Le)
                } else {
                    simple(self, TokenKind::Lt)
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    simple(self, TokenKind::Ge)
                } else {
                    simple(self, TokenKind::Gt)
                }
            }
            b'^' => simple(self, TokenKind::Caret),
            b'(' => simple(self, TokenKind::LParen),
            b')' => simple(self, TokenKind::RParen),
            b'[' => simple(self, TokenKind::LBracket),
            b']' => simple(self, TokenKind::RBracket),
            b'{' => simple(self, TokenKind::LBrace),
            b'}' => simple(self, TokenKind::RBrace),
            b',' => simple(self, TokenKind::Comma),
            b';' => simple(self, TokenKind::Semicolon),

            _ => {
                let span = self.span_from(start_line, start_col);
                self.emit_error(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("unexpected character '{}'", ch as char),
                    span,
                );
                // Error recovery: skip the character and try again
                self.scan_token()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Number literals
    // ─────────────────────────────────────────────────────────────

    fn scan_number(&mut self, start_line: u32, start_col: u32) -> Token {
        let start = self.pos - 1;
        while let Some(b'0'..=b'9') = self.peek() {
            self.advance();
        }
        let span = self.span_from(start_line, start_col);
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("0");
        let value = match text.parse::<i32>() {
            Ok(n) => n,
            Err(_) => {
                self.emit_error(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("number constant {text} is too large"),
                    span,
                );
                0
            }
        };
        Token::new(TokenKind::Number(value), span)
    }

    // ─────────────────────────────────────────────────────────────
    // Identifiers & keywords
    // ─────────────────────────────────────────────────────────────

    fn scan_identifier(&mut self, start_line: u32, start_col: u32) -> Token {
        let start = self.pos - 1;
        let dollar = self.source[start] == b'$';
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.advance();
            } else {
                break;
            }
        }

        let span = self.span_from(start_line, start_col);
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");

        if dollar && text.len() == 1 {
            self.emit_error(
                ErrorCode::UNEXPECTED_TOKEN,
                "'$' must be followed by a variable name",
                span,
            );
            return self.scan_token();
        }

        let kind = if dollar {
            TokenKind::Ident(text.to_string())
        } else {
            TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
        };
        Token::new(kind, span)
    }

    // ─────────────────────────────────────────────────────────────
    // String literals
    // ─────────────────────────────────────────────────────────────

    /// Scan a string literal starting after the opening `"`.
    fn scan_string(&mut self, start_line: u32, start_col: u32) -> Token {
        let mut buf = String::new();

        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    let span = self.span_from(start_line, start_col);
                    self.emit_error(
                        ErrorCode::UNTERMINATED_STRING,
                        "unterminated string literal",
                        span,
                    );
                    return Token::new(TokenKind::Str(buf), span);
                }
                Some(b'"') => {
                    self.advance();
                    return Token::new(TokenKind::Str(buf), self.span_from(start_line, start_col));
                }
                Some(b'\\') => {
                    if let Some(escaped) = self.scan_escape_sequence() {
                        buf.push(escaped);
                    }
                }
                Some(ch) if ch < 0x80 => {
                    self.advance();
                    buf.push(ch as char);
                }
                Some(_) => buf.push(self.scan_utf8_char()),
            }
        }
    }

    /// Decode one multibyte UTF-8 character at the cursor. Strings are
    /// macro-visible data, so their non-ASCII content must arrive
    /// intact rather than as per-byte reinterpretations.
    fn scan_utf8_char(&mut self) -> char {
        let len = match self.peek() {
            Some(b) if b >= 0xf0 => 4,
            Some(b) if b >= 0xe0 => 3,
            Some(b) if b >= 0xc0 => 2,
            _ => 1,
        };
        let end = (self.pos + len).min(self.source.len());
        let decoded = std::str::from_utf8(&self.source[self.pos..end])
            .ok()
            .and_then(|s| s.chars().next());
        match decoded {
            Some(ch) => {
                // A multibyte character is never '\n', so the cursor
                // can move without the newline bookkeeping.
                self.pos += ch.len_utf8();
                self.col += 1;
                ch
            }
            None => {
                self.pos += 1;
                self.col += 1;
                char::REPLACEMENT_CHARACTER
            }
        }
    }

    /// Scan an escape sequence after peeking the `\`.
    /// Returns the unescaped character, or `None` if invalid (error emitted).
    fn scan_escape_sequence(&mut self) -> Option<char> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance(); // consume the '\'

        match self.advance() {
            Some(b'"') => Some('"'),
            Some(b'\'') => Some('\''),
            Some(b'\\') => Some('\\'),
            Some(b'n') => Some('\n'),
            Some(b't') => Some('\t'),
            Some(b'r') => Some('\r'),
            Some(ch) => {
                let span = self.span_from(start_line, start_col);
                self.emit_error(
                    ErrorCode::INVALID_ESCAPE,
                    format!("invalid escape sequence '\\{}'", ch as char),
                    span,
                );
                Some(ch as char) // error recovery: emit the char as-is
            }
            None => {
                let span = self.span_from(start_line, start_col);
                self.emit_error(
                    ErrorCode::UNTERMINATED_STRING,
                    "unexpected end of file in escape sequence",
                    span,
                );
                None
            }
        }
    }
}
