use crate::{
    error::Error,
    token::{Span, Spanned, Token, TokenKind},
};

pub(crate) type Result<T, E = ()> = std::result::Result<T, E>;

/// Token navigation shared by the prototype pass and the parser. Trivia is
/// skipped transparently.
pub(crate) struct Cursor<'a> {
    pub src: &'a str,
    tokens: &'a [Token],
    cursor: usize,
    last: Span,
    pub errors: Vec<Spanned<Error>>,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str, tokens: &'a [Token]) -> Cursor<'a> {
        let mut c = Cursor {
            src,
            tokens,
            cursor: 0,
            last: Span::new_of_length(0, 0),
            errors: Vec::with_capacity(8),
        };
        c.setup();
        c
    }

    /// Skips any leading trivia.
    fn setup(&mut self) {
        while self.peek().kind.is_trivia() {
            self.cursor += 1;
        }
    }

    /// Records an error.
    pub fn error(&mut self, error: Spanned<Error>) {
        self.errors.push(error);
    }

    /// Records an error and returns the error sentinel.
    pub fn fail<T>(&mut self, span: Span, error: Error) -> Result<T> {
        self.error(span.wrap(error));
        Err(())
    }

    /// Returns the current token.
    #[inline]
    pub fn peek(&self) -> Token {
        match self.tokens.get(self.cursor) {
            Some(token) => *token,
            None => Token::eof_for(self.src),
        }
    }

    /// Returns the `n`-th non-trivia token after the current one.
    pub fn peek_nth(&self, n: usize) -> Token {
        self.tokens[self.cursor.min(self.tokens.len())..]
            .iter()
            .filter(|t| !t.kind.is_trivia())
            .nth(n)
            .copied()
            .unwrap_or_else(|| Token::eof_for(self.src))
    }

    /// Returns the current token and advances. Skips any trivia.
    pub fn advance(&mut self) -> Token {
        let c = self.peek(); // Before any advancement
        if c.is_eof() {
            return c;
        }
        self.last = c.span();
        while {
            self.cursor += 1;
            self.peek().kind.is_trivia()
        } {}
        c
    }

    /// Index of the current token.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Span of the last consumed token.
    pub fn last_span(&self) -> Span {
        self.last
    }

    /// Checks whether the current token matches the given one.
    pub fn is(&self, expect: TokenKind) -> bool {
        self.peek().kind == expect
    }

    /// Advances if the current token matches the provided one, returning true.
    /// If not, returns false and doesn't advance.
    pub fn take(&mut self, expect: TokenKind) -> bool {
        if self.is(expect) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Advances if the current token matches the provided one. If not,
    /// records an error.
    pub fn consume(&mut self, expect: TokenKind) -> Result<Token> {
        let c = self.peek();
        if self.is(expect) {
            self.advance();
            Ok(c)
        } else {
            self.fail(
                c.span(),
                Error::Unexpected {
                    actual: c.kind,
                    expected: expect,
                },
            )
        }
    }

    /// Advances if the current token matches any of the provided tokens. If
    /// not, records an error.
    pub fn consume_any(&mut self, expect: &'static [TokenKind]) -> Result<Token> {
        for t in expect {
            if self.is(*t) {
                return Ok(self.advance());
            }
        }
        let c = self.peek();
        self.fail(
            c.span(),
            Error::UnexpectedAny {
                actual: c.kind,
                expected: Box::from(expect),
            },
        )
    }

    /// Returns true while the current token does *not* match one of the
    /// provided ones. [`TokenKind::Eof`] is implicitly included in the list.
    ///
    /// This won't advance the cursor.
    pub fn except(&self, except: impl IntoIterator<Item = TokenKind>) -> bool {
        let c = self.peek();
        for e in except {
            if c.kind == e {
                return false;
            }
        }
        c.kind != TokenKind::Eof
    }

    /// Moves past the current token and on to the start of the next top-level
    /// declaration.
    pub fn recover(&mut self) {
        self.advance();
        while self.except([]) && !self.peek().kind.starts_decl() {
            self.advance();
        }
    }

    /// Parses `item (separator item)*` until `end_delim` is found. Does
    /// **NOT** consume the end delimiter.
    pub fn parse_list<P, T>(
        p: &mut P,
        end_delim: TokenKind,
        separator: TokenKind,
        mut parse_item: impl FnMut(&mut P) -> Result<T>,
    ) -> Result<Vec<T>>
    where
        P: std::ops::DerefMut<Target = Cursor<'a>>,
    {
        debug_assert_ne!(end_delim, separator);

        let mut items = Vec::new();
        while p.except([end_delim]) {
            items.push(parse_item(p)?);
            // After consuming an item, we must find either the separator or
            // the end delimiter.
            if !p.take(separator) {
                if p.is(end_delim) {
                    break;
                }
                let c = p.peek();
                return p.fail(
                    c.span(),
                    Error::UnexpectedAny {
                        actual: c.kind,
                        expected: Box::from([separator, end_delim]),
                    },
                );
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexer,
        token::{t, Keyword, Punct},
    };

    #[test]
    fn skips_trivia_and_recovers() {
        let src = "/* a */ proc x ( ) { y z } func w";
        let tokens = lexer::lex_in_new(src);
        let mut c = Cursor::new(src, &tokens);
        assert_eq!(c.peek().kind, t::kw(Keyword::Proc));
        assert_eq!(c.peek_nth(2).kind, t::p(Punct::LParen));
        assert!(c.take(t::kw(Keyword::Proc)));
        assert!(c.consume(t::p(Punct::LBrace)).is_err());
        assert_eq!(c.errors.len(), 1);
        c.recover();
        assert_eq!(c.peek().kind, t::kw(Keyword::Func));
        c.recover();
        assert!(c.peek().is_eof());
        assert!(c.advance().is_eof());
    }
}
