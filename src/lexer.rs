use std::{iter::Peekable, num::ParseIntError};

use crate::token::{Operator as Op, Punct, Span, Token, TokenKind, KEYWORDS, TYPE_NAMES};

pub const SUGGESTED_TOKENS_CAPACITY: usize = 8_192;

/// Lexes the provided string, producing the tokens into the provided buffer.
///
/// The buffer always ends with a [`TokenKind::Eof`] token. Every source byte
/// is covered by exactly one token, trivia included.
pub fn lex(src: &str, tokens: &mut Vec<Token>) {
    Lexer::new(src, tokens).lex();
}

/// A convenience function that allocates a new buffer per lexed input and
/// returns it.
pub fn lex_in_new(src: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(SUGGESTED_TOKENS_CAPACITY);
    lex(src, &mut tokens);
    tokens
}

/// The L lexer.
struct Lexer<'src, 'tok> {
    src: &'src str,
    iter: Peekable<std::str::Chars<'src>>,
    cursor: usize,
    current_lo: usize,
    tokens: &'tok mut Vec<Token>,
}

impl Lexer<'_, '_> {
    /// Scans the source string until the input is exhausted.
    fn lex(mut self) {
        assert_eq!(self.tokens.len(), 0, "must pass clean tokens buffer");
        while let Some(c) = self.mark_advance() {
            let kind = self.scan_token_kind(c);
            self.produce(kind);
        }
        self.produce(TokenKind::Eof);
    }

    /// Classifies the token starting at `c`, consuming the rest of it.
    fn scan_token_kind(&mut self, c: char) -> TokenKind {
        use TokenKind::{Operator as O, Punct as P};
        match c {
            '+' => O(Op::Plus),
            '-' => O(Op::Minus),
            '*' => O(Op::Star),
            '/' => match self.peek() {
                Some('/') => self.line_comment(),
                Some('*') => self.block_comment(),
                _ => O(Op::Slash),
            },
            '%' => O(Op::Percent),
            '<' => match self.peek() {
                Some('=') => self.advance_with(O(Op::LessEq)),
                _ => O(Op::Less),
            },
            '>' => match self.peek() {
                Some('=') => self.advance_with(O(Op::GreaterEq)),
                _ => O(Op::Greater),
            },
            '=' => match self.peek() {
                Some('=') => self.advance_with(O(Op::EqEq)),
                _ => O(Op::Assign),
            },
            '!' => match self.peek() {
                Some('=') => self.advance_with(O(Op::NotEq)),
                _ => TokenKind::ErrorUnexpectedChar,
            },
            '|' => O(Op::Pipe),
            '&' => O(Op::Amp),
            '(' => P(Punct::LParen),
            ')' => P(Punct::RParen),
            '{' => P(Punct::LBrace),
            '}' => P(Punct::RBrace),
            '[' => P(Punct::LBracket),
            ']' => P(Punct::RBracket),
            ',' => P(Punct::Comma),
            ':' => P(Punct::Colon),
            '.' => P(Punct::Dot),
            ';' => P(Punct::Semicolon),
            '"' => self.string(),
            c if c.is_whitespace() => self.whitespace(),
            c if c.is_ascii_digit() => self.number(),
            c if is_identifier_char(c) => self.identifier_or_keyword(),
            _ => TokenKind::ErrorUnexpectedChar,
        }
    }

    /// Scans a string literal. Escape sequences are only skipped over here;
    /// they are resolved by [`extract::string`].
    fn string(&mut self) -> TokenKind {
        // Whether the current character is being escaped
        let mut is_escaping = false;
        loop {
            match (is_escaping, self.advance()) {
                // Input exhausted before the closing quote.
                (_, None) => return TokenKind::ErrorUnclosedString,
                // An unescaped quotation mark marks the end of the string.
                (false, Some('"')) => return TokenKind::String,
                // Mark a new escape context.
                (false, Some('\\')) => is_escaping = true,
                (_, Some(_)) => is_escaping = false,
            }
        }
    }

    fn identifier_or_keyword(&mut self) -> TokenKind {
        while self.peek().is_some_and(is_identifier_char) {
            self.advance();
        }
        let substr = self.substr();
        if let Some(keyword) = KEYWORDS.get(substr) {
            TokenKind::Keyword(*keyword)
        } else if let Some(ty) = TYPE_NAMES.get(substr) {
            TokenKind::TypeName(*ty)
        } else {
            TokenKind::Identifier
        }
    }

    fn number(&mut self) -> TokenKind {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        TokenKind::Number
    }

    fn whitespace(&mut self) -> TokenKind {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
        TokenKind::Whitespace
    }

    fn line_comment(&mut self) -> TokenKind {
        while !matches!(self.peek(), Some('\n') | None) {
            self.advance();
        }
        TokenKind::LineComment
    }

    fn block_comment(&mut self) -> TokenKind {
        assert_eq!(self.advance(), Some('*'));
        loop {
            match self.advance() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    return TokenKind::BlockComment;
                }
                Some(_) => continue,
                None => return TokenKind::ErrorUnclosedComment,
            }
        }
    }
}

/// Identifiers are maximal runs of characters that are neither whitespace,
/// punctuation, operator characters nor control characters.
fn is_identifier_char(c: char) -> bool {
    !c.is_whitespace()
        && !c.is_control()
        && !matches!(
            c,
            '(' | ')'
                | '{'
                | '}'
                | '['
                | ']'
                | ','
                | ':'
                | '"'
                | '.'
                | ';'
                | '+'
                | '-'
                | '*'
                | '/'
                | '%'
                | '<'
                | '='
                | '!'
                | '>'
                | '|'
                | '&'
        )
}

impl Lexer<'_, '_> {
    /// Constructs a new lexer with the default state.
    fn new<'src, 'tok>(src: &'src str, tokens: &'tok mut Vec<Token>) -> Lexer<'src, 'tok> {
        Lexer {
            src,
            iter: src.chars().peekable(),
            cursor: 0,
            current_lo: 0,
            tokens,
        }
    }

    /// Starts a new token "mark" and advances the iterator.
    fn mark_advance(&mut self) -> Option<char> {
        self.current_lo = self.cursor;
        self.advance()
    }

    /// Returns the next character and advances the iterator.
    fn advance(&mut self) -> Option<char> {
        self.iter
            .next()
            .inspect(|c| self.cursor += c.len_utf8())
    }

    /// Advances and returns the provided value.
    fn advance_with<T>(&mut self, value: T) -> T {
        self.advance();
        value
    }

    /// Returns the next character without advancing the iterator.
    fn peek(&mut self) -> Option<char> {
        self.iter.peek().copied()
    }

    /// Returns the current span.
    fn span(&self) -> Span {
        Span::new_of_bounds(self.current_lo..self.cursor)
    }

    /// Returns the substring of the current marked bounds.
    fn substr(&self) -> &str {
        self.span().substr(self.src)
    }

    /// Produces a token using the marked bounds.
    fn produce(&mut self, kind: TokenKind) {
        let span = if kind == TokenKind::Eof {
            Span::new_of_length(self.cursor, 0)
        } else {
            self.span()
        };
        self.tokens.push(Token::new(kind, span));
    }
}

pub mod extract {
    use super::*;

    pub fn int(token: Token, src: &str) -> Result<i128, ParseIntError> {
        debug_assert_eq!(token.kind, TokenKind::Number);
        token.span().substr(src).parse()
    }

    pub fn ident(token: Token, src: &str) -> &str {
        debug_assert_eq!(token.kind, TokenKind::Identifier);
        token.span().substr(src)
    }

    /// Returns the string contents without quotes, with escapes resolved.
    pub fn string(token: Token, src: &str) -> Box<str> {
        debug_assert_eq!(token.kind, TokenKind::String);
        let raw = token.span().offset(1, -1).substr(src);
        if raw.contains('\\') {
            perform_escape(raw).into_boxed_str()
        } else {
            raw.into()
        }
    }
}

fn perform_escape(raw: &str) -> String {
    let mut buf = String::with_capacity(raw.len());
    let mut escaped = false;
    for char in raw.chars() {
        let char = match (escaped, char) {
            (true, 'n') => '\n',
            (true, 't') => '\t',
            (true, 'r') => '\r',
            (true, '0') => '\0',
            (false, '\\') => {
                escaped = true;
                continue;
            }
            // `\"`, `\\` and unknown escapes map to the escaped char itself.
            (_, char) => char,
        };
        escaped = false;
        buf.push(char);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{BuiltinType, Keyword as Kw, Punct as P};
    use pretty_assertions::assert_eq;

    const DEMOS: &[&str] = &[
        include_str!("../demos/hello/main.l"),
        include_str!("../demos/fizzbuzz/main.l"),
        include_str!("../demos/sum/main.l"),
        include_str!("../demos/shapes/main.l"),
        include_str!("../demos/countdown/main.l"),
    ];

    #[test]
    fn test_demos_no_errors() {
        for input in DEMOS {
            let has_errors = lex_in_new(input).into_iter().any(|t| t.kind.is_error());
            assert!(!has_errors);
        }
    }

    #[test]
    fn test_tokens_cover_source() {
        let inputs = DEMOS.iter().copied().chain([
            "",
            "\"unclosed",
            "/* unclosed",
            "a!b ## ✓ ünïcode // trailing",
        ]);
        for input in inputs {
            let tokens = lex_in_new(input);
            let rebuilt: String = tokens.iter().map(|t| t.span().substr(input)).collect();
            assert_eq!(rebuilt, input);
            assert!(tokens.last().is_some_and(Token::is_eof));
        }
    }

    #[test]
    fn test_relexing_without_trivia_is_idempotent() {
        let input = include_str!("../demos/fizzbuzz/main.l");
        let stripped: Vec<&str> = lex_in_new(input)
            .iter()
            .filter(|t| !t.kind.is_trivia() && !t.is_eof())
            .map(|t| t.span().substr(input))
            .collect();
        let joined = stripped.join(" ");
        let again: Vec<&str> = lex_in_new(&joined)
            .iter()
            .filter(|t| !t.kind.is_trivia() && !t.is_eof())
            .map(|t| t.span().substr(&joined))
            .collect();
        assert_eq!(stripped, again);
    }

    #[test]
    fn test_escapes() {
        let src = r#""a\n\t\"b\\""#;
        let tokens = lex_in_new(src);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(&*extract::string(tokens[0], src), "a\n\t\"b\\");
    }

    #[test]
    fn tests_with_span() {
        use TokenKind::*;
        let cases = cases!(match .. {
            "+-*/%" => [
                (Operator(Op::Plus), 0..1),
                (Operator(Op::Minus), 1..2),
                (Operator(Op::Star), 2..3),
                (Operator(Op::Slash), 3..4),
                (Operator(Op::Percent), 4..5),
                (Eof, 5..5),
            ],
            "< <= == != >= > = | &" => [
                (Operator(Op::Less), 0..1),
                (Whitespace, 1..2),
                (Operator(Op::LessEq), 2..4),
                (Whitespace, 4..5),
                (Operator(Op::EqEq), 5..7),
                (Whitespace, 7..8),
                (Operator(Op::NotEq), 8..10),
                (Whitespace, 10..11),
                (Operator(Op::GreaterEq), 11..13),
                (Whitespace, 13..14),
                (Operator(Op::Greater), 14..15),
                (Whitespace, 15..16),
                (Operator(Op::Assign), 16..17),
                (Whitespace, 17..18),
                (Operator(Op::Pipe), 18..19),
                (Whitespace, 19..20),
                (Operator(Op::Amp), 20..21),
                (Eof, 21..21),
            ],
            "proc main() {}" => [
                (Keyword(Kw::Proc), 0..4),
                (Whitespace, 4..5),
                (Identifier, 5..9),
                (Punct(P::LParen), 9..10),
                (Punct(P::RParen), 10..11),
                (Whitespace, 11..12),
                (Punct(P::LBrace), 12..13),
                (Punct(P::RBrace), 13..14),
                (Eof, 14..14),
            ],
            "let n uint8 = 255" => [
                (Keyword(Kw::Let), 0..3),
                (Whitespace, 3..4),
                (Identifier, 4..5),
                (Whitespace, 5..6),
                (TypeName(BuiltinType::Uint8), 6..11),
                (Whitespace, 11..12),
                (Operator(Op::Assign), 12..13),
                (Whitespace, 13..14),
                (Number, 14..17),
                (Eof, 17..17),
            ],
            "a[i]=x_1;" => [
                (Identifier, 0..1),
                (Punct(P::LBracket), 1..2),
                (Identifier, 2..3),
                (Punct(P::RBracket), 3..4),
                (Operator(Op::Assign), 4..5),
                (Identifier, 5..8),
                (Punct(P::Semicolon), 8..9),
                (Eof, 9..9),
            ],
            "12ab" => [(Number, 0..2), (Identifier, 2..4), (Eof, 4..4)],
            r#""hi" "a\"b""# => [
                (String, 0..4),
                (Whitespace, 4..5),
                (String, 5..11),
                (Eof, 11..11),
            ],
            r#""oi\"# => [(ErrorUnclosedString, 0..4), (Eof, 4..4)],
            "x // line\n/* block */y" => [
                (Identifier, 0..1),
                (Whitespace, 1..2),
                (LineComment, 2..9),
                (Whitespace, 9..10),
                (BlockComment, 10..21),
                (Identifier, 21..22),
                (Eof, 22..22),
            ],
            "/* /* */" => [(BlockComment, 0..8), (Eof, 8..8)],
            "/* unclosed" => [(ErrorUnclosedComment, 0..11), (Eof, 11..11)],
            "!x" => [(ErrorUnexpectedChar, 0..1), (Identifier, 1..2), (Eof, 2..2)],
        });

        for (input, tokens) in cases {
            let lexed = lex_in_new(input);
            assert_eq!(lexed, tokens.as_slice(), "input: {input:?}");
        }
    }

    macro_rules! cases {
        (match .. {
            $($str:expr => [$(($kind:expr, $range:expr)),* $(,)?]),* $(,)?
        }) => {{
            &[$((
                $str,
                vec![
                    $(Token::new($kind, Span::new_of_bounds($range.start..$range.end))),*
                ],
            )),*]
        }};
    }
    use cases;
}
