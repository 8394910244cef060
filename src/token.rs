use std::{fmt, ops::Range};

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    lo: usize,
    len: u32,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Token {
        Token {
            kind,
            len: span.len,
            lo: span.lo,
        }
    }

    /// An end-of-file token placed right after the last byte of `src`.
    pub fn eof_for(src: &str) -> Token {
        Token::new(TokenKind::Eof, Span::new_of_length(src.len(), 0))
    }

    pub fn span(&self) -> Span {
        Span {
            len: self.len,
            lo: self.lo,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?}, {})", self.kind, self.span())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub len: u32,
    pub lo: usize,
}

impl Span {
    pub fn new_of_bounds(Range { start: lo, end: hi }: Range<usize>) -> Span {
        debug_assert!(hi >= lo);
        Self::new_of_length(lo, u32::try_from(hi - lo).unwrap())
    }

    pub const fn new_of_length(lo: usize, len: u32) -> Span {
        Span { len, lo }
    }

    pub fn hi(&self) -> usize {
        self.lo + self.len as usize
    }

    /// Returns a span that covers both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        let lo = self.lo.min(other.lo);
        let hi = self.hi().max(other.hi());
        Span::new_of_bounds(lo..hi)
    }

    /// Shrinks or grows the span on both sides.
    pub fn offset(self, lo: isize, hi: isize) -> Span {
        let new_lo = self.lo.checked_add_signed(lo).unwrap();
        let new_hi = self.hi().checked_add_signed(hi).unwrap();
        Span::new_of_bounds(new_lo..new_hi)
    }

    pub fn substr(self, src: &str) -> &str {
        &src[self.lo..self.hi()]
    }

    pub fn wrap<T>(self, inner: T) -> Spanned<T> {
        Spanned { span: self, inner }
    }

    /// One-based line and column of the span start.
    pub fn line_col(self, src: &str) -> (usize, usize) {
        let before = &src[..self.lo.min(src.len())];
        let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
        let col = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        (line, col)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({self}, len: {})", self.len)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lo = self.lo;
        let hi = self.hi();
        write!(f, "{lo}..{hi}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub inner: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword(Keyword),
    TypeName(BuiltinType),
    Operator(Operator),
    Punct(Punct),

    /// A double-quoted string. The span includes both quotes and escape
    /// sequences are left as written.
    String,
    Number,
    Identifier,

    Whitespace,
    LineComment,
    BlockComment,
    Eof,

    ErrorUnclosedString,
    ErrorUnclosedComment,
    ErrorUnexpectedChar,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            TokenKind::ErrorUnclosedString
                | TokenKind::ErrorUnclosedComment
                | TokenKind::ErrorUnexpectedChar
        )
    }

    /// Whether this token may only start a top-level declaration. Used to
    /// resynchronize after an error.
    pub fn starts_decl(self) -> bool {
        matches!(
            self,
            TokenKind::Keyword(Keyword::Func | Keyword::Proc | Keyword::Type | Keyword::Data)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(k) => write!(f, "keyword `{}`", k.as_str()),
            TokenKind::TypeName(t) => write!(f, "type `{}`", t.as_str()),
            TokenKind::Operator(o) => write!(f, "`{}`", o.as_str()),
            TokenKind::Punct(p) => write!(f, "`{}`", p.as_str()),
            TokenKind::String => f.write_str("string literal"),
            TokenKind::Number => f.write_str("number"),
            TokenKind::Identifier => f.write_str("identifier"),
            TokenKind::Whitespace => f.write_str("whitespace"),
            TokenKind::LineComment | TokenKind::BlockComment => f.write_str("comment"),
            TokenKind::Eof => f.write_str("end of file"),
            TokenKind::ErrorUnclosedString => f.write_str("unclosed string"),
            TokenKind::ErrorUnclosedComment => f.write_str("unclosed comment"),
            TokenKind::ErrorUnexpectedChar => f.write_str("unexpected character"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Keyword {
    Proc,
    Func,
    Mutable,
    Let,
    While,
    If,
    Else,
    Return,
    Match,
    Case,
    Type,
    Data,
    As,
    Assert,
}

impl Keyword {
    pub const fn as_str(self) -> &'static str {
        match self {
            Keyword::Proc => "proc",
            Keyword::Func => "func",
            Keyword::Mutable => "mutable",
            Keyword::Let => "let",
            Keyword::While => "while",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Return => "return",
            Keyword::Match => "match",
            Keyword::Case => "case",
            Keyword::Type => "type",
            Keyword::Data => "data",
            Keyword::As => "as",
            Keyword::Assert => "assert",
        }
    }
}

/// Built-in scalar type names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Int,
    Uint,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Byte,
    Bool,
    String,
}

impl BuiltinType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BuiltinType::Int => "int",
            BuiltinType::Uint => "uint",
            BuiltinType::Int8 => "int8",
            BuiltinType::Int16 => "int16",
            BuiltinType::Int32 => "int32",
            BuiltinType::Int64 => "int64",
            BuiltinType::Uint8 => "uint8",
            BuiltinType::Uint16 => "uint16",
            BuiltinType::Uint32 => "uint32",
            BuiltinType::Uint64 => "uint64",
            BuiltinType::Byte => "byte",
            BuiltinType::Bool => "bool",
            BuiltinType::String => "string",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    LessEq,
    EqEq,
    NotEq,
    GreaterEq,
    Greater,
    /// `=`
    Assign,
    /// `|`
    Pipe,
    /// `&`
    Amp,
}

impl Operator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Less => "<",
            Operator::LessEq => "<=",
            Operator::EqEq => "==",
            Operator::NotEq => "!=",
            Operator::GreaterEq => ">=",
            Operator::Greater => ">",
            Operator::Assign => "=",
            Operator::Pipe => "|",
            Operator::Amp => "&",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,
}

impl Punct {
    pub const fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Comma => ",",
            Punct::Colon => ":",
            Punct::Dot => ".",
            Punct::Semicolon => ";",
        }
    }
}

pub static KEYWORDS: phf::Map<&'static str, Keyword> = phf::phf_map! {
    "proc" => Keyword::Proc,
    "func" => Keyword::Func,
    "mutable" => Keyword::Mutable,
    "let" => Keyword::Let,
    "while" => Keyword::While,
    "if" => Keyword::If,
    "else" => Keyword::Else,
    "return" => Keyword::Return,
    "match" => Keyword::Match,
    "case" => Keyword::Case,
    "type" => Keyword::Type,
    "data" => Keyword::Data,
    "as" => Keyword::As,
    "assert" => Keyword::Assert,
};

pub static TYPE_NAMES: phf::Map<&'static str, BuiltinType> = phf::phf_map! {
    "int" => BuiltinType::Int,
    "uint" => BuiltinType::Uint,
    "int8" => BuiltinType::Int8,
    "int16" => BuiltinType::Int16,
    "int32" => BuiltinType::Int32,
    "int64" => BuiltinType::Int64,
    "uint8" => BuiltinType::Uint8,
    "uint16" => BuiltinType::Uint16,
    "uint32" => BuiltinType::Uint32,
    "uint64" => BuiltinType::Uint64,
    "byte" => BuiltinType::Byte,
    "bool" => BuiltinType::Bool,
    "string" => BuiltinType::String,
};

/// Shorthands for matching token kinds.
pub mod t {
    use super::{Keyword, Operator, Punct, TokenKind};

    pub const fn kw(k: Keyword) -> TokenKind {
        TokenKind::Keyword(k)
    }

    pub const fn op(o: Operator) -> TokenKind {
        TokenKind::Operator(o)
    }

    pub const fn p(p: Punct) -> TokenKind {
        TokenKind::Punct(p)
    }
}
