use std::fmt;

use crate::{token::TokenKind, util::intern::Symbol};

/// Every diagnostic the front end can produce.
///
/// Type names are rendered when the error is created, since the type table
/// keeps changing while the program is checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A token kind which holds the [`TokenKind::is_error`] property.
    Lexical(TokenKind),

    Unexpected {
        actual: TokenKind,
        expected: TokenKind,
    },
    UnexpectedAny {
        actual: TokenKind,
        expected: Box<[TokenKind]>,
    },
    UnexpectedInValue {
        actual: TokenKind,
    },
    UnexpectedStatement {
        actual: TokenKind,
    },
    ParseInt,

    UnbalancedDelimiter {
        delim: TokenKind,
    },
    DuplicateDefinition {
        name: Symbol,
    },
    UnknownTypeInSignature {
        name: Symbol,
    },
    InfiniteType {
        name: Symbol,
    },

    UnknownType {
        name: Symbol,
    },
    Mismatch {
        what: Option<Symbol>,
        expected: Box<str>,
        actual: Box<str>,
    },
    LiteralOutOfRange {
        what: Option<Symbol>,
        value: i128,
        ty: Box<str>,
    },
    DivisionByZero,
    NotAssignable {
        name: Symbol,
    },
    NotMutableArgument {
        callee: Symbol,
        param: Symbol,
    },
    InvalidOperands {
        op: &'static str,
        ty: Box<str>,
    },
    NotIndexable {
        ty: Box<str>,
    },
    NoSuchField {
        field: Box<str>,
        ty: Box<str>,
    },
    NoValue {
        callee: Symbol,
    },
    InvalidCast {
        from: Box<str>,
        to: Box<str>,
    },
    NotDestructurable {
        ty: Box<str>,
    },
    NotMatchable {
        ty: Box<str>,
    },
    ForeignCase {
        case: Box<str>,
        ty: Box<str>,
    },
    /// A callable with results whose body may end without a `return`.
    MissingReturn {
        name: Symbol,
    },

    Impure {
        callee: Symbol,
    },
    EffectfulFunc {
        name: Symbol,
    },

    ShadowsMutable {
        name: Symbol,
    },
    MutableShadows {
        name: Symbol,
    },

    Undefined {
        name: Symbol,
    },

    MissingCase {
        case: Box<str>,
    },

    ArgumentCount {
        callee: Symbol,
        expected: usize,
        actual: usize,
    },
    ReturnCount {
        expected: usize,
        actual: usize,
    },
    PatternArity {
        ctor: Symbol,
        expected: usize,
        actual: usize,
    },
    DestructureCount {
        expected: usize,
        actual: usize,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Category {
    Lexical,
    Parse,
    Signature,
    Type,
    Purity,
    Shadow,
    Scope,
    Exhaustiveness,
    Arity,
}

impl Error {
    pub fn category(&self) -> Category {
        use Error::*;
        match self {
            Lexical(_) => Category::Lexical,
            Unexpected { .. }
            | UnexpectedAny { .. }
            | UnexpectedInValue { .. }
            | UnexpectedStatement { .. }
            | ParseInt => Category::Parse,
            UnbalancedDelimiter { .. }
            | DuplicateDefinition { .. }
            | UnknownTypeInSignature { .. }
            | InfiniteType { .. } => Category::Signature,
            UnknownType { .. }
            | Mismatch { .. }
            | LiteralOutOfRange { .. }
            | DivisionByZero
            | NotAssignable { .. }
            | NotMutableArgument { .. }
            | InvalidOperands { .. }
            | NotIndexable { .. }
            | NoSuchField { .. }
            | NoValue { .. }
            | InvalidCast { .. }
            | NotDestructurable { .. }
            | NotMatchable { .. }
            | ForeignCase { .. }
            | MissingReturn { .. } => Category::Type,
            Impure { .. } | EffectfulFunc { .. } => Category::Purity,
            ShadowsMutable { .. } | MutableShadows { .. } => Category::Shadow,
            Undefined { .. } => Category::Scope,
            MissingCase { .. } => Category::Exhaustiveness,
            ArgumentCount { .. }
            | ReturnCount { .. }
            | PatternArity { .. }
            | DestructureCount { .. } => Category::Arity,
        }
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(_: std::num::ParseIntError) -> Self {
        Error::ParseInt
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Lexical => "LexicalError",
            Category::Parse => "ParseError",
            Category::Signature => "SignatureError",
            Category::Type => "TypeError",
            Category::Purity => "PurityError",
            Category::Shadow => "ShadowError",
            Category::Scope => "ScopeError",
            Category::Exhaustiveness => "ExhaustivenessError",
            Category::Arity => "ArityError",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(Error::ParseInt.category(), Category::Parse);
        assert_eq!(Error::DivisionByZero.category(), Category::Type);
        let missing = Error::MissingCase { case: "A".into() };
        assert_eq!(missing.category(), Category::Exhaustiveness);
        assert_eq!(missing.category().to_string(), "ExhaustivenessError");
        let lexical = Error::Lexical(TokenKind::ErrorUnclosedString);
        assert_eq!(lexical.category().to_string(), "LexicalError");
    }
}
