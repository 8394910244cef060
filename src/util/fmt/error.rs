use crate::{
    error::Error,
    token::{Spanned, TokenKind},
    util::fmt::Show,
};

impl Show for Spanned<Error> {
    fn show(&self, f: &mut std::fmt::Formatter<'_>, ctx: &super::Context<'_>) -> std::fmt::Result {
        let i = ctx.ident_interner;
        let Spanned { span, inner: error } = self;

        if f.alternate() {
            ctx.locate(f, *span)?;
            write!(f, ": ")?;
        }
        write!(f, "{}: ", error.category())?;

        use Error::*;
        match error {
            Lexical(kind) => write!(f, "{kind}"),
            Unexpected { actual, expected } => {
                write!(f, "expected {expected}, but got {actual}")
            }
            UnexpectedAny { actual, expected } => {
                write!(f, "expected one of ")?;
                write_kinds(f, expected)?;
                write!(f, ", but got {actual}")
            }
            UnexpectedInValue { actual } => write!(f, "unexpected {actual} in value"),
            UnexpectedStatement { actual } => write!(f, "expected a statement, but got {actual}"),
            ParseInt => write!(f, "integer literal out of bounds"),

            UnbalancedDelimiter { delim } => write!(f, "unbalanced {delim}"),
            DuplicateDefinition { name } => write!(f, "`{}` is already defined", i.get(name)),
            UnknownTypeInSignature { name } => {
                write!(f, "unknown type `{}` in signature", i.get(name))
            }
            InfiniteType { name } => {
                write!(f, "type `{}` contains itself by value", i.get(name))
            }

            UnknownType { name } => write!(f, "unknown type `{}`", i.get(name)),
            Mismatch {
                what,
                expected,
                actual,
            } => {
                write!(f, "expected {expected}, but got {actual}")?;
                if let Some(what) = what {
                    write!(f, " for `{}`", i.get(what))?;
                }
                Ok(())
            }
            LiteralOutOfRange { what, value, ty } => {
                write!(f, "{value} does not fit in {ty}")?;
                if let Some(what) = what {
                    write!(f, " for `{}`", i.get(what))?;
                }
                Ok(())
            }
            DivisionByZero => write!(f, "division by zero"),
            NotAssignable { name } => {
                write!(f, "cannot assign to immutable `{}`", i.get(name))
            }
            NotMutableArgument { callee, param } => write!(
                f,
                "parameter `{}` of `{}` requires a mutable variable",
                i.get(param),
                i.get(callee)
            ),
            InvalidOperands { op, ty } => {
                write!(f, "operator `{op}` cannot be applied to {ty}")
            }
            NotIndexable { ty } => write!(f, "{ty} cannot be indexed"),
            NoSuchField { field, ty } => write!(f, "{ty} has no field `{field}`"),
            NoValue { callee } => write!(f, "`{}` does not return a value", i.get(callee)),
            InvalidCast { from, to } => write!(f, "cannot convert {from} to {to}"),
            NotDestructurable { ty } => write!(f, "{ty} cannot be destructured"),
            NotMatchable { ty } => write!(f, "cannot match on {ty}"),
            ForeignCase { case, ty } => write!(f, "`{case}` is not a case of {ty}"),
            MissingReturn { name } => write!(f, "missing return in `{}`", i.get(name)),

            Impure { callee } => write!(
                f,
                "cannot call procedure `{}` from a function",
                i.get(callee)
            ),
            EffectfulFunc { name } => {
                write!(f, "function `{}` performs side effects", i.get(name))
            }

            ShadowsMutable { name } => {
                write!(f, "`{}` shadows a mutable variable", i.get(name))
            }
            MutableShadows { name } => {
                write!(f, "mutable `{}` shadows an existing variable", i.get(name))
            }

            Undefined { name } => write!(f, "`{}` is not defined", i.get(name)),

            MissingCase { case } => write!(f, "match is missing case `{case}`"),

            ArgumentCount {
                callee,
                expected,
                actual,
            } => write!(
                f,
                "`{}` takes {expected} arguments, but got {actual}",
                i.get(callee)
            ),
            ReturnCount { expected, actual } => {
                write!(f, "expected {expected} return values, but got {actual}")
            }
            PatternArity {
                ctor,
                expected,
                actual,
            } => write!(
                f,
                "`{}` has {expected} fields, but the pattern binds {actual}",
                i.get(ctor)
            ),
            DestructureCount { expected, actual } => {
                write!(f, "value has {expected} fields, but {actual} names are bound")
            }
        }
    }
}

fn write_kinds(f: &mut std::fmt::Formatter<'_>, kinds: &[TokenKind]) -> std::fmt::Result {
    for (idx, kind) in kinds.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{kind}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        error::Error,
        token::{t, Punct, Span, TokenKind},
        util::{
            fmt::{Context, Show},
            intern::Interner,
        },
    };

    #[test]
    fn locates_by_line_when_source_is_known() {
        let mut i = Interner::with_capacity(4);
        let x = i.intern("x");
        let src = "proc main() {\n  x = 1\n}";
        let error = Span::new_of_length(16, 1).wrap(Error::Undefined { name: x });

        let plain = Context::new(&i);
        assert_eq!(
            format!("{:#}", error.display(&plain)),
            "16..17: ScopeError: `x` is not defined"
        );
        let located = Context::with_source(&i, src);
        assert_eq!(
            format!("{:#}", error.display(&located)),
            "2:3: ScopeError: `x` is not defined"
        );
        assert_eq!(
            format!("{}", error.display(&located)),
            "ScopeError: `x` is not defined"
        );
    }

    #[test]
    fn lists_expected_tokens() {
        let i = Interner::with_capacity(1);
        let error = Span::new_of_length(0, 1).wrap(Error::UnexpectedAny {
            actual: TokenKind::Number,
            expected: Box::new([t::p(Punct::Comma), t::p(Punct::RParen)]),
        });
        assert_eq!(
            format!("{}", error.display(&Context::new(&i))),
            "ParseError: expected one of `,`, `)`, but got number"
        );
    }
}
