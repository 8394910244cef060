use crate::{token::Span, util::intern::Interner};

pub mod error;
pub mod source;
pub mod tree;

pub struct Context<'ident> {
    pub ident_interner: &'ident Interner,
    /// When present, alternate formatting locates spans by line and column
    /// instead of byte offsets.
    pub src: Option<&'ident str>,
}

impl<'ident> Context<'ident> {
    pub fn new(ident_interner: &'ident Interner) -> Self {
        Context {
            ident_interner,
            src: None,
        }
    }

    pub fn with_source(ident_interner: &'ident Interner, src: &'ident str) -> Self {
        Context {
            ident_interner,
            src: Some(src),
        }
    }

    /// Writes the location of `span` the way diagnostics are prefixed.
    pub fn locate(&self, f: &mut std::fmt::Formatter<'_>, span: Span) -> std::fmt::Result {
        match self.src {
            Some(src) => {
                let (line, col) = span.line_col(src);
                write!(f, "{line}:{col}")
            }
            None => write!(f, "{span}"),
        }
    }
}

/// Analogous to [`std::fmt::Display`], but also contains the program context,
/// such as the current [`Interner`].
pub trait Show {
    fn show(&self, f: &mut std::fmt::Formatter<'_>, ctx: &Context<'_>) -> std::fmt::Result;

    /// Returns a type which can be displayed.
    fn display(&self, ctx: &Context<'_>) -> impl std::fmt::Display
    where
        Self: Sized,
    {
        Display(self, ctx)
    }
}

struct Display<'this, 'ctx, 'ident, T: Show>(pub &'this T, pub &'ctx Context<'ident>);

impl<T> std::fmt::Display for Display<'_, '_, '_, T>
where
    T: Show,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Display(this, ctx) = self;
        this.show(f, ctx)
    }
}
