use std::{
    collections::{HashMap, HashSet},
    ops::{Deref, DerefMut},
};

use tracing::{debug, trace};

use crate::{
    ast::{CallableKind, Decl, FuncDecl, Ident, Program, TypeDefn},
    context::{Context, Effects, SymbolTable},
    error::Error,
    lexer::extract,
    prototype::TypeParser,
    token::{t, Keyword, Punct, Spanned, Token, TokenKind},
    types::{TypeId, TypeTable},
    util::intern::{Interner, Symbol},
};

pub(crate) mod cursor;

mod check;
mod stmt;
mod value;

use cursor::{Cursor, Result};

pub type ParseResult<T> = std::result::Result<T, (T, Vec<Spanned<Error>>)>;

/// Builds the typed AST of a program, checking every body against the
/// symbols gathered by the prototype pass.
///
/// The first error aborts the declaration it occurs in; parsing resumes at
/// the next declaration, so every declaration reports at most one error.
pub fn parse_program(
    src: &str,
    tokens: &[Token],
    idents: &mut Interner,
    types: &mut TypeTable,
    symbols: &SymbolTable,
) -> ParseResult<Program> {
    let mut p = Parser {
        c: Cursor::new(src, tokens),
        idents,
        types,
        symbols,
        ctx: Context::new(),
        graph: HashMap::with_capacity(symbols.callables.len()),
    };

    let mut program = Program::default();
    while p.except([]) {
        let start = p.position();
        match p.parse_decl() {
            Ok(decl) => program.decls.push(decl),
            Err(()) => {
                let moved = p.position() != start;
                if !(moved && p.peek().kind.starts_decl()) {
                    p.recover();
                }
            }
        }
    }
    p.solve_effects(&mut program);
    debug!(decls = program.decls.len(), "parsed program");

    if p.c.errors.is_empty() {
        Ok(program)
    } else {
        Err((program, p.c.errors))
    }
}

pub(crate) struct Parser<'a> {
    c: Cursor<'a>,
    idents: &'a mut Interner,
    types: &'a mut TypeTable,
    symbols: &'a SymbolTable,
    ctx: Context,
    /// Effects performed directly by each function, and the user callables
    /// it calls.
    graph: HashMap<Symbol, (Effects, HashSet<Symbol>)>,
}

impl<'a> Deref for Parser<'a> {
    type Target = Cursor<'a>;

    fn deref(&self) -> &Self::Target {
        &self.c
    }
}

impl DerefMut for Parser<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.c
    }
}

impl Parser<'_> {
    fn parse_decl(&mut self) -> Result<Decl> {
        let token = self.peek();
        match token.kind {
            TokenKind::Keyword(Keyword::Func) => self.parse_func(CallableKind::Func),
            TokenKind::Keyword(Keyword::Proc) => self.parse_func(CallableKind::Proc),
            TokenKind::Keyword(kw @ (Keyword::Type | Keyword::Data)) => {
                self.advance();
                let name = self.parse_ident()?;
                // Already resolved by the prototype pass.
                while self.except([]) && !self.peek().kind.starts_decl() {
                    self.advance();
                }
                let Some(&ty) = self.symbols.types.get(&name.name) else {
                    return self.fail(name.span, Error::UnknownType { name: name.name });
                };
                let defn = TypeDefn { name, ty };
                Ok(if kw == Keyword::Data {
                    Decl::Enum(defn)
                } else {
                    Decl::TypeDefn(defn)
                })
            }
            actual => self.fail(
                token.span(),
                Error::UnexpectedAny {
                    actual,
                    expected: Box::new([t::kw(Keyword::Func), t::kw(Keyword::Proc)]),
                },
            ),
        }
    }

    fn parse_func(&mut self, kind: CallableKind) -> Result<Decl> {
        self.advance(); // func or proc
        let name = self.parse_ident()?;
        let symbols = self.symbols;
        let Some(sig) = symbols.callables.get(&name.name) else {
            return self.fail(name.span, Error::Undefined { name: name.name });
        };

        // The signature was resolved by the prototype pass.
        while self.except([t::p(Punct::LBrace)]) {
            self.advance();
        }

        self.ctx.enter_function(sig);
        self.graph.insert(name.name, (Effects::NONE, HashSet::new()));
        trace!(name = self.idents.get(name.name), "checking body");
        let body = self.parse_block();
        self.ctx.exit_function();
        let body = body?;
        if !sig.returns.is_empty() && !body.always_returns() {
            return self.fail(name.span, Error::MissingReturn { name: name.name });
        }

        Ok(Decl::Func(FuncDecl {
            kind,
            name,
            params: sig.params.clone(),
            returns: sig.returns.clone(),
            body,
            effects: Effects::NONE,
        }))
    }

    /// Propagates effects through the call graph until a fixpoint is reached.
    fn solve_effects(&mut self, program: &mut Program) {
        let mut effects: HashMap<Symbol, Effects> = self
            .graph
            .iter()
            .map(|(name, (direct, _))| (*name, *direct))
            .collect();
        loop {
            let mut changed = false;
            for (name, (_, callees)) in &self.graph {
                let before = effects[name];
                let after = callees
                    .iter()
                    .filter_map(|callee| effects.get(callee))
                    .fold(before, |acc, e| acc.union(*e));
                if after != before {
                    effects.insert(*name, after);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for decl in &mut program.decls {
            let Decl::Func(func) = decl else {
                continue;
            };
            func.effects = effects.get(&func.name.name).copied().unwrap_or_default();
            if func.kind == CallableKind::Func && !func.effects.is_empty() {
                let name = func.name;
                self.c.error(name.span.wrap(Error::EffectfulFunc { name: name.name }));
            }
        }
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        let token = self.consume(TokenKind::Identifier)?;
        Ok(Ident {
            name: self.idents.intern(extract::ident(token, self.c.src)),
            span: token.span(),
        })
    }

    fn parse_type(&mut self) -> Result<TypeId> {
        TypeParser {
            c: &mut self.c,
            idents: &mut *self.idents,
            types: &mut *self.types,
            named: &self.symbols.types,
            params: &[],
            in_signature: false,
        }
        .parse()
    }

    /// Renders a type for diagnostics.
    fn render(&self, ty: TypeId) -> Box<str> {
        self.types.display(ty, self.idents).into_boxed_str()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::{lexer, prototype};

    /// Runs the prototype pass and the parser, returning whatever was built
    /// along with every error.
    pub fn parse(
        src: &str,
    ) -> (
        Interner,
        TypeTable,
        Option<Program>,
        Vec<Spanned<Error>>,
    ) {
        let mut idents = Interner::with_capacity(64);
        let mut types = TypeTable::new();
        let tokens = lexer::lex_in_new(src);
        let symbols = match prototype::prototype(src, &tokens, &mut idents, &mut types) {
            Ok(symbols) => symbols,
            Err(errors) => return (idents, types, None, errors),
        };
        let (program, errors) =
            match parse_program(src, &tokens, &mut idents, &mut types, &symbols) {
                Ok(program) => (program, Vec::new()),
                Err((program, errors)) => (program, errors),
            };
        (idents, types, Some(program), errors)
    }
}

#[cfg(test)]
mod tests {
    use crate::util::test_utils::tree_tests;

    tree_tests! {
        use program;

        fn untyped_literals_default_to_int() {
            let src = "
                proc main() {
                    let x = 1 + 2
                }
            ";
            let tree_ok = "
                proc main()
                  block (12..33)
                    let x: int (18..31)
                      binary Add (26..31 %: int)
                        int 1 (26..27 %: int)
                        int 2 (30..31 %: int)
            ";
        }

        fn effects_propagate_through_calls() {
            let src = "
                proc log(n int) {
                    PrintInt(n)
                }

                proc main() {
                    log(1)
                }
            ";
            let tree_ok = "
                proc log(n: int) [IO]
                  block (16..35)
                    call PrintInt (22..33)
                      var n (31..32 %: int)
                proc main() [IO]
                  block (49..63)
                    call log (55..61)
                      int 1 (59..60 %: int)
            ";
        }

        fn functions_cannot_call_procedures() {
            let src = "
                func pure() {
                    PrintInt(1)
                }
            ";
            let expected_errors = &[
                "2:5: PurityError: cannot call procedure `PrintInt` from a function",
            ];
        }

        fn one_error_per_declaration() {
            let src = "
                proc a() {
                    let x = 1
                    x = 2
                }

                proc b() {
                    mutable y = 1
                    let y = 2
                }

                proc c() {
                    let z uint8 = 300
                }

                proc d() {
                    let q = undefined
                }

                data Opt = Some int | None

                proc e(o Opt) {
                    match o {
                        case None:
                            return
                    }
                }
            ";
            let expected_errors = &[
                "3:5: TypeError: cannot assign to immutable `x`",
                "8:9: ShadowError: `y` shadows a mutable variable",
                "12:19: TypeError: 300 does not fit in uint8 for `z`",
                "16:13: ScopeError: `undefined` is not defined",
                "22:5: ExhaustivenessError: match is missing case `Some`",
            ];
        }

        fn by_reference_arguments_must_be_mutable() {
            let src = "
                proc bump(mutable n int) {
                    n = n + 1
                }

                proc main() {
                    let a = 1
                    bump(a)
                }
            ";
            let expected_errors = &[
                "7:10: TypeError: parameter `n` of `bump` requires a mutable variable",
            ];
        }

        fn bitwise_operators_are_rejected() {
            let src = "
                proc main() {
                    let x = 1 & 2
                }
            ";
            let expected_errors = &[
                "2:15: ParseError: unexpected `&` in value",
            ];
        }

        fn mutable_cannot_shadow() {
            let src = "
                proc main(n int) {
                    mutable n = 1
                }
            ";
            let expected_errors = &[
                "2:13: ShadowError: mutable `n` shadows an existing variable",
            ];
        }

        fn call_results_must_be_used_correctly() {
            let src = "
                func pair() (int, int) {
                    return 1, 2
                }

                proc main() {
                    let a, b, c = pair()
                }

                proc other() {
                    let x = PrintInt(1)
                }
            ";
            let expected_errors = &[
                "6:19: ArityError: value has 2 fields, but 3 names are bound",
                "10:13: TypeError: `PrintInt` does not return a value",
            ];
        }
    }

    tree_tests! {
        use source;

        fn printed_source_round_trips() {
            let src = r#"
                type Age = int

                type Shape = int | string

                data Maybe a = Just a | Nothing

                func twice(n int) (int) {
                    return n * 2
                }

                proc main() {
                    mutable total = 0
                    let xs = {1, 2, 3}
                    while total < 10 {
                        total = total + twice(xs[0])
                    }
                    if total == 10 {
                        PrintString("ten\n")
                    } else if total > 10 {
                        PrintString("more")
                    } else {
                        PrintInt(total)
                    }
                    let m = Just(5)
                    match m {
                        case Just(v):
                            PrintInt(v)
                        case Nothing:
                            PrintString("none")
                    }
                    let s Shape = 3
                    match s {
                        case int n:
                            PrintInt(n)
                        case string:
                            PrintString("str")
                    }
                }
            "#;
            let tree_ok = r#"
                type Age = int

                type Shape = int | string

                data Maybe a = Just a | Nothing

                func twice(n int) (int) {
                    return n * 2
                }

                proc main() {
                    mutable total = 0
                    let xs = {1, 2, 3}
                    while total < 10 {
                        total = total + twice(xs[0])
                    }
                    if total == 10 {
                        PrintString("ten\n")
                    } else if total > 10 {
                        PrintString("more")
                    } else {
                        PrintInt(total)
                    }
                    let m = Just(5)
                    match m {
                        case Just(v):
                            PrintInt(v)
                        case Nothing:
                            PrintString("none")
                    }
                    let s Shape = 3
                    match s {
                        case int n:
                            PrintInt(n)
                        case string:
                            PrintString("str")
                    }
                }
            "#;
        }

        fn destructuring_named_results() {
            let src = "
                func divmod(a int, b int) (q int, r int) {
                    return a / b, a % b
                }

                proc main() {
                    let q, r = divmod(7, 2)
                    PrintInt(q + r)
                }
            ";
            let tree_ok = "
                func divmod(a int, b int) (q int, r int) {
                    return a / b, a % b
                }

                proc main() {
                    let q, r = divmod(7, 2)
                    PrintInt(q + r)
                }
            ";
        }
    }
}
