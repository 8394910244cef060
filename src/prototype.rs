//! The prototype pass reads the token stream twice without building a tree.
//!
//! The first scan declares every type and constructor name, the second one
//! resolves type definitions and callable signatures. The result is the
//! [`SymbolTable`] the parser checks bodies against, which lets any function
//! call any other regardless of declaration order.

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
};

use tracing::{debug, trace};

use crate::{
    ast::{CallableKind, Ret, Var},
    context::{Effects, EnumOption, Signature, SymbolTable, BUILTINS},
    error::Error,
    lexer::extract,
    parser::cursor::{Cursor, Result},
    token::{t, Keyword, Operator, Punct, Span, Spanned, Token, TokenKind},
    types::{Ctor, EnumDefn, Field, SumDefn, TypeId, TypeKind, TypeTable},
    util::intern::{Interner, Symbol},
};

/// Runs both subpasses over `tokens`. All declaration errors are collected;
/// any of them makes the whole pass fail.
pub fn prototype(
    src: &str,
    tokens: &[Token],
    idents: &mut Interner,
    types: &mut TypeTable,
) -> Result<SymbolTable, Vec<Spanned<Error>>> {
    let mut p = Prototyper {
        c: Cursor::new(src, tokens),
        idents,
        types,
        symbols: SymbolTable::default(),
        declared: Vec::with_capacity(8),
    };

    for token in tokens.iter().filter(|t| t.kind.is_error()) {
        p.c.error(token.span().wrap(Error::Lexical(token.kind)));
    }
    if p.c.errors.is_empty() {
        p.check_balance(tokens);
    }
    if !p.c.errors.is_empty() {
        return Err(p.c.errors);
    }

    p.register_builtins();
    p.declare_names();
    if !p.c.errors.is_empty() {
        return Err(p.c.errors);
    }
    p.c = Cursor::new(src, tokens);
    p.resolve_definitions();
    p.check_finite();

    debug!(
        types = p.symbols.types.len(),
        callables = p.symbols.callables.len(),
        ctors = p.symbols.enum_options.len(),
        "prototype pass done"
    );
    if p.c.errors.is_empty() {
        Ok(p.symbols)
    } else {
        Err(p.c.errors)
    }
}

struct Prototyper<'a> {
    c: Cursor<'a>,
    idents: &'a mut Interner,
    types: &'a mut TypeTable,
    symbols: SymbolTable,
    /// Nominal types in declaration order.
    declared: Vec<(Symbol, TypeId, Span)>,
}

impl<'a> Deref for Prototyper<'a> {
    type Target = Cursor<'a>;

    fn deref(&self) -> &Self::Target {
        &self.c
    }
}

impl DerefMut for Prototyper<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.c
    }
}

impl Prototyper<'_> {
    fn check_balance(&mut self, tokens: &[Token]) {
        let mut open: Vec<Token> = Vec::with_capacity(16);
        for &token in tokens {
            let TokenKind::Punct(punct) = token.kind else {
                continue;
            };
            let opener = match punct {
                Punct::LParen | Punct::LBracket | Punct::LBrace => {
                    open.push(token);
                    continue;
                }
                Punct::RParen => Punct::LParen,
                Punct::RBracket => Punct::LBracket,
                Punct::RBrace => Punct::LBrace,
                _ => continue,
            };
            match open.pop() {
                Some(o) if o.kind == t::p(opener) => {}
                _ => {
                    self.c.error(
                        token
                            .span()
                            .wrap(Error::UnbalancedDelimiter { delim: token.kind }),
                    );
                    return;
                }
            }
        }
        if let Some(unclosed) = open.pop() {
            self.c.error(
                unclosed
                    .span()
                    .wrap(Error::UnbalancedDelimiter {
                        delim: unclosed.kind,
                    }),
            );
        }
    }

    fn register_builtins(&mut self) {
        for entry in BUILTINS {
            let sig = Signature::from_builtin(entry, self.idents);
            self.symbols.callables.insert(sig.name, sig);
        }
    }

    fn ident(&mut self) -> Result<(Symbol, Token)> {
        let token = self.consume(TokenKind::Identifier)?;
        let name = self.idents.intern(extract::ident(token, self.c.src));
        Ok((name, token))
    }

    fn is_taken(&self, name: Symbol) -> bool {
        self.symbols.types.contains_key(&name)
            || self.symbols.callables.contains_key(&name)
            || self.symbols.enum_options.contains_key(&name)
    }

    fn check_unique(&mut self, name: Symbol, token: Token) -> Result<()> {
        if self.is_taken(name) {
            return self.fail(token.span(), Error::DuplicateDefinition { name });
        }
        Ok(())
    }

    /// First subpass: type names and constructor names.
    fn declare_names(&mut self) {
        while self.except([]) {
            let kind = self.peek().kind;
            let res = match kind {
                TokenKind::Keyword(Keyword::Type) => self.declare_type(),
                TokenKind::Keyword(Keyword::Data) => self.declare_data(),
                _ => {
                    self.advance();
                    Ok(())
                }
            };
            if res.is_err() {
                self.recover();
            }
        }
    }

    fn declare_type(&mut self) -> Result<()> {
        self.consume(t::kw(Keyword::Type))?;
        let (name, token) = self.ident()?;
        self.check_unique(name, token)?;
        let id = self.types.declare(name);
        self.symbols.types.insert(name, id);
        self.declared.push((name, id, token.span()));
        trace!(name = self.idents.get(name), "declared type");
        Ok(())
    }

    fn declare_data(&mut self) -> Result<()> {
        self.consume(t::kw(Keyword::Data))?;
        let (name, token) = self.ident()?;
        self.check_unique(name, token)?;
        let parent = self.types.declare(name);
        self.symbols.types.insert(name, parent);
        self.declared.push((name, parent, token.span()));

        while self.except([t::op(Operator::Assign)]) && !self.peek().kind.starts_decl() {
            self.advance();
        }
        self.consume(t::op(Operator::Assign))?;
        let mut index = 0;
        loop {
            let (ctor, token) = self.ident()?;
            self.check_unique(ctor, token)?;
            self.symbols
                .enum_options
                .insert(ctor, EnumOption { parent, index });
            index += 1;
            while self.except([t::op(Operator::Pipe)]) && !self.peek().kind.starts_decl() {
                self.advance();
            }
            if !self.take(t::op(Operator::Pipe)) {
                break;
            }
        }
        trace!(name = self.idents.get(name), ctors = index, "declared data");
        Ok(())
    }

    /// Second subpass: definitions and signatures.
    fn resolve_definitions(&mut self) {
        while self.except([]) {
            let token = self.peek();
            let res = match token.kind {
                TokenKind::Keyword(Keyword::Type) => self.define_type(),
                TokenKind::Keyword(Keyword::Data) => self.define_data(),
                TokenKind::Keyword(Keyword::Func) => self.signature(CallableKind::Func),
                TokenKind::Keyword(Keyword::Proc) => self.signature(CallableKind::Proc),
                actual => self.fail(
                    token.span(),
                    Error::UnexpectedAny {
                        actual,
                        expected: Box::new([
                            t::kw(Keyword::Func),
                            t::kw(Keyword::Proc),
                            t::kw(Keyword::Type),
                            t::kw(Keyword::Data),
                        ]),
                    },
                ),
            };
            if res.is_err() {
                self.recover();
            }
        }
    }

    fn parse_type(&mut self, params: &[Symbol]) -> Result<TypeId> {
        TypeParser {
            c: &mut self.c,
            idents: &mut *self.idents,
            types: &mut *self.types,
            named: &self.symbols.types,
            params,
            in_signature: true,
        }
        .parse()
    }

    fn define_type(&mut self) -> Result<()> {
        self.consume(t::kw(Keyword::Type))?;
        let (name, _) = self.ident()?;
        self.consume(t::op(Operator::Assign))?;
        let mut alts = vec![self.parse_type(&[])?];
        while self.take(t::op(Operator::Pipe)) {
            alts.push(self.parse_type(&[])?);
        }
        let id = self.symbols.types[&name];
        let kind = if alts.len() == 1 {
            TypeKind::User {
                name,
                underlying: alts[0],
            }
        } else {
            TypeKind::Sum(SumDefn {
                name,
                alts: alts.into_boxed_slice(),
            })
        };
        self.types.define(id, kind);
        Ok(())
    }

    fn define_data(&mut self) -> Result<()> {
        self.consume(t::kw(Keyword::Data))?;
        let (name, _) = self.ident()?;
        let mut params = Vec::new();
        while self.is(TokenKind::Identifier) {
            params.push(self.ident()?.0);
        }
        self.consume(t::op(Operator::Assign))?;

        let mut ctors = Vec::new();
        loop {
            let (ctor, _) = self.ident()?;
            let mut fields = Vec::new();
            while self.except([t::op(Operator::Pipe)]) && !self.peek().kind.starts_decl() {
                fields.push(self.parse_type(&params)?);
            }
            ctors.push(Ctor {
                name: ctor,
                fields: fields.into_boxed_slice(),
            });
            if !self.take(t::op(Operator::Pipe)) {
                break;
            }
        }

        let id = self.symbols.types[&name];
        self.types.define(
            id,
            TypeKind::Enum(EnumDefn {
                name,
                params: params.into_boxed_slice(),
                ctors: ctors.into_boxed_slice(),
            }),
        );
        Ok(())
    }

    fn signature(&mut self, kind: CallableKind) -> Result<()> {
        self.advance(); // func or proc
        let (name, name_token) = self.ident()?;
        self.check_unique(name, name_token)?;

        self.consume(t::p(Punct::LParen))?;
        let params = Cursor::parse_list(
            self,
            t::p(Punct::RParen),
            t::p(Punct::Comma),
            Prototyper::param,
        )?;
        self.consume(t::p(Punct::RParen))?;
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return self.fail(
                    name_token.span(),
                    Error::DuplicateDefinition { name: param.name },
                );
            }
        }

        let returns = if self.take(t::p(Punct::LParen)) {
            let returns = Cursor::parse_list(
                self,
                t::p(Punct::RParen),
                t::p(Punct::Comma),
                Prototyper::ret,
            )?;
            self.consume(t::p(Punct::RParen))?;
            returns
        } else if self.is(t::p(Punct::LBrace)) {
            Vec::new()
        } else {
            vec![Ret {
                name: None,
                ty: self.parse_type(&[])?,
            }]
        };

        self.skip_body()?;
        trace!(
            name = self.idents.get(name),
            params = params.len(),
            returns = returns.len(),
            "signature"
        );
        self.symbols.callables.insert(
            name,
            Signature {
                kind,
                name,
                params,
                returns,
                builtin: None,
                effects: Effects::NONE,
                span: Some(name_token.span()),
            },
        );
        Ok(())
    }

    fn param(&mut self) -> Result<Var> {
        let by_ref = self.take(t::kw(Keyword::Mutable));
        let (name, _) = self.ident()?;
        let ty = self.parse_type(&[])?;
        Ok(Var { name, ty, by_ref })
    }

    fn ret(&mut self) -> Result<Ret> {
        let named = self.is(TokenKind::Identifier) && starts_type(self.peek_nth(1).kind);
        let name = if named { Some(self.ident()?.0) } else { None };
        let ty = self.parse_type(&[])?;
        Ok(Ret { name, ty })
    }

    fn skip_body(&mut self) -> Result<()> {
        self.consume(t::p(Punct::LBrace))?;
        let mut depth = 1_usize;
        while depth > 0 {
            match self.advance().kind {
                TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RBrace) => depth -= 1,
                TokenKind::Eof => {
                    let span = self.last_span();
                    return self.fail(
                        span,
                        Error::UnbalancedDelimiter {
                            delim: t::p(Punct::LBrace),
                        },
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_finite(&mut self) {
        for &(name, id, span) in &self.declared {
            if matches!(self.types.get(id), TypeKind::Pending(_)) {
                // Failed to define; already reported.
                continue;
            }
            if self.types.is_infinite(id) {
                self.c.errors.push(span.wrap(Error::InfiniteType { name }));
            }
        }
    }
}

/// Whether a token may start a type expression.
pub(crate) fn starts_type(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::TypeName(_)
            | TokenKind::Identifier
            | TokenKind::Punct(Punct::LBracket | Punct::LParen)
    )
}

/// Parses type expressions against a set of known type names.
pub(crate) struct TypeParser<'p, 'a> {
    pub c: &'p mut Cursor<'a>,
    pub idents: &'p mut Interner,
    pub types: &'p mut TypeTable,
    pub named: &'p HashMap<Symbol, TypeId>,
    /// Type parameters in scope.
    pub params: &'p [Symbol],
    pub in_signature: bool,
}

impl TypeParser<'_, '_> {
    pub fn parse(&mut self) -> Result<TypeId> {
        let token = self.c.advance();
        match token.kind {
            TokenKind::TypeName(builtin) => Ok(TypeId::of_builtin(builtin)),
            TokenKind::Identifier => {
                let name = self.idents.intern(extract::ident(token, self.c.src));
                if self.params.contains(&name) {
                    Ok(self.types.intern(TypeKind::Param(name)))
                } else if let Some(id) = self.named.get(&name) {
                    Ok(*id)
                } else if self.in_signature {
                    self.c
                        .fail(token.span(), Error::UnknownTypeInSignature { name })
                } else {
                    self.c.fail(token.span(), Error::UnknownType { name })
                }
            }
            TokenKind::Punct(Punct::LBracket) => {
                let len = if self.c.is(TokenKind::Number) {
                    let number = self.c.advance();
                    match extract::int(number, self.c.src).map(u64::try_from) {
                        Ok(Ok(len)) => Some(len),
                        _ => return self.c.fail(number.span(), Error::ParseInt),
                    }
                } else {
                    None
                };
                self.c.consume(t::p(Punct::RBracket))?;
                let elem = self.parse()?;
                Ok(match len {
                    Some(len) => self.types.intern(TypeKind::Array { elem, len }),
                    None => self.types.intern(TypeKind::Slice { elem }),
                })
            }
            TokenKind::Punct(Punct::LParen) => {
                let mut fields = Vec::new();
                loop {
                    let name = self.c.consume(TokenKind::Identifier)?;
                    let name = self.idents.intern(extract::ident(name, self.c.src));
                    let ty = self.parse()?;
                    fields.push(Field {
                        name: Some(name),
                        ty,
                    });
                    if !self.c.take(t::p(Punct::Comma)) {
                        break;
                    }
                }
                self.c.consume(t::p(Punct::RParen))?;
                Ok(self.types.intern(TypeKind::Tuple(fields.into_boxed_slice())))
            }
            actual => self.c.fail(
                token.span(),
                Error::UnexpectedAny {
                    actual,
                    expected: Box::new([
                        TokenKind::Identifier,
                        t::p(Punct::LBracket),
                        t::p(Punct::LParen),
                    ]),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Category, lexer};

    fn run(src: &str) -> (Interner, TypeTable, Result<SymbolTable, Vec<Spanned<Error>>>) {
        let mut idents = Interner::with_capacity(32);
        let mut types = TypeTable::new();
        let tokens = lexer::lex_in_new(src);
        let res = prototype(src, &tokens, &mut idents, &mut types);
        (idents, types, res)
    }

    fn categories(res: &Result<SymbolTable, Vec<Spanned<Error>>>) -> Vec<Category> {
        match res {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.inner.category()).collect(),
        }
    }

    #[test]
    fn forward_references_resolve() {
        let src = "
            proc main() { helper(Circle) }
            proc helper(s Shape) {}
            func area(s Shape) (a int, b int) { return 1, 2 }
            data Shape = Circle | Square int
            type Age = int
            type Either = int | string
        ";
        let (mut i, types, res) = run(src);
        let Ok(symbols) = res else {
            panic!("prototype failed: {res:?}", res = categories(&res));
        };
        let helper = &symbols.callables[&i.intern("helper")];
        let shape = symbols.types[&i.intern("Shape")];
        assert_eq!(helper.params[0].ty, shape);
        assert_eq!(helper.kind, CallableKind::Proc);

        let area = &symbols.callables[&i.intern("area")];
        assert_eq!(area.returns.len(), 2);
        assert_eq!(area.returns[0].name, Some(i.intern("a")));

        let square = symbols.enum_options[&i.intern("Square")];
        assert_eq!(square, EnumOption {
            parent: shape,
            index: 1
        });

        let age = symbols.types[&i.intern("Age")];
        assert_eq!(types.resolve(age), TypeId::INT);
        let either = symbols.types[&i.intern("Either")];
        assert!(matches!(types.get(either), TypeKind::Sum(s) if s.alts.len() == 2));
        assert!(symbols.callables.contains_key(&i.intern("PrintString")));
    }

    #[test]
    fn type_parameters() {
        let src = "data Maybe a = Nothing | Just a";
        let (mut i, types, res) = run(src);
        let symbols = res.ok().unwrap();
        let maybe = symbols.types[&i.intern("Maybe")];
        let TypeKind::Enum(defn) = types.get(maybe) else {
            panic!("not an enum");
        };
        assert!(types.is_param(defn.ctors[1].fields[0]));
        assert_eq!(types.words(maybe), 2);
    }

    #[test]
    fn signature_errors() {
        let (_, _, res) = run("proc main(x Missing) {}");
        assert_eq!(categories(&res), [Category::Signature]);

        let (_, _, res) = run("proc main( {}");
        assert_eq!(categories(&res), [Category::Signature]);

        let (_, _, res) = run("proc a() {} func a() {}");
        assert_eq!(categories(&res), [Category::Signature]);

        let (_, _, res) = run("proc PrintInt() {}");
        assert_eq!(categories(&res), [Category::Signature]);

        let (_, _, res) = run("data Bad = Again Bad");
        assert_eq!(categories(&res), [Category::Signature]);
    }

    #[test]
    fn errors_are_collected_per_declaration() {
        let src = "
            proc a(x Nope) {}
            proc b() {}
            proc c(y AlsoNope) {}
        ";
        let (_, _, res) = run(src);
        assert_eq!(categories(&res), [Category::Signature, Category::Signature]);
    }
}
