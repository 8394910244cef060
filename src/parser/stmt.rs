use super::{cursor::Cursor, Parser, Result};
use crate::{
    ast::{Block, Case, Ident, Pattern, Stmt, StmtKind, Target, ValueKind, Var},
    context::BindingKind,
    error::Error,
    lexer::extract,
    token::{t, Keyword, Operator, Punct, Span, TokenKind},
    types::{EnumDefn, Scalar, SumDefn, TypeId, TypeKind},
};

/// What a `match` dispatches on.
enum Scrutinee {
    Enum(EnumDefn),
    Sum(SumDefn),
    Plain,
}

impl Parser<'_> {
    pub(super) fn parse_block(&mut self) -> Result<Block> {
        let open = self.consume(t::p(Punct::LBrace))?;
        self.ctx.push();
        let stmts = self.parse_stmts(&[t::p(Punct::RBrace)]);
        self.ctx.pop();
        let stmts = stmts?;
        let close = self.consume(t::p(Punct::RBrace))?;
        Ok(Block {
            stmts,
            span: open.span().to(close.span()),
        })
    }

    fn parse_stmts(&mut self, end: &[TokenKind]) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while self.except(end.iter().copied()) {
            if self.take(t::p(Punct::Semicolon)) {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let token = self.peek();
        let start = token.span();
        let kind = match token.kind {
            TokenKind::Keyword(Keyword::Let) => self.parse_let()?,
            TokenKind::Keyword(Keyword::Mutable) => self.parse_mutable()?,
            TokenKind::Keyword(Keyword::Return) => self.parse_return()?,
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                let cond = self.parse_value()?;
                let cond = self.expect(cond, TypeId::BOOL, None)?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::Match) => self.parse_match()?,
            TokenKind::Keyword(Keyword::Assert) => self.parse_assert()?,
            TokenKind::Identifier => match self.peek_nth(1).kind {
                TokenKind::Punct(Punct::LParen) => self.parse_call_stmt()?,
                TokenKind::Punct(Punct::LBracket) => self.parse_index_assign()?,
                TokenKind::Operator(Operator::Assign) => self.parse_assign()?,
                actual => {
                    let span = self.peek_nth(1).span();
                    return self.fail(
                        span,
                        Error::UnexpectedAny {
                            actual,
                            expected: Box::new([
                                t::p(Punct::LParen),
                                t::p(Punct::LBracket),
                                t::op(Operator::Assign),
                            ]),
                        },
                    );
                }
            },
            actual => return self.fail(start, Error::UnexpectedStatement { actual }),
        };
        Ok(Stmt {
            kind,
            span: start.to(self.last_span()),
        })
    }

    fn parse_let(&mut self) -> Result<StmtKind> {
        self.advance(); // let
        let mut names = vec![self.parse_ident()?];
        while self.take(t::p(Punct::Comma)) {
            names.push(self.parse_ident()?);
        }
        let declared = if names.len() == 1 && !self.is(t::op(Operator::Assign)) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.consume(t::op(Operator::Assign))?;
        let value = self.parse_value()?;

        let (vars, value) = if let [name] = names[..] {
            let value = match declared {
                Some(ty) => self.expect(value, ty, Some(name.name))?,
                None => self.settle(value)?,
            };
            let var = Var {
                name: name.name,
                ty: declared.unwrap_or(value.ty),
                by_ref: false,
            };
            (vec![var], value)
        } else {
            let value = self.settle(value)?;
            let TypeKind::Tuple(fields) = self.types.kind(value.ty).clone() else {
                let ty = self.render(value.ty);
                return self.fail(value.span, Error::NotDestructurable { ty });
            };
            if fields.len() != names.len() {
                return self.fail(
                    value.span,
                    Error::DestructureCount {
                        expected: fields.len(),
                        actual: names.len(),
                    },
                );
            }
            let vars = names
                .iter()
                .zip(fields.iter())
                .map(|(name, field)| Var {
                    name: name.name,
                    ty: field.ty,
                    by_ref: false,
                })
                .collect();
            (vars, value)
        };

        for (name, var) in names.iter().zip(&vars) {
            self.declare_let(*name, *var)?;
        }
        Ok(StmtKind::Let {
            names: vars,
            declared,
            value,
        })
    }

    fn parse_mutable(&mut self) -> Result<StmtKind> {
        self.advance(); // mutable
        let name = self.parse_ident()?;
        let declared = if self.is(t::op(Operator::Assign)) {
            None
        } else {
            Some(self.parse_type()?)
        };
        self.consume(t::op(Operator::Assign))?;
        let value = self.parse_value()?;
        let value = match declared {
            Some(ty) => self.expect(value, ty, Some(name.name))?,
            None => self.settle(value)?,
        };
        let var = Var {
            name: name.name,
            ty: declared.unwrap_or(value.ty),
            by_ref: false,
        };
        if self.ctx.lookup(name.name).is_some() || self.ctx.is_mutable_name(name.name) {
            return self.fail(name.span, Error::MutableShadows { name: name.name });
        }
        self.ctx.bind(var, BindingKind::Mutable);
        Ok(StmtKind::Mutable {
            var,
            declared,
            value,
        })
    }

    /// Binds an immutable name, which may shadow anything but a mutable.
    pub(super) fn declare_let(&mut self, name: Ident, var: Var) -> Result<()> {
        if self.ctx.is_mutable_name(name.name) {
            return self.fail(name.span, Error::ShadowsMutable { name: name.name });
        }
        self.ctx.bind(var, BindingKind::Let);
        Ok(())
    }

    fn parse_assign(&mut self) -> Result<StmtKind> {
        let name = self.parse_ident()?;
        self.consume(t::op(Operator::Assign))?;
        let Some(binding) = self.ctx.lookup(name.name) else {
            return self.fail(name.span, Error::Undefined { name: name.name });
        };
        if !binding.is_assignable() {
            return self.fail(name.span, Error::NotAssignable { name: name.name });
        }
        let value = self.parse_value()?;
        let value = self.expect(value, binding.var.ty, Some(name.name))?;
        Ok(StmtKind::Assign {
            target: Target::Var(binding.var),
            value,
        })
    }

    fn parse_index_assign(&mut self) -> Result<StmtKind> {
        let name = self.parse_ident()?;
        let Some(binding) = self.ctx.lookup(name.name) else {
            return self.fail(name.span, Error::Undefined { name: name.name });
        };
        let Some(elem) = self.types.elem(binding.var.ty) else {
            let ty = self.render(binding.var.ty);
            return self.fail(name.span, Error::NotIndexable { ty });
        };
        // Slices alias their storage, so any slice element may be written.
        if !binding.is_assignable() && !self.types.is_slice(binding.var.ty) {
            return self.fail(name.span, Error::NotAssignable { name: name.name });
        }
        self.consume(t::p(Punct::LBracket))?;
        let index = self.parse_value()?;
        let index = self.expect_index(index)?;
        self.consume(t::p(Punct::RBracket))?;
        self.consume(t::op(Operator::Assign))?;
        let value = self.parse_value()?;
        let value = self.expect(value, elem, Some(name.name))?;
        Ok(StmtKind::Assign {
            target: Target::Index {
                base: binding.var,
                index: Box::new(index),
            },
            value,
        })
    }

    fn parse_call_stmt(&mut self) -> Result<StmtKind> {
        let name = self.parse_ident()?;
        let value = self.parse_invocation(name, false)?;
        match value.kind {
            ValueKind::Call(call) => Ok(StmtKind::Call(call)),
            _ => self.fail(
                value.span,
                Error::UnexpectedStatement {
                    actual: TokenKind::Identifier,
                },
            ),
        }
    }

    fn parse_return(&mut self) -> Result<StmtKind> {
        let token = self.advance(); // return
        let symbols = self.symbols;
        let returns = self
            .ctx
            .current
            .and_then(|name| symbols.callables.get(&name))
            .map(|sig| sig.returns.as_slice())
            .unwrap_or_default();
        if returns.is_empty() {
            // A bare `return` ends its line.
            let next = self.peek();
            let gap = &self.c.src[token.span().hi()..next.span().lo];
            if gap.contains('\n') || next.is_eof() || next.kind == t::p(Punct::RBrace) {
                return Ok(StmtKind::Return(Vec::new()));
            }
        }

        let mut values = vec![self.parse_value()?];
        while self.take(t::p(Punct::Comma)) {
            values.push(self.parse_value()?);
        }

        // A single call may supply every result at once.
        if let [value] = &values[..] {
            if let ValueKind::Call(call) = &value.kind {
                if returns.len() > 1 {
                    let expected: Vec<TypeId> = returns.iter().map(|r| r.ty).collect();
                    if call.returns == expected {
                        return Ok(StmtKind::Return(values));
                    }
                }
            }
        }
        if values.len() != returns.len() {
            let span = token.span().to(self.last_span());
            return self.fail(
                span,
                Error::ReturnCount {
                    expected: returns.len(),
                    actual: values.len(),
                },
            );
        }
        let values = values
            .into_iter()
            .zip(returns)
            .map(|(value, ret)| self.expect(value, ret.ty, ret.name))
            .collect::<Result<_>>()?;
        Ok(StmtKind::Return(values))
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.advance(); // if
        let cond = self.parse_value()?;
        let cond = self.expect(cond, TypeId::BOOL, None)?;
        let then_block = self.parse_block()?;
        let else_block = if self.take(t::kw(Keyword::Else)) {
            if self.is(t::kw(Keyword::If)) {
                let stmt = self.parse_stmt()?;
                let span = stmt.span;
                Some(Block {
                    stmts: vec![stmt],
                    span,
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_assert(&mut self) -> Result<StmtKind> {
        self.advance(); // assert
        self.consume(t::p(Punct::LParen))?;
        let cond = self.parse_value()?;
        let cond = self.expect(cond, TypeId::BOOL, None)?;
        let message = if self.take(t::p(Punct::Comma)) {
            let token = self.consume(TokenKind::String)?;
            Some(extract::string(token, self.c.src))
        } else {
            None
        };
        self.consume(t::p(Punct::RParen))?;
        Ok(StmtKind::Assert { cond, message })
    }

    fn parse_match(&mut self) -> Result<StmtKind> {
        let token = self.advance(); // match
        let scrutinee = self.parse_value()?;
        let scrutinee = self.settle(scrutinee)?;
        let shape = match self.types.kind(scrutinee.ty) {
            TypeKind::Enum(defn) => Scrutinee::Enum(defn.clone()),
            TypeKind::Sum(sum) => Scrutinee::Sum(sum.clone()),
            TypeKind::Scalar(scalar) if *scalar != Scalar::String => Scrutinee::Plain,
            _ => {
                let ty = self.render(scrutinee.ty);
                return self.fail(scrutinee.span, Error::NotMatchable { ty });
            }
        };
        self.consume(t::p(Punct::LBrace))?;

        let mut cases = Vec::new();
        let mut seen = Vec::new();
        while self.take(t::kw(Keyword::Case)) {
            let start = self.last_span();
            self.ctx.push();
            let case = self.parse_case(&shape, scrutinee.ty, start);
            self.ctx.pop();
            let case = case?;
            match &case.pattern {
                Pattern::Ctor { index, .. } | Pattern::Alt { index, .. } => seen.push(*index),
                Pattern::Value(_) => {}
            }
            cases.push(case);
        }
        let close = self.consume(t::p(Punct::RBrace))?;

        let missing = match &shape {
            Scrutinee::Enum(defn) => (0..defn.ctors.len())
                .find(|i| !seen.contains(&(*i as u32)))
                .map(|i| Box::from(self.idents.get(defn.ctors[i].name))),
            Scrutinee::Sum(sum) => (0..sum.alts.len())
                .find(|i| !seen.contains(&(*i as u32)))
                .map(|i| self.render(sum.alts[i])),
            Scrutinee::Plain => None,
        };
        if let Some(case) = missing {
            return self.fail(token.span().to(close.span()), Error::MissingCase { case });
        }
        Ok(StmtKind::Match { scrutinee, cases })
    }

    fn parse_case(&mut self, shape: &Scrutinee, scr_ty: TypeId, start: Span) -> Result<Case> {
        let pattern = match shape {
            Scrutinee::Enum(defn) => {
                let ctor = self.parse_ident()?;
                let Some(option) = self.symbols.enum_options.get(&ctor.name).copied() else {
                    return self.fail(ctor.span, Error::Undefined { name: ctor.name });
                };
                if option.parent != self.types.resolve(scr_ty) {
                    let case = Box::from(self.idents.get(ctor.name));
                    let ty = self.render(scr_ty);
                    return self.fail(ctor.span, Error::ForeignCase { case, ty });
                }
                let fields = &defn.ctors[option.index as usize].fields;
                let names = if self.take(t::p(Punct::LParen)) {
                    let names = Cursor::parse_list(
                        self,
                        t::p(Punct::RParen),
                        t::p(Punct::Comma),
                        Parser::parse_ident,
                    )?;
                    self.consume(t::p(Punct::RParen))?;
                    names
                } else {
                    Vec::new()
                };
                if names.len() != fields.len() {
                    let span = ctor.span.to(self.last_span());
                    return self.fail(
                        span,
                        Error::PatternArity {
                            ctor: ctor.name,
                            expected: fields.len(),
                            actual: names.len(),
                        },
                    );
                }
                let mut bindings = Vec::with_capacity(names.len());
                for (name, &ty) in names.into_iter().zip(fields.iter()) {
                    let var = Var {
                        name: name.name,
                        ty,
                        by_ref: false,
                    };
                    self.declare_let(name, var)?;
                    bindings.push(var);
                }
                Pattern::Ctor {
                    name: ctor.name,
                    index: option.index,
                    bindings,
                }
            }
            Scrutinee::Sum(sum) => {
                let ty_start = self.peek().span();
                let ty = self.parse_type()?;
                let Some(index) = sum.alts.iter().position(|&alt| alt == ty) else {
                    let case = self.render(ty);
                    let ty = self.render(scr_ty);
                    let span = ty_start.to(self.last_span());
                    return self.fail(span, Error::ForeignCase { case, ty });
                };
                let binding = if self.is(TokenKind::Identifier) {
                    let name = self.parse_ident()?;
                    let var = Var {
                        name: name.name,
                        ty,
                        by_ref: false,
                    };
                    self.declare_let(name, var)?;
                    Some(var)
                } else {
                    None
                };
                Pattern::Alt {
                    ty,
                    index: index as u32,
                    binding,
                }
            }
            Scrutinee::Plain => {
                let value = self.parse_value()?;
                Pattern::Value(self.expect(value, scr_ty, None)?)
            }
        };
        let colon = self.consume(t::p(Punct::Colon))?;
        let stmts = self.parse_stmts(&[t::kw(Keyword::Case), t::p(Punct::RBrace)])?;
        let body = Block {
            stmts,
            span: colon.span().to(self.last_span()),
        };
        Ok(Case {
            pattern,
            body,
            span: start.to(self.last_span()),
        })
    }
}
