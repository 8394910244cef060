use super::{cursor::Cursor, Parser, Result};
use crate::{
    ast::{BinaryOperator, Call, CallableKind, Ident, Value, ValueKind},
    context::Builtin,
    error::Error,
    lexer::extract,
    token::{t, Keyword, Operator, Punct, Token, TokenKind},
    types::{Field, TypeId, TypeKind},
};

impl Parser<'_> {
    pub(super) fn parse_value(&mut self) -> Result<Value> {
        self.parse_value_bp(0)
    }

    fn parse_value_bp(&mut self, min_bp: u8) -> Result<Value> {
        let token = self.advance();
        let mut lhs = self.parse_nud(token)?;

        loop {
            let op = self.peek();
            let Some((l_bp, r_bp)) = infix_binding_power(op.kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            lhs = self.parse_led(op, lhs, r_bp)?;
        }

        Ok(lhs)
    }

    fn parse_nud(&mut self, token: Token) -> Result<Value> {
        let span = token.span();
        match token.kind {
            TokenKind::Number => {
                let Ok(n) = extract::int(token, self.c.src) else {
                    return self.fail(span, Error::ParseInt);
                };
                Ok(Value {
                    kind: ValueKind::Int(n),
                    ty: TypeId::UNTYPED_INT,
                    span,
                })
            }
            TokenKind::String => Ok(Value {
                kind: ValueKind::String(extract::string(token, self.c.src)),
                ty: TypeId::STRING,
                span,
            }),
            TokenKind::Identifier => {
                let name = extract::ident(token, self.c.src);
                if let b @ ("true" | "false") = name {
                    return Ok(Value {
                        kind: ValueKind::Bool(b == "true"),
                        ty: TypeId::BOOL,
                        span,
                    });
                }
                let ident = Ident {
                    name: self.idents.intern(name),
                    span,
                };
                match self.peek().kind {
                    TokenKind::Punct(Punct::LParen) => self.parse_invocation(ident, true),
                    TokenKind::Punct(Punct::LBracket) => self.parse_index(ident),
                    _ => self.parse_name(ident),
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                let first = self.parse_value()?;
                if self.take(t::p(Punct::Comma)) {
                    let mut values = vec![first];
                    values.extend(Cursor::parse_list(
                        self,
                        t::p(Punct::RParen),
                        t::p(Punct::Comma),
                        Parser::parse_value,
                    )?);
                    let close = self.consume(t::p(Punct::RParen))?;
                    let fields: Box<[Field]> = values
                        .iter()
                        .map(|v| Field {
                            name: None,
                            ty: v.ty,
                        })
                        .collect();
                    let ty = self.types.intern(TypeKind::Tuple(fields));
                    Ok(Value {
                        kind: ValueKind::Tuple(values),
                        ty,
                        span: span.to(close.span()),
                    })
                } else {
                    let close = self.consume(t::p(Punct::RParen))?;
                    Ok(Value {
                        ty: first.ty,
                        kind: ValueKind::Brackets(Box::new(first)),
                        span: span.to(close.span()),
                    })
                }
            }
            TokenKind::Punct(Punct::LBrace) => {
                let values = Cursor::parse_list(
                    self,
                    t::p(Punct::RBrace),
                    t::p(Punct::Comma),
                    Parser::parse_value,
                )?;
                let close = self.consume(t::p(Punct::RBrace))?;
                self.array_literal(values, span.to(close.span()))
            }
            TokenKind::Operator(Operator::Minus) => {
                let inner = self.parse_value_bp(PREFIX_BP)?;
                self.negate(inner, span)
            }
            actual => self.fail(span, Error::UnexpectedInValue { actual }),
        }
    }

    fn parse_led(&mut self, op: Token, lhs: Value, r_bp: u8) -> Result<Value> {
        use Operator::*;
        let binary = match op.kind {
            TokenKind::Operator(Plus) => BinaryOperator::Add,
            TokenKind::Operator(Minus) => BinaryOperator::Sub,
            TokenKind::Operator(Star) => BinaryOperator::Mul,
            TokenKind::Operator(Slash) => BinaryOperator::Div,
            TokenKind::Operator(Percent) => BinaryOperator::Mod,
            TokenKind::Operator(Less) => BinaryOperator::Lt,
            TokenKind::Operator(LessEq) => BinaryOperator::Le,
            TokenKind::Operator(EqEq) => BinaryOperator::Eq,
            TokenKind::Operator(NotEq) => BinaryOperator::Ne,
            TokenKind::Operator(GreaterEq) => BinaryOperator::Ge,
            TokenKind::Operator(Greater) => BinaryOperator::Gt,
            TokenKind::Keyword(Keyword::As) => {
                let ty = self.parse_type()?;
                let span = lhs.span.to(self.last_span());
                return self.cast(lhs, ty, span);
            }
            TokenKind::Punct(Punct::Dot) => {
                let field = self.consume_any(&[TokenKind::Identifier, TokenKind::Number])?;
                return self.field(lhs, field);
            }
            actual => return self.fail(op.span(), Error::UnexpectedInValue { actual }),
        };
        let rhs = self.parse_value_bp(r_bp)?;
        self.binary(binary, lhs, rhs)
    }

    /// A name used as a value: a binding or a payload-less constructor.
    fn parse_name(&mut self, ident: Ident) -> Result<Value> {
        if let Some(binding) = self.ctx.lookup(ident.name) {
            return Ok(Value {
                kind: ValueKind::Var(binding.var),
                ty: binding.var.ty,
                span: ident.span,
            });
        }
        let symbols = self.symbols;
        if let Some(option) = symbols.enum_options.get(&ident.name) {
            let TypeKind::Enum(defn) = self.types.get(option.parent) else {
                unreachable!("constructors belong to enums");
            };
            let fields = defn.ctors[option.index as usize].fields.len();
            if fields != 0 {
                return self.fail(
                    ident.span,
                    Error::ArgumentCount {
                        callee: ident.name,
                        expected: fields,
                        actual: 0,
                    },
                );
            }
            return Ok(Value {
                kind: ValueKind::EnumOption {
                    name: ident.name,
                    index: option.index,
                },
                ty: option.parent,
                span: ident.span,
            });
        }
        if symbols.callables.contains_key(&ident.name) {
            return self.fail(ident.span, Error::NoValue { callee: ident.name });
        }
        self.fail(ident.span, Error::Undefined { name: ident.name })
    }

    /// `NAME[i]` or `NAME[lo:hi]`, with the opening bracket not yet consumed.
    fn parse_index(&mut self, ident: Ident) -> Result<Value> {
        self.consume(t::p(Punct::LBracket))?;
        let Some(binding) = self.ctx.lookup(ident.name) else {
            return self.fail(ident.span, Error::Undefined { name: ident.name });
        };
        let base = binding.var;
        let elem = if self.types.is_string(base.ty) {
            TypeId::UINT8
        } else if let Some(elem) = self.types.elem(base.ty) {
            elem
        } else {
            let ty = self.render(base.ty);
            return self.fail(ident.span, Error::NotIndexable { ty });
        };

        let lo = if self.is(t::p(Punct::Colon)) {
            None
        } else {
            let lo = self.parse_value()?;
            Some(Box::new(self.expect_index(lo)?))
        };
        if !self.take(t::p(Punct::Colon)) {
            let close = self.consume(t::p(Punct::RBracket))?;
            let Some(index) = lo else {
                unreachable!("an index is parsed unless a colon follows");
            };
            return Ok(Value {
                kind: ValueKind::Index { base, index },
                ty: elem,
                span: ident.span.to(close.span()),
            });
        }
        let hi = if self.is(t::p(Punct::RBracket)) {
            None
        } else {
            let hi = self.parse_value()?;
            Some(Box::new(self.expect_index(hi)?))
        };
        let close = self.consume(t::p(Punct::RBracket))?;
        let ty = match self.types.kind(base.ty) {
            TypeKind::Array { elem, .. } => {
                let elem = *elem;
                self.types.intern(TypeKind::Slice { elem })
            }
            _ => base.ty,
        };
        Ok(Value {
            kind: ValueKind::Slice { base, lo, hi },
            ty,
            span: ident.span.to(close.span()),
        })
    }

    /// A call or a constructor application, with the opening parenthesis not
    /// yet consumed.
    pub(super) fn parse_invocation(&mut self, ident: Ident, as_value: bool) -> Result<Value> {
        self.consume(t::p(Punct::LParen))?;
        let args = Cursor::parse_list(
            self,
            t::p(Punct::RParen),
            t::p(Punct::Comma),
            Parser::parse_value,
        )?;
        let close = self.consume(t::p(Punct::RParen))?;
        let span = ident.span.to(close.span());

        let symbols = self.symbols;
        if let Some(option) = symbols.enum_options.get(&ident.name) {
            let TypeKind::Enum(defn) = self.types.get(option.parent) else {
                unreachable!("constructors belong to enums");
            };
            let fields = defn.ctors[option.index as usize].fields.clone();
            if args.len() != fields.len() {
                return self.fail(
                    span,
                    Error::ArgumentCount {
                        callee: ident.name,
                        expected: fields.len(),
                        actual: args.len(),
                    },
                );
            }
            let args = args
                .into_iter()
                .zip(fields.iter())
                .map(|(arg, &field)| self.expect_field(arg, field, ident.name))
                .collect::<Result<Vec<_>>>()?;
            let kind = if args.is_empty() {
                ValueKind::EnumOption {
                    name: ident.name,
                    index: option.index,
                }
            } else {
                ValueKind::EnumValue {
                    name: ident.name,
                    index: option.index,
                    args,
                }
            };
            return Ok(Value {
                kind,
                ty: option.parent,
                span,
            });
        }

        let Some(sig) = symbols.callables.get(&ident.name) else {
            return self.fail(ident.span, Error::Undefined { name: ident.name });
        };
        if self.ctx.pure && sig.kind == CallableKind::Proc {
            return self.fail(ident.span, Error::Impure { callee: ident.name });
        }
        if args.len() != sig.params.len() {
            return self.fail(
                span,
                Error::ArgumentCount {
                    callee: ident.name,
                    expected: sig.params.len(),
                    actual: args.len(),
                },
            );
        }

        if sig.builtin == Some(Builtin::Len) {
            let Some(arg) = args.into_iter().next() else {
                unreachable!("arity was checked");
            };
            let arg = self.settle(arg)?;
            let ty = self.types.kind(arg.ty);
            if !matches!(ty, TypeKind::Array { .. } | TypeKind::Slice { .. })
                && !self.types.is_string(arg.ty)
            {
                let actual = self.render(arg.ty);
                return self.fail(
                    arg.span,
                    Error::Mismatch {
                        what: sig.params.first().map(|p| p.name),
                        expected: "slice".into(),
                        actual,
                    },
                );
            }
            return Ok(Value {
                kind: ValueKind::Len(Box::new(arg)),
                ty: TypeId::UINT64,
                span,
            });
        }

        let args = args
            .into_iter()
            .zip(&sig.params)
            .map(|(arg, param)| self.expect_arg(arg, *param, ident.name))
            .collect::<Result<Vec<_>>>()?;

        if let Some(current) = self.ctx.current {
            if let Some((effects, callees)) = self.graph.get_mut(&current) {
                if sig.builtin.is_some() {
                    *effects = effects.union(sig.effects);
                } else {
                    callees.insert(ident.name);
                }
            }
        }

        let returns: Vec<TypeId> = sig.returns.iter().map(|r| r.ty).collect();
        let ty = match &sig.returns[..] {
            [] if as_value => {
                return self.fail(span, Error::NoValue { callee: ident.name });
            }
            [ret] => ret.ty,
            rets => {
                let fields = rets
                    .iter()
                    .map(|r| Field {
                        name: r.name,
                        ty: r.ty,
                    })
                    .collect();
                self.types.intern(TypeKind::Tuple(fields))
            }
        };
        Ok(Value {
            kind: ValueKind::Call(Call {
                callee: ident.name,
                builtin: sig.builtin,
                params: sig.params.clone(),
                args,
                returns,
            }),
            ty,
            span,
        })
    }
}

const PREFIX_BP: u8 = 7;

fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8)> {
    use Operator::*;
    match kind {
        // Never valid in a value; accepted here only to be reported.
        TokenKind::Operator(Amp | Pipe) => Some((1, 2)),
        TokenKind::Operator(Less | LessEq | EqEq | NotEq | GreaterEq | Greater) => Some((1, 2)),
        TokenKind::Operator(Plus | Minus) => Some((3, 4)),
        TokenKind::Operator(Star | Slash | Percent) => Some((5, 6)),
        TokenKind::Keyword(Keyword::As) | TokenKind::Punct(Punct::Dot) => Some((9, 10)),
        _ => None,
    }
}
