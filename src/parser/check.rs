use super::{Parser, Result};
use crate::{
    ast::{BinaryOperator, Value, ValueKind, Var},
    error::Error,
    lexer::extract,
    token::{Span, Token, TokenKind},
    types::{Field, TypeId, TypeKind},
    util::intern::Symbol,
};

impl Parser<'_> {
    /// Fits `value` into a slot of type `expected`. Untyped literals are
    /// range-checked and typed, values flowing into a sum type are wrapped and
    /// literals take the shape of the slot.
    pub(super) fn expect(
        &mut self,
        value: Value,
        expected: TypeId,
        what: Option<Symbol>,
    ) -> Result<Value> {
        if value.ty == expected {
            return Ok(value);
        }
        if value.ty == TypeId::UNTYPED_INT && self.types.is_integer(expected) {
            return self.coerce_int(value, expected, what);
        }

        match self.types.kind(expected).clone() {
            TypeKind::Sum(sum) => {
                let index = match sum.alts.iter().position(|&alt| alt == value.ty) {
                    Some(index) => Some(index),
                    None if value.ty == TypeId::UNTYPED_INT => {
                        sum.alts.iter().position(|&alt| self.types.is_integer(alt))
                    }
                    None => None,
                };
                if let Some(index) = index {
                    let inner = self.expect(value, sum.alts[index], what)?;
                    return Ok(Value {
                        span: inner.span,
                        kind: ValueKind::Wrap {
                            index: index as u32,
                            inner: Box::new(inner),
                        },
                        ty: expected,
                    });
                }
            }
            TypeKind::Array { elem, len } => {
                if let ValueKind::ArrayLiteral(values) = &value.kind {
                    if values.len() as u64 == len {
                        return self.fit_elements(value, elem, expected, what);
                    }
                }
            }
            TypeKind::Slice { elem } => {
                if let ValueKind::ArrayLiteral(_) = &value.kind {
                    return self.fit_elements(value, elem, expected, what);
                }
            }
            TypeKind::Tuple(fields) => {
                if let ValueKind::Tuple(values) = &value.kind {
                    if values.len() == fields.len() {
                        let Value { kind, span, .. } = value;
                        let ValueKind::Tuple(values) = kind else {
                            unreachable!();
                        };
                        let values = values
                            .into_iter()
                            .zip(fields.iter())
                            .map(|(v, f)| self.expect(v, f.ty, f.name.or(what)))
                            .collect::<Result<Vec<_>>>()?;
                        return Ok(Value {
                            kind: ValueKind::Tuple(values),
                            ty: expected,
                            span,
                        });
                    }
                }
            }
            _ => {}
        }

        self.mismatch(&value, expected, what)
    }

    fn fit_elements(
        &mut self,
        value: Value,
        elem: TypeId,
        ty: TypeId,
        what: Option<Symbol>,
    ) -> Result<Value> {
        let Value { kind, span, .. } = value;
        let ValueKind::ArrayLiteral(values) = kind else {
            unreachable!("only literals are fitted element-wise");
        };
        let values = values
            .into_iter()
            .map(|v| self.expect(v, elem, what))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value {
            kind: ValueKind::ArrayLiteral(values),
            ty,
            span,
        })
    }

    fn mismatch<T>(
        &mut self,
        value: &Value,
        expected: TypeId,
        what: Option<Symbol>,
    ) -> Result<T> {
        let error = Error::Mismatch {
            what,
            expected: self.render(expected),
            actual: self.render(value.ty),
        };
        self.fail(value.span, error)
    }

    /// Gives every untyped part of `value` its default type.
    pub(super) fn settle(&mut self, value: Value) -> Result<Value> {
        let settled = self.default_of(value.ty);
        if settled == value.ty {
            Ok(value)
        } else {
            self.expect(value, settled, None)
        }
    }

    fn default_of(&mut self, ty: TypeId) -> TypeId {
        match self.types.get(ty).clone() {
            TypeKind::UntypedInt => TypeId::INT,
            TypeKind::Array { elem, len } => {
                let elem = self.default_of(elem);
                self.types.intern(TypeKind::Array { elem, len })
            }
            TypeKind::Tuple(fields) => {
                let fields = fields
                    .iter()
                    .map(|f| Field {
                        name: f.name,
                        ty: self.default_of(f.ty),
                    })
                    .collect();
                self.types.intern(TypeKind::Tuple(fields))
            }
            _ => ty,
        }
    }

    fn coerce_int(
        &mut self,
        mut value: Value,
        ty: TypeId,
        what: Option<Symbol>,
    ) -> Result<Value> {
        let n = self.const_eval(&value)?;
        let Some((lo, hi)) = self.types.int_range(ty) else {
            return self.mismatch(&value, ty, what);
        };
        if n < lo || n > hi {
            let ty = self.render(ty);
            return self.fail(
                value.span,
                Error::LiteralOutOfRange { what, value: n, ty },
            );
        }
        retype(&mut value, ty);
        Ok(value)
    }

    /// Folds a tree of untyped integer literals.
    fn const_eval(&mut self, value: &Value) -> Result<i128> {
        match &value.kind {
            ValueKind::Int(n) => Ok(*n),
            ValueKind::Brackets(inner) => self.const_eval(inner),
            ValueKind::Neg(inner) => Ok(-self.const_eval(inner)?),
            ValueKind::Binary { op, lhs, rhs } => {
                let l = self.const_eval(lhs)?;
                let r = self.const_eval(rhs)?;
                let result = match op {
                    BinaryOperator::Add => l.checked_add(r),
                    BinaryOperator::Sub => l.checked_sub(r),
                    BinaryOperator::Mul => l.checked_mul(r),
                    BinaryOperator::Div | BinaryOperator::Mod if r == 0 => {
                        return self.fail(rhs.span, Error::DivisionByZero);
                    }
                    BinaryOperator::Div => l.checked_div(r),
                    BinaryOperator::Mod => l.checked_rem(r),
                    _ => unreachable!("comparisons are never untyped"),
                };
                match result {
                    Some(n) => Ok(n),
                    None => self.fail(
                        value.span,
                        Error::LiteralOutOfRange {
                            what: None,
                            value: l,
                            ty: "untyped int".into(),
                        },
                    ),
                }
            }
            _ => unreachable!("only literal trees are untyped"),
        }
    }

    /// Checks an index or slice bound.
    pub(super) fn expect_index(&mut self, value: Value) -> Result<Value> {
        if value.ty == TypeId::UNTYPED_INT {
            return self.coerce_int(value, TypeId::INT, None);
        }
        if self.types.is_integer(value.ty) {
            Ok(value)
        } else {
            self.mismatch(&value, TypeId::INT, None)
        }
    }

    /// Checks an argument against a parameter at a call boundary, which is
    /// looser than plain assignment.
    pub(super) fn expect_arg(
        &mut self,
        value: Value,
        param: Var,
        callee: Symbol,
    ) -> Result<Value> {
        if param.by_pointer(self.types) {
            let lvalue = match &value.kind {
                ValueKind::Var(var) => self
                    .ctx
                    .lookup(var.name)
                    .is_some_and(|b| b.is_assignable()),
                _ => false,
            };
            if !lvalue {
                return self.fail(
                    value.span,
                    Error::NotMutableArgument {
                        callee,
                        param: param.name,
                    },
                );
            }
            if self.types.resolve(value.ty) != self.types.resolve(param.ty) {
                return self.mismatch(&value, param.ty, Some(param.name));
            }
            return Ok(value);
        }
        self.expect_field(value, param.ty, param.name)
    }

    /// Checks a value passed into a parameter or constructor field slot.
    pub(super) fn expect_field(
        &mut self,
        value: Value,
        ty: TypeId,
        what: Symbol,
    ) -> Result<Value> {
        if value.ty == TypeId::UNTYPED_INT && self.types.is_param(ty) {
            return self.coerce_int(value, TypeId::INT, Some(what));
        }
        if self.compatible_at_call(ty, value.ty) {
            return Ok(value);
        }
        self.expect(value, ty, Some(what))
    }

    fn compatible_at_call(&self, param: TypeId, arg: TypeId) -> bool {
        let types = &*self.types;
        let (p, a) = (types.resolve(param), types.resolve(arg));
        if p == a {
            return true;
        }
        let bytes = |id| id == TypeId::BYTE_SLICE || id == TypeId::STRING;
        if bytes(p) && bytes(a) {
            return true;
        }
        match (types.get(p), types.get(a)) {
            (TypeKind::Slice { elem }, TypeKind::Array { elem: arg_elem, .. }) => elem == arg_elem,
            (TypeKind::Param(_), _) => {
                (a != TypeId::UNTYPED_INT && types.words(a) == 1 && types.scalar(a).is_some())
                    || types.is_param(a)
            }
            (_, TypeKind::Param(_)) => types.words(p) == 1 && types.scalar(p).is_some(),
            _ => false,
        }
    }

    pub(super) fn binary(&mut self, op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
        let span = lhs.span.to(rhs.span);
        let (lhs, rhs) = match (lhs.ty == TypeId::UNTYPED_INT, rhs.ty == TypeId::UNTYPED_INT) {
            (true, true) => (lhs, rhs),
            (true, false) => {
                let ty = rhs.ty;
                (self.operand(lhs, ty)?, rhs)
            }
            (false, true) => {
                let ty = lhs.ty;
                let rhs = self.operand(rhs, ty)?;
                (lhs, rhs)
            }
            (false, false) if lhs.ty == rhs.ty => (lhs, rhs),
            (false, false) => return self.mismatch(&rhs, lhs.ty, None),
        };

        let (lhs, rhs, ty) = if op.is_comparison() {
            let (lhs, rhs) = if lhs.ty == TypeId::UNTYPED_INT {
                (self.settle(lhs)?, self.settle(rhs)?)
            } else {
                (lhs, rhs)
            };
            let ty = lhs.ty;
            let equality = matches!(op, BinaryOperator::Eq | BinaryOperator::Ne);
            let valid = self.types.is_integer(ty) || equality && self.types.is_bool(ty);
            if !valid {
                let ty = self.render(ty);
                return self.fail(span, Error::InvalidOperands { op: op.as_str(), ty });
            }
            (lhs, rhs, TypeId::BOOL)
        } else {
            let ty = lhs.ty;
            if ty != TypeId::UNTYPED_INT && !self.types.is_integer(ty) {
                let ty = self.render(ty);
                return self.fail(span, Error::InvalidOperands { op: op.as_str(), ty });
            }
            if ty == TypeId::UNTYPED_INT && matches!(op, BinaryOperator::Div | BinaryOperator::Mod)
            {
                if let Ok(0) = self.const_eval_quiet(&rhs) {
                    return self.fail(rhs.span, Error::DivisionByZero);
                }
            }
            (lhs, rhs, ty)
        };

        Ok(Value {
            kind: ValueKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span,
        })
    }

    /// Fits an untyped operand to the type of the other side.
    fn operand(&mut self, value: Value, other: TypeId) -> Result<Value> {
        if self.types.is_integer(other) {
            self.coerce_int(value, other, None)
        } else {
            self.mismatch(&value, other, None)
        }
    }

    fn const_eval_quiet(&mut self, value: &Value) -> std::result::Result<i128, ()> {
        let errors = self.c.errors.len();
        let result = self.const_eval(value);
        self.c.errors.truncate(errors);
        result
    }

    pub(super) fn negate(&mut self, inner: Value, minus: Span) -> Result<Value> {
        let span = minus.to(inner.span);
        if inner.ty != TypeId::UNTYPED_INT && !self.types.is_integer(inner.ty) {
            let ty = self.render(inner.ty);
            return self.fail(span, Error::InvalidOperands { op: "-", ty });
        }
        Ok(Value {
            ty: inner.ty,
            kind: ValueKind::Neg(Box::new(inner)),
            span,
        })
    }

    pub(super) fn cast(&mut self, value: Value, to: TypeId, span: Span) -> Result<Value> {
        let value = if value.ty == TypeId::UNTYPED_INT {
            if self.types.is_integer(to) {
                self.coerce_int(value, to, None)?
            } else {
                self.settle(value)?
            }
        } else {
            value
        };

        let (from_r, to_r) = (self.types.resolve(value.ty), self.types.resolve(to));
        let integer = |id| self.types.is_integer(id);
        let bytes = |id| id == TypeId::BYTE_SLICE || id == TypeId::STRING;
        let word = |id| self.types.scalar(id).is_some() && self.types.words(id) == 1;
        let param = |id| self.types.is_param(id);
        let valid = from_r == to_r
            || integer(from_r) && integer(to_r)
            || self.types.is_bool(from_r) && integer(to_r)
            || bytes(from_r) && bytes(to_r)
            || param(from_r) && word(to_r)
            || word(from_r) && param(to_r);
        if !valid {
            let from = self.render(value.ty);
            let to = self.render(to);
            return self.fail(span, Error::InvalidCast { from, to });
        }
        Ok(Value {
            kind: ValueKind::Cast(Box::new(value)),
            ty: to,
            span,
        })
    }

    pub(super) fn field(&mut self, base: Value, field: Token) -> Result<Value> {
        let base = self.settle(base)?;
        let text = extract::ident(field, self.c.src);
        let TypeKind::Tuple(fields) = self.types.kind(base.ty).clone() else {
            let ty = self.render(base.ty);
            return self.fail(field.span(), Error::NoSuchField { field: text.into(), ty });
        };
        let index = if field.kind == TokenKind::Number {
            text.parse::<usize>().ok().filter(|&i| i < fields.len())
        } else {
            fields
                .iter()
                .position(|f| f.name.is_some_and(|n| self.idents.get(n) == text))
        };
        let Some(index) = index else {
            let ty = self.render(base.ty);
            return self.fail(field.span(), Error::NoSuchField { field: text.into(), ty });
        };
        let span = base.span.to(field.span());
        Ok(Value {
            ty: fields[index].ty,
            kind: ValueKind::Field {
                base: Box::new(base),
                index: index as u32,
            },
            span,
        })
    }

    /// Types a `{...}` literal as an array of its first typed element.
    pub(super) fn array_literal(&mut self, values: Vec<Value>, span: Span) -> Result<Value> {
        let elem = values
            .iter()
            .map(|v| v.ty)
            .find(|&ty| ty != TypeId::UNTYPED_INT)
            .unwrap_or(TypeId::UNTYPED_INT);
        let values = if elem == TypeId::UNTYPED_INT {
            values
        } else {
            values
                .into_iter()
                .map(|v| self.expect(v, elem, None))
                .collect::<Result<Vec<_>>>()?
        };
        let ty = self.types.intern(TypeKind::Array {
            elem,
            len: values.len() as u64,
        });
        Ok(Value {
            kind: ValueKind::ArrayLiteral(values),
            ty,
            span,
        })
    }
}

/// Replaces the untyped type of a literal tree.
fn retype(value: &mut Value, ty: TypeId) {
    if value.ty != TypeId::UNTYPED_INT {
        return;
    }
    value.ty = ty;
    match &mut value.kind {
        ValueKind::Brackets(inner) | ValueKind::Neg(inner) => retype(inner, ty),
        ValueKind::Binary { lhs, rhs, .. } => {
            retype(lhs, ty);
            retype(rhs, ty);
        }
        _ => {}
    }
}
