use std::collections::HashMap;

use tracing::{debug, trace};

use super::{
    BasicBlock, BinOp, CastOp, Declaration, Function, Inst, Module, Pred, StringGlobal,
    Terminator, Ty, Val,
};
use crate::{
    ast::{
        self, BinaryOperator, Block, Call, FuncDecl, Pattern, StmtKind, Target, Value, ValueKind,
        Var,
    },
    codegen::{env::Env, Error},
    context::{Builtin, Counters, BUILTINS},
    types::{Scalar, TypeId, TypeKind, TypeTable},
    util::intern::{Interner, Symbol},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the function the runtime calls with the argument slice.
pub const MAIN_WRAPPER: &str = "__l_main";

/// Lowers a checked program into the `usercode` module.
pub fn lower<E: Env>(
    idents: &Interner,
    types: &TypeTable,
    program: &ast::Program,
) -> Result<Module> {
    let mut module = Module::new("usercode", E::TRIPLE);

    // Pass one: what every callee looks like from a call site.
    for entry in BUILTINS {
        if entry.builtin == Builtin::Len {
            continue;
        }
        let params = entry
            .params
            .iter()
            .map(|&(_, ty, _)| lower_ty(types, ty.type_id()))
            .collect();
        let rets: Vec<_> = entry.returns.iter().map(|ty| ty.type_id()).collect();
        module.declarations.push(Declaration {
            name: entry.name.into(),
            ret: ret_ty(types, &rets),
            params,
        });
    }

    // Pass two: bodies.
    let mut strings = Strings::default();
    let mut counters = Counters::default();
    for func in program.funcs() {
        let lowered = Lowering {
            idents,
            types,
            strings: &mut strings,
            counters: &mut counters,
            current: func.name.name,
            returns: func.returns.iter().map(|r| r.ty).collect(),
            allocas: Vec::with_capacity(8),
            blocks: Vec::with_capacity(16),
            block: BasicBlock::new("entry"),
            regs: 0,
            scopes: Vec::with_capacity(8),
            loops: 0,
        }
        .func(func)?;
        trace!(name = &*lowered.name, blocks = lowered.blocks.len(), "lowered function");
        module.functions.push(lowered);
    }

    let main = idents.lookup("main");
    if let Some(main) = program.funcs().find(|f| Some(f.name.name) == main) {
        module.functions.push(main_wrapper(types, main));
    }

    module.strings = strings.globals;
    debug!(
        funcs = module.functions.len(),
        strings = module.strings.len(),
        "lowered module"
    );
    Ok(module)
}

/// The LLVM type of values of `id`.
pub fn lower_ty(types: &TypeTable, id: TypeId) -> Ty {
    match types.kind(id) {
        TypeKind::Scalar(Scalar::Bool) => Ty::I1,
        TypeKind::Scalar(Scalar::String) | TypeKind::Slice { .. } => Ty::slice(),
        TypeKind::Scalar(scalar) => match scalar.info().size {
            1 => Ty::I8,
            2 => Ty::I16,
            4 => Ty::I32,
            _ => Ty::I64,
        },
        TypeKind::UntypedInt | TypeKind::Param(_) => Ty::I64,
        TypeKind::Array { elem, len } => Ty::Array(*len, Box::new(lower_ty(types, *elem))),
        TypeKind::Tuple(fields) => {
            Ty::Struct(fields.iter().map(|f| lower_ty(types, f.ty)).collect())
        }
        TypeKind::Sum(sum) => Ty::Struct(vec![
            Ty::I64,
            Ty::Struct(sum.alts.iter().map(|&alt| lower_ty(types, alt)).collect()),
        ]),
        TypeKind::Enum(defn) => Ty::Struct(vec![
            Ty::I64,
            Ty::Struct(
                defn.ctors
                    .iter()
                    .map(|c| Ty::Struct(c.fields.iter().map(|&f| lower_ty(types, f)).collect()))
                    .collect(),
            ),
        ]),
        TypeKind::Pending(_) => Ty::Struct(Vec::new()),
        TypeKind::User { .. } => unreachable!("resolved"),
    }
}

fn ret_ty(types: &TypeTable, returns: &[TypeId]) -> Ty {
    match returns {
        [] => Ty::Void,
        [one] => lower_ty(types, *one),
        many => Ty::Struct(many.iter().map(|&r| lower_ty(types, r)).collect()),
    }
}

fn param_ty(types: &TypeTable, param: &Var) -> Ty {
    if param.by_pointer(types) {
        Ty::Ptr
    } else {
        lower_ty(types, param.ty)
    }
}

/// `define void @__l_main({ ptr, i64 } %args)`, calling `main` with the
/// argument slice when it takes one.
fn main_wrapper(types: &TypeTable, main: &FuncDecl) -> Function {
    let mut entry = BasicBlock::new("entry");
    let args = match &*main.params {
        [param] if types.is_slice(param.ty) => {
            vec![(Ty::slice(), Val::reg("args"))]
        }
        _ => Vec::new(),
    };
    let ret = ret_ty(types, &main.returns.iter().map(|r| r.ty).collect::<Vec<_>>());
    entry.insts.push(Inst::Call {
        dst: (ret != Ty::Void).then(|| "discard".into()),
        tail: false,
        ret,
        callee: "main".into(),
        args,
    });
    entry.term = Some(Terminator::Ret(None));
    Function {
        name: MAIN_WRAPPER.into(),
        ret: Ty::Void,
        params: vec![(Ty::slice(), "args".into())],
        blocks: vec![entry],
    }
}

#[derive(Default)]
struct Strings {
    globals: Vec<StringGlobal>,
    index: HashMap<Box<str>, Box<str>>,
}

impl Strings {
    /// The global holding `s`, shared between equal literals.
    fn intern(&mut self, s: &str) -> Box<str> {
        if let Some(name) = self.index.get(s) {
            return name.clone();
        }
        let name: Box<str> = format!("str.{}", self.globals.len()).into();
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.globals.push(StringGlobal {
            name: name.clone(),
            bytes: bytes.into(),
        });
        self.index.insert(s.into(), name.clone());
        name
    }
}

/// How a variable is reached.
#[derive(Clone, Debug)]
enum Binding {
    /// An SSA value.
    Value(Val),
    /// The address of a stack slot or of the caller's variable.
    Slot(Val),
}

struct Lowering<'a> {
    idents: &'a Interner,
    types: &'a TypeTable,
    strings: &'a mut Strings,
    counters: &'a mut Counters,
    current: Symbol,
    returns: Vec<TypeId>,
    /// Prepended to the entry block once the body is done.
    allocas: Vec<Inst>,
    blocks: Vec<BasicBlock>,
    block: BasicBlock,
    regs: u32,
    scopes: Vec<HashMap<Symbol, Binding>>,
    /// Depth of enclosing `while` bodies.
    loops: u32,
}

impl Lowering<'_> {
    fn func(mut self, func: &FuncDecl) -> Result<Function> {
        self.scopes.push(HashMap::with_capacity(func.params.len()));
        let mut params = Vec::with_capacity(func.params.len());
        for (k, param) in func.params.iter().enumerate() {
            let name: Box<str> = format!("arg{k}").into();
            let ty = param_ty(self.types, param);
            let arg = Val::reg(name.clone());
            let binding = if param.by_pointer(self.types) {
                Binding::Slot(arg)
            } else if param.by_ref || matches!(self.types.kind(param.ty), TypeKind::Array { .. }) {
                let slot = self.alloca(ty.clone());
                self.push(Inst::Store {
                    ty: ty.clone(),
                    val: arg,
                    ptr: slot.clone(),
                });
                Binding::Slot(slot)
            } else {
                Binding::Value(arg)
            };
            self.bind(param.name, binding);
            params.push((ty, name));
        }

        self.block(&func.body)?;

        let ret = ret_ty(self.types, &self.returns);
        if self.block.term.is_none() {
            self.block.term = Some(if ret == Ty::Void {
                Terminator::Ret(None)
            } else {
                Terminator::Unreachable
            });
        }
        let last = std::mem::replace(&mut self.block, BasicBlock::new(""));
        self.blocks.push(last);
        let mut allocas = std::mem::take(&mut self.allocas);
        allocas.append(&mut self.blocks[0].insts);
        self.blocks[0].insts = allocas;

        Ok(Function {
            name: self.idents.get(func.name.name).into(),
            ret,
            params,
            blocks: self.blocks,
        })
    }

    fn block(&mut self, block: &Block) -> Result<()> {
        self.scopes.push(HashMap::with_capacity(4));
        for stmt in &block.stmts {
            self.stmt(&stmt.kind)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, stmt: &StmtKind) -> Result<()> {
        match stmt {
            StmtKind::Let { names, value, .. } => {
                let val = self.value(value)?;
                if let [var] = &**names {
                    let val = self.convert(val, value.ty, var.ty);
                    self.let_binding(var, val);
                } else {
                    let agg_ty = self.ty(value.ty);
                    for (k, var) in names.iter().enumerate() {
                        let field = self.fresh();
                        self.push(Inst::ExtractValue {
                            dst: field.clone(),
                            ty: agg_ty.clone(),
                            agg: val.clone(),
                            indices: vec![k as u32],
                        });
                        self.let_binding(var, Val::Reg(field));
                    }
                }
            }
            StmtKind::Mutable { var, value, .. } => {
                let val = self.value(value)?;
                let val = self.convert(val, value.ty, var.ty);
                let ty = self.ty(var.ty);
                let slot = self.alloca(ty.clone());
                self.push(Inst::Store {
                    ty,
                    val,
                    ptr: slot.clone(),
                });
                self.bind(var.name, Binding::Slot(slot));
            }
            StmtKind::Assign {
                target: Target::Var(var),
                value,
            } => {
                let val = self.value(value)?;
                let val = self.convert(val, value.ty, var.ty);
                let ptr = self.address(var)?;
                self.push(Inst::Store {
                    ty: self.ty(var.ty),
                    val,
                    ptr,
                });
            }
            StmtKind::Assign {
                target: Target::Index { base, index },
                value,
            } => {
                let (ptr, elem) = self.element_ptr(base, index)?;
                let val = self.value(value)?;
                let val = self.convert(val, value.ty, elem);
                self.push(Inst::Store {
                    ty: self.ty(elem),
                    val,
                    ptr,
                });
            }
            StmtKind::Return(values) => self.ret(values)?,
            StmtKind::While { cond, body } => {
                let n = self.counters.next_label();
                self.start(format!("while{n}init"));
                self.start(format!("while{n}cond"));
                let cond = self.value(cond)?;
                self.terminate(Terminator::CondBr {
                    cond,
                    then: format!("while{n}body").into(),
                    otherwise: format!("while{n}end").into(),
                });
                self.start(format!("while{n}body"));
                self.loops += 1;
                self.block(body)?;
                self.loops -= 1;
                self.terminate(Terminator::Br(format!("while{n}cond").into()));
                self.start(format!("while{n}end"));
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let n = self.counters.next_label();
                let end: Box<str> = format!("if{n}end").into();
                self.start(format!("if{n}cond"));
                let cond = self.value(cond)?;
                self.terminate(Terminator::CondBr {
                    cond,
                    then: format!("if{n}body").into(),
                    otherwise: match else_block {
                        Some(_) => format!("if{n}else").into(),
                        None => end.clone(),
                    },
                });
                self.start(format!("if{n}body"));
                self.block(then_block)?;
                self.terminate(Terminator::Br(end.clone()));
                if let Some(else_block) = else_block {
                    self.start(format!("if{n}else"));
                    self.block(else_block)?;
                    self.terminate(Terminator::Br(end.clone()));
                }
                self.start(end);
            }
            StmtKind::Match { scrutinee, cases } => self.match_stmt(scrutinee, cases)?,
            StmtKind::Call(call) => {
                self.call(call, false)?;
            }
            StmtKind::Assert { cond, message } => {
                let n = self.counters.next_label();
                self.start(format!("assert{n}cond"));
                let cond = self.value(cond)?;
                let end: Box<str> = format!("assert{n}end").into();
                self.terminate(Terminator::CondBr {
                    cond,
                    then: end.clone(),
                    otherwise: format!("assert{n}fail").into(),
                });
                self.start(format!("assert{n}fail"));
                let text = format!("{}\n", message.as_deref().unwrap_or("assertion failed"));
                let msg = self.string(&text);
                let written = self.fresh();
                self.push(Inst::Call {
                    dst: Some(written),
                    tail: false,
                    ret: Ty::I64,
                    callee: Builtin::Write.symbol().into(),
                    args: vec![(Ty::I64, Val::Int(2)), (Ty::slice(), msg)],
                });
                self.push(Inst::Call {
                    dst: None,
                    tail: false,
                    ret: Ty::Void,
                    callee: Builtin::Exit.symbol().into(),
                    args: vec![(Ty::I64, Val::Int(1))],
                });
                self.terminate(Terminator::Unreachable);
                self.start(end);
            }
        }
        Ok(())
    }

    /// Binds a `let`. Arrays and bindings inside loops live in stack slots.
    fn let_binding(&mut self, var: &Var, val: Val) {
        let is_array = matches!(self.types.kind(var.ty), TypeKind::Array { .. });
        if is_array || self.loops > 0 {
            let ty = self.ty(var.ty);
            let slot = self.alloca(ty.clone());
            self.push(Inst::Store {
                ty,
                val,
                ptr: slot.clone(),
            });
            self.bind(var.name, Binding::Slot(slot));
        } else {
            self.bind(var.name, Binding::Value(val));
        }
    }

    fn ret(&mut self, values: &[Value]) -> Result<()> {
        let ret = ret_ty(self.types, &self.returns);
        let term = match values {
            [] => Terminator::Ret(None),
            [value] => {
                let tail = match &value.unbracketed().kind {
                    ValueKind::Call(call) if call.callee == self.current => Some(call),
                    _ => None,
                };
                let val = match tail {
                    Some(call) => self.call(call, true)?,
                    None => Some(self.value(value)?),
                };
                let Some(val) = val else {
                    return Err(Error::Logic("returning the result of a procedure without one".into()));
                };
                let val = match &*self.returns {
                    [ty] => self.convert(val, value.ty, *ty),
                    // A single call supplying every result.
                    _ => val,
                };
                Terminator::Ret(Some((ret, val)))
            }
            values => {
                let returns = self.returns.clone();
                let mut agg = Val::Undef;
                for (k, (value, ty)) in values.iter().zip(returns).enumerate() {
                    let val = self.value(value)?;
                    let val = self.convert(val, value.ty, ty);
                    let dst = self.fresh();
                    self.push(Inst::InsertValue {
                        dst: dst.clone(),
                        ty: ret.clone(),
                        agg,
                        elem_ty: self.ty(ty),
                        elem: val,
                        indices: vec![k as u32],
                    });
                    agg = Val::Reg(dst);
                }
                Terminator::Ret(Some((ret, agg)))
            }
        };
        self.terminate(term);
        let n = self.counters.next_label();
        self.start(format!("ret{n}dead"));
        Ok(())
    }

    fn match_stmt(&mut self, scrutinee: &Value, cases: &[ast::Case]) -> Result<()> {
        let n = self.counters.next_label();
        let end: Box<str> = format!("match{n}end").into();
        let ty = scrutinee.ty;
        let agg_ty = self.ty(ty);
        let val = self.value(scrutinee)?;

        let switch = match self.types.kind(ty) {
            TypeKind::Sum(_) => true,
            TypeKind::Enum(defn) => defn.ctors.iter().all(|c| c.fields.is_empty()),
            _ => false,
        };

        if switch {
            let tag = self.fresh();
            self.push(Inst::ExtractValue {
                dst: tag.clone(),
                ty: agg_ty.clone(),
                agg: val.clone(),
                indices: vec![0],
            });
            let cases_to: Vec<(i64, Box<str>)> = cases
                .iter()
                .enumerate()
                .filter_map(|(k, case)| match &case.pattern {
                    Pattern::Ctor { index, .. } | Pattern::Alt { index, .. } => {
                        Some((i64::from(*index), format!("match{n}case{k}").into()))
                    }
                    Pattern::Value(_) => None,
                })
                .collect();
            self.terminate(Terminator::Switch {
                ty: Ty::I64,
                val: Val::Reg(tag),
                default: end.clone(),
                cases: cases_to,
            });
            for (k, case) in cases.iter().enumerate() {
                self.start(format!("match{n}case{k}"));
                self.scopes.push(HashMap::with_capacity(2));
                self.bind_pattern(&case.pattern, &agg_ty, &val);
                self.block(&case.body)?;
                self.scopes.pop();
                self.terminate(Terminator::Br(end.clone()));
            }
        } else {
            // A chain of comparisons, first match wins.
            for (k, case) in cases.iter().enumerate() {
                let body: Box<str> = format!("match{n}body{k}").into();
                let next: Box<str> = if k + 1 < cases.len() {
                    format!("match{n}comp{}", k + 1).into()
                } else {
                    end.clone()
                };
                self.start(format!("match{n}comp{k}"));
                let cond = match &case.pattern {
                    Pattern::Ctor { index, .. } | Pattern::Alt { index, .. } => {
                        let tag = self.fresh();
                        self.push(Inst::ExtractValue {
                            dst: tag.clone(),
                            ty: agg_ty.clone(),
                            agg: val.clone(),
                            indices: vec![0],
                        });
                        self.icmp(Pred::Eq, Ty::I64, Val::Reg(tag), Val::Int(i64::from(*index)))
                    }
                    Pattern::Value(pattern) => {
                        let other = self.value(pattern)?;
                        let other = self.convert(other, pattern.ty, ty);
                        self.icmp(Pred::Eq, agg_ty.clone(), val.clone(), other)
                    }
                };
                self.terminate(Terminator::CondBr {
                    cond,
                    then: body.clone(),
                    otherwise: next,
                });
                self.start(body);
                self.scopes.push(HashMap::with_capacity(2));
                self.bind_pattern(&case.pattern, &agg_ty, &val);
                self.block(&case.body)?;
                self.scopes.pop();
                self.terminate(Terminator::Br(end.clone()));
            }
        }
        self.start(end);
        Ok(())
    }

    /// Binds the payload of a constructor or the value of an alternative.
    fn bind_pattern(&mut self, pattern: &Pattern, agg_ty: &Ty, val: &Val) {
        match pattern {
            Pattern::Ctor {
                index, bindings, ..
            } => {
                for (j, var) in bindings.iter().enumerate() {
                    let field = self.fresh();
                    self.push(Inst::ExtractValue {
                        dst: field.clone(),
                        ty: agg_ty.clone(),
                        agg: val.clone(),
                        indices: vec![1, *index, j as u32],
                    });
                    self.let_binding(var, Val::Reg(field));
                }
            }
            Pattern::Alt {
                index,
                binding: Some(var),
                ..
            } => {
                let field = self.fresh();
                self.push(Inst::ExtractValue {
                    dst: field.clone(),
                    ty: agg_ty.clone(),
                    agg: val.clone(),
                    indices: vec![1, *index],
                });
                self.let_binding(var, Val::Reg(field));
            }
            Pattern::Alt { binding: None, .. } | Pattern::Value(_) => {}
        }
    }

    fn value(&mut self, value: &Value) -> Result<Val> {
        match &value.kind {
            ValueKind::Int(n) => Ok(Val::Int(*n as i64)),
            ValueKind::Bool(b) => Ok(Val::Bool(*b)),
            ValueKind::String(s) => Ok(self.string(s)),
            ValueKind::Var(var) => self.var(var),
            ValueKind::Binary { op, lhs, rhs } => {
                let ty = self.ty(lhs.ty);
                let signed = self.types.info(lhs.ty).signed;
                let left = self.value(lhs)?;
                let right = self.value(rhs)?;
                let right = self.convert(right, rhs.ty, lhs.ty);
                if op.is_comparison() {
                    Ok(self.icmp(pred_of(*op, signed), ty, left, right))
                } else {
                    let dst = self.fresh();
                    self.push(Inst::Binary {
                        dst: dst.clone(),
                        op: arith_of(*op, signed),
                        ty,
                        lhs: left,
                        rhs: right,
                    });
                    Ok(Val::Reg(dst))
                }
            }
            ValueKind::Neg(inner) => {
                let val = self.value(inner)?;
                let dst = self.fresh();
                self.push(Inst::Binary {
                    dst: dst.clone(),
                    op: BinOp::Sub,
                    ty: self.ty(value.ty),
                    lhs: Val::Int(0),
                    rhs: val,
                });
                Ok(Val::Reg(dst))
            }
            ValueKind::Call(call) => self.call(call, false)?.ok_or_else(|| {
                Error::Logic(format!(
                    "{} has no result to use",
                    self.idents.get(call.callee)
                ))
            }),
            ValueKind::ArrayLiteral(values) => self.array_literal(values, value.ty),
            ValueKind::Index { base, index } => {
                let (ptr, elem) = self.element_ptr(base, index)?;
                let dst = self.fresh();
                self.push(Inst::Load {
                    dst: dst.clone(),
                    ty: self.ty(elem),
                    ptr,
                });
                Ok(Val::Reg(dst))
            }
            ValueKind::Slice { base, lo, hi } => self.slice(base, lo.as_deref(), hi.as_deref()),
            ValueKind::Cast(inner) => {
                let val = self.value(inner)?;
                let (from, to) = (self.ty(inner.ty), self.ty(value.ty));
                if from == to && from.int_bits().is_some() && inner.ty != value.ty {
                    let dst = self.fresh();
                    self.push(Inst::Cast {
                        dst: dst.clone(),
                        op: CastOp::BitCast,
                        from,
                        val,
                        to,
                    });
                    return Ok(Val::Reg(dst));
                }
                Ok(self.convert(val, inner.ty, value.ty))
            }
            ValueKind::Brackets(inner) => self.value(inner),
            ValueKind::EnumOption { index, .. } => {
                let ty = self.ty(value.ty);
                Ok(self.insert(ty, Val::Zero, Ty::I64, Val::Int(i64::from(*index)), vec![0]))
            }
            ValueKind::EnumValue { index, args, .. } => {
                let TypeKind::Enum(defn) = self.types.kind(value.ty) else {
                    return Err(Error::Logic("constructor of a non-enum".into()));
                };
                let fields = defn.ctors[*index as usize].fields.clone();
                let ty = self.ty(value.ty);
                let mut agg =
                    self.insert(ty.clone(), Val::Zero, Ty::I64, Val::Int(i64::from(*index)), vec![0]);
                for (j, (arg, field)) in args.iter().zip(fields.iter()).enumerate() {
                    let val = self.value(arg)?;
                    let val = self.convert(val, arg.ty, *field);
                    agg = self.insert(ty.clone(), agg, self.ty(*field), val, vec![1, *index, j as u32]);
                }
                Ok(agg)
            }
            ValueKind::Tuple(values) => {
                let ty = self.ty(value.ty);
                let fields: Vec<TypeId> = match self.types.kind(value.ty) {
                    TypeKind::Tuple(fields) => fields.iter().map(|f| f.ty).collect(),
                    _ => return Err(Error::Logic("tuple value of a non-tuple type".into())),
                };
                let mut agg = Val::Undef;
                for (k, (elem, field)) in values.iter().zip(fields).enumerate() {
                    let val = self.value(elem)?;
                    let val = self.convert(val, elem.ty, field);
                    agg = self.insert(ty.clone(), agg, self.ty(field), val, vec![k as u32]);
                }
                Ok(agg)
            }
            ValueKind::Field { base, index } => {
                let agg = self.value(base)?;
                let dst = self.fresh();
                self.push(Inst::ExtractValue {
                    dst: dst.clone(),
                    ty: self.ty(base.ty),
                    agg,
                    indices: vec![*index],
                });
                Ok(Val::Reg(dst))
            }
            ValueKind::Wrap { index, inner } => {
                let ty = self.ty(value.ty);
                let val = self.value(inner)?;
                let tagged =
                    self.insert(ty.clone(), Val::Zero, Ty::I64, Val::Int(i64::from(*index)), vec![0]);
                Ok(self.insert(ty, tagged, self.ty(inner.ty), val, vec![1, *index]))
            }
            ValueKind::Len(inner) => {
                if let TypeKind::Array { len, .. } = self.types.kind(inner.ty) {
                    return Ok(Val::Int(i64::try_from(*len).unwrap_or(i64::MAX)));
                }
                let val = self.value(inner)?;
                let dst = self.fresh();
                self.push(Inst::ExtractValue {
                    dst: dst.clone(),
                    ty: Ty::slice(),
                    agg: val,
                    indices: vec![1],
                });
                Ok(Val::Reg(dst))
            }
        }
    }

    fn var(&mut self, var: &Var) -> Result<Val> {
        match self.lookup(var.name)? {
            Binding::Value(val) => Ok(val),
            Binding::Slot(ptr) => {
                let dst = self.fresh();
                self.push(Inst::Load {
                    dst: dst.clone(),
                    ty: self.ty(var.ty),
                    ptr,
                });
                Ok(Val::Reg(dst))
            }
        }
    }

    fn address(&mut self, var: &Var) -> Result<Val> {
        match self.lookup(var.name)? {
            Binding::Slot(ptr) => Ok(ptr),
            Binding::Value(_) => Err(Error::Logic(format!(
                "{} has no address",
                self.idents.get(var.name)
            ))),
        }
    }

    /// Arrays become an insertvalue chain; a literal typed as a slice gets
    /// a backing array on the stack.
    fn array_literal(&mut self, values: &[Value], ty: TypeId) -> Result<Val> {
        let Some(elem) = self.types.elem(ty) else {
            return Err(Error::Logic("array literal of a non-sequence type".into()));
        };
        let elem_ty = self.ty(elem);
        let array_ty = Ty::Array(values.len() as u64, Box::new(elem_ty.clone()));
        let mut agg = Val::Zero;
        for (k, value) in values.iter().enumerate() {
            let val = self.value(value)?;
            let val = self.convert(val, value.ty, elem);
            agg = self.insert(array_ty.clone(), agg, elem_ty.clone(), val, vec![k as u32]);
        }
        if !self.types.is_slice(ty) {
            return Ok(agg);
        }
        let slot = self.alloca(array_ty.clone());
        self.push(Inst::Store {
            ty: array_ty,
            val: agg,
            ptr: slot.clone(),
        });
        Ok(self.make_slice(slot, Val::Int(values.len() as i64)))
    }

    fn slice(&mut self, base: &Var, lo: Option<&Value>, hi: Option<&Value>) -> Result<Val> {
        let lo = match lo {
            Some(lo) => {
                let val = self.value(lo)?;
                Some(self.convert(val, lo.ty, TypeId::INT))
            }
            None => None,
        };
        let hi = match hi {
            Some(hi) => {
                let val = self.value(hi)?;
                Some(self.convert(val, hi.ty, TypeId::INT))
            }
            None => None,
        };

        let (ptr, len, elem) = match self.types.kind(base.ty) {
            TypeKind::Array { elem, len } => {
                let (elem, len) = (*elem, *len);
                let array = self.address(base)?;
                let ptr = self.gep(self.ty(base.ty), array, vec![Val::Int(0), Val::Int(0)]);
                (ptr, Val::Int(i64::try_from(len).unwrap_or(i64::MAX)), elem)
            }
            TypeKind::Slice { elem } => {
                let elem = *elem;
                let s = self.var(base)?;
                let (ptr, len) = self.unpack_slice(s);
                (ptr, len, elem)
            }
            TypeKind::Scalar(Scalar::String) => {
                let s = self.var(base)?;
                let (ptr, len) = self.unpack_slice(s);
                (ptr, len, TypeId::UINT8)
            }
            _ => return Err(Error::Logic("slice of a non-sequence".into())),
        };

        let hi = hi.unwrap_or(len);
        let (ptr, len) = match lo {
            None | Some(Val::Int(0)) => (ptr, hi),
            Some(lo) => {
                let ptr = self.gep(self.ty(elem), ptr, vec![lo.clone()]);
                let len = self.fresh();
                self.push(Inst::Binary {
                    dst: len.clone(),
                    op: BinOp::Sub,
                    ty: Ty::I64,
                    lhs: hi,
                    rhs: lo,
                });
                (ptr, Val::Reg(len))
            }
        };
        Ok(self.make_slice(ptr, len))
    }

    /// The address of an element of an array, slice or string variable.
    fn element_ptr(&mut self, base: &Var, index: &Value) -> Result<(Val, TypeId)> {
        let idx = self.value(index)?;
        let idx = self.convert(idx, index.ty, TypeId::INT);
        match self.types.kind(base.ty) {
            TypeKind::Array { elem, .. } => {
                let elem = *elem;
                let array = self.address(base)?;
                let ptr = self.gep(self.ty(base.ty), array, vec![Val::Int(0), idx]);
                Ok((ptr, elem))
            }
            TypeKind::Slice { elem } => {
                let elem = *elem;
                let s = self.var(base)?;
                let (data, _) = self.unpack_slice(s);
                Ok((self.gep(self.ty(elem), data, vec![idx]), elem))
            }
            TypeKind::Scalar(Scalar::String) => {
                let s = self.var(base)?;
                let (data, _) = self.unpack_slice(s);
                Ok((self.gep(Ty::I8, data, vec![idx]), TypeId::UINT8))
            }
            _ => Err(Error::Logic("indexing a non-sequence".into())),
        }
    }

    fn call(&mut self, call: &Call, tail: bool) -> Result<Option<Val>> {
        let mut args = Vec::with_capacity(call.args.len());
        for (param, arg) in call.params.iter().zip(&call.args) {
            if param.by_pointer(self.types) {
                let ValueKind::Var(var) = &arg.unbracketed().kind else {
                    return Err(Error::Logic("by-reference argument is not a variable".into()));
                };
                args.push((Ty::Ptr, self.address(var)?));
                continue;
            }
            let param_ty = self.ty(param.ty);
            let val = match (self.types.kind(arg.ty), self.types.kind(param.ty)) {
                (TypeKind::Array { len, .. }, TypeKind::Slice { .. }) => {
                    let len = Val::Int(i64::try_from(*len).unwrap_or(i64::MAX));
                    let array_ty = self.ty(arg.ty);
                    let array = match &arg.unbracketed().kind {
                        ValueKind::Var(var) => self.address(var)?,
                        _ => {
                            let val = self.value(arg)?;
                            let slot = self.alloca(array_ty.clone());
                            self.push(Inst::Store {
                                ty: array_ty.clone(),
                                val,
                                ptr: slot.clone(),
                            });
                            slot
                        }
                    };
                    let ptr = self.gep(array_ty, array, vec![Val::Int(0), Val::Int(0)]);
                    self.make_slice(ptr, len)
                }
                _ => {
                    let val = self.value(arg)?;
                    self.convert(val, arg.ty, param.ty)
                }
            };
            args.push((param_ty, val));
        }

        let ret = ret_ty(self.types, &call.returns);
        let callee: Box<str> = match call.builtin {
            Some(builtin) => builtin.symbol().into(),
            None => self.idents.get(call.callee).into(),
        };
        let dst = (ret != Ty::Void).then(|| self.fresh());
        self.push(Inst::Call {
            dst: dst.clone(),
            tail,
            ret,
            callee,
            args,
        });
        Ok(dst.map(Val::Reg))
    }

    /// Converts between the representations of two source types.
    fn convert(&mut self, val: Val, from: TypeId, to: TypeId) -> Val {
        let (from_ty, to_ty) = (self.ty(from), self.ty(to));
        let (Some(from_bits), Some(to_bits)) = (from_ty.int_bits(), to_ty.int_bits()) else {
            return val;
        };
        let op = if from_bits > to_bits {
            CastOp::Trunc
        } else if from_bits < to_bits {
            if from_bits > 1 && self.types.info(from).signed {
                CastOp::SExt
            } else {
                CastOp::ZExt
            }
        } else {
            return val;
        };
        if let Val::Int(n) = val {
            return Val::Int(fold(op, n, from_bits, to_bits));
        }
        let dst = self.fresh();
        self.push(Inst::Cast {
            dst: dst.clone(),
            op,
            from: from_ty,
            val,
            to: to_ty,
        });
        Val::Reg(dst)
    }

    fn string(&mut self, s: &str) -> Val {
        let name = self.strings.intern(s);
        Val::Struct(vec![
            (Ty::Ptr, Val::Global(name)),
            (Ty::I64, Val::Int(s.len() as i64)),
        ])
    }

    fn make_slice(&mut self, ptr: Val, len: Val) -> Val {
        let with_ptr = self.insert(Ty::slice(), Val::Undef, Ty::Ptr, ptr, vec![0]);
        self.insert(Ty::slice(), with_ptr, Ty::I64, len, vec![1])
    }

    fn unpack_slice(&mut self, s: Val) -> (Val, Val) {
        let (ptr, len) = (self.fresh(), self.fresh());
        self.push(Inst::ExtractValue {
            dst: ptr.clone(),
            ty: Ty::slice(),
            agg: s.clone(),
            indices: vec![0],
        });
        self.push(Inst::ExtractValue {
            dst: len.clone(),
            ty: Ty::slice(),
            agg: s,
            indices: vec![1],
        });
        (Val::Reg(ptr), Val::Reg(len))
    }

    fn insert(&mut self, ty: Ty, agg: Val, elem_ty: Ty, elem: Val, indices: Vec<u32>) -> Val {
        let dst = self.fresh();
        self.push(Inst::InsertValue {
            dst: dst.clone(),
            ty,
            agg,
            elem_ty,
            elem,
            indices,
        });
        Val::Reg(dst)
    }

    fn gep(&mut self, ty: Ty, ptr: Val, indices: Vec<Val>) -> Val {
        let dst = self.fresh();
        self.push(Inst::Gep {
            dst: dst.clone(),
            ty,
            ptr,
            indices,
        });
        Val::Reg(dst)
    }

    fn icmp(&mut self, pred: Pred, ty: Ty, lhs: Val, rhs: Val) -> Val {
        let dst = self.fresh();
        self.push(Inst::Icmp {
            dst: dst.clone(),
            pred,
            ty,
            lhs,
            rhs,
        });
        Val::Reg(dst)
    }

    fn alloca(&mut self, ty: Ty) -> Val {
        let dst = self.fresh();
        self.allocas.push(Inst::Alloca {
            dst: dst.clone(),
            ty,
        });
        Val::Reg(dst)
    }

    fn push(&mut self, inst: Inst) {
        self.block.insts.push(inst);
    }

    /// Ends the current block unless it already ended.
    fn terminate(&mut self, term: Terminator) {
        if self.block.term.is_none() {
            self.block.term = Some(term);
        }
    }

    /// Opens a new block, falling through into it from the current one.
    fn start(&mut self, label: impl Into<Box<str>>) {
        let label = label.into();
        self.terminate(Terminator::Br(label.clone()));
        let done = std::mem::replace(&mut self.block, BasicBlock::new(label));
        self.blocks.push(done);
    }

    fn fresh(&mut self) -> Box<str> {
        let name = format!("t{}", self.regs);
        self.regs += 1;
        name.into()
    }

    fn ty(&self, id: TypeId) -> Ty {
        lower_ty(self.types, id)
    }

    fn bind(&mut self, name: Symbol, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, binding);
        }
    }

    fn lookup(&self, name: Symbol) -> Result<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).cloned())
            .ok_or_else(|| Error::Logic(format!("unbound variable {}", self.idents.get(name))))
    }
}

fn pred_of(op: BinaryOperator, signed: bool) -> Pred {
    match (op, signed) {
        (BinaryOperator::Eq, _) => Pred::Eq,
        (BinaryOperator::Ne, _) => Pred::Ne,
        (BinaryOperator::Lt, true) => Pred::Slt,
        (BinaryOperator::Le, true) => Pred::Sle,
        (BinaryOperator::Gt, true) => Pred::Sgt,
        (BinaryOperator::Ge, true) => Pred::Sge,
        (BinaryOperator::Lt, false) => Pred::Ult,
        (BinaryOperator::Le, false) => Pred::Ule,
        (BinaryOperator::Gt, false) => Pred::Ugt,
        (BinaryOperator::Ge, false) => Pred::Uge,
        _ => unreachable!("not a comparison"),
    }
}

fn arith_of(op: BinaryOperator, signed: bool) -> BinOp {
    match (op, signed) {
        (BinaryOperator::Add, _) => BinOp::Add,
        (BinaryOperator::Sub, _) => BinOp::Sub,
        (BinaryOperator::Mul, _) => BinOp::Mul,
        (BinaryOperator::Div, true) => BinOp::SDiv,
        (BinaryOperator::Div, false) => BinOp::UDiv,
        (BinaryOperator::Mod, true) => BinOp::SRem,
        (BinaryOperator::Mod, false) => BinOp::URem,
        _ => unreachable!("not arithmetic"),
    }
}

/// Applies an integer cast to a constant, keeping the result in the range
/// LLVM prints for the target width.
fn fold(op: CastOp, n: i64, from_bits: u32, to_bits: u32) -> i64 {
    let truncate = |n: i64, bits: u32| {
        if bits >= 64 {
            n
        } else {
            let shift = 64 - bits;
            (n << shift) >> shift
        }
    };
    match op {
        CastOp::Trunc | CastOp::SExt | CastOp::BitCast => truncate(n, to_bits.min(from_bits)),
        CastOp::ZExt if from_bits >= 64 => n,
        CastOp::ZExt => n & ((1i64 << from_bits) - 1),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{fold, lower_ty};
    use crate::{
        codegen::{
            env::Linux,
            llvm::{CastOp, Module, Ty},
        },
        parser,
        types::TypeId,
    };

    fn lower(src: &str) -> Module {
        let (idents, types, program, errors) = parser::test_utils::parse(src);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        super::lower::<Linux>(&idents, &types, &program.unwrap()).unwrap()
    }

    fn function_text(module: &Module, name: &str) -> String {
        module
            .function(name)
            .unwrap_or_else(|| panic!("no function {name}"))
            .to_string()
    }

    #[test]
    fn hello_world() {
        let module = lower(indoc! {r#"
            proc main() {
                PrintString("Hello, world!\n")
            }
        "#});
        pretty_assertions::assert_eq!(
            module.to_string(),
            indoc! {r#"
                ; ModuleID = 'usercode'
                source_filename = "usercode"
                target triple = "x86_64-unknown-linux-gnu"

                @str.0 = private unnamed_addr constant [15 x i8] c"Hello, world!\0A\00"

                declare void @PrintString({ ptr, i64 })
                declare void @PrintInt(i64)
                declare void @PrintByteSlice({ ptr, i64 })
                declare i64 @Write(i64, { ptr, i64 })
                declare i64 @Read(i64, { ptr, i64 })
                declare i64 @Open({ ptr, i64 })
                declare i64 @Create({ ptr, i64 })
                declare void @Close(i64)
                declare void @Exit(i64)

                define void @main() {
                entry:
                  call void @PrintString({ ptr, i64 } { ptr @str.0, i64 14 })
                  ret void
                }

                define void @__l_main({ ptr, i64 } %args) {
                entry:
                  call void @main()
                  ret void
                }
            "#}
        );
    }

    #[test]
    fn loops_and_branches_get_numbered_blocks() {
        let module = lower(indoc! {r#"
            proc main() {
                mutable i = 3
                while i > 0 {
                    if i == 2 {
                        PrintString("two\n")
                    } else {
                        PrintInt(i)
                    }
                    i = i - 1
                }
            }
        "#});
        let text = function_text(&module, "main");
        for label in [
            "while1init:",
            "while1cond:",
            "while1body:",
            "if2cond:",
            "if2body:",
            "if2else:",
            "if2end:",
            "while1end:",
        ] {
            assert!(text.contains(label), "missing {label} in\n{text}");
        }
        assert!(text.starts_with("define void @main() {\nentry:\n  %t0 = alloca i64\n"));
        assert!(text.contains("br i1 %t2, label %while1body, label %while1end"));
        assert!(text.contains("%t2 = icmp sgt i64 %t1, 0"));
    }

    #[test]
    fn self_calls_in_return_are_tail_calls() {
        let module = lower(indoc! {r#"
            func partial_sum(n int, acc int) int {
                if n == 0 {
                    return acc
                }
                return partial_sum(n - 1, acc + n)
            }
        "#});
        let text = function_text(&module, "partial_sum");
        assert!(text.contains("tail call i64 @partial_sum(i64 %t"), "{text}");
        assert!(text.contains("ret i64 %arg1"));
        assert!(module.function("__l_main").is_none());
    }

    #[test]
    fn sum_types_are_tagged_structs() {
        let module = lower(indoc! {r#"
            type Number = int | bool

            proc show(n Number) {
                match n {
                    case int i:
                        PrintInt(i)
                    case bool:
                        PrintString("bool\n")
                }
            }

            proc main() {
                show(7)
            }
        "#});
        let show = function_text(&module, "show");
        assert!(show.starts_with("define void @show({ i64, { i64, i1 } } %arg0)"));
        assert!(show.contains("switch i64 %t0, label %match1end ["));
        assert!(show.contains("%t1 = extractvalue { i64, { i64, i1 } } %arg0, 1, 0"));
        let main = function_text(&module, "main");
        assert!(main.contains("insertvalue { i64, { i64, i1 } } zeroinitializer, i64 0, 0"));
        assert!(main.contains("i64 7, 1, 0"));
    }

    #[test]
    fn enum_payloads_are_compared_in_order() {
        let module = lower(indoc! {r#"
            data Shape = Circle int | Rect int int | Empty

            func area(s Shape) int {
                match s {
                    case Circle(r):
                        return 3 * r * r
                    case Rect(w, h):
                        return w * h
                    case Empty:
                        return 0
                }
                return 0
            }
        "#});
        let text = function_text(&module, "area");
        assert!(text.starts_with("define i64 @area({ i64, { { i64 }, { i64, i64 }, {} } } %arg0)"));
        for label in ["match1comp0:", "match1body0:", "match1comp1:", "match1body1:", "match1end:"] {
            assert!(text.contains(label), "missing {label} in\n{text}");
        }
        assert!(text.contains("extractvalue { i64, { { i64 }, { i64, i64 }, {} } } %arg0, 1, 1, 1"));
    }

    #[test]
    fn payloadless_enums_switch_on_the_tag() {
        let module = lower(indoc! {r#"
            data Letter = A | B | C

            proc main() {
                let l = B
                match l {
                    case A:
                        PrintString("a")
                    case B:
                        PrintString("b")
                    case C:
                        PrintString("c")
                }
            }
        "#});
        let text = function_text(&module, "main");
        assert!(text.contains("switch i64 %t1, label %match1end ["));
        assert!(text.contains("    i64 1, label %match1case1"));
        assert!(text.contains("match1case1:\n  call void @PrintString({ ptr, i64 } { ptr @str.1, i64 1 })"));
    }

    #[test]
    fn failed_asserts_write_to_stderr_and_exit() {
        let module = lower(indoc! {r#"
            proc main() {
                assert(1 == 2, "math is broken")
            }
        "#});
        let text = module.to_string();
        assert!(text.contains(r#"c"math is broken\0A\00""#));
        assert!(text.contains("assert1fail:\n  %t1 = call i64 @Write(i64 2, { ptr, i64 } { ptr @str.0, i64 15 })\n  call void @Exit(i64 1)\n  unreachable"));
    }

    #[test]
    fn arrays_live_in_stack_slots() {
        let module = lower(indoc! {r#"
            proc main() {
                let xs [3]uint8 = {1, 2, 3}
                let s = xs[1:]
                PrintByteSlice(s)
                PrintInt(xs[2] as int)
            }
        "#});
        let text = function_text(&module, "main");
        assert!(text.contains("alloca [3 x i8]"));
        assert!(text.contains("getelementptr [3 x i8], ptr %t3, i64 0, i64 0"));
        assert!(text.contains("zext i8 %t"));
    }

    #[test]
    fn by_reference_parameters_are_pointers() {
        let module = lower(indoc! {r#"
            proc bump(mutable n int) {
                n = n + 1
            }

            proc main() {
                mutable x = 1
                bump(x)
            }
        "#});
        let bump = function_text(&module, "bump");
        assert!(bump.starts_with("define void @bump(ptr %arg0)"));
        assert!(bump.contains("%t0 = load i64, ptr %arg0"));
        assert!(bump.contains("store i64 %t1, ptr %arg0"));
        let main = function_text(&module, "main");
        assert!(main.contains("call void @bump(ptr %t0)"));
    }

    #[test]
    fn multiple_results_are_structs() {
        let module = lower(indoc! {r#"
            func divmod(a int, b int) (q int, r int) {
                return a / b, a % b
            }

            proc main() {
                let q, r = divmod(17, 5)
                PrintInt(q + r)
            }
        "#});
        let divmod = function_text(&module, "divmod");
        assert!(divmod.starts_with("define { i64, i64 } @divmod(i64 %arg0, i64 %arg1)"));
        assert!(divmod.contains("sdiv i64 %arg0, %arg1"));
        assert!(divmod.contains("srem i64 %arg0, %arg1"));
        let main = function_text(&module, "main");
        assert!(main.contains("%t0 = call { i64, i64 } @divmod(i64 17, i64 5)"));
        assert!(main.contains("%t1 = extractvalue { i64, i64 } %t0, 0"));
    }

    #[test]
    fn main_receives_the_arguments() {
        let module = lower(indoc! {r#"
            proc main(args []string) {
                PrintInt(len(args) as int)
            }
        "#});
        let wrapper = function_text(&module, "__l_main");
        assert!(wrapper.contains("call void @main({ ptr, i64 } %args)"));
    }

    #[test]
    fn constant_casts_fold() {
        assert_eq!(fold(CastOp::Trunc, 256, 64, 8), 0);
        assert_eq!(fold(CastOp::Trunc, 255, 64, 8), -1);
        assert_eq!(fold(CastOp::ZExt, -1, 8, 64), 255);
        assert_eq!(fold(CastOp::SExt, -1, 8, 64), -1);
        assert_eq!(fold(CastOp::ZExt, 1, 1, 64), 1);
    }

    #[test]
    fn type_layouts() {
        let types = crate::types::TypeTable::new();
        assert_eq!(lower_ty(&types, TypeId::BOOL), Ty::I1);
        assert_eq!(lower_ty(&types, TypeId::UINT16), Ty::I16);
        assert_eq!(lower_ty(&types, TypeId::STRING), Ty::slice());
        assert_eq!(lower_ty(&types, TypeId::STRING_SLICE), Ty::slice());
    }
}
