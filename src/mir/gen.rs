use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    ast::{
        self, BinaryOperator, Block, Call, FuncDecl, Pattern, StmtKind, Target, Value, ValueKind,
        Var,
    },
    codegen::Error,
    context::{Builtin, Counters},
    mir::{Cond, Function, Opcode, Program, Register},
    types::{Scalar, TypeId, TypeInfo, TypeKind, TypeTable},
    util::intern::{Interner, Symbol},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Lowers every function of a checked program.
pub fn lower(idents: &Interner, types: &TypeTable, program: &ast::Program) -> Result<Program> {
    let mut strings = Strings::default();
    let mut counters = Counters::default();
    let mut funcs = Vec::with_capacity(program.decls.len());

    for func in program.funcs() {
        let lowered = Lowering {
            idents,
            types,
            strings: &mut strings,
            counters: &mut counters,
            current: func.name.name,
            body: Vec::with_capacity(64),
            scopes: Vec::with_capacity(8),
            returns: Vec::with_capacity(func.returns.len()),
            locals: 0,
            temps: 0,
            largest_call_words: 0,
        }
        .func(func)?;
        trace!(name = &*lowered.name, ops = lowered.body.len(), "lowered function");
        funcs.push(lowered);
    }

    debug!(funcs = funcs.len(), strings = strings.table.len(), "lowered program");
    Ok(Program {
        funcs,
        strings: strings.table,
    })
}

#[derive(Default)]
struct Strings {
    table: Vec<Box<str>>,
    index: HashMap<Box<str>, u32>,
}

impl Strings {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = self.table.len() as u32;
        self.table.push(s.into());
        self.index.insert(s.into(), id);
        id
    }
}

/// Where the words of a variable live.
#[derive(Copy, Clone, Debug)]
enum Slot {
    Local(u32),
    Arg(u32),
    /// The argument word holds the address of the value.
    ArgRef(u32),
}

struct Lowering<'a> {
    idents: &'a Interner,
    types: &'a TypeTable,
    strings: &'a mut Strings,
    counters: &'a mut Counters,
    current: Symbol,
    body: Vec<Opcode>,
    scopes: Vec<HashMap<Symbol, Slot>>,
    /// First result word and type of each return value.
    returns: Vec<(u32, TypeId)>,
    locals: u32,
    temps: u32,
    largest_call_words: u32,
}

impl Lowering<'_> {
    fn func(mut self, func: &FuncDecl) -> Result<Function> {
        self.scopes.push(HashMap::with_capacity(func.params.len()));
        let mut num_args = 0;
        for param in &func.params {
            if param.by_pointer(self.types) {
                self.bind(param.name, Slot::ArgRef(num_args));
                num_args += 1;
            } else {
                self.bind(param.name, Slot::Arg(num_args));
                num_args += self.types.words(param.ty);
            }
        }
        let mut num_rets = 0;
        for ret in &func.returns {
            self.returns.push((num_rets, ret.ty));
            num_rets += self.types.words(ret.ty);
        }

        self.block(&func.body)?;

        Ok(Function {
            name: self.idents.get(func.name.name).into(),
            body: self.body,
            num_args,
            num_rets,
            num_locals: self.locals,
            largest_call_words: self.largest_call_words,
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
                let id = self.alloc(self.types.words(value.ty));
                let dst = self.slot_words(Slot::Local(id), value.ty);
                self.store(value, &dst)?;
                let mut offset = 0;
                for var in names {
                    self.bind(var.name, Slot::Local(id + offset));
                    offset += self.types.words(var.ty);
                }
            }
            StmtKind::Mutable { var, value, .. } => {
                let id = self.alloc(self.types.words(var.ty));
                let dst = self.slot_words(Slot::Local(id), var.ty);
                self.store(value, &dst)?;
                self.bind(var.name, Slot::Local(id));
            }
            StmtKind::Assign {
                target: Target::Var(var),
                value,
            } => {
                let dst = self.var_words(var)?;
                if dst.len() == 1 {
                    let src = self.scalar(value)?;
                    self.mov(src, dst[0].clone());
                } else {
                    // Materialized first, so the value may read the target.
                    let src = self.words_of(value)?;
                    self.copy(src, &dst);
                }
            }
            StmtKind::Assign {
                target: Target::Index { base, index },
                value,
            } => {
                let dst = self.element(base, index, value.contains_call())?;
                self.store(value, &dst)?;
            }
            StmtKind::Return(values) => self.ret(values)?,
            StmtKind::While { cond, body } => {
                let n = self.counters.next_label();
                let head = format!("loop{n}cond");
                let end = format!("loop{n}end");
                self.label(&head);
                self.branch(cond, false, &end)?;
                self.block(body)?;
                self.emit(Opcode::Jmp(head.into()));
                self.label(&end);
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let n = self.counters.next_label();
                let otherwise = format!("if{n}else");
                self.branch(cond, false, &otherwise)?;
                self.block(then_block)?;
                if let Some(else_block) = else_block {
                    let done = format!("if{n}elsedone");
                    self.emit(Opcode::Jmp(done.as_str().into()));
                    self.label(&otherwise);
                    self.block(else_block)?;
                    self.label(&done);
                } else {
                    self.label(&otherwise);
                }
            }
            StmtKind::Match { scrutinee, cases } => self.match_stmt(scrutinee, cases)?,
            StmtKind::Call(call) => {
                self.call(call, false)?;
            }
            StmtKind::Assert { cond, message } => {
                let n = self.counters.next_label();
                let ok = format!("assert{n}ok");
                self.branch(cond, true, &ok)?;
                let text = format!("{}\n", message.as_deref().unwrap_or("assertion failed"));
                let len = i64::try_from(text.len()).unwrap_or(i64::MAX);
                let id = self.strings.intern(&text);
                let written = Register::local(self.alloc(1));
                self.builtin(
                    Builtin::Write,
                    vec![
                        Register::IntLiteral(2),
                        Register::IntLiteral(len),
                        Register::StringLiteral(id),
                    ],
                    vec![written],
                );
                self.builtin(Builtin::Exit, vec![Register::IntLiteral(1)], Vec::new());
                self.label(&ok);
            }
        }
        Ok(())
    }

    fn ret(&mut self, values: &[Value]) -> Result<()> {
        let rets = self.ret_words();
        if let [value] = values {
            let tail = match &value.unbracketed().kind {
                ValueKind::Call(call) if call.callee == self.current => Some(call),
                _ => None,
            };
            if let Some(call) = tail {
                let words = self.call(call, true)?;
                self.copy(words, &rets);
                self.emit(Opcode::Ret);
                return Ok(());
            }
            if self.returns.len() > 1 {
                // A single call supplying every result.
                let words = self.words_of(value)?;
                self.copy(words, &rets);
                self.emit(Opcode::Ret);
                return Ok(());
            }
        }

        let returns = self.returns.clone();
        for (value, (start, ty)) in values.iter().zip(returns) {
            let words = self.types.words(ty) as usize;
            let start = start as usize;
            self.store(value, &rets[start..start + words])?;
        }
        self.emit(Opcode::Ret);
        Ok(())
    }

    fn match_stmt(&mut self, scrutinee: &Value, cases: &[ast::Case]) -> Result<()> {
        let n = self.counters.next_label();
        let end = format!("match{n}end");

        // Case bindings alias this copy, so assignments in a case body can't
        // change them.
        let ty = scrutinee.ty;
        let id = self.alloc(self.types.words(ty));
        let words = self.slot_words(Slot::Local(id), ty);
        self.store(scrutinee, &words)?;
        let Some(tag) = words.first().cloned() else {
            return Err(Error::Logic("match on a value without words".into()));
        };

        for (k, case) in cases.iter().enumerate() {
            let pattern = match &case.pattern {
                Pattern::Ctor { index, .. } | Pattern::Alt { index, .. } => {
                    Register::IntLiteral(i64::from(*index))
                }
                Pattern::Value(value) => self.scalar(value)?,
            };
            self.emit(Opcode::Jump {
                cond: Cond::Eq,
                src: tag.clone(),
                dst: pattern,
                label: format!("match{n}case{k}").into(),
            });
        }
        self.emit(Opcode::Jmp(end.as_str().into()));

        for (k, case) in cases.iter().enumerate() {
            self.label(&format!("match{n}case{k}"));
            self.scopes.push(HashMap::with_capacity(2));
            match &case.pattern {
                Pattern::Ctor {
                    index, bindings, ..
                } => {
                    let TypeKind::Enum(defn) = self.types.kind(ty) else {
                        return Err(Error::Logic("constructor pattern on a non-enum".into()));
                    };
                    let fields = &defn.ctors[*index as usize].fields;
                    let offsets = self.types.ctor_field_offsets(fields);
                    for (var, offset) in bindings.iter().zip(offsets) {
                        self.bind(var.name, Slot::Local(id + offset));
                    }
                }
                Pattern::Alt {
                    binding: Some(var), ..
                } => self.bind(var.name, Slot::Local(id + 1)),
                Pattern::Alt { binding: None, .. } | Pattern::Value(_) => {}
            }
            self.block(&case.body)?;
            self.scopes.pop();
            self.emit(Opcode::Jmp(end.as_str().into()));
        }
        self.label(&end);
        Ok(())
    }

    /// Jumps to `label` when `cond` evaluates to `when`.
    fn branch(&mut self, cond: &Value, when: bool, label: &str) -> Result<()> {
        match &cond.kind {
            ValueKind::Brackets(inner) => self.branch(inner, when, label),
            ValueKind::Bool(b) => {
                if *b == when {
                    self.emit(Opcode::Jmp(label.into()));
                }
                Ok(())
            }
            ValueKind::Binary { op, lhs, rhs } if op.is_comparison() => {
                let (src, dst) = self.operands(lhs, rhs)?;
                let op = if when { *op } else { op.inverse() };
                self.emit(Opcode::Jump {
                    cond: cond_of(op),
                    src,
                    dst,
                    label: label.into(),
                });
                Ok(())
            }
            _ => {
                let src = self.scalar(cond)?;
                self.emit(Opcode::Jump {
                    cond: if when { Cond::Ne } else { Cond::Eq },
                    src,
                    dst: Register::IntLiteral(0),
                    label: label.into(),
                });
                Ok(())
            }
        }
    }

    /// Evaluates both operands of a binary operator. A left operand which
    /// would have to survive a call made by the right one is kept in a local.
    fn operands(&mut self, lhs: &Value, rhs: &Value) -> Result<(Register, Register)> {
        let left = self.scalar(lhs)?;
        let left = self.simple(left, rhs.contains_call());
        let right = self.scalar(rhs)?;
        Ok((left, right))
    }

    /// Evaluates a one-word value into a register usable as an operand.
    fn scalar(&mut self, value: &Value) -> Result<Register> {
        match &value.kind {
            ValueKind::Int(n) => Ok(Register::IntLiteral(*n as i64)),
            ValueKind::Bool(b) => Ok(Register::IntLiteral(i64::from(*b))),
            ValueKind::Brackets(inner) => self.scalar(inner),
            ValueKind::Binary { op, lhs, rhs } if op.is_comparison() => {
                let n = self.counters.next_label();
                let done = format!("bool{n}done");
                let (src, dst) = self.operands(lhs, rhs)?;
                let out = self.temp();
                self.emit(Opcode::Mov {
                    src: Register::IntLiteral(1),
                    dst: out.clone(),
                });
                self.emit(Opcode::Jump {
                    cond: cond_of(*op),
                    src,
                    dst,
                    label: done.as_str().into(),
                });
                self.emit(Opcode::Mov {
                    src: Register::IntLiteral(0),
                    dst: out.clone(),
                });
                self.label(&done);
                Ok(out)
            }
            ValueKind::Binary { op, lhs, rhs } => {
                let (left, right) = self.operands(lhs, rhs)?;
                let dst = self.temp();
                self.emit(arith(*op, left, right, dst.clone()));
                Ok(dst)
            }
            ValueKind::Neg(inner) => {
                let right = self.scalar(inner)?;
                let dst = self.temp();
                self.emit(Opcode::Sub {
                    left: Register::IntLiteral(0),
                    right,
                    dst: dst.clone(),
                });
                Ok(dst)
            }
            ValueKind::EnumOption { index, .. } if self.types.words(value.ty) == 1 => {
                Ok(Register::IntLiteral(i64::from(*index)))
            }
            ValueKind::Len(inner) => match self.types.kind(inner.ty) {
                TypeKind::Array { len, .. } => Ok(Register::IntLiteral(
                    i64::try_from(*len).unwrap_or(i64::MAX),
                )),
                _ => {
                    let words = self.words_of(inner)?;
                    let len = first(words)?;
                    Ok(self.simple(len, false))
                }
            },
            _ => {
                let words = self.words_of(value)?;
                if words.len() != 1 {
                    return Err(Error::Logic(format!(
                        "expected a one word value, got {} words",
                        words.len()
                    )));
                }
                let word = first(words)?;
                Ok(self.simple(word, false))
            }
        }
    }

    /// The registers holding each word of a value. Values which don't live
    /// anywhere yet are materialized into fresh locals.
    fn words_of(&mut self, value: &Value) -> Result<Vec<Register>> {
        match &value.kind {
            ValueKind::Int(_)
            | ValueKind::Bool(_)
            | ValueKind::Binary { .. }
            | ValueKind::Neg(_)
            | ValueKind::Len(_) => Ok(vec![self.scalar(value)?]),
            ValueKind::String(s) => {
                let len = i64::try_from(s.len()).unwrap_or(i64::MAX);
                let id = self.strings.intern(s);
                Ok(vec![Register::IntLiteral(len), Register::StringLiteral(id)])
            }
            ValueKind::Var(var) => self.var_words(var),
            ValueKind::Call(call) => self.call(call, false),
            ValueKind::Brackets(inner) | ValueKind::Cast(inner) => self.words_of(inner),
            ValueKind::Index { base, index } => self.element(base, index, false),
            ValueKind::Field { base, index } => {
                let TypeKind::Tuple(fields) = self.types.kind(base.ty) else {
                    return Err(Error::Logic("field of a non-tuple".into()));
                };
                let start: u32 = fields[..*index as usize]
                    .iter()
                    .map(|f| self.types.words(f.ty))
                    .sum();
                let len = self.types.words(fields[*index as usize].ty);
                let words = self.words_of(base)?;
                Ok(words[start as usize..(start + len) as usize].to_vec())
            }
            ValueKind::ArrayLiteral(_)
            | ValueKind::Slice { .. }
            | ValueKind::EnumOption { .. }
            | ValueKind::EnumValue { .. }
            | ValueKind::Tuple(_)
            | ValueKind::Wrap { .. } => {
                let id = self.alloc(self.types.words(value.ty));
                let words = self.slot_words(Slot::Local(id), value.ty);
                self.store(value, &words)?;
                Ok(words)
            }
        }
    }

    /// Writes every word of `value` into `dst`.
    fn store(&mut self, value: &Value, dst: &[Register]) -> Result<()> {
        match &value.kind {
            ValueKind::Brackets(inner) => self.store(inner, dst),
            ValueKind::ArrayLiteral(values) => match self.types.kind(value.ty) {
                TypeKind::Slice { elem } => {
                    let elem = *elem;
                    let storage = self.alloc(self.array_words(elem, values.len() as u64));
                    let base = Register::Address(Box::new(Register::local(storage)));
                    self.store_elements(values, elem, base)?;
                    let len = i64::try_from(values.len()).unwrap_or(i64::MAX);
                    self.mov(Register::IntLiteral(len), dst[0].clone());
                    let ptr = self.simple(
                        Register::Address(Box::new(Register::local(storage))),
                        false,
                    );
                    self.mov(ptr, dst[1].clone());
                    Ok(())
                }
                TypeKind::Array { elem, .. } => {
                    let elem = *elem;
                    if dst.is_empty() {
                        return Ok(());
                    }
                    if self.types.is_byte_sized(elem) {
                        let keep = values.iter().any(Value::contains_call);
                        let base = self.address_of(&dst[0], keep);
                        self.store_elements(values, elem, base)
                    } else {
                        let w = self.types.words(elem) as usize;
                        for (k, value) in values.iter().enumerate() {
                            self.store(value, &dst[k * w..(k + 1) * w])?;
                        }
                        Ok(())
                    }
                }
                _ => Err(Error::Logic("array literal of a non-array type".into())),
            },
            ValueKind::Tuple(values) => {
                let mut offset = 0;
                for value in values {
                    let w = self.types.words(value.ty) as usize;
                    self.store(value, &dst[offset..offset + w])?;
                    offset += w;
                }
                Ok(())
            }
            ValueKind::EnumOption { index, .. } => {
                self.mov(Register::IntLiteral(i64::from(*index)), dst[0].clone());
                Ok(())
            }
            ValueKind::EnumValue { index, args, .. } => {
                let TypeKind::Enum(defn) = self.types.kind(value.ty) else {
                    return Err(Error::Logic("constructor of a non-enum".into()));
                };
                let fields = defn.ctors[*index as usize].fields.clone();
                let offsets = self.types.ctor_field_offsets(&fields);
                self.mov(Register::IntLiteral(i64::from(*index)), dst[0].clone());
                for ((arg, field), offset) in args.iter().zip(fields.iter()).zip(offsets) {
                    let w = self.types.words(*field);
                    let offset = offset as usize;
                    self.store(arg, &dst[offset..offset + w as usize])?;
                }
                Ok(())
            }
            ValueKind::Wrap { index, inner } => {
                self.mov(Register::IntLiteral(i64::from(*index)), dst[0].clone());
                let w = self.types.words(inner.ty) as usize;
                self.store(inner, &dst[1..=w])
            }
            ValueKind::Slice { base, lo, hi } => self.slice(base, lo.as_deref(), hi.as_deref(), dst),
            _ if dst.len() == 1 => {
                let src = self.scalar(value)?;
                self.mov(src, dst[0].clone());
                Ok(())
            }
            _ => {
                let src = self.words_of(value)?;
                self.copy(src, dst);
                Ok(())
            }
        }
    }

    /// Stores each value as an element of the array starting at `base`.
    fn store_elements(&mut self, values: &[Value], elem: TypeId, base: Register) -> Result<()> {
        let info = self.word_info(elem);
        let bytes = self.types.is_byte_sized(elem);
        let w = self.types.words(elem);
        for (k, value) in values.iter().enumerate() {
            let k = k as u32;
            if bytes {
                let src = self.scalar(value)?;
                let dst = Register::Offset {
                    base: Box::new(base.clone()),
                    index: Box::new(Register::IntLiteral(i64::from(k))),
                    scale: 1,
                    disp: 0,
                    info,
                };
                self.mov(src, dst);
            } else {
                let dst: Vec<Register> = (0..w)
                    .map(|j| Register::Offset {
                        base: Box::new(base.clone()),
                        index: Box::new(Register::IntLiteral(i64::from(k * w + j))),
                        scale: 8,
                        disp: 0,
                        info: if w == 1 { info } else { TypeInfo::WORD },
                    })
                    .collect();
                self.store(value, &dst)?;
            }
        }
        Ok(())
    }

    fn slice(
        &mut self,
        base: &Var,
        lo: Option<&Value>,
        hi: Option<&Value>,
        dst: &[Register],
    ) -> Result<()> {
        let hi_calls = hi.is_some_and(Value::contains_call);
        let lo = match lo {
            Some(lo) => {
                let lo = self.scalar(lo)?;
                Some(self.simple(lo, hi_calls))
            }
            None => None,
        };
        let hi = match hi {
            Some(hi) => Some(self.scalar(hi)?),
            None => None,
        };

        let (len, ptr, elem) = match self.types.kind(base.ty) {
            TypeKind::Array { elem, len } => (
                Register::IntLiteral(i64::try_from(*len).unwrap_or(i64::MAX)),
                self.var_address(base)?,
                *elem,
            ),
            TypeKind::Slice { elem } => {
                let elem = *elem;
                let words = self.var_words(base)?;
                let mut words = words.into_iter();
                let (Some(len), Some(ptr)) = (words.next(), words.next()) else {
                    return Err(Error::Logic("slice without two words".into()));
                };
                (len, ptr, elem)
            }
            TypeKind::Scalar(Scalar::String) => {
                let words = self.var_words(base)?;
                let mut words = words.into_iter();
                let (Some(len), Some(ptr)) = (words.next(), words.next()) else {
                    return Err(Error::Logic("string without two words".into()));
                };
                (len, ptr, TypeId::UINT8)
            }
            _ => return Err(Error::Logic("slice of a non-sequence".into())),
        };

        let hi = match hi {
            Some(hi) => hi,
            None => self.simple(len, false),
        };
        let new_len = match (&lo, &hi) {
            (None, hi) => hi.clone(),
            (Some(Register::IntLiteral(l)), Register::IntLiteral(h)) => {
                Register::IntLiteral(h - l)
            }
            (Some(lo), hi) => {
                let out = self.temp();
                self.emit(Opcode::Sub {
                    left: hi.clone(),
                    right: lo.clone(),
                    dst: out.clone(),
                });
                out
            }
        };
        self.mov(new_len, dst[0].clone());

        let ptr = self.simple(ptr, false);
        let new_ptr = match lo {
            None | Some(Register::IntLiteral(0)) => ptr,
            Some(lo) => {
                let size = if self.types.is_byte_sized(elem) {
                    1
                } else {
                    i64::from(self.types.words(elem)) * 8
                };
                let offset = self.temp();
                self.emit(Opcode::Mul {
                    left: lo,
                    right: Register::IntLiteral(size),
                    dst: offset.clone(),
                });
                let out = self.temp();
                self.emit(Opcode::Add {
                    left: ptr,
                    right: offset,
                    dst: out.clone(),
                });
                out
            }
        };
        self.mov(new_ptr, dst[1].clone());
        Ok(())
    }

    /// The words of an element of an array, slice or string variable. With
    /// `keep`, the computed address survives calls.
    fn element(&mut self, base: &Var, index: &Value, keep: bool) -> Result<Vec<Register>> {
        let index = self.scalar(index)?;
        let index = self.simple(index, keep);
        let (addr, elem) = match self.types.kind(base.ty) {
            TypeKind::Array { elem, .. } => (self.var_address(base)?, *elem),
            TypeKind::Slice { elem } => {
                let elem = *elem;
                (first(self.var_words(base)?.into_iter().skip(1).collect())?, elem)
            }
            TypeKind::Scalar(Scalar::String) => (
                first(self.var_words(base)?.into_iter().skip(1).collect())?,
                TypeId::UINT8,
            ),
            _ => return Err(Error::Logic("index of a non-sequence".into())),
        };
        let addr = self.simple_base(addr, keep);

        let info = self.word_info(elem);
        if self.types.is_byte_sized(elem) {
            return Ok(vec![Register::Offset {
                base: Box::new(addr),
                index: Box::new(index),
                scale: 1,
                disp: 0,
                info,
            }]);
        }
        let w = self.types.words(elem);
        let (index, scale) = if w == 1 {
            (index, 8)
        } else {
            let scaled = if keep {
                Register::local(self.alloc(1))
            } else {
                self.temp()
            };
            self.emit(Opcode::Mul {
                left: index,
                right: Register::IntLiteral(i64::from(w) * 8),
                dst: scaled.clone(),
            });
            (scaled, 1)
        };
        Ok((0..w)
            .map(|j| Register::Offset {
                base: Box::new(addr.clone()),
                index: Box::new(index.clone()),
                scale,
                disp: (j * 8) as i32,
                info: if w == 1 { info } else { TypeInfo::WORD },
            })
            .collect())
    }

    fn call(&mut self, call: &Call, tail: bool) -> Result<Vec<Register>> {
        let keep = call.args.iter().any(Value::contains_call);
        let mut args = Vec::with_capacity(call.args.len() * 2);
        for (param, arg) in call.params.iter().zip(&call.args) {
            if param.by_pointer(self.types) {
                let ValueKind::Var(var) = &arg.unbracketed().kind else {
                    return Err(Error::Logic("by-reference argument is not a variable".into()));
                };
                args.push(self.var_address(var)?);
                continue;
            }
            if let (true, TypeKind::Array { len, .. }) =
                (self.types.is_slice(param.ty), self.types.kind(arg.ty))
            {
                let len = i64::try_from(*len).unwrap_or(i64::MAX);
                let words = self.words_of(arg)?;
                let ptr = match words.first() {
                    Some(word) => self.address_of(word, keep),
                    None => Register::IntLiteral(0),
                };
                args.push(Register::IntLiteral(len));
                args.push(ptr);
                continue;
            }
            for word in self.words_of(arg)? {
                args.push(self.simple(word, keep));
            }
        }

        let mut rets = Vec::with_capacity(call.returns.len());
        for &ty in &call.returns {
            let id = self.alloc(self.types.words(ty));
            rets.extend(self.slot_words(Slot::Local(id), ty));
        }
        let target = match call.builtin {
            Some(builtin) => builtin.symbol(),
            None => self.idents.get(call.callee),
        };
        self.push_call(target, args, rets.clone(), tail);
        Ok(rets)
    }

    fn builtin(&mut self, builtin: Builtin, args: Vec<Register>, rets: Vec<Register>) {
        self.push_call(builtin.symbol(), args, rets, false);
    }

    fn push_call(&mut self, target: &str, args: Vec<Register>, rets: Vec<Register>, tail: bool) {
        let words = (args.len() + rets.len()) as u32;
        self.largest_call_words = self.largest_call_words.max(words);
        self.emit(Opcode::Call {
            target: target.into(),
            args,
            rets,
            tail,
        });
    }
}

/// Registers and storage.
impl Lowering<'_> {
    fn emit(&mut self, op: Opcode) {
        self.body.push(op);
    }

    fn label(&mut self, name: &str) {
        self.emit(Opcode::Label(name.into()));
    }

    fn alloc(&mut self, words: u32) -> u32 {
        let id = self.locals;
        self.locals += words;
        id
    }

    fn temp(&mut self) -> Register {
        let id = self.temps;
        self.temps += 1;
        Register::temp(id)
    }

    fn bind(&mut self, name: Symbol, slot: Slot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, slot);
        }
    }

    fn lookup(&self, name: Symbol) -> Result<Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
            .ok_or_else(|| Error::Logic(format!("unbound variable `{}`", self.idents.get(name))))
    }

    /// The width and signedness of a one-word value of type `ty`.
    fn word_info(&self, ty: TypeId) -> TypeInfo {
        match self.types.scalar(ty) {
            Some(scalar) if scalar != Scalar::String => scalar.info(),
            _ => TypeInfo::WORD,
        }
    }

    fn array_words(&self, elem: TypeId, len: u64) -> u32 {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if self.types.is_byte_sized(elem) {
            len.div_ceil(8)
        } else {
            len.saturating_mul(self.types.words(elem))
        }
    }

    fn slot_words(&self, slot: Slot, ty: TypeId) -> Vec<Register> {
        let n = self.types.words(ty);
        let info = if n == 1 {
            self.word_info(ty)
        } else {
            TypeInfo::WORD
        };
        (0..n)
            .map(|k| match slot {
                Slot::Local(id) => Register::LocalValue { id: id + k, info },
                Slot::Arg(index) => Register::FuncArg {
                    index: index + k,
                    info,
                    by_ref: false,
                },
                Slot::ArgRef(index) => {
                    let base = Register::FuncArg {
                        index,
                        info: TypeInfo::WORD,
                        by_ref: true,
                    };
                    if k == 0 {
                        Register::Pointer(Box::new(base))
                    } else {
                        Register::Offset {
                            base: Box::new(base),
                            index: Box::new(Register::IntLiteral(0)),
                            scale: 1,
                            disp: (k * 8) as i32,
                            info,
                        }
                    }
                }
            })
            .collect()
    }

    fn var_words(&self, var: &Var) -> Result<Vec<Register>> {
        let slot = self.lookup(var.name)?;
        Ok(self.slot_words(slot, var.ty))
    }

    /// A register holding the address of the first word of a variable.
    fn var_address(&self, var: &Var) -> Result<Register> {
        Ok(match self.lookup(var.name)? {
            Slot::Local(id) => Register::Address(Box::new(Register::local(id))),
            Slot::Arg(index) => Register::Address(Box::new(Register::FuncArg {
                index,
                info: TypeInfo::WORD,
                by_ref: false,
            })),
            Slot::ArgRef(index) => Register::FuncArg {
                index,
                info: TypeInfo::WORD,
                by_ref: true,
            },
        })
    }

    fn ret_words(&self) -> Vec<Register> {
        let mut words = Vec::with_capacity(self.returns.len());
        for &(start, ty) in &self.returns {
            let n = self.types.words(ty);
            let info = if n == 1 {
                self.word_info(ty)
            } else {
                TypeInfo::WORD
            };
            words.extend((0..n).map(|k| Register::FuncRetVal {
                index: start + k,
                info,
            }));
        }
        words
    }

    /// A register holding the address of the memory `word` names.
    fn address_of(&mut self, word: &Register, keep: bool) -> Register {
        match word {
            Register::LocalValue { .. } | Register::FuncArg { .. } | Register::FuncRetVal { .. } => {
                Register::Address(Box::new(word.clone()))
            }
            Register::Pointer(inner) => (**inner).clone(),
            _ => self.simple(Register::Address(Box::new(word.clone())), keep),
        }
    }

    /// Makes `reg` usable as an operand of arithmetic, jumps and calls. With
    /// `keep`, the result is a local, which survives calls.
    fn simple(&mut self, reg: Register, keep: bool) -> Register {
        if reg.is_literal() {
            return reg;
        }
        let loaded = reg.is_indirect() || matches!(reg, Register::Address(_));
        if !keep && !loaded {
            return reg;
        }
        let dst = if keep {
            Register::local(self.alloc(1))
        } else {
            self.temp()
        };
        self.mov(reg, dst.clone());
        dst
    }

    /// Like [`Lowering::simple`], but addresses of frame slots are kept as
    /// they are, since the back end materializes them when forming an
    /// address.
    fn simple_base(&mut self, reg: Register, keep: bool) -> Register {
        let as_is = match &reg {
            Register::Address(inner) => !inner.is_indirect(),
            Register::TempValue(_) => !keep,
            Register::LocalValue { .. } | Register::FuncArg { .. } => true,
            _ => false,
        };
        if as_is {
            reg
        } else {
            self.simple(reg, keep)
        }
    }

    /// Emits a move, going through a temporary when both sides are memory
    /// and one of them is indirect.
    fn mov(&mut self, src: Register, dst: Register) {
        let direct = |r: &Register| r.is_temp() || r.is_literal();
        let through_temp = (dst.is_indirect() && !direct(&src))
            || (src.is_indirect() && !dst.is_temp());
        if through_temp {
            let tmp = self.temp();
            self.emit(Opcode::Mov {
                src,
                dst: tmp.clone(),
            });
            self.emit(Opcode::Mov { src: tmp, dst });
        } else {
            self.emit(Opcode::Mov { src, dst });
        }
    }

    fn copy(&mut self, src: Vec<Register>, dst: &[Register]) {
        for (src, dst) in src.into_iter().zip(dst) {
            if src != *dst {
                self.mov(src, dst.clone());
            }
        }
    }
}

fn first(words: Vec<Register>) -> Result<Register> {
    words
        .into_iter()
        .next()
        .ok_or_else(|| Error::Logic("value without words".into()))
}

fn cond_of(op: BinaryOperator) -> Cond {
    match op {
        BinaryOperator::Lt => Cond::Lt,
        BinaryOperator::Le => Cond::Le,
        BinaryOperator::Eq => Cond::Eq,
        BinaryOperator::Ne => Cond::Ne,
        BinaryOperator::Ge => Cond::Ge,
        _ => Cond::Gt,
    }
}

fn arith(op: BinaryOperator, left: Register, right: Register, dst: Register) -> Opcode {
    match op {
        BinaryOperator::Add => Opcode::Add { left, right, dst },
        BinaryOperator::Sub => Opcode::Sub { left, right, dst },
        BinaryOperator::Mul => Opcode::Mul { left, right, dst },
        BinaryOperator::Div => Opcode::Div { left, right, dst },
        _ => Opcode::Mod { left, right, dst },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use indoc::indoc;

    use crate::{
        mir::{Opcode, Program, Register},
        parser,
    };

    fn lower(src: &str) -> Program {
        let (idents, types, program, errors) = parser::test_utils::parse(src);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        super::lower(&idents, &types, &program.unwrap()).unwrap()
    }

    const PROGRAM: &str = indoc! {r#"
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

        func divmod(a int, b int) (q int, r int) {
            return a / b, a % b
        }

        proc fill(mutable buf []byte, n int) {
            mutable i = 0
            while i < n {
                buf[i] = 65
                i = i + 1
            }
        }

        proc bump(mutable n int) {
            n = n + area(Rect(2, 3))
        }

        proc main() {
            mutable total = 0
            let xs = {1, 2, 3}
            let bytes [4]byte = {1, 2, 3, 4}
            let s = bytes[1:3]
            let q, r = divmod(17, 5)
            bump(total)
            total = total + xs[2] * area(Circle(q)) + len(s) as int
            if total > 100 {
                PrintInt(total)
            } else if total == 0 {
                PrintString("zero\n")
            }
            assert(total >= 0, "negative total")
            fill(s, 2)
            PrintByteSlice(s)
        }
    "#};

    #[test]
    fn every_register_is_declared() {
        let program = lower(PROGRAM);
        for func in &program.funcs {
            let mut defined = HashSet::new();
            let mut last_use = HashMap::new();
            for (idx, op) in func.body.iter().enumerate() {
                for temp in op.temps_read() {
                    assert!(defined.contains(&temp), "{}: t{temp} read before written", func.name);
                    last_use.insert(temp, idx);
                }
                defined.extend(op.temps_written());
            }
            for (idx, op) in func.body.iter().enumerate() {
                for reg in op.registers() {
                    check_bounds(func, reg);
                }
                if let Opcode::Call { .. } = op {
                    let live: Vec<_> = last_use
                        .iter()
                        .filter(|(temp, last)| {
                            **last > idx
                                && func.body[..idx]
                                    .iter()
                                    .any(|op| op.temps_written().contains(*temp))
                        })
                        .collect();
                    assert!(live.is_empty(), "{}: temporaries live across a call: {live:?}", func.name);
                }
            }
        }
    }

    fn check_bounds(func: &crate::mir::Function, reg: &Register) {
        match reg {
            Register::FuncArg { index, .. } => assert!(*index < func.num_args, "{}: {reg}", func.name),
            Register::FuncRetVal { index, .. } => {
                assert!(*index < func.num_rets, "{}: {reg}", func.name);
            }
            Register::LocalValue { id, .. } => assert!(*id < func.num_locals, "{}: {reg}", func.name),
            Register::Pointer(inner) | Register::Address(inner) => check_bounds(func, inner),
            Register::Offset { base, index, .. } => {
                check_bounds(func, base);
                check_bounds(func, index);
            }
            _ => {}
        }
    }

    #[test]
    fn labels_are_unique_and_defined() {
        let program = lower(PROGRAM);
        let mut seen = HashSet::new();
        for func in &program.funcs {
            let defined: HashSet<&str> = func
                .body
                .iter()
                .filter_map(|op| match op {
                    Opcode::Label(label) => Some(&**label),
                    _ => None,
                })
                .collect();
            for op in &func.body {
                match op {
                    Opcode::Label(label) => assert!(seen.insert(label.clone()), "duplicate {label}"),
                    Opcode::Jmp(label) | Opcode::Jump { label, .. } => {
                        assert!(defined.contains(&**label), "{}: undefined {label}", func.name);
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn hello_world() {
        let program = lower(r#"proc main() { PrintString("Hello, world!\n") }"#);
        assert_eq!(
            program.to_string(),
            "str0 = \"Hello, world!\\n\"\n\nmain (args 0, rets 0, locals 0, call 2):\n    call PrintString($14, $str0)\n"
        );
    }

    #[test]
    fn countdown() {
        let program = lower(indoc! {"
            proc main() {
                mutable n = 5
                while n > 0 {
                    PrintInt(n)
                    n = n - 1
                }
            }
        "});
        pretty_assertions::assert_eq!(
            program.funcs[0].to_string(),
            indoc! {"
                main (args 0, rets 0, locals 1, call 1):
                    mov $5, l0
                loop1cond:
                    jle l0, $0, loop1end
                    call PrintInt(l0)
                    sub l0, $1, t0
                    mov t0, l0
                    jmp loop1cond
                loop1end:
            "}
        );
    }

    #[test]
    fn enum_match_binds_payload_words() {
        let program = lower(indoc! {r#"
            data E = A | B int

            proc main() {
                let x = B(7)
                match x {
                    case A:
                        PrintString("a")
                    case B(n):
                        PrintInt(n)
                }
            }
        "#});
        pretty_assertions::assert_eq!(
            program.funcs[0].to_string(),
            indoc! {r#"
                main (args 0, rets 0, locals 4, call 2):
                    mov $1, l0
                    mov $7, l1
                    mov l0, l2
                    mov l1, l3
                    je l2, $0, match1case0
                    je l2, $1, match1case1
                    jmp match1end
                match1case0:
                    call PrintString($1, $str0)
                    jmp match1end
                match1case1:
                    call PrintInt(l3)
                    jmp match1end
                match1end:
            "#}
        );
    }

    #[test]
    fn self_calls_in_return_are_tail_calls() {
        let program = lower(indoc! {"
            func partial_sum(n int, acc int) int {
                if n == 0 {
                    return acc
                }
                return partial_sum(n - 1, acc + n)
            }
        "});
        let text = program.funcs[0].to_string();
        assert!(text.contains("tail call partial_sum(t"), "{text}");
        assert!(text.contains("mov a1, r0"), "{text}");
    }

    #[test]
    fn by_reference_parameters_are_pointers() {
        let program = lower(indoc! {"
            proc bump(mutable n int) {
                n = n + 1
            }

            proc main() {
                mutable x = 1
                bump(x)
            }
        "});
        pretty_assertions::assert_eq!(
            program.to_string(),
            indoc! {"

                bump (args 1, rets 0, locals 0, call 0):
                    mov *a0&, t0
                    add t0, $1, t1
                    mov t1, *a0&

                main (args 0, rets 0, locals 1, call 1):
                    mov $1, l0
                    call bump(&l0)
            "}
        );
    }
}
