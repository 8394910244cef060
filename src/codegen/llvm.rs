//! An in-memory model of the subset of LLVM IR the back end emits. Every
//! piece renders itself as textual IR through [`Display`](fmt::Display).

use std::fmt;

mod lower;
mod runtime;

pub use lower::lower;
pub use runtime::{runtime, START};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    I1,
    I8,
    I16,
    I32,
    I64,
    Ptr,
    Void,
    Array(u64, Box<Ty>),
    Struct(Vec<Ty>),
}

impl Ty {
    /// `{ ptr, i64 }`, the layout of strings and slices.
    pub fn slice() -> Ty {
        Ty::Struct(vec![Ty::Ptr, Ty::I64])
    }

    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Ty::I1 => Some(1),
            Ty::I8 => Some(8),
            Ty::I16 => Some(16),
            Ty::I32 => Some(32),
            Ty::I64 => Some(64),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Val {
    Int(i64),
    Bool(bool),
    Reg(Box<str>),
    Global(Box<str>),
    Zero,
    Undef,
    /// A constant aggregate.
    Struct(Vec<(Ty, Val)>),
}

impl Val {
    pub fn reg(name: impl Into<Box<str>>) -> Val {
        Val::Reg(name.into())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    BitCast,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inst {
    Binary {
        dst: Box<str>,
        op: BinOp,
        ty: Ty,
        lhs: Val,
        rhs: Val,
    },
    Icmp {
        dst: Box<str>,
        pred: Pred,
        ty: Ty,
        lhs: Val,
        rhs: Val,
    },
    Cast {
        dst: Box<str>,
        op: CastOp,
        from: Ty,
        val: Val,
        to: Ty,
    },
    Alloca {
        dst: Box<str>,
        ty: Ty,
    },
    Load {
        dst: Box<str>,
        ty: Ty,
        ptr: Val,
    },
    Store {
        ty: Ty,
        val: Val,
        ptr: Val,
    },
    ExtractValue {
        dst: Box<str>,
        ty: Ty,
        agg: Val,
        indices: Vec<u32>,
    },
    InsertValue {
        dst: Box<str>,
        ty: Ty,
        agg: Val,
        elem_ty: Ty,
        elem: Val,
        indices: Vec<u32>,
    },
    /// Every index is an `i64`.
    Gep {
        dst: Box<str>,
        ty: Ty,
        ptr: Val,
        indices: Vec<Val>,
    },
    Call {
        dst: Option<Box<str>>,
        tail: bool,
        ret: Ty,
        callee: Box<str>,
        args: Vec<(Ty, Val)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Br(Box<str>),
    CondBr {
        cond: Val,
        then: Box<str>,
        otherwise: Box<str>,
    },
    Switch {
        ty: Ty,
        val: Val,
        default: Box<str>,
        cases: Vec<(i64, Box<str>)>,
    },
    Ret(Option<(Ty, Val)>),
    Unreachable,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub label: Box<str>,
    pub insts: Vec<Inst>,
    pub term: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<Box<str>>) -> BasicBlock {
        BasicBlock {
            label: label.into(),
            insts: Vec::with_capacity(8),
            term: None,
        }
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: Box<str>,
    pub ret: Ty,
    pub params: Vec<(Ty, Box<str>)>,
    pub blocks: Vec<BasicBlock>,
}

#[derive(Debug)]
pub struct Declaration {
    pub name: Box<str>,
    pub ret: Ty,
    pub params: Vec<Ty>,
}

/// A private constant holding the bytes of a string literal and a NUL.
#[derive(Debug)]
pub struct StringGlobal {
    pub name: Box<str>,
    pub bytes: Box<[u8]>,
}

#[derive(Debug)]
pub struct Module {
    pub name: Box<str>,
    pub triple: Box<str>,
    pub strings: Vec<StringGlobal>,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: &str, triple: &str) -> Module {
        Module {
            name: name.into(),
            triple: triple.into(),
            strings: Vec::new(),
            declarations: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| &*f.name == name)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::I1 => f.write_str("i1"),
            Ty::I8 => f.write_str("i8"),
            Ty::I16 => f.write_str("i16"),
            Ty::I32 => f.write_str("i32"),
            Ty::I64 => f.write_str("i64"),
            Ty::Ptr => f.write_str("ptr"),
            Ty::Void => f.write_str("void"),
            Ty::Array(len, elem) => write!(f, "[{len} x {elem}]"),
            Ty::Struct(fields) if fields.is_empty() => f.write_str("{}"),
            Ty::Struct(fields) => {
                f.write_str("{ ")?;
                comma_separated(f, fields)?;
                f.write_str(" }")
            }
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(n) => write!(f, "{n}"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Reg(name) => write!(f, "%{name}"),
            Val::Global(name) => write!(f, "@{name}"),
            Val::Zero => f.write_str("zeroinitializer"),
            Val::Undef => f.write_str("undef"),
            Val::Struct(fields) => {
                f.write_str("{ ")?;
                for (idx, (ty, val)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{ty} {val}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

fn comma_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl BinOp {
    pub const fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::SRem => "srem",
            BinOp::URem => "urem",
        }
    }
}

impl Pred {
    pub const fn name(self) -> &'static str {
        match self {
            Pred::Eq => "eq",
            Pred::Ne => "ne",
            Pred::Slt => "slt",
            Pred::Sle => "sle",
            Pred::Sgt => "sgt",
            Pred::Sge => "sge",
            Pred::Ult => "ult",
            Pred::Ule => "ule",
            Pred::Ugt => "ugt",
            Pred::Uge => "uge",
        }
    }
}

impl CastOp {
    pub const fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::BitCast => "bitcast",
        }
    }
}

fn indices(f: &mut fmt::Formatter<'_>, indices: &[u32]) -> fmt::Result {
    for index in indices {
        write!(f, ", {index}")?;
    }
    Ok(())
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Binary {
                dst,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{dst} = {} {ty} {lhs}, {rhs}", op.name()),
            Inst::Icmp {
                dst,
                pred,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{dst} = icmp {} {ty} {lhs}, {rhs}", pred.name()),
            Inst::Cast {
                dst,
                op,
                from,
                val,
                to,
            } => write!(f, "%{dst} = {} {from} {val} to {to}", op.name()),
            Inst::Alloca { dst, ty } => write!(f, "%{dst} = alloca {ty}"),
            Inst::Load { dst, ty, ptr } => write!(f, "%{dst} = load {ty}, ptr {ptr}"),
            Inst::Store { ty, val, ptr } => write!(f, "store {ty} {val}, ptr {ptr}"),
            Inst::ExtractValue {
                dst,
                ty,
                agg,
                indices: idx,
            } => {
                write!(f, "%{dst} = extractvalue {ty} {agg}")?;
                indices(f, idx)
            }
            Inst::InsertValue {
                dst,
                ty,
                agg,
                elem_ty,
                elem,
                indices: idx,
            } => {
                write!(f, "%{dst} = insertvalue {ty} {agg}, {elem_ty} {elem}")?;
                indices(f, idx)
            }
            Inst::Gep {
                dst,
                ty,
                ptr,
                indices,
            } => {
                write!(f, "%{dst} = getelementptr {ty}, ptr {ptr}")?;
                for index in indices {
                    write!(f, ", i64 {index}")?;
                }
                Ok(())
            }
            Inst::Call {
                dst,
                tail,
                ret,
                callee,
                args,
            } => {
                if let Some(dst) = dst {
                    write!(f, "%{dst} = ")?;
                }
                if *tail {
                    f.write_str("tail ")?;
                }
                write!(f, "call {ret} @{callee}(")?;
                for (idx, (ty, val)) in args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{ty} {val}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Br(label) => write!(f, "br label %{label}"),
            Terminator::CondBr {
                cond,
                then,
                otherwise,
            } => write!(f, "br i1 {cond}, label %{then}, label %{otherwise}"),
            Terminator::Switch {
                ty,
                val,
                default,
                cases,
            } => {
                writeln!(f, "switch {ty} {val}, label %{default} [")?;
                for (value, label) in cases {
                    writeln!(f, "    {ty} {value}, label %{label}")?;
                }
                f.write_str("  ]")
            }
            Terminator::Ret(None) => f.write_str("ret void"),
            Terminator::Ret(Some((ty, val))) => write!(f, "ret {ty} {val}"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        match &self.term {
            Some(term) => writeln!(f, "  {term}"),
            None => writeln!(f, "  unreachable"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.ret, self.name)?;
        for (idx, (ty, name)) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty} %{name}")?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "declare {} @{}(", self.ret, self.name)?;
        comma_separated(f, &self.params)?;
        writeln!(f, ")")
    }
}

impl fmt::Display for StringGlobal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{} = private unnamed_addr constant [{} x i8] c\"",
            self.name,
            self.bytes.len()
        )?;
        for &byte in &*self.bytes {
            match byte {
                b' '..=b'!' | b'#'..=b'[' | b']'..=b'~' => write!(f, "{}", byte as char)?,
                _ => write!(f, "\\{byte:02X}")?,
            }
        }
        writeln!(f, "\"")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;
        writeln!(f, "target triple = \"{}\"", self.triple)?;
        if !self.strings.is_empty() {
            writeln!(f)?;
            for global in &self.strings {
                write!(f, "{global}")?;
            }
        }
        if !self.declarations.is_empty() {
            writeln!(f)?;
            for decl in &self.declarations {
                write!(f, "{decl}")?;
            }
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn renders_types() {
        let enum_ty = Ty::Struct(vec![
            Ty::I64,
            Ty::Struct(vec![Ty::Struct(vec![]), Ty::Struct(vec![Ty::I64, Ty::slice()])]),
        ]);
        assert_eq!(enum_ty.to_string(), "{ i64, { {}, { i64, { ptr, i64 } } } }");
        assert_eq!(Ty::Array(3, Box::new(Ty::I8)).to_string(), "[3 x i8]");
    }

    #[test]
    fn renders_a_function() {
        let mut entry = BasicBlock::new("entry");
        entry.insts.push(Inst::Icmp {
            dst: "t0".into(),
            pred: Pred::Sgt,
            ty: Ty::I64,
            lhs: Val::reg("arg0"),
            rhs: Val::Int(0),
        });
        entry.term = Some(Terminator::CondBr {
            cond: Val::reg("t0"),
            then: "if1body".into(),
            otherwise: "if1end".into(),
        });
        let mut body = BasicBlock::new("if1body");
        body.insts.push(Inst::Call {
            dst: None,
            tail: false,
            ret: Ty::Void,
            callee: "PrintString".into(),
            args: vec![(
                Ty::slice(),
                Val::Struct(vec![(Ty::Ptr, Val::Global("str.0".into())), (Ty::I64, Val::Int(2))]),
            )],
        });
        body.term = Some(Terminator::Br("if1end".into()));
        let mut end = BasicBlock::new("if1end");
        end.term = Some(Terminator::Ret(None));

        let mut module = Module::new("usercode", "x86_64-unknown-linux-gnu");
        module.strings.push(StringGlobal {
            name: "str.0".into(),
            bytes: Box::new(*b"a\n\0"),
        });
        module.declarations.push(Declaration {
            name: "PrintString".into(),
            ret: Ty::Void,
            params: vec![Ty::slice()],
        });
        module.functions.push(Function {
            name: "f".into(),
            ret: Ty::Void,
            params: vec![(Ty::I64, "arg0".into())],
            blocks: vec![entry, body, end],
        });

        pretty_assertions::assert_eq!(
            module.to_string(),
            indoc! {r#"
                ; ModuleID = 'usercode'
                source_filename = "usercode"
                target triple = "x86_64-unknown-linux-gnu"

                @str.0 = private unnamed_addr constant [3 x i8] c"a\0A\00"

                declare void @PrintString({ ptr, i64 })

                define void @f(i64 %arg0) {
                entry:
                  %t0 = icmp sgt i64 %arg0, 0
                  br i1 %t0, label %if1body, label %if1end
                if1body:
                  call void @PrintString({ ptr, i64 } { ptr @str.0, i64 2 })
                  br label %if1end
                if1end:
                  ret void
                }
            "#}
        );
    }
}
