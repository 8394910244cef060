//! The mid-level IR consumed by the assembly back end.
//!
//! Every register names one 64-bit word. Values wider than a word (strings,
//! slices, tuples, enums and arrays) occupy consecutive ids, so a local of
//! type `string` named `s` bound at id 3 also owns id 4.

use std::fmt;

use crate::types::TypeInfo;

mod gen;

pub use gen::lower;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Register {
    IntLiteral(i64),
    /// Address of the bytes of an entry of [`Program::strings`].
    StringLiteral(u32),
    FuncArg {
        index: u32,
        info: TypeInfo,
        by_ref: bool,
    },
    FuncRetVal {
        index: u32,
        info: TypeInfo,
    },
    LocalValue {
        id: u32,
        info: TypeInfo,
    },
    TempValue(u32),
    /// The word at the address held by the inner register.
    Pointer(Box<Register>),
    /// The memory at `base + index * scale + disp`, where `base` holds an
    /// address. A one byte `info` reads a byte, anything else a word.
    Offset {
        base: Box<Register>,
        index: Box<Register>,
        scale: u8,
        disp: i32,
        info: TypeInfo,
    },
    /// The address of a memory register.
    Address(Box<Register>),
}

impl Register {
    pub const fn temp(id: u32) -> Register {
        Register::TempValue(id)
    }

    pub const fn local(id: u32) -> Register {
        Register::LocalValue {
            id,
            info: TypeInfo::WORD,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Register::IntLiteral(_) | Register::StringLiteral(_))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Register::TempValue(_))
    }

    /// Whether accessing the register dereferences a computed address.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Register::Pointer(_) | Register::Offset { .. })
    }

    /// Every temporary read when this register is accessed.
    pub fn temps(&self, out: &mut Vec<u32>) {
        match self {
            Register::TempValue(id) => out.push(*id),
            Register::Pointer(inner) | Register::Address(inner) => inner.temps(out),
            Register::Offset { base, index, .. } => {
                base.temps(out);
                index.temps(out);
            }
            _ => {}
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    pub const fn name(self) -> &'static str {
        match self {
            Cond::Eq => "je",
            Cond::Ne => "jne",
            Cond::Lt => "jl",
            Cond::Le => "jle",
            Cond::Gt => "jg",
            Cond::Ge => "jge",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Mov {
        src: Register,
        dst: Register,
    },
    Add {
        left: Register,
        right: Register,
        dst: Register,
    },
    Sub {
        left: Register,
        right: Register,
        dst: Register,
    },
    Mul {
        left: Register,
        right: Register,
        dst: Register,
    },
    Div {
        left: Register,
        right: Register,
        dst: Register,
    },
    Mod {
        left: Register,
        right: Register,
        dst: Register,
    },
    /// Arguments are copied to the outgoing area before the call, results
    /// are copied out of it afterwards.
    Call {
        target: Box<str>,
        args: Vec<Register>,
        rets: Vec<Register>,
        /// Advisory; back ends may ignore it.
        tail: bool,
    },
    Ret,
    Jmp(Box<str>),
    /// Jumps to `label` if `src <cond> dst`.
    Jump {
        cond: Cond,
        src: Register,
        dst: Register,
        label: Box<str>,
    },
    Label(Box<str>),
}

impl Opcode {
    /// Every register the opcode mentions, sources first.
    pub fn registers(&self) -> Vec<&Register> {
        match self {
            Opcode::Mov { src, dst } => vec![src, dst],
            Opcode::Add { left, right, dst }
            | Opcode::Sub { left, right, dst }
            | Opcode::Mul { left, right, dst }
            | Opcode::Div { left, right, dst }
            | Opcode::Mod { left, right, dst } => vec![left, right, dst],
            Opcode::Call { args, rets, .. } => args.iter().chain(rets).collect(),
            Opcode::Jump { src, dst, .. } => vec![src, dst],
            Opcode::Ret | Opcode::Jmp(_) | Opcode::Label(_) => Vec::new(),
        }
    }

    /// Temporaries defined by the opcode.
    pub fn temps_written(&self) -> Vec<u32> {
        match self {
            Opcode::Mov { dst, .. }
            | Opcode::Add { dst, .. }
            | Opcode::Sub { dst, .. }
            | Opcode::Mul { dst, .. }
            | Opcode::Div { dst, .. }
            | Opcode::Mod { dst, .. } => match dst {
                Register::TempValue(id) => vec![*id],
                _ => Vec::new(),
            },
            Opcode::Call { rets, .. } => rets
                .iter()
                .filter_map(|r| match r {
                    Register::TempValue(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Temporaries read by the opcode, including those holding addresses of
    /// indirect destinations.
    pub fn temps_read(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(4);
        let dst = |reg: &Register, out: &mut Vec<u32>| {
            if !reg.is_temp() {
                reg.temps(out);
            }
        };
        match self {
            Opcode::Mov { src, dst: to } => {
                src.temps(&mut out);
                dst(to, &mut out);
            }
            Opcode::Add { left, right, dst: to }
            | Opcode::Sub { left, right, dst: to }
            | Opcode::Mul { left, right, dst: to }
            | Opcode::Div { left, right, dst: to }
            | Opcode::Mod { left, right, dst: to } => {
                left.temps(&mut out);
                right.temps(&mut out);
                dst(to, &mut out);
            }
            Opcode::Call { args, rets, .. } => {
                for arg in args {
                    arg.temps(&mut out);
                }
                for ret in rets {
                    dst(ret, &mut out);
                }
            }
            Opcode::Jump { src, dst: other, .. } => {
                src.temps(&mut out);
                other.temps(&mut out);
            }
            Opcode::Ret | Opcode::Jmp(_) | Opcode::Label(_) => {}
        }
        out
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: Box<str>,
    pub body: Vec<Opcode>,
    /// Argument words, including both words of strings and slices.
    pub num_args: u32,
    pub num_rets: u32,
    pub num_locals: u32,
    /// Argument and result words of the widest call in the body.
    pub largest_call_words: u32,
}

#[derive(Debug, Default)]
pub struct Program {
    pub funcs: Vec<Function>,
    /// Contents of every string literal, indexed by [`Register::StringLiteral`].
    pub strings: Vec<Box<str>>,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::IntLiteral(n) => write!(f, "${n}"),
            Register::StringLiteral(id) => write!(f, "$str{id}"),
            Register::FuncArg { index, by_ref, .. } => {
                write!(f, "a{index}")?;
                if *by_ref {
                    f.write_str("&")?;
                }
                Ok(())
            }
            Register::FuncRetVal { index, .. } => write!(f, "r{index}"),
            Register::LocalValue { id, .. } => write!(f, "l{id}"),
            Register::TempValue(id) => write!(f, "t{id}"),
            Register::Pointer(inner) => write!(f, "*{inner}"),
            Register::Offset {
                base,
                index,
                scale,
                disp,
                info,
            } => {
                if info.size == 1 {
                    f.write_str("byte")?;
                }
                write!(f, "[{base} + {index}*{scale}")?;
                if *disp != 0 {
                    write!(f, " + {disp}")?;
                }
                f.write_str("]")
            }
            Register::Address(inner) => write!(f, "&{inner}"),
        }
    }
}

fn list(f: &mut fmt::Formatter<'_>, regs: &[Register]) -> fmt::Result {
    for (idx, reg) in regs.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{reg}")?;
    }
    Ok(())
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Mov { src, dst } => write!(f, "    mov {src}, {dst}"),
            Opcode::Add { left, right, dst } => write!(f, "    add {left}, {right}, {dst}"),
            Opcode::Sub { left, right, dst } => write!(f, "    sub {left}, {right}, {dst}"),
            Opcode::Mul { left, right, dst } => write!(f, "    mul {left}, {right}, {dst}"),
            Opcode::Div { left, right, dst } => write!(f, "    div {left}, {right}, {dst}"),
            Opcode::Mod { left, right, dst } => write!(f, "    mod {left}, {right}, {dst}"),
            Opcode::Call {
                target,
                args,
                rets,
                tail,
            } => {
                f.write_str(if *tail { "    tail call " } else { "    call " })?;
                write!(f, "{target}(")?;
                list(f, args)?;
                f.write_str(")")?;
                if !rets.is_empty() {
                    f.write_str(" -> ")?;
                    list(f, rets)?;
                }
                Ok(())
            }
            Opcode::Ret => f.write_str("    ret"),
            Opcode::Jmp(label) => write!(f, "    jmp {label}"),
            Opcode::Jump {
                cond,
                src,
                dst,
                label,
            } => write!(f, "    {} {src}, {dst}, {label}", cond.name()),
            Opcode::Label(label) => write!(f, "{label}:"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} (args {}, rets {}, locals {}, call {}):",
            self.name, self.num_args, self.num_rets, self.num_locals, self.largest_call_words
        )?;
        for op in &self.body {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, s) in self.strings.iter().enumerate() {
            writeln!(f, "str{id} = {s:?}")?;
        }
        for func in &self.funcs {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
