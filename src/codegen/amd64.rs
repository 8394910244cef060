//! A naive Plan 9 style AMD64 code generator over MIR.
//!
//! Every MIR word lives in the frame, except temporaries, which get machine
//! registers from [`regalloc`]. `BP` is the value scratch register and `AX`
//! the address scratch register, also used by division.
//!
//! The frame of a function is laid out as
//!
//! ```text
//! 0(SP)                     outgoing arguments, then outgoing results
//! (call + 1 + i) * 8(SP)    local i
//! ```
//!
//! and the function's own arguments and results are addressed through `FP`.

use std::{format_args as f, fmt::Write, marker::PhantomData};

use tracing::trace;

use crate::{
    codegen::{env::Env, Error},
    mir::{Cond, Function, Opcode, Program, Register},
    types::TypeInfo,
};

use self::regalloc::Allocator;

pub mod regalloc;
mod runtime;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub struct Generator<'a, E> {
    program: &'a Program,
    out: String,
    _env: PhantomData<E>,
}

impl<'a, E> Generator<'a, E>
where
    E: Env,
{
    pub fn new(program: &'a Program) -> Generator<'a, E> {
        Generator {
            program,
            out: String::with_capacity(4096),
            _env: PhantomData,
        }
    }

    pub fn generate(mut self) -> Result<String> {
        self.g_data()?;
        for func in &self.program.funcs {
            FunctionGenerator::new(&mut self.out, func).g_function()?;
        }
        runtime::g_runtime::<E>(&mut self.out, self.program)?;
        Ok(self.out)
    }

    /// One block per string literal: the length word, then the bytes with a
    /// NUL terminator, padded to a whole word.
    fn g_data(&mut self) -> Result {
        for (id, s) in self.program.strings.iter().enumerate() {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            bytes.resize(bytes.len().next_multiple_of(8), 0);

            writeln!(self.out, "DATA lit{id}+0(SB)/8, ${}", s.len())?;
            for (k, chunk) in bytes.chunks_exact(8).enumerate() {
                let mut word = [0; 8];
                word.copy_from_slice(chunk);
                let word = u64::from_le_bytes(word);
                writeln!(self.out, "DATA lit{id}+{}(SB)/8, ${word:#x}", (k + 1) * 8)?;
            }
            writeln!(self.out, "GLOBL lit{id}(SB), 8, ${}", bytes.len() + 8)?;
            writeln!(self.out)?;
        }
        Ok(())
    }
}

/// An instruction operand.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Operand {
    Imm(i64),
    Reg(&'static str),
    /// Memory, either a whole word or a single byte (`Some(signed)`).
    Mem { at: String, byte: Option<bool> },
    /// An address, formed with `LEAQ`.
    Lea(String),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Imm(n) => write!(f, "${n}"),
            Operand::Reg(r) => f.write_str(r),
            Operand::Mem { at, .. } | Operand::Lea(at) => f.write_str(at),
        }
    }
}

impl Operand {
    /// Whether the operand may be used directly as the source of a store or
    /// of an ALU instruction.
    fn is_direct(&self) -> bool {
        match self {
            Operand::Imm(n) => i32::try_from(*n).is_ok(),
            Operand::Reg(_) => true,
            Operand::Mem { .. } | Operand::Lea(_) => false,
        }
    }
}

struct FunctionGenerator<'o, 'f> {
    out: &'o mut String,
    func: &'f Function,
    alloc: Allocator,
    /// Words of the outgoing call area, one more than the widest call.
    call_words: u32,
}

impl<'o, 'f> FunctionGenerator<'o, 'f> {
    fn new(out: &'o mut String, func: &'f Function) -> FunctionGenerator<'o, 'f> {
        FunctionGenerator {
            out,
            func,
            alloc: Allocator::new(&func.body),
            call_words: func.largest_call_words + 1,
        }
    }

    fn g_function(mut self) -> Result {
        let reserve = (self.func.num_locals + self.call_words) * 8;
        let argsize = (self.func.num_args + self.func.num_rets) * 8;
        self.line(f!("TEXT {}(SB), 4, ${reserve}-{argsize}", self.func.name))?;

        for (at, op) in self.func.body.iter().enumerate() {
            self.alloc.release_dying(at);
            if !matches!(op, Opcode::Call { .. }) {
                for temp in op.temps_written() {
                    self.alloc.define(temp)?;
                }
            }
            self.g_opcode(at, op)?;
            self.alloc.retire(at);
        }
        if !matches!(self.func.body.last(), Some(Opcode::Ret)) {
            self.ins("RET")?;
        }
        self.line("")?;

        trace!(name = &*self.func.name, reserve, argsize, "emitted function");
        Ok(())
    }

    fn g_opcode(&mut self, at: usize, op: &Opcode) -> Result {
        match op {
            Opcode::Mov { src, dst } => self.g_mov(src, dst),
            Opcode::Add { left, right, dst } => self.g_alu("ADDQ", left, right, dst),
            Opcode::Sub { left, right, dst } => match right {
                Register::IntLiteral(0) => self.g_mov(left, dst),
                Register::IntLiteral(1) => {
                    self.g_load(left, "BP")?;
                    self.ins("DECQ BP")?;
                    self.g_write_back(dst)
                }
                _ => self.g_alu("SUBQ", left, right, dst),
            },
            Opcode::Mul { left, right, dst } => self.g_alu("IMULQ", left, right, dst),
            Opcode::Div { left, right, dst } => self.g_div(left, right, dst, "AX"),
            Opcode::Mod { left, right, dst } => self.g_div(left, right, dst, "DX"),
            Opcode::Call {
                target, args, rets, ..
            } => self.g_call(at, target, args, rets),
            Opcode::Ret => self.ins("RET"),
            Opcode::Jmp(label) => self.ins(f!("JMP {label}")),
            Opcode::Jump {
                cond,
                src,
                dst,
                label,
            } => {
                self.g_load(src, "BP")?;
                let other = self.resolve(dst)?;
                let other = self.direct(other, "AX")?;
                self.ins(f!("CMPQ BP, {other}"))?;
                self.ins(f!("{} {label}", jump_mnemonic(*cond)))
            }
            Opcode::Label(label) => self.line(f!("{label}:")),
        }
    }

    /// Relies on indirect registers only ever meeting temporaries and
    /// literals, so at most one side needs the scratch registers.
    fn g_mov(&mut self, src: &Register, dst: &Register) -> Result {
        if let Register::TempValue(temp) = dst {
            let into = self.alloc.get(*temp)?;
            let src = self.resolve(src)?;
            return self.load(&src, into);
        }
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;
        if src.is_direct() {
            return self.store(&src, &dst);
        }
        self.load(&src, "BP")?;
        self.store(&Operand::Reg("BP"), &dst)
    }

    fn g_alu(&mut self, mnemonic: &str, left: &Register, right: &Register, dst: &Register) -> Result {
        self.g_load(left, "BP")?;
        let right = self.resolve(right)?;
        let right = self.direct(right, "AX")?;
        self.ins(f!("{mnemonic} {right}, BP"))?;
        self.g_write_back(dst)
    }

    /// `CQO; IDIVQ` leaves the quotient in `AX` and the remainder in `DX`.
    fn g_div(&mut self, left: &Register, right: &Register, dst: &Register, result: &str) -> Result {
        self.g_load(right, "BP")?;
        self.g_load(left, "AX")?;
        let dst_temp = match dst {
            Register::TempValue(temp) => Some(*temp),
            _ => None,
        };
        let save = self.alloc.holder("DX").is_some_and(|t| Some(t) != dst_temp);
        if save {
            self.ins("PUSHQ DX")?;
        }
        self.ins("CQO")?;
        self.ins("IDIVQ BP")?;
        self.ins(f!("MOVQ {result}, BP"))?;
        if save {
            self.ins("POPQ DX")?;
        }
        self.g_write_back(dst)
    }

    fn g_call(&mut self, at: usize, target: &str, args: &[Register], rets: &[Register]) -> Result {
        let live = self.alloc.live_after(at);
        if let Some(temp) = live.first() {
            return Err(Error::Logic(format!(
                "t{temp} is live across the call to {target} in {}",
                self.func.name
            )));
        }

        for (k, arg) in args.iter().enumerate() {
            let slot = Operand::Mem {
                at: format!("{}(SP)", k * 8),
                byte: None,
            };
            let arg = self.resolve(arg)?;
            if arg.is_direct() {
                self.store(&arg, &slot)?;
            } else {
                self.load(&arg, "BP")?;
                self.store(&Operand::Reg("BP"), &slot)?;
            }
        }
        self.ins(f!("CALL {target}(SB)"))?;

        for temp in rets.iter().filter_map(|r| match r {
            Register::TempValue(temp) => Some(*temp),
            _ => None,
        }) {
            self.alloc.define(temp)?;
        }
        for (j, ret) in rets.iter().enumerate() {
            let slot = format!("{}(SP)", (args.len() + j) * 8);
            self.ins(f!("MOVQ {slot}, BP"))?;
            self.g_write_back(ret)?;
        }
        Ok(())
    }

    fn g_load(&mut self, reg: &Register, into: &'static str) -> Result {
        let op = self.resolve(reg)?;
        self.load(&op, into)
    }

    /// Stores `BP` into `dst`.
    fn g_write_back(&mut self, dst: &Register) -> Result {
        if let Register::Offset { index, .. } = dst {
            if !matches!(**index, Register::IntLiteral(_) | Register::TempValue(_)) {
                return Err(Error::Logic(format!("{dst} would clobber a computed value")));
            }
        }
        let dst = self.resolve(dst)?;
        self.store(&Operand::Reg("BP"), &dst)
    }
}

/// Operands.
impl FunctionGenerator<'_, '_> {
    /// Turns a register into an operand, emitting whatever is needed to
    /// address it. Only `AX` and `BP` are touched, and a returned operand
    /// never refers to `BP`.
    fn resolve(&mut self, reg: &Register) -> Result<Operand> {
        Ok(match reg {
            Register::IntLiteral(n) => Operand::Imm(*n),
            Register::StringLiteral(id) => Operand::Lea(format!("lit{id}+8(SB)")),
            Register::TempValue(temp) => Operand::Reg(self.alloc.get(*temp)?),
            Register::Address(inner) => Operand::Lea(self.memory(inner)?),
            Register::Offset { info, .. } => Operand::Mem {
                at: self.memory(reg)?,
                byte: byte_access(*info),
            },
            Register::LocalValue { .. }
            | Register::FuncArg { .. }
            | Register::FuncRetVal { .. }
            | Register::Pointer(_) => Operand::Mem {
                at: self.memory(reg)?,
                byte: None,
            },
        })
    }

    fn memory(&mut self, reg: &Register) -> Result<String> {
        match reg {
            Register::LocalValue { id, .. } => Ok(format!("{}(SP)", self.local_offset(*id))),
            Register::FuncArg { index, .. } => Ok(format!("arg{index}+{}(FP)", index * 8)),
            Register::FuncRetVal { index, .. } => Ok(format!(
                "ret{index}+{}(FP)",
                (self.func.num_args + index) * 8
            )),
            Register::Pointer(inner) => {
                let base = self.base(inner)?;
                Ok(format!("0({base})"))
            }
            Register::Offset {
                base,
                index,
                scale,
                disp,
                ..
            } => self.offset(base, index, *scale, *disp),
            _ => Err(Error::Logic(format!("{reg} does not name memory"))),
        }
    }

    /// `base + index * scale + disp`
    fn offset(&mut self, base: &Register, index: &Register, scale: u8, disp: i32) -> Result<String> {
        let mut disp = i64::from(disp);
        let base = match base {
            Register::Address(inner) => match **inner {
                Register::LocalValue { id, .. } => {
                    disp += self.local_offset(id);
                    "SP"
                }
                _ => self.base(base)?,
            },
            _ => self.base(base)?,
        };
        match index {
            Register::IntLiteral(k) => Ok(format!("{}({base})", disp + k * i64::from(scale))),
            Register::TempValue(temp) => {
                let index = self.alloc.get(*temp)?;
                Ok(format!("{disp}({base})({index}*{scale})"))
            }
            _ => {
                self.g_load(index, "BP")?;
                self.ins(f!("LEAQ {disp}({base})(BP*{scale}), AX"))?;
                Ok("0(AX)".to_owned())
            }
        }
    }

    /// A machine register holding the address in `reg`.
    fn base(&mut self, reg: &Register) -> Result<&'static str> {
        if let Register::TempValue(temp) = reg {
            return self.alloc.get(*temp);
        }
        self.g_load(reg, "AX")?;
        Ok("AX")
    }

    fn local_offset(&self, id: u32) -> i64 {
        i64::from(self.call_words + id) * 8
    }

    /// Loads operands which can't be used in place into `scratch`.
    fn direct(&mut self, op: Operand, scratch: &'static str) -> Result<Operand> {
        match op {
            Operand::Mem { byte: None, .. } => Ok(op),
            _ if op.is_direct() => Ok(op),
            _ => {
                self.load(&op, scratch)?;
                Ok(Operand::Reg(scratch))
            }
        }
    }

    fn load(&mut self, op: &Operand, into: &str) -> Result {
        match op {
            Operand::Reg(r) if *r == into => Ok(()),
            Operand::Imm(_) | Operand::Reg(_) | Operand::Mem { byte: None, .. } => {
                self.ins(f!("MOVQ {op}, {into}"))
            }
            Operand::Mem {
                byte: Some(true), ..
            } => self.ins(f!("MOVBQSX {op}, {into}")),
            Operand::Mem {
                byte: Some(false), ..
            } => self.ins(f!("MOVBQZX {op}, {into}")),
            Operand::Lea(_) => self.ins(f!("LEAQ {op}, {into}")),
        }
    }

    /// Stores a register or small immediate.
    fn store(&mut self, src: &Operand, dst: &Operand) -> Result {
        match dst {
            Operand::Reg(r) => self.load(src, r),
            Operand::Mem { byte: Some(_), .. } => self.ins(f!("MOVB {src}, {dst}")),
            Operand::Mem { byte: None, .. } => self.ins(f!("MOVQ {src}, {dst}")),
            Operand::Imm(_) | Operand::Lea(_) => {
                Err(Error::Logic(format!("can't store into {dst}")))
            }
        }
    }
}

/// Output.
impl FunctionGenerator<'_, '_> {
    /// Prints an instruction.
    fn ins(&mut self, f: impl std::fmt::Display) -> Result {
        writeln!(self.out, "    {f}")?;
        Ok(())
    }

    /// Prints an unindented line.
    fn line(&mut self, f: impl std::fmt::Display) -> Result {
        writeln!(self.out, "{f}")?;
        Ok(())
    }
}

fn byte_access(info: TypeInfo) -> Option<bool> {
    (info.size == 1).then_some(info.signed)
}

fn jump_mnemonic(cond: Cond) -> &'static str {
    match cond {
        Cond::Eq => "JEQ",
        Cond::Ne => "JNE",
        Cond::Lt => "JLT",
        Cond::Le => "JLE",
        Cond::Gt => "JGT",
        Cond::Ge => "JGE",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use indoc::indoc;

    use crate::{
        codegen::{env::Linux, Error},
        mir::{self, Function, Opcode, Program, Register},
        parser,
    };

    use super::Generator;

    fn emit(src: &str) -> String {
        let (idents, types, program, errors) = parser::test_utils::parse(src);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let mir = mir::lower(&idents, &types, &program.unwrap()).unwrap();
        Generator::<Linux>::new(&mir).generate().unwrap()
    }

    /// The text of the function starting at `TEXT name(SB)`.
    fn function<'a>(asm: &'a str, name: &str) -> &'a str {
        let start = asm
            .find(&format!("TEXT {name}(SB)"))
            .unwrap_or_else(|| panic!("no function {name} in\n{asm}"));
        let len = asm[start..].find("\n\n").unwrap_or(asm.len() - start);
        &asm[start..start + len + 1]
    }

    #[test]
    fn hello_world() {
        let asm = emit(r#"proc main() { PrintString("Hello, world!\n") }"#);
        assert!(
            asm.starts_with(indoc! {"
                DATA lit0+0(SB)/8, $14
                DATA lit0+8(SB)/8, $0x77202c6f6c6c6548
                DATA lit0+16(SB)/8, $0xa21646c726f
                GLOBL lit0(SB), 8, $24
            "}),
            "{asm}"
        );
        pretty_assertions::assert_eq!(
            function(&asm, "main"),
            indoc! {"
                TEXT main(SB), 4, $24-0
                    MOVQ $14, 0(SP)
                    LEAQ lit0+8(SB), BP
                    MOVQ BP, 8(SP)
                    CALL PrintString(SB)
                    RET
            "}
        );
    }

    #[test]
    fn countdown() {
        let asm = emit(indoc! {"
            proc main() {
                mutable n = 5
                while n > 0 {
                    PrintInt(n)
                    n = n - 1
                }
            }
        "});
        pretty_assertions::assert_eq!(
            function(&asm, "main"),
            indoc! {"
                TEXT main(SB), 4, $24-0
                    MOVQ $5, 16(SP)
                loop1cond:
                    MOVQ 16(SP), BP
                    CMPQ BP, $0
                    JLE loop1end
                    MOVQ 16(SP), BP
                    MOVQ BP, 0(SP)
                    CALL PrintInt(SB)
                    MOVQ 16(SP), BP
                    DECQ BP
                    MOVQ BP, BX
                    MOVQ BX, 16(SP)
                    JMP loop1cond
                loop1end:
                    RET
            "}
        );
    }

    #[test]
    fn arguments_and_results_live_above_the_frame() {
        let asm = emit(indoc! {"
            func divmod(a int, b int) (int, int) {
                return a / b, a % b
            }
        "});
        pretty_assertions::assert_eq!(
            function(&asm, "divmod"),
            indoc! {"
                TEXT divmod(SB), 4, $8-32
                    MOVQ arg1+8(FP), BP
                    MOVQ arg0+0(FP), AX
                    CQO
                    IDIVQ BP
                    MOVQ AX, BP
                    MOVQ BP, BX
                    MOVQ BX, ret0+16(FP)
                    MOVQ arg1+8(FP), BP
                    MOVQ arg0+0(FP), AX
                    CQO
                    IDIVQ BP
                    MOVQ DX, BP
                    MOVQ BP, BX
                    MOVQ BX, ret1+24(FP)
                    RET
            "}
        );
    }

    #[test]
    fn live_dx_is_preserved_across_division() {
        // t0..t2 occupy BX, CX and DX while t3 is computed.
        let mov = |n, t| Opcode::Mov {
            src: Register::IntLiteral(n),
            dst: Register::temp(t),
        };
        let program = Program {
            funcs: vec![Function {
                name: "f".into(),
                body: vec![
                    mov(1, 0),
                    mov(2, 1),
                    mov(3, 2),
                    Opcode::Div {
                        left: Register::temp(0),
                        right: Register::temp(1),
                        dst: Register::temp(3),
                    },
                    Opcode::Add {
                        left: Register::temp(2),
                        right: Register::temp(3),
                        dst: Register::local(0),
                    },
                ],
                num_args: 0,
                num_rets: 0,
                num_locals: 1,
                largest_call_words: 0,
            }],
            strings: Vec::new(),
        };
        let asm = Generator::<Linux>::new(&program).generate().unwrap();
        pretty_assertions::assert_eq!(
            function(&asm, "f"),
            indoc! {"
                TEXT f(SB), 4, $16-0
                    MOVQ $1, BX
                    MOVQ $2, CX
                    MOVQ $3, DX
                    MOVQ CX, BP
                    MOVQ BX, AX
                    PUSHQ DX
                    CQO
                    IDIVQ BP
                    MOVQ AX, BP
                    POPQ DX
                    MOVQ BP, BX
                    MOVQ DX, BP
                    ADDQ BX, BP
                    MOVQ BP, 8(SP)
                    RET
            "}
        );
    }

    #[test]
    fn temporaries_must_not_survive_calls() {
        let program = Program {
            funcs: vec![Function {
                name: "f".into(),
                body: vec![
                    Opcode::Mov {
                        src: Register::IntLiteral(1),
                        dst: Register::temp(0),
                    },
                    Opcode::Call {
                        target: "g".into(),
                        args: Vec::new(),
                        rets: Vec::new(),
                        tail: false,
                    },
                    Opcode::Mov {
                        src: Register::temp(0),
                        dst: Register::local(0),
                    },
                ],
                num_args: 0,
                num_rets: 0,
                num_locals: 1,
                largest_call_words: 0,
            }],
            strings: Vec::new(),
        };
        let res = Generator::<Linux>::new(&program).generate();
        assert!(matches!(res, Err(Error::Logic(msg)) if msg.contains("t0")));
    }

    #[test]
    fn byte_elements_use_byte_moves() {
        let asm = emit(indoc! {"
            proc main() {
                mutable bytes [3]byte = {1, 2, 3}
                let i = 1
                bytes[i] = bytes[0]
                PrintByteSlice(bytes)
            }
        "});
        let main = function(&asm, "main");
        assert!(main.contains("MOVB $1, 24(SP)"), "{main}");
        assert!(main.contains("MOVB $3, 26(SP)"), "{main}");
        assert!(main.contains("MOVBQZX 24(SP), BX"), "{main}");
        assert!(main.contains("LEAQ 24(SP)(BP*1), AX"), "{main}");
        assert!(main.contains("MOVB BX, 0(AX)"), "{main}");
    }

    #[test]
    fn labels_are_defined_once_per_function() {
        let asm = emit(indoc! {r#"
            data Shape = Circle int | Square int

            func area(s Shape) int {
                match s {
                    case Circle(r):
                        return 3 * r * r
                    case Square(w):
                        return w * w
                }
                return 0
            }

            proc main() {
                mutable i = 1
                while i <= 15 {
                    if i % 15 == 0 {
                        PrintString("fizzbuzz\n")
                    } else if i % 3 == 0 {
                        PrintString("fizz\n")
                    } else {
                        PrintInt(area(Square(i)))
                    }
                    assert(i > 0, "positive")
                    i = i + 1
                }
            }
        "#});
        for text in asm.split("TEXT ").skip(1) {
            let mut defined: HashMap<&str, usize> = HashMap::new();
            let mut used = HashSet::new();
            for line in text.lines().skip(1) {
                if let Some(label) = line.strip_suffix(':') {
                    *defined.entry(label).or_default() += 1;
                } else if let Some(ins) = line.trim().strip_prefix('J') {
                    if let Some((_, label)) = ins.split_once(' ') {
                        used.insert(label);
                    }
                }
            }
            assert!(defined.values().all(|n| *n == 1), "{text}");
            for label in used {
                assert!(defined.contains_key(label), "{label} undefined in\n{text}");
            }
        }
    }
}
