//! Built-in callables and the entry point, written against the raw system
//! call interface of the target.

use std::fmt::Write;

use crate::{
    codegen::{env::Env, Error},
    context::{Builtin, BUILTINS},
    mir::Program,
};

pub fn g_runtime<E: Env>(out: &mut String, program: &Program) -> Result<(), Error> {
    for entry in BUILTINS {
        let name = entry.name;
        match entry.builtin {
            Builtin::PrintString | Builtin::PrintByteSlice => write!(
                out,
                "TEXT {name}(SB), 4, $0-16
    MOVQ $1, DI
    MOVQ s+8(FP), SI
    MOVQ s+0(FP), DX
    MOVQ ${write}, AX
    SYSCALL
    RET

",
                write = E::SYS_WRITE,
            )?,
            Builtin::PrintInt => write!(
                out,
                "TEXT {name}(SB), 4, $32-8
    MOVQ n+0(FP), AX
    MOVQ $0, R9
    CMPQ AX, $0
    JGE digits
    MOVQ $1, R9
    NEGQ AX
digits:
    LEAQ 32(SP), SI
    MOVQ $10, CX
next:
    XORQ DX, DX
    DIVQ CX
    ADDQ $48, DX
    DECQ SI
    MOVB DX, 0(SI)
    CMPQ AX, $0
    JNE next
    CMPQ R9, $0
    JEQ print
    DECQ SI
    MOVB $45, 0(SI)
print:
    LEAQ 32(SP), DX
    SUBQ SI, DX
    MOVQ $1, DI
    MOVQ ${write}, AX
    SYSCALL
    RET

",
                write = E::SYS_WRITE,
            )?,
            Builtin::Write | Builtin::Read => {
                let sys = if entry.builtin == Builtin::Write {
                    E::SYS_WRITE
                } else {
                    E::SYS_READ
                };
                write!(
                    out,
                    "TEXT {name}(SB), 4, $0-32
    MOVQ fd+0(FP), DI
    MOVQ buf+16(FP), SI
    MOVQ buf+8(FP), DX
    MOVQ ${sys}, AX
    SYSCALL
    MOVQ AX, ret+24(FP)
    RET

"
                )?;
            }
            Builtin::Open | Builtin::Create => {
                let (flags, mode) = if entry.builtin == Builtin::Create {
                    (E::CREATE_FLAGS, E::CREATE_MODE)
                } else {
                    (0, 0)
                };
                write!(
                    out,
                    "TEXT {name}(SB), 4, $0-24
    MOVQ path+8(FP), DI
    MOVQ ${flags}, SI
    MOVQ ${mode}, DX
    MOVQ ${open}, AX
    SYSCALL
    MOVQ AX, ret+16(FP)
    RET

",
                    open = E::SYS_OPEN,
                )?;
            }
            Builtin::Close | Builtin::Exit => {
                let sys = if entry.builtin == Builtin::Close {
                    E::SYS_CLOSE
                } else {
                    E::SYS_EXIT
                };
                write!(
                    out,
                    "TEXT {name}(SB), 4, $0-8
    MOVQ a+0(FP), DI
    MOVQ ${sys}, AX
    SYSCALL
    RET

"
                )?;
            }
            // Lowered inline.
            Builtin::Len => {}
        }
    }
    g_entry::<E>(out, program)
}

/// Calls `main` and exits with status zero. A `main` taking the argument
/// slice gets an empty one.
fn g_entry<E: Env>(out: &mut String, program: &Program) -> Result<(), Error> {
    let Some(main) = program.funcs.iter().find(|f| &*f.name == "main") else {
        return Ok(());
    };
    let frame = (main.num_args + main.num_rets) * 8 + 8;
    writeln!(out, "TEXT {}(SB), 4, ${frame}-0", E::ENTRY_POINT)?;
    for k in 0..main.num_args {
        writeln!(out, "    MOVQ $0, {}(SP)", k * 8)?;
    }
    writeln!(out, "    CALL main(SB)")?;
    writeln!(out, "    MOVQ $0, DI")?;
    writeln!(out, "    MOVQ ${}, AX", E::SYS_EXIT)?;
    writeln!(out, "    SYSCALL")?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        codegen::env::{Darwin, Linux},
        mir::{Function, Program},
    };

    fn program() -> Program {
        Program {
            funcs: vec![Function {
                name: "main".into(),
                body: Vec::new(),
                num_args: 0,
                num_rets: 0,
                num_locals: 0,
                largest_call_words: 0,
            }],
            strings: Vec::new(),
        }
    }

    #[test]
    fn syscall_numbers_follow_the_target() {
        let mut linux = String::new();
        super::g_runtime::<Linux>(&mut linux, &program()).unwrap();
        let mut darwin = String::new();
        super::g_runtime::<Darwin>(&mut darwin, &program()).unwrap();

        assert!(linux.contains("TEXT Exit(SB), 4, $0-8\n    MOVQ a+0(FP), DI\n    MOVQ $60, AX"));
        assert!(darwin.contains("TEXT Exit(SB), 4, $0-8\n    MOVQ a+0(FP), DI\n    MOVQ $33554433, AX"));
        assert!(linux.contains("MOVQ $577, SI"));
        assert!(darwin.contains("MOVQ $1537, SI"));
        assert!(linux.contains("TEXT _start(SB), 4, $8-0\n    CALL main(SB)"));
        assert!(!linux.contains("TEXT len(SB)"));
    }

    #[test]
    fn no_entry_without_main() {
        let mut out = String::new();
        super::g_runtime::<Linux>(&mut out, &Program::default()).unwrap();
        assert!(!out.contains("CALL main(SB)"));
    }
}
