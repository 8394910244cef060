//! The `runtime` module linked next to user code: built-in callables over
//! raw system calls, and the process entry point.

use std::fmt::Write;

use super::lower::MAIN_WRAPPER;
use crate::codegen::env::Env;

/// The function `_start` calls. It must survive internalization.
pub const START: &str = "__l_start";

/// Renders the runtime module for the target.
pub fn runtime<E: Env>() -> String {
    let mut out = String::with_capacity(8 * 1024);
    g_runtime::<E>(&mut out).expect("writing to a String never fails");
    out
}

fn g_runtime<E: Env>(out: &mut String) -> std::fmt::Result {
    writeln!(out, "; ModuleID = 'runtime'")?;
    writeln!(out, "source_filename = \"runtime\"")?;
    writeln!(out, "target triple = \"{}\"", E::TRIPLE)?;
    writeln!(out)?;
    g_entry::<E>(out)?;
    g_syscall(out)?;
    g_io::<E>(out)?;
    g_print_int::<E>(out)?;
    g_start(out)
}

/// `_start` hands `argc` and `argv` from the initial stack to `__l_start`.
fn g_entry<E: Env>(out: &mut String) -> std::fmt::Result {
    let entry = E::ENTRY_POINT;
    let start = format!("{}{START}", E::SYMBOL_PREFIX);
    for line in [
        format!(".globl {entry}"),
        format!("{entry}:"),
        "  xorl %ebp, %ebp".to_owned(),
        "  movq (%rsp), %rdi".to_owned(),
        "  leaq 8(%rsp), %rsi".to_owned(),
        "  andq $-16, %rsp".to_owned(),
        format!("  callq {start}"),
        "  hlt".to_owned(),
    ] {
        writeln!(out, "module asm \"{line}\"")?;
    }
    writeln!(out)?;
    writeln!(out, "declare void @{MAIN_WRAPPER}({{ ptr, i64 }})")?;
    writeln!(out)
}

fn g_syscall(out: &mut String) -> std::fmt::Result {
    writeln!(
        out,
        "define internal i64 @syscall3(i64 %n, i64 %a, i64 %b, i64 %c) {{
entry:
  %r = call i64 asm sideeffect \"syscall\", \"={{rax}},{{rax}},{{rdi}},{{rsi}},{{rdx}},~{{rcx}},~{{r11}},~{{memory}}\"(i64 %n, i64 %a, i64 %b, i64 %c)
  ret i64 %r
}}
"
    )
}

fn g_io<E: Env>(out: &mut String) -> std::fmt::Result {
    let write = E::SYS_WRITE;
    let read = E::SYS_READ;
    let open = E::SYS_OPEN;
    let close = E::SYS_CLOSE;
    let exit = E::SYS_EXIT;
    let create_flags = E::CREATE_FLAGS;
    let create_mode = E::CREATE_MODE;

    writeln!(
        out,
        "define void @PrintString({{ ptr, i64 }} %s) {{
entry:
  %p = extractvalue {{ ptr, i64 }} %s, 0
  %n = extractvalue {{ ptr, i64 }} %s, 1
  %a = ptrtoint ptr %p to i64
  %r = call i64 @syscall3(i64 {write}, i64 1, i64 %a, i64 %n)
  ret void
}}

define void @PrintByteSlice({{ ptr, i64 }} %buf) {{
entry:
  call void @PrintString({{ ptr, i64 }} %buf)
  ret void
}}
"
    )?;

    for (name, sys) in [("Write", write), ("Read", read)] {
        writeln!(
            out,
            "define i64 @{name}(i64 %fd, {{ ptr, i64 }} %buf) {{
entry:
  %p = extractvalue {{ ptr, i64 }} %buf, 0
  %n = extractvalue {{ ptr, i64 }} %buf, 1
  %a = ptrtoint ptr %p to i64
  %r = call i64 @syscall3(i64 {sys}, i64 %fd, i64 %a, i64 %n)
  ret i64 %r
}}
"
        )?;
    }

    // Paths come from string literals, which carry a terminating NUL.
    for (name, flags, mode) in [("Open", 0, 0), ("Create", create_flags, create_mode)] {
        writeln!(
            out,
            "define i64 @{name}({{ ptr, i64 }} %path) {{
entry:
  %p = extractvalue {{ ptr, i64 }} %path, 0
  %a = ptrtoint ptr %p to i64
  %r = call i64 @syscall3(i64 {open}, i64 %a, i64 {flags}, i64 {mode})
  ret i64 %r
}}
"
        )?;
    }

    writeln!(
        out,
        "define void @Close(i64 %fd) {{
entry:
  %r = call i64 @syscall3(i64 {close}, i64 %fd, i64 0, i64 0)
  ret void
}}

define void @Exit(i64 %code) {{
entry:
  %r = call i64 @syscall3(i64 {exit}, i64 %code, i64 0, i64 0)
  unreachable
}}
"
    )
}

/// Digits are produced backwards into a stack buffer, then written at once.
fn g_print_int<E: Env>(out: &mut String) -> std::fmt::Result {
    let write = E::SYS_WRITE;
    writeln!(
        out,
        "define void @PrintInt(i64 %n) {{
entry:
  %buf = alloca [32 x i8]
  %neg = icmp slt i64 %n, 0
  %minus.n = sub i64 0, %n
  %abs = select i1 %neg, i64 %minus.n, i64 %n
  br label %digit
digit:
  %v = phi i64 [ %abs, %entry ], [ %q, %digit ]
  %i = phi i64 [ 32, %entry ], [ %i.next, %digit ]
  %q = udiv i64 %v, 10
  %d = urem i64 %v, 10
  %c.wide = add i64 %d, 48
  %c = trunc i64 %c.wide to i8
  %i.next = sub i64 %i, 1
  %slot = getelementptr [32 x i8], ptr %buf, i64 0, i64 %i.next
  store i8 %c, ptr %slot
  %more = icmp ne i64 %q, 0
  br i1 %more, label %digit, label %sign
sign:
  br i1 %neg, label %minus, label %print
minus:
  %i.minus = sub i64 %i.next, 1
  %minus.slot = getelementptr [32 x i8], ptr %buf, i64 0, i64 %i.minus
  store i8 45, ptr %minus.slot
  br label %print
print:
  %first = phi i64 [ %i.next, %sign ], [ %i.minus, %minus ]
  %p = getelementptr [32 x i8], ptr %buf, i64 0, i64 %first
  %a = ptrtoint ptr %p to i64
  %len = sub i64 32, %first
  %r = call i64 @syscall3(i64 {write}, i64 1, i64 %a, i64 %len)
  ret void
}}
"
    )
}

/// Builds the `[]string` of arguments, runs the program and exits with
/// status zero.
fn g_start(out: &mut String) -> std::fmt::Result {
    writeln!(
        out,
        "define void @{START}(i64 %argc, ptr %argv) {{
entry:
  %args = alloca {{ ptr, i64 }}, i64 %argc
  br label %next
next:
  %i = phi i64 [ 0, %entry ], [ %i.next, %measured ]
  %more = icmp slt i64 %i, %argc
  br i1 %more, label %arg, label %run
arg:
  %cstr.slot = getelementptr ptr, ptr %argv, i64 %i
  %cstr = load ptr, ptr %cstr.slot
  br label %strlen
strlen:
  %len = phi i64 [ 0, %arg ], [ %len.next, %strlen.step ]
  %ch.slot = getelementptr i8, ptr %cstr, i64 %len
  %ch = load i8, ptr %ch.slot
  %nul = icmp eq i8 %ch, 0
  br i1 %nul, label %measured, label %strlen.step
strlen.step:
  %len.next = add i64 %len, 1
  br label %strlen
measured:
  %s.ptr = insertvalue {{ ptr, i64 }} undef, ptr %cstr, 0
  %s = insertvalue {{ ptr, i64 }} %s.ptr, i64 %len, 1
  %s.slot = getelementptr {{ ptr, i64 }}, ptr %args, i64 %i
  store {{ ptr, i64 }} %s, ptr %s.slot
  %i.next = add i64 %i, 1
  br label %next
run:
  %all.ptr = insertvalue {{ ptr, i64 }} undef, ptr %args, 0
  %all = insertvalue {{ ptr, i64 }} %all.ptr, i64 %argc, 1
  call void @{MAIN_WRAPPER}({{ ptr, i64 }} %all)
  call void @Exit(i64 0)
  unreachable
}}"
    )
}

#[cfg(test)]
mod tests {
    use crate::codegen::env::{Darwin, Linux};

    #[test]
    fn syscall_numbers_follow_the_target() {
        let linux = super::runtime::<Linux>();
        let darwin = super::runtime::<Darwin>();

        assert!(linux.contains("target triple = \"x86_64-unknown-linux-gnu\""));
        assert!(darwin.contains("target triple = \"x86_64-apple-darwin\""));
        assert!(linux.contains("call i64 @syscall3(i64 60, i64 %code, i64 0, i64 0)"));
        assert!(darwin.contains("call i64 @syscall3(i64 33554433, i64 %code, i64 0, i64 0)"));
        assert!(linux.contains("i64 2, i64 %a, i64 577, i64 420"));
        assert!(darwin.contains("i64 33554437, i64 %a, i64 1537, i64 420"));
    }

    #[test]
    fn entry_calls_the_prefixed_start() {
        let linux = super::runtime::<Linux>();
        let darwin = super::runtime::<Darwin>();

        assert!(linux.contains("module asm \".globl _start\""));
        assert!(linux.contains("module asm \"  callq __l_start\""));
        assert!(darwin.contains("module asm \"  callq ___l_start\""));
        assert!(linux.contains("declare void @__l_main({ ptr, i64 })"));
        assert!(linux.contains("call void @__l_main({ ptr, i64 } %all)"));
    }

    #[test]
    fn every_builtin_is_defined() {
        let linux = super::runtime::<Linux>();
        for entry in crate::context::BUILTINS {
            if entry.builtin == crate::context::Builtin::Len {
                continue;
            }
            assert!(
                linux.contains(&format!("@{}(", entry.name)),
                "{} is missing",
                entry.name
            );
        }
    }
}
