//! The passes, in order: lex, prototype, parse and check, then either
//! MIR and the AMD64 emitter, or the LLVM emitter.

use std::fmt;

use tracing::{debug, debug_span};

use crate::{
    ast, codegen,
    codegen::{LlvmModules, Target},
    error, lexer, mir, parser, prototype,
    token::{Span, Spanned, Token},
    types::TypeTable,
    util::{
        fmt::{Context, Show},
        intern::Interner,
    },
};

/// Source files joined into one compilation unit.
#[derive(Default)]
pub struct Sources {
    text: String,
    /// File name and starting byte of each file, in order.
    files: Vec<(Box<str>, usize)>,
}

impl Sources {
    pub fn new() -> Sources {
        Sources::default()
    }

    /// A unit made of a single file.
    pub fn single(name: &str, text: &str) -> Sources {
        let mut sources = Sources::new();
        sources.push(name, text);
        sources
    }

    /// Appends a file. Files are separated by a newline so a declaration
    /// never runs into the next file.
    pub fn push(&mut self, name: &str, text: &str) {
        self.files.push((name.into(), self.text.len()));
        self.text.push_str(text);
        if !text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// File name, line and column (both from 1) of the start of `span`.
    pub fn locate(&self, span: Span) -> (&str, usize, usize) {
        let at = self
            .files
            .partition_point(|&(_, start)| start <= span.lo)
            .saturating_sub(1);
        let Some((name, start)) = self.files.get(at) else {
            let (line, col) = span.line_col(&self.text);
            return ("<input>", line, col);
        };
        let file = &self.text[*start..];
        let local = Span::new_of_length(span.lo - start, span.len);
        let (line, col) = local.line_col(file);
        (name, line, col)
    }
}

/// A program which passed every front end check.
pub struct Checked {
    pub idents: Interner,
    pub types: TypeTable,
    pub program: ast::Program,
}

/// Front end errors along with the identifiers they refer to.
pub struct Diagnostics {
    pub idents: Interner,
    pub errors: Vec<Spanned<error::Error>>,
}

impl Diagnostics {
    /// One `file:line:col: Category: message` line per error.
    pub fn render(&self, sources: &Sources) -> Vec<String> {
        let ctx = Context::new(&self.idents);
        self.errors
            .iter()
            .map(|e| {
                let (file, line, col) = sources.locate(e.span);
                format!("{file}:{line}:{col}: {}", e.display(&ctx))
            })
            .collect()
    }
}

pub enum Error {
    Source(Diagnostics),
    Codegen(codegen::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Source(diagnostics) => {
                let ctx = Context::new(&diagnostics.idents);
                for (i, e) in diagnostics.errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e.display(&ctx))?;
                }
                Ok(())
            }
            Error::Codegen(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<codegen::Error> for Error {
    fn from(e: codegen::Error) -> Self {
        Error::Codegen(e)
    }
}

pub fn lex(src: &str) -> Vec<Token> {
    let _span = debug_span!("lex").entered();
    let tokens = lexer::lex_in_new(src);
    debug!(tokens = tokens.len(), "lexed");
    tokens
}

/// Runs the front end. Any error stops the pipeline, with every error
/// found by the failing pass.
pub fn check(src: &str) -> Result<Checked, Error> {
    let tokens = lex(src);
    let mut idents = Interner::with_capacity(64);
    let mut types = TypeTable::new();

    let symbols = {
        let _span = debug_span!("prototype").entered();
        match prototype::prototype(src, &tokens, &mut idents, &mut types) {
            Ok(symbols) => symbols,
            Err(errors) => return Err(Error::Source(Diagnostics { idents, errors })),
        }
    };
    debug!(
        types = symbols.types.len(),
        callables = symbols.callables.len(),
        "collected declarations"
    );

    let program = {
        let _span = debug_span!("parse").entered();
        match parser::parse_program(src, &tokens, &mut idents, &mut types, &symbols) {
            Ok(program) => program,
            Err((_, errors)) => return Err(Error::Source(Diagnostics { idents, errors })),
        }
    };
    debug!(decls = program.decls.len(), types = types.len(), "checked program");

    Ok(Checked {
        idents,
        types,
        program,
    })
}

pub fn lower(checked: &Checked) -> Result<mir::Program, Error> {
    let _span = debug_span!("mir").entered();
    Ok(mir::lower(&checked.idents, &checked.types, &checked.program)?)
}

/// Source to Plan 9 style assembly, runtime included.
pub fn asm(src: &str, target: Target) -> Result<String, Error> {
    let checked = check(src)?;
    let program = lower(&checked)?;
    let _span = debug_span!("asm", %target).entered();
    Ok(codegen::generate_asm(&program, target)?)
}

/// Source to the `usercode` and `runtime` LLVM modules.
pub fn llvm(src: &str, target: Target) -> Result<LlvmModules, Error> {
    let checked = check(src)?;
    let _span = debug_span!("llvm", %target).entered();
    Ok(codegen::generate_llvm(
        &checked.idents,
        &checked.types,
        &checked.program,
        target,
    )?)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const LINUX: Target = Target::x86_64_linux;

    const HELLO: &str = indoc! {r#"
        proc main() {
            PrintString("Hello, world!\n")
        }
    "#};

    const LET_INT: &str = indoc! {"
        proc main() {
            let n int = 5
            PrintInt(n)
        }
    "};

    const FIZZBUZZ: &str = indoc! {r#"
        proc fizzbuzz(n int) {
            mutable i = 1
            while i <= n {
                if i % 15 == 0 {
                    PrintString("FizzBuzz\n")
                } else if i % 3 == 0 {
                    PrintString("Fizz\n")
                } else if i % 5 == 0 {
                    PrintString("Buzz\n")
                } else {
                    PrintInt(i)
                    PrintString("\n")
                }
                i = i + 1
            }
        }

        proc main() {
            fizzbuzz(15)
        }
    "#};

    const SUM: &str = indoc! {"
        func partial_sum(n int, acc int) int {
            if n == 0 {
                return acc
            }
            return partial_sum(n - 1, acc + n)
        }

        proc main() {
            PrintInt(partial_sum(10, 0))
        }
    "};

    const COUNTDOWN: &str = indoc! {r#"
        proc main() {
            mutable n = 3
            while n > 0 {
                PrintInt(n)
                PrintString("\n")
                n = n - 1
            }
        }
    "#};

    const LETTERS: &str = indoc! {r#"
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
    "#};

    const PROGRAMS: [&str; 6] = [HELLO, LET_INT, FIZZBUZZ, SUM, COUNTDOWN, LETTERS];

    fn errors(src: &str) -> Vec<String> {
        match check(src) {
            Ok(_) => Vec::new(),
            Err(Error::Source(diagnostics)) => diagnostics.render(&Sources::single("main.l", src)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn every_program_reaches_both_back_ends() {
        for src in PROGRAMS {
            let asm = asm(src, LINUX).unwrap();
            assert!(asm.contains("TEXT main(SB)"), "{asm}");
            assert!(asm.contains("TEXT _start(SB)"));
            let modules = llvm(src, LINUX).unwrap();
            assert!(modules.usercode.contains("define void @main()"));
            assert!(modules.runtime.contains("define void @__l_start(i64 %argc, ptr %argv)"));
        }
    }

    #[test]
    fn output_is_deterministic() {
        for src in PROGRAMS {
            assert_eq!(asm(src, LINUX).unwrap(), asm(src, LINUX).unwrap());
            let (a, b) = (llvm(src, LINUX).unwrap(), llvm(src, LINUX).unwrap());
            assert_eq!(a.usercode, b.usercode);
            assert_eq!(a.runtime, b.runtime);
        }
    }

    #[test]
    fn hello_world_embeds_its_text() {
        let asm = asm(HELLO, LINUX).unwrap();
        assert!(asm.contains("DATA lit0+0(SB)/8, $14"));
        let modules = llvm(HELLO, LINUX).unwrap();
        assert!(modules
            .usercode
            .contains(r#"c"Hello, world!\0A\00""#));
    }

    #[test]
    fn let_with_declared_type_prints_the_value() {
        let modules = llvm(LET_INT, LINUX).unwrap();
        assert!(modules.usercode.contains("call void @PrintInt(i64 5)"));
    }

    #[test]
    fn fizzbuzz_tests_every_divisor() {
        let modules = llvm(FIZZBUZZ, LINUX).unwrap();
        for divisor in [15, 3, 5] {
            assert!(modules.usercode.contains(&format!(", {divisor}\n")));
        }
        assert!(modules.usercode.contains("call void @fizzbuzz(i64 15)"));
    }

    #[test]
    fn recursive_sum_is_a_tail_call() {
        let modules = llvm(SUM, LINUX).unwrap();
        assert!(modules.usercode.contains("tail call i64 @partial_sum("));
        let asm = asm(SUM, LINUX).unwrap();
        assert!(asm.contains("CALL partial_sum(SB)"));
    }

    #[test]
    fn countdown_loops_back_to_its_condition() {
        let modules = llvm(COUNTDOWN, LINUX).unwrap();
        assert!(modules.usercode.contains("br label %while1cond"));
        assert!(modules.usercode.contains("icmp sgt i64"));
    }

    #[test]
    fn enum_match_selects_the_constructor() {
        let modules = llvm(LETTERS, LINUX).unwrap();
        assert!(modules.usercode.contains("i64 1, label %match1case1"));
        assert!(modules.usercode.contains(r#"c"b\00""#));
    }

    #[test]
    fn uint8_bounds() {
        let fits = "proc main() {\n    let b uint8 = 255\n    PrintInt(b as int)\n}\n";
        assert!(errors(fits).is_empty());
        let overflows = "proc main() {\n    let b uint8 = 256\n}\n";
        assert_eq!(
            errors(overflows),
            ["main.l:2:19: TypeError: 256 does not fit in uint8 for `b`"]
        );
    }

    #[test]
    fn sixty_four_bit_bounds() {
        let max = "proc main() {\n    let x uint64 = 18446744073709551615\n    PrintInt(x as int)\n}\n";
        assert!(errors(max).is_empty());
        assert!(llvm(max, LINUX).unwrap().usercode.contains("i64 -1"));

        let min = "proc main() {\n    let y int64 = -9223372036854775808\n}\n";
        assert!(errors(min).is_empty());
        let modules = llvm(min, LINUX).unwrap();
        assert!(modules.usercode.contains("sub i64 0, -9223372036854775808"));

        let over = "proc main() {\n    let x uint64 = 18446744073709551616\n}\n";
        assert_eq!(
            errors(over),
            ["main.l:2:20: TypeError: 18446744073709551616 does not fit in uint64 for `x`"]
        );
        let under = "proc main() {\n    let y int64 = -9223372036854775809\n}\n";
        assert_eq!(
            errors(under),
            ["main.l:2:19: TypeError: -9223372036854775809 does not fit in int64 for `y`"]
        );
    }

    #[test]
    fn results_need_a_return_on_every_path() {
        let empty = "func f() int {\n}\n\nproc main() {\n    PrintInt(f())\n}\n";
        assert_eq!(errors(empty), ["main.l:1:6: TypeError: missing return in `f`"]);

        let one_branch = indoc! {"
            func sign(n int) int {
                if n < 0 {
                    return -1
                }
            }

            proc main() {
                PrintInt(sign(2))
            }
        "};
        assert_eq!(
            errors(one_branch),
            ["main.l:1:6: TypeError: missing return in `sign`"]
        );

        let covered = indoc! {"
            data Letter = A | B

            func sign(n int) int {
                if n < 0 {
                    return -1
                } else {
                    return 1
                }
            }

            func code(l Letter) int {
                match l {
                    case A:
                        return 1
                    case B:
                        return 2
                }
            }

            proc main() {
                PrintInt(sign(2) + code(B))
            }
        "};
        assert!(errors(covered).is_empty());

        let plain_match = indoc! {"
            func name(n int) int {
                match n {
                    case 1:
                        return 1
                }
            }

            proc main() {
                PrintInt(name(1))
            }
        "};
        assert_eq!(
            errors(plain_match),
            ["main.l:1:6: TypeError: missing return in `name`"]
        );
    }

    #[test]
    fn procedures_return_nothing() {
        let bare = indoc! {"
            proc show(n int) {
                if n < 0 {
                    return
                }
                PrintInt(n)
            }

            proc main() {
                show(1)
                return
            }
        "};
        assert!(errors(bare).is_empty());
        let extra = "proc main() {\n    return 3\n}\n";
        assert_eq!(
            errors(extra),
            ["main.l:2:5: ArityError: expected 0 return values, but got 1"]
        );
    }

    #[test]
    fn shadowing_rules() {
        let lets = "proc main() {\n    let x = 1\n    let x = 2\n    PrintInt(x)\n}\n";
        assert!(errors(lets).is_empty());
        let over_mutable = "proc main() {\n    mutable x = 1\n    let x = 2\n}\n";
        assert_eq!(
            errors(over_mutable),
            ["main.l:3:9: ShadowError: `x` shadows a mutable variable"]
        );
    }

    #[test]
    fn partial_matches() {
        let ints = indoc! {"
            proc main() {
                match 3 {
                    case 1:
                        PrintInt(1)
                }
            }
        "};
        assert!(errors(ints).is_empty());
        let letters = indoc! {"
            data Letter = A | B

            proc main() {
                match A {
                    case A:
                        PrintInt(1)
                }
            }
        "};
        let found = errors(letters);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("ExhaustivenessError: match is missing case `B`"));
    }

    #[test]
    fn diagnostics_name_the_file() {
        let mut sources = Sources::new();
        sources.push("a.l", "proc main() {\n    helper()\n}");
        sources.push("b.l", "proc helper() {\n    let q = missing\n}\n");
        let Err(Error::Source(diagnostics)) = check(sources.text()) else {
            panic!("expected a scope error");
        };
        assert_eq!(
            diagnostics.render(&sources),
            ["b.l:2:13: ScopeError: `missing` is not defined"]
        );
    }
}
