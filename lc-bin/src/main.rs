//! `l`, the driver: reads every `.l` file of the working directory, runs the
//! compiler and hands its output to the external toolchain.

use std::{
    env,
    fmt::Write as _,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand, ValueEnum};
use lc::compile::{self, Sources};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::{
    target::{Target, DEFAULT_TARGET},
    toolchain::AsmTools,
};

mod target;
mod toolchain;

#[derive(Parser)]
#[command(name = "l", version, about = "Compiler for the L language")]
struct Cli {
    /// Log every pass at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the working directory to an executable.
    Build {
        #[arg(long, value_enum, default_value_t = Backend::Llvm)]
        backend: Backend,

        #[arg(long, value_enum, default_value_t = DEFAULT_TARGET)]
        target: Target,

        /// Output executable (defaults to the directory name).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep intermediate files even when the build succeeds.
        #[arg(long)]
        keep_temps: bool,

        /// Plan 9 assembler, for `--backend asm`.
        #[arg(long = "as", default_value = "go tool asm -p main")]
        assembler: String,

        /// Archiver for the assembled object, for `--backend asm`.
        #[arg(long = "pack", default_value = "go tool pack")]
        packer: String,

        /// Linker reading the archive, for `--backend asm`.
        #[arg(long = "ld", default_value = "go tool link")]
        linker: String,
    },

    /// Run the front end only and report diagnostics.
    Check,

    /// Print an intermediate form to stdout.
    Emit {
        #[arg(long, value_enum)]
        stage: Stage,

        #[arg(long, value_enum, default_value_t = DEFAULT_TARGET)]
        target: Target,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Backend {
    Llvm,
    Asm,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Stage {
    Tokens,
    Ast,
    Mir,
    Asm,
    Llvm,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(messages) => {
            for message in messages {
                eprintln!("{message}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Failures are returned as the lines to print.
type Outcome = Result<(), Vec<String>>;

fn run(command: Commands) -> Outcome {
    let dir = env::current_dir().map_err(|e| vec![format!("cannot read working directory: {e}")])?;
    let sources = read_sources(&dir)?;

    match command {
        Commands::Check => {
            compile::check(sources.text()).map_err(|e| render(&sources, e))?;
            Ok(())
        }
        Commands::Emit { stage, target } => emit(&sources, stage, target),
        Commands::Build {
            backend,
            target,
            output,
            keep_temps,
            assembler,
            packer,
            linker,
        } => {
            let output = output.unwrap_or_else(|| default_output(&dir));
            let tools = AsmTools {
                assembler: &assembler,
                packer: &packer,
                linker: &linker,
            };
            build(&sources, backend, target, &output, keep_temps, &tools)
        }
    }
}

/// Every `.l` file of `dir`, in name order.
fn read_sources(dir: &Path) -> Result<Sources, Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| vec![format!("{}: {e}", dir.display())])?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "l"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(vec![format!("no .l files in {}", dir.display())]);
    }

    let mut sources = Sources::new();
    for path in &paths {
        let text = fs::read_to_string(path).map_err(|e| vec![format!("{}: {e}", path.display())])?;
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        sources.push(&name, &text);
    }
    debug!(files = paths.len(), bytes = sources.text().len(), "read sources");
    Ok(sources)
}

fn default_output(dir: &Path) -> PathBuf {
    dir.file_name()
        .map_or_else(|| PathBuf::from("a.out"), PathBuf::from)
}

fn render(sources: &Sources, e: compile::Error) -> Vec<String> {
    match e {
        compile::Error::Source(diagnostics) => diagnostics.render(sources),
        compile::Error::Codegen(e) => vec![e.to_string()],
    }
}

fn resolve(target: Target) -> Result<lc::codegen::Target, Vec<String>> {
    target
        .resolve()
        .ok_or_else(|| vec!["no default target for this host, pass --target".to_owned()])
}

fn emit(sources: &Sources, stage: Stage, target: Target) -> Outcome {
    let src = sources.text();
    let text = match stage {
        Stage::Tokens => {
            let mut text = String::new();
            for token in compile::lex(src) {
                _ = writeln!(text, "{} {}", token.span(), token.kind);
            }
            text
        }
        Stage::Ast => {
            let checked = compile::check(src).map_err(|e| render(sources, e))?;
            lc::util::fmt::tree::print_program_string(
                &checked.idents,
                &checked.types,
                &checked.program,
            )
        }
        Stage::Mir => {
            let checked = compile::check(src).map_err(|e| render(sources, e))?;
            let program = compile::lower(&checked).map_err(|e| render(sources, e))?;
            program.to_string()
        }
        Stage::Asm => compile::asm(src, resolve(target)?).map_err(|e| render(sources, e))?,
        Stage::Llvm => {
            let modules = compile::llvm(src, resolve(target)?).map_err(|e| render(sources, e))?;
            format!("{}\n{}", modules.usercode, modules.runtime)
        }
    };
    write_stdout(&text).map_err(|e| vec![format!("cannot write output: {e}")])
}

/// A reader which went away, as in `l emit --stage asm | head`, is not an
/// error.
fn write_stdout(text: &str) -> io::Result<()> {
    write_out(&mut io::stdout().lock(), text)
}

fn write_out(out: &mut impl io::Write, text: &str) -> io::Result<()> {
    match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
}

fn build(
    sources: &Sources,
    backend: Backend,
    target: Target,
    output: &Path,
    keep_temps: bool,
    tools: &AsmTools<'_>,
) -> Outcome {
    let target = resolve(target)?;
    let src = sources.text();

    let temps = tempfile::Builder::new()
        .prefix("l-build-")
        .tempdir()
        .map_err(|e| vec![format!("cannot create a temporary directory: {e}")])?;

    let tool_failed = |e: toolchain::ToolchainError| vec![e.to_string()];
    let result = match backend {
        Backend::Llvm => compile::llvm(src, target)
            .map_err(|e| render(sources, e))
            .and_then(|modules| {
                toolchain::build_llvm(temps.path(), &modules, target, output).map_err(tool_failed)
            }),
        Backend::Asm => compile::asm(src, target)
            .map_err(|e| render(sources, e))
            .and_then(|asm| {
                toolchain::build_asm(temps.path(), &asm, target, tools, output).map_err(tool_failed)
            }),
    };

    match result {
        Ok(()) if !keep_temps => Ok(()),
        Ok(()) => {
            eprintln!("kept temporary files in {}", temps.keep().display());
            Ok(())
        }
        Err(mut lines) => {
            error!(%target, "build failed");
            let kept = temps.keep();
            lines.push(format!("kept temporary files in {}", kept.display()));
            Err(lines)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closed;

    impl io::Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn closed_readers_are_not_errors() {
        assert!(write_out(&mut Closed, "TEXT main(SB)\n").is_ok());
        let mut buf = Vec::new();
        write_out(&mut buf, "ok\n").unwrap();
        assert_eq!(buf, b"ok\n");
    }

    #[test]
    fn compile_errors_keep_the_temporary_directory() {
        let sources = Sources::single("main.l", "proc main() {\n    PrintInt(missing)\n}\n");
        let tools = AsmTools {
            assembler: "as",
            packer: "pack",
            linker: "ld",
        };
        let lines = build(
            &sources,
            Backend::Llvm,
            Target::x86_64_linux,
            Path::new("never-written"),
            false,
            &tools,
        )
        .unwrap_err();

        assert_eq!(lines[0], "main.l:2:14: ScopeError: `missing` is not defined");
        let kept = lines[1]
            .strip_prefix("kept temporary files in ")
            .map(PathBuf::from)
            .unwrap();
        assert!(kept.is_dir());
        fs::remove_dir_all(kept).unwrap();
    }
}
