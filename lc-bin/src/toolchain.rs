//! Runs the external tools which turn emitted text into an executable.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use lc::codegen::{llvm, LlvmModules, Target};
use tracing::{debug, info};

/// Passes `opt` runs over the linked module. `ipsccp` and `instsimplify`
/// stand in for the retired `ipconstprop` and `constprop`.
const OPT_PASSES: &str =
    "internalize,inline,ipsccp,globaldce,instsimplify,sccp,dce,sroa,jump-threading,mem2reg";

#[derive(Debug)]
pub enum ToolchainError {
    /// The tool ran and failed; `stderr` is passed through verbatim.
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    Spawn {
        command: String,
        error: io::Error,
    },
    Io {
        path: PathBuf,
        error: io::Error,
    },
}

impl fmt::Display for ToolchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolchainError::Failed {
                command,
                status,
                stderr,
            } => {
                write!(f, "ToolchainError: `{command}` failed")?;
                if let Some(code) = status {
                    write!(f, " with status {code}")?;
                }
                if !stderr.is_empty() {
                    write!(f, "\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            ToolchainError::Spawn { command, error } => {
                write!(f, "ToolchainError: could not run `{command}`: {error}")
            }
            ToolchainError::Io { path, error } => {
                write!(f, "ToolchainError: {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ToolchainError {}

/// Tool names for the assembly path, which expects the Go toolchain. Each
/// may carry leading arguments, as in `go tool asm`.
pub struct AsmTools<'a> {
    pub assembler: &'a str,
    pub packer: &'a str,
    pub linker: &'a str,
}

pub fn write(path: &Path, contents: &str) -> Result<(), ToolchainError> {
    fs::write(path, contents).map_err(|error| ToolchainError::Io {
        path: path.to_owned(),
        error,
    })
}

/// `llvm-link`, `opt`, `llc`, then `ld`.
pub fn build_llvm(
    dir: &Path,
    modules: &LlvmModules,
    target: Target,
    output: &Path,
) -> Result<(), ToolchainError> {
    let usercode = dir.join("usercode.ll");
    let runtime = dir.join("runtime.ll");
    let linked = dir.join("linked.ll");
    let optimized = dir.join("optimized.ll");
    let object = dir.join("program.o");
    write(&usercode, &modules.usercode)?;
    write(&runtime, &modules.runtime)?;

    run(Command::new("llvm-link")
        .arg("-S")
        .arg(&usercode)
        .arg(&runtime)
        .arg("-o")
        .arg(&linked))?;
    run(&mut opt(&linked, &optimized))?;
    run(Command::new("llc")
        .arg(format!("-mtriple={}", target.triple()))
        .arg("-filetype=obj")
        .arg(&optimized)
        .arg("-o")
        .arg(&object))?;
    link(&mut Command::new("ld"), &object, target, output)
}

fn opt(input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new("opt");
    cmd.arg(format!("-passes={OPT_PASSES}"))
        .arg(format!("-internalize-public-api-list={}", llvm::START))
        .arg("-S")
        .arg(input)
        .arg("-o")
        .arg(output);
    cmd
}

/// Assembles the Plan 9 listing, packs the object into an archive and links
/// it. The Go linker is the one that reads what the Go assembler writes.
pub fn build_asm(
    dir: &Path,
    asm: &str,
    target: Target,
    tools: &AsmTools<'_>,
    output: &Path,
) -> Result<(), ToolchainError> {
    let source = dir.join("program.s");
    write(&source, asm)?;
    for mut cmd in asm_commands(dir, target, tools, output) {
        run(&mut cmd)?;
    }
    Ok(())
}

fn asm_commands(dir: &Path, target: Target, tools: &AsmTools<'_>, output: &Path) -> [Command; 3] {
    let source = dir.join("program.s");
    let object = dir.join("program.o");
    let archive = dir.join("program.a");

    let mut assemble = command(tools.assembler);
    assemble.arg("-o").arg(&object).arg(&source);
    let mut pack = command(tools.packer);
    pack.arg("c").arg(&archive).arg(&object);
    let mut link = command(tools.linker);
    link.arg("-E")
        .arg(target.entry_point())
        .arg("-H")
        .arg(target.os())
        .arg("-o")
        .arg(output)
        .arg(&archive);

    for cmd in [&mut assemble, &mut link] {
        cmd.env("GOOS", target.os()).env("GOARCH", "amd64");
    }
    [assemble, pack, link]
}

fn link(ld: &mut Command, object: &Path, target: Target, output: &Path) -> Result<(), ToolchainError> {
    ld.arg("-e").arg(target.entry_point());
    if target == Target::x86_64_darwin {
        ld.arg("-lSystem");
    } else {
        ld.arg("-static");
    }
    run(ld.arg("-o").arg(output).arg(object))
}

/// A command from a tool name which may carry leading arguments.
fn command(tool: &str) -> Command {
    let mut words = tool.split_whitespace();
    let mut cmd = Command::new(words.next().unwrap_or(tool));
    cmd.args(words);
    cmd
}

fn run(cmd: &mut Command) -> Result<(), ToolchainError> {
    let rendered = render(cmd);
    debug!(command = %rendered, "running");
    let output = cmd.output().map_err(|error| ToolchainError::Spawn {
        command: rendered.clone(),
        error,
    })?;
    if !output.status.success() {
        return Err(ToolchainError::Failed {
            command: rendered,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    info!(command = %rendered, "done");
    Ok(())
}

fn render(cmd: &Command) -> String {
    let mut rendered = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_may_carry_arguments() {
        let mut cmd = command("go tool asm");
        cmd.arg("-o").arg("x.o");
        assert_eq!(render(&cmd), "go tool asm -o x.o");
    }

    #[test]
    fn opt_runs_the_fixed_pipeline() {
        let cmd = opt(Path::new("linked.ll"), Path::new("optimized.ll"));
        assert_eq!(
            render(&cmd),
            "opt -passes=internalize,inline,ipsccp,globaldce,instsimplify,sccp,dce,sroa,\
             jump-threading,mem2reg -internalize-public-api-list=__l_start -S linked.ll \
             -o optimized.ll"
        );
    }

    #[test]
    fn asm_path_uses_the_go_linker() {
        let tools = AsmTools {
            assembler: "go tool asm -p main",
            packer: "go tool pack",
            linker: "go tool link",
        };
        let dir = Path::new("tmp");
        let [assemble, pack, link] =
            asm_commands(dir, Target::x86_64_linux, &tools, Path::new("prog"));
        assert_eq!(
            render(&assemble),
            "go tool asm -p main -o tmp/program.o tmp/program.s"
        );
        assert_eq!(render(&pack), "go tool pack c tmp/program.a tmp/program.o");
        assert_eq!(
            render(&link),
            "go tool link -E _start -H linux -o prog tmp/program.a"
        );
        let goos = link
            .get_envs()
            .find(|(key, _)| key.to_str() == Some("GOOS"))
            .and_then(|(_, value)| value?.to_str());
        assert_eq!(goos, Some("linux"));
    }

    #[test]
    fn failures_keep_stderr_verbatim() {
        let e = ToolchainError::Failed {
            command: "llc x.ll".into(),
            status: Some(1),
            stderr: "llc: error: bad\n  detail\n".into(),
        };
        assert_eq!(
            e.to_string(),
            "ToolchainError: `llc x.ll` failed with status 1\nllc: error: bad\n  detail"
        );
    }

    #[test]
    fn missing_tools_are_reported() {
        let e = run(&mut Command::new("l-tool-that-does-not-exist")).unwrap_err();
        assert!(matches!(e, ToolchainError::Spawn { .. }));
    }
}
