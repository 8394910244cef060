use std::fmt;

use tracing::debug;

use crate::{ast, mir, types::TypeTable, util::intern::Interner};

use self::env::Env as _;

pub mod amd64;
pub mod env;
pub mod llvm;

#[derive(Debug)]
pub enum Error {
    /// An internal invariant of the compiler was broken.
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Logic(msg) => write!(f, "CodegenError: {msg}"),
            Error::Format(e) => write!(f, "CodegenError: failed to format output: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<fmt::Error> for Error {
    fn from(e: fmt::Error) -> Self {
        Error::Format(e)
    }
}

/// Emits Plan 9 style assembly for a lowered program, runtime included.
pub fn generate_asm(program: &mir::Program, target: Target) -> Result<String, Error> {
    type DarwinGenerator<'a> = amd64::Generator<'a, env::Darwin>;
    type LinuxGenerator<'a> = amd64::Generator<'a, env::Linux>;

    let out = match target {
        Target::x86_64_darwin => DarwinGenerator::new(program).generate()?,
        Target::x86_64_linux => LinuxGenerator::new(program).generate()?,
    };
    debug!(%target, bytes = out.len(), "emitted assembly");
    Ok(out)
}

/// The two modules of the LLVM back end.
pub struct LlvmModules {
    pub usercode: String,
    pub runtime: String,
}

/// Lowers a checked program straight to LLVM IR.
pub fn generate_llvm(
    idents: &Interner,
    types: &TypeTable,
    program: &ast::Program,
    target: Target,
) -> Result<LlvmModules, Error> {
    let (usercode, runtime) = match target {
        Target::x86_64_darwin => (
            llvm::lower::<env::Darwin>(idents, types, program)?,
            llvm::runtime::<env::Darwin>(),
        ),
        Target::x86_64_linux => (
            llvm::lower::<env::Linux>(idents, types, program)?,
            llvm::runtime::<env::Linux>(),
        ),
    };
    let modules = LlvmModules {
        usercode: usercode.to_string(),
        runtime: runtime.to_string(),
    };
    debug!(
        %target,
        usercode = modules.usercode.len(),
        runtime = modules.runtime.len(),
        "emitted llvm modules"
    );
    Ok(modules)
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    x86_64_darwin,
    x86_64_linux,
}

impl Target {
    pub const ALL: &[Target] = &[Target::x86_64_darwin, Target::x86_64_linux];

    pub const fn triple(&self) -> &'static str {
        match self {
            Target::x86_64_darwin => env::Darwin::TRIPLE,
            Target::x86_64_linux => env::Linux::TRIPLE,
        }
    }

    /// Operating system name, as the Go toolchain spells it.
    pub const fn os(&self) -> &'static str {
        match self {
            Target::x86_64_darwin => env::Darwin::NAME,
            Target::x86_64_linux => env::Linux::NAME,
        }
    }

    /// Symbol the linker starts the executable at.
    pub const fn entry_point(&self) -> &'static str {
        match self {
            Target::x86_64_darwin => env::Darwin::ENTRY_POINT,
            Target::x86_64_linux => env::Linux::ENTRY_POINT,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::x86_64_darwin => f.write_str("x86_64_darwin"),
            Target::x86_64_linux => f.write_str("x86_64_linux"),
        }
    }
}
