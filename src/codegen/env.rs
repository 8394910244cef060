//! Operating system details the back ends are parameterized over.

pub trait Env {
    const NAME: &str;
    const TRIPLE: &str;

    /// Symbol the linker starts the executable at, as written in assembly.
    const ENTRY_POINT: &str;
    /// Prepended to C-level names to form assembly-level symbols.
    const SYMBOL_PREFIX: &str;

    const SYS_READ: u64;
    const SYS_WRITE: u64;
    const SYS_OPEN: u64;
    const SYS_CLOSE: u64;
    const SYS_EXIT: u64;

    /// `O_WRONLY | O_CREAT | O_TRUNC`
    const CREATE_FLAGS: u64;
    const CREATE_MODE: u64 = 0o644;
}

impl Env for Darwin {
    const NAME: &str = "darwin";
    const TRIPLE: &str = "x86_64-apple-darwin";

    const ENTRY_POINT: &str = "_start";
    const SYMBOL_PREFIX: &str = "_";

    const SYS_READ: u64 = 0x200_0003;
    const SYS_WRITE: u64 = 0x200_0004;
    const SYS_OPEN: u64 = 0x200_0005;
    const SYS_CLOSE: u64 = 0x200_0006;
    const SYS_EXIT: u64 = 0x200_0001;

    const CREATE_FLAGS: u64 = 0x601;
}

impl Env for Linux {
    const NAME: &str = "linux";
    const TRIPLE: &str = "x86_64-unknown-linux-gnu";

    const ENTRY_POINT: &str = "_start";
    const SYMBOL_PREFIX: &str = "";

    const SYS_READ: u64 = 0;
    const SYS_WRITE: u64 = 1;
    const SYS_OPEN: u64 = 2;
    const SYS_CLOSE: u64 = 3;
    const SYS_EXIT: u64 = 60;

    const CREATE_FLAGS: u64 = 0o1101;
}

pub struct Darwin;

pub struct Linux;
