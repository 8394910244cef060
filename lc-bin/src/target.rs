#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum Target {
    x86_64_darwin,
    x86_64_linux,
    #[clap(skip)]
    None,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.resolve() {
            Some(target) => target.fmt(f),
            None => f.write_str("none"),
        }
    }
}

impl Target {
    /// The code generator target, unless this host has no default one.
    pub const fn resolve(self) -> Option<lc::codegen::Target> {
        match self {
            Target::x86_64_darwin => Some(lc::codegen::Target::x86_64_darwin),
            Target::x86_64_linux => Some(lc::codegen::Target::x86_64_linux),
            Target::None => None,
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_os = "macos"))] {
        pub const DEFAULT_TARGET: Target = Target::x86_64_darwin;
    } else if #[cfg(all(target_arch = "x86_64", target_os = "linux"))] {
        pub const DEFAULT_TARGET: Target = Target::x86_64_linux;
    } else {
        pub const DEFAULT_TARGET: Target = Target::None;
    }
}
