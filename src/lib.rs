/// The lexer takes the source input, mapping it into a sequence of tokens.
pub mod lexer;

/// The prototype pass collects every type and signature, so that bodies may
/// refer to declarations which appear later in the source.
pub mod prototype;

/// The parser takes a sequence of tokens, mapping it into a checked AST.
/// Types, scopes, purity and exhaustiveness are enforced as it goes.
pub mod parser;

/// Lowers the checked AST into a word-oriented intermediate representation.
pub mod mir;

/// Back ends: Plan 9 style AMD64 assembly and textual LLVM IR.
pub mod codegen;

/// Runs every pass in order.
pub mod compile;

pub mod ast;
pub mod context;
pub mod error;
pub mod token;
pub mod types;

pub mod util {
    pub mod fmt;
    pub mod intern;
    #[cfg(test)]
    pub(crate) mod test_utils;
}
