use std::collections::{HashMap, HashSet};

use crate::{
    ast::{CallableKind, Ret, Var},
    token::Span,
    types::TypeId,
    util::intern::{Interner, Symbol},
};

/// A set of effect tags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Effects(u8);

impl Effects {
    pub const NONE: Effects = Effects(0);
    pub const IO: Effects = Effects(1);
    pub const FILESYSTEM: Effects = Effects(1 << 1);
    pub const FD: Effects = Effects(1 << 2);

    pub const fn union(self, other: Effects) -> Effects {
        Effects(self.0 | other.0)
    }

    pub const fn contains(self, other: Effects) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        [
            (Effects::IO, "IO"),
            (Effects::FILESYSTEM, "Filesystem"),
            (Effects::FD, "FD"),
        ]
        .into_iter()
        .filter(move |(e, _)| self.contains(*e))
        .map(|(_, name)| name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    PrintString,
    PrintInt,
    PrintByteSlice,
    Write,
    Read,
    Open,
    Create,
    Close,
    Exit,
    Len,
}

/// Parameter and return types of built-in callables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuiltinTy {
    Int,
    Uint64,
    String,
    ByteSlice,
    /// Any slice or array; only used by `len`.
    AnySlice,
}

impl BuiltinTy {
    pub const fn type_id(self) -> TypeId {
        match self {
            BuiltinTy::Int => TypeId::INT,
            BuiltinTy::Uint64 => TypeId::UINT64,
            BuiltinTy::String => TypeId::STRING,
            BuiltinTy::ByteSlice | BuiltinTy::AnySlice => TypeId::BYTE_SLICE,
        }
    }
}

pub struct BuiltinEntry {
    pub builtin: Builtin,
    pub name: &'static str,
    /// `(name, type, by reference)`
    pub params: &'static [(&'static str, BuiltinTy, bool)],
    pub returns: &'static [BuiltinTy],
    pub effects: Effects,
}

pub static BUILTINS: &[BuiltinEntry] = &[
    BuiltinEntry {
        builtin: Builtin::PrintString,
        name: "PrintString",
        params: &[("s", BuiltinTy::String, false)],
        returns: &[],
        effects: Effects::IO,
    },
    BuiltinEntry {
        builtin: Builtin::PrintInt,
        name: "PrintInt",
        params: &[("n", BuiltinTy::Int, false)],
        returns: &[],
        effects: Effects::IO,
    },
    BuiltinEntry {
        builtin: Builtin::PrintByteSlice,
        name: "PrintByteSlice",
        params: &[("buf", BuiltinTy::ByteSlice, false)],
        returns: &[],
        effects: Effects::IO,
    },
    BuiltinEntry {
        builtin: Builtin::Write,
        name: "Write",
        params: &[
            ("fd", BuiltinTy::Uint64, false),
            ("buf", BuiltinTy::ByteSlice, false),
        ],
        returns: &[BuiltinTy::Uint64],
        effects: Effects::IO,
    },
    BuiltinEntry {
        builtin: Builtin::Read,
        name: "Read",
        params: &[
            ("fd", BuiltinTy::Uint64, false),
            ("buf", BuiltinTy::ByteSlice, true),
        ],
        returns: &[BuiltinTy::Uint64],
        effects: Effects::IO.union(Effects::FD),
    },
    BuiltinEntry {
        builtin: Builtin::Open,
        name: "Open",
        params: &[("path", BuiltinTy::String, false)],
        returns: &[BuiltinTy::Uint64],
        effects: Effects::FILESYSTEM.union(Effects::FD),
    },
    BuiltinEntry {
        builtin: Builtin::Create,
        name: "Create",
        params: &[("path", BuiltinTy::String, false)],
        returns: &[BuiltinTy::Uint64],
        effects: Effects::FILESYSTEM.union(Effects::FD),
    },
    BuiltinEntry {
        builtin: Builtin::Close,
        name: "Close",
        params: &[("fd", BuiltinTy::Uint64, false)],
        returns: &[],
        effects: Effects::FD,
    },
    BuiltinEntry {
        builtin: Builtin::Exit,
        name: "Exit",
        params: &[("code", BuiltinTy::Int, false)],
        returns: &[],
        effects: Effects::IO,
    },
    BuiltinEntry {
        builtin: Builtin::Len,
        name: "len",
        params: &[("s", BuiltinTy::AnySlice, false)],
        returns: &[BuiltinTy::Uint64],
        effects: Effects::NONE,
    },
];

impl Builtin {
    pub fn entry(self) -> &'static BuiltinEntry {
        BUILTINS
            .iter()
            .find(|entry| entry.builtin == self)
            .expect("every builtin has a table entry")
    }

    /// Symbol the back ends call.
    pub fn symbol(self) -> &'static str {
        self.entry().name
    }
}

/// A callable's full signature, as extracted by the prototype pass.
#[derive(Clone, Debug)]
pub struct Signature {
    pub kind: CallableKind,
    pub name: Symbol,
    pub params: Vec<Var>,
    pub returns: Vec<Ret>,
    pub builtin: Option<Builtin>,
    /// Effects known up front. Only built-ins have any before the call graph
    /// is solved.
    pub effects: Effects,
    pub span: Option<Span>,
}

impl Signature {
    pub fn from_builtin(entry: &BuiltinEntry, idents: &mut Interner) -> Signature {
        let params = entry
            .params
            .iter()
            .map(|&(name, ty, by_ref)| Var {
                name: idents.intern(name),
                ty: ty.type_id(),
                by_ref,
            })
            .collect();
        let returns = entry
            .returns
            .iter()
            .map(|ty| Ret {
                name: None,
                ty: ty.type_id(),
            })
            .collect();
        let kind = if entry.effects.is_empty() {
            CallableKind::Func
        } else {
            CallableKind::Proc
        };
        Signature {
            kind,
            name: idents.intern(entry.name),
            params,
            returns,
            builtin: Some(entry.builtin),
            effects: entry.effects,
            span: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EnumOption {
    pub parent: TypeId,
    pub index: u32,
}

/// Name tables produced by the prototype pass. Immutable afterwards.
#[derive(Default)]
pub struct SymbolTable {
    pub types: HashMap<Symbol, TypeId>,
    pub callables: HashMap<Symbol, Signature>,
    pub enum_options: HashMap<Symbol, EnumOption>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Let,
    Mutable,
    Param,
}

#[derive(Copy, Clone, Debug)]
pub struct Binding {
    pub var: Var,
    pub kind: BindingKind,
}

impl Binding {
    /// Whether the binding may be reassigned.
    pub fn is_assignable(&self) -> bool {
        match self.kind {
            BindingKind::Mutable => true,
            BindingKind::Param => self.var.by_ref,
            BindingKind::Let => false,
        }
    }
}

/// Lexical state of the function being checked.
pub struct Context {
    scopes: Vec<HashMap<Symbol, Binding>>,
    /// Every mutable introduced so far in the current function, whether or not
    /// its scope is still open.
    mutables: HashSet<Symbol>,
    pub pure: bool,
    pub current: Option<Symbol>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Context {
        Context {
            scopes: Vec::with_capacity(8),
            mutables: HashSet::with_capacity(8),
            pure: false,
            current: None,
        }
    }

    /// Starts a function, binding its parameters in a fresh scope.
    pub fn enter_function(&mut self, sig: &Signature) {
        self.scopes.clear();
        self.mutables.clear();
        self.pure = sig.kind == CallableKind::Func;
        self.current = Some(sig.name);
        self.push();
        for param in &sig.params {
            if param.by_ref {
                self.mutables.insert(param.name);
            }
            self.bind(*param, BindingKind::Param);
        }
    }

    pub fn exit_function(&mut self) {
        self.scopes.clear();
        self.mutables.clear();
        self.pure = false;
        self.current = None;
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::with_capacity(4));
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn lookup(&self, name: Symbol) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }

    pub fn is_mutable_name(&self, name: Symbol) -> bool {
        self.mutables.contains(&name)
    }

    pub fn bind(&mut self, var: Var, kind: BindingKind) {
        if kind == BindingKind::Mutable {
            self.mutables.insert(var.name);
        }
        self.scopes
            .last_mut()
            .expect("bind outside of a scope")
            .insert(var.name, Binding { var, kind });
    }
}

/// Monotonic counters shared by every function of a compilation.
#[derive(Default)]
pub struct Counters {
    labels: u32,
}

impl Counters {
    pub fn next_label(&mut self) -> u32 {
        self.labels += 1;
        self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects() {
        let rw = Effects::IO.union(Effects::FD);
        assert!(rw.contains(Effects::IO));
        assert!(!rw.contains(Effects::FILESYSTEM));
        assert_eq!(rw.names().collect::<Vec<_>>(), ["IO", "FD"]);
        assert!(Builtin::Len.entry().effects.is_empty());
        assert_eq!(Builtin::Read.entry().effects, rw);
    }

    #[test]
    fn scopes_restore_outer_binding() {
        let mut i = Interner::with_capacity(4);
        let x = i.intern("x");
        let mut ctx = Context::new();
        ctx.push();
        ctx.bind(
            Var {
                name: x,
                ty: TypeId::INT,
                by_ref: false,
            },
            BindingKind::Let,
        );
        ctx.push();
        ctx.bind(
            Var {
                name: x,
                ty: TypeId::BOOL,
                by_ref: false,
            },
            BindingKind::Mutable,
        );
        assert_eq!(ctx.lookup(x).map(|b| b.var.ty), Some(TypeId::BOOL));
        ctx.pop();
        assert_eq!(ctx.lookup(x).map(|b| b.var.ty), Some(TypeId::INT));
        assert!(ctx.is_mutable_name(x));
    }

    #[test]
    fn labels_are_unique() {
        let mut c = Counters::default();
        let a = c.next_label();
        let b = c.next_label();
        assert_ne!(a, b);
    }
}
