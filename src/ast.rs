// program ::= decl*
// decl ::= ('func' | 'proc') NAME '(' [param (',' param)*] ')' [returns] block
//        | 'type' NAME '=' type ('|' type)*
//        | 'data' NAME PARAM* '=' ctor ('|' ctor)*
// param ::= ['mutable'] NAME type
// returns ::= '(' [NAME] type (',' [NAME] type)* ')'
// ctor ::= NAME type*
// type ::= BUILTIN | NAME | '[' [INT] ']' type | '(' NAME type (',' NAME type)* ')'
// block ::= '{' stmt* '}'
// stmt ::= 'let' NAME (',' NAME)* [type] '=' value
//        | 'mutable' NAME [type] '=' value
//        | NAME '=' value
//        | NAME '[' value ']' '=' value
//        | NAME '(' [value (',' value)*] ')'
//        | 'return' [value (',' value)*]
//        | 'while' value block
//        | 'if' value block ['else' (block | if)]
//        | 'match' value '{' ('case' pattern ':' stmt*)* '}'
//        | 'assert' '(' value [',' STRING] ')'
// pattern ::= CTOR ['(' NAME (',' NAME)* ')'] | type [NAME] | value
// value ::= value op value | '-' value | value 'as' type | value '.' (NAME | INT)
//         | NAME '(' [value (',' value)*] ')' | NAME '[' value ']'
//         | NAME '[' [value] ':' [value] ']' | '{' [value (',' value)*] '}'
//         | '(' value ')' | '(' value (',' value)+ ')'
//         | NAME | INT | STRING | 'true' | 'false'

// Precedence
//
// as .
// - (prefix)
// * / %
// + -
// < <= == != >= >

use crate::{
    context::{Builtin, Effects},
    token::Span,
    types::{TypeId, TypeTable},
    util::intern::Symbol,
};

#[derive(Debug, Default)]
pub struct Program {
    pub decls: Vec<Decl>,
}

impl Program {
    pub fn funcs(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(|decl| match decl {
            Decl::Func(func) => Some(func),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub enum Decl {
    Func(FuncDecl),
    /// `type X = T`, or a sum type when more than one alternative is given.
    TypeDefn(TypeDefn),
    Enum(TypeDefn),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallableKind {
    Func,
    Proc,
}

impl CallableKind {
    pub const fn keyword(self) -> &'static str {
        match self {
            CallableKind::Func => "func",
            CallableKind::Proc => "proc",
        }
    }
}

#[derive(Debug)]
pub struct FuncDecl {
    pub kind: CallableKind,
    pub name: Ident,
    pub params: Vec<Var>,
    pub returns: Vec<Ret>,
    pub body: Block,
    pub effects: Effects,
}

#[derive(Debug)]
pub struct TypeDefn {
    pub name: Ident,
    pub ty: TypeId,
}

/// A variable with its type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Var {
    pub name: Symbol,
    pub ty: TypeId,
    pub by_ref: bool,
}

impl Var {
    /// Whether the variable holds the address of its value rather than the
    /// value itself. Slices are already references, so they never do.
    pub fn by_pointer(&self, types: &TypeTable) -> bool {
        self.by_ref && !types.is_slice(self.ty)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ret {
    pub name: Option<Symbol>,
    pub ty: TypeId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ident {
    pub name: Symbol,
    pub span: Span,
}

#[derive(Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    /// Whether every path through the block reaches a `return`. Matches on
    /// plain values may skip every case, enum and sum matches can't.
    pub fn always_returns(&self) -> bool {
        self.stmts.iter().any(|stmt| match &stmt.kind {
            StmtKind::Return(_) => true,
            StmtKind::If {
                then_block,
                else_block: Some(else_block),
                ..
            } => then_block.always_returns() && else_block.always_returns(),
            StmtKind::Match { cases, .. } => {
                !cases.is_empty()
                    && cases.iter().all(|case| {
                        !matches!(case.pattern, Pattern::Value(_)) && case.body.always_returns()
                    })
            }
            _ => false,
        })
    }
}

#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug)]
pub enum StmtKind {
    /// Binds one name, or destructures a tuple into several.
    Let {
        names: Vec<Var>,
        declared: Option<TypeId>,
        value: Value,
    },
    Mutable {
        var: Var,
        declared: Option<TypeId>,
        value: Value,
    },
    Assign {
        target: Target,
        value: Value,
    },
    Return(Vec<Value>),
    While {
        cond: Value,
        body: Block,
    },
    If {
        cond: Value,
        then_block: Block,
        else_block: Option<Block>,
    },
    Match {
        scrutinee: Value,
        cases: Vec<Case>,
    },
    Call(Call),
    Assert {
        cond: Value,
        message: Option<Box<str>>,
    },
}

#[derive(Debug)]
pub enum Target {
    Var(Var),
    Index { base: Var, index: Box<Value> },
}

#[derive(Debug)]
pub struct Case {
    pub pattern: Pattern,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug)]
pub enum Pattern {
    /// An enum constructor, binding its payload fields in order.
    Ctor {
        name: Symbol,
        index: u32,
        bindings: Vec<Var>,
    },
    /// One alternative of a sum type.
    Alt {
        ty: TypeId,
        index: u32,
        binding: Option<Var>,
    },
    Value(Value),
}

#[derive(Debug)]
pub struct Call {
    pub callee: Symbol,
    pub builtin: Option<Builtin>,
    /// The callee's parameters, so back ends know how to pass each argument.
    pub params: Vec<Var>,
    pub args: Vec<Value>,
    pub returns: Vec<TypeId>,
}

#[derive(Debug)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Debug)]
pub enum ValueKind {
    /// A literal as written. Its range is checked once its type is known,
    /// and a leading minus is a separate [`ValueKind::Neg`].
    Int(i128),
    Bool(bool),
    String(Box<str>),
    Var(Var),
    Binary {
        op: BinaryOperator,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    Neg(Box<Value>),
    Call(Call),
    /// Typed as an array, or as a slice when it initializes one.
    ArrayLiteral(Vec<Value>),
    Index {
        base: Var,
        index: Box<Value>,
    },
    Slice {
        base: Var,
        lo: Option<Box<Value>>,
        hi: Option<Box<Value>>,
    },
    Cast(Box<Value>),
    Brackets(Box<Value>),
    /// A constructor without payload.
    EnumOption {
        name: Symbol,
        index: u32,
    },
    EnumValue {
        name: Symbol,
        index: u32,
        args: Vec<Value>,
    },
    Tuple(Vec<Value>),
    Field {
        base: Box<Value>,
        index: u32,
    },
    /// A value placed into a sum type slot.
    Wrap {
        index: u32,
        inner: Box<Value>,
    },
    Len(Box<Value>),
}

impl Value {
    /// Whether evaluating this value performs a call.
    pub fn contains_call(&self) -> bool {
        match &self.kind {
            ValueKind::Int(_)
            | ValueKind::Bool(_)
            | ValueKind::String(_)
            | ValueKind::Var(_)
            | ValueKind::EnumOption { .. } => false,
            ValueKind::Call(_) => true,
            ValueKind::Binary { lhs, rhs, .. } => lhs.contains_call() || rhs.contains_call(),
            ValueKind::Neg(inner)
            | ValueKind::Cast(inner)
            | ValueKind::Brackets(inner)
            | ValueKind::Len(inner)
            | ValueKind::Wrap { inner, .. }
            | ValueKind::Field { base: inner, .. } => inner.contains_call(),
            ValueKind::ArrayLiteral(values)
            | ValueKind::Tuple(values)
            | ValueKind::EnumValue { args: values, .. } => values.iter().any(Value::contains_call),
            ValueKind::Index { index, .. } => index.contains_call(),
            ValueKind::Slice { lo, hi, .. } => {
                lo.as_ref().is_some_and(|v| v.contains_call())
                    || hi.as_ref().is_some_and(|v| v.contains_call())
            }
        }
    }

    /// Strips explicit grouping.
    pub fn unbracketed(&self) -> &Value {
        match &self.kind {
            ValueKind::Brackets(inner) => inner.unbracketed(),
            _ => self,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl BinaryOperator {
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Lt
                | BinaryOperator::Le
                | BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Ge
                | BinaryOperator::Gt
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Gt => ">",
        }
    }

    /// The comparison which holds exactly when `self` doesn't.
    pub const fn inverse(self) -> BinaryOperator {
        match self {
            BinaryOperator::Lt => BinaryOperator::Ge,
            BinaryOperator::Le => BinaryOperator::Gt,
            BinaryOperator::Eq => BinaryOperator::Ne,
            BinaryOperator::Ne => BinaryOperator::Eq,
            BinaryOperator::Ge => BinaryOperator::Lt,
            BinaryOperator::Gt => BinaryOperator::Le,
            other => other,
        }
    }
}
