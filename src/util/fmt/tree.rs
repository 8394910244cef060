use std::io::Write;

use crate::{
    ast::*,
    types::{TypeId, TypeKind, TypeTable},
    util::intern::Interner,
};

const INDENT_WIDTH: usize = 2;

/// Names and types needed to print a checked tree.
#[derive(Copy, Clone)]
pub struct Names<'a> {
    pub idents: &'a Interner,
    pub types: &'a TypeTable,
}

impl Names<'_> {
    fn ty(&self, ty: TypeId) -> String {
        self.types.display(ty, self.idents)
    }
}

pub fn print_program_string(idents: &Interner, types: &TypeTable, program: &Program) -> String {
    let mut buf = Vec::with_capacity(1024);
    print_program(&mut buf, Names { idents, types }, program).unwrap();
    String::from_utf8(buf).unwrap()
}

pub fn print_program(w: &mut impl Write, n: Names<'_>, program: &Program) -> std::io::Result<()> {
    for decl in &program.decls {
        match decl {
            Decl::Func(func) => print_func(w, n, func)?,
            Decl::TypeDefn(defn) | Decl::Enum(defn) => print_type_defn(w, n, defn)?,
        }
    }
    Ok(())
}

fn print_type_defn(w: &mut impl Write, n: Names<'_>, defn: &TypeDefn) -> std::io::Result<()> {
    let name = n.idents.get(defn.name.name);
    match n.types.get(defn.ty) {
        TypeKind::User { underlying, .. } => {
            writeln!(w, "type {name} = {}", n.ty(*underlying))
        }
        TypeKind::Sum(sum) => {
            write!(w, "type {name} =")?;
            for (idx, alt) in sum.alts.iter().enumerate() {
                let sep = if idx > 0 { " |" } else { "" };
                write!(w, "{sep} {}", n.ty(*alt))?;
            }
            writeln!(w)
        }
        TypeKind::Enum(defn) => {
            write!(w, "data {name}")?;
            for param in defn.params.iter() {
                write!(w, " {}", n.idents.get(param))?;
            }
            write!(w, " =")?;
            for (idx, ctor) in defn.ctors.iter().enumerate() {
                let sep = if idx > 0 { " |" } else { "" };
                write!(w, "{sep} {}", n.idents.get(ctor.name))?;
                for field in ctor.fields.iter() {
                    write!(w, " {}", n.ty(*field))?;
                }
            }
            writeln!(w)
        }
        _ => writeln!(w, "type {name} = {}", n.ty(defn.ty)),
    }
}

fn print_func(w: &mut impl Write, n: Names<'_>, func: &FuncDecl) -> std::io::Result<()> {
    write!(w, "{} {}(", func.kind.keyword(), n.idents.get(func.name.name))?;
    for (idx, param) in func.params.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        let mutable = if param.by_ref { "mutable " } else { "" };
        write!(w, "{mutable}{}: {}", n.idents.get(param.name), n.ty(param.ty))?;
    }
    write!(w, ")")?;
    if !func.returns.is_empty() {
        write!(w, " -> (")?;
        for (idx, ret) in func.returns.iter().enumerate() {
            if idx > 0 {
                write!(w, ", ")?;
            }
            if let Some(name) = ret.name {
                write!(w, "{}: ", n.idents.get(name))?;
            }
            write!(w, "{}", n.ty(ret.ty))?;
        }
        write!(w, ")")?;
    }
    if !func.effects.is_empty() {
        write!(w, " [")?;
        for (idx, effect) in func.effects.names().enumerate() {
            let sep = if idx > 0 { ", " } else { "" };
            write!(w, "{sep}{effect}")?;
        }
        write!(w, "]")?;
    }
    writeln!(w)?;
    print_block(w, n, 1, &func.body)
}

fn print_block(w: &mut impl Write, n: Names<'_>, i: usize, block: &Block) -> std::io::Result<()> {
    sp(w, i)?;
    writeln!(w, "block ({})", block.span)?;
    for stmt in &block.stmts {
        print_stmt(w, n, i + 1, stmt)?;
    }
    Ok(())
}

fn print_vars(w: &mut impl Write, n: Names<'_>, vars: &[Var]) -> std::io::Result<()> {
    for (idx, var) in vars.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write!(w, "{}: {}", n.idents.get(var.name), n.ty(var.ty))?;
    }
    Ok(())
}

pub fn print_stmt(w: &mut impl Write, n: Names<'_>, i: usize, stmt: &Stmt) -> std::io::Result<()> {
    sp(w, i)?;
    let span = stmt.span;
    match &stmt.kind {
        StmtKind::Let { names, value, .. } => {
            write!(w, "let ")?;
            print_vars(w, n, names)?;
            writeln!(w, " ({span})")?;
            print_value(w, n, i + 1, value)?;
        }
        StmtKind::Mutable { var, value, .. } => {
            write!(w, "mutable ")?;
            print_vars(w, n, std::slice::from_ref(var))?;
            writeln!(w, " ({span})")?;
            print_value(w, n, i + 1, value)?;
        }
        StmtKind::Assign { target, value } => {
            match target {
                Target::Var(var) => writeln!(w, "assign {} ({span})", n.idents.get(var.name))?,
                Target::Index { base, index } => {
                    writeln!(w, "assign {}[] ({span})", n.idents.get(base.name))?;
                    print_value(w, n, i + 1, index)?;
                }
            }
            print_value(w, n, i + 1, value)?;
        }
        StmtKind::Return(values) => {
            writeln!(w, "return ({span})")?;
            for value in values {
                print_value(w, n, i + 1, value)?;
            }
        }
        StmtKind::While { cond, body } => {
            writeln!(w, "while ({span})")?;
            print_value(w, n, i + 1, cond)?;
            print_block(w, n, i + 1, body)?;
        }
        StmtKind::If {
            cond,
            then_block,
            else_block,
        } => {
            writeln!(w, "if ({span})")?;
            print_value(w, n, i + 1, cond)?;
            print_block(w, n, i + 1, then_block)?;
            if let Some(else_block) = else_block {
                sp(w, i)?;
                writeln!(w, "else")?;
                print_block(w, n, i + 1, else_block)?;
            }
        }
        StmtKind::Match { scrutinee, cases } => {
            writeln!(w, "match ({span})")?;
            print_value(w, n, i + 1, scrutinee)?;
            for case in cases {
                print_case(w, n, i + 1, case)?;
            }
        }
        StmtKind::Call(call) => {
            writeln!(w, "call {} ({span})", n.idents.get(call.callee))?;
            for arg in &call.args {
                print_value(w, n, i + 1, arg)?;
            }
        }
        StmtKind::Assert { cond, message } => {
            write!(w, "assert")?;
            if let Some(message) = message {
                write!(w, " {message:?}")?;
            }
            writeln!(w, " ({span})")?;
            print_value(w, n, i + 1, cond)?;
        }
    }
    Ok(())
}

fn print_case(w: &mut impl Write, n: Names<'_>, i: usize, case: &Case) -> std::io::Result<()> {
    sp(w, i)?;
    write!(w, "case ")?;
    match &case.pattern {
        Pattern::Ctor { name, bindings, .. } => {
            write!(w, "{}", n.idents.get(name))?;
            if !bindings.is_empty() {
                write!(w, "(")?;
                print_vars(w, n, bindings)?;
                write!(w, ")")?;
            }
            writeln!(w, " ({})", case.span)?;
        }
        Pattern::Alt { ty, binding, .. } => {
            write!(w, "{}", n.ty(*ty))?;
            if let Some(binding) = binding {
                write!(w, " {}", n.idents.get(binding.name))?;
            }
            writeln!(w, " ({})", case.span)?;
        }
        Pattern::Value(value) => {
            writeln!(w, "value ({})", case.span)?;
            print_value(w, n, i + 2, value)?;
        }
    }
    print_block(w, n, i + 1, &case.body)
}

pub fn print_value(w: &mut impl Write, n: Names<'_>, i: usize, value: &Value) -> std::io::Result<()> {
    sp(w, i)?;
    let span = value.span;
    let info = format!(" %: {}", n.ty(value.ty));
    match &value.kind {
        ValueKind::Int(val) => writeln!(w, "int {val} ({span}{info})")?,
        ValueKind::Bool(val) => writeln!(w, "bool {val} ({span}{info})")?,
        ValueKind::String(val) => writeln!(w, "string {val:?} ({span}{info})")?,
        ValueKind::Var(var) => {
            writeln!(w, "var {} ({span}{info})", n.idents.get(var.name))?;
        }
        ValueKind::Binary { op, lhs, rhs } => {
            writeln!(w, "binary {op:?} ({span}{info})")?;
            print_value(w, n, i + 1, lhs)?;
            print_value(w, n, i + 1, rhs)?;
        }
        ValueKind::Neg(inner) => {
            writeln!(w, "neg ({span}{info})")?;
            print_value(w, n, i + 1, inner)?;
        }
        ValueKind::Call(call) => {
            writeln!(w, "call {} ({span}{info})", n.idents.get(call.callee))?;
            for arg in &call.args {
                print_value(w, n, i + 1, arg)?;
            }
        }
        ValueKind::ArrayLiteral(values) => {
            writeln!(w, "array ({span}{info})")?;
            for value in values {
                print_value(w, n, i + 1, value)?;
            }
        }
        ValueKind::Index { base, index } => {
            writeln!(w, "index {} ({span}{info})", n.idents.get(base.name))?;
            print_value(w, n, i + 1, index)?;
        }
        ValueKind::Slice { base, lo, hi } => {
            writeln!(w, "slice {} ({span}{info})", n.idents.get(base.name))?;
            for (label, bound) in [("lo", lo), ("hi", hi)] {
                if let Some(bound) = bound {
                    sp(w, i + 1)?;
                    writeln!(w, "{label}")?;
                    print_value(w, n, i + 2, bound)?;
                }
            }
        }
        ValueKind::Cast(inner) => {
            writeln!(w, "cast ({span}{info})")?;
            print_value(w, n, i + 1, inner)?;
        }
        ValueKind::Brackets(inner) => {
            writeln!(w, "paren ({span}{info})")?;
            print_value(w, n, i + 1, inner)?;
        }
        ValueKind::EnumOption { name, .. } => {
            writeln!(w, "option {} ({span}{info})", n.idents.get(name))?;
        }
        ValueKind::EnumValue { name, args, .. } => {
            writeln!(w, "construct {} ({span}{info})", n.idents.get(name))?;
            for arg in args {
                print_value(w, n, i + 1, arg)?;
            }
        }
        ValueKind::Tuple(values) => {
            writeln!(w, "tuple ({span}{info})")?;
            for value in values {
                print_value(w, n, i + 1, value)?;
            }
        }
        ValueKind::Field { base, index } => {
            writeln!(w, "field {index} ({span}{info})")?;
            print_value(w, n, i + 1, base)?;
        }
        ValueKind::Wrap { index, inner } => {
            writeln!(w, "wrap {index} ({span}{info})")?;
            print_value(w, n, i + 1, inner)?;
        }
        ValueKind::Len(inner) => {
            writeln!(w, "len ({span}{info})")?;
            print_value(w, n, i + 1, inner)?;
        }
    }
    Ok(())
}

fn sp(w: &mut impl Write, i: usize) -> std::io::Result<()> {
    write!(w, "{:width$}", "", width = i * INDENT_WIDTH)
}
