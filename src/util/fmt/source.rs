//! Renders a checked program back into source text. Parsing the output again
//! yields a program which renders identically.

use std::fmt::Write;

use crate::{
    ast::*,
    types::{TypeId, TypeKind, TypeTable},
    util::intern::Interner,
};

const INDENT: &str = "    ";

pub fn print_program_source(idents: &Interner, types: &TypeTable, program: &Program) -> String {
    let mut p = Printer {
        buf: String::with_capacity(1024),
        idents,
        types,
    };
    for (idx, decl) in program.decls.iter().enumerate() {
        if idx > 0 {
            p.buf.push('\n');
        }
        p.decl(decl);
    }
    p.buf
}

struct Printer<'a> {
    buf: String,
    idents: &'a Interner,
    types: &'a TypeTable,
}

impl Printer<'_> {
    fn name(&mut self, name: impl Into<crate::util::intern::Symbol>) {
        self.buf.push_str(self.idents.get(name));
    }

    fn ty(&mut self, ty: TypeId) {
        let rendered = self.types.display(ty, self.idents);
        self.buf.push_str(&rendered);
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.buf.push_str(INDENT);
        }
    }

    fn decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Func(func) => self.func(func),
            Decl::TypeDefn(defn) | Decl::Enum(defn) => self.type_defn(defn),
        }
    }

    fn type_defn(&mut self, defn: &TypeDefn) {
        match self.types.get(defn.ty) {
            TypeKind::User { underlying, .. } => {
                self.buf.push_str("type ");
                self.name(defn.name.name);
                self.buf.push_str(" = ");
                self.ty(*underlying);
            }
            TypeKind::Sum(sum) => {
                self.buf.push_str("type ");
                self.name(defn.name.name);
                self.buf.push_str(" =");
                for (idx, alt) in sum.alts.iter().enumerate() {
                    self.buf.push_str(if idx > 0 { " | " } else { " " });
                    self.ty(*alt);
                }
            }
            TypeKind::Enum(enum_defn) => {
                self.buf.push_str("data ");
                self.name(defn.name.name);
                for param in enum_defn.params.iter() {
                    self.buf.push(' ');
                    self.name(param);
                }
                self.buf.push_str(" =");
                for (idx, ctor) in enum_defn.ctors.iter().enumerate() {
                    self.buf.push_str(if idx > 0 { " | " } else { " " });
                    self.name(ctor.name);
                    for field in ctor.fields.iter() {
                        self.buf.push(' ');
                        self.ty(*field);
                    }
                }
            }
            _ => unreachable!("type declarations are nominal"),
        }
        self.buf.push('\n');
    }

    fn func(&mut self, func: &FuncDecl) {
        self.buf.push_str(func.kind.keyword());
        self.buf.push(' ');
        self.name(func.name.name);
        self.buf.push('(');
        for (idx, param) in func.params.iter().enumerate() {
            if idx > 0 {
                self.buf.push_str(", ");
            }
            if param.by_ref {
                self.buf.push_str("mutable ");
            }
            self.name(param.name);
            self.buf.push(' ');
            self.ty(param.ty);
        }
        self.buf.push(')');
        if !func.returns.is_empty() {
            self.buf.push_str(" (");
            for (idx, ret) in func.returns.iter().enumerate() {
                if idx > 0 {
                    self.buf.push_str(", ");
                }
                if let Some(name) = ret.name {
                    self.name(name);
                    self.buf.push(' ');
                }
                self.ty(ret.ty);
            }
            self.buf.push(')');
        }
        self.buf.push(' ');
        self.block(0, &func.body);
        self.buf.push('\n');
    }

    fn block(&mut self, depth: usize, block: &Block) {
        self.buf.push_str("{\n");
        for stmt in &block.stmts {
            self.stmt(depth + 1, stmt);
        }
        self.indent(depth);
        self.buf.push('}');
    }

    fn stmt(&mut self, depth: usize, stmt: &Stmt) {
        self.indent(depth);
        self.stmt_inline(depth, stmt);
        self.buf.push('\n');
    }

    fn stmt_inline(&mut self, depth: usize, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let {
                names,
                declared,
                value,
            } => {
                self.buf.push_str("let ");
                for (idx, var) in names.iter().enumerate() {
                    if idx > 0 {
                        self.buf.push_str(", ");
                    }
                    self.name(var.name);
                }
                if let Some(declared) = declared {
                    self.buf.push(' ');
                    self.ty(*declared);
                }
                self.buf.push_str(" = ");
                self.value(value);
            }
            StmtKind::Mutable {
                var,
                declared,
                value,
            } => {
                self.buf.push_str("mutable ");
                self.name(var.name);
                if let Some(declared) = declared {
                    self.buf.push(' ');
                    self.ty(*declared);
                }
                self.buf.push_str(" = ");
                self.value(value);
            }
            StmtKind::Assign { target, value } => {
                match target {
                    Target::Var(var) => self.name(var.name),
                    Target::Index { base, index } => {
                        self.name(base.name);
                        self.buf.push('[');
                        self.value(index);
                        self.buf.push(']');
                    }
                }
                self.buf.push_str(" = ");
                self.value(value);
            }
            StmtKind::Return(values) => {
                self.buf.push_str("return");
                for (idx, value) in values.iter().enumerate() {
                    self.buf.push_str(if idx > 0 { ", " } else { " " });
                    self.value(value);
                }
            }
            StmtKind::While { cond, body } => {
                self.buf.push_str("while ");
                self.value(cond);
                self.buf.push(' ');
                self.block(depth, body);
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.buf.push_str("if ");
                self.value(cond);
                self.buf.push(' ');
                self.block(depth, then_block);
                if let Some(else_block) = else_block {
                    self.buf.push_str(" else ");
                    match &else_block.stmts[..] {
                        // An `else if` chain, which has no braces of its own.
                        [nested @ Stmt {
                            kind: StmtKind::If { .. },
                            span,
                        }] if *span == else_block.span => self.stmt_inline(depth, nested),
                        _ => self.block(depth, else_block),
                    }
                }
            }
            StmtKind::Match { scrutinee, cases } => {
                self.buf.push_str("match ");
                self.value(scrutinee);
                self.buf.push_str(" {\n");
                for case in cases {
                    self.indent(depth + 1);
                    self.buf.push_str("case ");
                    self.pattern(&case.pattern);
                    self.buf.push_str(":\n");
                    for stmt in &case.body.stmts {
                        self.stmt(depth + 2, stmt);
                    }
                }
                self.indent(depth);
                self.buf.push('}');
            }
            StmtKind::Call(call) => self.call(call),
            StmtKind::Assert { cond, message } => {
                self.buf.push_str("assert(");
                self.value(cond);
                if let Some(message) = message {
                    self.buf.push_str(", ");
                    self.string(message);
                }
                self.buf.push(')');
            }
        }
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Ctor { name, bindings, .. } => {
                self.name(*name);
                if !bindings.is_empty() {
                    self.buf.push('(');
                    for (idx, var) in bindings.iter().enumerate() {
                        if idx > 0 {
                            self.buf.push_str(", ");
                        }
                        self.name(var.name);
                    }
                    self.buf.push(')');
                }
            }
            Pattern::Alt { ty, binding, .. } => {
                self.ty(*ty);
                if let Some(var) = binding {
                    self.buf.push(' ');
                    self.name(var.name);
                }
            }
            Pattern::Value(value) => self.value(value),
        }
    }

    fn call(&mut self, call: &Call) {
        self.name(call.callee);
        self.values('(', &call.args, ')');
    }

    fn values(&mut self, open: char, values: &[Value], close: char) {
        self.buf.push(open);
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                self.buf.push_str(", ");
            }
            self.value(value);
        }
        self.buf.push(close);
    }

    fn string(&mut self, s: &str) {
        self.buf.push('"');
        for c in s.chars() {
            match c {
                '\n' => self.buf.push_str("\\n"),
                '\t' => self.buf.push_str("\\t"),
                '\r' => self.buf.push_str("\\r"),
                '\0' => self.buf.push_str("\\0"),
                '\\' => self.buf.push_str("\\\\"),
                '"' => self.buf.push_str("\\\""),
                c => self.buf.push(c),
            }
        }
        self.buf.push('"');
    }

    fn value(&mut self, value: &Value) {
        match &value.kind {
            ValueKind::Int(n) => write!(self.buf, "{n}").unwrap(),
            ValueKind::Bool(b) => write!(self.buf, "{b}").unwrap(),
            ValueKind::String(s) => self.string(s),
            ValueKind::Var(var) => self.name(var.name),
            ValueKind::Binary { op, lhs, rhs } => {
                self.value(lhs);
                write!(self.buf, " {} ", op.as_str()).unwrap();
                self.value(rhs);
            }
            ValueKind::Neg(inner) => {
                self.buf.push('-');
                self.value(inner);
            }
            ValueKind::Call(call) => self.call(call),
            ValueKind::ArrayLiteral(values) => self.values('{', values, '}'),
            ValueKind::Index { base, index } => {
                self.name(base.name);
                self.buf.push('[');
                self.value(index);
                self.buf.push(']');
            }
            ValueKind::Slice { base, lo, hi } => {
                self.name(base.name);
                self.buf.push('[');
                if let Some(lo) = lo {
                    self.value(lo);
                }
                self.buf.push(':');
                if let Some(hi) = hi {
                    self.value(hi);
                }
                self.buf.push(']');
            }
            ValueKind::Cast(inner) => {
                self.value(inner);
                self.buf.push_str(" as ");
                self.ty(value.ty);
            }
            ValueKind::Brackets(inner) => {
                self.buf.push('(');
                self.value(inner);
                self.buf.push(')');
            }
            ValueKind::EnumOption { name, .. } => self.name(*name),
            ValueKind::EnumValue { name, args, .. } => {
                self.name(*name);
                self.values('(', args, ')');
            }
            ValueKind::Tuple(values) => self.values('(', values, ')'),
            ValueKind::Field { base, index } => {
                self.value(base);
                write!(self.buf, ".{index}").unwrap();
            }
            ValueKind::Wrap { inner, .. } => self.value(inner),
            ValueKind::Len(inner) => {
                self.buf.push_str("len(");
                self.value(inner);
                self.buf.push(')');
            }
        }
    }
}
