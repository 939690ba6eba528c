//! Python source emission: a recursive top-down walk over the reconstructed
//! tree, tracking indentation depth and an operator-precedence context.
//!
//! Parenthesisation is minimal: a child is wrapped iff its operator binds
//! weaker than the context requires (the right operand of a left-associative
//! operator raises the requirement by one level, and symmetrically for the
//! one right-associative operator, `**`).

use std::fmt::Write;
use std::rc::Rc;

use crate::ast::{
    conversion_char, BinOp, BlockKind, BlockNode, CmpOp, ComprehensionKind, Generator,
    Handler, KeywordKind, Node, NodeKind, NodeRef, ReturnKind, UnaryOp, HAVE_FMT_SPEC,
};
use crate::builder::build_ast;
use crate::error::Result;
use crate::module::PycModule;
use crate::object::{fmt_float, CodeObject, ObjRef, PyObject, PyString, StrKind};
use crate::object::{CO_VARARGS, CO_VARKEYWORDS};
use crate::version::PyVersion;

/// Precedence levels, loosest first.
mod prec {
    pub const LAMBDA: u8 = 1;
    pub const TERNARY: u8 = 2;
    pub const OR: u8 = 3;
    pub const AND: u8 = 4;
    pub const NOT: u8 = 5;
    pub const COMPARE: u8 = 6;
    pub const BIT_OR: u8 = 7;
    pub const BIT_XOR: u8 = 8;
    pub const BIT_AND: u8 = 9;
    pub const SHIFT: u8 = 10;
    pub const ARITH: u8 = 11;
    pub const TERM: u8 = 12;
    pub const UNARY: u8 = 13;
    pub const POWER: u8 = 14;
    pub const AWAIT: u8 = 15;
    pub const ATOM: u8 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    Function,
    Class,
}

/// Decompiles a loaded module to source text, including the two-line header.
pub fn decompile_source(module: &PycModule, display_name: &str) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "# Source Generated by depyc")?;
    writeln!(
        out,
        "# File: {} (Python {}{})",
        display_name,
        module.version,
        if module.version.major < 3 && module.unicode {
            " Unicode"
        } else {
            ""
        }
    )?;
    writeln!(out)?;

    let mut w = SrcWriter {
        out: &mut out,
        version: module.version,
        str_unicode: module.str_is_unicode(),
        indent: 0,
    };
    let root = build_ast(&module.code, module.version)?;
    if let NodeKind::Block(b) = &root.kind {
        w.write_suite(&b.nodes, &module.code, Scope::Module)?;
    }
    Ok(out)
}

struct SrcWriter<'w> {
    out: &'w mut String,
    version: PyVersion,
    str_unicode: bool,
    indent: usize,
}

impl<'w> SrcWriter<'w> {
    fn line_start(&mut self) -> Result<()> {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        Ok(())
    }

    fn nl(&mut self) -> Result<()> {
        self.out.push('\n');
        Ok(())
    }

    // ------------------------------------------------------------------
    // statement suites

    fn write_suite(
        &mut self,
        nodes: &[NodeRef],
        code: &Rc<CodeObject>,
        scope: Scope,
    ) -> Result<()> {
        let mut wrote = false;
        let mut i = 0;
        while i < nodes.len() {
            let node = &nodes[i];
            i += 1;
            if node.processed() {
                continue;
            }
            if self.suppressed(node, i == nodes.len(), scope) {
                continue;
            }
            node.set_processed();

            // if / else (/ elif) pairs print as one construct.
            if let NodeKind::Block(b) = &node.kind {
                if matches!(b.kind, BlockKind::If { .. } | BlockKind::While { .. } | BlockKind::For { .. })
                {
                    let else_blk = nodes.get(i).and_then(|n| match &n.kind {
                        NodeKind::Block(e) if matches!(e.kind, BlockKind::Else) => Some(n),
                        _ => None,
                    });
                    if let Some(e) = else_blk {
                        e.set_processed();
                        i += 1;
                        self.write_block_with_else(b, Some(e), code)?;
                        wrote = true;
                        continue;
                    }
                }
            }

            self.write_stmt(node, code, scope)?;
            wrote = true;
        }
        if !wrote && scope != Scope::Module {
            self.line_start()?;
            self.out.push_str("pass");
            self.nl()?;
        }
        Ok(())
    }

    /// Statements that never appear in output: interpreter plumbing and
    /// implicit returns.
    fn suppressed(&self, node: &NodeRef, is_last: bool, scope: Scope) -> bool {
        match &node.kind {
            NodeKind::Return { value, kind: ReturnKind::Return } => {
                // The implicit trailing `return None`.
                is_last && value.is_none_const()
                    || (scope == Scope::Class && is_last)
            }
            NodeKind::Store { dest, .. } => match &dest.kind {
                NodeKind::Name(n) => {
                    scope == Scope::Class && (&**n == "__module__" || &**n == "__qualname__")
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn write_stmt(
        &mut self,
        node: &NodeRef,
        code: &Rc<CodeObject>,
        scope: Scope,
    ) -> Result<()> {
        match &node.kind {
            NodeKind::Block(b) => self.write_block_with_else(b, None, code)?,

            NodeKind::Store { src, dest } => self.write_store(src, dest, scope)?,

            NodeKind::ChainStore { dests, src } => {
                self.line_start()?;
                for d in dests.borrow().iter() {
                    self.write_expr(d, 0)?;
                    self.out.push_str(" = ");
                }
                self.write_expr(src, 0)?;
                self.nl()?;
            }

            NodeKind::Delete(target) => {
                self.line_start()?;
                self.out.push_str("del ");
                self.write_expr(target, 0)?;
                self.nl()?;
            }

            NodeKind::Return { value, kind } => {
                self.line_start()?;
                match kind {
                    ReturnKind::Return => {
                        if value.is_none_const() {
                            self.out.push_str("return");
                        } else {
                            self.out.push_str("return ");
                            self.write_expr_no_parens(value)?;
                        }
                    }
                    ReturnKind::Yield => {
                        self.out.push_str("yield ");
                        self.write_expr(value, 0)?;
                    }
                    ReturnKind::YieldFrom => {
                        self.out.push_str("yield from ");
                        self.write_expr(value, 0)?;
                    }
                }
                self.nl()?;
            }

            NodeKind::Raise(params) => {
                self.line_start()?;
                self.out.push_str("raise");
                match params.as_slice() {
                    [] => {}
                    [exc] => {
                        self.out.push(' ');
                        self.write_expr(exc, 0)?;
                    }
                    [exc, second] => {
                        self.out.push(' ');
                        self.write_expr(exc, 0)?;
                        if self.version.major >= 3 {
                            self.out.push_str(" from ");
                        } else {
                            self.out.push_str(", ");
                        }
                        self.write_expr(second, 0)?;
                    }
                    [exc, value, tb] => {
                        self.out.push(' ');
                        self.write_expr(exc, 0)?;
                        self.out.push_str(", ");
                        self.write_expr(value, 0)?;
                        self.out.push_str(", ");
                        self.write_expr(tb, 0)?;
                    }
                    _ => {}
                }
                self.nl()?;
            }

            NodeKind::Import { .. } => self.write_import_stmt(node, None)?,
            NodeKind::ImportStar(module) => {
                self.line_start()?;
                self.out.push_str("from ");
                self.write_import_module(module)?;
                self.out.push_str(" import *");
                self.nl()?;
            }

            NodeKind::Keyword(k) => {
                self.line_start()?;
                self.out.push_str(k.word());
                self.nl()?;
            }

            NodeKind::Print { values, stream, eol } => {
                self.line_start()?;
                self.out.push_str("print");
                let mut first = true;
                if let Some(s) = stream {
                    self.out.push_str(" >>");
                    self.write_expr(s, prec::ATOM)?;
                    first = false;
                }
                for v in values.borrow().iter() {
                    self.out.push_str(if first { " " } else { ", " });
                    first = false;
                    self.write_expr(v, 0)?;
                }
                if !eol.get() {
                    self.out.push(',');
                }
                self.nl()?;
            }

            NodeKind::Exec { stmt, globals, locals } => {
                self.line_start()?;
                self.out.push_str("exec ");
                self.write_expr(stmt, 0)?;
                if let Some(g) = globals {
                    self.out.push_str(" in ");
                    self.write_expr(g, 0)?;
                    if let Some(l) = locals {
                        self.out.push_str(", ");
                        self.write_expr(l, 0)?;
                    }
                }
                self.nl()?;
            }

            NodeKind::Annotated { name, annotation } => {
                self.line_start()?;
                self.write_expr(name, 0)?;
                self.out.push_str(": ");
                self.write_expr(annotation, 0)?;
                self.nl()?;
            }

            NodeKind::TryStmt { body, handlers, orelse, finalbody } => {
                self.write_try(body, handlers, orelse, finalbody, code)?;
            }

            // Docstring expression statement.
            NodeKind::Object(o) if o.as_string().is_some() && scope != Scope::Module => {
                self.write_docstring(o)?;
            }

            _ => {
                // Expression statement.
                self.line_start()?;
                self.write_expr_no_parens(node)?;
                self.nl()?;
            }
        }
        Ok(())
    }

    fn write_store(
        &mut self,
        src: &NodeRef,
        dest: &NodeRef,
        scope: Scope,
    ) -> Result<()> {
        // Docstrings.
        if let (NodeKind::Object(o), NodeKind::Name(n)) = (&src.kind, &dest.kind) {
            if &**n == "__doc__" && o.as_string().is_some() {
                return self.write_docstring(o);
            }
        }

        // Definitions: def / class / decorated def.
        if let NodeKind::Function { .. } = &src.kind {
            if !self.is_lambda(src) {
                return self.write_function_def(src, Some(dest), scope, &[]);
            }
        }
        if let NodeKind::Class { .. } = &src.kind {
            return self.write_class_def(src, dest, scope);
        }
        if let Some((decorators, func)) = decorator_chain(src, dest) {
            return self.write_function_def(func, Some(dest), scope, &decorators);
        }

        // Imports bind through stores.
        if let NodeKind::Import { .. } = &src.kind {
            return self.write_import_stmt(src, Some(dest));
        }
        if let NodeKind::Binary { op: BinOp::Attr, .. } = &src.kind {
            if let NodeKind::Import { .. } = &import_attr_base(src).kind {
                return self.write_import_stmt(import_attr_base(src), Some(dest));
            }
        }

        // In-place operators store back into their own left operand.
        if let NodeKind::Binary { op, left, right } = &src.kind {
            if op.is_inplace() {
                self.line_start()?;
                self.write_expr(left, 0)?;
                self.out.push_str(op.as_str());
                self.write_expr(right, 0)?;
                self.nl()?;
                return Ok(());
            }
        }

        self.line_start()?;
        self.write_expr(dest, 0)?;
        self.out.push_str(" = ");
        self.write_expr_no_parens(src)?;
        self.nl()?;
        Ok(())
    }

    /// Top-level tuples on either side of `=` or after `return` print
    /// without parentheses.
    fn write_expr_no_parens(&mut self, node: &NodeRef) -> Result<()> {
        if let NodeKind::Tuple { values, require_parens } = &node.kind {
            let vs = values.borrow();
            if vs.len() > 1 {
                require_parens.set(false);
            }
        }
        self.write_expr(node, 0)
    }

    fn write_docstring(&mut self, obj: &ObjRef) -> Result<()> {
        self.line_start()?;
        if let Some(s) = obj.as_string() {
            let multiline = s.data.contains(&b'\n');
            self.write_string(s, multiline, None)?;
        }
        self.nl()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // compound statements

    fn write_block_with_else(
        &mut self,
        block: &BlockNode,
        else_node: Option<&NodeRef>,
        code: &Rc<CodeObject>,
    ) -> Result<()> {
        self.write_block_header(block)?;
        self.indent += 1;
        self.write_suite(&block.nodes, code, Scope::Function)?;
        self.indent -= 1;

        if let Some(e) = else_node {
            if let NodeKind::Block(eb) = &e.kind {
                self.write_else_chain(eb, code)?;
            }
        }
        Ok(())
    }

    /// Flattens `else: if ...` into `elif` chains at print time.
    fn write_else_chain(&mut self, eb: &BlockNode, code: &Rc<CodeObject>) -> Result<()> {
        // else containing exactly an if (with optional trailing else).
        let as_elif = match eb.nodes.as_slice() {
            [single] => match &single.kind {
                NodeKind::Block(inner) if matches!(inner.kind, BlockKind::If { .. }) => {
                    Some((inner, None))
                }
                _ => None,
            },
            [first, second] => match (&first.kind, &second.kind) {
                (NodeKind::Block(inner), NodeKind::Block(tail))
                    if matches!(inner.kind, BlockKind::If { .. })
                        && matches!(tail.kind, BlockKind::Else) =>
                {
                    Some((inner, Some(tail)))
                }
                _ => None,
            },
            _ => None,
        };

        if let Some((inner, tail)) = as_elif {
            if let BlockKind::If { cond, negative } = &inner.kind {
                self.line_start()?;
                self.out.push_str("elif ");
                self.write_cond(cond, *negative)?;
                self.out.push(':');
                self.nl()?;
                self.indent += 1;
                self.write_suite(&inner.nodes, code, Scope::Function)?;
                self.indent -= 1;
                if let Some(tail) = tail {
                    self.write_else_chain(tail, code)?;
                }
                return Ok(());
            }
        }

        self.line_start()?;
        self.out.push_str("else:");
        self.nl()?;
        self.indent += 1;
        self.write_suite(&eb.nodes, code, Scope::Function)?;
        self.indent -= 1;
        Ok(())
    }

    fn write_block_header(&mut self, block: &BlockNode) -> Result<()> {
        self.line_start()?;
        match &block.kind {
            BlockKind::Main => {}
            BlockKind::If { cond, negative } => {
                self.out.push_str("if ");
                self.write_cond(cond, *negative)?;
                self.out.push(':');
            }
            BlockKind::Else => {
                self.out.push_str("else:");
            }
            BlockKind::While { cond, negative } => {
                self.out.push_str("while ");
                match cond {
                    Some(c) => self.write_cond(c, *negative)?,
                    None => self.out.push_str("True"),
                }
                self.out.push(':');
            }
            BlockKind::For { iter, index, is_async } => {
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("for ");
                match index {
                    Some(i) => self.write_expr_no_parens(i)?,
                    None => self.out.push('_'),
                }
                self.out.push_str(" in ");
                self.write_expr(iter, 0)?;
                self.out.push(':');
            }
            BlockKind::With { expr, var, is_async } => {
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("with ");
                self.write_expr(expr, 0)?;
                if let Some(v) = var {
                    self.out.push_str(" as ");
                    self.write_expr(v, 0)?;
                }
                self.out.push(':');
            }
        }
        self.nl()?;
        Ok(())
    }

    fn write_cond(&mut self, cond: &NodeRef, negative: bool) -> Result<()> {
        if negative {
            self.out.push_str("not ");
            self.write_expr(cond, prec::NOT)?;
        } else {
            self.write_expr(cond, 0)?;
        }
        Ok(())
    }

    fn write_try(
        &mut self,
        body: &[NodeRef],
        handlers: &[Handler],
        orelse: &[NodeRef],
        finalbody: &[NodeRef],
        code: &Rc<CodeObject>,
    ) -> Result<()> {
        // try-finally wrapping a lone try-except merges into one statement.
        if handlers.is_empty() && !finalbody.is_empty() {
            if let [only] = body {
                if let NodeKind::TryStmt {
                    body: ibody,
                    handlers: ihandlers,
                    orelse: iorelse,
                    finalbody: ifinal,
                } = &only.kind
                {
                    if ifinal.is_empty() {
                        return self.write_try(ibody, ihandlers, iorelse, finalbody, code);
                    }
                }
            }
        }

        self.line_start()?;
        self.out.push_str("try:");
        self.nl()?;
        self.indent += 1;
        self.write_suite(body, code, Scope::Function)?;
        self.indent -= 1;

        for h in handlers {
            self.line_start()?;
            self.out.push_str("except");
            if let Some(exc) = &h.exc {
                self.out.push(' ');
                self.write_expr(exc, 0)?;
                if let Some(b) = &h.binding {
                    if self.version.major >= 3 || self.version.at_least(2, 6) {
                        self.out.push_str(" as ");
                    } else {
                        self.out.push_str(", ");
                    }
                    self.write_expr(b, 0)?;
                }
            }
            self.out.push(':');
            self.nl()?;
            self.indent += 1;
            self.write_suite(&h.body, code, Scope::Function)?;
            self.indent -= 1;
        }

        if !orelse.is_empty() {
            self.line_start()?;
            self.out.push_str("else:");
            self.nl()?;
            self.indent += 1;
            self.write_suite(orelse, code, Scope::Function)?;
            self.indent -= 1;
        }

        if !finalbody.is_empty() {
            self.line_start()?;
            self.out.push_str("finally:");
            self.nl()?;
            self.indent += 1;
            self.write_suite(finalbody, code, Scope::Function)?;
            self.indent -= 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // definitions

    fn is_lambda(&self, func: &NodeRef) -> bool {
        match &func.kind {
            NodeKind::Function { code, .. } => code
                .as_code()
                .is_some_and(|c| &*c.name == "<lambda>"),
            _ => false,
        }
    }

    fn write_function_def(
        &mut self,
        func: &NodeRef,
        dest: Option<&NodeRef>,
        scope: Scope,
        decorators: &[NodeRef],
    ) -> Result<()> {
        let NodeKind::Function { code, defaults, kw_defaults } = &func.kind else {
            return Ok(());
        };
        let Some(fcode) = code.as_code() else {
            return Ok(());
        };

        if scope == Scope::Module {
            self.nl()?;
        }
        for d in decorators {
            self.line_start()?;
            self.out.push('@');
            self.write_expr(d, 0)?;
            self.nl()?;
        }
        self.line_start()?;
        if fcode.has_flag(crate::object::CO_COROUTINE) {
            self.out.push_str("async ");
        }
        self.out.push_str("def ");
        match dest {
            Some(d) => self.write_expr(d, 0)?,
            None => self.out.push_str(&fcode.name),
        }
        self.out.push('(');
        self.write_params(fcode, defaults, kw_defaults)?;
        self.out.push_str("):");
        self.nl()?;

        self.indent += 1;
        self.write_code_body(fcode, Scope::Function)?;
        self.indent -= 1;
        if scope == Scope::Module {
            self.nl()?;
        }
        Ok(())
    }

    fn write_params(
        &mut self,
        code: &Rc<CodeObject>,
        defaults: &[NodeRef],
        kw_defaults: &[(Rc<str>, NodeRef)],
    ) -> Result<()> {
        let argc = code.arg_count as usize;
        let kwonly = code.kw_only_arg_count as usize;
        let posonly = code.pos_only_arg_count as usize;
        let mut first = true;
        let mut sep = |out: &mut String, first: &mut bool| {
            if !*first {
                out.push_str(", ");
            }
            *first = false;
        };

        let default_start = argc.saturating_sub(defaults.len());
        for (i, name) in code.var_names.iter().take(argc).enumerate() {
            sep(self.out, &mut first);
            self.out.push_str(name);
            if i >= default_start {
                self.out.push('=');
                self.write_expr(&defaults[i - default_start], prec::TERNARY)?;
            }
            if posonly > 0 && i + 1 == posonly {
                self.out.push_str(", /");
            }
        }

        let mut star_idx = argc + kwonly;
        if code.has_flag(CO_VARARGS) {
            sep(self.out, &mut first);
            self.out.push('*');
            if let Some(name) = code.var_names.get(star_idx) {
                self.out.push_str(name);
            }
            star_idx += 1;
        } else if kwonly > 0 {
            sep(self.out, &mut first);
            self.out.push('*');
        }

        for name in code.var_names.iter().skip(argc).take(kwonly) {
            sep(self.out, &mut first);
            self.out.push_str(name);
            if let Some((_, value)) = kw_defaults.iter().find(|(k, _)| k == name) {
                self.out.push('=');
                self.write_expr(value, prec::TERNARY)?;
            }
        }

        if code.has_flag(CO_VARKEYWORDS) {
            sep(self.out, &mut first);
            self.out.push_str("**");
            if let Some(name) = code.var_names.get(star_idx) {
                self.out.push_str(name);
            }
        }
        Ok(())
    }

    fn write_class_def(
        &mut self,
        class: &NodeRef,
        dest: &NodeRef,
        scope: Scope,
    ) -> Result<()> {
        let NodeKind::Class { code, bases, .. } = &class.kind else {
            return Ok(());
        };

        if scope == Scope::Module {
            self.nl()?;
        }
        self.line_start()?;
        self.out.push_str("class ");
        self.write_expr(dest, 0)?;
        if !bases.is_empty() {
            self.out.push('(');
            for (i, b) in bases.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.write_expr(b, 0)?;
            }
            self.out.push(')');
        }
        self.out.push(':');
        self.nl()?;

        self.indent += 1;
        // Python 3: the class body is a Function node; Python 2: a Call of
        // the body function.
        let body_code = match &code.kind {
            NodeKind::Function { code, .. } => code.as_code().cloned(),
            NodeKind::Call { func, .. } => match &func.kind {
                NodeKind::Function { code, .. } => code.as_code().cloned(),
                _ => None,
            },
            _ => None,
        };
        match body_code {
            Some(c) => self.write_code_body(&c, Scope::Class)?,
            None => {
                self.line_start()?;
                self.out.push_str("pass");
                self.nl()?;
            }
        }
        self.indent -= 1;
        if scope == Scope::Module {
            self.nl()?;
        }
        Ok(())
    }

    /// Decompiles and prints a nested code object's body. Failures degrade
    /// into a comment rather than poisoning the enclosing scope.
    fn write_code_body(&mut self, code: &Rc<CodeObject>, scope: Scope) -> Result<()> {
        // Docstrings live in consts[0] with no bytecode of their own.
        if scope == Scope::Function {
            if let Some(first) = code.consts.first() {
                if first.as_string().is_some() {
                    self.write_docstring(first)?;
                }
            }
        }
        match build_ast(code, self.version) {
            Ok(root) => {
                if let NodeKind::Block(b) = &root.kind {
                    self.write_suite(&b.nodes, code, scope)?;
                }
            }
            Err(e) => {
                self.line_start()?;
                writeln!(self.out, "# decompilation error: {e}")?;
                self.line_start()?;
                self.out.push_str("pass");
                self.nl()?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // imports

    fn write_import_module(&mut self, module: &NodeRef) -> Result<()> {
        if let NodeKind::Import { name, .. } = &module.kind {
            self.write_expr(name, 0)?;
        } else {
            self.write_expr(module, 0)?;
        }
        Ok(())
    }

    fn write_import_stmt(&mut self, import: &NodeRef, dest: Option<&NodeRef>) -> Result<()> {
        let NodeKind::Import { name, fromlist, stores } = &import.kind else {
            return Ok(());
        };
        self.line_start()?;

        let stores = stores.borrow();
        if fromlist.is_some() || !stores.is_empty() {
            self.out.push_str("from ");
            self.write_expr(name, 0)?;
            self.out.push_str(" import ");
            if stores.is_empty() {
                self.out.push('*');
            }
            for (i, s) in stores.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                if let NodeKind::Store { src, dest } = &s.kind {
                    self.write_expr(src, 0)?;
                    if !same_name(src, dest) {
                        self.out.push_str(" as ");
                        self.write_expr(dest, 0)?;
                    }
                }
            }
        } else {
            self.out.push_str("import ");
            self.write_expr(name, 0)?;
            if let Some(d) = dest {
                // `import a.b` binds `a`; anything else is an alias.
                let plain = match (&name.kind, &d.kind) {
                    (NodeKind::Name(n), NodeKind::Name(b)) => {
                        n.split('.').next() == Some(&**b)
                    }
                    _ => false,
                };
                if !plain {
                    self.out.push_str(" as ");
                    self.write_expr(d, 0)?;
                }
            }
        }
        self.nl()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // expressions

    fn write_expr(&mut self, node: &NodeRef, min_prec: u8) -> Result<()> {
        let p = expr_prec(node);
        let parens = p < min_prec;
        if parens {
            self.out.push('(');
        }
        self.write_expr_inner(node, p)?;
        if parens {
            self.out.push(')');
        }
        Ok(())
    }

    fn write_expr_inner(&mut self, node: &NodeRef, p: u8) -> Result<()> {
        match &node.kind {
            NodeKind::Object(o) => self.write_object(o)?,
            NodeKind::Name(n) => self.out.push_str(n),
            NodeKind::Keyword(k) => self.out.push_str(k.word()),
            NodeKind::Locals => self.out.push_str("locals()"),
            NodeKind::LoadBuildClass => self.out.push_str("__build_class__"),
            NodeKind::Invalid | NodeKind::NullMarker | NodeKind::ExcPlaceholder => {
                self.out.push_str("<INVALID>");
            }

            NodeKind::Unary { op, operand } => {
                self.out.push_str(op.as_str());
                self.write_expr(operand, p)?;
            }

            NodeKind::Binary { op: BinOp::Attr, left, right } => {
                self.write_expr(left, prec::ATOM)?;
                self.out.push('.');
                self.write_expr(right, 0)?;
            }
            NodeKind::Binary { op, left, right } => {
                if *op == BinOp::Power {
                    // right-associative
                    self.write_expr(left, p + 1)?;
                    self.out.push_str(op.as_str());
                    self.write_expr(right, p)?;
                } else {
                    self.write_expr(left, p)?;
                    self.out.push_str(op.as_str());
                    self.write_expr(right, p + 1)?;
                }
            }

            NodeKind::Compare { op, left, right } => {
                self.write_expr(left, p + 1)?;
                self.out.push_str(op.as_str());
                self.write_expr(right, p + 1)?;
            }
            NodeKind::CompareChain { operands, ops } => {
                self.write_expr(&operands[0], p + 1)?;
                for (op, rhs) in ops.iter().zip(operands.iter().skip(1)) {
                    self.out.push_str(op.as_str());
                    self.write_expr(rhs, p + 1)?;
                }
            }

            NodeKind::Ternary { cond, negative, then_expr, else_expr } => {
                self.write_expr(then_expr, prec::TERNARY + 1)?;
                self.out.push_str(" if ");
                if *negative {
                    self.out.push_str("not ");
                    self.write_expr(cond, prec::NOT)?;
                } else {
                    self.write_expr(cond, prec::TERNARY + 1)?;
                }
                self.out.push_str(" else ");
                self.write_expr(else_expr, prec::TERNARY)?;
            }

            NodeKind::Subscr { value, key } => {
                self.write_expr(value, prec::ATOM)?;
                self.out.push('[');
                match &key.kind {
                    NodeKind::Slice { lower, upper, step } => {
                        self.write_slice_key(lower, upper, step)?;
                    }
                    NodeKind::Tuple { .. } => self.write_expr_no_parens(key)?,
                    _ => self.write_expr(key, 0)?,
                }
                self.out.push(']');
            }
            NodeKind::Slice { lower, upper, step } => {
                // A slice object outside subscript position.
                self.out.push_str("slice(");
                match lower {
                    Some(l) => self.write_expr(l, 0)?,
                    None => self.out.push_str("None"),
                }
                self.out.push_str(", ");
                match upper {
                    Some(u) => self.write_expr(u, 0)?,
                    None => self.out.push_str("None"),
                }
                if let Some(s) = step {
                    self.out.push_str(", ");
                    self.write_expr(s, 0)?;
                }
                self.out.push(')');
            }

            NodeKind::Starred(v) => {
                self.out.push('*');
                self.write_expr(v, prec::ATOM)?;
            }

            NodeKind::Tuple { values, require_parens } => {
                let vs = values.borrow();
                let parens = require_parens.get() || vs.len() <= 1;
                if parens {
                    self.out.push('(');
                }
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_expr(v, prec::TERNARY)?;
                }
                if vs.len() == 1 {
                    self.out.push(',');
                }
                if parens {
                    self.out.push(')');
                }
            }
            NodeKind::List(values) => {
                self.out.push('[');
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_expr(v, prec::TERNARY)?;
                }
                self.out.push(']');
            }
            NodeKind::Set(values) => {
                if values.is_empty() {
                    self.out.push_str("set()");
                } else {
                    self.out.push('{');
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.write_expr(v, prec::TERNARY)?;
                    }
                    self.out.push('}');
                }
            }
            NodeKind::Map(items) => {
                self.out.push('{');
                for (i, (k, v)) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    if matches!(k.kind, NodeKind::Invalid) {
                        // `**mapping` spread carried in the value slot.
                        if let NodeKind::Starred(inner) = &v.kind {
                            self.out.push_str("**");
                            self.write_expr(inner, prec::ATOM)?;
                        } else {
                            self.write_expr(v, 0)?;
                        }
                    } else {
                        self.write_expr(k, prec::TERNARY)?;
                        self.out.push_str(": ");
                        self.write_expr(v, prec::TERNARY)?;
                    }
                }
                self.out.push('}');
            }
            NodeKind::ConstMap { keys, values } => {
                self.out.push('{');
                if let PyObject::Tuple(ks) = &**keys {
                    for (i, (k, v)) in ks.iter().zip(values.iter()).enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.write_object(k)?;
                        self.out.push_str(": ");
                        self.write_expr(v, prec::TERNARY)?;
                    }
                }
                self.out.push('}');
            }

            NodeKind::JoinedStr(parts) => self.write_fstring(parts)?,
            NodeKind::FormattedValue { .. } => {
                // A lone interpolation is still an f-string.
                self.write_fstring(std::slice::from_ref(node))?;
            }

            NodeKind::Call { func, args, kwargs, star, dstar } => {
                // Comprehension code objects called over an iterable print
                // as the comprehension itself.
                if self.try_write_comprehension_call(func, args)?.is_some() {
                    return Ok(());
                }
                let fp = match &func.kind {
                    NodeKind::Function { .. } | NodeKind::Ternary { .. } => prec::ATOM + 1,
                    _ => prec::ATOM,
                };
                self.write_expr(func, fp)?;
                self.out.push('(');
                let mut first = true;
                for a in args {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.write_expr(a, prec::TERNARY)?;
                }
                if let Some(s) = star {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.out.push('*');
                    self.write_expr(s, prec::ATOM)?;
                }
                for (k, v) in kwargs {
                    if !first {
                        self.out.push_str(", ");
                    }
                    first = false;
                    self.write_expr(k, 0)?;
                    self.out.push('=');
                    self.write_expr(v, prec::TERNARY)?;
                }
                if let Some(d) = dstar {
                    if !first {
                        self.out.push_str(", ");
                    }
                    self.out.push_str("**");
                    self.write_expr(d, prec::ATOM)?;
                }
                self.out.push(')');
            }

            NodeKind::Function { code, defaults, kw_defaults } => {
                // Expression position: must be a lambda.
                if let Some(fcode) = code.as_code() {
                    self.out.push_str("lambda");
                    if fcode.arg_count > 0
                        || fcode.has_flag(CO_VARARGS)
                        || fcode.has_flag(CO_VARKEYWORDS)
                    {
                        self.out.push(' ');
                        self.write_params(fcode, defaults, kw_defaults)?;
                    }
                    self.out.push_str(": ");
                    self.write_lambda_body(fcode)?;
                }
            }

            NodeKind::Class { name, .. } => {
                self.write_expr(name, 0)?;
            }

            NodeKind::Comprehension { .. } => self.write_comprehension(node, None)?,

            NodeKind::Awaitable(expr) => {
                self.out.push_str("await ");
                self.write_expr(expr, prec::AWAIT)?;
            }
            NodeKind::Convert(v) => {
                self.out.push('`');
                self.write_expr(v, 0)?;
                self.out.push('`');
            }
            NodeKind::Return { value, kind } => {
                // yield in expression position
                match kind {
                    ReturnKind::YieldFrom => self.out.push_str("yield from "),
                    _ => self.out.push_str("yield "),
                }
                self.write_expr(value, prec::TERNARY)?;
            }
            NodeKind::Annotated { name, annotation } => {
                self.write_expr(name, 0)?;
                self.out.push_str(": ");
                self.write_expr(annotation, 0)?;
            }
            NodeKind::ImportFrom { name, .. } => self.out.push_str(name),
            NodeKind::Import { name, .. } => self.write_expr(name, 0)?,

            NodeKind::Store { .. }
            | NodeKind::ChainStore { .. }
            | NodeKind::Delete(_)
            | NodeKind::Raise(_)
            | NodeKind::Print { .. }
            | NodeKind::Exec { .. }
            | NodeKind::TryStmt { .. }
            | NodeKind::ImportStar(_)
            | NodeKind::Block(_)
            | NodeKind::NodeList(_) => {
                self.out.push_str("<STMT>");
            }
        }
        Ok(())
    }

    fn write_slice_key(
        &mut self,
        lower: &Option<NodeRef>,
        upper: &Option<NodeRef>,
        step: &Option<NodeRef>,
    ) -> Result<()> {
        if let Some(l) = lower {
            self.write_expr(l, prec::TERNARY)?;
        }
        self.out.push(':');
        if let Some(u) = upper {
            self.write_expr(u, prec::TERNARY)?;
        }
        if let Some(s) = step {
            self.out.push(':');
            self.write_expr(s, prec::TERNARY)?;
        }
        Ok(())
    }

    fn write_lambda_body(&mut self, code: &Rc<CodeObject>) -> Result<()> {
        match build_ast(code, self.version) {
            Ok(root) => {
                if let NodeKind::Block(b) = &root.kind {
                    for n in &b.nodes {
                        if let NodeKind::Return { value, kind: ReturnKind::Return } = &n.kind
                        {
                            return self.write_expr(value, prec::LAMBDA);
                        }
                    }
                }
                self.out.push_str("None");
            }
            Err(_) => self.out.push_str("None"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // comprehensions

    /// `f(iter)` where `f` is a `<listcomp>`-style code object inlines to
    /// the comprehension with `.0` replaced by the argument.
    fn try_write_comprehension_call(
        &mut self,
        func: &NodeRef,
        args: &[NodeRef],
    ) -> Result<Option<()>> {
        let NodeKind::Function { code, .. } = &func.kind else {
            return Ok(None);
        };
        let Some(fcode) = code.as_code() else {
            return Ok(None);
        };
        if !matches!(
            &*fcode.name,
            "<listcomp>" | "<setcomp>" | "<dictcomp>" | "<genexpr>"
        ) {
            return Ok(None);
        }
        let [arg] = args else { return Ok(None) };

        let Ok(root) = build_ast(fcode, self.version) else {
            return Ok(None);
        };
        let Some(comp) = extract_comprehension(&root, &fcode.name) else {
            return Ok(None);
        };
        self.write_comprehension(&comp, Some(arg))?;
        Ok(Some(()))
    }

    fn write_comprehension(&mut self, node: &NodeRef, subst: Option<&NodeRef>) -> Result<()> {
        let NodeKind::Comprehension { result, result_value, kind, generators } = &node.kind
        else {
            return Ok(());
        };
        let (open, close) = match kind {
            ComprehensionKind::List => ('[', ']'),
            ComprehensionKind::Set | ComprehensionKind::Dict => ('{', '}'),
            ComprehensionKind::Generator => ('(', ')'),
        };
        self.out.push(open);
        self.write_expr(result, prec::TERNARY)?;
        if let Some(v) = result_value {
            self.out.push_str(": ");
            self.write_expr(v, prec::TERNARY)?;
        }
        for g in generators {
            self.write_generator(g, subst)?;
        }
        self.out.push(close);
        Ok(())
    }

    fn write_generator(&mut self, g: &Generator, subst: Option<&NodeRef>) -> Result<()> {
        if g.is_async {
            self.out.push_str(" async for ");
        } else {
            self.out.push_str(" for ");
        }
        match &g.index {
            Some(i) => self.write_expr_no_parens(i)?,
            None => self.out.push('_'),
        }
        self.out.push_str(" in ");
        let synthetic = matches!(&g.iter.kind, NodeKind::Name(n) if &**n == ".0");
        match (synthetic, subst) {
            (true, Some(arg)) => self.write_expr(arg, prec::OR)?,
            _ => self.write_expr(&g.iter, prec::OR)?,
        }
        if let Some(cond) = &g.condition {
            self.out.push_str(" if ");
            if g.neg_condition {
                self.out.push_str("not ");
                self.write_expr(cond, prec::NOT)?;
            } else {
                self.write_expr(cond, prec::TERNARY)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // literals

    fn write_fstring(&mut self, parts: &[NodeRef]) -> Result<()> {
        self.out.push_str("f'");
        for part in parts {
            match &part.kind {
                NodeKind::Object(o) => {
                    if let Some(s) = o.as_string() {
                        self.write_string(s, false, Some('\''))?;
                    }
                }
                NodeKind::FormattedValue { value, conversion, format_spec } => {
                    self.out.push('{');
                    self.write_expr(value, prec::TERNARY)?;
                    if let Some(c) = conversion_char(*conversion) {
                        self.out.push('!');
                        self.out.push(c);
                    }
                    if *conversion & HAVE_FMT_SPEC != 0 {
                        self.out.push(':');
                        if let Some(spec) = format_spec {
                            match &spec.kind {
                                NodeKind::Object(o) => {
                                    if let Some(s) = o.as_string() {
                                        self.write_string(s, false, Some('\''))?;
                                    }
                                }
                                NodeKind::JoinedStr(inner) => {
                                    // Nested interpolated spec.
                                    for p in inner {
                                        match &p.kind {
                                            NodeKind::Object(o) => {
                                                if let Some(s) = o.as_string() {
                                                    self.write_string(s, false, Some('\''))?;
                                                }
                                            }
                                            _ => {
                                                self.out.push('{');
                                                self.write_expr(p, prec::TERNARY)?;
                                                self.out.push('}');
                                            }
                                        }
                                    }
                                }
                                _ => self.write_expr(spec, prec::TERNARY)?,
                            }
                        }
                    }
                    self.out.push('}');
                }
                _ => {
                    self.out.push('{');
                    self.write_expr(part, prec::TERNARY)?;
                    self.out.push('}');
                }
            }
        }
        self.out.push('\'');
        Ok(())
    }

    fn write_object(&mut self, obj: &ObjRef) -> Result<()> {
        match &**obj {
            PyObject::None | PyObject::Null => self.out.push_str("None"),
            PyObject::StopIteration => self.out.push_str("StopIteration"),
            PyObject::Ellipsis => self.out.push_str("..."),
            PyObject::Bool(true) => self.out.push_str("True"),
            PyObject::Bool(false) => self.out.push_str("False"),
            PyObject::Int(v) => write!(self.out, "{v}")?,
            PyObject::Int64(v) => write!(self.out, "{v}")?,
            PyObject::Long(v) => {
                write!(self.out, "{v}")?;
                if self.version.major < 3 {
                    self.out.push('L');
                }
            }
            PyObject::Float(v) => {
                struct F(f64);
                impl std::fmt::Display for F {
                    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                        fmt_float(f, self.0)
                    }
                }
                write!(self.out, "{}", F(*v))?;
            }
            PyObject::Complex { real, imag } => {
                let sign = if *imag < 0.0 { '-' } else { '+' };
                write!(self.out, "({real}{sign}{}j)", imag.abs())?;
            }
            PyObject::Str(s) => self.write_string(s, false, None)?,
            PyObject::Tuple(items) => {
                self.out.push('(');
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_object(v)?;
                }
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            PyObject::List(items) => {
                self.out.push('[');
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_object(v)?;
                }
                self.out.push(']');
            }
            PyObject::Dict(items) => {
                self.out.push('{');
                for (i, (k, v)) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_object(k)?;
                    self.out.push_str(": ");
                    self.write_object(v)?;
                }
                self.out.push('}');
            }
            PyObject::Set(items) => {
                if items.is_empty() {
                    self.out.push_str("set()");
                } else {
                    self.out.push('{');
                    for (i, v) in items.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.write_object(v)?;
                    }
                    self.out.push('}');
                }
            }
            PyObject::FrozenSet(items) => {
                self.out.push_str("frozenset(");
                if !items.is_empty() {
                    self.out.push('{');
                    for (i, v) in items.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.write_object(v)?;
                    }
                    self.out.push('}');
                }
                self.out.push(')');
            }
            PyObject::Code(c) => {
                write!(self.out, "<code object {}>", c.name)?;
            }
        }
        Ok(())
    }

    /// String literal printing with prefix, quote selection, and escaping;
    /// inside an f-string only the content is produced and braces double.
    fn write_string(
        &mut self,
        s: &PyString,
        triple: bool,
        fstring_quote: Option<char>,
    ) -> Result<()> {
        let prefix = match s.kind {
            StrKind::Bytes | StrKind::Interned => {
                if self.str_unicode {
                    Some('b')
                } else {
                    None
                }
            }
            StrKind::Unicode => {
                if self.str_unicode {
                    None
                } else {
                    Some('u')
                }
            }
            StrKind::Ascii => None,
        };
        if fstring_quote.is_none() {
            if let Some(p) = prefix {
                self.out.push(p);
            }
        }

        if s.data.is_empty() && fstring_quote.is_none() {
            self.out.push_str("''");
            return Ok(());
        }

        // Prefer single quotes unless the content argues otherwise.
        let use_double = match fstring_quote {
            Some(q) => q == '"',
            None => {
                let mut use_double = false;
                for &ch in &s.data {
                    if ch == b'\'' {
                        use_double = true;
                    } else if ch == b'"' {
                        use_double = false;
                        break;
                    }
                }
                use_double
            }
        };
        let quote = if use_double { '"' } else { '\'' };

        if fstring_quote.is_none() {
            if triple {
                self.out.push_str(if use_double { "\"\"\"" } else { "'''" });
            } else {
                self.out.push(quote);
            }
        }

        // Unicode kinds carry valid UTF-8 and pass non-ASCII through;
        // byte strings escape every high byte.
        let pass_utf8 = s.kind == StrKind::Unicode || s.kind == StrKind::Ascii;
        if pass_utf8 {
            let text = String::from_utf8_lossy(&s.data).into_owned();
            for ch in text.chars() {
                self.write_str_char(ch, quote, triple, fstring_quote)?;
            }
        } else {
            for &b in &s.data {
                if b >= 0x80 {
                    write!(self.out, "\\x{b:02x}")?;
                } else {
                    self.write_str_char(b as char, quote, triple, fstring_quote)?;
                }
            }
        }

        if fstring_quote.is_none() {
            if triple {
                self.out.push_str(if use_double { "\"\"\"" } else { "'''" });
            } else {
                self.out.push(quote);
            }
        }
        Ok(())
    }

    fn write_str_char(
        &mut self,
        ch: char,
        quote: char,
        triple: bool,
        fstring_quote: Option<char>,
    ) -> Result<()> {
        match ch {
            '\r' => self.out.push_str("\\r"),
            '\n' => {
                if triple {
                    self.out.push('\n');
                } else {
                    self.out.push_str("\\n");
                }
            }
            '\t' => self.out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7F => {
                write!(self.out, "\\x{:02x}", c as u32)?;
            }
            '\'' if quote == '\'' => self.out.push_str("\\'"),
            '"' if quote == '"' => self.out.push_str("\\\""),
            '\\' => self.out.push_str("\\\\"),
            '{' if fstring_quote.is_some() => self.out.push_str("{{"),
            '}' if fstring_quote.is_some() => self.out.push_str("}}"),
            c => self.out.push(c),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// free helpers

fn expr_prec(node: &NodeRef) -> u8 {
    match &node.kind {
        NodeKind::Binary { op, .. } => match op {
            BinOp::Attr => prec::ATOM,
            BinOp::LogOr => prec::OR,
            BinOp::LogAnd => prec::AND,
            BinOp::Or | BinOp::IpOr => prec::BIT_OR,
            BinOp::Xor | BinOp::IpXor => prec::BIT_XOR,
            BinOp::And | BinOp::IpAnd => prec::BIT_AND,
            BinOp::LShift | BinOp::RShift | BinOp::IpLShift | BinOp::IpRShift => prec::SHIFT,
            BinOp::Add | BinOp::Subtract | BinOp::IpAdd | BinOp::IpSubtract => prec::ARITH,
            BinOp::Power | BinOp::IpPower => prec::POWER,
            _ => prec::TERM,
        },
        NodeKind::Unary { op: UnaryOp::Not, .. } => prec::NOT,
        NodeKind::Unary { .. } => prec::UNARY,
        NodeKind::Compare { .. } | NodeKind::CompareChain { .. } => prec::COMPARE,
        NodeKind::Ternary { .. } => prec::TERNARY,
        NodeKind::Function { .. } => prec::LAMBDA,
        NodeKind::Awaitable(_) => prec::AWAIT,
        NodeKind::Return { .. } => prec::LAMBDA, // yield expression
        NodeKind::Starred(_) => prec::TERNARY,
        _ => prec::ATOM,
    }
}

fn same_name(a: &NodeRef, b: &NodeRef) -> bool {
    match (&a.kind, &b.kind) {
        (NodeKind::Name(x), NodeKind::Name(y)) => x == y,
        _ => false,
    }
}

/// Walks attribute chains down to the `Import` node, if any.
fn import_attr_base(node: &NodeRef) -> &NodeRef {
    match &node.kind {
        NodeKind::Binary { op: BinOp::Attr, left, .. } => import_attr_base(left),
        _ => node,
    }
}

/// Recognizes a decorated definition: nested single-argument calls whose
/// innermost argument is the function being bound to `dest`.
fn decorator_chain<'a>(
    src: &'a NodeRef,
    dest: &NodeRef,
) -> Option<(Vec<NodeRef>, &'a NodeRef)> {
    let mut decorators = Vec::new();
    let mut cur = src;
    loop {
        match &cur.kind {
            NodeKind::Call { func, args, kwargs, star, dstar }
                if args.len() == 1
                    && kwargs.is_empty()
                    && star.is_none()
                    && dstar.is_none() =>
            {
                decorators.push(Rc::clone(func));
                cur = &args[0];
            }
            NodeKind::Function { code, .. } if !decorators.is_empty() => {
                let matches_dest = match (&dest.kind, code.as_code()) {
                    (NodeKind::Name(n), Some(c)) => &**n == &*c.name,
                    _ => false,
                };
                return matches_dest.then_some((decorators, cur));
            }
            _ => return None,
        }
    }
}

/// Finds the comprehension inside a `<listcomp>`-style code object's tree;
/// generator expressions appear as a for-loop around a yield.
fn extract_comprehension(root: &NodeRef, name: &str) -> Option<NodeRef> {
    let NodeKind::Block(main) = &root.kind else {
        return None;
    };
    for node in &main.nodes {
        match &node.kind {
            NodeKind::Return { value, .. } => {
                if matches!(value.kind, NodeKind::Comprehension { .. }) {
                    return Some(Rc::clone(value));
                }
            }
            NodeKind::Block(b) if matches!(b.kind, BlockKind::For { .. }) => {
                if name != "<genexpr>" {
                    continue;
                }
                let BlockKind::For { iter, index, .. } = &b.kind else {
                    continue;
                };
                // for idx in iter: yield result
                let result = b.nodes.iter().find_map(|stmt| match &stmt.kind {
                    NodeKind::Return { value, kind: ReturnKind::Yield } => {
                        Some(Rc::clone(value))
                    }
                    _ => None,
                })?;
                return Some(Node::new(NodeKind::Comprehension {
                    result,
                    result_value: None,
                    kind: ComprehensionKind::Generator,
                    generators: vec![Generator {
                        iter: Rc::clone(iter),
                        index: index.clone(),
                        condition: None,
                        neg_condition: false,
                        is_async: false,
                    }],
                }));
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn render(node: &NodeRef) -> String {
        let mut out = String::new();
        let mut w = SrcWriter {
            out: &mut out,
            version: PyVersion::new(3, 8),
            str_unicode: true,
            indent: 0,
        };
        w.write_expr(node, 0).unwrap();
        out
    }

    fn int(v: i32) -> NodeRef {
        Node::object(Rc::new(PyObject::Int(v)))
    }

    #[test]
    fn precedence_is_minimal() {
        // (1 + 2) * 3 keeps its parentheses; 1 + 2 * 3 drops them.
        let sum = Node::new(NodeKind::Binary {
            op: BinOp::Add,
            left: int(1),
            right: int(2),
        });
        let prod = Node::new(NodeKind::Binary {
            op: BinOp::Multiply,
            left: sum,
            right: int(3),
        });
        assert_eq!(render(&prod), "(1 + 2) * 3");

        let prod2 = Node::new(NodeKind::Binary {
            op: BinOp::Multiply,
            left: int(2),
            right: int(3),
        });
        let sum2 = Node::new(NodeKind::Binary {
            op: BinOp::Add,
            left: int(1),
            right: prod2,
        });
        assert_eq!(render(&sum2), "1 + 2 * 3");
    }

    #[test]
    fn subtraction_right_operand_needs_parens() {
        // 1 - (2 - 3)
        let inner = Node::new(NodeKind::Binary {
            op: BinOp::Subtract,
            left: int(2),
            right: int(3),
        });
        let outer = Node::new(NodeKind::Binary {
            op: BinOp::Subtract,
            left: int(1),
            right: inner,
        });
        assert_eq!(render(&outer), "1 - (2 - 3)");
    }

    #[test]
    fn power_is_right_associative() {
        let inner = Node::new(NodeKind::Binary {
            op: BinOp::Power,
            left: int(2),
            right: int(3),
        });
        let outer = Node::new(NodeKind::Binary {
            op: BinOp::Power,
            left: inner,
            right: int(4),
        });
        assert_eq!(render(&outer), "(2 ** 3) ** 4");
    }

    #[test]
    fn string_quote_selection() {
        let mut out = String::new();
        let mut w = SrcWriter {
            out: &mut out,
            version: PyVersion::new(3, 8),
            str_unicode: true,
            indent: 0,
        };
        w.write_string(&PyString::ascii("it's"), false, None).unwrap();
        assert_eq!(out, "\"it's\"");

        let mut out2 = String::new();
        let mut w2 = SrcWriter {
            out: &mut out2,
            version: PyVersion::new(3, 8),
            str_unicode: true,
            indent: 0,
        };
        w2.write_string(&PyString::ascii("plain"), false, None).unwrap();
        assert_eq!(out2, "'plain'");
    }

    #[test]
    fn byte_strings_get_prefix_and_escapes() {
        let mut out = String::new();
        let mut w = SrcWriter {
            out: &mut out,
            version: PyVersion::new(3, 8),
            str_unicode: true,
            indent: 0,
        };
        let s = PyString::new(StrKind::Bytes, vec![b'a', 0xff, b'\n']);
        w.write_string(&s, false, None).unwrap();
        assert_eq!(out, "b'a\\xff\\n'");
    }

    #[test]
    fn tuple_parens_follow_the_flag() {
        let tup = Node::new(NodeKind::Tuple {
            values: RefCell::new(vec![int(1), int(2)]),
            require_parens: Cell::new(false),
        });
        assert_eq!(render(&tup), "1, 2");
        let tup1 = Node::new(NodeKind::Tuple {
            values: RefCell::new(vec![int(1)]),
            require_parens: Cell::new(false),
        });
        assert_eq!(render(&tup1), "(1,)");
    }

    #[test]
    fn chained_compare_renders_flat() {
        let a = Node::name("a");
        let b = Node::name("b");
        let c = Node::name("c");
        let chain = Node::new(NodeKind::CompareChain {
            operands: vec![a, b, c],
            ops: vec![CmpOp::Less, CmpOp::Less],
        });
        assert_eq!(render(&chain), "a < b < c");
    }

    #[test]
    fn fstring_rendering() {
        let lit = Node::object(Rc::new(PyObject::Str(PyString::ascii("x="))));
        let interp = Node::new(NodeKind::FormattedValue {
            value: Node::name("x"),
            conversion: 0,
            format_spec: None,
        });
        let joined = Node::new(NodeKind::JoinedStr(vec![lit, interp]));
        assert_eq!(render(&joined), "f'x={x}'");
    }

    #[test]
    fn ternary_rendering() {
        let t = Node::new(NodeKind::Ternary {
            cond: Node::name("c"),
            negative: false,
            then_expr: Node::name("a"),
            else_expr: Node::name("b"),
        });
        assert_eq!(render(&t), "a if c else b");
    }
}
