//! Structured disassembly: an indented dump of the whole code-object tree,
//! four spaces per nesting level, with bracketed section headers and
//! resolved operand annotations.

use std::collections::HashSet;
use std::fmt::Write;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instr::{decode_exception_table, read_instructions, Instruction};
use crate::module::PycModule;
use crate::object::{CodeObject, ObjRef, PyObject, StrKind, CODE_FLAG_NAMES};
use crate::opcode::{operand_kind, OperandKind};
use crate::version::PyVersion;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DisasmOptions {
    /// Dump extra code-object fields (local kinds, line table).
    pub pycode_extra: bool,
    /// Keep CACHE instructions visible in 3.11+ streams.
    pub show_caches: bool,
}

/// Disassembles a loaded module into the tree dump.
pub fn disassemble(
    module: &PycModule,
    display_name: &str,
    options: DisasmOptions,
) -> Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "{} (Python {}{})",
        display_name,
        module.version,
        if module.version.major < 3 && module.unicode {
            " -U"
        } else {
            ""
        }
    )?;
    let mut d = Disassembler {
        out: &mut out,
        version: module.version,
        options,
        seen: HashSet::new(),
    };
    let obj: ObjRef = Rc::new(PyObject::Code(Rc::clone(&module.code)));
    d.output_object(&obj, 0)?;
    Ok(out)
}

struct Disassembler<'w> {
    out: &'w mut String,
    version: PyVersion,
    options: DisasmOptions,
    /// Guards against cyclic object graphs in hand-crafted input.
    seen: HashSet<*const PyObject>,
}

impl<'w> Disassembler<'w> {
    fn iputs(&mut self, indent: usize, text: &str) -> Result<()> {
        for _ in 0..indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        Ok(())
    }

    fn iline(&mut self, indent: usize, text: &str) -> Result<()> {
        self.iputs(indent, text)?;
        self.out.push('\n');
        Ok(())
    }

    fn output_object(&mut self, obj: &ObjRef, indent: usize) -> Result<()> {
        let ptr = Rc::as_ptr(obj);
        if !self.seen.insert(ptr) {
            self.iline(indent, "<cycle>")?;
            return Ok(());
        }
        let result = self.output_object_inner(obj, indent);
        self.seen.remove(&ptr);
        result
    }

    fn output_object_inner(&mut self, obj: &ObjRef, indent: usize) -> Result<()> {
        match &**obj {
            PyObject::Code(code) => self.output_code(code, indent)?,
            PyObject::Str(_) => {
                self.iputs(indent, "")?;
                write_repr(self.out, obj)?;
                self.out.push('\n');
            }
            PyObject::Tuple(items) => {
                self.iline(indent, "(")?;
                for v in items {
                    self.output_object(v, indent + 1)?;
                }
                self.iline(indent, ")")?;
            }
            PyObject::List(items) => {
                self.iline(indent, "[")?;
                for v in items {
                    self.output_object(v, indent + 1)?;
                }
                self.iline(indent, "]")?;
            }
            PyObject::Dict(items) => {
                self.iline(indent, "{")?;
                for (k, v) in items {
                    self.output_object(k, indent + 1)?;
                    self.output_object(v, indent + 2)?;
                }
                self.iline(indent, "}")?;
            }
            PyObject::Set(items) => {
                self.iline(indent, "{")?;
                for v in items {
                    self.output_object(v, indent + 1)?;
                }
                self.iline(indent, "}")?;
            }
            PyObject::FrozenSet(items) => {
                self.iline(indent, "frozenset({")?;
                for v in items {
                    self.output_object(v, indent + 1)?;
                }
                self.iline(indent, "})")?;
            }
            _ => {
                self.iputs(indent, "")?;
                write_repr(self.out, obj)?;
                self.out.push('\n');
            }
        }
        Ok(())
    }

    fn output_code(&mut self, code: &Rc<CodeObject>, indent: usize) -> Result<()> {
        let ver = self.version;
        self.iline(indent, "[Code]")?;
        let i = indent + 1;
        self.iline(i, &format!("File Name: {}", code.file_name))?;
        self.iline(i, &format!("Object Name: {}", code.name))?;
        if let Some(q) = &code.qual_name {
            self.iline(i, &format!("Qualified Name: {q}"))?;
        }
        self.iline(i, &format!("Arg Count: {}", code.arg_count))?;
        if ver.at_least(3, 8) {
            self.iline(i, &format!("Pos Only Arg Count: {}", code.pos_only_arg_count))?;
        }
        if ver.major >= 3 {
            self.iline(i, &format!("KW Only Arg Count: {}", code.kw_only_arg_count))?;
        }
        if ver.before(3, 11) {
            self.iline(i, &format!("Locals: {}", code.num_locals))?;
        }
        if ver.at_least(1, 5) {
            self.iline(i, &format!("Stack Size: {}", code.stack_size))?;
        }
        if ver.at_least(1, 3) {
            let display_flags = if ver.before(3, 8) {
                // Undo the load-time normalization for display.
                (code.flags & 0xFFFF) | ((code.flags & 0xFFF0_0000) >> 4)
            } else {
                code.flags
            };
            self.iputs(i, &format!("Flags: 0x{display_flags:08X}"))?;
            self.print_coflags(code.flags)?;
        }

        self.iline(i, "[Names]")?;
        for n in &code.names {
            self.iline(i + 1, &format!("'{n}'"))?;
        }

        if ver.at_least(3, 11) {
            self.iline(i, "[Locals+Names]")?;
            for n in &code.locals_plus {
                self.iline(i + 1, &format!("'{n}'"))?;
            }
            if self.options.pycode_extra {
                self.iline(i, "[Locals+Kinds]")?;
                self.iputs(i + 1, "")?;
                for b in &code.local_kinds {
                    write!(self.out, "{b:02x} ")?;
                }
                self.out.push('\n');
            }
        } else if ver.at_least(1, 3) {
            self.iline(i, "[Var Names]")?;
            for n in &code.var_names {
                self.iline(i + 1, &format!("'{n}'"))?;
            }
        }

        if ver.at_least(2, 1) && ver.before(3, 11) {
            self.iline(i, "[Free Vars]")?;
            for n in &code.free_vars {
                self.iline(i + 1, &format!("'{n}'"))?;
            }
            self.iline(i, "[Cell Vars]")?;
            for n in &code.cell_vars {
                self.iline(i + 1, &format!("'{n}'"))?;
            }
        }

        self.iline(i, "[Constants]")?;
        for c in &code.consts {
            self.output_object(c, i + 1)?;
        }

        self.iline(i, "[Disassembly]")?;
        let instructions = read_instructions(&code.code, ver, self.options.show_caches);
        for ins in &instructions {
            self.output_instruction(code, ins, i + 1)?;
        }

        if ver.at_least(3, 11) {
            self.iline(i, "[Exception Table]")?;
            for e in decode_exception_table(&code.exception_table) {
                self.iline(
                    i + 1,
                    &format!(
                        "{}..{} -> {} (depth {}{})",
                        e.start,
                        e.end(),
                        e.target,
                        e.depth,
                        if e.lasti { ", lasti" } else { "" }
                    ),
                )?;
            }
        }

        if ver.at_least(1, 5) && self.options.pycode_extra {
            self.iline(i, &format!("First Line: {}", code.first_line))?;
            self.iline(i, "[Line Table]")?;
            self.iputs(i + 1, "")?;
            for b in &code.line_table {
                write!(self.out, "{b:02x} ")?;
            }
            self.out.push('\n');
        }
        Ok(())
    }

    fn output_instruction(
        &mut self,
        code: &Rc<CodeObject>,
        ins: &Instruction,
        indent: usize,
    ) -> Result<()> {
        self.iputs(indent, "")?;
        write!(self.out, "{:<8}{:<32}", ins.offset, ins.opcode.name())?;
        if let Some(arg) = ins.arg {
            write!(self.out, "{arg}")?;
            if let Some(resolved) = self.resolve(code, ins) {
                write!(self.out, "  ({resolved})")?;
            }
        }
        self.out.push('\n');
        Ok(())
    }

    /// Expands name/const/var indices and jump targets.
    fn resolve(&self, code: &Rc<CodeObject>, ins: &Instruction) -> Option<String> {
        let arg = ins.arg?;
        match operand_kind(ins.opcode, self.version) {
            OperandKind::ConstIdx => {
                let c = code.const_at(arg)?;
                let mut s = String::new();
                write_repr(&mut s, c).ok()?;
                Some(s)
            }
            OperandKind::NameIdx => code.name_at(arg).map(|n| n.to_string()),
            OperandKind::VarIdx => code.var_name_at(arg).map(|n| n.to_string()),
            OperandKind::FreeIdx => code.free_name_at(arg).map(|n| n.to_string()),
            OperandKind::CmpOp => {
                Some(crate::ast::CmpOp::from_arg(arg).as_str().trim().to_string())
            }
            OperandKind::JRel | OperandKind::JRelBack | OperandKind::JAbs => ins
                .jump_target(self.version)
                .map(|t| format!("to {t}")),
            _ => None,
        }
    }

    fn print_coflags(&mut self, flags: u32) -> Result<()> {
        if flags == 0 {
            self.out.push('\n');
            return Ok(());
        }
        self.out.push_str(" (");
        let mut remaining = flags;
        for (k, name) in CODE_FLAG_NAMES.iter().enumerate() {
            let bit = 1u32 << k;
            if remaining & bit != 0 {
                remaining &= !bit;
                self.out.push_str(name);
                if remaining != 0 {
                    self.out.push_str(" | ");
                }
            }
        }
        self.out.push_str(")\n");
        Ok(())
    }
}

/// A one-line repr for scalar objects in constant and operand positions.
fn write_repr(out: &mut String, obj: &ObjRef) -> std::fmt::Result {
    match &**obj {
        PyObject::Null => out.push_str("<NULL>"),
        PyObject::None => out.push_str("None"),
        PyObject::StopIteration => out.push_str("StopIteration"),
        PyObject::Ellipsis => out.push_str("..."),
        PyObject::Bool(true) => out.push_str("True"),
        PyObject::Bool(false) => out.push_str("False"),
        PyObject::Int(v) => write!(out, "{v}")?,
        PyObject::Int64(v) => write!(out, "{v}")?,
        PyObject::Long(v) => write!(out, "{v}")?,
        PyObject::Float(v) => write!(out, "{v}")?,
        PyObject::Complex { real, imag } => write!(out, "({real}+{imag}j)")?,
        PyObject::Str(s) => {
            if s.kind == StrKind::Bytes {
                out.push('b');
            }
            out.push('\'');
            for &b in &s.data {
                match b {
                    b'\n' => out.push_str("\\n"),
                    b'\r' => out.push_str("\\r"),
                    b'\t' => out.push_str("\\t"),
                    b'\'' => out.push_str("\\'"),
                    b'\\' => out.push_str("\\\\"),
                    c if c < 0x20 || c >= 0x7F => write!(out, "\\x{c:02x}")?,
                    c => out.push(c as char),
                }
            }
            out.push('\'');
        }
        PyObject::Tuple(items) => {
            out.push('(');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(out, v)?;
            }
            out.push(')');
        }
        PyObject::List(items) => write!(out, "<list: {} items>", items.len())?,
        PyObject::Dict(items) => write!(out, "<dict: {} items>", items.len())?,
        PyObject::Set(items) => write!(out, "<set: {} items>", items.len())?,
        PyObject::FrozenSet(items) => write!(out, "<frozenset: {} items>", items.len())?,
        PyObject::Code(c) => write!(out, "<code object {}>", c.name)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PyString;

    fn tiny_code() -> Rc<CodeObject> {
        Rc::new(CodeObject {
            python: PyVersion::new(3, 8),
            arg_count: 0,
            pos_only_arg_count: 0,
            kw_only_arg_count: 0,
            num_locals: 0,
            stack_size: 2,
            flags: 0x40, // CO_NOFREE
            code: vec![100, 0, 83, 0], // LOAD_CONST 0; RETURN_VALUE
            consts: vec![Rc::new(PyObject::Int(7))],
            names: vec![],
            var_names: vec![],
            free_vars: vec![],
            cell_vars: vec![],
            local_kinds: vec![],
            locals_plus: vec![],
            file_name: Rc::from("m.py"),
            name: Rc::from("<module>"),
            qual_name: None,
            first_line: 1,
            line_table: vec![],
            exception_table: vec![],
        })
    }

    #[test]
    fn dump_structure() {
        let code = tiny_code();
        let mut out = String::new();
        let mut d = Disassembler {
            out: &mut out,
            version: PyVersion::new(3, 8),
            options: DisasmOptions::default(),
            seen: HashSet::new(),
        };
        let obj: ObjRef = Rc::new(PyObject::Code(code));
        d.output_object(&obj, 0).unwrap();
        assert!(out.contains("[Code]"));
        assert!(out.contains("Object Name: <module>"));
        assert!(out.contains("[Constants]"));
        assert!(out.contains("[Disassembly]"));
        assert!(out.contains("LOAD_CONST"));
        assert!(out.contains("(7)"));
        assert!(out.contains("CO_NOFREE"));
        // RETURN_VALUE has no operand
        assert!(out.contains("RETURN_VALUE"));
    }

    #[test]
    fn string_repr_escapes() {
        let mut s = String::new();
        let obj: ObjRef = Rc::new(PyObject::Str(PyString::new(
            StrKind::Bytes,
            vec![b'a', 0x00, b'\n'],
        )));
        write_repr(&mut s, &obj).unwrap();
        assert_eq!(s, "b'a\\x00\\n'");
    }
}
