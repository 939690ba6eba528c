//! The marshalled Python object model.
//!
//! Objects are immutable after loading and freely shared (`Rc`), so a
//! constant referenced from several AST nodes is stored once. Strings keep
//! their raw bytes plus the marshal kind that produced them; the kind decides
//! the literal prefix and escaping rules at print time.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::version::PyVersion;

pub type ObjRef = Rc<PyObject>;

/// Marshal string kinds that survive into the object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrKind {
    /// `TYPE_STRING`: Python 2 `str` / Python 3 `bytes`.
    Bytes,
    /// `TYPE_INTERNED`: Python 2 interned `str`.
    Interned,
    /// `TYPE_UNICODE`: UTF-8 encoded text.
    Unicode,
    /// `TYPE_ASCII` / `TYPE_ASCII_INTERNED` and the short forms.
    Ascii,
}

#[derive(Debug, Clone)]
pub struct PyString {
    pub kind: StrKind,
    pub data: Vec<u8>,
}

impl PyString {
    pub fn new(kind: StrKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn ascii(text: &str) -> Self {
        Self::new(StrKind::Ascii, text.as_bytes().to_vec())
    }

    /// Lossy UTF-8 view; unicode/ascii kinds are valid UTF-8 by construction.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn eq_str(&self, s: &str) -> bool {
        self.data == s.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum PyObject {
    /// The `0` tag: the dict terminator and the placeholder for reserved
    /// forward references. Never part of a well-formed tree.
    Null,
    None,
    StopIteration,
    Ellipsis,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Long(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Str(PyString),
    Tuple(Vec<ObjRef>),
    List(Vec<ObjRef>),
    Dict(Vec<(ObjRef, ObjRef)>),
    Set(Vec<ObjRef>),
    FrozenSet(Vec<ObjRef>),
    Code(Rc<CodeObject>),
}

impl PyObject {
    pub fn as_string(&self) -> Option<&PyString> {
        match self {
            PyObject::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&Rc<CodeObject>> {
        match self {
            PyObject::Code(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PyObject::None)
    }

    /// Type name used in diagnostics and placeholder output.
    pub fn type_name(&self) -> &'static str {
        match self {
            PyObject::Null => "NULL",
            PyObject::None => "None",
            PyObject::StopIteration => "StopIteration",
            PyObject::Ellipsis => "Ellipsis",
            PyObject::Bool(_) => "bool",
            PyObject::Int(_) | PyObject::Int64(_) => "int",
            PyObject::Long(_) => "long",
            PyObject::Float(_) => "float",
            PyObject::Complex { .. } => "complex",
            PyObject::Str(_) => "str",
            PyObject::Tuple(_) => "tuple",
            PyObject::List(_) => "list",
            PyObject::Dict(_) => "dict",
            PyObject::Set(_) => "set",
            PyObject::FrozenSet(_) => "frozenset",
            PyObject::Code(_) => "code",
        }
    }
}

/// Formats a float the way Python's repr does for the common cases: integral
/// values keep a trailing `.0`, non-finite values spell the `float(...)`
/// constructor forms.
pub fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        write!(f, "float('nan')")
    } else if v.is_infinite() {
        write!(f, "float('{}inf')", if v < 0.0 { "-" } else { "" })
    } else if v == v.trunc() && v.abs() < 1e16 {
        write!(f, "{:.1}", v)
    } else {
        write!(f, "{}", v)
    }
}

/// Code object flag-bit names, normalized to the 3.8+ layout at load time.
pub const CODE_FLAG_NAMES: [&str; 32] = [
    "CO_OPTIMIZED", "CO_NEWLOCALS", "CO_VARARGS", "CO_VARKEYWORDS",
    "CO_NESTED", "CO_GENERATOR", "CO_NOFREE", "CO_COROUTINE",
    "CO_ITERABLE_COROUTINE", "CO_ASYNC_GENERATOR", "<0x400>", "<0x800>",
    "CO_GENERATOR_ALLOWED", "<0x2000>", "<0x4000>", "<0x8000>",
    "<0x10000>", "CO_FUTURE_DIVISION", "CO_FUTURE_ABSOLUTE_IMPORT",
    "CO_FUTURE_WITH_STATEMENT", "CO_FUTURE_PRINT_FUNCTION",
    "CO_FUTURE_UNICODE_LITERALS", "CO_FUTURE_BARRY_AS_BDFL",
    "CO_FUTURE_GENERATOR_STOP", "CO_FUTURE_ANNOTATIONS",
    "CO_NO_MONITORING_EVENTS", "<0x4000000>", "<0x8000000>",
    "<0x10000000>", "<0x20000000>", "<0x40000000>", "<0x80000000>",
];

pub const CO_VARARGS: u32 = 0x4;
pub const CO_VARKEYWORDS: u32 = 0x8;
pub const CO_GENERATOR: u32 = 0x20;
pub const CO_COROUTINE: u32 = 0x80;
pub const CO_ASYNC_GENERATOR: u32 = 0x200;

/// Local-kind bits from the 3.11+ `localspluskinds` vector.
pub const CO_FAST_LOCAL: u8 = 0x20;
pub const CO_FAST_CELL: u8 = 0x40;
pub const CO_FAST_FREE: u8 = 0x80;

#[derive(Debug)]
pub struct CodeObject {
    pub python: PyVersion,
    pub arg_count: u32,
    pub pos_only_arg_count: u32,
    pub kw_only_arg_count: u32,
    pub num_locals: u32,
    pub stack_size: u32,
    pub flags: u32,
    pub code: Vec<u8>,
    pub consts: Vec<ObjRef>,
    pub names: Vec<Rc<str>>,
    pub var_names: Vec<Rc<str>>,
    pub free_vars: Vec<Rc<str>>,
    pub cell_vars: Vec<Rc<str>>,
    /// 3.11+: the raw `localspluskinds` bytes, parallel to `localsplusnames`.
    pub local_kinds: Vec<u8>,
    /// 3.11+: the combined fast-locals name vector, kept for the dump.
    pub locals_plus: Vec<Rc<str>>,
    pub file_name: Rc<str>,
    pub name: Rc<str>,
    pub qual_name: Option<Rc<str>>,
    pub first_line: u32,
    pub line_table: Vec<u8>,
    pub exception_table: Vec<u8>,
}

impl CodeObject {
    pub fn const_at(&self, idx: u32) -> Option<&ObjRef> {
        self.consts.get(idx as usize)
    }

    pub fn name_at(&self, idx: u32) -> Option<&Rc<str>> {
        self.names.get(idx as usize)
    }

    pub fn var_name_at(&self, idx: u32) -> Option<&Rc<str>> {
        self.var_names.get(idx as usize)
    }

    /// Resolves a `LOAD_DEREF`-style index: cell variables first, then free
    /// variables (3.11+ indexes straight into `localsplus`).
    pub fn free_name_at(&self, idx: u32) -> Option<&Rc<str>> {
        if self.python.at_least(3, 11) {
            return self.locals_plus.get(idx as usize);
        }
        let idx = idx as usize;
        if idx < self.cell_vars.len() {
            self.cell_vars.get(idx)
        } else {
            self.free_vars.get(idx - self.cell_vars.len())
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_generator_like(&self) -> bool {
        self.has_flag(CO_GENERATOR) || self.has_flag(CO_ASYNC_GENERATOR)
    }

    /// Nested code objects, in `co_consts` order.
    pub fn nested_codes(&self) -> impl Iterator<Item = &Rc<CodeObject>> {
        self.consts.iter().filter_map(|c| c.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting() {
        struct F(f64);
        impl fmt::Display for F {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_float(f, self.0)
            }
        }
        assert_eq!(F(1.0).to_string(), "1.0");
        assert_eq!(F(2.5).to_string(), "2.5");
        assert_eq!(F(f64::INFINITY).to_string(), "float('inf')");
        assert_eq!(F(f64::NEG_INFINITY).to_string(), "float('-inf')");
    }

    #[test]
    fn string_kinds() {
        let s = PyString::ascii("spam");
        assert!(s.eq_str("spam"));
        assert_eq!(s.as_str(), "spam");
        let b = PyString::new(StrKind::Bytes, vec![0xff, 0x00]);
        assert!(!b.eq_str("\u{fffd}\u{0}"));
    }
}
