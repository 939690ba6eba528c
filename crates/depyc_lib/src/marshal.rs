//! Parser for CPython's marshal serialization format.
//!
//! The stream is a tagged byte-oriented encoding: one type-tag byte per
//! object, optionally OR'd with `FLAG_REF` (0x80) to enter the object into
//! the reference pool (3.4+), followed by a type-specific payload. Python 2
//! instead interns strings tagged `TYPE_INTERNED` and refers back to them
//! with `TYPE_STRINGREF`.
//!
//! Code objects change field layout across releases; `read_code` follows the
//! layout for the version the caller announced (from the `.pyc` magic or the
//! `-v` flag).

use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use tracing::debug;

use crate::error::{DepycError, Result};
use crate::object::{CodeObject, ObjRef, PyObject, PyString, StrKind};
use crate::object::{CO_FAST_CELL, CO_FAST_FREE, CO_FAST_LOCAL};
use crate::reader::Reader;
use crate::version::PyVersion;

const TYPE_NULL: u8 = b'0';
const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_STOPITER: u8 = b'S';
const TYPE_ELLIPSIS: u8 = b'.';
const TYPE_INT: u8 = b'i';
const TYPE_INT64: u8 = b'I';
const TYPE_FLOAT: u8 = b'f';
const TYPE_BINARY_FLOAT: u8 = b'g';
const TYPE_COMPLEX: u8 = b'x';
const TYPE_BINARY_COMPLEX: u8 = b'y';
const TYPE_LONG: u8 = b'l';
const TYPE_STRING: u8 = b's';
const TYPE_INTERNED: u8 = b't';
const TYPE_STRINGREF: u8 = b'R';
const TYPE_REF: u8 = b'r';
const TYPE_UNICODE: u8 = b'u';
const TYPE_ASCII: u8 = b'a';
const TYPE_ASCII_INTERNED: u8 = b'A';
const TYPE_SHORT_ASCII: u8 = b'z';
const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';
const TYPE_TUPLE: u8 = b'(';
const TYPE_SMALL_TUPLE: u8 = b')';
const TYPE_LIST: u8 = b'[';
const TYPE_DICT: u8 = b'{';
const TYPE_SET: u8 = b'<';
const TYPE_FROZENSET: u8 = b'>';
const TYPE_CODE: u8 = b'c';
const TYPE_CODE_OLD: u8 = b'C';

const FLAG_REF: u8 = 0x80;

pub struct MarshalReader<'a> {
    r: Reader<'a>,
    version: PyVersion,
    /// Python 2 intern pool (`TYPE_INTERNED` / `TYPE_STRINGREF`).
    interns: Vec<ObjRef>,
    /// 3.4+ object reference pool (`FLAG_REF` / `TYPE_REF`).
    refs: Vec<ObjRef>,
}

impl<'a> MarshalReader<'a> {
    pub fn new(buf: &'a [u8], version: PyVersion) -> Self {
        Self {
            r: Reader::new(buf),
            version,
            interns: Vec::new(),
            refs: Vec::new(),
        }
    }

    pub fn offset(&self) -> usize {
        self.r.offset()
    }

    /// Reads one complete object tree from the current position.
    pub fn read_object(&mut self) -> Result<ObjRef> {
        let at = self.r.offset();
        let raw_tag = self.r.get_u8()?;
        let tag = raw_tag & !FLAG_REF;
        // Pre-3.4 streams never set the high bit on a valid tag.
        let make_ref = raw_tag & FLAG_REF != 0 && self.version.at_least(3, 4);

        // Reserve the pool slot before descending so nested back-references
        // resolve to an index, never shift later entries.
        let ref_idx = if make_ref {
            self.refs.push(Rc::new(PyObject::Null));
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let obj: ObjRef = match tag {
            TYPE_NULL => Rc::new(PyObject::Null),
            TYPE_NONE => Rc::new(PyObject::None),
            TYPE_FALSE => Rc::new(PyObject::Bool(false)),
            TYPE_TRUE => Rc::new(PyObject::Bool(true)),
            TYPE_STOPITER => Rc::new(PyObject::StopIteration),
            TYPE_ELLIPSIS => Rc::new(PyObject::Ellipsis),
            TYPE_INT => Rc::new(PyObject::Int(self.r.get_i32()?)),
            TYPE_INT64 => Rc::new(PyObject::Int64(self.r.get_i64()?)),
            TYPE_FLOAT => {
                let len = self.r.get_u8()? as usize;
                let text = String::from_utf8_lossy(self.r.get_bytes(len)?).into_owned();
                Rc::new(PyObject::Float(text.parse().unwrap_or(f64::NAN)))
            }
            TYPE_BINARY_FLOAT => Rc::new(PyObject::Float(self.r.get_f64()?)),
            TYPE_COMPLEX => {
                let rlen = self.r.get_u8()? as usize;
                let real = String::from_utf8_lossy(self.r.get_bytes(rlen)?)
                    .parse()
                    .unwrap_or(f64::NAN);
                let ilen = self.r.get_u8()? as usize;
                let imag = String::from_utf8_lossy(self.r.get_bytes(ilen)?)
                    .parse()
                    .unwrap_or(f64::NAN);
                Rc::new(PyObject::Complex { real, imag })
            }
            TYPE_BINARY_COMPLEX => {
                let real = self.r.get_f64()?;
                let imag = self.r.get_f64()?;
                Rc::new(PyObject::Complex { real, imag })
            }
            TYPE_LONG => Rc::new(PyObject::Long(self.read_long()?)),
            TYPE_STRING => {
                let len = self.r.get_len32()?;
                let data = self.r.get_bytes(len)?.to_vec();
                Rc::new(PyObject::Str(PyString::new(StrKind::Bytes, data)))
            }
            TYPE_INTERNED => {
                let len = self.r.get_len32()?;
                let data = self.r.get_bytes(len)?.to_vec();
                let obj: ObjRef =
                    Rc::new(PyObject::Str(PyString::new(StrKind::Interned, data)));
                self.interns.push(Rc::clone(&obj));
                obj
            }
            TYPE_STRINGREF => {
                let idx = self.r.get_u32()?;
                Rc::clone(
                    self.interns
                        .get(idx as usize)
                        .ok_or(DepycError::BadStringRef(idx))?,
                )
            }
            TYPE_REF => {
                let idx = self.r.get_u32()?;
                Rc::clone(
                    self.refs
                        .get(idx as usize)
                        .ok_or(DepycError::BadObjectRef(idx))?,
                )
            }
            TYPE_UNICODE => {
                let len = self.r.get_len32()?;
                let data = self.r.get_bytes(len)?.to_vec();
                Rc::new(PyObject::Str(PyString::new(StrKind::Unicode, data)))
            }
            TYPE_ASCII | TYPE_ASCII_INTERNED => {
                let len = self.r.get_len32()?;
                Rc::new(PyObject::Str(self.read_ascii(len)?))
            }
            TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
                let len = self.r.get_u8()? as usize;
                Rc::new(PyObject::Str(self.read_ascii(len)?))
            }
            TYPE_TUPLE => {
                let len = self.r.get_len32()?;
                Rc::new(PyObject::Tuple(self.read_seq(len)?))
            }
            TYPE_SMALL_TUPLE => {
                let len = self.r.get_u8()? as usize;
                Rc::new(PyObject::Tuple(self.read_seq(len)?))
            }
            TYPE_LIST => {
                let len = self.r.get_len32()?;
                Rc::new(PyObject::List(self.read_seq(len)?))
            }
            TYPE_DICT => {
                let mut items = Vec::new();
                loop {
                    let key = self.read_object()?;
                    if matches!(*key, PyObject::Null) {
                        break;
                    }
                    let value = self.read_object()?;
                    items.push((key, value));
                }
                Rc::new(PyObject::Dict(items))
            }
            TYPE_SET => {
                let len = self.r.get_len32()?;
                Rc::new(PyObject::Set(self.read_seq(len)?))
            }
            TYPE_FROZENSET => {
                let len = self.r.get_len32()?;
                Rc::new(PyObject::FrozenSet(self.read_seq(len)?))
            }
            TYPE_CODE | TYPE_CODE_OLD => Rc::new(PyObject::Code(Rc::new(self.read_code()?))),
            tag => return Err(DepycError::InvalidObjectTag { tag, offset: at }),
        };

        if let Some(idx) = ref_idx {
            self.refs[idx] = Rc::clone(&obj);
        }
        Ok(obj)
    }

    fn read_seq(&mut self, len: usize) -> Result<Vec<ObjRef>> {
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(self.read_object()?);
        }
        Ok(out)
    }

    fn read_ascii(&mut self, len: usize) -> Result<PyString> {
        let data = self.r.get_bytes(len)?;
        if data.iter().any(|&b| b & 0x80 != 0) {
            return Err(DepycError::NonAsciiInAsciiString);
        }
        Ok(PyString::new(StrKind::Ascii, data.to_vec()))
    }

    /// Arbitrary-precision integers: a signed 32-bit digit count followed by
    /// 15-bit digits, little-endian by digit.
    fn read_long(&mut self) -> Result<BigInt> {
        let count = self.r.get_i32()?;
        let sign = if count < 0 {
            Sign::Minus
        } else if count == 0 {
            Sign::NoSign
        } else {
            Sign::Plus
        };
        let n = count.unsigned_abs() as usize;
        let mut value = BigInt::from(0);
        let mut shift = 0u32;
        for _ in 0..n {
            let digit = self.r.get_u16()? as u64;
            value += BigInt::from(digit) << shift;
            shift += 15;
        }
        if sign == Sign::Minus {
            value = -value;
        }
        Ok(value)
    }

    fn read_string_names(&mut self) -> Result<Vec<Rc<str>>> {
        let tup = self.read_object()?;
        let items = match &*tup {
            PyObject::Tuple(v) | PyObject::List(v) => v.as_slice(),
            _ => &[],
        };
        Ok(items
            .iter()
            .map(|o| match o.as_string() {
                Some(s) => Rc::from(&*s.as_str()),
                None => Rc::from("<invalid>"),
            })
            .collect())
    }

    fn read_bytes_object(&mut self) -> Result<Vec<u8>> {
        let obj = self.read_object()?;
        match &*obj {
            PyObject::Str(s) => Ok(s.data.clone()),
            _ => Ok(Vec::new()),
        }
    }

    fn expect_str(&mut self) -> Result<Rc<str>> {
        let obj = self.read_object()?;
        Ok(match obj.as_string() {
            Some(s) => Rc::from(&*s.as_str()),
            None => Rc::from("<invalid>"),
        })
    }

    /// Reads a 16-bit field for pre-2.3 streams, 32-bit after.
    fn code_field(&mut self) -> Result<u32> {
        if self.version.wide_code_fields() {
            self.r.get_u32()
        } else {
            self.r.get_u16().map(u32::from)
        }
    }

    fn read_code(&mut self) -> Result<CodeObject> {
        let ver = self.version;

        let arg_count = if ver.at_least(1, 3) { self.code_field()? } else { 0 };
        let pos_only_arg_count = if ver.at_least(3, 8) { self.r.get_u32()? } else { 0 };
        let kw_only_arg_count = if ver.at_least(3, 0) { self.r.get_u32()? } else { 0 };
        let mut num_locals = if ver.at_least(1, 3) && ver.before(3, 11) {
            self.code_field()?
        } else {
            0
        };
        let stack_size = if ver.at_least(1, 5) { self.code_field()? } else { 0 };
        let mut flags = if ver.at_least(1, 3) { self.code_field()? } else { 0 };
        if ver.before(3, 8) {
            // Remap the future-feature bits to the normalized (3.8+) layout.
            flags = (flags & 0xFFFF) | ((flags & 0xFFF0000) << 4);
        }

        let code = self.read_bytes_object()?;
        let consts = match &*self.read_object()? {
            PyObject::Tuple(v) => v.clone(),
            _ => Vec::new(),
        };
        let names = self.read_string_names()?;

        let mut var_names = if ver.at_least(1, 3) && ver.before(3, 11) {
            self.read_string_names()?
        } else {
            Vec::new()
        };
        let mut free_vars = Vec::new();
        let mut cell_vars = Vec::new();
        if ver.at_least(2, 1) && ver.before(3, 11) {
            free_vars = self.read_string_names()?;
            cell_vars = self.read_string_names()?;
        }

        let mut locals_plus = Vec::new();
        let mut local_kinds = Vec::new();
        if ver.at_least(3, 11) {
            locals_plus = self.read_string_names()?;
            local_kinds = self.read_bytes_object()?;
            for (name, &kind) in locals_plus.iter().zip(local_kinds.iter()) {
                if kind & CO_FAST_LOCAL != 0 {
                    var_names.push(Rc::clone(name));
                }
                if kind & CO_FAST_CELL != 0 {
                    cell_vars.push(Rc::clone(name));
                }
                if kind & CO_FAST_FREE != 0 {
                    free_vars.push(Rc::clone(name));
                }
            }
            num_locals = var_names.len() as u32;
        }

        let file_name = self.expect_str()?;
        let name = self.expect_str()?;
        let qual_name = if ver.at_least(3, 11) {
            Some(self.expect_str()?)
        } else {
            None
        };

        let first_line = if ver.at_least(1, 5) {
            if ver.wide_code_fields() {
                self.r.get_u32()?
            } else {
                u32::from(self.r.get_u16()?)
            }
        } else {
            0
        };
        let line_table = if ver.at_least(1, 5) {
            self.read_bytes_object()?
        } else {
            Vec::new()
        };
        let exception_table = if ver.at_least(3, 11) {
            self.read_bytes_object()?
        } else {
            Vec::new()
        };

        debug!(name = %name, args = arg_count, bytes = code.len(), "loaded code object");

        Ok(CodeObject {
            python: ver,
            arg_count,
            pos_only_arg_count,
            kw_only_arg_count,
            num_locals,
            stack_size,
            flags,
            code,
            consts,
            names,
            var_names,
            free_vars,
            cell_vars,
            local_kinds,
            locals_plus,
            file_name,
            name,
            qual_name,
            first_line,
            line_table,
            exception_table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(bytes: &[u8], ver: PyVersion) -> ObjRef {
        MarshalReader::new(bytes, ver).read_object().unwrap()
    }

    #[test]
    fn scalars() {
        let v38 = PyVersion::new(3, 8);
        assert!(matches!(*read(b"N", v38), PyObject::None));
        assert!(matches!(*read(b"T", v38), PyObject::Bool(true)));
        assert!(matches!(
            *read(&[b'i', 0x2a, 0, 0, 0], v38),
            PyObject::Int(42)
        ));
        assert!(matches!(
            *read(&[b'i', 0xff, 0xff, 0xff, 0xff], v38),
            PyObject::Int(-1)
        ));
    }

    #[test]
    fn long_digits() {
        // 2 digits: 1 + 2*2^15 = 65537
        let bytes = [b'l', 2, 0, 0, 0, 1, 0, 2, 0];
        match &*read(&bytes, PyVersion::new(2, 7)) {
            PyObject::Long(v) => assert_eq!(*v, BigInt::from(65537)),
            other => panic!("expected long, got {other:?}"),
        }
        // negative count flips the sign
        let bytes = [b'l', 0xfe, 0xff, 0xff, 0xff, 1, 0, 2, 0];
        match &*read(&bytes, PyVersion::new(2, 7)) {
            PyObject::Long(v) => assert_eq!(*v, BigInt::from(-65537)),
            other => panic!("expected long, got {other:?}"),
        }
    }

    #[test]
    fn py2_intern_pool() {
        // ('spam', 'spam') with the second element a stringref
        let mut bytes = vec![b'(', 2, 0, 0, 0];
        bytes.extend([b't', 4, 0, 0, 0]);
        bytes.extend(b"spam");
        bytes.extend([b'R', 0, 0, 0, 0]);
        match &*read(&bytes, PyVersion::new(2, 7)) {
            PyObject::Tuple(v) => {
                assert_eq!(v.len(), 2);
                assert!(Rc::ptr_eq(&v[0], &v[1]));
            }
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn py3_ref_pool() {
        // ('x' [FLAG_REF], r0)
        let bytes = [
            b')', 2,
            b'z' | FLAG_REF, 1, b'x',
            b'r', 0, 0, 0, 0,
        ];
        match &*read(&bytes, PyVersion::new(3, 8)) {
            PyObject::Tuple(v) => assert!(Rc::ptr_eq(&v[0], &v[1])),
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn ascii_validation() {
        let bytes = [b'z', 1, 0xC3];
        let err = MarshalReader::new(&bytes, PyVersion::new(3, 8))
            .read_object()
            .unwrap_err();
        assert!(matches!(err, DepycError::NonAsciiInAsciiString));
    }

    #[test]
    fn bad_tag_reports_offset() {
        let bytes = [b'N', b'Q'];
        let mut m = MarshalReader::new(&bytes, PyVersion::new(3, 8));
        m.read_object().unwrap();
        assert!(matches!(
            m.read_object(),
            Err(DepycError::InvalidObjectTag { tag: b'Q', offset: 1 })
        ));
    }
}
