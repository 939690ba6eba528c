//! `.pyc` container parsing: header (magic, metadata) plus the marshalled
//! top-level code object.

use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::error::{DepycError, Result};
use crate::marshal::MarshalReader;
use crate::object::{CodeObject, PyObject};
use crate::reader::Reader;
use crate::version::{version_from_magic, PyVersion};

/// A loaded module: the announced Python version, header metadata, and the
/// root of the code-object tree.
#[derive(Debug)]
pub struct PycModule {
    pub version: PyVersion,
    /// Python 2 `-U` (unicode literals) interpreter mode, signalled by a
    /// magic number one above the release value.
    pub unicode: bool,
    /// 3.7+ header bit-field (bit 0: hash-based pyc).
    pub header_flags: u32,
    pub code: Rc<CodeObject>,
}

impl PycModule {
    /// Parses a complete `.pyc` image: magic, version-dependent metadata,
    /// then the marshalled code object.
    pub fn load(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let magic = r.get_u32()?;
        let (version, unicode) = match version_from_magic(magic) {
            Ok(v) => (v, false),
            // Python 2 -U builds stamp magic+1; retry before giving up.
            Err(_) if (magic >> 16) == 0x0A0D => {
                (version_from_magic(magic - 1)?, true)
            }
            Err(e) => return Err(e),
        };

        let mut header_flags = 0;
        if version.at_least(3, 7) {
            header_flags = r.get_u32()?;
            if header_flags & 1 != 0 {
                let _source_hash = r.get_u64()?;
            } else {
                let _mtime = r.get_u32()?;
                let _source_size = r.get_u32()?;
            }
        } else {
            if version.at_least(1, 3) {
                let _mtime = r.get_u32()?;
            }
            if version.at_least(3, 3) {
                let _source_size = r.get_u32()?;
            }
        }

        debug!(%version, unicode, header_flags, "parsed pyc header");
        let code = Self::load_marshalled(&buf[r.offset()..], version)?.code;
        Ok(Self {
            version,
            unicode,
            header_flags,
            code,
        })
    }

    /// Parses a bare marshalled code object (no `.pyc` header); the version
    /// must be supplied by the caller.
    pub fn load_marshalled(buf: &[u8], version: PyVersion) -> Result<Self> {
        let mut m = MarshalReader::new(buf, version);
        let obj = m.read_object()?;
        let code = match &*obj {
            PyObject::Code(c) => Rc::clone(c),
            _ => return Err(DepycError::NotACodeObject),
        };
        Ok(Self {
            version,
            unicode: false,
            header_flags: 0,
            code,
        })
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load(&std::fs::read(path)?)
    }

    pub fn load_marshalled_file(path: &Path, version: PyVersion) -> Result<Self> {
        Self::load_marshalled(&std::fs::read(path)?, version)
    }

    /// Python 3 `str` (and Python 2 `-U` mode strings) are unicode; decides
    /// whether `TYPE_STRING` literals print with a `b` prefix.
    pub fn str_is_unicode(&self) -> bool {
        self.version.major >= 3 || self.unicode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal 3.8 pyc: magic 3413, zero bit-field, mtime, size, then `None`
    // where a code object belongs.
    #[test]
    fn header_without_code_object_is_rejected() {
        let mut buf = Vec::new();
        buf.extend(3413u16.to_le_bytes());
        buf.extend([0x0D, 0x0A]);
        buf.extend([0u8; 12]); // bit-field + mtime + size
        buf.push(b'N');
        assert!(matches!(
            PycModule::load(&buf),
            Err(DepycError::NotACodeObject)
        ));
    }

    #[test]
    fn py2_unicode_magic_detected() {
        // 2.7 magic + 1 signals -U mode; body is just `None` so expect the
        // NotACodeObject error after a successful header parse.
        let mut buf = Vec::new();
        buf.extend((0xF303u16 + 1).to_le_bytes());
        buf.extend([0x0D, 0x0A]);
        buf.extend([0u8; 4]); // mtime
        buf.push(b'N');
        let err = PycModule::load(&buf).unwrap_err();
        assert!(matches!(err, DepycError::NotACodeObject));
    }

    #[test]
    fn truncated_header() {
        let buf = [0x55, 0x0D];
        assert!(matches!(
            PycModule::load(&buf),
            Err(DepycError::Eof { .. })
        ));
    }
}
