use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepycError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of input at offset {offset}")]
    Eof { offset: usize },

    #[error("bad magic number 0x{0:08x}: not a known Python version")]
    BadMagic(u32),

    #[error("unsupported Python version: {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("cannot parse version string {0:?} (use the x.y form)")]
    BadVersionString(String),

    #[error("invalid object tag 0x{tag:02x} at offset {offset}")]
    InvalidObjectTag { tag: u8, offset: usize },

    #[error("interned string reference {0} out of range")]
    BadStringRef(u32),

    #[error("object reference {0} out of range")]
    BadObjectRef(u32),

    #[error("ASCII string contains non-ASCII bytes")]
    NonAsciiInAsciiString,

    #[error("negative length field at offset {offset}")]
    NegativeLength { offset: usize },

    #[error("stack underflow on {opcode} at offset {offset}")]
    StackUnderflow { opcode: &'static str, offset: u32 },

    #[error("top-level marshalled object is not a code object")]
    NotACodeObject,

    #[error("formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, DepycError>;
