//! Bounds-checked cursor over an in-memory byte buffer.
//!
//! Every multi-byte read is little-endian, matching both the `.pyc` header
//! and the marshal stream. Reads past the end return
//! [`DepycError::Eof`](crate::DepycError::Eof) with the current offset so
//! format errors can name the failing byte.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{DepycError, Result};

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn eof(&self) -> DepycError {
        DepycError::Eof { offset: self.pos }
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let v = *self.buf.get(self.pos).ok_or_else(|| self.eof())?;
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(self.eof());
        }
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(self.eof());
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.get_u32().map(|v| v as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        if self.remaining() < 8 {
            return Err(self.eof());
        }
        let v = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.get_u64().map(|v| v as i64)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        if self.remaining() < 8 {
            return Err(self.eof());
        }
        let v = LittleEndian::read_f64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.eof());
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Reads a length field that the marshal format stores as a signed 32-bit
    /// value. Negative lengths are a format error, not an allocation request.
    pub fn get_len32(&mut self) -> Result<usize> {
        let at = self.pos;
        let v = self.get_i32()?;
        if v < 0 {
            return Err(DepycError::NegativeLength { offset: at });
        }
        Ok(v as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_reads() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(r.get_u8().unwrap(), 0x01);
        assert_eq!(r.get_u16().unwrap(), 0x0302);
        assert_eq!(r.offset(), 3);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn eof_reports_offset() {
        let mut r = Reader::new(&[0xff, 0xff]);
        r.get_u8().unwrap();
        match r.get_u32() {
            Err(DepycError::Eof { offset }) => assert_eq!(offset, 1),
            other => panic!("expected Eof, got {other:?}"),
        }
    }

    #[test]
    fn negative_length_is_an_error() {
        let mut r = Reader::new(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            r.get_len32(),
            Err(DepycError::NegativeLength { offset: 0 })
        ));
    }
}
