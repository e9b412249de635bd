//! Bounds-checked big-endian reader.
//!
//! Every parser in this crate walks its input through [`Reader`] rather than
//! bumping raw offsets. Each accessor checks the remaining length first and
//! fails with [`WireError::Truncated`] carrying the offset at which the input
//! ran out, so a short buffer can never turn into an out-of-bounds read.

use crate::error::WireError;

/// Forward-only cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a slice, positioned at its start.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated(self.pos));
        }
        Ok(())
    }

    /// Read a u8.
    pub fn u8(&mut self) -> Result<u8, WireError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a big-endian u16.
    pub fn u16(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    /// Read a big-endian u32.
    pub fn u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        let b = &self.buf[self.pos..self.pos + 4];
        self.pos += 4;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Peek at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Result<&'a [u8], WireError> {
        self.need(n)?;
        Ok(&self.buf[self.pos..self.pos + n])
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    /// Consume the rest of the slice.
    pub fn rest(&mut self) -> &'a [u8] {
        let s = &self.buf[self.pos..];
        self.pos = self.buf.len();
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(r.u8().unwrap(), 0x01);
        assert_eq!(r.u16().unwrap(), 0x0203);
        assert_eq!(r.u32().unwrap(), 0x04050607);
        assert!(r.is_empty());
    }

    #[test]
    fn test_truncated_reports_offset() {
        let mut r = Reader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(r.u16().unwrap(), 0x0102);
        match r.u16() {
            Err(WireError::Truncated(pos)) => assert_eq!(pos, 2),
            other => panic!("unexpected: {other:?}"),
        }
        // A failed read consumes nothing.
        assert_eq!(r.u8().unwrap(), 0x03);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut r = Reader::new(&[0xAA, 0xBB]);
        assert_eq!(r.peek(2).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(r.position(), 0);
        assert_eq!(r.bytes(2).unwrap(), &[0xAA, 0xBB]);
        assert!(r.peek(1).is_err());
    }
}
