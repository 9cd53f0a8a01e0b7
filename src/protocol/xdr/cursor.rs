//! A fixed-size XDR buffer with an internal read/write offset.
//!
//! Every scalar read or write advances the offset by exactly its encoded
//! width: 4 bytes for `int`, `bool` and `enum`, 8 bytes for `hyper` and
//! `double`, and `4 + len + padding` for strings and opaque data. An
//! operation that would run past the end of the buffer fails with
//! [`std::io::ErrorKind::UnexpectedEof`] and leaves the offset untouched.
//!
//! The cursor also implements [`Read`] and [`Write`], so typed values can be
//! streamed through it with [`super::Serialize`] / [`super::Deserialize`].

use std::fmt;
use std::io::{Read, Write};

use byteorder::ByteOrder;

use super::utils::{self, padding_len, ALIGNMENT};
use super::XDREndian;

/// Computes the XDR-encoded size of a variable-length value without
/// touching any cursor. Used to pre-size outgoing buffers.
pub trait ByteLength {
    fn byte_length(&self) -> usize;
}

impl ByteLength for [u8] {
    fn byte_length(&self) -> usize {
        ALIGNMENT + self.len() + padding_len(self.len())
    }
}

impl ByteLength for str {
    fn byte_length(&self) -> usize {
        self.as_bytes().byte_length()
    }
}

impl ByteLength for [u32] {
    fn byte_length(&self) -> usize {
        ALIGNMENT + ALIGNMENT * self.len()
    }
}

/// Total encoded size of `value`: length prefix, data and padding.
pub fn byte_length<T: ByteLength + ?Sized>(value: &T) -> usize {
    value.byte_length()
}

/// Byte buffer plus offset. Owned by one codec user at a time.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct XdrCursor {
    buffer: Vec<u8>,
    offset: usize,
}

impl XdrCursor {
    /// Wraps an existing buffer, offset at 0.
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Allocates a zero-filled buffer of `size` bytes for writing.
    pub fn with_size(size: usize) -> Self {
        Self::new(vec![0; size])
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes left between the offset and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Moves the offset back to `offset`, or to the start when `None`.
    pub fn rewind(&mut self, offset: Option<usize>) {
        self.offset = offset.unwrap_or(0).min(self.buffer.len());
    }

    /// Returns the bytes from `start` (default: current offset) up to `end`
    /// (default: end of buffer). The offset is not moved; out-of-range
    /// bounds are clamped.
    pub fn slice(&self, start: Option<usize>, end: Option<usize>) -> &[u8] {
        let end = end.unwrap_or(self.buffer.len()).min(self.buffer.len());
        let start = start.unwrap_or(self.offset).min(end);
        &self.buffer[start..end]
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn ensure(&self, wanted: usize) -> std::io::Result<()> {
        if wanted > self.remaining() {
            return Err(utils::out_of_bounds(wanted, self.offset, self.buffer.len()));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> std::io::Result<&[u8]> {
        self.ensure(len)?;
        let start = self.offset;
        self.offset += len;
        Ok(&self.buffer[start..start + len])
    }

    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.ensure(bytes.len())?;
        self.buffer[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
        Ok(())
    }

    pub fn read_int(&mut self) -> std::io::Result<u32> {
        Ok(XDREndian::read_u32(self.take(4)?))
    }

    pub fn write_int(&mut self, value: u32) -> std::io::Result<()> {
        self.ensure(4)?;
        XDREndian::write_u32(&mut self.buffer[self.offset..], value);
        self.offset += 4;
        Ok(())
    }

    /// Reads the unsigned bit pattern back as a signed value.
    pub fn read_int_signed(&mut self) -> std::io::Result<i32> {
        Ok(self.read_int()? as i32)
    }

    /// Negative values are written modulo 2^32.
    pub fn write_int_signed(&mut self, value: i32) -> std::io::Result<()> {
        self.write_int(value as u32)
    }

    /// Any non-zero value reads as `true`.
    pub fn read_bool(&mut self) -> std::io::Result<bool> {
        Ok(self.read_int()? != 0)
    }

    pub fn write_bool(&mut self, value: bool) -> std::io::Result<()> {
        self.write_int(u32::from(value))
    }

    /// `hyper`: high word first, `high * 2^32 + low`.
    pub fn read_hyper(&mut self) -> std::io::Result<u64> {
        let high = u64::from(self.read_int()?);
        let low = u64::from(self.read_int()?);
        Ok((high << 32) | low)
    }

    pub fn write_hyper(&mut self, value: u64) -> std::io::Result<()> {
        self.ensure(8)?;
        self.write_int((value >> 32) as u32)?;
        self.write_int(value as u32)
    }

    /// `double`: IEEE-754 binary64 bits, big endian.
    pub fn read_double(&mut self) -> std::io::Result<f64> {
        Ok(XDREndian::read_f64(self.take(8)?))
    }

    pub fn write_double(&mut self, value: f64) -> std::io::Result<()> {
        self.ensure(8)?;
        XDREndian::write_f64(&mut self.buffer[self.offset..], value);
        self.offset += 8;
        Ok(())
    }

    pub fn read_opaque(&mut self) -> std::io::Result<Vec<u8>> {
        let start = self.offset;
        let len = self.read_int()? as usize;
        let total = len + padding_len(len);
        if let Err(e) = self.ensure(total) {
            self.offset = start;
            return Err(e);
        }
        let data = self.take(len)?.to_vec();
        self.offset += padding_len(len);
        Ok(data)
    }

    pub fn write_opaque(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.ensure(data.byte_length())?;
        self.write_int(data.len() as u32)?;
        self.put(data)?;
        let pad = padding_len(data.len());
        self.put(&[0; ALIGNMENT][..pad])
    }

    /// Strings are ASCII on the wire.
    pub fn read_string(&mut self) -> std::io::Result<String> {
        let start = self.offset;
        let data = self.read_opaque()?;
        if !data.is_ascii() {
            self.offset = start;
            return Err(utils::invalid_data("Not ASCII string"));
        }
        String::from_utf8(data).map_err(|_| utils::invalid_data("Not ASCII string"))
    }

    pub fn write_string(&mut self, value: &str) -> std::io::Result<()> {
        if !value.is_ascii() {
            return Err(utils::invalid_data("Not ASCII string"));
        }
        self.write_opaque(value.as_bytes())
    }

    pub fn read_int_array(&mut self) -> std::io::Result<Vec<u32>> {
        let start = self.offset;
        let count = self.read_int()? as usize;
        if let Err(e) = self.ensure(count.saturating_mul(4)) {
            self.offset = start;
            return Err(e);
        }
        (0..count).map(|_| self.read_int()).collect()
    }

    pub fn write_int_array(&mut self, values: &[u32]) -> std::io::Result<()> {
        self.ensure(values.byte_length())?;
        self.write_int(values.len() as u32)?;
        for value in values {
            self.write_int(*value)?;
        }
        Ok(())
    }

    /// Unpadded fixed-length read.
    pub fn read_raw(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Unpadded fixed-length write.
    pub fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.put(bytes)
    }
}

impl Read for XdrCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = buf.len().min(self.remaining());
        buf[..len].copy_from_slice(&self.buffer[self.offset..self.offset + len]);
        self.offset += len;
        Ok(len)
    }
}

/// Writes never grow the buffer: a write that does not fit fails whole.
impl Write for XdrCursor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.put(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for XdrCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[object XDR <size={}, offset={}>]", self.buffer.len(), self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_past_end_leaves_offset() {
        let mut xdr = XdrCursor::with_size(6);
        xdr.write_int(7).unwrap();
        assert!(xdr.write_int(8).is_err());
        assert_eq!(xdr.offset(), 4);
        assert!(xdr.write_hyper(1).is_err());
        assert_eq!(xdr.offset(), 4);
    }

    #[test]
    fn opaque_is_padded_with_zeroes() {
        let mut xdr = XdrCursor::with_size(12);
        xdr.write_opaque(&[0xff; 5]).unwrap();
        assert_eq!(xdr.offset(), 12);
        assert_eq!(&xdr.buffer()[9..], &[0, 0, 0]);
    }

    #[test]
    fn truncated_opaque_is_rejected() {
        let mut xdr = XdrCursor::new(vec![0, 0, 0, 8, 1, 2, 3]);
        assert!(xdr.read_opaque().is_err());
        assert_eq!(xdr.offset(), 0);
    }

    #[test]
    fn negative_ints_wrap() {
        let mut xdr = XdrCursor::with_size(4);
        xdr.write_int_signed(-2).unwrap();
        assert_eq!(xdr.buffer(), &[0xff, 0xff, 0xff, 0xfe]);
        xdr.rewind(None);
        assert_eq!(xdr.read_int().unwrap(), 0xffff_fffe);
        xdr.rewind(Some(0));
        assert_eq!(xdr.read_int_signed().unwrap(), -2);
    }
}
