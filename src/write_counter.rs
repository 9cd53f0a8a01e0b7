//! Write Counter module provides a wrapper for Writer implementations that counts
//! bytes written during write operations.
//!
//! Outgoing records are written into a fixed-size [`crate::xdr::XdrCursor`], so
//! the header has to be measured before the buffer is allocated. Serializing
//! into a `WriteCounter` over [`std::io::sink`] yields that size without
//! allocating.

use std::io::Write;

use crate::xdr::Serialize;

/// A wrapper around a Writer that counts the number of bytes written
pub struct WriteCounter<W> {
    /// The wrapped writer instance
    inner: W,
    /// Count of bytes successfully written so far
    count: usize,
}

impl<W> WriteCounter<W>
where
    W: Write,
{
    /// Creates a new WriteCounter wrapping the provided writer
    pub fn new(inner: W) -> Self {
        WriteCounter { inner, count: 0 }
    }

    /// Returns the total number of bytes successfully written so far
    pub fn bytes_written(&self) -> usize {
        self.count
    }
}

impl<W> Write for WriteCounter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let res = self.inner.write(buf);
        if let Ok(size) = res {
            self.count += size
        }
        res
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Number of bytes `value` occupies once XDR-encoded.
pub fn encoded_len<T: Serialize + ?Sized>(value: &T) -> std::io::Result<usize> {
    let mut counter = WriteCounter::new(std::io::sink());
    value.serialize(&mut counter)?;
    Ok(counter.bytes_written())
}
