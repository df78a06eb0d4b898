#![forbid(unsafe_code)]
//! Big-endian sink and source used by the page codec.
//!
//! Integers are written in network byte order so persisted pages are
//! independent of the host. Reads never panic: running off the end of a
//! buffer surfaces as [`TesseraError::Corruption`].

use crate::types::{Result, TesseraError};

/// Growable output buffer pages serialize into.
#[derive(Default, Debug)]
pub struct PageSink {
    buf: Vec<u8>,
}

impl PageSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sink with room for `cap` bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Appends a boolean as `0`/`1`.
    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    /// Appends a big-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian `u64` through its two's-complement `i64` form.
    pub fn put_u64(&mut self, v: u64) {
        self.put_i64(v as i64);
    }

    /// Appends a length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = i32::try_from(v.len())
            .map_err(|_| TesseraError::Invalid("byte string longer than i32::MAX"))?;
        self.put_i32(len);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) -> Result<()> {
        self.put_bytes(v.as_bytes())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the sink, returning the written bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Slice-backed reader with offset tracking.
pub struct PageSource<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> PageSource<'a> {
    /// Creates a source positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .ok_or_else(|| TesseraError::corruption("page source offset overflow"))?;
        if end > self.buf.len() {
            return Err(TesseraError::corruption(format!(
                "page truncated: need {n} bytes at offset {}, have {}",
                self.off,
                self.remaining()
            )));
        }
        let out = &self.buf[self.off..end];
        self.off = end;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a boolean written by [`PageSink::put_bool`].
    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TesseraError::corruption(format!("invalid flag byte {other}"))),
        }
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Reads a `u64` written by [`PageSink::put_u64`].
    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(self.get_i64()? as u64)
    }

    /// Reads a non-negative `i32` count.
    pub fn get_len(&mut self) -> Result<usize> {
        let len = self.get_i32()?;
        usize::try_from(len)
            .map_err(|_| TesseraError::corruption(format!("negative length {len}")))
    }

    /// Reads a length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        String::from_utf8(raw).map_err(|_| TesseraError::corruption("string is not valid UTF-8"))
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.off
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(TesseraError::corruption(format!(
                "{} trailing bytes after page",
                self.remaining()
            )));
        }
        Ok(())
    }
}
