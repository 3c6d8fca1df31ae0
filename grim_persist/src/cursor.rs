use std::convert::TryFrom;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::StreamError;

/// Growable little-endian output buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a count or length as a u32 field.
    pub fn put_len(&mut self, len: usize) -> Result<(), StreamError> {
        let len = u32::try_from(len).map_err(|_| StreamError::LengthOverflow(len))?;
        self.put_u32(len);
        Ok(())
    }

    pub fn put_str(&mut self, value: &str) -> Result<(), StreamError> {
        self.put_len(value.len())?;
        self.put_bytes(value.as_bytes());
        Ok(())
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian reader over a borrowed byte slice.
///
/// Every getter checks the remaining length up front so a short stream
/// reports how many bytes were wanted instead of a bare EOF.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, wanted: usize) -> Result<(), StreamError> {
        let remaining = self.remaining();
        if remaining < wanted {
            return Err(StreamError::Truncated { wanted, remaining });
        }
        Ok(())
    }

    /// Fails early when `count` items of at least `min_item_size` bytes each
    /// cannot possibly fit in what is left of the stream.
    pub fn ensure_items(&self, count: usize, min_item_size: usize) -> Result<(), StreamError> {
        self.ensure(count.saturating_mul(min_item_size))
    }

    pub fn get_u8(&mut self) -> Result<u8, StreamError> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn get_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32, StreamError> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn get_i32(&mut self) -> Result<i32, StreamError> {
        self.ensure(4)?;
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    pub fn get_f32(&mut self) -> Result<f32, StreamError> {
        self.ensure(4)?;
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    pub fn get_len(&mut self) -> Result<usize, StreamError> {
        let len = self.get_u32()?;
        usize::try_from(len).map_err(|_| StreamError::LengthOverflow(usize::MAX))
    }

    /// Borrows the next `len` bytes without copying.
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        self.ensure(len)?;
        let start = self.position();
        let bytes: &'a [u8] = *self.cursor.get_ref();
        let slice = &bytes[start..start + len];
        self.cursor.set_position((start + len) as u64);
        Ok(slice)
    }

    pub fn get_str(&mut self) -> Result<&'a str, StreamError> {
        let len = self.get_len()?;
        let bytes = self.get_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?)
    }
}
