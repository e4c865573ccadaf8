//! Zeroizing byte buffers with cursor-based little-endian I/O (spec §4.1).
//!
//! Two variants: [`SecureBuffer`] grows without bound, [`FixedSecureBuffer`]
//! refuses to grow past the capacity it was created with. Both zero their
//! backing storage on drop and on any shrink/erase.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// A growable, zero-on-drop byte buffer with a cursor for sequential reads
/// and writes, mirroring the source library's `SqrlString`.
#[derive(Clone, Default)]
pub struct SecureBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl SecureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { data: Vec::with_capacity(cap), cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn clear(&mut self) {
        self.data.zeroize();
        self.data.clear();
        self.cursor = 0;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Shrinks to `new_len`, zeroing the bytes that are dropped.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len < self.data.len() {
            self.data[new_len..].zeroize();
            self.data.truncate(new_len);
            if self.cursor > new_len {
                self.cursor = new_len;
            }
        }
    }

    pub fn seek(&mut self, pos: usize) {
        self.cursor = pos.min(self.data.len());
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_at(self.cursor, &[v]);
        self.cursor += 1;
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.write_at(self.cursor, &v.to_le_bytes());
        self.cursor += 2;
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.write_at(self.cursor, &v.to_le_bytes());
        self.cursor += 4;
    }

    pub fn write_u16_le_at(&mut self, v: u16, offset: usize) {
        self.write_at(offset, &v.to_le_bytes());
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let needed = offset + bytes.len();
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
        self.data[offset..needed].copy_from_slice(bytes);
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.cursor)?;
        self.cursor += 1;
        Some(b)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&[u8]> {
        if self.cursor + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.cursor..self.cursor + n];
        self.cursor += n;
        Some(slice)
    }

    pub fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        if offset + 2 > self.data.len() {
            return None;
        }
        Some(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl PartialEq for SecureBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.data.ct_eq(&other.data).into()
    }
}

/// A buffer that refuses to grow past the capacity fixed at construction.
/// Used for password and rescue-code scratch space, per spec §4.1.
#[derive(Clone)]
pub struct FixedSecureBuffer {
    buf: SecureBuffer,
    capacity: usize,
}

impl FixedSecureBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: SecureBuffer::with_capacity(capacity), capacity }
    }

    /// Returns `false` (and leaves the buffer unchanged) if `bytes` would
    /// push the buffer past its fixed capacity.
    pub fn try_append(&mut self, bytes: &[u8]) -> bool {
        if self.buf.len() + bytes.len() > self.capacity {
            return false;
        }
        self.buf.append(bytes);
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        let mut buf = SecureBuffer::new();
        buf.write_u16_le(0x1234);
        buf.write_u32_le(0xdead_beef);
        buf.seek(0);
        assert_eq!(buf.read_u16_le(), Some(0x1234));
        assert_eq!(buf.read_u32_le(), Some(0xdead_beef));
    }

    #[test]
    fn truncate_zeroes_tail() {
        let mut buf = SecureBuffer::from_vec(vec![1, 2, 3, 4]);
        buf.truncate(2);
        assert_eq!(buf.as_slice(), &[1, 2]);
    }

    #[test]
    fn fixed_buffer_refuses_overflow() {
        let mut buf = FixedSecureBuffer::with_capacity(4);
        assert!(buf.try_append(&[1, 2, 3, 4]));
        assert!(!buf.try_append(&[5]));
    }
}
