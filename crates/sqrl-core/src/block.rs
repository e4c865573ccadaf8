//! S4 block container: a length-type-prefixed record (spec §3), with
//! cursor-based little-endian I/O grounded on the source library's
//! `SqrlBlock` semantics, rebuilt atop [`SecureBuffer`].

use crate::secure_string::SecureBuffer;

pub const TYPE_PASSWORD: u16 = 1;
pub const TYPE_RESCUE: u16 = 2;
pub const TYPE_PREVIOUS: u16 = 3;

/// A single S4 block: `block_length:u16 | block_type:u16 | payload`, all
/// little-endian.
pub struct Block {
    buf: SecureBuffer,
}

impl Block {
    /// Builds a block from a block type and an already-serialized payload;
    /// `block_length` is derived as `payload.len() + 4`.
    pub fn from_header_and_payload(block_type: u16, payload: &[u8]) -> Self {
        let block_length = (payload.len() + 4) as u16;
        let mut buf = SecureBuffer::with_capacity(payload.len() + 4);
        buf.append(&block_length.to_le_bytes());
        buf.append(&block_type.to_le_bytes());
        buf.append(payload);
        Self { buf }
    }

    /// Parses a block from the front of `data`, which may contain
    /// additional trailing blocks. Returns the block and the number of
    /// bytes consumed.
    pub fn parse(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 4 {
            return None;
        }
        let length = u16::from_le_bytes([data[0], data[1]]) as usize;
        if length < 4 || length > data.len() {
            return None;
        }
        let buf = SecureBuffer::from_vec(data[..length].to_vec());
        Some((Self { buf }, length))
    }

    pub fn block_length(&self) -> u16 {
        self.buf.read_u16_le_at(0).unwrap_or(0)
    }

    pub fn block_type(&self) -> u16 {
        self.buf.read_u16_le_at(2).unwrap_or(0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf.as_slice()[4..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let block = Block::from_header_and_payload(TYPE_RESCUE, &[0u8; 69]);
        assert_eq!(block.block_type(), TYPE_RESCUE);
        assert_eq!(block.block_length(), 73);
        assert_eq!(block.as_bytes().len(), 73);
    }

    #[test]
    fn parse_reads_header_and_payload() {
        let original = Block::from_header_and_payload(TYPE_PASSWORD, &[7u8; 121]);
        let (parsed, consumed) = Block::parse(original.as_bytes()).unwrap();
        assert_eq!(consumed, 125);
        assert_eq!(parsed.block_type(), TYPE_PASSWORD);
        assert_eq!(parsed.payload(), &[7u8; 121][..]);
    }

    #[test]
    fn parse_stops_at_declared_length_leaving_trailing_blocks() {
        let first = Block::from_header_and_payload(TYPE_RESCUE, &[1u8; 69]);
        let second = Block::from_header_and_payload(TYPE_PREVIOUS, &[2u8; 144]);
        let mut combined = first.as_bytes().to_vec();
        combined.extend_from_slice(second.as_bytes());
        let (parsed_first, consumed) = Block::parse(&combined).unwrap();
        assert_eq!(parsed_first.block_type(), TYPE_RESCUE);
        let (parsed_second, _) = Block::parse(&combined[consumed..]).unwrap();
        assert_eq!(parsed_second.block_type(), TYPE_PREVIOUS);
    }
}
