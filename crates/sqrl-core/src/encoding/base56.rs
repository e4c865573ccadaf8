//! base56 and base56-check encoders (spec §4.3). Plain base56 is kept as a
//! building block for base56-check but is not exposed for identity export —
//! base56-check is the canonical offline text form (spec §9, Open Questions).

use crate::bigint::BigUint;
use sha2::{Digest, Sha256};

pub const ALPHABET: &[u8; 56] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz";

/// Characters needed to represent one arbitrary byte, `ceil(8 / log2(56))`,
/// computed once as an integer so `encode`/`decode` agree on an exact pad
/// target — no float division to invert.
fn chars_per_byte() -> usize {
    (8.0 / (ALPHABET.len() as f64).log2()).ceil() as usize
}

fn index_of(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

pub(crate) fn encode(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let cpb = chars_per_byte();
    let base = ALPHABET.len() as u8;
    let mut n = BigUint::from_be_bytes(data);
    let mut digits = Vec::new();
    loop {
        let rem = n.divide_by(base);
        digits.push(ALPHABET[rem as usize]);
        if n.is_zero() {
            break;
        }
    }
    digits.reverse();

    // Fixed-width target: `data.len() * cpb` chars total, independent of
    // `n`'s value, so the original byte count is always recoverable exactly
    // from the encoded length alone (see `decode`).
    let target_len = data.len() * cpb;
    let pad = target_len.saturating_sub(digits.len());
    let mut out = vec![ALPHABET[0]; pad];
    out.extend(digits);
    String::from_utf8(out).expect("alphabet is ASCII")
}

pub(crate) fn decode(text: &str) -> Option<Vec<u8>> {
    let cpb = chars_per_byte();
    let filtered: Vec<u8> = text.bytes().filter(|b| index_of(*b).is_some()).collect();
    if filtered.is_empty() {
        return Some(Vec::new());
    }
    if filtered.len() % cpb != 0 {
        return None;
    }
    let original_len = filtered.len() / cpb;

    let mut n = BigUint::zero();
    for &b in &filtered {
        let digit = index_of(b)?;
        n.mul_add(ALPHABET.len() as u8, digit);
    }
    let mut value_bytes = n.to_be_bytes();
    if value_bytes.len() > original_len {
        return None;
    }
    let mut out = vec![0u8; original_len - value_bytes.len()];
    out.append(&mut value_bytes);
    Some(out)
}

/// Splits `data` into 19-char base56 lines, appends a SHA-256-derived check
/// digit to each (per spec §4.3), and joins them with no separator. Callers
/// that want the printable, whitespace-grouped form should insert their own
/// line breaks every 20 characters.
pub fn encode_check(data: &[u8]) -> String {
    let encoded = encode(data);
    let mut out = String::new();
    for (line_count, chunk) in encoded.as_bytes().chunks(19).enumerate() {
        let line_count = line_count as u8;
        let mut hashed_input = chunk.to_vec();
        hashed_input.push(line_count);
        let digest = Sha256::digest(&hashed_input);
        let mut big = BigUint::from_be_bytes(&digest);
        let remainder = big.divide_by(ALPHABET.len() as u8);
        out.push_str(std::str::from_utf8(chunk).expect("alphabet is ASCII"));
        out.push(ALPHABET[remainder as usize] as char);
    }
    out
}

/// Inverse of [`encode_check`]. Mirrors its chunking exactly: 19 body chars
/// plus 1 check char per line, except the final line, which may carry fewer
/// body chars (whatever `encode_check`'s last `chunks(19)` group held).
/// Returns `None` on any check-digit mismatch (data corruption), never
/// releasing partially-decoded bytes.
pub fn decode_check(text: &str) -> Option<Vec<u8>> {
    let filtered: Vec<u8> = text.bytes().filter(|b| index_of(*b).is_some()).collect();
    let mut plain = String::new();
    let mut rest = &filtered[..];
    let mut line_count: u8 = 0;
    while !rest.is_empty() {
        let take = rest.len().min(20);
        if take < 2 {
            return None;
        }
        let (chunk, remainder) = rest.split_at(take);
        rest = remainder;
        let (body, check) = chunk.split_at(chunk.len() - 1);
        let mut hashed_input = body.to_vec();
        hashed_input.push(line_count);
        let digest = Sha256::digest(&hashed_input);
        let mut big = BigUint::from_be_bytes(&digest);
        let remainder_digit = big.divide_by(ALPHABET.len() as u8);
        if ALPHABET[remainder_digit as usize] != check[0] {
            return None;
        }
        plain.push_str(std::str::from_utf8(body).expect("alphabet is ASCII"));
        line_count += 1;
    }
    decode(&plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_roundtrip() {
        let data = b"sqrl identity bytes, arbitrary length payload!!";
        let encoded = encode(data);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn plain_roundtrip_preserves_leading_zero_bytes() {
        let data = [0x00, 0x00, 0x00, 0xc4, 0xc5, 0x01, 0xb3];
        let encoded = encode(&data);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn check_roundtrip() {
        let data = (0u8..50).collect::<Vec<u8>>();
        let encoded = encode_check(&data);
        assert_eq!(decode_check(&encoded).unwrap(), data);
    }

    #[test]
    fn check_roundtrip_on_a_full_identity_sized_payload() {
        // 346 bytes: type1 (125) + type2 (73) + type3 (148), matching a
        // real S4 container's total size.
        let data: Vec<u8> = (0..346u32).map(|i| (i % 251) as u8).collect();
        let encoded = encode_check(&data);
        assert_eq!(decode_check(&encoded).unwrap(), data);
    }

    #[test]
    fn check_detects_corruption() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut encoded = encode_check(data).into_bytes();
        let mid = encoded.len() / 2;
        encoded[mid] = if encoded[mid] == ALPHABET[0] as u8 { ALPHABET[1] } else { ALPHABET[0] };
        assert!(decode_check(std::str::from_utf8(&encoded).unwrap()).is_none());
    }
}
