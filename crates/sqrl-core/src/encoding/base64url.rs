//! SQRL's base64url variant: URL-safe alphabet, no padding (spec §4.3).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

pub fn encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode(text: &str) -> crate::error::Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text.as_bytes())
        .map_err(|e| crate::error::SqrlError::Storage(format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox";
        let enc = encode(data);
        assert!(!enc.contains('='));
        assert_eq!(decode(&enc).unwrap(), data);
    }
}
