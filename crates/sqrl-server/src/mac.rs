//! HMAC-SHA256 append/verify for nut-bearing URLs and server replies
//! (spec §4.8).

use anyhow::{bail, Result};
use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const MAC_LEN: usize = 16;

fn mac_bytes(key: &[u8], body: &str) -> [u8; MAC_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(body.as_bytes());
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&full[..MAC_LEN]);
    out
}

/// Appends `&mac=B64U(HMAC-SHA256(key, body)[:16])` to `body`.
pub fn append_mac(key: &[u8], body: &str) -> String {
    let tag = mac_bytes(key, body);
    format!("{body}&mac={}", sqrl_core::encoding::base64url_encode(&tag))
}

/// Splits at the trailing `&mac=`, recomputes the MAC over the prefix, and
/// compares in constant time. Returns the prefix (the MAC-covered body) on
/// success.
pub fn verify_mac<'a>(key: &[u8], full: &'a str) -> Result<&'a str> {
    let Some(idx) = full.rfind("&mac=") else {
        bail!("no mac field present");
    };
    let (body, rest) = full.split_at(idx);
    let tag_b64 = &rest[b"&mac=".len()..];
    let given = sqrl_core::encoding::base64url_decode(tag_b64)?;
    if given.len() != MAC_LEN {
        bail!("mac has the wrong length");
    }
    let expected = mac_bytes(key, body);
    if expected.ct_eq(&given[..]).unwrap_u8() != 1 {
        bail!("mac mismatch");
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_verify_round_trips() {
        let key = b"server secret key material";
        let body = "ver=1\r\nnut=abc\r\n";
        let with_mac = append_mac(key, body);
        assert_eq!(verify_mac(key, &with_mac).unwrap(), body);
    }

    #[test]
    fn tampered_body_fails_verification() {
        let key = b"server secret key material";
        let with_mac = append_mac(key, "ver=1\r\nnut=abc\r\n");
        let tampered = with_mac.replacen("abc", "abd", 1);
        assert!(verify_mac(key, &tampered).is_err());
    }

    #[test]
    fn missing_mac_field_is_rejected() {
        assert!(verify_mac(b"key", "ver=1\r\nnut=abc\r\n").is_err());
    }
}
