//! The server's nut: an opaque, single-AES-block-encrypted nonce embedded
//! in every challenge URL and round-tripped by the client (spec §4.8).

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use anyhow::{bail, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

const NUT_LEN: usize = 16;

/// The 16-byte cleartext carried inside a nut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nut {
    pub ip: u32,
    pub random: u32,
    pub timestamp_micros: u64,
}

impl Nut {
    fn to_bytes(self) -> [u8; NUT_LEN] {
        let mut out = [0u8; NUT_LEN];
        out[0..4].copy_from_slice(&self.ip.to_le_bytes());
        out[4..8].copy_from_slice(&self.random.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp_micros.to_le_bytes());
        out
    }

    fn from_bytes(bytes: [u8; NUT_LEN]) -> Self {
        Self {
            ip: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            random: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            timestamp_micros: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        }
    }
}

/// Encrypts/decrypts nuts under a single 128-bit key, one AES block at a
/// time (spec §4.8: "Encrypted with a single AES block").
pub struct NutCipher {
    key: [u8; 16],
}

impl NutCipher {
    /// Deterministic key derived from an operator passcode: the first 16
    /// bytes of `SHA-256(passcode)`.
    pub fn from_passcode(passcode: &[u8]) -> Self {
        let digest = Sha256::digest(passcode);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        Self { key }
    }

    /// A fresh random key, for deployments with no fixed passcode.
    pub fn random() -> Self {
        let mut key = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Mints a fresh nut for `client_ip` at `timestamp_micros`, returning
    /// its ciphertext bytes.
    pub fn mint(&self, client_ip: u32, timestamp_micros: u64) -> [u8; NUT_LEN] {
        let mut random = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut random);
        let nut = Nut { ip: client_ip, random: u32::from_le_bytes(random), timestamp_micros };
        let cipher = Aes128::new(GenericArray::from_slice(&self.key));
        let mut block = GenericArray::clone_from_slice(&nut.to_bytes());
        cipher.encrypt_block(&mut block);
        block.into()
    }

    /// Decrypts a nut and checks it against `max_age_micros`, given the
    /// current time.
    pub fn decrypt_and_check(&self, ciphertext: &[u8], now_micros: u64, max_age_micros: u64) -> Result<Nut> {
        if ciphertext.len() != NUT_LEN {
            bail!("nut has the wrong length");
        }
        let cipher = Aes128::new(GenericArray::from_slice(&self.key));
        let mut block = GenericArray::clone_from_slice(ciphertext);
        cipher.decrypt_block(&mut block);
        let nut = Nut::from_bytes(block.into());
        if now_micros.saturating_sub(nut.timestamp_micros) > max_age_micros {
            bail!("nut has expired");
        }
        Ok(nut)
    }
}

impl Drop for NutCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_decrypt_round_trips() {
        let cipher = NutCipher::from_passcode(b"operator passcode");
        let nut_bytes = cipher.mint(0x0a000001, 1_000_000);
        let nut = cipher.decrypt_and_check(&nut_bytes, 1_000_100, 10_000).unwrap();
        assert_eq!(nut.ip, 0x0a000001);
        assert_eq!(nut.timestamp_micros, 1_000_000);
    }

    #[test]
    fn expired_nut_is_rejected() {
        let cipher = NutCipher::from_passcode(b"operator passcode");
        let nut_bytes = cipher.mint(0, 1_000_000);
        assert!(cipher.decrypt_and_check(&nut_bytes, 2_000_000, 10_000).is_err());
    }

    #[test]
    fn wrong_key_does_not_recover_the_original_nut() {
        let minted = NutCipher::from_passcode(b"one passcode");
        let other = NutCipher::from_passcode(b"a different passcode");
        let nut_bytes = minted.mint(7, 1_000_000);
        match other.decrypt_and_check(&nut_bytes, 1_000_100, u64::MAX) {
            Ok(decrypted) => assert_ne!((decrypted.ip, decrypted.timestamp_micros), (7, 1_000_000)),
            Err(_) => {}
        }
    }
}
