//! Cryptographic primitives and composite key derivations (spec §4.4).
//!
//! Grounded on the teacher's `crypto.rs` module shape (constants up top,
//! small free functions wrapping a single crate call each) but the
//! primitives themselves are SQRL's: EnHash, EnScrypt, Ed25519, X25519 and
//! AES-256-GCM, not Argon2/XChaCha20-Poly1305.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Instant;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};
use zeroize::Zeroize;

use crate::error::{Result, SqrlError};

pub const KEY_SIZE: usize = 32;
const ENSCRYPT_R: u32 = 256;
const ENSCRYPT_P: u32 = 1;

/// 16 rounds of `t <- SHA-256(t)`, XOR-accumulating every round (spec §4.4).
/// The result is the accumulated XOR, not the final round's hash.
pub fn en_hash(input: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    let mut t = *input;
    for _ in 0..16 {
        let digest = Sha256::digest(t);
        for i in 0..KEY_SIZE {
            out[i] ^= digest[i];
        }
        t.copy_from_slice(&digest);
    }
    t.zeroize();
    out
}

/// When an EnScrypt run should stop.
#[derive(Clone, Copy, Debug)]
pub enum EnScryptMode {
    Iterations(u32),
    Millis(u32),
}

/// Iterated, XOR-accumulated scrypt (spec §4.4). Exposes a single-iteration
/// `update()` step so the scheduler can interleave it with other work
/// instead of blocking for the whole stretch.
pub struct EnScrypt {
    password: Vec<u8>,
    n_factor: u8,
    mode: EnScryptMode,
    iterations: u32,
    chain_input: [u8; KEY_SIZE],
    result: [u8; KEY_SIZE],
    started: Instant,
}

impl EnScrypt {
    pub fn new(password: &[u8], salt: &[u8], n_factor: u8, mode: EnScryptMode) -> Self {
        let mut salt_block = [0u8; KEY_SIZE];
        let n = salt.len().min(KEY_SIZE);
        salt_block[..n].copy_from_slice(&salt[..n]);
        Self {
            password: password.to_vec(),
            n_factor,
            mode,
            iterations: 0,
            chain_input: salt_block,
            result: [0u8; KEY_SIZE],
            started: Instant::now(),
        }
    }

    fn scrypt_once(&self, input: &[u8; KEY_SIZE]) -> Result<[u8; KEY_SIZE]> {
        let params = scrypt::Params::new(self.n_factor, ENSCRYPT_R, ENSCRYPT_P, KEY_SIZE)
            .map_err(|e| SqrlError::Crypto(format!("invalid enscrypt params: {e}")))?;
        let mut out = [0u8; KEY_SIZE];
        scrypt::scrypt(&self.password, input, &params, &mut out)
            .map_err(|e| SqrlError::Crypto(format!("enscrypt failed: {e}")))?;
        Ok(out)
    }

    /// Runs exactly one scrypt iteration, XOR-accumulating into the result.
    pub fn update(&mut self) -> Result<()> {
        let t = self.scrypt_once(&self.chain_input)?;
        if self.iterations == 0 {
            self.result = t;
        } else {
            for i in 0..KEY_SIZE {
                self.result[i] ^= t[i];
            }
        }
        self.chain_input = t;
        self.iterations += 1;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        match self.mode {
            EnScryptMode::Iterations(target) => self.iterations >= target,
            EnScryptMode::Millis(target_ms) => {
                self.iterations > 0 && self.started.elapsed().as_millis() as u32 >= target_ms
            }
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn result(&self) -> &[u8; KEY_SIZE] {
        &self.result
    }

    /// Drives the stretch to completion without scheduler interleaving.
    /// Convenient for the CLI and for tests; real actions drive `update()`
    /// one step per scheduler tick instead.
    pub fn run_to_completion(mut self) -> Result<([u8; KEY_SIZE], u32)> {
        while !self.is_finished() {
            self.update()?;
        }
        Ok((self.result, self.iterations))
    }
}

impl Drop for EnScrypt {
    fn drop(&mut self) {
        self.password.zeroize();
        self.chain_input.zeroize();
    }
}

/// AES-256-GCM encrypt. `iv` must be 12 bytes. `aad` is authenticated but
/// not encrypted. Returns ciphertext with the 16-byte tag appended.
pub fn aes_gcm_encrypt(key: &[u8; KEY_SIZE], iv: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| SqrlError::Crypto(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|e| SqrlError::Crypto(format!("gcm encrypt failed: {e}")))
}

/// AES-256-GCM decrypt. Refuses to return plaintext on tag mismatch.
pub fn aes_gcm_decrypt(key: &[u8; KEY_SIZE], iv: &[u8; 12], aad: &[u8], ciphertext_and_tag: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| SqrlError::Crypto(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext_and_tag, aad })
        .map_err(|_| SqrlError::Crypto("gcm tag verification failed".into()))
}

/// Ed25519 public key generated from a 32-byte seed.
pub fn ed25519_public_from_seed(seed: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let signing_key = SigningKey::from_bytes(seed);
    signing_key.verifying_key().to_bytes()
}

/// Detached Ed25519 signature over `msg`, keyed by a 32-byte seed.
pub fn ed25519_sign(seed: &[u8; KEY_SIZE], msg: &[u8]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(seed);
    signing_key.sign(msg).to_bytes()
}

pub fn ed25519_verify(public_key: &[u8; KEY_SIZE], msg: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(msg, &signature).is_ok()
}

/// X25519 scalar clamp: `k[0] &= 248; k[31] &= 127; k[31] |= 64`.
pub fn x25519_clamp(mut key: [u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
    key
}

pub fn x25519_base(clamped_scalar: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let secret = XStaticSecret::from(*clamped_scalar);
    XPublicKey::from(&secret).to_bytes()
}

pub fn x25519_shared(clamped_scalar: &[u8; KEY_SIZE], other_public: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let secret = XStaticSecret::from(*clamped_scalar);
    let public = XPublicKey::from(*other_public);
    secret.diffie_hellman(&public).to_bytes()
}

/// HMAC-SHA256 over `msg`, keyed by `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

// --- Composite key derivations (spec §3, §4.4) ---

pub fn generate_master_key(iuk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    en_hash(iuk)
}

pub fn generate_local_key(mk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    en_hash(mk)
}

pub fn generate_identity_lock_key(iuk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    x25519_base(&x25519_clamp(*iuk))
}

pub fn generate_server_unlock_key(rlk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    x25519_base(rlk)
}

pub fn generate_verify_unlock_key(ilk: &[u8; KEY_SIZE], rlk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let shared = x25519_shared(rlk, ilk);
    ed25519_public_from_seed(&shared)
}

pub fn generate_unlock_request_signing_key(suk: &[u8; KEY_SIZE], iuk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    x25519_shared(&x25519_clamp(*iuk), suk)
}

/// Per-site secret: `HMAC-SHA256(key=MK, msg=host_str)` (spec §3).
pub fn generate_site_secret(mk: &[u8; KEY_SIZE], host_str: &str) -> [u8; KEY_SIZE] {
    hmac_sha256(mk, host_str.as_bytes())
}

pub fn generate_site_public(site_secret: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    ed25519_public_from_seed(site_secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn en_hash_is_deterministic_and_not_identity() {
        let input = [0u8; 32];
        let output = en_hash(&input);
        assert_ne!(output, [0u8; 32]);
        assert_eq!(en_hash(&input), output);
    }

    #[test]
    fn gcm_round_trip_and_tamper_detection() {
        let key = [7u8; 32];
        let iv = [1u8; 12];
        let aad = b"header";
        let pt = b"master key and identity lock key payload bytes!";
        let ct = aes_gcm_encrypt(&key, &iv, aad, pt).unwrap();
        let decrypted = aes_gcm_decrypt(&key, &iv, aad, &ct).unwrap();
        assert_eq!(decrypted, pt);

        let mut tampered = ct.clone();
        tampered[0] ^= 1;
        assert!(aes_gcm_decrypt(&key, &iv, aad, &tampered).is_err());
    }

    #[test]
    fn identity_lock_law() {
        let iuk = [9u8; 32];
        let rlk = x25519_clamp([3u8; 32]);
        let ilk = generate_identity_lock_key(&iuk);
        let suk = generate_server_unlock_key(&rlk);
        let vuk = generate_verify_unlock_key(&ilk, &rlk);
        let ursk = generate_unlock_request_signing_key(&suk, &iuk);
        let urpk = ed25519_public_from_seed(&ursk);
        assert_eq!(urpk, vuk);

        let msg = b"unlock request";
        let sig = ed25519_sign(&ursk, msg);
        assert!(ed25519_verify(&vuk, msg, &sig));
    }

    #[test]
    fn enscrypt_iteration_law() {
        let password = b"password";
        let salt = [5u8; 16];
        let (ms_result, n) = EnScrypt::new(password, &salt, 8, EnScryptMode::Millis(20))
            .run_to_completion()
            .unwrap();
        let (iter_result, _) = EnScrypt::new(password, &salt, 8, EnScryptMode::Iterations(n))
            .run_to_completion()
            .unwrap();
        assert_eq!(ms_result, iter_result);
    }
}
