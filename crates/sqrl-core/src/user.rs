//! The key set a user holds in memory (spec §3's "Lifecycle" and key
//! chain), lazily populated from storage and always zeroized on release.

use zeroize::Zeroize;

use crate::bigint::BigUint;
use crate::crypto::{self, KEY_SIZE};
use crate::entropy::EntropyPool;
use crate::error::{Result, SqrlError};
use crate::secure_string::FixedSecureBuffer;
use crate::settings::UserOptions;
use crate::storage::Storage;

const RESCUE_CODE_DIGITS: usize = 24;
const MAX_PASSWORD_LEN: usize = 256;

/// How the in-memory key set was last unlocked, needed so `Lock`'s
/// hint-lock autolock knows what it's re-encrypting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// No keys derived yet; storage, if any, is untouched ciphertext.
    Empty,
    /// MK/ILK are present in the clear.
    Unlocked,
    /// MK/ILK have been zeroized; only the hint-locked ciphertext remains.
    HintLocked,
}

/// A user's full key chain plus the scratch buffers actions need. Dropping
/// a `User` zeroizes every key field.
pub struct User {
    pub options: UserOptions,
    pub storage: Option<Storage>,

    iuk: Option<[u8; KEY_SIZE]>,
    previous_iuks: [Option<[u8; KEY_SIZE]>; 4],
    mk: Option<[u8; KEY_SIZE]>,
    ilk: Option<[u8; KEY_SIZE]>,
    local: Option<[u8; KEY_SIZE]>,

    pub password: FixedSecureBuffer,
    rescue_code: Option<[u8; RESCUE_CODE_DIGITS]>,

    /// Set after a successful `Lock`; `Unlock` consumes it to re-derive the
    /// hint-lock key. Per spec §9, this does not survive a reload from disk.
    hint_iterations: Option<u32>,
    hint_locked_mk_ilk: Option<Vec<u8>>,

    state: KeyState,
}

impl User {
    pub fn new(options: UserOptions) -> Self {
        Self {
            options,
            storage: None,
            iuk: None,
            previous_iuks: [None, None, None, None],
            mk: None,
            ilk: None,
            local: None,
            password: FixedSecureBuffer::with_capacity(MAX_PASSWORD_LEN),
            rescue_code: None,
            hint_iterations: None,
            hint_locked_mk_ilk: None,
            state: KeyState::Empty,
        }
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn mk(&self) -> Option<&[u8; KEY_SIZE]> {
        self.mk.as_ref()
    }

    pub fn ilk(&self) -> Option<&[u8; KEY_SIZE]> {
        self.ilk.as_ref()
    }

    pub fn iuk(&self) -> Option<&[u8; KEY_SIZE]> {
        self.iuk.as_ref()
    }

    pub fn previous_iuk(&self, index: usize) -> Option<&[u8; KEY_SIZE]> {
        self.previous_iuks.get(index).and_then(|slot| slot.as_ref())
    }

    /// The rescue code minted by the most recent `rekey()` in this process,
    /// if any (spec §9: it is never recovered from storage, only produced).
    pub fn rescue_code(&self) -> Option<&[u8; RESCUE_CODE_DIGITS]> {
        self.rescue_code.as_ref()
    }

    /// Generates a new IUK, rotates the previous-IUK ring newest→oldest,
    /// derives MK/ILK/LOCAL, and returns a fresh rescue code. The caller is
    /// responsible for displaying/storing the rescue code; `User` does not
    /// retain it past this call's return value once it is dropped by the
    /// caller.
    pub fn rekey(&mut self, entropy: &mut EntropyPool) -> [u8; RESCUE_CODE_DIGITS] {
        if let Some(old_iuk) = self.iuk.take() {
            for i in (1..4).rev() {
                self.previous_iuks[i] = self.previous_iuks[i - 1];
            }
            self.previous_iuks[0] = Some(old_iuk);
        }

        let mut new_iuk = [0u8; KEY_SIZE];
        new_iuk.copy_from_slice(&entropy.bytes(KEY_SIZE));
        self.install_iuk(new_iuk);

        let rescue_entropy = entropy.bytes(KEY_SIZE);
        let code = reduce_to_decimal_digits(&rescue_entropy);
        self.rescue_code = Some(code);
        code
    }

    fn install_iuk(&mut self, iuk: [u8; KEY_SIZE]) {
        let mk = crypto::generate_master_key(&iuk);
        let ilk = crypto::generate_identity_lock_key(&iuk);
        let local = crypto::generate_local_key(&mk);
        self.iuk = Some(iuk);
        self.mk = Some(mk);
        self.ilk = Some(ilk);
        self.local = Some(local);
        self.state = KeyState::Unlocked;
    }

    /// Installs keys recovered from a type-2 (rescue) block.
    pub fn install_from_rescue(&mut self, iuk: [u8; KEY_SIZE]) {
        self.install_iuk(iuk);
    }

    /// Installs keys recovered from a type-1 (password) block.
    pub fn install_from_password(&mut self, mk: [u8; KEY_SIZE], ilk: [u8; KEY_SIZE]) {
        let local = crypto::generate_local_key(&mk);
        self.mk = Some(mk);
        self.ilk = Some(ilk);
        self.local = Some(local);
        self.state = KeyState::Unlocked;
    }

    pub fn set_password(&mut self, password: &[u8]) -> Result<()> {
        self.password.clear();
        if !self.password.try_append(password) {
            return Err(SqrlError::State("password exceeds the maximum length".into()));
        }
        Ok(())
    }

    /// Per-site secret/public pair for the current identity (spec §3).
    pub fn site_keys(&self, host_str: &str) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
        let mk = self.mk.ok_or_else(|| SqrlError::State("MK is not available".into()))?;
        let sec = crypto::generate_site_secret(&mk, host_str);
        let pub_key = crypto::generate_site_public(&sec);
        Ok((sec, pub_key))
    }

    /// Per-site secret/public pair derived from a previous IUK (spec §3).
    pub fn previous_site_keys(&self, index: usize, host_str: &str) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
        let piuk = self
            .previous_iuk(index)
            .ok_or_else(|| SqrlError::State("no previous IUK at that index".into()))?;
        let pmk = crypto::generate_master_key(piuk);
        let psec = crypto::generate_site_secret(&pmk, host_str);
        let ppub = crypto::generate_site_public(&psec);
        Ok((psec, ppub))
    }

    /// Re-encrypts MK/ILK under a key derived from the first `hint_len`
    /// bytes of the current password, then zeroizes the in-memory
    /// plaintext (spec §4.6 Lock). Returns the iteration count the caller
    /// should persist if `Unlock` must run later in the same process.
    pub fn hint_lock(&mut self, hint_len: usize, salt: [u8; 16], n_factor: u8, iterations: u32) -> Result<u32> {
        let (mk, ilk) = match (self.mk, self.ilk) {
            (Some(mk), Some(ilk)) => (mk, ilk),
            _ => return Err(SqrlError::State("no unlocked keys to lock".into())),
        };
        let hint = &self.password.as_slice()[..hint_len.min(self.password.len())];
        let (mut key, iterations) = crypto::EnScrypt::new(hint, &salt, n_factor, crypto::EnScryptMode::Iterations(iterations)).run_to_completion()?;

        let mut plaintext = Vec::with_capacity(64);
        plaintext.extend_from_slice(&mk);
        plaintext.extend_from_slice(&ilk);
        let iv = [0u8; 12];
        let ciphertext = crypto::aes_gcm_encrypt(&key, &iv, &salt, &plaintext)?;
        plaintext.zeroize();
        key.zeroize();

        self.mk = None;
        self.ilk = None;
        self.hint_locked_mk_ilk = Some(ciphertext);
        self.hint_iterations = Some(iterations);
        self.state = KeyState::HintLocked;
        Ok(iterations)
    }

    /// Reverses `hint_lock`. Fails per spec §9 if the process never ran
    /// `hint_lock` itself (a freshly reloaded user has no iteration count).
    pub fn hint_unlock(&mut self, hint_len: usize, salt: [u8; 16], n_factor: u8) -> Result<()> {
        let iterations = self
            .hint_iterations
            .ok_or_else(|| SqrlError::State("hint-lock iteration count unavailable; unlock the full identity instead".into()))?;
        let ciphertext = self
            .hint_locked_mk_ilk
            .take()
            .ok_or_else(|| SqrlError::State("no hint-locked key material present".into()))?;
        let hint = &self.password.as_slice()[..hint_len.min(self.password.len())];
        let (mut key, _) = crypto::EnScrypt::new(hint, &salt, n_factor, crypto::EnScryptMode::Iterations(iterations)).run_to_completion()?;
        let iv = [0u8; 12];
        let plaintext = crypto::aes_gcm_decrypt(&key, &iv, &salt, &ciphertext);
        key.zeroize();
        let plaintext = plaintext?;
        if plaintext.len() != 64 {
            return Err(SqrlError::Crypto("hint-unlock plaintext has the wrong length".into()));
        }
        let mut mk = [0u8; KEY_SIZE];
        let mut ilk = [0u8; KEY_SIZE];
        mk.copy_from_slice(&plaintext[..32]);
        ilk.copy_from_slice(&plaintext[32..]);
        self.mk = Some(mk);
        self.ilk = Some(ilk);
        self.state = KeyState::Unlocked;
        Ok(())
    }
}

impl Drop for User {
    fn drop(&mut self) {
        if let Some(iuk) = self.iuk.as_mut() {
            iuk.zeroize();
        }
        for piuk in self.previous_iuks.iter_mut().flatten() {
            piuk.zeroize();
        }
        if let Some(mk) = self.mk.as_mut() {
            mk.zeroize();
        }
        if let Some(ilk) = self.ilk.as_mut() {
            ilk.zeroize();
        }
        if let Some(local) = self.local.as_mut() {
            local.zeroize();
        }
        if let Some(code) = self.rescue_code.as_mut() {
            code.zeroize();
        }
        if let Some(ct) = self.hint_locked_mk_ilk.as_mut() {
            ct.zeroize();
        }
    }
}

/// Reduces 32 bytes of entropy to `RESCUE_CODE_DIGITS` decimal digits by
/// repeated division, keeping the low-order digits (equivalent to the
/// value mod 10^24).
fn reduce_to_decimal_digits(entropy: &[u8]) -> [u8; RESCUE_CODE_DIGITS] {
    let mut value = BigUint::from_be_bytes(entropy);
    let mut digits = [0u8; RESCUE_CODE_DIGITS];
    for slot in digits.iter_mut() {
        *slot = value.divide_by(10) + b'0';
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::EntropyPool;

    #[test]
    fn rekey_rotates_previous_iuks() {
        let mut pool = EntropyPool::new();
        pool.add(b"seed");
        let mut user = User::new(UserOptions::default());
        user.rekey(&mut pool);
        let first_iuk = *user.iuk().unwrap();
        user.rekey(&mut pool);
        assert_eq!(user.previous_iuk(0).copied(), Some(first_iuk));
        assert_ne!(user.iuk().copied(), Some(first_iuk));
    }

    #[test]
    fn rescue_code_is_24_ascii_digits() {
        let mut pool = EntropyPool::new();
        pool.add(b"seed");
        let mut user = User::new(UserOptions::default());
        let code = user.rekey(&mut pool);
        assert_eq!(code.len(), 24);
        assert!(code.iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn hint_lock_then_unlock_recovers_mk_ilk() {
        let mut pool = EntropyPool::new();
        pool.add(b"seed");
        let mut user = User::new(UserOptions::default());
        user.rekey(&mut pool);
        user.set_password(b"the password").unwrap();
        let mk_before = *user.mk().unwrap();
        let ilk_before = *user.ilk().unwrap();

        let salt = [3u8; 16];
        user.hint_lock(4, salt, 4, 2).unwrap();
        assert_eq!(user.state(), KeyState::HintLocked);
        assert!(user.mk().is_none());

        user.hint_unlock(4, salt, 4).unwrap();
        assert_eq!(user.state(), KeyState::Unlocked);
        assert_eq!(user.mk().copied(), Some(mk_before));
        assert_eq!(user.ilk().copied(), Some(ilk_before));
    }
}
