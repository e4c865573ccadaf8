//! S4 identity storage container (spec §3): three concrete block types and
//! the binary/base64url/base56-check text encodings that carry them.
//!
//! Byte layouts are pinned to the exact totals spec §3 states (125 / 73 /
//! 148 bytes); where the prose's field list and its stated AAD length
//! didn't square for block types 2 and 3, the layout below picks the
//! reading that reconstructs the stated total exactly (see DESIGN.md).

use tracing::{debug, warn};

use crate::block::{Block, TYPE_PASSWORD, TYPE_PREVIOUS, TYPE_RESCUE};
use crate::crypto::{self, KEY_SIZE};
use crate::encoding;
use crate::error::{Result, SqrlError};

const BINARY_TAG: &[u8] = b"sqrldata";
const TEXT_TAG: &str = "SQRLDATA";

/// Type 1: password/user block, 125 bytes total. Plaintext is `MK ‖ ILK`.
pub struct Type1Block {
    pub iv: [u8; 12],
    pub salt: [u8; 16],
    pub n_factor: u8,
    pub iter_count: u32,
    pub flags: u16,
    pub hint_len: u8,
    pub enscrypt_seconds: u8,
    pub timeout_minutes: u16,
    ciphertext_and_tag: Vec<u8>,
}

const TYPE1_PT_LEN: u16 = 45;

impl Type1Block {
    fn aad(&self, outer_header: &[u8; 4]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(45);
        aad.extend_from_slice(outer_header);
        aad.extend_from_slice(&TYPE1_PT_LEN.to_le_bytes());
        aad.extend_from_slice(&self.iv);
        aad.extend_from_slice(&self.salt);
        aad.push(self.n_factor);
        aad.extend_from_slice(&self.iter_count.to_le_bytes());
        aad.extend_from_slice(&self.flags.to_le_bytes());
        aad.push(self.hint_len);
        aad.push(self.enscrypt_seconds);
        aad.extend_from_slice(&self.timeout_minutes.to_le_bytes());
        aad
    }

    pub fn seal(
        key: &[u8; KEY_SIZE],
        iv: [u8; 12],
        salt: [u8; 16],
        n_factor: u8,
        iter_count: u32,
        flags: u16,
        hint_len: u8,
        enscrypt_seconds: u8,
        timeout_minutes: u16,
        mk: &[u8; KEY_SIZE],
        ilk: &[u8; KEY_SIZE],
    ) -> Result<Self> {
        let mut plaintext = Vec::with_capacity(64);
        plaintext.extend_from_slice(mk);
        plaintext.extend_from_slice(ilk);
        let mut block = Self {
            iv,
            salt,
            n_factor,
            iter_count,
            flags,
            hint_len,
            enscrypt_seconds,
            timeout_minutes,
            ciphertext_and_tag: Vec::new(),
        };
        let outer = [125u16.to_le_bytes(), TYPE_PASSWORD.to_le_bytes()].concat();
        let outer: [u8; 4] = outer.try_into().unwrap();
        let aad = block.aad(&outer);
        block.ciphertext_and_tag = crypto::aes_gcm_encrypt(key, &block.iv, &aad, &plaintext)?;
        Ok(block)
    }

    /// Decrypts, returning `(MK, ILK)`.
    pub fn open(&self, key: &[u8; KEY_SIZE]) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
        let outer = [125u16.to_le_bytes(), TYPE_PASSWORD.to_le_bytes()].concat();
        let outer: [u8; 4] = outer.try_into().unwrap();
        let aad = self.aad(&outer);
        let plaintext = crypto::aes_gcm_decrypt(key, &self.iv, &aad, &self.ciphertext_and_tag)?;
        if plaintext.len() != 64 {
            return Err(SqrlError::Storage("type-1 plaintext has the wrong length".into()));
        }
        let mut mk = [0u8; KEY_SIZE];
        let mut ilk = [0u8; KEY_SIZE];
        mk.copy_from_slice(&plaintext[..32]);
        ilk.copy_from_slice(&plaintext[32..]);
        Ok((mk, ilk))
    }

    pub fn to_block(&self) -> Block {
        let mut payload = Vec::with_capacity(121);
        payload.extend_from_slice(&TYPE1_PT_LEN.to_le_bytes());
        payload.extend_from_slice(&self.iv);
        payload.extend_from_slice(&self.salt);
        payload.push(self.n_factor);
        payload.extend_from_slice(&self.iter_count.to_le_bytes());
        payload.extend_from_slice(&self.flags.to_le_bytes());
        payload.push(self.hint_len);
        payload.push(self.enscrypt_seconds);
        payload.extend_from_slice(&self.timeout_minutes.to_le_bytes());
        payload.extend_from_slice(&self.ciphertext_and_tag);
        Block::from_header_and_payload(TYPE_PASSWORD, &payload)
    }

    pub fn from_block(block: &Block) -> Result<Self> {
        let p = block.payload();
        if p.len() != 121 {
            return Err(SqrlError::Storage("type-1 block has the wrong length".into()));
        }
        let pt_len = u16::from_le_bytes([p[0], p[1]]);
        if pt_len != TYPE1_PT_LEN {
            return Err(SqrlError::Storage("type-1 pt_len mismatch".into()));
        }
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&p[2..14]);
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&p[14..30]);
        let n_factor = p[30];
        let iter_count = u32::from_le_bytes([p[31], p[32], p[33], p[34]]);
        let flags = u16::from_le_bytes([p[35], p[36]]);
        let hint_len = p[37];
        let enscrypt_seconds = p[38];
        let timeout_minutes = u16::from_le_bytes([p[39], p[40]]);
        Ok(Self {
            iv,
            salt,
            n_factor,
            iter_count,
            flags,
            hint_len,
            enscrypt_seconds,
            timeout_minutes,
            ciphertext_and_tag: p[41..].to_vec(),
        })
    }
}

/// Type 2: rescue block, 73 bytes total. Plaintext is the IUK; `salt` is
/// also the identity's public unique-identifier prefix.
pub struct Type2Block {
    pub salt: [u8; 16],
    pub n_factor: u8,
    pub iter_count: u32,
    ciphertext_and_tag: Vec<u8>,
}

impl Type2Block {
    fn aad(outer_header: &[u8; 4], salt: &[u8; 16], n_factor: u8, iter_count: u32) -> Vec<u8> {
        let mut aad = Vec::with_capacity(25);
        aad.extend_from_slice(outer_header);
        aad.extend_from_slice(salt);
        aad.push(n_factor);
        aad.extend_from_slice(&iter_count.to_le_bytes());
        aad
    }

    pub fn seal(key: &[u8; KEY_SIZE], salt: [u8; 16], n_factor: u8, iter_count: u32, iuk: &[u8; KEY_SIZE]) -> Result<Self> {
        let outer = [73u16.to_le_bytes(), TYPE_RESCUE.to_le_bytes()].concat();
        let outer: [u8; 4] = outer.try_into().unwrap();
        let aad = Self::aad(&outer, &salt, n_factor, iter_count);
        let zero_iv = [0u8; 12];
        let ciphertext_and_tag = crypto::aes_gcm_encrypt(key, &zero_iv, &aad, iuk)?;
        Ok(Self { salt, n_factor, iter_count, ciphertext_and_tag })
    }

    pub fn open(&self, key: &[u8; KEY_SIZE]) -> Result<[u8; KEY_SIZE]> {
        let outer = [73u16.to_le_bytes(), TYPE_RESCUE.to_le_bytes()].concat();
        let outer: [u8; 4] = outer.try_into().unwrap();
        let aad = Self::aad(&outer, &self.salt, self.n_factor, self.iter_count);
        let zero_iv = [0u8; 12];
        let plaintext = crypto::aes_gcm_decrypt(key, &zero_iv, &aad, &self.ciphertext_and_tag)?;
        if plaintext.len() != KEY_SIZE {
            return Err(SqrlError::Storage("type-2 plaintext has the wrong length".into()));
        }
        let mut iuk = [0u8; KEY_SIZE];
        iuk.copy_from_slice(&plaintext);
        Ok(iuk)
    }

    pub fn to_block(&self) -> Block {
        let mut payload = Vec::with_capacity(69);
        payload.extend_from_slice(&self.salt);
        payload.push(self.n_factor);
        payload.extend_from_slice(&self.iter_count.to_le_bytes());
        payload.extend_from_slice(&self.ciphertext_and_tag);
        Block::from_header_and_payload(TYPE_RESCUE, &payload)
    }

    pub fn from_block(block: &Block) -> Result<Self> {
        let p = block.payload();
        if p.len() != 69 {
            return Err(SqrlError::Storage("type-2 block has the wrong length".into()));
        }
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&p[..16]);
        let n_factor = p[16];
        let iter_count = u32::from_le_bytes([p[17], p[18], p[19], p[20]]);
        Ok(Self { salt, n_factor, iter_count, ciphertext_and_tag: p[21..].to_vec() })
    }
}

/// Type 3: previous-identity block, 148 bytes total. Plaintext is four
/// concatenated previous IUKs, zero IV, keyed by MK, AAD is just the
/// outer length/type header.
pub struct Type3Block {
    ciphertext_and_tag: Vec<u8>,
}

impl Type3Block {
    pub fn seal(mk: &[u8; KEY_SIZE], previous_iuks: &[[u8; KEY_SIZE]; 4]) -> Result<Self> {
        let mut plaintext = Vec::with_capacity(128);
        for iuk in previous_iuks {
            plaintext.extend_from_slice(iuk);
        }
        let outer = [148u16.to_le_bytes(), TYPE_PREVIOUS.to_le_bytes()].concat();
        let zero_iv = [0u8; 12];
        let ciphertext_and_tag = crypto::aes_gcm_encrypt(mk, &zero_iv, &outer, &plaintext)?;
        Ok(Self { ciphertext_and_tag })
    }

    pub fn open(&self, mk: &[u8; KEY_SIZE]) -> Result<[[u8; KEY_SIZE]; 4]> {
        let outer = [148u16.to_le_bytes(), TYPE_PREVIOUS.to_le_bytes()].concat();
        let zero_iv = [0u8; 12];
        let plaintext = crypto::aes_gcm_decrypt(mk, &zero_iv, &outer, &self.ciphertext_and_tag)?;
        if plaintext.len() != 128 {
            return Err(SqrlError::Storage("type-3 plaintext has the wrong length".into()));
        }
        let mut out = [[0u8; KEY_SIZE]; 4];
        for (i, chunk) in plaintext.chunks_exact(32).enumerate() {
            out[i].copy_from_slice(chunk);
        }
        Ok(out)
    }

    pub fn to_block(&self) -> Block {
        Block::from_header_and_payload(TYPE_PREVIOUS, &self.ciphertext_and_tag)
    }

    pub fn from_block(block: &Block) -> Result<Self> {
        let p = block.payload();
        if p.len() != 144 {
            return Err(SqrlError::Storage("type-3 block has the wrong length".into()));
        }
        Ok(Self { ciphertext_and_tag: p.to_vec() })
    }
}

/// The S4 container: up to one block of each type. The invariant that
/// exactly one of each exists after a successful save is enforced by the
/// actions that build a `Storage`, not by this type itself — a
/// freshly-loaded or partially-built container may be missing blocks.
#[derive(Default)]
pub struct Storage {
    pub type1: Option<Type1Block>,
    pub type2: Option<Type2Block>,
    pub type3: Option<Type3Block>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_block(&self, block_type: u16) -> bool {
        match block_type {
            TYPE_PASSWORD => self.type1.is_some(),
            TYPE_RESCUE => self.type2.is_some(),
            TYPE_PREVIOUS => self.type3.is_some(),
            _ => false,
        }
    }

    fn concatenated_blocks(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(b) = &self.type1 {
            out.extend_from_slice(b.to_block().as_bytes());
        }
        if let Some(b) = &self.type2 {
            out.extend_from_slice(b.to_block().as_bytes());
        }
        if let Some(b) = &self.type3 {
            out.extend_from_slice(b.to_block().as_bytes());
        }
        out
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = BINARY_TAG.to_vec();
        out.extend_from_slice(&self.concatenated_blocks());
        out
    }

    pub fn to_base64url_text(&self) -> String {
        format!("{TEXT_TAG}{}", encoding::base64url_encode(&self.concatenated_blocks()))
    }

    pub fn to_base56check_text(&self) -> String {
        format!("{TEXT_TAG}{}", encoding::base56_check_encode(&self.concatenated_blocks()))
    }

    fn from_concatenated_blocks(mut data: &[u8]) -> Result<Self> {
        let mut storage = Self::new();
        while !data.is_empty() {
            let (block, consumed) = Block::parse(data)
                .ok_or_else(|| SqrlError::Storage("truncated or corrupt block".into()))?;
            match block.block_type() {
                TYPE_PASSWORD => storage.type1 = Some(Type1Block::from_block(&block)?),
                TYPE_RESCUE => storage.type2 = Some(Type2Block::from_block(&block)?),
                TYPE_PREVIOUS => storage.type3 = Some(Type3Block::from_block(&block)?),
                other => return Err(SqrlError::Storage(format!("unknown block type {other}"))),
            }
            data = &data[consumed..];
        }
        Ok(storage)
    }

    /// Loads from the binary `sqrldata` form.
    pub fn load_binary(data: &[u8]) -> Result<Self> {
        let tag = data
            .get(..BINARY_TAG.len())
            .ok_or_else(|| SqrlError::Storage("too short for a storage tag".into()))?;
        if tag != BINARY_TAG {
            return Err(SqrlError::Storage("missing sqrldata tag".into()));
        }
        Self::from_concatenated_blocks(&data[BINARY_TAG.len()..])
    }

    /// Loads from either text-transport form, auto-detected by prefix.
    /// After the `SQRLDATA` tag, base56-check text uses only its own
    /// 56-character alphabet (plus whitespace between groups); base64url
    /// text routinely includes `-`/`_`, which base56 never emits, so that
    /// is the signal used to pick a decoder.
    pub fn load_text(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix(TEXT_TAG)
            .ok_or_else(|| SqrlError::Storage("missing SQRLDATA tag".into()))?;
        let looks_base64url = rest.contains('-') || rest.contains('_');
        let raw = if looks_base64url {
            encoding::base64url_decode(rest.trim())?
        } else {
            encoding::base56_check_decode(rest).ok_or_else(|| SqrlError::Storage("base56 check digit failed".into()))?
        };
        Self::from_concatenated_blocks(&raw)
    }

    /// Loads from any of the three forms, detected by the leading tag.
    pub fn load(data: &[u8]) -> Result<Self> {
        let result = if data.starts_with(BINARY_TAG) {
            Self::load_binary(data)
        } else if data.starts_with(TEXT_TAG.as_bytes()) {
            let text = std::str::from_utf8(data).map_err(|_| SqrlError::Storage("text form is not valid utf-8".into()))?;
            Self::load_text(text)
        } else {
            Err(SqrlError::Storage("unrecognized storage tag".into()))
        };
        match &result {
            Ok(s) => debug!(block1 = s.has_block(TYPE_PASSWORD), block2 = s.has_block(TYPE_RESCUE), block3 = s.has_block(TYPE_PREVIOUS), "loaded storage"),
            Err(e) => warn!(error = %e, "failed to load storage"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_storage() -> Storage {
        let mk = [1u8; KEY_SIZE];
        let ilk = [2u8; KEY_SIZE];
        let iuk = [3u8; KEY_SIZE];
        let previous = [[4u8; KEY_SIZE], [5u8; KEY_SIZE], [6u8; KEY_SIZE], [7u8; KEY_SIZE]];
        let type1 = Type1Block::seal(
            &[9u8; KEY_SIZE],
            [1u8; 12],
            [8u8; 16],
            9,
            1,
            0,
            0,
            5,
            15,
            &mk,
            &ilk,
        )
        .unwrap();
        let type2 = Type2Block::seal(&[10u8; KEY_SIZE], [11u8; 16], 9, 1, &iuk).unwrap();
        let type3 = Type3Block::seal(&mk, &previous).unwrap();
        Storage { type1: Some(type1), type2: Some(type2), type3: Some(type3) }
    }

    #[test]
    fn binary_roundtrip_preserves_all_three_blocks() {
        let storage = sample_storage();
        let bytes = storage.to_binary();
        let loaded = Storage::load(&bytes).unwrap();
        assert!(loaded.has_block(TYPE_PASSWORD));
        assert!(loaded.has_block(TYPE_RESCUE));
        assert!(loaded.has_block(TYPE_PREVIOUS));

        let (mk, ilk) = loaded.type1.unwrap().open(&[9u8; KEY_SIZE]).unwrap();
        assert_eq!(mk, [1u8; KEY_SIZE]);
        assert_eq!(ilk, [2u8; KEY_SIZE]);
    }

    #[test]
    fn base64url_text_roundtrip() {
        let storage = sample_storage();
        let text = storage.to_base64url_text();
        assert!(text.starts_with("SQRLDATA"));
        let loaded = Storage::load_text(&text).unwrap();
        let iuk = loaded.type2.unwrap().open(&[10u8; KEY_SIZE]).unwrap();
        assert_eq!(iuk, [3u8; KEY_SIZE]);
    }

    #[test]
    fn base56check_text_roundtrip() {
        let storage = sample_storage();
        let text = storage.to_base56check_text();
        assert!(text.starts_with("SQRLDATA"));
        let loaded = Storage::load_text(&text).unwrap();
        let previous = loaded.type3.unwrap().open(&[1u8; KEY_SIZE]).unwrap();
        assert_eq!(previous[0], [4u8; KEY_SIZE]);
        assert_eq!(previous[3], [7u8; KEY_SIZE]);
    }

    #[test]
    fn tampered_binary_fails_tag_verification() {
        let storage = sample_storage();
        let mut bytes = storage.to_binary();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let loaded = Storage::load(&bytes).unwrap();
        assert!(loaded.type3.unwrap().open(&[1u8; KEY_SIZE]).is_err());
    }

    #[test]
    fn block_length_total_matches_spec() {
        let storage = sample_storage();
        assert_eq!(storage.type1.as_ref().unwrap().to_block().as_bytes().len(), 125);
        assert_eq!(storage.type2.as_ref().unwrap().to_block().as_bytes().len(), 73);
        assert_eq!(storage.type3.as_ref().unwrap().to_block().as_bytes().len(), 148);
    }
}
