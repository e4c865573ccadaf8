//! Continuously-hashed entropy pool (spec §4.5).
//!
//! The pool keeps a running SHA-512 state fed by "fast-flux" samples (the
//! host's `fill_random` capability, consumed through the [`RandomSource`]
//! trait so platform-specific shims stay out of this crate per spec §1) and
//! an estimated-entropy counter. `get()` finalizes, copies out, and
//! re-seeds from its own output so state never repeats.

use sha2::{Digest, Sha512};

/// The capability the embedder supplies: fill a buffer with as much
/// randomness as the host can produce. Platform-specific shims (RDRAND,
/// `/dev/urandom`, a hardware TRNG) live outside this crate.
pub trait RandomSource {
    fn fill_random(&mut self, buf: &mut [u8]);
}

/// `rand`'s OS RNG, the default source for hosts that have one.
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_random(&mut self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

/// Continuously-hashed entropy pool with an estimated-entropy counter.
pub struct EntropyPool {
    state: Sha512,
    estimated_bits: u64,
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyPool {
    pub fn new() -> Self {
        Self { state: Sha512::new(), estimated_bits: 0 }
    }

    /// Stirs an explicit sample into the pool (a fast-flux record, or any
    /// other caller-supplied entropy). Increments the estimate by
    /// `1 + len/64` bits as in the source design.
    pub fn add(&mut self, sample: &[u8]) {
        self.state.update(sample);
        self.estimated_bits += 1 + (sample.len() as u64) / 64;
    }

    /// One fast-flux tick: stirs in a fresh sample from `source` and bumps
    /// the estimate by one, regardless of sample size.
    pub fn stir(&mut self, source: &mut impl RandomSource) {
        let mut sample = [0u8; 32];
        source.fill_random(&mut sample);
        self.state.update(sample);
        self.estimated_bits += 1;
    }

    pub fn estimated_bits(&self) -> u64 {
        self.estimated_bits
    }

    /// Finalizes the hash, copies up to 64 bytes into `buf`, then
    /// re-initializes the pool stirring in its own output as a fresh
    /// bracket. Returns `false` without touching `buf` if `blocking` is
    /// false and the estimate hasn't reached `desired_bits`.
    pub fn get(&mut self, buf: &mut [u8], desired_bits: u64, blocking: bool) -> bool {
        if !blocking && self.estimated_bits < desired_bits {
            return false;
        }
        let digest = self.state.clone().finalize();
        let n = buf.len().min(digest.len());
        buf[..n].copy_from_slice(&digest[..n]);
        self.state = Sha512::new();
        self.state.update(digest);
        self.estimated_bits = 0;
        true
    }

    /// Draws `n` bytes. Requests up to 512 bits directly from `get`;
    /// beyond that, expands via repeated SHA-512 keyed on the pool's first
    /// 32 output bytes (a counter-mode expansion in place of a full stream
    /// cipher, since the exact expansion construction is not
    /// security-critical per spec §4.5).
    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut seed = [0u8; 64];
        self.get(&mut seed, 512, true);
        if n <= 32 {
            return seed[..n].to_vec();
        }
        let mut out = Vec::with_capacity(n);
        let mut counter: u32 = 0;
        while out.len() < n {
            let mut hasher = Sha512::new();
            hasher.update(&seed[..32]);
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();
            let take = (n - out.len()).min(block.len());
            out.extend_from_slice(&block[..take]);
            counter += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blocking_get_respects_threshold() {
        let mut pool = EntropyPool::new();
        let mut buf = [0u8; 16];
        assert!(!pool.get(&mut buf, 100, false));
        pool.add(&[0u8; 256]);
        assert!(pool.get(&mut buf, 1, false));
    }

    #[test]
    fn bytes_expands_past_one_block() {
        let mut pool = EntropyPool::new();
        pool.add(b"seed material");
        let out = pool.bytes(100);
        assert_eq!(out.len(), 100);
    }
}
