//! Per-user configuration (spec §4.6, §5, §9): the knobs actions and the
//! hint-lock autolock timer read, distinct from the key material itself.

use serde::{Deserialize, Serialize};

pub const RESCUE_ENSCRYPT_SECONDS: u8 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtocolOptions {
    pub sqrl_only: bool,
    pub hardlock: bool,
    pub cps: bool,
    pub suk: bool,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self { sqrl_only: false, hardlock: false, cps: false, suk: true }
    }
}

impl ProtocolOptions {
    /// Renders the `opt=<token[~token]*>` value (spec §4.7).
    pub fn to_opt_value(self) -> Option<String> {
        let mut tokens = Vec::new();
        if self.sqrl_only {
            tokens.push("sqrlonly");
        }
        if self.hardlock {
            tokens.push("hardlock");
        }
        if self.cps {
            tokens.push("cps");
        }
        if self.suk {
            tokens.push("suk");
        }
        if tokens.is_empty() {
            None
        } else {
            Some(tokens.join("~"))
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserOptions {
    /// How long a type-1 EnScrypt pass runs, in seconds.
    pub enscrypt_seconds: u8,
    /// `n_factor` (scrypt's `N = 2^n_factor`) for the type-1 block.
    pub n_factor: u8,
    /// Minutes of idle time before hint-lock autolock fires. Zero disables it.
    pub timeout_minutes: u16,
    /// How many leading password bytes `Lock` re-derives its key from.
    pub hint_length: u8,
    pub protocol: ProtocolOptions,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self { enscrypt_seconds: 5, n_factor: 9, timeout_minutes: 15, hint_length: 4, protocol: ProtocolOptions::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_value_joins_enabled_tokens_in_field_order() {
        let opts = ProtocolOptions { sqrl_only: true, hardlock: false, cps: true, suk: false };
        assert_eq!(opts.to_opt_value().unwrap(), "sqrlonly~cps");
    }

    #[test]
    fn opt_value_is_none_when_nothing_enabled() {
        let opts = ProtocolOptions { sqrl_only: false, hardlock: false, cps: false, suk: false };
        assert!(opts.to_opt_value().is_none());
    }
}
