//! Base-N encoders built from an alphabet string (spec §4.3).

pub mod base56;
pub mod base64url;
pub mod urlencode;

pub use base56::{decode_check as base56_check_decode, encode_check as base56_check_encode};
pub use base64url::{decode as base64url_decode, encode as base64url_encode};
