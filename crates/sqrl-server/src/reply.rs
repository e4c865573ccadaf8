//! Challenge-URL templating and reply-body construction (spec §4.8).

use sqrl_core::encoding;

use crate::mac;

/// Substitutes `_LIBSQRL_SFN_` and `_LIBSQRL_NUT_` markers in a challenge
/// URL template with base64url of the friendly name and a fresh nut.
pub fn substitute_template(template: &str, sfn: &str, nut: &[u8]) -> String {
    template
        .replace("_LIBSQRL_SFN_", &encoding::base64url_encode(sfn.as_bytes()))
        .replace("_LIBSQRL_NUT_", &encoding::base64url_encode(nut))
}

/// Builds the `ver=…\r\nnut=…\r\ntif=…\r\nqry=…\r\n[suk=…]\r\n[ask=…]\r\n[url=…]\r\n`
/// body, appends its MAC, then base64url-encodes the whole thing for return
/// to the client.
pub struct ReplyBuilder {
    pub nut: Vec<u8>,
    pub tif: u16,
    pub qry: String,
    pub suk: Option<String>,
    pub ask: Option<String>,
    pub url: Option<String>,
}

impl ReplyBuilder {
    pub fn build(&self, mac_key: &[u8]) -> String {
        let mut body = String::from("ver=1\r\n");
        body.push_str(&format!("nut={}\r\n", encoding::base64url_encode(&self.nut)));
        body.push_str(&format!("tif={:X}\r\n", self.tif));
        body.push_str(&format!("qry={}\r\n", self.qry));
        if let Some(suk) = &self.suk {
            body.push_str(&format!("suk={suk}\r\n"));
        }
        if let Some(ask) = &self.ask {
            body.push_str(&format!("ask={ask}\r\n"));
        }
        if let Some(url) = &self.url {
            body.push_str(&format!("url={url}\r\n"));
        }
        let with_mac = mac::append_mac(mac_key, &body);
        encoding::base64url_encode(with_mac.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitution_replaces_both_markers() {
        let template = "https://example.com/sqrl?nut=_LIBSQRL_NUT_&sfn=_LIBSQRL_SFN_";
        let out = substitute_template(template, "Example", b"\x01\x02\x03\x04");
        assert!(!out.contains("_LIBSQRL_"));
        assert!(out.contains(&encoding::base64url_encode(b"Example")));
    }

    #[test]
    fn server_mac_scenario_verifies_and_rejects_truncation() {
        use crate::nut::NutCipher;
        use sha2::{Digest, Sha256};

        let cipher = NutCipher::from_passcode(b"test");
        let nut_bytes = cipher.mint(0, 1_000_000);
        let url = substitute_template(
            "sqrl://test.sqrlid.com/sqrl?nut=_LIBSQRL_NUT_&sfn=_LIBSQRL_SFN_",
            "SQRLid",
            &nut_bytes,
        );
        assert!(url.contains(&encoding::base64url_encode(b"SQRLid")));

        let key: [u8; 32] = Sha256::digest(b"test").into();
        let builder = ReplyBuilder { nut: nut_bytes.to_vec(), tif: 0, qry: "/sqrl".to_string(), suk: None, ask: None, url: None };
        let link = builder.build(&key);
        let body = encoding::base64url_decode(&link).unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(mac::verify_mac(&key, &body).is_ok());

        let mut truncated = body.clone();
        truncated.truncate(truncated.len().saturating_sub(4));
        assert!(mac::verify_mac(&key, &truncated).is_err());
    }

    #[test]
    fn built_reply_decodes_back_to_expected_fields() {
        let builder = ReplyBuilder {
            nut: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
            tif: 0x05,
            qry: "/sqrl?nut=abc".to_string(),
            suk: None,
            ask: None,
            url: None,
        };
        let key = b"server secret";
        let encoded = builder.build(key);
        let decoded = encoding::base64url_decode(&encoded).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        let body = mac::verify_mac(key, &text).unwrap();
        assert!(body.contains("tif=5\r\n"));
        assert!(body.contains("qry=/sqrl?nut=abc\r\n"));
    }
}
