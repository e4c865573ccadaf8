//! SQRL URI parsing (spec §4.9): `sqrl://host[:port]/path[?query]` and
//! `file://path`. No general-purpose URI crate is pulled in — the grammar
//! accepted here is narrow enough that a resolver would add more surface
//! than it saves.

use crate::encoding;
use crate::error::{Result, SqrlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Sqrl,
    File,
}

#[derive(Debug, Clone)]
pub struct SqrlUri {
    scheme: Scheme,
    original: String,
    authority: String,
    path: String,
    query: String,
}

impl SqrlUri {
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.to_ascii_lowercase();
        let (scheme, rest) = if let Some(rest) = lower.strip_prefix("sqrl://") {
            (Scheme::Sqrl, &input[input.len() - rest.len()..])
        } else if let Some(rest) = lower.strip_prefix("file://") {
            (Scheme::File, &input[input.len() - rest.len()..])
        } else {
            return Err(SqrlError::Uri("unsupported or missing scheme".into()));
        };

        let (authority_and_path, query) = match rest.split_once('?') {
            Some((a, q)) => (a, q.to_string()),
            None => (rest, String::new()),
        };
        let (authority, path) = match authority_and_path.split_once('/') {
            Some((a, p)) => (a.to_string(), format!("/{p}")),
            None => (authority_and_path.to_string(), String::new()),
        };

        let uri = Self { scheme, original: input.to_string(), authority, path, query };

        if uri.scheme == Scheme::Sqrl && uri.query_param("sfn").is_none() {
            return Err(SqrlError::Uri("sqrl:// URI is missing sfn=".into()));
        }
        Ok(uri)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn query_param(&self, key: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    }

    /// Host, stripped of any `:port` suffix.
    pub fn host(&self) -> &str {
        self.authority.split(':').next().unwrap_or(&self.authority)
    }

    /// `https://host[:port]`.
    pub fn get_prefix(&self) -> String {
        format!("https://{}", self.authority)
    }

    /// Scheme substituted for `https://`, otherwise byte-identical.
    pub fn get_url(&self) -> String {
        format!("https://{}{}{}", self.authority, self.path, if self.query.is_empty() { String::new() } else { format!("?{}", self.query) })
    }

    /// `host`, or `host/<first n chars of path>` when `x=<n>` is present.
    pub fn get_site_key(&self) -> String {
        match self.query_param("x").and_then(|n| n.parse::<usize>().ok()) {
            Some(n) => {
                let prefix: String = self.path.chars().skip(1).take(n).collect();
                format!("{}/{}", self.host(), prefix)
            }
            None => self.host().to_string(),
        }
    }

    /// Base64url-decoded `sfn=` value, as a UTF-8 friendly-name string.
    pub fn get_sfn(&self) -> Result<String> {
        let raw = self.query_param("sfn").ok_or_else(|| SqrlError::Uri("missing sfn=".into()))?;
        let bytes = encoding::base64url_decode(&raw)?;
        String::from_utf8(bytes).map_err(|_| SqrlError::Uri("sfn is not valid utf-8".into()))
    }

    /// The original input, scheme preserved verbatim.
    pub fn get_challenge(&self) -> &str {
        &self.original
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqrl_uri_with_port_and_sfn() {
        let uri = SqrlUri::parse("sqrl://sqrlid.com:8080/login?sfn=U1FSTGlk&nut=blah").unwrap();
        assert_eq!(uri.host(), "sqrlid.com");
        assert_eq!(uri.get_site_key(), "sqrlid.com");
        assert_eq!(uri.get_prefix(), "https://sqrlid.com:8080");
        assert_eq!(uri.get_url(), "https://sqrlid.com:8080/login?sfn=U1FSTGlk&nut=blah");
        assert_eq!(uri.get_sfn().unwrap(), "SQRLid");
    }

    #[test]
    fn missing_sfn_is_invalid() {
        assert!(SqrlUri::parse("sqrl://sqrlid.com:8080/login?nut=blah").is_err());
    }

    #[test]
    fn site_key_uses_x_param_path_prefix() {
        let uri = SqrlUri::parse("sqrl://example.com/abcdef?sfn=QQ&x=3").unwrap();
        assert_eq!(uri.get_site_key(), "example.com/abc");
    }

    #[test]
    fn challenge_preserves_original_scheme_and_case() {
        let raw = "sqrl://Example.com/path?sfn=QQ";
        let uri = SqrlUri::parse(raw).unwrap();
        assert_eq!(uri.get_challenge(), raw);
    }

    #[test]
    fn file_scheme_has_no_sfn_requirement() {
        let uri = SqrlUri::parse("file:///home/user/identity.sqrl").unwrap();
        assert_eq!(uri.scheme(), Scheme::File);
    }
}
