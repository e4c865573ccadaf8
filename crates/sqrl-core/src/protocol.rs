//! Per-URI client protocol session (spec §4.7): drives the
//! query→ident/enable/disable/remove sequence against one site, including
//! the previous-identity fallback and the identity-lock request for a
//! rolled-forward identity.

use tracing::{debug, warn};

use crate::crypto::{self, KEY_SIZE};
use crate::encoding;
use crate::entropy::EntropyPool;
use crate::error::{Result, SqrlError};
use crate::uri::SqrlUri;
use crate::user::User;

pub const ID_MATCH: u16 = 0x01;
pub const PREV_ID_MATCH: u16 = 0x02;
pub const IP_MATCH: u16 = 0x04;
pub const SQRL_DISABLED: u16 = 0x08;
pub const FUNCTION_NOT_SUPPORTED: u16 = 0x10;
pub const TRANSIENT_ERROR: u16 = 0x20;
pub const COMMAND_FAILURE: u16 = 0x40;
pub const CLIENT_FAILURE: u16 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Query,
    Ident,
    Enable,
    Disable,
    Remove,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Query => "query",
            Command::Ident => "ident",
            Command::Enable => "enable",
            Command::Disable => "disable",
            Command::Remove => "remove",
        }
    }
}

/// A parsed server reply body (spec §4.7's closing paragraph).
#[derive(Debug, Clone)]
pub struct ServerReply {
    pub ver: String,
    pub tif: u16,
    pub nut: String,
    pub qry: String,
    pub suk: Option<String>,
    pub ask: Option<String>,
    pub url: Option<String>,
}

impl ServerReply {
    /// Parses a base64url-encoded, CR-LF `key=value` body. A reply missing
    /// any of `ver`/`tif`/`qry`/`nut` is invalid.
    pub fn parse(body_b64u: &str) -> Result<Self> {
        let raw = encoding::base64url_decode(body_b64u)?;
        let text = String::from_utf8(raw).map_err(|_| SqrlError::Protocol("server reply is not valid utf-8".into()))?;

        let (mut ver, mut tif, mut nut, mut qry, mut suk, mut ask, mut url) = (None, None, None, None, None, None, None);
        for line in text.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "ver" => ver = Some(value.to_string()),
                "tif" => tif = u16::from_str_radix(value, 16).ok(),
                "nut" => nut = Some(value.to_string()),
                "qry" => qry = Some(value.to_string()),
                "suk" => suk = Some(value.to_string()),
                "ask" => ask = Some(value.to_string()),
                "url" => url = Some(value.to_string()),
                _ => {}
            }
        }

        match (ver, tif, nut, qry) {
            (Some(ver), Some(tif), Some(nut), Some(qry)) => Ok(Self { ver, tif, nut, qry, suk, ask, url }),
            _ => Err(SqrlError::Protocol("server reply missing a required field".into())),
        }
    }
}

/// The per-site keyslot table (spec §4.7): up to nine keys, populated
/// lazily as the session needs them.
#[derive(Default)]
struct Keyslots {
    sec: Option<[u8; KEY_SIZE]>,
    public: Option<[u8; KEY_SIZE]>,
    psec: Option<[u8; KEY_SIZE]>,
    ppublic: Option<[u8; KEY_SIZE]>,
    suk: Option<[u8; KEY_SIZE]>,
    vuk: Option<[u8; KEY_SIZE]>,
    ursk: Option<[u8; KEY_SIZE]>,
    urpk: Option<[u8; KEY_SIZE]>,
}

/// Drives one SQRL transaction against one site from first `query` through
/// completion or failure.
pub struct ClientSession {
    uri: SqrlUri,
    requested: Command,
    current: Command,
    previous_identity_index: i8,
    tif: u16,
    server_string: String,
    keys: Keyslots,
}

impl ClientSession {
    pub fn new(uri: SqrlUri, requested: Command, user: &User) -> Result<Self> {
        let (sec, public) = user.site_keys(uri.get_site_key().as_str())?;
        let server_string = encoding::base64url_encode(uri.get_challenge().as_bytes());
        Ok(Self {
            uri,
            requested,
            current: Command::Query,
            previous_identity_index: -1,
            tif: 0,
            server_string,
            keys: Keyslots { sec: Some(sec), public: Some(public), ..Keyslots::default() },
        })
    }

    pub fn tif(&self) -> u16 {
        self.tif
    }

    pub fn current_command(&self) -> Command {
        self.current
    }

    /// True once the session has reached the requested command's
    /// postcondition (SUCCESS) or the server reported `COMMAND_FAILURE`
    /// (FAIL) (spec §4.7 step 5).
    pub fn is_terminal(&self) -> bool {
        if self.tif & COMMAND_FAILURE != 0 {
            return true;
        }
        match self.requested {
            Command::Ident => self.current == Command::Ident && self.tif & ID_MATCH != 0,
            Command::Disable => self.current == Command::Disable && self.tif & SQRL_DISABLED != 0,
            Command::Enable => self.current == Command::Enable && self.tif & SQRL_DISABLED == 0,
            Command::Remove => self.current == Command::Remove && self.tif & ID_MATCH == 0 && self.tif & PREV_ID_MATCH == 0,
            Command::Query => false,
        }
    }

    fn build_client_string(&self, opt_tokens: Option<&str>) -> String {
        let mut s = String::from("ver=1\r\n");
        s.push_str(&format!("cmd={}\r\n", self.current.as_str()));
        if let Some(opt) = opt_tokens {
            s.push_str(&format!("opt={opt}\r\n"));
        }
        s.push_str(&format!("idk={}\r\n", encoding::base64url_encode(&self.keys.public.unwrap())));
        if let Some(ppub) = self.keys.ppublic {
            s.push_str(&format!("pidk={}\r\n", encoding::base64url_encode(&ppub)));
        }
        if matches!(self.current, Command::Ident) {
            if let (Some(suk), Some(vuk)) = (self.keys.suk, self.keys.vuk) {
                s.push_str(&format!("suk={}\r\n", encoding::base64url_encode(&suk)));
                s.push_str(&format!("vuk={}\r\n", encoding::base64url_encode(&vuk)));
            }
        }
        s
    }

    /// Builds the next outbound request body (spec §4.7's ASCII body
    /// grammar): `client=…&server=…&ids=…[&pids=…][&urs=…]`.
    pub fn next_request(&self, opt_tokens: Option<&str>) -> Result<Vec<u8>> {
        let sec = self.keys.sec.ok_or_else(|| SqrlError::Protocol("no site key derived yet".into()))?;
        let client_string = self.build_client_string(opt_tokens);
        let mut signed = Vec::with_capacity(client_string.len() + self.server_string.len());
        signed.extend_from_slice(client_string.as_bytes());
        signed.extend_from_slice(self.server_string.as_bytes());

        let ids = crypto::ed25519_sign(&sec, &signed);
        let mut body = format!(
            "client={}&server={}&ids={}",
            encoding::base64url_encode(client_string.as_bytes()),
            self.server_string,
            encoding::base64url_encode(&ids)
        );

        if let Some(psec) = self.keys.psec {
            let pids = crypto::ed25519_sign(&psec, &signed);
            body.push_str(&format!("&pids={}", encoding::base64url_encode(&pids)));
        }
        if let Some(ursk) = self.keys.ursk {
            let urs = crypto::ed25519_sign(&ursk, &signed);
            body.push_str(&format!("&urs={}", encoding::base64url_encode(&urs)));
        }
        Ok(body.into_bytes())
    }

    /// Consumes a server reply and advances the session per spec §4.7's
    /// numbered sequence. `entropy` seeds a fresh RLK when a `suk`/`vuk`
    /// pair must be minted for a first-time or rolled-forward registration.
    pub fn ingest_reply(&mut self, user: &User, reply_body_b64u: &str, entropy: &mut EntropyPool) -> Result<ServerReply> {
        let reply = ServerReply::parse(reply_body_b64u)?;
        self.tif = reply.tif;
        self.server_string = reply_body_b64u.to_string();
        debug!(command = ?self.current, tif = self.tif, "protocol session received reply");

        if self.tif & COMMAND_FAILURE != 0 {
            warn!(command = ?self.current, "server reported command failure");
            return Ok(reply);
        }

        if self.current == Command::Query {
            if self.tif & (ID_MATCH | PREV_ID_MATCH) != 0 {
                self.current = self.requested;
                // suk/vuk are only reissued on an ident that registers a new
                // identity or rolls forward from a matched previous one; a
                // plain already-registered ID_MATCH reauth sends neither.
                if self.requested == Command::Ident && self.tif & PREV_ID_MATCH != 0 {
                    self.prepare_ident_keys(user, &reply, entropy)?;
                }
            } else if self.previous_identity_index < 3 && user.previous_iuk((self.previous_identity_index + 1) as usize).is_some() {
                self.previous_identity_index += 1;
                let (psec, ppub) = user.previous_site_keys(self.previous_identity_index as usize, self.uri.get_site_key().as_str())?;
                self.keys.psec = Some(psec);
                self.keys.ppublic = Some(ppub);
            } else if self.requested == Command::Ident {
                self.current = Command::Ident;
                self.prepare_ident_keys(user, &reply, entropy)?;
            } else {
                return Err(SqrlError::Protocol("no matching identity and all previous identities exhausted".into()));
            }
        }

        Ok(reply)
    }

    /// Step 3: derive URSK from the previous IUK and the server's SUK, and
    /// mint a fresh SUK/VUK pair so the server can rekey its record. Also
    /// covers first-time registration, which needs the same fresh pair.
    fn prepare_ident_keys(&mut self, user: &User, reply: &ServerReply, entropy: &mut EntropyPool) -> Result<()> {
        if self.previous_identity_index >= 0 {
            let piuk = user
                .previous_iuk(self.previous_identity_index as usize)
                .ok_or_else(|| SqrlError::Protocol("previous IUK unavailable for identity rollover".into()))?;
            let server_suk_b64 = reply.suk.as_ref().ok_or_else(|| SqrlError::Protocol("server did not return suk for rollover".into()))?;
            let server_suk = encoding::base64url_decode(server_suk_b64)?;
            if server_suk.len() != KEY_SIZE {
                return Err(SqrlError::Protocol("server suk has the wrong length".into()));
            }
            let mut suk = [0u8; KEY_SIZE];
            suk.copy_from_slice(&server_suk);
            let ursk = crypto::generate_unlock_request_signing_key(&suk, piuk);
            let urpk = crypto::ed25519_public_from_seed(&ursk);
            self.keys.ursk = Some(ursk);
            self.keys.urpk = Some(urpk);
        }

        let rlk_bytes = entropy.bytes(KEY_SIZE);
        let mut rlk = [0u8; KEY_SIZE];
        rlk.copy_from_slice(&rlk_bytes);
        let rlk = crypto::x25519_clamp(rlk);
        let ilk = *user.ilk().ok_or_else(|| SqrlError::Protocol("ILK unavailable to mint a fresh suk/vuk".into()))?;
        let suk = crypto::generate_server_unlock_key(&rlk);
        let vuk = crypto::generate_verify_unlock_key(&ilk, &rlk);
        self.keys.suk = Some(suk);
        self.keys.vuk = Some(vuk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::UserOptions;

    fn reply_body(tif_hex: &str, suk: Option<&str>) -> String {
        let mut text = format!("ver=1\r\ntif={tif_hex}\r\nnut=abc\r\nqry=/sqrl\r\n");
        if let Some(suk) = suk {
            text.push_str(&format!("suk={suk}\r\n"));
        }
        encoding::base64url_encode(text.as_bytes())
    }

    fn make_user() -> User {
        let mut user = User::new(UserOptions::default());
        let mut entropy = EntropyPool::new();
        entropy.add(b"seed");
        user.rekey(&mut entropy);
        user
    }

    #[test]
    fn server_reply_parse_rejects_missing_required_field() {
        let body = encoding::base64url_encode(b"ver=1\r\ntif=0\r\n");
        assert!(ServerReply::parse(&body).is_err());
    }

    #[test]
    fn ident_match_switches_current_command() {
        let user = make_user();
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        assert_eq!(session.current_command(), Command::Query);

        let mut entropy = EntropyPool::new();
        entropy.add(b"more seed");
        let body = reply_body("1", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert_eq!(session.current_command(), Command::Ident);
        assert!(session.is_terminal());
    }

    #[test]
    fn plain_id_match_does_not_reissue_suk_or_vuk() {
        // A routine reauth (ID_MATCH only, no PREV_ID_MATCH) must not mint a
        // fresh suk/vuk pair or send one on the next request.
        let user = make_user();
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        let mut entropy = EntropyPool::new();
        entropy.add(b"more seed");
        let body = reply_body("1", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert!(session.keys.suk.is_none());
        assert!(session.keys.vuk.is_none());

        let next = session.next_request(None).unwrap();
        let next = String::from_utf8(next).unwrap();
        let client_b64 = next.split('&').next().unwrap().strip_prefix("client=").unwrap();
        let client_string = String::from_utf8(encoding::base64url_decode(client_b64).unwrap()).unwrap();
        assert!(!client_string.contains("suk="));
        assert!(!client_string.contains("vuk="));
    }

    #[test]
    fn prev_id_match_mints_suk_and_vuk() {
        let user = make_user();
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        let mut entropy = EntropyPool::new();
        entropy.add(b"more seed");
        let body = reply_body("2", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert!(session.keys.suk.is_some());
        assert!(session.keys.vuk.is_some());
    }

    #[test]
    fn command_failure_is_always_terminal() {
        let user = make_user();
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        let mut entropy = EntropyPool::new();
        let body = reply_body("40", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert!(session.is_terminal());
    }

    #[test]
    fn no_match_with_no_previous_identities_falls_through_to_new_registration() {
        let user = make_user();
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        let mut entropy = EntropyPool::new();
        entropy.add(b"more seed");
        let body = reply_body("0", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert_eq!(session.current_command(), Command::Ident);
    }

    #[test]
    fn no_match_with_untried_previous_identity_reissues_query() {
        let mut user = make_user();
        let mut entropy = EntropyPool::new();
        entropy.add(b"rekey seed");
        user.rekey(&mut entropy);
        let uri = SqrlUri::parse("sqrl://example.com/login?sfn=RXg&nut=n").unwrap();
        let mut session = ClientSession::new(uri, Command::Ident, &user).unwrap();
        let body = reply_body("0", None);
        session.ingest_reply(&user, &body, &mut entropy).unwrap();
        assert_eq!(session.current_command(), Command::Query);
    }
}
