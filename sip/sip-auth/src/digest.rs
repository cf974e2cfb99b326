use crate::{ClientAuthenticator, RequestParts, ResponseParts};
use bytesstr::BytesStr;
use sha2::Digest;
use sip_types::header::HeaderError;
use sip_types::header::typed::{
    Algorithm, AuthChallenge, DigestChallenge, DigestResponse, QopOption, QopResponse,
};
use sip_types::msg::RequestLine;
use sip_types::{Headers, Name};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("failed to authenticate realms: {0:?}")]
    FailedToAuthenticate(Vec<BytesStr>),
    #[error("encountered unsupported algorithm {0}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("missing credentials for realm {0}")]
    MissingCredentials(BytesStr),
    #[error("unsupported qop")]
    UnsupportedQop,
    #[error("response contains no digest challenge")]
    NoChallenge,
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// Supplies credentials for a realm when a challenge is received
pub trait CredentialResolver {
    fn resolve(&mut self, realm: &str) -> Option<DigestUser>;
}

impl<F> CredentialResolver for F
where
    F: FnMut(&str) -> Option<DigestUser>,
{
    fn resolve(&mut self, realm: &str) -> Option<DigestUser> {
        self(realm)
    }
}

/// Credentials mapped to their realm, with optional defaults for unknown realms
#[derive(Default, Clone)]
pub struct DigestCredentials {
    default: Option<DigestUser>,
    map: HashMap<String, DigestUser>,
}

impl DigestCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `credentials` used for realms without explicit credentials
    pub fn set_default(&mut self, credentials: DigestUser) {
        self.default = Some(credentials)
    }

    pub fn add_for_realm<R: Into<String>>(&mut self, realm: R, credentials: DigestUser) {
        self.map.insert(realm.into(), credentials);
    }

    pub fn get_for_realm(&self, realm: &str) -> Option<&DigestUser> {
        self.map.get(realm).or(self.default.as_ref())
    }
}

impl CredentialResolver for DigestCredentials {
    fn resolve(&mut self, realm: &str) -> Option<DigestUser> {
        self.get_for_realm(realm).cloned()
    }
}

#[derive(Clone)]
pub struct DigestUser {
    user: String,
    password: Vec<u8>,
}

impl DigestUser {
    pub fn new<U, P>(user: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<Vec<u8>>,
    {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Debug for DigestUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestUser")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

type HashFn = fn(&[u8]) -> String;

/// State kept for every realm that challenged a request.
///
/// Subsequent requests reuse it to authorize preemptively with an increasing nonce-count.
struct RealmAuth {
    realm: BytesStr,
    is_proxy: bool,
    username: BytesStr,
    nonce: BytesStr,
    opaque: Option<BytesStr>,
    algorithm: Algorithm,
    hash: HashFn,
    ha1: String,
    qop: Option<(BytesStr, u32)>,
}

impl RealmAuth {
    fn respond(&mut self, line: &RequestLine) -> DigestResponse {
        let uri = line.uri.to_string();
        let ha2 = (self.hash)(format!("{}:{}", line.method, uri).as_bytes());

        let (response, qop_response) = match &mut self.qop {
            Some((cnonce, nc)) => {
                *nc += 1;

                let response = (self.hash)(
                    format!("{}:{}:{:08x}:{}:auth:{}", self.ha1, self.nonce, nc, cnonce, ha2)
                        .as_bytes(),
                );

                let qop_response = QopResponse {
                    qop: QopOption::Auth,
                    cnonce: cnonce.clone(),
                    nc: *nc,
                };

                (response, Some(qop_response))
            }
            None => {
                let response =
                    (self.hash)(format!("{}:{}:{}", self.ha1, self.nonce, ha2).as_bytes());

                (response, None)
            }
        };

        DigestResponse {
            username: self.username.clone(),
            realm: self.realm.clone(),
            nonce: self.nonce.clone(),
            uri: uri.into(),
            response: response.into(),
            algorithm: self.algorithm.clone(),
            opaque: self.opaque.clone(),
            qop_response,
        }
    }
}

/// Solves Digest challenges of 401 / 407 responses using `qop=auth` where offered
pub struct DigestAuthenticator<R> {
    resolver: R,
    realms: Vec<RealmAuth>,
}

impl<R: CredentialResolver> DigestAuthenticator<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            realms: vec![],
        }
    }

    fn challenges(headers: &Headers) -> Result<Vec<(bool, DigestChallenge)>, DigestError> {
        let www = headers
            .get_all_type::<AuthChallenge>(&Name::WWW_AUTHENTICATE)?
            .into_iter()
            .map(|c| (false, c));

        let proxy = headers
            .get_all_type::<AuthChallenge>(&Name::PROXY_AUTHENTICATE)?
            .into_iter()
            .map(|c| (true, c));

        Ok(www
            .chain(proxy)
            .filter_map(|(is_proxy, challenge)| match challenge {
                AuthChallenge::Digest(digest) => Some((is_proxy, digest)),
                AuthChallenge::Other { scheme, .. } => {
                    log::debug!("ignoring unsupported auth scheme {scheme}");
                    None
                }
            })
            .collect())
    }

    fn solve(&mut self, is_proxy: bool, challenge: DigestChallenge) -> Result<(), DigestError> {
        // Answering the same nonce twice will not succeed, unless it is marked as stale
        if let Some(previous) = self.realms.iter().find(|r| r.realm == challenge.realm) {
            if previous.nonce == challenge.nonce && !challenge.stale {
                return Err(DigestError::FailedToAuthenticate(vec![challenge.realm]));
            }
        }

        let (hash, is_session): (HashFn, bool) = match &challenge.algorithm {
            Algorithm::Md5 => (hash_md5, false),
            Algorithm::Md5Sess => (hash_md5, true),
            Algorithm::Sha256 => (hash_sha256, false),
            Algorithm::Sha256Sess => (hash_sha256, true),
            Algorithm::Other(_) => {
                return Err(DigestError::UnsupportedAlgorithm(challenge.algorithm.clone()));
            }
        };

        let user = self
            .resolver
            .resolve(&challenge.realm)
            .ok_or_else(|| DigestError::MissingCredentials(challenge.realm.clone()))?;

        let qop = if challenge.qop.is_empty() {
            None
        } else if challenge.qop.contains(&QopOption::Auth) {
            Some((BytesStr::from(uuid::Uuid::new_v4().simple().to_string()), 0))
        } else {
            return Err(DigestError::UnsupportedQop);
        };

        let mut ha1 = hash(
            [
                format!("{}:{}:", user.user, challenge.realm).as_bytes(),
                &user.password,
            ]
            .concat()
            .as_slice(),
        );

        if is_session {
            let cnonce = qop.as_ref().map(|(cnonce, _)| &**cnonce).unwrap_or("");
            ha1 = hash(format!("{}:{}:{}", ha1, challenge.nonce, cnonce).as_bytes());
        }

        let entry = RealmAuth {
            realm: challenge.realm,
            is_proxy,
            username: user.user.as_str().into(),
            nonce: challenge.nonce,
            opaque: challenge.opaque,
            algorithm: challenge.algorithm,
            hash,
            ha1,
            qop,
        };

        self.realms.retain(|r| r.realm != entry.realm);
        self.realms.push(entry);

        Ok(())
    }
}

impl<R: CredentialResolver> ClientAuthenticator for DigestAuthenticator<R> {
    type Error = DigestError;

    fn authorize_request(&mut self, line: &RequestLine, headers: &mut Headers) {
        headers.remove(&Name::AUTHORIZATION);
        headers.remove(&Name::PROXY_AUTHORIZATION);

        for realm in &mut self.realms {
            let name = if realm.is_proxy {
                Name::PROXY_AUTHORIZATION
            } else {
                Name::AUTHORIZATION
            };

            headers.insert_type(name, &realm.respond(line));
        }
    }

    fn handle_rejection(
        &mut self,
        _rejected_request: RequestParts<'_>,
        reject_response: ResponseParts<'_>,
    ) -> Result<(), DigestError> {
        let challenges = Self::challenges(reject_response.headers)?;

        if challenges.is_empty() {
            return Err(DigestError::NoChallenge);
        }

        let mut failed_realms = vec![];

        for (is_proxy, challenge) in challenges {
            let realm = challenge.realm.clone();

            if let Err(e) = self.solve(is_proxy, challenge) {
                log::warn!("failed to handle challenge for realm {realm}, {e}");
                failed_realms.push(realm);
            }
        }

        if failed_realms.is_empty() {
            Ok(())
        } else {
            Err(DigestError::FailedToAuthenticate(failed_realms))
        }
    }
}

fn hash_md5(i: &[u8]) -> String {
    format!("{:x}", md5::compute(i))
}

fn hash_sha256(i: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(i);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use sip_types::header::typed::{AuthResponse, Authorization};
    use sip_types::msg::StatusLine;
    use sip_types::uri::SipUri;
    use sip_types::{Method, StatusCode};

    fn register_line() -> RequestLine {
        let uri: SipUri = "sip:example.com".parse().unwrap();

        RequestLine {
            method: Method::REGISTER,
            uri,
        }
    }

    fn reject(
        authenticator: &mut DigestAuthenticator<impl CredentialResolver>,
        challenge: &str,
    ) -> Result<(), DigestError> {
        let mut headers = Headers::new();
        headers.insert(Name::WWW_AUTHENTICATE, challenge.to_string());

        authenticator.handle_rejection(
            RequestParts {
                line: &register_line(),
                headers: &Headers::new(),
                body: &[],
            },
            ResponseParts {
                line: &StatusLine {
                    code: StatusCode::UNAUTHORIZED,
                    reason: None,
                },
                headers: &headers,
                body: &[],
            },
        )
    }

    fn authorization(authenticator: &mut DigestAuthenticator<impl CredentialResolver>) -> DigestResponse {
        let mut headers = Headers::new();
        authenticator.authorize_request(&register_line(), &mut headers);

        match headers.get_named::<Authorization>().unwrap().0 {
            AuthResponse::Digest(digest) => digest,
            AuthResponse::Other { .. } => panic!("expected digest"),
        }
    }

    #[test]
    fn rfc2617_example() {
        let mut realm = RealmAuth {
            realm: "testrealm@host.com".into(),
            is_proxy: false,
            username: "Mufasa".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            opaque: None,
            algorithm: Algorithm::Md5,
            hash: hash_md5,
            ha1: hash_md5(b"Mufasa:testrealm@host.com:Circle Of Life"),
            qop: Some(("0a4f113b".into(), 0)),
        };

        // the reference uses an http request, feed method and uri through the same formula
        let ha2 = hash_md5(b"GET:/dir/index.html");
        let (cnonce, _) = realm.qop.clone().unwrap();
        let response = hash_md5(
            format!("{}:{}:{:08x}:{}:auth:{}", realm.ha1, realm.nonce, 1, cnonce, ha2).as_bytes(),
        );

        assert_eq!(response, "6629fae49393a05397450978507c4ef1");

        // respond() increments the nonce count before every use
        let first = realm.respond(&register_line());
        assert_eq!(first.qop_response.unwrap().nc, 1);
    }

    #[test]
    fn challenge_with_qop() {
        let mut authenticator = DigestAuthenticator::new(|realm: &str| {
            assert_eq!(realm, "example.com");
            Some(DigestUser::new("demo", "secret"))
        });

        reject(
            &mut authenticator,
            r#"Digest realm="example.com", nonce="n0nce", qop="auth", opaque="op""#,
        )
        .unwrap();

        let first = authorization(&mut authenticator);
        assert_eq!(first.username, "demo");
        assert_eq!(first.realm, "example.com");
        assert_eq!(first.uri, "sip:example.com");
        assert_eq!(first.opaque.as_deref(), Some("op"));
        assert_eq!(first.qop_response.as_ref().unwrap().nc, 1);

        let second = authorization(&mut authenticator);
        assert_eq!(second.qop_response.as_ref().unwrap().nc, 2);
        assert_ne!(first.response, second.response);
    }

    #[test]
    fn challenge_without_qop() {
        let mut credentials = DigestCredentials::new();
        credentials.add_for_realm("example.com", DigestUser::new("demo", "secret"));

        let mut authenticator = DigestAuthenticator::new(credentials);

        reject(&mut authenticator, r#"Digest realm="example.com", nonce="abc""#).unwrap();

        let response = authorization(&mut authenticator);

        let ha1 = hash_md5(b"demo:example.com:secret");
        let ha2 = hash_md5(b"REGISTER:sip:example.com");
        assert_eq!(
            &*response.response,
            hash_md5(format!("{ha1}:abc:{ha2}").as_bytes())
        );
        assert!(response.qop_response.is_none());
    }

    #[test]
    fn same_nonce_twice_fails() {
        let mut authenticator =
            DigestAuthenticator::new(|_: &str| Some(DigestUser::new("demo", "secret")));

        let challenge = r#"Digest realm="example.com", nonce="abc", qop="auth""#;

        reject(&mut authenticator, challenge).unwrap();

        assert!(matches!(
            reject(&mut authenticator, challenge),
            Err(DigestError::FailedToAuthenticate(realms)) if realms == ["example.com"]
        ));
    }

    #[test]
    fn missing_credentials() {
        let mut authenticator = DigestAuthenticator::new(DigestCredentials::new());

        assert!(reject(&mut authenticator, r#"Digest realm="other", nonce="abc""#).is_err());

        let mut headers = Headers::new();
        authenticator.authorize_request(&register_line(), &mut headers);
        assert!(headers.is_empty());
    }
}
