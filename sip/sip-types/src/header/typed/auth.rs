//! Authentication headers (RFC 2617, RFC 7616)

use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::parse::{IResult, parse_quoted, token, whitespace};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::multispace0;
use nom::combinator::map;
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use std::fmt;

/// A single `name=value` pair of an authentication header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParam {
    pub name: BytesStr,
    pub value: BytesStr,
}

impl fmt::Display for AuthParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"{}="{}""#, self.name, self.value)
    }
}

fn auth_param(src: &Bytes) -> impl Fn(&str) -> IResult<&str, AuthParam> + '_ {
    move |i| {
        map(
            tuple((
                take_while1(token),
                delimited(multispace0, tag("="), multispace0),
                alt((parse_quoted, take_while(token))),
            )),
            |(name, _, value)| AuthParam {
                name: BytesStr::from_parse(src, name),
                value: BytesStr::from_parse(src, value),
            },
        )(i)
    }
}

fn parse_auth(src: &Bytes) -> impl Fn(&str) -> IResult<&str, (&str, Vec<AuthParam>)> + '_ {
    move |i| {
        tuple((
            take_while1(|c| !whitespace(c)),
            preceded(
                take_while(whitespace),
                separated_list1(
                    delimited(multispace0, tag(","), multispace0),
                    auth_param(src),
                ),
            ),
        ))(i)
    }
}

fn parse_auth_value<T>(
    value: &BytesStr,
    digest: impl FnOnce(Vec<AuthParam>) -> Option<T>,
) -> Option<Result<T, (BytesStr, Vec<AuthParam>)>> {
    let (rem, (scheme, params)) = parse_auth(value.as_ref())(value).ok()?;

    if !rem.trim().is_empty() {
        return None;
    }

    if scheme.eq_ignore_ascii_case("Digest") {
        digest(params).map(Ok)
    } else {
        Some(Err((BytesStr::from_parse(value.as_ref(), scheme), params)))
    }
}

/// Digest hash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
    Other(BytesStr),
}

impl From<BytesStr> for Algorithm {
    fn from(value: BytesStr) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Algorithm::Md5,
            "MD5-SESS" => Algorithm::Md5Sess,
            "SHA-256" => Algorithm::Sha256,
            "SHA-256-SESS" => Algorithm::Sha256Sess,
            _ => Algorithm::Other(value),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Md5 => f.write_str("MD5"),
            Algorithm::Md5Sess => f.write_str("MD5-sess"),
            Algorithm::Sha256 => f.write_str("SHA-256"),
            Algorithm::Sha256Sess => f.write_str("SHA-256-sess"),
            Algorithm::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QopOption {
    Auth,
    AuthInt,
    Other(BytesStr),
}

impl From<BytesStr> for QopOption {
    fn from(value: BytesStr) -> Self {
        if value.eq_ignore_ascii_case("auth") {
            QopOption::Auth
        } else if value.eq_ignore_ascii_case("auth-int") {
            QopOption::AuthInt
        } else {
            QopOption::Other(value)
        }
    }
}

impl fmt::Display for QopOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QopOption::Auth => f.write_str("auth"),
            QopOption::AuthInt => f.write_str("auth-int"),
            QopOption::Other(other) => f.write_str(other),
        }
    }
}

/// Digest challenge found in `WWW-Authenticate` and `Proxy-Authenticate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub opaque: Option<BytesStr>,
    pub stale: bool,
    pub algorithm: Algorithm,
    pub qop: Vec<QopOption>,
}

impl DigestChallenge {
    fn from_auth_params(params: Vec<AuthParam>) -> Option<Self> {
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut stale = false;
        let mut algorithm = Algorithm::Md5;
        let mut qop = vec![];

        for param in params {
            match param.name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(param.value),
                "nonce" => nonce = Some(param.value),
                "opaque" => opaque = Some(param.value),
                "stale" => stale = param.value.eq_ignore_ascii_case("true"),
                "algorithm" => algorithm = Algorithm::from(param.value),
                "qop" => qop.extend(
                    param
                        .value
                        .split(',')
                        .map(|v| QopOption::from(param.value.slice_ref(v.trim()))),
                ),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            stale,
            algorithm,
            qop,
        })
    }
}

impl fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"Digest realm="{}", nonce="{}""#, self.realm, self.nonce)?;

        if let Some(opaque) = &self.opaque {
            write!(f, r#", opaque="{opaque}""#)?;
        }

        if self.stale {
            f.write_str(", stale=true")?;
        }

        if self.algorithm != Algorithm::Md5 {
            write!(f, ", algorithm={}", self.algorithm)?;
        }

        if !self.qop.is_empty() {
            let qop: Vec<String> = self.qop.iter().map(ToString::to_string).collect();
            write!(f, r#", qop="{}""#, qop.join(","))?;
        }

        Ok(())
    }
}

/// Challenge of any scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Digest(DigestChallenge),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

impl HeaderParse for AuthChallenge {
    fn parse_value(value: &BytesStr) -> Option<Self> {
        match parse_auth_value(value, DigestChallenge::from_auth_params)? {
            Ok(digest) => Some(Self::Digest(digest)),
            Err((scheme, params)) => Some(Self::Other { scheme, params }),
        }
    }
}

impl fmt::Display for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthChallenge::Digest(digest) => digest.fmt(f),
            AuthChallenge::Other { scheme, params } => print_other(f, scheme, params),
        }
    }
}

fn print_other(f: &mut fmt::Formatter<'_>, scheme: &str, params: &[AuthParam]) -> fmt::Result {
    write!(f, "{scheme} ")?;

    for (idx, param) in params.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }

        write!(f, "{param}")?;
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QopResponse {
    pub qop: QopOption,
    pub cnonce: BytesStr,
    pub nc: u32,
}

/// Digest credentials found in `Authorization` and `Proxy-Authorization`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: BytesStr,
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub uri: BytesStr,
    pub response: BytesStr,
    pub algorithm: Algorithm,
    pub opaque: Option<BytesStr>,
    pub qop_response: Option<QopResponse>,
}

impl DigestResponse {
    fn from_auth_params(params: Vec<AuthParam>) -> Option<Self> {
        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut algorithm = Algorithm::Md5;
        let mut opaque = None;
        let mut qop = None;
        let mut cnonce = None;
        let mut nc = None;

        for param in params {
            match param.name.to_ascii_lowercase().as_str() {
                "username" => username = Some(param.value),
                "realm" => realm = Some(param.value),
                "nonce" => nonce = Some(param.value),
                "uri" => uri = Some(param.value),
                "response" => response = Some(param.value),
                "algorithm" => algorithm = Algorithm::from(param.value),
                "opaque" => opaque = Some(param.value),
                "qop" => qop = Some(QopOption::from(param.value)),
                "cnonce" => cnonce = Some(param.value),
                "nc" => nc = u32::from_str_radix(&param.value, 16).ok(),
                _ => {}
            }
        }

        let qop_response = match qop {
            Some(qop) => Some(QopResponse {
                qop,
                cnonce: cnonce?,
                nc: nc?,
            }),
            None => None,
        };

        Some(Self {
            username: username?,
            realm: realm?,
            nonce: nonce?,
            uri: uri?,
            response: response?,
            algorithm,
            opaque,
            qop_response,
        })
    }
}

impl fmt::Display for DigestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
            self.username, self.realm, self.nonce, self.uri, self.response
        )?;

        if self.algorithm != Algorithm::Md5 {
            write!(f, ", algorithm={}", self.algorithm)?;
        }

        if let Some(opaque) = &self.opaque {
            write!(f, r#", opaque="{opaque}""#)?;
        }

        if let Some(qop_response) = &self.qop_response {
            write!(
                f,
                r#", qop={}, cnonce="{}", nc={:08x}"#,
                qop_response.qop, qop_response.cnonce, qop_response.nc
            )?;
        }

        Ok(())
    }
}

/// Credentials of any scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    Digest(DigestResponse),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

impl HeaderParse for AuthResponse {
    fn parse_value(value: &BytesStr) -> Option<Self> {
        match parse_auth_value(value, DigestResponse::from_auth_params)? {
            Ok(digest) => Some(Self::Digest(digest)),
            Err((scheme, params)) => Some(Self::Other { scheme, params }),
        }
    }
}

impl fmt::Display for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthResponse::Digest(digest) => digest.fmt(f),
            AuthResponse::Other { scheme, params } => print_other(f, scheme, params),
        }
    }
}

macro_rules! auth_header {
    ($(#[$meta:meta])* $ty:ident, $inner:ty, $name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ty(pub $inner);

        impl ConstNamed for $ty {
            const NAME: Name = $name;
        }

        impl HeaderParse for $ty {
            fn parse_value(value: &BytesStr) -> Option<Self> {
                <$inner>::parse_value(value).map(Self)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

auth_header!(
    /// `WWW-Authenticate` header
    WwwAuthenticate,
    AuthChallenge,
    Name::WWW_AUTHENTICATE
);
auth_header!(
    /// `Proxy-Authenticate` header
    ProxyAuthenticate,
    AuthChallenge,
    Name::PROXY_AUTHENTICATE
);
auth_header!(
    /// `Authorization` header
    Authorization,
    AuthResponse,
    Name::AUTHORIZATION
);
auth_header!(
    /// `Proxy-Authorization` header
    ProxyAuthorization,
    AuthResponse,
    Name::PROXY_AUTHORIZATION
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_digest_challenge() {
        let input = BytesStr::from_static(
            r#"Digest realm="example.com", nonce="abc123", qop="auth,auth-int", algorithm=SHA-256, opaque="xyz""#,
        );

        let AuthChallenge::Digest(challenge) = AuthChallenge::parse_value(&input).unwrap() else {
            panic!("expected digest challenge");
        };

        assert_eq!(challenge.realm, "example.com");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.algorithm, Algorithm::Sha256);
        assert_eq!(challenge.qop, vec![QopOption::Auth, QopOption::AuthInt]);
        assert_eq!(challenge.opaque.unwrap(), "xyz");
    }

    #[test]
    fn other_scheme() {
        let input = BytesStr::from_static(r#"Basic realm="example.com""#);

        assert!(matches!(
            AuthChallenge::parse_value(&input),
            Some(AuthChallenge::Other { scheme, .. }) if scheme == "Basic"
        ));
    }

    #[test]
    fn digest_response_print_parse() {
        let response = DigestResponse {
            username: "demo".into(),
            realm: "example.com".into(),
            nonce: "abc123".into(),
            uri: "sip:example.com".into(),
            response: "0123456789abcdef".into(),
            algorithm: Algorithm::Md5,
            opaque: None,
            qop_response: Some(QopResponse {
                qop: QopOption::Auth,
                cnonce: "c0ffee".into(),
                nc: 1,
            }),
        };

        let printed = BytesStr::from(response.to_string());
        assert!(printed.contains("nc=00000001"));

        let AuthResponse::Digest(parsed) = AuthResponse::parse_value(&printed).unwrap() else {
            panic!("expected digest response");
        };

        assert_eq!(parsed, response);
    }
}
