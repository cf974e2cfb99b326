//! SIP URIs and name-addr values

use crate::host::HostPort;
use crate::parse::{IResult, Parse};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while1};
use nom::character::complete::char;
use nom::combinator::{map, opt, value};
use nom::sequence::{terminated, tuple};
use std::fmt;

mod name_addr;
mod params;

pub use name_addr::NameAddr;
pub use params::{Param, Params};

/// `sip:` or `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<BytesStr>,
    pub host_port: HostPort,
    pub params: Params,
}

impl SipUri {
    pub fn new(host_port: HostPort) -> Self {
        Self {
            sips: false,
            user: None,
            host_port,
            params: Params::new(),
        }
    }

    pub fn user<U: Into<BytesStr>>(mut self, user: U) -> Self {
        self.user = Some(user.into());
        self
    }

    /// The value of the `transport` uri parameter, if any
    pub fn transport(&self) -> Option<&BytesStr> {
        self.params.get_val("transport")
    }

    /// Compares user and host-port, ignoring parameters
    pub fn compare(&self, other: &Self) -> bool {
        self.sips == other.sips && self.user == other.user && self.host_port == other.host_port
    }

    pub(crate) fn parse_no_params(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((
                    parse_scheme,
                    opt(terminated(take_while1(user), char('@'))),
                    HostPort::parse(src),
                )),
                |(sips, user, host_port)| SipUri {
                    sips,
                    user: user.map(|user| BytesStr::from_parse(src, user)),
                    host_port,
                    params: Params::new(),
                },
            )(i)
        }
    }
}

impl Parse for SipUri {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((Self::parse_no_params(src), Params::parse(src))),
                |(uri, params)| SipUri { params, ..uri },
            )(i)
        }
    }
}
impl_from_str!(SipUri, "sip uri");

fn parse_scheme(i: &str) -> IResult<&str, bool> {
    alt((
        value(true, tag_no_case("sips:")),
        value(false, tag_no_case("sip:")),
    ))(i)
}

fn user(c: char) -> bool {
    !matches!(c, '@' | ';' | '<' | '>' | '?' | ' ' | ',' | '"' | '\r' | '\n')
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.sips { "sips:" } else { "sip:" })?;

        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }

        write!(f, "{}{}", self.host_port, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::Host;

    #[test]
    fn full_uri() {
        let uri: SipUri = "sip:alice@192.168.1.10:5070;transport=tcp".parse().unwrap();

        assert!(!uri.sips);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host_port.port, Some(5070));
        assert_eq!(uri.transport().unwrap(), "tcp");
        assert_eq!(uri.to_string(), "sip:alice@192.168.1.10:5070;transport=tcp");
    }

    #[test]
    fn host_only_uri() {
        let uri: SipUri = "sips:example.com".parse().unwrap();

        assert!(uri.sips);
        assert!(uri.user.is_none());
        assert!(matches!(&uri.host_port.host, Host::Name(name) if name == "example.com"));
    }

    #[test]
    fn invalid_uri() {
        assert!("http://example.com".parse::<SipUri>().is_err());
        assert!("sip:".parse::<SipUri>().is_err());
    }
}
