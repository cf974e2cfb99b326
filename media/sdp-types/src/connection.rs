use crate::{IResult, probe_host, probe_host6, slash_num};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::{map, opt};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::net::IpAddr;

/// `<nettype> <addrtype> <address>` as found in the origin and connection field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAddress {
    Ip(IpAddr),
    Fqdn { ip6: bool, name: BytesStr },
}

impl ConnectionAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            ConnectionAddress::Ip(ip) => Some(*ip),
            ConnectionAddress::Fqdn { .. } => None,
        }
    }

    pub fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            context(
                "parsing connection address",
                alt((
                    preceded(
                        tag("IN IP4 "),
                        map(take_while1(probe_host), |host: &str| {
                            Self::from_host(src, host, false)
                        }),
                    ),
                    preceded(
                        tag("IN IP6 "),
                        map(take_while1(probe_host6), |host: &str| {
                            Self::from_host(src, host, true)
                        }),
                    ),
                )),
            )(i)
        }
    }

    fn from_host(src: &Bytes, host: &str, ip6: bool) -> Self {
        match host.parse() {
            Ok(ip) => ConnectionAddress::Ip(ip),
            Err(_) => ConnectionAddress::Fqdn {
                ip6,
                name: BytesStr::from_parse(src, host),
            },
        }
    }
}

impl From<IpAddr> for ConnectionAddress {
    fn from(ip: IpAddr) -> Self {
        ConnectionAddress::Ip(ip)
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionAddress::Ip(IpAddr::V4(ip)) => write!(f, "IN IP4 {ip}"),
            ConnectionAddress::Ip(IpAddr::V6(ip)) => write!(f, "IN IP6 {ip}"),
            ConnectionAddress::Fqdn { ip6: false, name } => write!(f, "IN IP4 {name}"),
            ConnectionAddress::Fqdn { ip6: true, name } => write!(f, "IN IP6 {name}"),
        }
    }
}

/// Connection field (`c=`)
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub address: ConnectionAddress,

    /// multicast ttl, only printed for IPv4
    pub ttl: Option<u32>,
}

impl Connection {
    pub fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            context(
                "parsing connection",
                map(
                    tuple((ConnectionAddress::parse(src), opt(slash_num), opt(slash_num))),
                    |(address, ttl, _num)| Connection { address, ttl },
                ),
            )(i)
        }
    }
}

impl From<IpAddr> for Connection {
    fn from(ip: IpAddr) -> Self {
        Connection {
            address: ip.into(),
            ttl: None,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.address)?;

        if let Some(ttl) = self.ttl {
            write!(f, "/{ttl}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ip4_connection() {
        let input = BytesStr::from_static("IN IP4 192.0.2.10");

        let (rem, connection) = Connection::parse(input.as_ref())(&input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(connection.address.ip(), Some("192.0.2.10".parse().unwrap()));
        assert_eq!(connection.to_string(), "IN IP4 192.0.2.10");
    }

    #[test]
    fn fqdn_multicast_connection() {
        let input = BytesStr::from_static("IN IP4 media.example.com/127");

        let (rem, connection) = Connection::parse(input.as_ref())(&input).unwrap();

        assert!(rem.is_empty());
        assert!(connection.address.ip().is_none());
        assert_eq!(connection.ttl, Some(127));
    }

    #[test]
    fn ip6_connection() {
        let input = BytesStr::from_static("IN IP6 ::1");

        let (_, connection) = Connection::parse(input.as_ref())(&input).unwrap();

        assert_eq!(connection.to_string(), "IN IP6 ::1");
    }
}
