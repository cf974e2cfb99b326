use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse, parse_complete};
use crate::host::HostPort;
use crate::parse::{IResult, Parse, token};
use crate::uri::{Param, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::character::complete::{multispace0, multispace1};
use nom::combinator::map;
use nom::sequence::{preceded, tuple};
use std::fmt;

/// `Via` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    pub fn new<T, B>(transport: T, sent_by: HostPort, branch: B) -> Self
    where
        T: Into<BytesStr>,
        B: Into<BytesStr>,
    {
        Self {
            transport: transport.into(),
            sent_by,
            params: Params::new().with(Param::value("branch", branch)),
        }
    }

    pub fn branch(&self) -> Option<&BytesStr> {
        self.params.get_val("branch")
    }
}

impl ConstNamed for Via {
    const NAME: Name = Name::VIA;
}

impl Parse for Via {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((
                    tag_no_case("SIP"),
                    multispace0,
                    tag("/"),
                    multispace0,
                    tag("2.0"),
                    multispace0,
                    tag("/"),
                    multispace0,
                    take_while1(token),
                    preceded(multispace1, HostPort::parse(src)),
                    Params::parse(src),
                )),
                |(_, _, _, _, _, _, _, _, transport, sent_by, params)| Via {
                    transport: BytesStr::from_parse(src, transport),
                    sent_by,
                    params,
                },
            )(i)
        }
    }
}

impl_from_str!(Via, "via");

impl HeaderParse for Via {
    const LIST: bool = true;

    fn parse_value(value: &BytesStr) -> Option<Self> {
        parse_complete(value)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_via() {
        let via: Via = "SIP/2.0/UDP pc33.atlanta.com:5066;branch=z9hG4bK776asdhds;rport"
            .parse()
            .unwrap();

        assert_eq!(via.transport, "UDP");
        assert_eq!(via.sent_by.port, Some(5066));
        assert_eq!(via.branch().unwrap(), "z9hG4bK776asdhds");
        assert!(via.params.contains("rport"));
    }

    #[test]
    fn print_via() {
        let via = Via::new(
            "TCP",
            "10.0.0.1:5060".parse().unwrap(),
            "z9hG4bKabc",
        );

        assert_eq!(via.to_string(), "SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bKabc");
    }
}
