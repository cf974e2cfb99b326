use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse, parse_complete};
use crate::parse::{IResult, Parse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

/// `Contact` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub uri: NameAddr,
    pub params: Params,
}

impl Contact {
    pub fn new(uri: NameAddr) -> Self {
        Self {
            uri,
            params: Params::new(),
        }
    }

    /// The `expires` parameter of a registration binding
    pub fn expires(&self) -> Option<u32> {
        self.params.get_val("expires")?.parse().ok()
    }
}

impl ConstNamed for Contact {
    const NAME: Name = Name::CONTACT;
}

impl Parse for Contact {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((NameAddr::parse_no_params(src), Params::parse(src))),
                |(uri, params)| Contact { uri, params },
            )(i)
        }
    }
}

impl HeaderParse for Contact {
    const LIST: bool = true;

    fn parse_value(value: &BytesStr) -> Option<Self> {
        parse_complete(value)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.uri, self.params)
    }
}
