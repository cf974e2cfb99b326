use crate::header::{HeaderParse, parse_complete};
use crate::parse::{IResult, Parse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

/// Value of the `From` and `To` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromTo {
    pub uri: NameAddr,
    pub tag: Option<BytesStr>,
    pub params: Params,
}

impl FromTo {
    pub fn new(uri: NameAddr, tag: Option<BytesStr>) -> Self {
        Self {
            uri,
            tag,
            params: Params::new(),
        }
    }
}

impl Parse for FromTo {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((NameAddr::parse_no_params(src), Params::parse(src))),
                |(uri, mut params)| FromTo {
                    uri,
                    tag: params.take("tag").and_then(|tag| tag.value),
                    params,
                },
            )(i)
        }
    }
}

impl HeaderParse for FromTo {
    fn parse_value(value: &BytesStr) -> Option<Self> {
        parse_complete(value)
    }
}

impl fmt::Display for FromTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;

        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }

        write!(f, "{}", self.params)
    }
}
