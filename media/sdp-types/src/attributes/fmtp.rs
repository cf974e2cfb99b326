use crate::{IResult, not_whitespace};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, space1};
use nom::combinator::{map, map_res, rest};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::str::FromStr;

/// Format parameters attribute (`a=fmtp`)
///
/// Media-Level attribute
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.15)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fmtp {
    /// The payload number the parameters apply to
    pub format: u8,

    /// Format specific parameters, kept as they are
    pub params: BytesStr,
}

impl Fmtp {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing fmtp",
            map(
                tuple((
                    map_res(digit1, FromStr::from_str),
                    preceded(space1, take_while1(|c| c != '\r' && c != '\n')),
                    rest,
                )),
                |(format, params, _): (u8, &str, &str)| Fmtp {
                    format,
                    params: BytesStr::from_parse(src, params.trim_end()),
                },
            ),
        )(i)
    }

    /// Iterate over `key=value` pairs separated by `;`
    pub fn iter_params(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.params
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty() && p.chars().all(not_whitespace))
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (p, None),
            })
    }
}

impl fmt::Display for Fmtp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.format, self.params)
    }
}
