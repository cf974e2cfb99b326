//! Parsing utilities for SIP message components

use bytes::Bytes;
use nom::branch::alt;
use nom::bytes::complete::{escaped, is_not, tag};
use nom::character::complete::char;
use nom::combinator::map;
use nom::error::VerboseError;
use nom::sequence::delimited;

pub type IResult<I, O> = nom::IResult<I, O, VerboseError<I>>;

/// Types that can be parsed from a slice of a shared source buffer.
///
/// The returned parser must only be called with slices of `src`, so parsed
/// strings can reference the buffer instead of copying it.
pub trait Parse: Sized {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_;
}

/// Returned by `FromStr` implementations of parsable types
#[derive(Debug, thiserror::Error)]
#[error("invalid {what}: {input:?}")]
pub struct InvalidValue {
    what: &'static str,
    input: String,
}

impl InvalidValue {
    pub(crate) fn new(what: &'static str, input: &str) -> Self {
        Self {
            what,
            input: input.into(),
        }
    }
}

pub(crate) fn parse_quoted(i: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        alt((escaped(is_not("\"\\"), '\\', char('"')), map(tag(""), |s| s))),
        char('"'),
    )(i)
}

pub(crate) fn whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

#[rustfmt::skip]
pub(crate) fn token(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '`' | '\'' | '~' | '+')
}

/// Splits a header value at commas which are not part of a quoted string or
/// enclosed in angle brackets.
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut angle = false;
    let mut start = 0;

    for (idx, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                parts.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    parts.push(&value[start..]);

    parts.into_iter().map(str::trim).filter(|part| !part.is_empty())
}
