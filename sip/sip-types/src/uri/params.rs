use crate::parse::{IResult, parse_quoted, token};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, space0};
use nom::combinator::{map, opt, recognize};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, tuple};
use std::fmt;

/// A single `name[=value]` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: BytesStr,
    pub value: Option<BytesStr>,
}

impl Param {
    pub fn name<N: Into<BytesStr>>(name: N) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn value<N: Into<BytesStr>, V: Into<BytesStr>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// A list of `;`-separated parameters as found in URIs and headers
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    params: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[inline]
    pub fn with(mut self, param: Param) -> Self {
        self.push(param);
        self
    }

    #[inline]
    pub fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn get_val(&self, name: &str) -> Option<&BytesStr> {
        self.get(name).and_then(|p| p.value.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn take(&mut self, name: &str) -> Option<Param> {
        let idx = self
            .params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;

        Some(self.params.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub(crate) fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                many0(preceded(
                    tuple((space0, char(';'), space0)),
                    tuple((
                        take_while1(param_char),
                        opt(preceded(
                            delimited(space0, char('='), space0),
                            alt((
                                recognize(parse_quoted),
                                take_while1(param_char),
                            )),
                        )),
                    )),
                )),
                |params| Params {
                    params: params
                        .into_iter()
                        .map(|(name, value): (&str, Option<&str>)| Param {
                            name: BytesStr::from_parse(src, name),
                            value: value.map(|value| BytesStr::from_parse(src, value)),
                        })
                        .collect(),
                },
            )(i)
        }
    }
}

fn param_char(c: char) -> bool {
    token(c) || matches!(c, '[' | ']' | '/' | ':' | '&' | '$')
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.params {
            write!(f, ";{param}")?;
        }

        Ok(())
    }
}
