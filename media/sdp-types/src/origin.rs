use crate::{ConnectionAddress, IResult, not_whitespace};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, space1};
use nom::combinator::{map, map_res};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::str::FromStr;

/// Origin field (`o=`)
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Login of the originating user, `-` if there is none
    pub username: BytesStr,

    /// Globally unique session identifier
    pub session_id: u64,

    /// Incremented every time the session description changes
    pub session_version: u64,

    /// Address of the host which created the session
    pub address: ConnectionAddress,
}

impl Origin {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing origin",
            map(
                tuple((
                    take_while1(not_whitespace),
                    preceded(space1, map_res(digit1, FromStr::from_str)),
                    preceded(space1, map_res(digit1, FromStr::from_str)),
                    preceded(space1, ConnectionAddress::parse(src)),
                )),
                |(username, session_id, session_version, address)| Origin {
                    username: BytesStr::from_parse(src, username),
                    session_id,
                    session_version,
                    address,
                },
            ),
        )(i)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.username, self.session_id, self.session_version, self.address
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn origin() {
        let input = BytesStr::from_static("alice 2890844526 2890842807 IN IP4 10.47.16.5");

        let (rem, origin) = Origin::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(origin.username, "alice");
        assert_eq!(origin.session_id, 2890844526);
        assert_eq!(origin.session_version, 2890842807);
        assert_eq!(
            origin.address,
            ConnectionAddress::Ip("10.47.16.5".parse().unwrap())
        );
        assert_eq!(
            origin.to_string(),
            "alice 2890844526 2890842807 IN IP4 10.47.16.5"
        );
    }
}
