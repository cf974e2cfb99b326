//! SDP (RFC 8866) types with parsing and printing, limited to what RTP/AVP audio sessions use

use nom::character::complete::{char, digit1};
use nom::combinator::map_res;
use nom::error::VerboseError;
use nom::sequence::preceded;
use std::str::FromStr;

mod attributes;
mod connection;
mod media;
mod media_description;
mod origin;
mod session_description;

pub use attributes::{
    Direction, Fmtp, RtpMap, UnknownAttribute, static_rtpmap, static_rtpmap_by_name,
};
pub use connection::{Connection, ConnectionAddress};
pub use media::{Media, MediaType, TransportProtocol};
pub use media_description::MediaDescription;
pub use origin::Origin;
pub use session_description::{ParseSessionDescriptionError, SessionDescription};

pub(crate) type IResult<I, O> = nom::IResult<I, O, VerboseError<I>>;

fn slash_num(i: &str) -> IResult<&str, u32> {
    preceded(char('/'), map_res(digit1, FromStr::from_str))(i)
}

fn not_whitespace(c: char) -> bool {
    !c.is_ascii_whitespace()
}

fn probe_host(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn probe_host6(c: char) -> bool {
    probe_host(c) || c == ':'
}
