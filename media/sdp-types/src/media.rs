use crate::{IResult, not_whitespace, slash_num};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, space1};
use nom::combinator::{map, map_res, opt};
use nom::error::context;
use nom::multi::many0;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Other(BytesStr),
}

impl MediaType {
    fn from_token(src: &Bytes, token: &str) -> Self {
        match token {
            "audio" => Self::Audio,
            "video" => Self::Video,
            other => Self::Other(BytesStr::from_parse(src, other)),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MediaType::Audio => f.write_str("audio"),
            MediaType::Video => f.write_str("video"),
            MediaType::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportProtocol {
    /// `RTP/AVP`
    RtpAvp,
    Other(BytesStr),
}

impl TransportProtocol {
    fn from_token(src: &Bytes, token: &str) -> Self {
        if token.eq_ignore_ascii_case("RTP/AVP") {
            Self::RtpAvp
        } else {
            Self::Other(BytesStr::from_parse(src, token))
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportProtocol::RtpAvp => f.write_str("RTP/AVP"),
            TransportProtocol::Other(other) => f.write_str(other),
        }
    }
}

/// Media field (`m=`)
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub media_type: MediaType,
    pub port: u16,
    pub ports_num: Option<u32>,
    pub proto: TransportProtocol,

    /// Payload types in order of preference, non numeric formats are skipped
    pub fmts: Vec<u8>,
}

impl Media {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing media field",
            map(
                tuple((
                    take_while1(not_whitespace),
                    preceded(space1, map_res(digit1, FromStr::from_str)),
                    opt(slash_num),
                    preceded(space1, take_while1(not_whitespace)),
                    many0(preceded(space1, take_while1(not_whitespace))),
                )),
                |(media_type, port, ports_num, proto, fmts): (&str, u16, _, &str, Vec<&str>)| {
                    Media {
                        media_type: MediaType::from_token(src, media_type),
                        port,
                        ports_num,
                        proto: TransportProtocol::from_token(src, proto),
                        fmts: fmts.into_iter().filter_map(|f| f.parse().ok()).collect(),
                    }
                },
            ),
        )(i)
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.media_type, self.port)?;

        if let Some(ports_num) = self.ports_num {
            write!(f, "/{ports_num}")?;
        }

        write!(f, " {}", self.proto)?;

        for fmt in &self.fmts {
            write!(f, " {fmt}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn media() {
        let input = BytesStr::from_static("audio 49170 RTP/AVP 0 8 101");

        let (rem, media) = Media::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(media.media_type, MediaType::Audio);
        assert_eq!(media.port, 49170);
        assert_eq!(media.proto, TransportProtocol::RtpAvp);
        assert_eq!(media.fmts, [0, 8, 101]);
        assert_eq!(media.to_string(), "audio 49170 RTP/AVP 0 8 101");
    }

    #[test]
    fn other_media() {
        let input = BytesStr::from_static("application 0 UDP/BFCP *");

        let (_, media) = Media::parse(input.as_ref(), &input).unwrap();

        assert_eq!(media.media_type, MediaType::Other("application".into()));
        assert_eq!(media.proto, TransportProtocol::Other("UDP/BFCP".into()));
        assert!(media.fmts.is_empty());
    }
}
