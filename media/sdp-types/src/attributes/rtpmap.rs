//! RtpMap attribute (`a=rtpmap:...`)

use crate::IResult;
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{digit1, space1};
use nom::combinator::{map, map_res, opt};
use nom::error::context;
use nom::sequence::{preceded, terminated, tuple};
use std::fmt;
use std::str::FromStr;

/// Rtpmap attribute (`a=rtpmap`)
///
/// Map a RTP payload number specified in the media description to a encoding.
///
/// Media-Level attribute
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    /// The number used in the media description which this maps a description to
    pub payload: u8,

    /// Name of the encoding
    pub encoding: BytesStr,

    /// Clock rate of the encoding
    pub clock_rate: u32,

    /// Additional parameters as a string, the channel count for audio
    pub params: Option<BytesStr>,
}

impl RtpMap {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing rtpmap",
            map(
                tuple((
                    // payload num
                    map_res(digit1, FromStr::from_str),
                    // encoding
                    preceded(
                        space1,
                        terminated(
                            map(take_while1(|c| c != '/'), |slice| {
                                BytesStr::from_parse(src, slice)
                            }),
                            tag("/"),
                        ),
                    ),
                    // clock rate
                    map_res(digit1, FromStr::from_str),
                    // optional params
                    opt(preceded(tag("/"), |rem: &'i str| {
                        Ok(("", BytesStr::from_parse(src, rem.trim_end())))
                    })),
                )),
                |(payload, encoding, clock_rate, params)| RtpMap {
                    payload,
                    encoding,
                    clock_rate,
                    params,
                },
            ),
        )(i)
    }

    /// Number of audio channels, 1 if not specified
    pub fn channels(&self) -> u32 {
        self.params
            .as_ref()
            .and_then(|params| params.parse().ok())
            .unwrap_or(1)
    }
}

impl fmt::Display for RtpMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}/{}", self.payload, self.encoding, self.clock_rate)?;

        if let Some(params) = &self.params {
            write!(f, "/{params}")?;
        }

        Ok(())
    }
}

/// Static audio payload types (RFC 3551) usable without a rtpmap attribute
const STATIC_PAYLOAD_TYPES: &[(u8, &str, u32)] = &[
    (0, "PCMU", 8000),
    (3, "GSM", 8000),
    (8, "PCMA", 8000),
    (9, "G722", 8000),
    (18, "G729", 8000),
];

/// Returns the implicit rtpmap of a static payload type
pub fn static_rtpmap(payload: u8) -> Option<RtpMap> {
    STATIC_PAYLOAD_TYPES
        .iter()
        .find(|(pt, _, _)| *pt == payload)
        .map(|&(payload, encoding, clock_rate)| RtpMap {
            payload,
            encoding: BytesStr::from_static(encoding),
            clock_rate,
            params: None,
        })
}

/// Look up a static payload type by its encoding name, ignoring case
pub fn static_rtpmap_by_name(name: &str) -> Option<RtpMap> {
    STATIC_PAYLOAD_TYPES
        .iter()
        .find(|(_, encoding, _)| encoding.eq_ignore_ascii_case(name))
        .and_then(|(payload, _, _)| static_rtpmap(*payload))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rtpmap() {
        let input = BytesStr::from_static("0 PCMU/8000");

        let (rem, rtpmap) = RtpMap::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());

        assert_eq!(rtpmap.payload, 0);
        assert_eq!(rtpmap.encoding, "PCMU");
        assert_eq!(rtpmap.clock_rate, 8000);
        assert_eq!(rtpmap.params, None);
        assert_eq!(rtpmap.channels(), 1);
    }

    #[test]
    fn rtpmap_params() {
        let input = BytesStr::from_static("97 opus/48000/2");

        let (rem, rtpmap) = RtpMap::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());

        assert_eq!(rtpmap.payload, 97);
        assert_eq!(rtpmap.encoding, "opus");
        assert_eq!(rtpmap.clock_rate, 48000);
        assert_eq!(rtpmap.channels(), 2);
    }

    #[test]
    fn rtpmap_params_print() {
        let rtpmap = RtpMap {
            payload: 0,
            encoding: "PCMU".into(),
            clock_rate: 8000,
            params: Some("1".into()),
        };

        assert_eq!(rtpmap.to_string(), "0 PCMU/8000/1");
    }

    #[test]
    fn static_payload_types() {
        assert_eq!(static_rtpmap(8).unwrap().encoding, "PCMA");
        assert!(static_rtpmap(96).is_none());
        assert_eq!(static_rtpmap_by_name("g722").unwrap().payload, 9);
        assert!(static_rtpmap_by_name("opus").is_none());
    }
}
