use crate::{
    Connection, Direction, Fmtp, Media, MediaDescription, Origin, RtpMap, UnknownAttribute,
};
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum ParseSessionDescriptionError {
    #[error("session description is not valid utf8")]
    Utf8,
    #[error("line {0:?} is not in the form <type>=<value>")]
    InvalidLine(String),
    #[error("unsupported version {0:?}")]
    Version(String),
    #[error("failed to parse {field}= field {value:?}")]
    InvalidField { field: char, value: String },
    #[error("missing {0}= field")]
    MissingField(char),
}

/// Session description (RFC 8866)
///
/// Bandwidth, timezone, key and repeat fields are ignored when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Origin field (o=)
    pub origin: Origin,

    /// Session name field (s=)
    pub name: BytesStr,

    /// Session level connection (c=), used for all media without their own
    pub connection: Option<Connection>,

    /// Start and stop time (t=), `0 0` for unbounded sessions
    pub time: (u64, u64),

    /// Session level direction attribute
    pub direction: Option<Direction>,

    /// Session level attributes which aren't parsed into anything specific
    pub attributes: Vec<UnknownAttribute>,

    /// The media sections (m=) in order
    pub media_descriptions: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn parse(src: &BytesStr) -> Result<Self, ParseSessionDescriptionError> {
        let bytes: &Bytes = src.as_ref();

        let mut origin = None;
        let mut name = None;
        let mut connection = None;
        let mut time = (0, 0);
        let mut direction = None;
        let mut attributes = vec![];
        let mut media_descriptions: Vec<MediaDescription> = vec![];

        for line in src.lines() {
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                continue;
            }

            let (field, value) = line
                .split_once('=')
                .filter(|(field, _)| field.len() == 1)
                .ok_or_else(|| ParseSessionDescriptionError::InvalidLine(line.into()))?;

            let field = field.chars().next().unwrap_or_default();

            let invalid = || ParseSessionDescriptionError::InvalidField {
                field,
                value: value.into(),
            };

            match field {
                'v' => {
                    if value != "0" {
                        return Err(ParseSessionDescriptionError::Version(value.into()));
                    }
                }
                'o' => {
                    let (_, o) = Origin::parse(bytes, value).map_err(|_| invalid())?;
                    origin = Some(o);
                }
                's' => name = Some(BytesStr::from_parse(bytes, value)),
                't' => {
                    let mut parts = value.split_whitespace().map(str::parse);

                    match (parts.next(), parts.next()) {
                        (Some(Ok(start)), Some(Ok(stop))) => time = (start, stop),
                        _ => return Err(invalid()),
                    }
                }
                'c' => {
                    let (_, c) = Connection::parse(bytes)(value).map_err(|_| invalid())?;

                    match media_descriptions.last_mut() {
                        Some(media) => media.connection = Some(c),
                        None => connection = Some(c),
                    }
                }
                'm' => {
                    let (_, media) = Media::parse(bytes, value).map_err(|_| invalid())?;
                    media_descriptions.push(MediaDescription::new(media));
                }
                'a' => {
                    if let Some(media) = media_descriptions.last_mut() {
                        parse_media_attribute(bytes, media, value)?;
                    } else if let Some(d) = Direction::from_attribute(value) {
                        direction = Some(d);
                    } else {
                        attributes.push(UnknownAttribute::parse(bytes, value));
                    }
                }
                _ => {
                    // i, u, e, p, b, z, k, r fields
                }
            }
        }

        Ok(SessionDescription {
            origin: origin.ok_or(ParseSessionDescriptionError::MissingField('o'))?,
            name: name.ok_or(ParseSessionDescriptionError::MissingField('s'))?,
            connection,
            time,
            direction,
            attributes,
            media_descriptions,
        })
    }

    /// Connection of a media section, falling back to the session level connection
    pub fn connection_of<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a Connection> {
        media.connection.as_ref().or(self.connection.as_ref())
    }
}

fn parse_media_attribute(
    bytes: &Bytes,
    media: &mut MediaDescription,
    value: &str,
) -> Result<(), ParseSessionDescriptionError> {
    let invalid = || ParseSessionDescriptionError::InvalidField {
        field: 'a',
        value: value.into(),
    };

    if let Some(direction) = Direction::from_attribute(value) {
        media.direction = direction;
    } else if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
        let (_, rtpmap) = RtpMap::parse(bytes, rtpmap).map_err(|_| invalid())?;
        media.rtpmap.push(rtpmap);
    } else if let Some(fmtp) = value.strip_prefix("fmtp:") {
        let (_, fmtp) = Fmtp::parse(bytes, fmtp).map_err(|_| invalid())?;
        media.fmtp.push(fmtp);
    } else {
        media.attributes.push(UnknownAttribute::parse(bytes, value));
    }

    Ok(())
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.name)?;

        if let Some(conn) = &self.connection {
            write!(f, "c={conn}\r\n")?;
        }

        write!(f, "t={} {}\r\n", self.time.0, self.time.1)?;

        if let Some(direction) = self.direction {
            write!(f, "a={direction}\r\n")?;
        }

        for attr in &self.attributes {
            write!(f, "{attr}\r\n")?;
        }

        for media_description in &self.media_descriptions {
            write!(f, "{media_description}")?;
        }

        Ok(())
    }
}

impl TryFrom<&[u8]> for SessionDescription {
    type Error = ParseSessionDescriptionError;

    fn try_from(body: &[u8]) -> Result<Self, Self::Error> {
        let src = BytesStr::from_utf8_bytes(Bytes::copy_from_slice(body))
            .map_err(|_| ParseSessionDescriptionError::Utf8)?;

        Self::parse(&src)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ConnectionAddress, MediaType, TransportProtocol};

    const OFFER: &str = "v=0\r\n\
        o=- 1000 1 IN IP4 192.0.2.1\r\n\
        s=-\r\n\
        c=IN IP4 192.0.2.1\r\n\
        t=0 0\r\n\
        m=audio 40000 RTP/AVP 0 8 101\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=rtpmap:101 telephone-event/8000\r\n\
        a=fmtp:101 0-15\r\n\
        a=ptime:20\r\n\
        a=sendrecv\r\n";

    #[test]
    fn parse_offer() {
        let sdp = SessionDescription::parse(&BytesStr::from_static(OFFER)).unwrap();

        assert_eq!(sdp.origin.session_id, 1000);
        assert_eq!(
            sdp.connection.as_ref().unwrap().address,
            ConnectionAddress::Ip("192.0.2.1".parse().unwrap())
        );
        assert_eq!(sdp.media_descriptions.len(), 1);

        let media = &sdp.media_descriptions[0];
        assert_eq!(media.media.media_type, MediaType::Audio);
        assert_eq!(media.media.proto, TransportProtocol::RtpAvp);
        assert_eq!(media.media.port, 40000);
        assert_eq!(media.media.fmts, [0, 8, 101]);
        assert_eq!(media.rtpmap.len(), 2);
        assert_eq!(media.fmtp_for(101).unwrap().params, "0-15");
        assert_eq!(media.attributes[0].name, "ptime");
        assert_eq!(media.direction, Direction::SendRecv);

        assert!(media.connection.is_none());
        assert!(sdp.connection_of(media).is_some());
    }

    #[test]
    fn print_parsed() {
        let sdp = SessionDescription::parse(&BytesStr::from_static(OFFER)).unwrap();

        let printed = sdp.to_string();
        let reparsed = SessionDescription::parse(&BytesStr::from(printed)).unwrap();

        assert_eq!(sdp, reparsed);
    }

    #[test]
    fn media_level_connection() {
        let input = "v=0\no=- 1 1 IN IP4 host.example\ns=x\nt=0 0\n\
            m=audio 5004 RTP/AVP 0\nc=IN IP4 198.51.100.7\n";

        let sdp = SessionDescription::try_from(input.as_bytes()).unwrap();

        assert!(sdp.connection.is_none());
        let media = &sdp.media_descriptions[0];
        assert_eq!(
            sdp.connection_of(media).unwrap().address.ip(),
            Some("198.51.100.7".parse().unwrap())
        );
    }

    #[test]
    fn missing_origin() {
        let err = SessionDescription::try_from(&b"v=0\r\ns=-\r\nt=0 0\r\n"[..]).unwrap_err();

        assert!(matches!(err, ParseSessionDescriptionError::MissingField('o')));
    }

    #[test]
    fn garbage() {
        let err = SessionDescription::try_from(&b"hello world"[..]).unwrap_err();

        assert!(matches!(err, ParseSessionDescriptionError::InvalidLine(_)));
    }

    #[test]
    fn invalid_media() {
        let err =
            SessionDescription::try_from(&b"v=0\r\no=- 1 1 IN IP6 ::1\r\ns=-\r\nm=audio x\r\n"[..])
                .unwrap_err();

        assert!(matches!(
            err,
            ParseSessionDescriptionError::InvalidField { field: 'm', .. }
        ));
    }
}
