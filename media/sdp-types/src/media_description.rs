use crate::connection::Connection;
use crate::media::Media;
use crate::{Direction, Fmtp, MediaType, RtpMap, TransportProtocol, UnknownAttribute, static_rtpmap};
use std::fmt;

/// Part of the [`SessionDescription`](crate::SessionDescription) describes a single media session
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media description's media field (m=)
    pub media: Media,

    /// Optional connection (c field)
    pub connection: Option<Connection>,

    /// Media direction attribute
    pub direction: Direction,

    /// RTP Payload mappings
    pub rtpmap: Vec<RtpMap>,

    /// RTP encoding parameters
    pub fmtp: Vec<Fmtp>,

    /// Additional attributes
    pub attributes: Vec<UnknownAttribute>,
}

impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m={}\r\n", self.media)?;

        if let Some(conn) = &self.connection {
            write!(f, "c={conn}\r\n")?;
        }

        for rtpmap in &self.rtpmap {
            write!(f, "a=rtpmap:{rtpmap}\r\n")?;
        }

        for fmtp in &self.fmtp {
            write!(f, "a=fmtp:{fmtp}\r\n")?;
        }

        write!(f, "a={}\r\n", self.direction)?;

        for attr in &self.attributes {
            write!(f, "{attr}\r\n")?;
        }

        Ok(())
    }
}

impl MediaDescription {
    pub fn new(media: Media) -> Self {
        MediaDescription {
            media,
            connection: None,
            direction: Direction::default(),
            rtpmap: vec![],
            fmtp: vec![],
            attributes: vec![],
        }
    }

    /// Create media description which signals rejected media
    pub fn rejected(media_type: MediaType) -> Self {
        let mut desc = Self::new(Media {
            media_type,
            port: 0,
            ports_num: None,
            proto: TransportProtocol::RtpAvp,
            fmts: vec![],
        });

        desc.direction = Direction::Inactive;
        desc
    }

    /// Port 0 marks a declined media stream
    pub fn is_rejected(&self) -> bool {
        self.media.port == 0
    }

    /// Returns the encoding of a payload type listed in the media field.
    ///
    /// Falls back to the static payload types when no rtpmap is present.
    pub fn rtpmap_for(&self, payload: u8) -> Option<RtpMap> {
        self.rtpmap
            .iter()
            .find(|rtpmap| rtpmap.payload == payload)
            .cloned()
            .or_else(|| static_rtpmap(payload))
    }

    pub fn fmtp_for(&self, payload: u8) -> Option<&Fmtp> {
        self.fmtp.iter().find(|fmtp| fmtp.format == payload)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejected_print() {
        let desc = MediaDescription::rejected(MediaType::Audio);

        assert!(desc.is_rejected());
        assert_eq!(desc.to_string(), "m=audio 0 RTP/AVP\r\na=inactive\r\n");
    }

    #[test]
    fn static_fallback() {
        let mut desc = MediaDescription::new(Media {
            media_type: MediaType::Audio,
            port: 4000,
            ports_num: None,
            proto: TransportProtocol::RtpAvp,
            fmts: vec![8, 96],
        });

        desc.rtpmap.push(RtpMap {
            payload: 96,
            encoding: "telephone-event".into(),
            clock_rate: 8000,
            params: None,
        });

        assert_eq!(desc.rtpmap_for(8).unwrap().encoding, "PCMA");
        assert_eq!(desc.rtpmap_for(96).unwrap().encoding, "telephone-event");
        assert!(desc.rtpmap_for(97).is_none());
    }
}
