use crate::Format;
use bytes::Bytes;
use bytesstr::BytesStr;
use sdp_types::{
    Connection, Direction, Fmtp, Media, MediaType, Origin, ParseSessionDescriptionError,
    SessionDescription, TransportProtocol,
};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("no local media formats configured")]
    NoFormats,
    #[error("cannot create an answer before a remote offer was decoded")]
    NoRemoteOffer,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed session description, {0}")]
    Malformed(#[from] ParseSessionDescriptionError),
    #[error("unsupported session description, {0}")]
    Unsupported(&'static str),
}

/// Local and remote view of a session with a single audio stream.
///
/// Local formats are fixed at construction and kept in their priority order,
/// the remote side is only populated by [`decode`](MediaDescription::decode).
#[derive(Debug)]
pub struct MediaDescription {
    id: u64,
    version: u64,

    local_ip: IpAddr,
    local_port: u16,
    local_formats: Vec<Format>,

    remote: Option<Remote>,
}

#[derive(Debug)]
struct Remote {
    rtp_address: Option<SocketAddr>,
    formats: Vec<Format>,
    /// Format chosen by the remote, only set when decoding an answer
    selected: Option<Format>,
    is_offer: bool,
}

impl MediaDescription {
    pub fn new(local_ip: IpAddr, local_port: u16, local_formats: Vec<Format>) -> Self {
        Self {
            id: u64::from(rand::random::<u32>()),
            version: rand::random::<u16>().into(),
            local_ip,
            local_port,
            local_formats,
            remote: None,
        }
    }

    pub fn local_formats(&self) -> &[Format] {
        &self.local_formats
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Address the remote wants to receive RTP on
    pub fn remote_rtp_address(&self) -> Option<SocketAddr> {
        self.remote.as_ref().and_then(|remote| remote.rtp_address)
    }

    /// Formats decoded from the last remote description
    pub fn remote_formats(&self) -> &[Format] {
        self.remote
            .as_ref()
            .map(|remote| &remote.formats[..])
            .unwrap_or_default()
    }

    /// The format the remote selected in its answer
    pub fn selected_remote_format(&self) -> Option<&Format> {
        self.remote.as_ref()?.selected.as_ref()
    }

    /// Forget everything learned about the remote, done between calls
    pub fn reset_remote(&mut self) {
        self.remote = None;
    }

    /// Returns the first local format (in local priority order) which the remote also supports
    pub fn resolve_common_format(&self) -> Option<&Format> {
        let remote = self.remote.as_ref()?;

        self.local_formats
            .iter()
            .find(|local| remote.formats.iter().any(|remote| remote.pt == local.pt))
    }

    /// Create a session description.
    ///
    /// An offer lists all local formats, an answer only the common format. If there is
    /// no common format the answer declines the stream with port 0.
    pub fn encode(&mut self, as_offer: bool) -> Result<Bytes, EncodeError> {
        if self.local_formats.is_empty() {
            return Err(EncodeError::NoFormats);
        }

        let (port, formats): (u16, Vec<&Format>) = if as_offer {
            (self.local_port, self.local_formats.iter().collect())
        } else {
            match &self.remote {
                Some(remote) if remote.is_offer => {}
                _ => return Err(EncodeError::NoRemoteOffer),
            }

            match self.resolve_common_format() {
                Some(format) => (self.local_port, vec![format]),
                None => (0, vec![&self.local_formats[0]]),
            }
        };

        let mut media = sdp_types::MediaDescription::new(Media {
            media_type: MediaType::Audio,
            port,
            ports_num: None,
            proto: TransportProtocol::RtpAvp,
            fmts: formats.iter().map(|format| format.pt).collect(),
        });

        if port == 0 {
            media.direction = Direction::Inactive;
        }

        for format in &formats {
            media.rtpmap.push(format.to_rtpmap());

            if let Some(params) = &format.params {
                media.fmtp.push(Fmtp {
                    format: format.pt,
                    params: params.clone().into(),
                });
            }
        }

        self.version += 1;

        let sdp = SessionDescription {
            origin: Origin {
                username: BytesStr::from_static("-"),
                session_id: self.id,
                session_version: self.version,
                address: self.local_ip.into(),
            },
            name: BytesStr::from_static("-"),
            connection: Some(Connection::from(self.local_ip)),
            time: (0, 0),
            direction: None,
            attributes: vec![],
            media_descriptions: vec![media],
        };

        Ok(Bytes::from(sdp.to_string()))
    }

    /// Decode the remote's session description.
    ///
    /// An offer's formats are recorded as they are. An answer is expected to contain
    /// exactly one format which becomes the selected format.
    pub fn decode(&mut self, body: &[u8], is_offer: bool) -> Result<(), DecodeError> {
        let sdp = SessionDescription::try_from(body)?;

        let media = sdp
            .media_descriptions
            .iter()
            .find(|media| media.media.media_type == MediaType::Audio)
            .ok_or(DecodeError::Unsupported("no audio media line"))?;

        if media.media.proto != TransportProtocol::RtpAvp {
            return Err(DecodeError::Unsupported("transport protocol is not RTP/AVP"));
        }

        let mut remote = Remote {
            rtp_address: None,
            formats: vec![],
            selected: None,
            is_offer,
        };

        if !media.is_rejected() {
            let ip = sdp
                .connection_of(media)
                .and_then(|connection| connection.address.ip())
                .ok_or(DecodeError::Unsupported("missing connection address"))?;

            remote.rtp_address = Some(SocketAddr::new(ip, media.media.port));

            remote.formats = media
                .media
                .fmts
                .iter()
                .filter_map(|&pt| {
                    let mut format = Format::from_rtpmap(&media.rtpmap_for(pt)?);
                    format.params = media.fmtp_for(pt).map(|fmtp| fmtp.params.to_string());
                    Some(format)
                })
                .collect();
        }

        if !is_offer {
            if remote.formats.len() > 1 {
                log::warn!(
                    "answer contains {} formats, using the first one",
                    remote.formats.len()
                );

                remote.formats.truncate(1);
            }

            remote.selected = remote.formats.first().cloned();
        }

        self.remote = Some(remote);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn local(formats: Vec<Format>) -> MediaDescription {
        MediaDescription::new("192.0.2.1".parse().unwrap(), 10000, formats)
    }

    fn remote(formats: Vec<Format>) -> MediaDescription {
        MediaDescription::new("198.51.100.2".parse().unwrap(), 20000, formats)
    }

    #[test]
    fn offer_contains_all_formats() {
        let mut desc = local(vec![Format::PCMU, Format::PCMA]);

        let offer = desc.encode(true).unwrap();
        let offer = std::str::from_utf8(&offer).unwrap();

        assert!(offer.contains("c=IN IP4 192.0.2.1\r\n"));
        assert!(offer.contains("m=audio 10000 RTP/AVP 0 8\r\n"));
        assert!(offer.contains("a=rtpmap:0 PCMU/8000\r\n"));
        assert!(offer.contains("a=rtpmap:8 PCMA/8000\r\n"));
    }

    #[test]
    fn version_increments() {
        let mut desc = local(vec![Format::PCMU]);

        let first = SessionDescription::try_from(&desc.encode(true).unwrap()[..]).unwrap();
        let second = SessionDescription::try_from(&desc.encode(true).unwrap()[..]).unwrap();

        assert_eq!(first.origin.session_id, second.origin.session_id);
        assert_eq!(
            first.origin.session_version + 1,
            second.origin.session_version
        );
    }

    #[test]
    fn no_formats() {
        let mut desc = local(vec![]);

        assert!(matches!(desc.encode(true), Err(EncodeError::NoFormats)));
    }

    #[test]
    fn answer_requires_offer() {
        let mut desc = local(vec![Format::PCMU]);

        assert!(matches!(desc.encode(false), Err(EncodeError::NoRemoteOffer)));
    }

    #[test]
    fn offer_answer_negotiation() {
        let mut caller = local(vec![Format::PCMA, Format::PCMU]);
        let mut callee = remote(vec![Format::G722, Format::PCMU, Format::PCMA]);

        let offer = caller.encode(true).unwrap();
        callee.decode(&offer, true).unwrap();

        assert_eq!(callee.remote_formats().len(), 2);
        assert_eq!(
            callee.remote_rtp_address(),
            Some("192.0.2.1:10000".parse().unwrap())
        );

        // the callee's own priority decides
        assert_eq!(callee.resolve_common_format(), Some(&Format::PCMU));

        let answer = callee.encode(false).unwrap();
        caller.decode(&answer, false).unwrap();

        assert_eq!(caller.selected_remote_format(), Some(&Format::PCMU));
        assert_eq!(caller.resolve_common_format(), Some(&Format::PCMU));
        assert_eq!(
            caller.remote_rtp_address(),
            Some("198.51.100.2:20000".parse().unwrap())
        );
    }

    #[test]
    fn disjoint_formats() {
        let mut caller = local(vec![Format::PCMU]);
        let mut callee = remote(vec![Format::G729]);

        let offer = caller.encode(true).unwrap();
        callee.decode(&offer, true).unwrap();
        assert_eq!(callee.resolve_common_format(), None);

        // answer declines the stream
        let answer = callee.encode(false).unwrap();
        assert!(std::str::from_utf8(&answer).unwrap().contains("m=audio 0 RTP/AVP 18\r\n"));

        caller.decode(&answer, false).unwrap();
        assert_eq!(caller.resolve_common_format(), None);
        assert_eq!(caller.remote_rtp_address(), None);
    }

    #[test]
    fn answer_with_unknown_format() {
        let mut desc = local(vec![Format::PCMU]);

        let answer = b"v=0\r\no=- 1 1 IN IP4 198.51.100.2\r\ns=-\r\nc=IN IP4 198.51.100.2\r\n\
            t=0 0\r\nm=audio 30000 RTP/AVP 8\r\n";

        desc.decode(answer, false).unwrap();

        assert_eq!(desc.selected_remote_format(), Some(&Format::PCMA));
        assert_eq!(desc.resolve_common_format(), None);
    }

    #[test]
    fn answer_with_multiple_formats_takes_first() {
        let mut desc = local(vec![Format::PCMU, Format::PCMA]);

        let answer = b"v=0\r\no=- 1 1 IN IP4 198.51.100.2\r\ns=-\r\nc=IN IP4 198.51.100.2\r\n\
            t=0 0\r\nm=audio 30000 RTP/AVP 8 0\r\n";

        desc.decode(answer, false).unwrap();

        assert_eq!(desc.selected_remote_format(), Some(&Format::PCMA));
        assert_eq!(desc.remote_formats().len(), 1);
        assert_eq!(desc.resolve_common_format(), Some(&Format::PCMA));
    }

    #[test]
    fn malformed() {
        let mut desc = local(vec![Format::PCMU]);

        assert!(matches!(
            desc.decode(b"not sdp", true),
            Err(DecodeError::Malformed(_))
        ));

        let video_only = b"v=0\r\no=- 1 1 IN IP4 198.51.100.2\r\ns=-\r\nc=IN IP4 198.51.100.2\r\n\
            t=0 0\r\nm=video 30000 RTP/AVP 96\r\n";

        assert!(matches!(
            desc.decode(video_only, true),
            Err(DecodeError::Unsupported(_))
        ));
    }
}
