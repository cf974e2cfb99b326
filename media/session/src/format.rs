use sdp_types::{RtpMap, static_rtpmap_by_name};
use std::borrow::Cow;
use std::fmt;

/// A RTP payload format offered or accepted in a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Format {
    pub pt: u8,
    pub name: Cow<'static, str>,
    pub clock_rate: u32,
    pub channels: u32,
    /// Format specific parameters (`a=fmtp`)
    pub params: Option<String>,
}

impl Format {
    pub const PCMU: Self = Self::new(0, "PCMU", 8000);
    pub const GSM: Self = Self::new(3, "GSM", 8000);
    pub const PCMA: Self = Self::new(8, "PCMA", 8000);
    pub const G722: Self = Self::new(9, "G722", 8000);
    pub const G729: Self = Self::new(18, "G729", 8000);

    pub const fn new(pt: u8, name: &'static str, clock_rate: u32) -> Self {
        Format {
            pt,
            name: Cow::Borrowed(name),
            clock_rate,
            channels: 1,
            params: None,
        }
    }

    pub const fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    /// Find a static payload format by its encoding name
    pub fn from_name(name: &str) -> Option<Self> {
        static_rtpmap_by_name(name).map(|rtpmap| Self::from_rtpmap(&rtpmap))
    }

    pub(crate) fn from_rtpmap(rtpmap: &RtpMap) -> Self {
        Format {
            pt: rtpmap.payload,
            name: Cow::Owned(rtpmap.encoding.to_string()),
            clock_rate: rtpmap.clock_rate,
            channels: rtpmap.channels(),
            params: None,
        }
    }

    pub(crate) fn to_rtpmap(&self) -> RtpMap {
        RtpMap {
            payload: self.pt,
            encoding: self.name.to_string().into(),
            clock_rate: self.clock_rate,
            params: (self.channels > 1).then(|| self.channels.to_string().into()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} (payload type: {})",
            self.name, self.clock_rate, self.channels, self.pt
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(Format::from_name("pcma"), Some(Format::PCMA));
        assert_eq!(Format::from_name("opus"), None);
    }

    #[test]
    fn rtpmap_channels() {
        assert_eq!(Format::PCMU.to_rtpmap().to_string(), "0 PCMU/8000");
        assert_eq!(
            Format::new(97, "L16", 44100)
                .with_channels(2)
                .to_rtpmap()
                .to_string(),
            "97 L16/44100/2"
        );
    }

    #[test]
    fn display() {
        assert_eq!(Format::PCMU.to_string(), "PCMU/8000/1 (payload type: 0)");
    }
}
