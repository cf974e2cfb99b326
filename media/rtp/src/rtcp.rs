use rtcp_types::{
    Compound, CompoundBuilder, Packet, ReceiverReport, RtcpPacketWriter, RtcpParseError,
    RtcpWriteError,
};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum RtcpError {
    #[error(transparent)]
    Parse(#[from] RtcpParseError),
    #[error(transparent)]
    Write(#[from] RtcpWriteError),
    #[error("empty compound packet")]
    Empty,
}

/// Kind of a single packet inside a RTCP compound packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketKind {
    SenderReport { ssrc: u32 },
    ReceiverReport { ssrc: u32 },
    SourceDescription,
    Goodbye,
    App,
    Other,
}

impl RtcpPacketKind {
    pub fn name(&self) -> &'static str {
        match self {
            RtcpPacketKind::SenderReport { .. } => "SR",
            RtcpPacketKind::ReceiverReport { .. } => "RR",
            RtcpPacketKind::SourceDescription => "SDES",
            RtcpPacketKind::Goodbye => "BYE",
            RtcpPacketKind::App => "APP",
            RtcpPacketKind::Other => "?",
        }
    }
}

impl fmt::Display for RtcpPacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a RTCP compound packet into the kinds of the packets it contains
pub fn parse_rtcp(data: &[u8]) -> Result<Vec<RtcpPacketKind>, RtcpError> {
    let compound = Compound::parse(data)?;

    let mut kinds = vec![];

    for packet in compound {
        let kind = match packet? {
            Packet::Sr(sr) => RtcpPacketKind::SenderReport { ssrc: sr.ssrc() },
            Packet::Rr(rr) => RtcpPacketKind::ReceiverReport { ssrc: rr.ssrc() },
            Packet::Sdes(..) => RtcpPacketKind::SourceDescription,
            Packet::Bye(..) => RtcpPacketKind::Goodbye,
            Packet::App(..) => RtcpPacketKind::App,
            _ => RtcpPacketKind::Other,
        };

        kinds.push(kind);
    }

    if kinds.is_empty() {
        return Err(RtcpError::Empty);
    }

    Ok(kinds)
}

/// Build a compound packet containing a single empty receiver report
pub fn receiver_report(ssrc: u32) -> Result<Vec<u8>, RtcpError> {
    let compound = CompoundBuilder::default().add_packet(ReceiverReport::builder(ssrc));

    let mut buf = vec![0u8; compound.calculate_size()?];
    let len = compound.write_into_unchecked(&mut buf);
    buf.truncate(len);

    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn receiver_report_roundtrip() {
        let report = receiver_report(1234).unwrap();

        let kinds = parse_rtcp(&report).unwrap();

        assert_eq!(kinds, [RtcpPacketKind::ReceiverReport { ssrc: 1234 }]);
        assert_eq!(kinds[0].to_string(), "RR");
    }

    #[test]
    fn garbage() {
        assert!(parse_rtcp(&[0x80, 0x00]).is_err());
    }
}
