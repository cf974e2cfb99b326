//! RTP and RTCP framing on top of `rtp-types` and `rtcp-types`

mod rtcp;
mod rtp_packet;

pub use rtcp::{RtcpError, RtcpPacketKind, parse_rtcp, receiver_report};
pub use rtp_packet::RtpPacket;

pub use rtcp_types;
pub use rtp_types;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ssrc(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    /// Returns the current number and advances to the next, wrapping at `u16::MAX`
    pub fn increase_one(&mut self) -> SequenceNumber {
        let current = *self;
        self.0 = self.0.wrapping_add(1);
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtpTimestamp(pub u32);

impl RtpTimestamp {
    pub fn advance(&mut self, samples: u32) {
        self.0 = self.0.wrapping_add(samples);
    }
}
