use crate::{RtpTimestamp, SequenceNumber, Ssrc};
use bytes::Bytes;
use rtp_types::{RtpPacketBuilder, RtpParseError, RtpWriteError, prelude::RtpPacketWriter};

/// Decoded RTP packet without header extensions or CSRCs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub pt: u8,
    pub sequence_number: SequenceNumber,
    pub ssrc: Ssrc,
    pub timestamp: RtpTimestamp,
    pub marker: bool,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn write_vec(&self, vec: &mut Vec<u8>) -> Result<(), RtpWriteError> {
        let builder = RtpPacketBuilder::<_, Vec<u8>>::new()
            .payload_type(self.pt)
            .sequence_number(self.sequence_number.0)
            .ssrc(self.ssrc.0)
            .timestamp(self.timestamp.0)
            .marker_bit(self.marker)
            .payload(&self.payload[..]);

        vec.reserve(builder.calculate_size()?);

        let mut writer = RtpPacketWriterVec {
            output: vec,
            padding: None,
        };

        builder.write(&mut writer)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, RtpWriteError> {
        let mut vec = Vec::with_capacity(12 + self.payload.len());
        self.write_vec(&mut vec)?;
        Ok(vec)
    }

    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, RtpParseError> {
        let packet: Bytes = bytes.into();

        let parsed = rtp_types::RtpPacket::parse(&packet[..])?;

        Ok(RtpPacket {
            pt: parsed.payload_type(),
            sequence_number: SequenceNumber(parsed.sequence_number()),
            ssrc: Ssrc(parsed.ssrc()),
            timestamp: RtpTimestamp(parsed.timestamp()),
            marker: parsed.marker_bit(),
            payload: packet.slice_ref(parsed.payload()),
        })
    }
}

struct RtpPacketWriterVec<'a> {
    output: &'a mut Vec<u8>,
    padding: Option<u8>,
}

impl<'a> RtpPacketWriter for RtpPacketWriterVec<'a> {
    type Output = ();
    type Payload = &'a [u8];
    type Extension = Vec<u8>;

    fn reserve(&mut self, size: usize) {
        if self.output.len() < size {
            self.output.reserve(size - self.output.len());
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data)
    }

    fn push_extension(&mut self, extension_data: &Self::Extension) {
        self.push(extension_data)
    }

    fn push_payload(&mut self, data: &Self::Payload) {
        self.push(data)
    }

    fn padding(&mut self, size: u8) {
        self.padding = Some(size);
    }

    fn finish(&mut self) -> Self::Output {
        if let Some(padding) = self.padding.take() {
            self.output
                .resize(self.output.len() + padding as usize - 1, 0);
            self.output.push(padding);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_and_parse() {
        let packet = RtpPacket {
            pt: 0,
            sequence_number: SequenceNumber(4711),
            ssrc: Ssrc(0xdeadbeef),
            timestamp: RtpTimestamp(160),
            marker: true,
            payload: Bytes::from_static(&[0xff; 160]),
        };

        let buf = packet.to_vec().unwrap();
        assert_eq!(buf.len(), 12 + 160);
        assert_eq!(buf[0] >> 6, 2);

        let parsed = RtpPacket::parse(buf).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn too_short() {
        assert!(RtpPacket::parse(Bytes::from_static(&[0x80, 0x00, 0x01])).is_err());
    }
}
