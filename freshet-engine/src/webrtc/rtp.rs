use {
    super::errors::{RtcError, RtcErrorValue},
    bytes::{BufMut, Bytes, BytesMut},
};

pub const RTP_VERSION: u8 = 2;
pub const FIXED_HEADER_SIZE: usize = 12;
pub const RED_HEADER_SIZE: usize = 1;

/// Wire MTU budget for one RTP datagram.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1472;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           timestamp                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           synchronization source (SSRC) identifier            |
// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
// |            Contributing source (CSRC) identifiers             |
// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
// |                    Payload  : padding...                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// One outbound or parsed RTP datagram.
///
/// `is_fec` / `origin_payload_type` travel alongside the wire fields so
/// the broadcast layer can classify RED-wrapped FEC without re-parsing.
#[derive(Debug, Clone, Default)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub payload: Bytes,
    pub padding_size: u8,
    pub is_fec: bool,
    pub origin_payload_type: u8,
}

impl RtpPacket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ulpfec(&mut self, is_fec: bool, origin_payload_type: u8) {
        self.is_fec = is_fec;
        self.origin_payload_type = origin_payload_type;
    }

    #[must_use]
    pub fn headers_size(&self) -> usize {
        FIXED_HEADER_SIZE + self.csrcs.len() * 4
    }

    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.headers_size() + self.payload.len() + 1);
        let padding = self.padding_size > 0;
        out.put_u8(
            (RTP_VERSION << 6)
                | (u8::from(padding) << 5)
                | (self.csrcs.len() as u8 & 0x0F),
        );
        out.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        out.put_u16(self.sequence_number);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        for csrc in &self.csrcs {
            out.put_u32(*csrc);
        }
        out.put_slice(&self.payload);
        if padding {
            for _ in 0..self.padding_size.saturating_sub(1) {
                out.put_u8(0);
            }
            out.put_u8(self.padding_size);
        }
        out.freeze()
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, RtcError> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(RtcErrorValue::MalformedPacket("short rtp header").into());
        }
        if data[0] >> 6 != RTP_VERSION {
            return Err(RtcErrorValue::MalformedPacket("bad rtp version").into());
        }
        let padding = data[0] & 0x20 != 0;
        let cc = (data[0] & 0x0F) as usize;
        let header_len = FIXED_HEADER_SIZE + cc * 4;
        if data.len() < header_len {
            return Err(RtcErrorValue::MalformedPacket("truncated csrc list").into());
        }

        let mut csrcs = Vec::with_capacity(cc);
        for i in 0..cc {
            let offset = FIXED_HEADER_SIZE + i * 4;
            csrcs.push(u32::from_be_bytes(
                data[offset..offset + 4].try_into().unwrap(),
            ));
        }

        let padding_size = if padding {
            *data.last().unwrap_or(&0)
        } else {
            0
        };
        let payload_end = data
            .len()
            .checked_sub(padding_size as usize)
            .filter(|&end| end >= header_len)
            .ok_or(RtcErrorValue::MalformedPacket("bad padding size"))?;

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            ssrc: u32::from_be_bytes(data[8..12].try_into().unwrap()),
            csrcs,
            payload: Bytes::copy_from_slice(&data[header_len..payload_end]),
            padding_size,
            is_fec: false,
            origin_payload_type: 0,
        })
    }

    /// Wrap this packet's payload in a RED header whose block carries the
    /// original payload type.
    #[must_use]
    pub fn wrap_red(&self, red_payload_type: u8) -> RtpPacket {
        let mut payload = BytesMut::with_capacity(self.payload.len() + RED_HEADER_SIZE);
        // Single-block RED: F=0, then the block payload type.
        payload.put_u8(self.payload_type & 0x7F);
        payload.put_slice(&self.payload);

        let mut red = self.clone();
        red.payload_type = red_payload_type;
        red.payload = payload.freeze();
        red
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let packet = RtpPacket {
            marker: true,
            payload_type: 97,
            sequence_number: 4242,
            timestamp: 90000,
            ssrc: 0xDEADBEEF,
            csrcs: vec![1, 2],
            payload: Bytes::from_static(b"payload"),
            padding_size: 0,
            is_fec: false,
            origin_payload_type: 0,
        };
        let wire = packet.marshal();
        let parsed = RtpPacket::unmarshal(&wire).unwrap();
        assert_eq!(parsed.marker, packet.marker);
        assert_eq!(parsed.payload_type, 97);
        assert_eq!(parsed.sequence_number, 4242);
        assert_eq!(parsed.timestamp, 90000);
        assert_eq!(parsed.ssrc, 0xDEADBEEF);
        assert_eq!(parsed.csrcs, vec![1, 2]);
        assert_eq!(&parsed.payload[..], b"payload");
    }

    #[test]
    fn test_red_wrap_prepends_block_type() {
        let mut packet = RtpPacket::new();
        packet.payload_type = 97;
        packet.payload = Bytes::from_static(b"xy");
        let red = packet.wrap_red(123);
        assert_eq!(red.payload_type, 123);
        assert_eq!(&red.payload[..], &[97, b'x', b'y']);
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        assert!(RtpPacket::unmarshal(&[0u8; 4]).is_err());
        assert!(RtpPacket::unmarshal(&[0xFFu8; 16]).is_err());
    }
}
