use {
    super::rtp::RtpPacket,
    bytes::{BufMut, Bytes, BytesMut},
};

/// Most packets one FEC payload protects (the 16-bit level-0 mask).
const MAX_PROTECTED: usize = 16;

/// RFC 5109 forward-error-correction payload generator.
///
/// Collects the media packets of one protection group (an access unit)
/// and produces a single XOR-recovery payload over them.
#[derive(Default)]
pub struct UlpfecGenerator {
    protected: Vec<RtpPacket>,
}

impl UlpfecGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, packet: &RtpPacket) {
        if self.protected.len() < MAX_PROTECTED {
            self.protected.push(packet.clone());
        }
    }

    /// Build the FEC payload (FEC header + level-0 header + XOR block)
    /// over everything added since the last call, then reset.
    pub fn generate(&mut self) -> Option<Bytes> {
        if self.protected.is_empty() {
            return None;
        }

        let sn_base = self.protected[0].sequence_number;
        let mut ts_recovery = 0u32;
        let mut length_recovery = 0u16;
        let mut flags_recovery = 0u8; // XOR of M|PT bytes
        let mut mask = 0u16;
        let protection_length = self
            .protected
            .iter()
            .map(|p| p.payload.len())
            .max()
            .unwrap_or(0);

        let mut xor_block = vec![0u8; protection_length];
        for packet in &self.protected {
            ts_recovery ^= packet.timestamp;
            length_recovery ^= packet.payload.len() as u16;
            flags_recovery ^= (u8::from(packet.marker) << 7) | (packet.payload_type & 0x7F);
            let offset = packet.sequence_number.wrapping_sub(sn_base);
            if offset < 16 {
                mask |= 0x8000 >> offset;
            }
            for (target, byte) in xor_block.iter_mut().zip(packet.payload.iter()) {
                *target ^= byte;
            }
        }
        self.protected.clear();

        let mut out = BytesMut::with_capacity(14 + protection_length);
        // FEC header: E=0, L=0, P/X/CC recovery left zero (we emit none).
        out.put_u8(0x00);
        out.put_u8(flags_recovery);
        out.put_u16(sn_base);
        out.put_u32(ts_recovery);
        out.put_u16(length_recovery);
        // Level 0: protection length + mask.
        out.put_u16(protection_length as u16);
        out.put_u16(mask);
        out.put_slice(&xor_block);
        Some(out.freeze())
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.protected.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(seq: u16, ts: u32, payload: &'static [u8]) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            timestamp: ts,
            payload_type: 97,
            payload: Bytes::from_static(payload),
            ..RtpPacket::default()
        }
    }

    #[test]
    fn test_fec_payload_shape() {
        let mut generator = UlpfecGenerator::new();
        generator.add(&media(10, 90000, b"abcd"));
        generator.add(&media(11, 90000, b"xy"));

        let fec = generator.generate().unwrap();
        // 10-byte FEC header + 4-byte level 0 header + 4-byte block.
        assert_eq!(fec.len(), 18);
        assert_eq!(u16::from_be_bytes([fec[2], fec[3]]), 10); // SN base
        assert_eq!(u16::from_be_bytes([fec[8], fec[9]]), 4 ^ 2); // length recovery
        assert_eq!(u16::from_be_bytes([fec[12], fec[13]]), 0xC000); // mask: two packets
        // XOR of the two payloads, short one zero-padded.
        assert_eq!(fec[14], b'a' ^ b'x');
        assert_eq!(fec[15], b'b' ^ b'y');
        assert_eq!(fec[16], b'c');
        assert_eq!(generator.pending(), 0);
    }

    #[test]
    fn test_empty_group_generates_nothing() {
        let mut generator = UlpfecGenerator::new();
        assert!(generator.generate().is_none());
    }
}
