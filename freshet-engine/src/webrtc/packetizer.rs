use {
    super::rtp::{RtpPacket, DEFAULT_MAX_PACKET_SIZE, FIXED_HEADER_SIZE, RED_HEADER_SIZE},
    super::ulpfec::UlpfecGenerator,
    crate::media::FragmentationHeader,
    bytes::{BufMut, Bytes, BytesMut},
};

/// First dynamic payload type handed out while building the offer.
pub const PAYLOAD_TYPE_OFFSET: u8 = 97;
pub const RED_PAYLOAD_TYPE: u8 = 123;
pub const ULPFEC_PAYLOAD_TYPE: u8 = 124;

const FU_A: u8 = 28;
const STAP_A: u8 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizerCodec {
    H264,
    Vp8,
    Opus,
}

/// Converts one access unit into RTP packets for a single SSRC: H.264
/// STAP-A/FU-A, the VP8 payload descriptor, or one-packet Opus, with
/// optional RED + ULPFEC wrapping for video.
pub struct RtpPacketizer {
    codec: PacketizerCodec,
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    ulpfec: Option<(u8, u8)>,
    fec_generator: UlpfecGenerator,
}

impl RtpPacketizer {
    #[must_use]
    pub fn new(codec: PacketizerCodec, payload_type: u8, ssrc: u32) -> Self {
        Self {
            codec,
            payload_type,
            ssrc,
            sequence: 0,
            ulpfec: None,
            fec_generator: UlpfecGenerator::new(),
        }
    }

    /// Enable RED wrapping with ULPFEC protection packets.
    pub fn set_ulpfec(&mut self, red_payload_type: u8, fec_payload_type: u8) {
        self.ulpfec = Some((red_payload_type, fec_payload_type));
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn next_sequence(&mut self) -> u16 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    fn max_payload(&self) -> usize {
        let red = if self.ulpfec.is_some() { RED_HEADER_SIZE } else { 0 };
        DEFAULT_MAX_PACKET_SIZE - FIXED_HEADER_SIZE - red
    }

    fn base_packet(&mut self, timestamp: u32) -> RtpPacket {
        RtpPacket {
            payload_type: self.payload_type,
            sequence_number: self.next_sequence(),
            timestamp,
            ssrc: self.ssrc,
            ..RtpPacket::default()
        }
    }

    /// Packetize one access unit. The fragmentation header carries NAL
    /// boundaries for H.264; `picture_id` is the stream-allocated VP8
    /// picture id for this frame.
    pub fn packetize(
        &mut self,
        timestamp: u32,
        payload: &[u8],
        fragmentation: Option<&FragmentationHeader>,
        picture_id: Option<u16>,
    ) -> Vec<RtpPacket> {
        let mut packets = match self.codec {
            PacketizerCodec::H264 => self.packetize_h264(timestamp, payload, fragmentation),
            PacketizerCodec::Vp8 => {
                self.packetize_vp8(timestamp, payload, picture_id.unwrap_or(0x8000))
            }
            PacketizerCodec::Opus => {
                let mut packet = self.base_packet(timestamp);
                packet.payload = Bytes::copy_from_slice(payload);
                vec![packet]
            }
        };

        if let Some((red_payload_type, fec_payload_type)) = self.ulpfec {
            let mut wrapped: Vec<RtpPacket> = Vec::with_capacity(packets.len() + 1);
            for packet in &packets {
                self.fec_generator.add(packet);
                wrapped.push(packet.wrap_red(red_payload_type));
            }
            if let Some(fec_payload) = self.fec_generator.generate() {
                let last_timestamp = packets.last().map_or(timestamp, |p| p.timestamp);
                let mut fec = self.base_packet(last_timestamp);
                fec.payload_type = fec_payload_type;
                fec.payload = fec_payload;
                let mut fec_red = fec.wrap_red(red_payload_type);
                fec_red.set_ulpfec(true, self.payload_type);
                wrapped.push(fec_red);
            }
            packets = wrapped;
        }

        packets
    }

    fn packetize_h264(
        &mut self,
        timestamp: u32,
        payload: &[u8],
        fragmentation: Option<&FragmentationHeader>,
    ) -> Vec<RtpPacket> {
        let units: Vec<&[u8]> = match fragmentation {
            Some(fragmentation) if !fragmentation.is_empty() => fragmentation
                .fragments
                .iter()
                .filter(|&&(offset, length)| offset + length <= payload.len())
                .map(|&(offset, length)| &payload[offset..offset + length])
                .collect(),
            _ => vec![payload],
        };

        let max_payload = self.max_payload();
        let mut packets = Vec::new();
        let mut aggregate: Vec<&[u8]> = Vec::new();
        let mut aggregate_size = 1; // STAP-A indicator byte

        let flush =
            |packetizer: &mut Self, group: &mut Vec<&[u8]>, size: &mut usize, out: &mut Vec<RtpPacket>| {
                match group.len() {
                    0 => {}
                    1 => {
                        let mut packet = packetizer.base_packet(timestamp);
                        packet.payload = Bytes::copy_from_slice(group[0]);
                        out.push(packet);
                    }
                    _ => {
                        // STAP-A: aggregation indicator inherits the
                        // strongest NRI of the aggregated units.
                        let nri = group.iter().map(|unit| unit[0] & 0x60).max().unwrap_or(0);
                        let mut body = BytesMut::with_capacity(*size);
                        body.put_u8(nri | STAP_A);
                        for unit in group.iter() {
                            body.put_u16(unit.len() as u16);
                            body.put_slice(unit);
                        }
                        let mut packet = packetizer.base_packet(timestamp);
                        packet.payload = body.freeze();
                        out.push(packet);
                    }
                }
                group.clear();
                *size = 1;
            };

        for unit in units {
            if unit.is_empty() {
                continue;
            }
            if unit.len() + 2 + aggregate_size <= max_payload {
                aggregate_size += 2 + unit.len();
                aggregate.push(unit);
                continue;
            }
            flush(self, &mut aggregate, &mut aggregate_size, &mut packets);

            if unit.len() <= max_payload {
                aggregate_size += 2 + unit.len();
                aggregate.push(unit);
                continue;
            }

            // FU-A fragmentation for a unit larger than the MTU budget.
            let indicator = (unit[0] & 0x60) | FU_A;
            let nal_type = unit[0] & 0x1F;
            let body = &unit[1..];
            let chunk_size = max_payload - 2;
            let chunk_count = body.len().div_ceil(chunk_size);
            for (index, chunk) in body.chunks(chunk_size).enumerate() {
                let start = index == 0;
                let end = index == chunk_count - 1;
                let mut data = BytesMut::with_capacity(2 + chunk.len());
                data.put_u8(indicator);
                data.put_u8((u8::from(start) << 7) | (u8::from(end) << 6) | nal_type);
                data.put_slice(chunk);
                let mut packet = self.base_packet(timestamp);
                packet.payload = data.freeze();
                packets.push(packet);
            }
        }
        flush(self, &mut aggregate, &mut aggregate_size, &mut packets);

        if let Some(last) = packets.last_mut() {
            last.marker = true;
        }
        packets
    }

    fn packetize_vp8(&mut self, timestamp: u32, payload: &[u8], picture_id: u16) -> Vec<RtpPacket> {
        // 4-byte descriptor: X set, I set, 15-bit picture id with M bit.
        let max_payload = self.max_payload() - 4;
        let chunk_count = payload.len().div_ceil(max_payload).max(1);
        let mut packets = Vec::with_capacity(chunk_count);

        for (index, chunk) in payload.chunks(max_payload.max(1)).enumerate() {
            let start = index == 0;
            let mut data = BytesMut::with_capacity(4 + chunk.len());
            data.put_u8(0x80 | (u8::from(start) << 4)); // X | S
            data.put_u8(0x80); // I: picture id present
            data.put_u16(picture_id | 0x8000);
            data.put_slice(chunk);
            let mut packet = self.base_packet(timestamp);
            packet.payload = data.freeze();
            packets.push(packet);
        }

        if let Some(last) = packets.last_mut() {
            last.marker = true;
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_strictly_monotonic_mod_2_16() {
        let mut packetizer = RtpPacketizer::new(PacketizerCodec::Opus, 111, 7);
        let mut previous: Option<u16> = None;
        for i in 0..70_000u32 {
            let packets = packetizer.packetize(i, b"frame", None, None);
            for packet in packets {
                if let Some(previous) = previous {
                    assert_eq!(packet.sequence_number, previous.wrapping_add(1));
                }
                previous = Some(packet.sequence_number);
            }
        }
    }

    #[test]
    fn test_h264_small_units_aggregate_to_stap_a() {
        let mut packetizer = RtpPacketizer::new(PacketizerCodec::H264, 97, 7);
        // SPS + PPS + small IDR in one access unit.
        let payload = [
            0x67, 0x42, 0x00, 0x1F, // SPS
            0x68, 0xCE, // PPS
            0x65, 0xB8, 0x00, 0x04, // IDR
        ];
        let fragmentation = FragmentationHeader::new(vec![(0, 4), (4, 2), (6, 4)]);
        let packets = packetizer.packetize(0, &payload, Some(&fragmentation), None);

        assert_eq!(packets.len(), 1);
        let body = &packets[0].payload;
        assert_eq!(body[0] & 0x1F, STAP_A);
        assert_eq!(u16::from_be_bytes([body[1], body[2]]), 4);
        assert!(packets[0].marker);
    }

    #[test]
    fn test_h264_large_unit_fragments_to_fu_a() {
        let mut packetizer = RtpPacketizer::new(PacketizerCodec::H264, 97, 7);
        let mut unit = vec![0x65u8]; // IDR NAL header
        unit.extend(std::iter::repeat(0xAB).take(4000));
        let fragmentation = FragmentationHeader::new(vec![(0, unit.len())]);
        let packets = packetizer.packetize(3000, &unit, Some(&fragmentation), None);

        assert!(packets.len() >= 3);
        for (index, packet) in packets.iter().enumerate() {
            assert_eq!(packet.payload[0] & 0x1F, FU_A);
            let fu_header = packet.payload[1];
            assert_eq!(fu_header & 0x1F, 5); // IDR type carried in FU header
            assert_eq!(fu_header & 0x80 != 0, index == 0);
            assert_eq!(fu_header & 0x40 != 0, index == packets.len() - 1);
            assert!(packet.marshal().len() <= DEFAULT_MAX_PACKET_SIZE);
        }
        assert!(packets.last().unwrap().marker);
    }

    #[test]
    fn test_vp8_descriptor_carries_picture_id() {
        let mut packetizer = RtpPacketizer::new(PacketizerCodec::Vp8, 96, 7);
        let packets = packetizer.packetize(0, &[0xAA; 10], None, Some(0x8001));
        assert_eq!(packets.len(), 1);
        let descriptor = &packets[0].payload[..4];
        assert_eq!(descriptor[0] & 0x10, 0x10); // S bit on first packet
        assert_eq!(descriptor[1] & 0x80, 0x80); // I bit
        assert_eq!(u16::from_be_bytes([descriptor[2], descriptor[3]]), 0x8001);
    }

    #[test]
    fn test_red_and_fec_wrapping() {
        let mut packetizer = RtpPacketizer::new(PacketizerCodec::H264, 97, 7);
        packetizer.set_ulpfec(RED_PAYLOAD_TYPE, ULPFEC_PAYLOAD_TYPE);
        let fragmentation = FragmentationHeader::new(vec![(0, 4)]);
        let packets = packetizer.packetize(0, &[0x65, 1, 2, 3], Some(&fragmentation), None);

        // One media packet in RED plus one FEC packet in RED.
        assert_eq!(packets.len(), 2);
        let media = &packets[0];
        assert_eq!(media.payload_type, RED_PAYLOAD_TYPE);
        assert_eq!(media.payload[0], 97); // RED block carries the media pt
        assert!(!media.is_fec);

        let fec = &packets[1];
        assert_eq!(fec.payload_type, RED_PAYLOAD_TYPE);
        assert_eq!(fec.payload[0], ULPFEC_PAYLOAD_TYPE);
        assert!(fec.is_fec);
        assert_eq!(fec.origin_payload_type, 97);
        // FEC sequence continues the same SSRC space.
        assert_eq!(fec.sequence_number, media.sequence_number.wrapping_add(1));
    }
}
