use {
    crate::media::FragmentationHeader,
    crate::webrtc::rtp::RtpPacket,
    bytes::{BufMut, Bytes, BytesMut},
};

const STAP_A: u8 = 24;
const FU_A: u8 = 28;

/// One reassembled access unit.
pub struct DepacketizedFrame {
    pub timestamp: u32,
    pub keyframe: bool,
    pub data: Bytes,
    pub fragmentation: FragmentationHeader,
}

/// Reassembles H.264 access units from inbound RTP: single NAL units,
/// STAP-A aggregates and FU-A fragments, cut on the marker bit.
#[derive(Default)]
pub struct H264Depacketizer {
    nal_units: Vec<Bytes>,
    fu_buffer: BytesMut,
    timestamp: u32,
}

impl H264Depacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RTP packet; returns a complete frame when the marker
    /// closes the access unit.
    pub fn push(&mut self, packet: &RtpPacket) -> Option<DepacketizedFrame> {
        if packet.payload.is_empty() {
            return None;
        }
        self.timestamp = packet.timestamp;
        let nal_type = packet.payload[0] & 0x1F;

        match nal_type {
            STAP_A => {
                let mut offset = 1;
                while offset + 2 <= packet.payload.len() {
                    let length = u16::from_be_bytes([
                        packet.payload[offset],
                        packet.payload[offset + 1],
                    ]) as usize;
                    offset += 2;
                    if offset + length > packet.payload.len() {
                        break;
                    }
                    self.nal_units
                        .push(packet.payload.slice(offset..offset + length));
                    offset += length;
                }
            }
            FU_A => {
                if packet.payload.len() < 2 {
                    return None;
                }
                let indicator = packet.payload[0];
                let fu_header = packet.payload[1];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                if start {
                    self.fu_buffer.clear();
                    // Rebuild the original NAL header.
                    self.fu_buffer
                        .put_u8((indicator & 0xE0) | (fu_header & 0x1F));
                }
                self.fu_buffer.extend_from_slice(&packet.payload[2..]);
                if end && !self.fu_buffer.is_empty() {
                    self.nal_units
                        .push(self.fu_buffer.split().freeze());
                }
            }
            _ => {
                self.nal_units.push(packet.payload.clone());
            }
        }

        if packet.marker {
            return self.finish();
        }
        None
    }

    fn finish(&mut self) -> Option<DepacketizedFrame> {
        if self.nal_units.is_empty() {
            return None;
        }
        let mut data = BytesMut::new();
        let mut fragments = Vec::with_capacity(self.nal_units.len());
        let mut keyframe = false;
        for unit in self.nal_units.drain(..) {
            if unit[0] & 0x1F == 5 {
                keyframe = true;
            }
            data.put_slice(&[0, 0, 0, 1]);
            fragments.push((data.len(), unit.len()));
            data.put_slice(&unit);
        }
        Some(DepacketizedFrame {
            timestamp: self.timestamp,
            keyframe,
            data: data.freeze(),
            fragmentation: FragmentationHeader::new(fragments),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FragmentationHeader;
    use crate::webrtc::packetizer::{PacketizerCodec, RtpPacketizer};

    #[test]
    fn test_roundtrip_through_packetizer() {
        // Large IDR unit plus a small one, fragmented then reassembled.
        let mut unit = vec![0x65u8];
        unit.extend(std::iter::repeat(0x42).take(3000));
        let small = [0x41u8, 0xAA, 0xBB];
        let mut payload = unit.clone();
        payload.extend_from_slice(&small);
        let fragmentation =
            FragmentationHeader::new(vec![(0, unit.len()), (unit.len(), small.len())]);

        let mut packetizer = RtpPacketizer::new(PacketizerCodec::H264, 97, 1);
        let packets = packetizer.packetize(9000, &payload, Some(&fragmentation), None);
        assert!(packets.len() > 1);

        let mut depacketizer = H264Depacketizer::new();
        let mut frame = None;
        for packet in &packets {
            frame = depacketizer.push(packet);
        }
        let frame = frame.expect("marker must close the access unit");
        assert!(frame.keyframe);
        assert_eq!(frame.timestamp, 9000);
        assert_eq!(frame.fragmentation.len(), 2);
        let (offset, length) = frame.fragmentation.fragments[0];
        assert_eq!(&frame.data[offset..offset + length], &unit[..]);
        let (offset, length) = frame.fragmentation.fragments[1];
        assert_eq!(&frame.data[offset..offset + length], &small[..]);
    }
}
