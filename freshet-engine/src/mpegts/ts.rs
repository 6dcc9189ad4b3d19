use {
    super::{
        define::{self, TS_PACKET_SIZE},
        errors::MpegTsError,
        pat::PatMuxer,
        pmt::{PmtMuxer, PmtStream},
    },
    crate::bytesio::bytes_writer::BytesWriter,
    bytes::BytesMut,
    std::collections::HashMap,
};

/// Packetizes PES frames into 188-byte transport packets for one program.
///
/// Call `write_psi` at every segment boundary, then `write_frame` per
/// access unit; `extract` takes the accumulated segment bytes.
pub struct TsMuxer {
    writer: BytesWriter,
    continuity: HashMap<u16, u8>,
    streams: Vec<PmtStream>,
    pcr_pid: u16,
}

impl TsMuxer {
    #[must_use]
    pub fn new(streams: Vec<PmtStream>, pcr_pid: u16) -> Self {
        Self {
            writer: BytesWriter::new(),
            continuity: HashMap::new(),
            streams,
            pcr_pid,
        }
    }

    /// PAT + PMT, each in its own transport packet.
    pub fn write_psi(&mut self) -> Result<(), MpegTsError> {
        let pat = PatMuxer::write()?;
        self.write_section(define::PAT_PID, &pat)?;
        let pmt = PmtMuxer::write(&self.streams, self.pcr_pid)?;
        self.write_section(define::PMT_PID, &pmt)?;
        Ok(())
    }

    /// One access unit as a PES packet. `pts`/`dts` are 90 kHz ticks.
    pub fn write_frame(
        &mut self,
        pid: u16,
        stream_id: u8,
        pts: i64,
        dts: i64,
        keyframe: bool,
        payload: &[u8],
    ) -> Result<(), MpegTsError> {
        let pes = build_pes(stream_id, pts, dts, payload);

        let mut offset = 0;
        let mut first = true;
        while first || offset < pes.len() {
            let continuity = self.next_continuity(pid);
            let mut packet = Vec::with_capacity(TS_PACKET_SIZE);

            let remaining = pes.len() - offset;
            let mut adaptation: Vec<u8> = Vec::new();

            if first && keyframe {
                // PCR rides on the first packet of a keyframe.
                adaptation.push(0x10);
                adaptation.extend_from_slice(&encode_pcr(dts));
            }

            // 4-byte header + optional (1 + adaptation) bytes.
            let adaptation_overhead = if adaptation.is_empty() { 0 } else { 1 + adaptation.len() };
            let mut capacity = TS_PACKET_SIZE - 4 - adaptation_overhead;

            if remaining < capacity {
                // Grow the adaptation field with stuffing so the payload
                // lands flush against the packet end.
                let mut stuffing = capacity - remaining;
                if adaptation.is_empty() {
                    // Need the length byte (and flags byte if length > 0).
                    if stuffing == 1 {
                        adaptation = vec![]; // length byte only
                        stuffing = 0;
                        capacity = TS_PACKET_SIZE - 4 - 1;
                    } else {
                        adaptation.push(0x00);
                        stuffing -= 2; // length + flags bytes
                        capacity = TS_PACKET_SIZE - 4 - 2;
                    }
                }
                for _ in 0..stuffing {
                    adaptation.push(0xFF);
                }
                capacity -= stuffing;
                debug_assert_eq!(capacity, remaining);
            }

            let has_adaptation =
                !adaptation.is_empty() || (remaining < TS_PACKET_SIZE - 4 && adaptation.is_empty());
            let afc = if has_adaptation { 0b11 } else { 0b01 };

            packet.push(define::SYNC_BYTE);
            let pusi = u8::from(first) << 6;
            packet.push(pusi | ((pid >> 8) as u8 & 0x1F));
            packet.push((pid & 0xFF) as u8);
            packet.push((afc << 4) | continuity);

            if has_adaptation {
                packet.push(adaptation.len() as u8);
                packet.extend_from_slice(&adaptation);
            }

            let take = remaining.min(TS_PACKET_SIZE - packet.len());
            packet.extend_from_slice(&pes[offset..offset + take]);
            offset += take;
            first = false;

            debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
            self.writer.write(&packet)?;
        }

        Ok(())
    }

    fn write_section(&mut self, pid: u16, section: &BytesMut) -> Result<(), MpegTsError> {
        let continuity = self.next_continuity(pid);
        let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
        packet.push(define::SYNC_BYTE);
        packet.push(0x40 | ((pid >> 8) as u8 & 0x1F));
        packet.push((pid & 0xFF) as u8);
        packet.push(0x10 | continuity);
        packet.extend_from_slice(section);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        self.writer.write(&packet)?;
        Ok(())
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (*counter + 1) & 0x0F;
        value
    }

    /// Take the finished segment and reset for the next one.
    pub fn extract(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.writer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }
}

fn build_pes(stream_id: u8, pts: i64, dts: i64, payload: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(payload.len() + 19);
    pes.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);

    let header_data_len = 10; // PTS + DTS
    let packet_len = 3 + header_data_len + payload.len();
    if packet_len > 0xFFFF {
        // Unbounded PES, legal for video.
        pes.extend_from_slice(&[0x00, 0x00]);
    } else {
        pes.extend_from_slice(&(packet_len as u16).to_be_bytes());
    }

    pes.push(0x80); // marker bits
    pes.push(0xC0); // PTS and DTS present
    pes.push(header_data_len as u8);
    pes.extend_from_slice(&encode_pts_dts(0b0011, pts));
    pes.extend_from_slice(&encode_pts_dts(0b0001, dts));
    pes.extend_from_slice(payload);
    pes
}

fn encode_pts_dts(marker: u8, value: i64) -> [u8; 5] {
    let v = (value as u64) & 0x1_FFFF_FFFF;
    [
        (marker << 4) | (((v >> 30) as u8) << 1) | 1,
        (v >> 22) as u8,
        ((((v >> 15) as u8) & 0x7F) << 1) | 1,
        (v >> 7) as u8,
        (((v as u8) & 0x7F) << 1) | 1,
    ]
}

fn encode_pcr(dts: i64) -> [u8; 6] {
    let base = (dts as u64) & 0x1_FFFF_FFFF;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 1) as u8) << 7) | 0x7E,
        0x00,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpegts::define::{stream_type, AUDIO_PID, VIDEO_PID};

    fn muxer() -> TsMuxer {
        TsMuxer::new(
            vec![
                PmtStream {
                    stream_type: stream_type::H264,
                    pid: VIDEO_PID,
                },
                PmtStream {
                    stream_type: stream_type::AAC,
                    pid: AUDIO_PID,
                },
            ],
            VIDEO_PID,
        )
    }

    #[test]
    fn test_segment_starts_with_sync_and_psi() {
        let mut muxer = muxer();
        muxer.write_psi().unwrap();
        muxer
            .write_frame(VIDEO_PID, 0xE0, 0, 0, true, &[0u8; 10])
            .unwrap();
        let segment = muxer.extract();

        assert_eq!(segment[0], 0x47);
        assert_eq!(segment.len() % TS_PACKET_SIZE, 0);
        // PAT pid 0 on first packet, PMT next.
        assert_eq!(segment[1] & 0x1F, 0);
        assert_eq!(segment[TS_PACKET_SIZE + 1] & 0x1F, (define::PMT_PID >> 8) as u8);
    }

    #[test]
    fn test_every_packet_is_188_bytes_and_synced() {
        let mut muxer = muxer();
        muxer.write_psi().unwrap();
        muxer
            .write_frame(VIDEO_PID, 0xE0, 90000, 90000, true, &[0xAAu8; 1000])
            .unwrap();
        muxer
            .write_frame(AUDIO_PID, 0xC0, 90000, 90000, false, &[0xBBu8; 300])
            .unwrap();
        let segment = muxer.extract();
        assert_eq!(segment.len() % TS_PACKET_SIZE, 0);
        for packet in segment.chunks(TS_PACKET_SIZE) {
            assert_eq!(packet[0], 0x47);
        }
    }

    #[test]
    fn test_continuity_counters_increment() {
        let mut muxer = muxer();
        for i in 0..3 {
            muxer
                .write_frame(VIDEO_PID, 0xE0, i * 3000, i * 3000, false, &[0u8; 8])
                .unwrap();
        }
        let segment = muxer.extract();
        let counters: Vec<u8> = segment
            .chunks(TS_PACKET_SIZE)
            .map(|p| p[3] & 0x0F)
            .collect();
        assert_eq!(counters, vec![0, 1, 2]);
    }
}
