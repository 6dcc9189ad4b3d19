use {
    super::errors::{RtcError, RtcErrorValue},
    bytes::{BufMut, Bytes, BytesMut},
};

pub const RTCP_SENDER_REPORT: u8 = 200;
pub const RTCP_RECEIVER_REPORT: u8 = 201;
pub const RTCP_RTPFB: u8 = 205;

/// RTPFB feedback message type for NACK.
pub const RTPFB_FMT_NACK: u8 = 1;

/// Generic NACK: source + media SSRC and the expanded lost sequence ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub src_ssrc: u32,
    pub media_ssrc: u32,
    pub lost_ids: Vec<u16>,
}

/// One report block of a receiver report.
#[derive(Debug, Clone)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_sequence: u32,
    pub jitter: u32,
}

#[derive(Debug, Clone)]
pub enum RtcpMessage {
    ReceiverReport { ssrc: u32, blocks: Vec<ReportBlock> },
    Nack(Nack),
    Other { packet_type: u8 },
}

/// Parse a (possibly compound) RTCP datagram.
pub fn parse_compound(data: &[u8]) -> Result<Vec<RtcpMessage>, RtcError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let header = &data[offset..];
        if header[0] >> 6 != 2 {
            return Err(RtcErrorValue::MalformedPacket("bad rtcp version").into());
        }
        let fmt = header[0] & 0x1F;
        let packet_type = header[1];
        let length_words = u16::from_be_bytes([header[2], header[3]]) as usize;
        let packet_len = (length_words + 1) * 4;
        if offset + packet_len > data.len() {
            return Err(RtcErrorValue::MalformedPacket("truncated rtcp packet").into());
        }
        let body = &data[offset + 4..offset + packet_len];

        match packet_type {
            RTCP_RTPFB if fmt == RTPFB_FMT_NACK => {
                messages.push(RtcpMessage::Nack(parse_nack(body)?));
            }
            RTCP_RECEIVER_REPORT => {
                messages.push(parse_receiver_report(fmt as usize, body)?);
            }
            other => messages.push(RtcpMessage::Other { packet_type: other }),
        }
        offset += packet_len;
    }

    Ok(messages)
}

fn parse_nack(body: &[u8]) -> Result<Nack, RtcError> {
    if body.len() < 8 || (body.len() - 8) % 4 != 0 {
        return Err(RtcErrorValue::MalformedPacket("bad nack fci").into());
    }
    let src_ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let media_ssrc = u32::from_be_bytes(body[4..8].try_into().unwrap());

    let mut lost_ids = Vec::new();
    for fci in body[8..].chunks_exact(4) {
        let pid = u16::from_be_bytes([fci[0], fci[1]]);
        let blp = u16::from_be_bytes([fci[2], fci[3]]);
        lost_ids.push(pid);
        for bit in 0..16 {
            if blp & (1 << bit) != 0 {
                lost_ids.push(pid.wrapping_add(bit + 1));
            }
        }
    }

    Ok(Nack {
        src_ssrc,
        media_ssrc,
        lost_ids,
    })
}

fn parse_receiver_report(count: usize, body: &[u8]) -> Result<RtcpMessage, RtcError> {
    if body.len() < 4 + count * 24 {
        return Err(RtcErrorValue::MalformedPacket("truncated receiver report").into());
    }
    let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let mut blocks = Vec::with_capacity(count);
    for i in 0..count {
        let block = &body[4 + i * 24..4 + (i + 1) * 24];
        blocks.push(ReportBlock {
            ssrc: u32::from_be_bytes(block[0..4].try_into().unwrap()),
            fraction_lost: block[4],
            cumulative_lost: u32::from_be_bytes([0, block[5], block[6], block[7]]),
            highest_sequence: u32::from_be_bytes(block[8..12].try_into().unwrap()),
            jitter: u32::from_be_bytes(block[12..16].try_into().unwrap()),
        });
    }
    Ok(RtcpMessage::ReceiverReport { ssrc, blocks })
}

/// Build a NACK (used by tests and by the OVT edge role).
#[must_use]
pub fn build_nack(nack: &Nack) -> Bytes {
    // Compress lost ids back into (pid, blp) pairs.
    let mut fcis: Vec<(u16, u16)> = Vec::new();
    for &id in &nack.lost_ids {
        if let Some((pid, blp)) = fcis.last_mut() {
            let delta = id.wrapping_sub(*pid);
            if delta >= 1 && delta <= 16 {
                *blp |= 1 << (delta - 1);
                continue;
            }
        }
        fcis.push((id, 0));
    }

    let length_words = 2 + 2 + fcis.len() as u16;
    let mut out = BytesMut::new();
    out.put_u8(0x80 | RTPFB_FMT_NACK);
    out.put_u8(RTCP_RTPFB);
    out.put_u16(length_words);
    out.put_u32(nack.src_ssrc);
    out.put_u32(nack.media_ssrc);
    for (pid, blp) in fcis {
        out.put_u16(pid);
        out.put_u16(blp);
    }
    out.freeze()
}

/// Build a sender report for one outbound SSRC.
#[must_use]
pub fn build_sender_report(
    ssrc: u32,
    ntp_seconds: u64,
    ntp_fraction: u32,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
) -> Bytes {
    let mut out = BytesMut::with_capacity(28);
    out.put_u8(0x80); // version 2, no report blocks
    out.put_u8(RTCP_SENDER_REPORT);
    out.put_u16(6); // length in words - 1
    out.put_u32(ssrc);
    out.put_u32(ntp_seconds as u32);
    out.put_u32(ntp_fraction);
    out.put_u32(rtp_timestamp);
    out.put_u32(packet_count);
    out.put_u32(octet_count);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_roundtrip() {
        let nack = Nack {
            src_ssrc: 0x11223344,
            media_ssrc: 0x55667788,
            lost_ids: vec![5, 7, 8, 30],
        };
        let wire = build_nack(&nack);
        let messages = parse_compound(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            RtcpMessage::Nack(parsed) => {
                assert_eq!(parsed.src_ssrc, 0x11223344);
                assert_eq!(parsed.media_ssrc, 0x55667788);
                assert_eq!(parsed.lost_ids, vec![5, 7, 8, 30]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_sender_report_shape() {
        let report = build_sender_report(42, 100, 0, 90000, 10, 1000);
        assert_eq!(report.len(), 28);
        assert_eq!(report[1], RTCP_SENDER_REPORT);
        let parsed = parse_compound(&report).unwrap();
        assert!(matches!(parsed[0], RtcpMessage::Other { packet_type } if packet_type == 200));
    }

    #[test]
    fn test_seq_wrap_in_blp() {
        let nack = Nack {
            src_ssrc: 1,
            media_ssrc: 2,
            lost_ids: vec![65535, 0, 1],
        };
        let wire = build_nack(&nack);
        let messages = parse_compound(&wire).unwrap();
        match &messages[0] {
            RtcpMessage::Nack(parsed) => assert_eq!(parsed.lost_ids, vec![65535, 0, 1]),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
