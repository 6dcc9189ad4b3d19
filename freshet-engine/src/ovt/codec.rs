use {
    crate::bytesio::bytes_errors::{BytesReadError, BytesReadErrorValue},
    crate::media::{
        CodecId, FragmentationHeader, MediaPacket, PacketFlag, Timebase,
    },
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    bytes::{BufMut, Bytes, BytesMut},
    std::io::Cursor,
};

pub const OVT_MAGIC: u32 = 0x4F56_5431; // "OVT1"

pub mod message_type {
    pub const DESCRIBE: u8 = 1;
    pub const DESCRIBE_REPLY: u8 = 2;
    pub const PLAY: u8 = 3;
    pub const STOP: u8 = 4;
    pub const PACKET: u8 = 5;
    pub const ERROR: u8 = 6;
}

/// One framed OVT message: `magic | type | payload_len | payload`.
#[derive(Debug)]
pub struct OvtMessage {
    pub message_type: u8,
    pub payload: Bytes,
}

impl OvtMessage {
    #[must_use]
    pub fn marshal(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(9 + self.payload.len());
        out.put_u32(OVT_MAGIC);
        out.put_u8(self.message_type);
        out.put_u32(self.payload.len() as u32);
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Try to lift one message off the front of `buffer`.
    pub fn unmarshal(buffer: &mut BytesMut) -> Result<Option<Self>, BytesReadError> {
        if buffer.len() < 9 {
            return Ok(None);
        }
        let magic = u32::from_be_bytes(buffer[0..4].try_into().unwrap());
        if magic != OVT_MAGIC {
            return Err(BytesReadErrorValue::IndexOutofRange.into());
        }
        let length = u32::from_be_bytes(buffer[5..9].try_into().unwrap()) as usize;
        if buffer.len() < 9 + length {
            return Ok(None);
        }
        let message_type = buffer[4];
        let mut frame = buffer.split_to(9 + length);
        let payload = frame.split_off(9).freeze();
        Ok(Some(Self {
            message_type,
            payload,
        }))
    }
}

/// Serialize one media packet for edge forwarding: fixed header, the
/// fragmentation table, then the payload bytes.
#[must_use]
pub fn marshal_packet(packet: &MediaPacket) -> Bytes {
    let fragments = packet
        .fragmentation
        .as_ref()
        .map(|f| f.fragments.as_slice())
        .unwrap_or_default();

    let mut out = BytesMut::with_capacity(40 + fragments.len() * 8 + packet.data.len());
    let _ = (&mut out).writer().write_u32::<BigEndian>(packet.track_id);
    out.put_u8(codec_to_wire(packet.codec_id));
    out.put_u8(u8::from(packet.flag == PacketFlag::Key));
    let _ = (&mut out).writer().write_i64::<BigEndian>(packet.pts);
    let _ = (&mut out).writer().write_i64::<BigEndian>(packet.dts);
    let _ = (&mut out).writer().write_i64::<BigEndian>(packet.duration);
    let _ = (&mut out).writer().write_u32::<BigEndian>(packet.timebase.num);
    let _ = (&mut out).writer().write_u32::<BigEndian>(packet.timebase.den);
    let _ = (&mut out)
        .writer()
        .write_u16::<BigEndian>(fragments.len() as u16);
    for &(offset, length) in fragments {
        let _ = (&mut out).writer().write_u32::<BigEndian>(offset as u32);
        let _ = (&mut out).writer().write_u32::<BigEndian>(length as u32);
    }
    out.put_slice(&packet.data);
    out.freeze()
}

pub fn unmarshal_packet(payload: &[u8]) -> Result<MediaPacket, BytesReadError> {
    let mut cursor = Cursor::new(payload);
    let track_id = cursor.read_u32::<BigEndian>()?;
    let codec_id = codec_from_wire(cursor.read_u8()?)?;
    let keyframe = cursor.read_u8()? != 0;
    let pts = cursor.read_i64::<BigEndian>()?;
    let dts = cursor.read_i64::<BigEndian>()?;
    let duration = cursor.read_i64::<BigEndian>()?;
    let num = cursor.read_u32::<BigEndian>()?;
    let den = cursor.read_u32::<BigEndian>()?;
    let fragment_count = cursor.read_u16::<BigEndian>()? as usize;

    let mut fragments = Vec::with_capacity(fragment_count);
    for _ in 0..fragment_count {
        let offset = cursor.read_u32::<BigEndian>()? as usize;
        let length = cursor.read_u32::<BigEndian>()? as usize;
        fragments.push((offset, length));
    }

    let data_start = cursor.position() as usize;
    Ok(MediaPacket {
        track_id,
        codec_id,
        data: Bytes::copy_from_slice(&payload[data_start..]),
        pts,
        dts,
        duration,
        timebase: Timebase::new(num.max(1), den.max(1)),
        flag: if keyframe { PacketFlag::Key } else { PacketFlag::Delta },
        fragmentation: if fragments.is_empty() {
            None
        } else {
            Some(FragmentationHeader::new(fragments))
        },
    })
}

fn codec_to_wire(codec: CodecId) -> u8 {
    match codec {
        CodecId::H264 => 1,
        CodecId::H265 => 2,
        CodecId::Vp8 => 3,
        CodecId::Opus => 4,
        CodecId::Aac => 5,
    }
}

fn codec_from_wire(value: u8) -> Result<CodecId, BytesReadError> {
    match value {
        1 => Ok(CodecId::H264),
        2 => Ok(CodecId::H265),
        3 => Ok(CodecId::Vp8),
        4 => Ok(CodecId::Opus),
        5 => Ok(CodecId::Aac),
        _ => Err(BytesReadErrorValue::IndexOutofRange.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_framing() {
        let message = OvtMessage {
            message_type: message_type::PLAY,
            payload: Bytes::from_static(b"live/cam"),
        };
        let wire = message.marshal();

        let mut buffer = BytesMut::from(&wire[..3]);
        assert!(OvtMessage::unmarshal(&mut buffer).unwrap().is_none());
        buffer.extend_from_slice(&wire[3..]);
        let parsed = OvtMessage::unmarshal(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed.message_type, message_type::PLAY);
        assert_eq!(&parsed.payload[..], b"live/cam");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_packet_roundtrip() {
        let packet = MediaPacket {
            track_id: 3,
            codec_id: CodecId::H264,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xAA]),
            pts: 1234,
            dts: 1200,
            duration: 33,
            timebase: Timebase::new(1, 90000),
            flag: PacketFlag::Key,
            fragmentation: Some(FragmentationHeader::new(vec![(4, 2)])),
        };
        let wire = marshal_packet(&packet);
        let parsed = unmarshal_packet(&wire).unwrap();
        assert_eq!(parsed.track_id, 3);
        assert_eq!(parsed.codec_id, CodecId::H264);
        assert_eq!(parsed.pts, 1234);
        assert_eq!(parsed.dts, 1200);
        assert_eq!(parsed.timebase, Timebase::new(1, 90000));
        assert!(parsed.is_key());
        assert_eq!(parsed.fragmentation.unwrap().fragments, vec![(4, 2)]);
        assert_eq!(&parsed.data[..], &packet.data[..]);
    }
}
