use {
    super::{errors::PackError, ChunkInfo},
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::{BigEndian, LittleEndian},
    bytes::BytesMut,
};

/// Serializes one message as a format-0 chunk plus format-3 continuations.
pub struct ChunkPacketizer {
    max_chunk_size: usize,
}

impl Default for ChunkPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkPacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_chunk_size: super::INIT_CHUNK_SIZE,
        }
    }

    /// Applied after this side sends SetChunkSize.
    pub fn update_max_chunk_size(&mut self, size: usize) {
        self.max_chunk_size = size.max(1);
    }

    pub fn write_chunk(&self, info: &ChunkInfo) -> Result<BytesMut, PackError> {
        let mut writer = BytesWriter::new();
        let csid = info.basic_header.chunk_stream_id;
        let header = &info.message_header;

        let extended = header.timestamp >= 0xFF_FFFF;
        let header_timestamp = if extended { 0xFF_FFFF } else { header.timestamp };

        // Format 0 basic header; csids above 63 use the 2-byte form.
        if csid < 64 {
            writer.write_u8(csid as u8)?;
        } else {
            writer.write_u8(0)?;
            writer.write_u8((csid - 64) as u8)?;
        }
        writer.write_u24::<BigEndian>(header_timestamp)?;
        writer.write_u24::<BigEndian>(info.payload.len() as u32)?;
        writer.write_u8(header.msg_type_id)?;
        writer.write_u32::<LittleEndian>(header.msg_stream_id)?;
        if extended {
            writer.write_u32::<BigEndian>(header.timestamp)?;
        }

        let mut offset = 0;
        while offset < info.payload.len() {
            if offset > 0 {
                // Continuation chunk.
                if csid < 64 {
                    writer.write_u8(0xC0 | csid as u8)?;
                } else {
                    writer.write_u8(0xC0)?;
                    writer.write_u8((csid - 64) as u8)?;
                }
                if extended {
                    writer.write_u32::<BigEndian>(header.timestamp)?;
                }
            }
            let end = (offset + self.max_chunk_size).min(info.payload.len());
            writer.write(&info.payload[offset..end])?;
            offset = end;
        }

        Ok(writer.extract_current_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::chunk::unpacketizer::ChunkUnpacketizer;
    use crate::rtmp::messages::msg_type_id;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let mut packetizer = ChunkPacketizer::new();
        packetizer.update_max_chunk_size(8);

        let payload = BytesMut::from(&b"0123456789abcdef0123"[..]);
        let info = ChunkInfo::new(3, 0, 1234, payload.len() as u32, msg_type_id::COMMAND_AMF0, 0, payload);
        let wire = packetizer.write_chunk(&info).unwrap();

        let mut unpacketizer = ChunkUnpacketizer::new();
        unpacketizer.update_max_chunk_size(8);
        unpacketizer.extend_data(&wire);
        let chunks = unpacketizer.update().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].message_header.timestamp, 1234);
        assert_eq!(&chunks[0].payload[..], b"0123456789abcdef0123");
    }
}
