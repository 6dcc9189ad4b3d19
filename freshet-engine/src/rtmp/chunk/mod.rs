pub mod errors;
pub mod packetizer;
pub mod unpacketizer;

use bytes::BytesMut;

/// Chunks start at 128 bytes until a SetChunkSize message raises it.
pub const INIT_CHUNK_SIZE: usize = 128;

/// Chunk stream ids this server emits on.
pub mod csid {
    pub const PROTOCOL_CONTROL: u32 = 2;
    pub const COMMAND: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const VIDEO: u32 = 6;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkBasicHeader {
    pub format: u8,
    pub chunk_stream_id: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkMessageHeader {
    pub timestamp: u32,
    pub timestamp_delta: u32,
    pub msg_length: u32,
    pub msg_type_id: u8,
    pub msg_stream_id: u32,
    pub extended_timestamp: bool,
}

#[derive(Debug, Default)]
pub struct ChunkInfo {
    pub basic_header: ChunkBasicHeader,
    pub message_header: ChunkMessageHeader,
    pub payload: BytesMut,
}

impl ChunkInfo {
    #[must_use]
    pub fn new(
        chunk_stream_id: u32,
        format: u8,
        timestamp: u32,
        msg_length: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Self {
        Self {
            basic_header: ChunkBasicHeader {
                format,
                chunk_stream_id,
            },
            message_header: ChunkMessageHeader {
                timestamp,
                timestamp_delta: 0,
                msg_length,
                msg_type_id,
                msg_stream_id,
                extended_timestamp: false,
            },
            payload,
        }
    }
}
