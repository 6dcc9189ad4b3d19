use {
    super::{
        errors::{UnpackError, UnpackErrorValue},
        ChunkBasicHeader, ChunkInfo, ChunkMessageHeader, INIT_CHUNK_SIZE,
    },
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::{BigEndian, LittleEndian, ReadBytesExt},
    bytes::BytesMut,
    std::collections::HashMap,
    std::io::Cursor,
};

/// Refuse messages above 10 MB; nothing legitimate is that large.
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
enum ChunkReadState {
    ReadBasicHeader,
    ReadMessageHeader(ChunkBasicHeader),
    ReadMessagePayload { csid: u32, remaining: usize },
}

/// Incremental RTMP chunk-stream parser.
///
/// Feed network bytes with `extend_data`, then call `update` until it
/// returns an empty batch. Header reads are transactional: a header is
/// only consumed once every byte it needs has arrived, so a partial read
/// never corrupts parser state.
pub struct ChunkUnpacketizer {
    reader: BytesReader,
    state: ChunkReadState,
    /// Per-chunk-stream header memory; formats 1-3 inherit from here.
    message_headers: HashMap<u32, ChunkMessageHeader>,
    /// Per-chunk-stream partial message bodies.
    payloads: HashMap<u32, BytesMut>,
    max_chunk_size: usize,
}

impl Default for ChunkUnpacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkUnpacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BytesReader::new(BytesMut::new()),
            state: ChunkReadState::ReadBasicHeader,
            message_headers: HashMap::new(),
            payloads: HashMap::new(),
            max_chunk_size: INIT_CHUNK_SIZE,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.reader.extend_from_slice(data);
    }

    /// React to an inbound SetChunkSize.
    pub fn update_max_chunk_size(&mut self, size: usize) {
        self.max_chunk_size = size.clamp(1, MAX_MESSAGE_SIZE);
    }

    /// Parse as many complete messages as the buffered bytes allow.
    pub fn update(&mut self) -> Result<Vec<ChunkInfo>, UnpackError> {
        let mut chunks = Vec::new();

        loop {
            match self.state {
                ChunkReadState::ReadBasicHeader => {
                    let Some(basic_header) = self.read_basic_header()? else {
                        return Ok(chunks);
                    };
                    self.state = ChunkReadState::ReadMessageHeader(basic_header);
                }
                ChunkReadState::ReadMessageHeader(basic_header) => {
                    let Some(remaining) = self.read_message_header(basic_header)? else {
                        return Ok(chunks);
                    };
                    self.state = ChunkReadState::ReadMessagePayload {
                        csid: basic_header.chunk_stream_id,
                        remaining,
                    };
                }
                ChunkReadState::ReadMessagePayload { csid, remaining } => {
                    match self.read_payload(csid, remaining, &mut chunks)? {
                        Some(next) => self.state = next,
                        None => return Ok(chunks),
                    }
                }
            }
        }
    }

    fn read_basic_header(&mut self) -> Result<Option<ChunkBasicHeader>, UnpackError> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        let byte0 = self.reader.advance_u8()?;
        let format = byte0 >> 6;
        let header_size = match byte0 & 0x3F {
            0 => 2,
            1 => 3,
            _ => 1,
        };
        if self.reader.len() < header_size {
            return Ok(None);
        }

        let bytes = self.reader.read_bytes(header_size)?;
        let chunk_stream_id = match byte0 & 0x3F {
            0 => 64 + u32::from(bytes[1]),
            1 => 64 + u32::from(bytes[1]) + u32::from(bytes[2]) * 256,
            id => u32::from(id),
        };

        Ok(Some(ChunkBasicHeader {
            format,
            chunk_stream_id,
        }))
    }

    fn read_message_header(
        &mut self,
        basic_header: ChunkBasicHeader,
    ) -> Result<Option<usize>, UnpackError> {
        let csid = basic_header.chunk_stream_id;
        let base_size = match basic_header.format {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };

        if self.reader.len() < base_size {
            return Ok(None);
        }

        // Peek the fixed part to learn whether an extended timestamp
        // follows, then consume the whole header in one step.
        let peeked = if base_size > 0 {
            self.reader.advance_bytes(base_size)?
        } else {
            BytesMut::new()
        };

        let needs_extended = if base_size >= 3 {
            let mut cursor = Cursor::new(&peeked[..3]);
            cursor.read_u24::<BigEndian>().unwrap_or(0) == 0xFF_FFFF
        } else {
            // Format 3 repeats the extended timestamp when the previous
            // chunk on this stream carried one.
            self.message_headers
                .get(&csid)
                .is_some_and(|h| h.extended_timestamp)
        };

        let total = base_size + if needs_extended { 4 } else { 0 };
        if self.reader.len() < total {
            return Ok(None);
        }

        let bytes = self.reader.read_bytes(total)?;
        let mut cursor = Cursor::new(&bytes[..]);

        let starting_new_message = self
            .payloads
            .get(&csid)
            .map_or(true, BytesMut::is_empty);

        let mut header = match basic_header.format {
            0 => {
                let timestamp = cursor.read_u24::<BigEndian>()?;
                let msg_length = cursor.read_u24::<BigEndian>()?;
                let msg_type_id = cursor.read_u8()?;
                let msg_stream_id = cursor.read_u32::<LittleEndian>()?;
                let (timestamp, extended) = if timestamp == 0xFF_FFFF {
                    (cursor.read_u32::<BigEndian>()?, true)
                } else {
                    (timestamp, false)
                };
                ChunkMessageHeader {
                    timestamp,
                    timestamp_delta: 0,
                    msg_length,
                    msg_type_id,
                    msg_stream_id,
                    extended_timestamp: extended,
                }
            }
            1 | 2 => {
                let mut header = *self
                    .message_headers
                    .get(&csid)
                    .ok_or(UnpackErrorValue::UnknownMessageHeader(csid))?;
                let delta = cursor.read_u24::<BigEndian>()?;
                if basic_header.format == 1 {
                    header.msg_length = cursor.read_u24::<BigEndian>()?;
                    header.msg_type_id = cursor.read_u8()?;
                }
                let (delta, extended) = if delta == 0xFF_FFFF {
                    (cursor.read_u32::<BigEndian>()?, true)
                } else {
                    (delta, false)
                };
                header.timestamp_delta = delta;
                header.extended_timestamp = extended;
                if starting_new_message {
                    header.timestamp = header.timestamp.wrapping_add(delta);
                }
                header
            }
            _ => {
                let mut header = *self
                    .message_headers
                    .get(&csid)
                    .ok_or(UnpackErrorValue::UnknownMessageHeader(csid))?;
                if needs_extended {
                    // The extended field on a format-3 chunk just repeats
                    // the previous value.
                    let _ = cursor.read_u32::<BigEndian>()?;
                }
                if starting_new_message {
                    header.timestamp = header.timestamp.wrapping_add(header.timestamp_delta);
                }
                header
            }
        };

        if header.msg_length as usize > MAX_MESSAGE_SIZE {
            return Err(UnpackErrorValue::MessageTooLarge(header.msg_length as usize).into());
        }
        if basic_header.format == 0 {
            header.timestamp_delta = 0;
        }
        self.message_headers.insert(csid, header);

        let collected = self.payloads.entry(csid).or_default().len();
        let remaining_of_message = (header.msg_length as usize).saturating_sub(collected);
        Ok(Some(remaining_of_message.min(self.max_chunk_size)))
    }

    fn read_payload(
        &mut self,
        csid: u32,
        remaining: usize,
        chunks: &mut Vec<ChunkInfo>,
    ) -> Result<Option<ChunkReadState>, UnpackError> {
        let take = remaining.min(self.reader.len());
        if take > 0 {
            let bytes = self.reader.read_bytes(take)?;
            self.payloads.entry(csid).or_default().extend_from_slice(&bytes);
        }
        let still_needed = remaining - take;
        if still_needed > 0 {
            self.state = ChunkReadState::ReadMessagePayload {
                csid,
                remaining: still_needed,
            };
            return Ok(None);
        }

        let header = *self
            .message_headers
            .get(&csid)
            .ok_or(UnpackErrorValue::UnknownMessageHeader(csid))?;
        let payload = self.payloads.entry(csid).or_default();

        if payload.len() >= header.msg_length as usize {
            let payload = payload.split_to(header.msg_length as usize);
            chunks.push(ChunkInfo {
                basic_header: ChunkBasicHeader {
                    format: 0,
                    chunk_stream_id: csid,
                },
                message_header: header,
                payload,
            });
        }
        Ok(Some(ChunkReadState::ReadBasicHeader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::messages::msg_type_id;

    #[test]
    fn test_single_fmt0_message() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        // csid 3, fmt 0, ts 100, len 4, type 20, stream id 0, payload "abcd"
        let mut data = vec![0x03];
        data.extend_from_slice(&[0x00, 0x00, 0x64]); // ts
        data.extend_from_slice(&[0x00, 0x00, 0x04]); // len
        data.push(msg_type_id::COMMAND_AMF0);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // stream id (LE)
        data.extend_from_slice(b"abcd");

        unpacketizer.extend_data(&data);
        let chunks = unpacketizer.update().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].message_header.timestamp, 100);
        assert_eq!(chunks[0].message_header.msg_type_id, msg_type_id::COMMAND_AMF0);
        assert_eq!(&chunks[0].payload[..], b"abcd");
    }

    #[test]
    fn test_message_split_across_chunks() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        unpacketizer.update_max_chunk_size(4);

        // 6-byte message arrives as a 4-byte fmt0 chunk + 2-byte fmt3 chunk.
        let mut data = vec![0x08]; // fmt 0, csid 8
        data.extend_from_slice(&[0x00, 0x00, 0x10]);
        data.extend_from_slice(&[0x00, 0x00, 0x06]);
        data.push(msg_type_id::VIDEO);
        data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        data.extend_from_slice(b"abcd");
        data.push(0xC8); // fmt 3, csid 8
        data.extend_from_slice(b"ef");

        unpacketizer.extend_data(&data);
        let chunks = unpacketizer.update().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].payload[..], b"abcdef");
        assert_eq!(chunks[0].message_header.msg_stream_id, 1);
    }

    #[test]
    fn test_partial_feed_resumes() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        let mut data = vec![0x03];
        data.extend_from_slice(&[0x00, 0x00, 0x01]);
        data.extend_from_slice(&[0x00, 0x00, 0x02]);
        data.push(msg_type_id::COMMAND_AMF0);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(b"xy");

        // Feed byte by byte; nothing must be lost or duplicated.
        let mut total = Vec::new();
        for byte in data {
            unpacketizer.extend_data(&[byte]);
            total.extend(unpacketizer.update().unwrap());
        }
        assert_eq!(total.len(), 1);
        assert_eq!(&total[0].payload[..], b"xy");
    }

    #[test]
    fn test_fmt1_delta_accumulates() {
        let mut unpacketizer = ChunkUnpacketizer::new();
        let mut data = vec![0x03];
        data.extend_from_slice(&[0x00, 0x00, 0x0A]); // ts 10
        data.extend_from_slice(&[0x00, 0x00, 0x01]);
        data.push(msg_type_id::AUDIO);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data.push(b'a');
        // fmt1: delta 5, len 1, type audio
        data.push(0x43);
        data.extend_from_slice(&[0x00, 0x00, 0x05]);
        data.extend_from_slice(&[0x00, 0x00, 0x01]);
        data.push(msg_type_id::AUDIO);
        data.push(b'b');

        unpacketizer.extend_data(&data);
        let chunks = unpacketizer.update().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].message_header.timestamp, 10);
        assert_eq!(chunks[1].message_header.timestamp, 15);
    }
}
