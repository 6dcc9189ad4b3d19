use {
    super::chunk::ChunkInfo,
    crate::bytesio::bytes_reader::BytesReader,
    crate::flv::amf0::{errors::Amf0Error, Amf0Reader, Amf0Value},
    byteorder::BigEndian,
    bytes::BytesMut,
};

pub mod msg_type_id {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL_EVENT: u8 = 4;
    pub const WIN_ACKNOWLEDGEMENT_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF3: u8 = 15;
    pub const COMMAND_AMF3: u8 = 17;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;
}

pub mod user_control_event {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

/// A complete message lifted out of the chunk stream.
#[derive(Debug)]
pub enum RtmpMessage {
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        others: Vec<Amf0Value>,
    },
    Amf0Data {
        values: Vec<Amf0Value>,
    },
    Audio {
        timestamp: u32,
        data: BytesMut,
    },
    Video {
        timestamp: u32,
        data: BytesMut,
    },
    SetChunkSize {
        chunk_size: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    WindowAcknowledgementSize {
        size: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: u8,
    },
    UserControl {
        event_type: u16,
        data: BytesMut,
    },
    Abort,
    /// AMF3 or anything else this server ignores.
    Unknown {
        msg_type_id: u8,
    },
}

pub struct MessageParser;

impl MessageParser {
    pub fn parse(chunk: ChunkInfo) -> Result<RtmpMessage, Amf0Error> {
        let timestamp = chunk.message_header.timestamp;
        let mut reader = BytesReader::new(chunk.payload);

        match chunk.message_header.msg_type_id {
            msg_type_id::COMMAND_AMF0 => {
                let mut values = Amf0Reader::read_all(&mut reader)?;
                let mut drain = values.drain(..);
                let command_name = match drain.next() {
                    Some(Amf0Value::UTF8String(name)) => name,
                    _ => String::new(),
                };
                let transaction_id = match drain.next() {
                    Some(Amf0Value::Number(id)) => id,
                    _ => 0.0,
                };
                let command_object = drain.next().unwrap_or(Amf0Value::Null);
                Ok(RtmpMessage::Amf0Command {
                    command_name,
                    transaction_id,
                    command_object,
                    others: drain.collect(),
                })
            }
            msg_type_id::DATA_AMF0 => Ok(RtmpMessage::Amf0Data {
                values: Amf0Reader::read_all(&mut reader)?,
            }),
            msg_type_id::AUDIO => Ok(RtmpMessage::Audio {
                timestamp,
                data: reader.extract_remaining_bytes(),
            }),
            msg_type_id::VIDEO => Ok(RtmpMessage::Video {
                timestamp,
                data: reader.extract_remaining_bytes(),
            }),
            msg_type_id::SET_CHUNK_SIZE => Ok(RtmpMessage::SetChunkSize {
                chunk_size: reader.read_u32::<BigEndian>()? & 0x7FFF_FFFF,
            }),
            msg_type_id::ACKNOWLEDGEMENT => Ok(RtmpMessage::Acknowledgement {
                sequence_number: reader.read_u32::<BigEndian>()?,
            }),
            msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE => {
                Ok(RtmpMessage::WindowAcknowledgementSize {
                    size: reader.read_u32::<BigEndian>()?,
                })
            }
            msg_type_id::SET_PEER_BANDWIDTH => Ok(RtmpMessage::SetPeerBandwidth {
                size: reader.read_u32::<BigEndian>()?,
                limit_type: reader.read_u8()?,
            }),
            msg_type_id::USER_CONTROL_EVENT => Ok(RtmpMessage::UserControl {
                event_type: reader.read_u16::<BigEndian>()?,
                data: reader.extract_remaining_bytes(),
            }),
            msg_type_id::ABORT => Ok(RtmpMessage::Abort),
            other => Ok(RtmpMessage::Unknown { msg_type_id: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytesio::bytes_writer::BytesWriter;
    use crate::flv::amf0::Amf0Writer;
    use crate::rtmp::chunk::{ChunkInfo, csid};
    use std::collections::HashMap;

    #[test]
    fn test_parse_connect_command() {
        let mut writer = BytesWriter::new();
        Amf0Writer::write_string(&mut writer, "connect").unwrap();
        Amf0Writer::write_number(&mut writer, 1.0).unwrap();
        let mut object = HashMap::new();
        object.insert("app".to_string(), Amf0Value::UTF8String("live".to_string()));
        Amf0Writer::write_object(&mut writer, &object).unwrap();

        let payload = writer.extract_current_bytes();
        let chunk = ChunkInfo::new(
            csid::COMMAND,
            0,
            0,
            payload.len() as u32,
            msg_type_id::COMMAND_AMF0,
            0,
            payload,
        );

        match MessageParser::parse(chunk).unwrap() {
            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                ..
            } => {
                assert_eq!(command_name, "connect");
                assert_eq!(transaction_id, 1.0);
                assert_eq!(
                    command_object.property("app").and_then(Amf0Value::as_str),
                    Some("live")
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
