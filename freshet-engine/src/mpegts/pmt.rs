use {
    super::{crc32::crc32_mpeg, define, errors::MpegTsError},
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::BigEndian,
    bytes::BytesMut,
};

/// One elementary stream advertised by the PMT.
#[derive(Debug, Clone, Copy)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
}

/// Program Map Table for the single program this muxer produces.
pub struct PmtMuxer;

impl PmtMuxer {
    pub fn write(streams: &[PmtStream], pcr_pid: u16) -> Result<BytesMut, MpegTsError> {
        if streams.is_empty() {
            return Err(super::errors::MpegTsErrorValue::NoProgram.into());
        }

        let section_length = 13 + streams.len() * 5;

        let mut section = BytesWriter::new();
        section.write_u8(0x02)?; // table_id
        section.write_u16::<BigEndian>(0xB000 | section_length as u16)?;
        section.write_u16::<BigEndian>(1)?; // program_number
        section.write_u8(0xC1)?;
        section.write_u8(0)?;
        section.write_u8(0)?;
        section.write_u16::<BigEndian>(0xE000 | pcr_pid)?;
        section.write_u16::<BigEndian>(0xF000)?; // program_info_length 0

        for stream in streams {
            section.write_u8(stream.stream_type)?;
            section.write_u16::<BigEndian>(0xE000 | stream.pid)?;
            section.write_u16::<BigEndian>(0xF000)?; // ES_info_length 0
        }

        let crc = crc32_mpeg(&section.get_current_bytes());
        section.write_u32::<BigEndian>(crc)?;

        let mut writer = BytesWriter::new();
        writer.write_u8(0)?; // pointer_field
        writer.write(&section.get_current_bytes())?;
        Ok(writer.extract_current_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmt_lists_streams() {
        let streams = [
            PmtStream {
                stream_type: define::stream_type::H264,
                pid: define::VIDEO_PID,
            },
            PmtStream {
                stream_type: define::stream_type::AAC,
                pid: define::AUDIO_PID,
            },
        ];
        let pmt = PmtMuxer::write(&streams, define::VIDEO_PID).unwrap();
        assert_eq!(pmt[1], 0x02);
        assert_eq!(pmt.len(), 1 + 3 + 13 + streams.len() * 5);
        assert_eq!(pmt[13], define::stream_type::H264);
    }
}
