use {
    super::{crc32::crc32_mpeg, define, errors::MpegTsError},
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::BigEndian,
    bytes::BytesMut,
};

/// Program Association Table: one program pointing at the PMT pid.
pub struct PatMuxer;

impl PatMuxer {
    pub fn write() -> Result<BytesMut, MpegTsError> {
        let mut section = BytesWriter::new();
        section.write_u8(0x00)?; // table_id
        // section_syntax_indicator | '0' | reserved | section_length (13)
        section.write_u16::<BigEndian>(0xB000 | 13)?;
        section.write_u16::<BigEndian>(1)?; // transport_stream_id
        section.write_u8(0xC1)?; // version 0, current_next 1
        section.write_u8(0)?; // section_number
        section.write_u8(0)?; // last_section_number
        section.write_u16::<BigEndian>(1)?; // program_number
        section.write_u16::<BigEndian>(0xE000 | define::PMT_PID)?;

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
    fn test_pat_shape() {
        let pat = PatMuxer::write().unwrap();
        assert_eq!(pat[0], 0); // pointer field
        assert_eq!(pat[1], 0); // table id
        // 13-byte section after the 3-byte header, plus pointer field.
        assert_eq!(pat.len(), 1 + 3 + 13);
    }
}
