use {
    super::errors::{CodecDataError, CodecDataErrorValue},
    crate::bytesio::bits_reader::BitsReader,
    bytes::{BufMut, Bytes, BytesMut},
};

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Parsed MPEG-4 `AudioSpecificConfig` (the AAC sequence header payload).
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn parse(extradata: &[u8]) -> Result<Self, CodecDataError> {
        let mut bits = BitsReader::new(extradata);

        let mut object_type = bits.read_bits(5)? as u8;
        if object_type == 31 {
            object_type = 32 + bits.read_bits(6)? as u8;
        }

        let sampling_frequency_index = bits.read_bits(4)? as u8;
        let sample_rate = if sampling_frequency_index == 0xF {
            bits.read_bits(24)?
        } else {
            *SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .ok_or(CodecDataErrorValue::InvalidSamplingFrequency(
                    sampling_frequency_index,
                ))?
        };

        let channel_configuration = bits.read_bits(4)? as u8;

        Ok(Self {
            object_type,
            sampling_frequency_index,
            sample_rate,
            channel_configuration,
        })
    }

    /// 7-byte ADTS header + raw frame, as MPEG-TS PES payloads expect.
    #[must_use]
    pub fn wrap_adts(&self, raw_frame: &[u8]) -> Bytes {
        let frame_len = raw_frame.len() + 7;
        let profile = self.object_type.saturating_sub(1) & 0b11;

        let mut out = BytesMut::with_capacity(frame_len);
        out.put_u8(0xFF);
        out.put_u8(0xF1); // MPEG-4, no CRC
        out.put_u8((profile << 6) | ((self.sampling_frequency_index & 0xF) << 2)
            | ((self.channel_configuration >> 2) & 0b1));
        out.put_u8(((self.channel_configuration & 0b11) << 6) | ((frame_len >> 11) & 0b11) as u8);
        out.put_u8(((frame_len >> 3) & 0xFF) as u8);
        out.put_u8((((frame_len & 0b111) << 5) | 0b11111) as u8);
        out.put_u8(0xFC);
        out.put_slice(raw_frame);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::AudioSpecificConfig;

    #[test]
    fn test_parse_lc_44100_stereo() {
        // AAC-LC (2), 44.1 kHz (index 4), stereo: 00010 0100 0010 ...
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channel_configuration, 2);
    }

    #[test]
    fn test_adts_header_length_field() {
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        let framed = config.wrap_adts(&[0u8; 100]);
        assert_eq!(framed.len(), 107);
        assert_eq!(framed[0], 0xFF);
        let len = ((u32::from(framed[3]) & 0b11) << 11)
            | (u32::from(framed[4]) << 3)
            | (u32::from(framed[5]) >> 5);
        assert_eq!(len, 107);
    }
}
