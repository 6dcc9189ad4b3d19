use {
    super::define::{aac_packet_type, avc_packet_type, frame_type, sound_format, video_codec_id},
    super::errors::{FlvDemuxerError, FlvDemuxerErrorValue},
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::BigEndian,
    bytes::{Bytes, BytesMut},
};

/// One demultiplexed FLV video tag body.
#[derive(Debug)]
pub enum VideoTag {
    /// AVCC / HVCC extradata.
    SequenceHeader { codec_id: u8, config: Bytes },
    Frame {
        codec_id: u8,
        keyframe: bool,
        /// Composition-time offset: `pts = dts + cts`.
        cts: i32,
        /// Length-prefixed (AVCC) NAL units.
        data: Bytes,
    },
    EndOfSequence,
}

/// One demultiplexed FLV audio tag body.
#[derive(Debug)]
pub enum AudioTag {
    /// AudioSpecificConfig extradata.
    SequenceHeader { config: Bytes },
    Frame { data: Bytes },
}

/// Splits RTMP audio/video message payloads (FLV tag bodies) into typed tags.
pub struct FlvTagDemuxer;

impl FlvTagDemuxer {
    pub fn demux_video(data: BytesMut) -> Result<VideoTag, FlvDemuxerError> {
        let mut reader = BytesReader::new(data);

        let header = reader.read_u8()?;
        let frame = header >> 4;
        let codec_id = header & 0x0F;
        if codec_id != video_codec_id::AVC && codec_id != video_codec_id::HEVC {
            return Err(FlvDemuxerErrorValue::UnsupportedVideoCodec(codec_id).into());
        }

        let packet_type = reader.read_u8()?;
        let cts_raw = reader.read_u24::<BigEndian>()?;
        // Sign-extend the 24-bit composition time.
        let cts = ((cts_raw as i32) << 8) >> 8;

        match packet_type {
            avc_packet_type::SEQ_HEADER => Ok(VideoTag::SequenceHeader {
                codec_id,
                config: reader.extract_remaining_bytes().freeze(),
            }),
            avc_packet_type::NALU => Ok(VideoTag::Frame {
                codec_id,
                keyframe: frame == frame_type::KEY_FRAME,
                cts,
                data: reader.extract_remaining_bytes().freeze(),
            }),
            avc_packet_type::END_OF_SEQUENCE => Ok(VideoTag::EndOfSequence),
            other => Err(FlvDemuxerErrorValue::UnsupportedVideoCodec(other).into()),
        }
    }

    pub fn demux_audio(data: BytesMut) -> Result<AudioTag, FlvDemuxerError> {
        let mut reader = BytesReader::new(data);

        let header = reader.read_u8()?;
        let format = header >> 4;
        if format != sound_format::AAC {
            return Err(FlvDemuxerErrorValue::UnsupportedSoundFormat(format).into());
        }

        let packet_type = reader.read_u8()?;
        match packet_type {
            aac_packet_type::SEQ_HEADER => Ok(AudioTag::SequenceHeader {
                config: reader.extract_remaining_bytes().freeze(),
            }),
            _ => Ok(AudioTag::Frame {
                data: reader.extract_remaining_bytes().freeze(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_sequence_header() {
        let mut payload = vec![0x17, 0x00, 0x00, 0x00, 0x00]; // keyframe | avc, seq header, cts 0
        payload.extend_from_slice(&[0x01, 0x42, 0xC0, 0x28]);
        match FlvTagDemuxer::demux_video(BytesMut::from(&payload[..])).unwrap() {
            VideoTag::SequenceHeader { codec_id, config } => {
                assert_eq!(codec_id, video_codec_id::AVC);
                assert_eq!(config[1], 0x42);
            }
            other => panic!("unexpected tag: {other:?}"),
        }
    }

    #[test]
    fn test_video_nalu_with_negative_cts() {
        let payload = [0x27, 0x01, 0xFF, 0xFF, 0xFE, 0xAA]; // inter | avc, nalu, cts -2
        match FlvTagDemuxer::demux_video(BytesMut::from(&payload[..])).unwrap() {
            VideoTag::Frame { keyframe, cts, data, .. } => {
                assert!(!keyframe);
                assert_eq!(cts, -2);
                assert_eq!(&data[..], &[0xAA]);
            }
            other => panic!("unexpected tag: {other:?}"),
        }
    }

    #[test]
    fn test_audio_raw_frame() {
        let payload = [0xAF, 0x01, 0x21, 0x17];
        match FlvTagDemuxer::demux_audio(BytesMut::from(&payload[..])).unwrap() {
            AudioTag::Frame { data } => assert_eq!(&data[..], &[0x21, 0x17]),
            other => panic!("unexpected tag: {other:?}"),
        }
    }
}
