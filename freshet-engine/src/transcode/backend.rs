use {
    super::errors::{TranscodeError, TranscodeErrorValue},
    crate::media::{
        ChannelLayout, CodecId, FrameFormat, MediaFrame, MediaPacket, PacketFlag, Timebase,
    },
    bytes::Bytes,
};

/// H.264 profile selection. Browsers negotiate Baseline reliably, so the
/// encoder policy pins it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoProfile {
    Baseline,
    Main,
}

#[derive(Debug, Clone)]
pub struct DecoderSpec {
    pub codec: CodecId,
    pub timebase: Timebase,
    pub extradata: Option<Bytes>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
}

#[derive(Debug, Clone)]
pub struct EncoderSpec {
    pub codec: CodecId,
    pub timebase: Timebase,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    /// Closed GOP, one IDR per GOP.
    pub gop_size: u32,
    /// Always zero: B-frames break WebRTC playback.
    pub max_b_frames: u32,
    pub profile: VideoProfile,
    /// Low-latency tuning: no scene-cut keyframes, no sliced threads.
    pub scene_cut: bool,
    pub sliced_threads: bool,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    /// Opus in-band FEC.
    pub inband_fec: bool,
}

impl EncoderSpec {
    /// Video policy: fixed GOP = one second of frames, no B-frames,
    /// Baseline, zero-latency tuning.
    #[must_use]
    pub fn video(codec: CodecId, width: u32, height: u32, framerate: f64, bitrate: u64) -> Self {
        Self {
            codec,
            timebase: Timebase::new(1, 90000),
            bitrate,
            width,
            height,
            framerate,
            gop_size: framerate.round() as u32,
            max_b_frames: 0,
            profile: VideoProfile::Baseline,
            scene_cut: false,
            sliced_threads: false,
            sample_rate: 0,
            channel_layout: ChannelLayout::Mono,
            inband_fec: false,
        }
    }

    /// Audio policy: Opus with in-band FEC; stereo only when the input
    /// layout is stereo.
    #[must_use]
    pub fn audio(
        codec: CodecId,
        sample_rate: u32,
        input_layout: ChannelLayout,
        bitrate: u64,
    ) -> Self {
        Self {
            codec,
            timebase: Timebase::new(1, sample_rate),
            bitrate,
            width: 0,
            height: 0,
            framerate: 0.0,
            gop_size: 0,
            max_b_frames: 0,
            profile: VideoProfile::Baseline,
            scene_cut: false,
            sliced_threads: false,
            sample_rate,
            channel_layout: input_layout,
            inband_fec: codec == CodecId::Opus,
        }
    }

    /// Synthesized frame duration in output-timebase ticks, used when the
    /// underlying codec does not pass durations through.
    #[must_use]
    pub fn frame_duration(&self) -> i64 {
        if self.framerate > 0.0 {
            (f64::from(self.timebase.den) / self.framerate).round() as i64
        } else if self.sample_rate > 0 {
            // One Opus/AAC frame worth of samples.
            i64::from(self.timebase.den) * 20 / 1000
        } else {
            1
        }
    }
}

pub trait Decoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<MediaFrame>, TranscodeError>;
}

pub trait Encoder: Send {
    fn encode(&mut self, frame: &MediaFrame) -> Result<Vec<MediaPacket>, TranscodeError>;

    /// Codec private data for the derived track, once known.
    fn extradata(&self) -> Option<Bytes> {
        None
    }
}

pub trait FrameFilter: Send {
    fn filter(&mut self, frame: MediaFrame) -> Result<Option<MediaFrame>, TranscodeError>;
}

/// The hardware-agnostic media-codec library boundary. Construction-time
/// failure here is fatal for the track (the derived stream is removed);
/// per-frame failures inside the returned objects are local.
pub trait CodecLibrary: Send + Sync {
    fn create_decoder(&self, spec: &DecoderSpec) -> Result<Box<dyn Decoder>, TranscodeError>;
    fn create_encoder(&self, spec: &EncoderSpec) -> Result<Box<dyn Encoder>, TranscodeError>;
    fn create_rescaler(
        &self,
        input: &DecoderSpec,
        output: &EncoderSpec,
    ) -> Result<Box<dyn FrameFilter>, TranscodeError>;
    fn create_resampler(
        &self,
        input: &DecoderSpec,
        output: &EncoderSpec,
    ) -> Result<Box<dyn FrameFilter>, TranscodeError>;
}

/// Structural codec library: produces frames/packets that carry correct
/// timing, sizing and keyframe cadence without touching pixel data. Backs
/// the test suite and any deployment that only needs bypass profiles.
pub struct NullCodecLibrary;

impl CodecLibrary for NullCodecLibrary {
    fn create_decoder(&self, spec: &DecoderSpec) -> Result<Box<dyn Decoder>, TranscodeError> {
        Ok(Box::new(NullDecoder { spec: spec.clone() }))
    }

    fn create_encoder(&self, spec: &EncoderSpec) -> Result<Box<dyn Encoder>, TranscodeError> {
        if spec.codec == CodecId::H265 {
            // Mirrors a codec-open failure for an unavailable encoder.
            return Err(TranscodeErrorValue::CodecNotFound("hevc encoder".to_string()).into());
        }
        Ok(Box::new(NullEncoder {
            spec: spec.clone(),
            frame_index: 0,
            last_pts: i64::MIN,
        }))
    }

    fn create_rescaler(
        &self,
        _input: &DecoderSpec,
        output: &EncoderSpec,
    ) -> Result<Box<dyn FrameFilter>, TranscodeError> {
        Ok(Box::new(NullRescaler {
            width: output.width,
            height: output.height,
            scale: 1.0,
        }))
    }

    fn create_resampler(
        &self,
        input: &DecoderSpec,
        output: &EncoderSpec,
    ) -> Result<Box<dyn FrameFilter>, TranscodeError> {
        if input.sample_rate == 0 {
            return Err(
                TranscodeErrorValue::ConfigurationInvalid("input sample rate unknown".to_string())
                    .into(),
            );
        }
        Ok(Box::new(NullResampler {
            scale: f64::from(output.sample_rate) / f64::from(input.sample_rate),
            layout: output.channel_layout,
        }))
    }
}

struct NullDecoder {
    spec: DecoderSpec,
}

impl Decoder for NullDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<MediaFrame>, TranscodeError> {
        let (format, width, height) = match self.spec.codec.media_type() {
            crate::media::MediaType::Video => {
                (FrameFormat::Yuv420p, self.spec.width, self.spec.height)
            }
            crate::media::MediaType::Audio => (FrameFormat::S16Planar, 1024, 0),
        };
        Ok(vec![MediaFrame {
            track_id: packet.track_id,
            format,
            width,
            height,
            planes: vec![packet.data.clone()],
            strides: vec![width as usize],
            pts: packet.pts,
            duration: packet.duration,
            timebase: packet.timebase,
        }])
    }
}

struct NullRescaler {
    width: u32,
    height: u32,
    scale: f64,
}

impl FrameFilter for NullRescaler {
    fn filter(&mut self, mut frame: MediaFrame) -> Result<Option<MediaFrame>, TranscodeError> {
        frame.width = self.width;
        frame.height = self.height;
        frame.pts = (frame.pts as f64 * self.scale).round() as i64;
        Ok(Some(frame))
    }
}

struct NullResampler {
    scale: f64,
    layout: ChannelLayout,
}

impl FrameFilter for NullResampler {
    fn filter(&mut self, mut frame: MediaFrame) -> Result<Option<MediaFrame>, TranscodeError> {
        frame.width = (f64::from(frame.width) * self.scale).round() as u32;
        let _ = self.layout;
        Ok(Some(frame))
    }
}

struct NullEncoder {
    spec: EncoderSpec,
    frame_index: u64,
    last_pts: i64,
}

impl Encoder for NullEncoder {
    fn encode(&mut self, frame: &MediaFrame) -> Result<Vec<MediaPacket>, TranscodeError> {
        let duration = self.spec.frame_duration();
        let scale = frame.timebase.scale_to(self.spec.timebase);
        let mut pts = (frame.pts as f64 * scale).round() as i64;
        // The derived track's PTS must advance by at least one frame
        // duration per output packet.
        if self.last_pts != i64::MIN && pts < self.last_pts + duration {
            pts = self.last_pts + duration;
        }
        self.last_pts = pts;

        let is_key = self.spec.gop_size > 0
            && self.frame_index % u64::from(self.spec.gop_size.max(1)) == 0;
        self.frame_index += 1;

        Ok(vec![MediaPacket {
            track_id: frame.track_id,
            codec_id: self.spec.codec,
            data: frame.planes.first().cloned().unwrap_or_default(),
            pts,
            dts: pts,
            duration,
            timebase: self.spec.timebase,
            flag: if is_key || self.spec.gop_size == 0 {
                PacketFlag::Key
            } else {
                PacketFlag::Delta
            },
            fragmentation: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_policy_defaults() {
        let spec = EncoderSpec::video(CodecId::H264, 1280, 720, 30.0, 2_000_000);
        assert_eq!(spec.gop_size, 30);
        assert_eq!(spec.max_b_frames, 0);
        assert_eq!(spec.profile, VideoProfile::Baseline);
        assert!(!spec.scene_cut);
        assert!(!spec.sliced_threads);
        assert_eq!(spec.frame_duration(), 3000); // 90000 / 30
    }

    #[test]
    fn test_audio_policy_stereo_follows_input() {
        let stereo = EncoderSpec::audio(CodecId::Opus, 48000, ChannelLayout::Stereo, 128_000);
        assert!(stereo.inband_fec);
        assert_eq!(stereo.channel_layout, ChannelLayout::Stereo);

        let mono = EncoderSpec::audio(CodecId::Opus, 48000, ChannelLayout::Mono, 64_000);
        assert_eq!(mono.channel_layout, ChannelLayout::Mono);
    }
}
