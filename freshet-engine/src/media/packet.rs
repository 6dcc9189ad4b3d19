use {
    super::define::{CodecId, FragmentationHeader, PacketFlag, Timebase},
    bytes::Bytes,
    std::sync::Arc,
};

/// One compressed access unit.
///
/// Payload uses `Bytes` so fan-out across observers is a reference-count
/// bump, never a copy; a packet is immutable once pushed into the router.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub track_id: u32,
    pub codec_id: CodecId,
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub timebase: Timebase,
    pub flag: PacketFlag,
    pub fragmentation: Option<FragmentationHeader>,
}

impl MediaPacket {
    #[must_use]
    pub fn is_key(&self) -> bool {
        self.flag == PacketFlag::Key
    }
}

/// Shared handle used on every fan-out path.
pub type SharedMediaPacket = Arc<MediaPacket>;

/// Pixel / sample layout of a decompressed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Planar 4:2:0 YUV, 3 planes.
    Yuv420p,
    /// Planar float PCM, one plane per channel.
    FltPlanar,
    /// Planar signed 16-bit PCM, one plane per channel.
    S16Planar,
}

/// One decompressed frame (video picture or audio sample block).
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub track_id: u32,
    pub format: FrameFormat,
    /// Video: picture size. Audio: `width` carries the sample count, `height` is 0.
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Bytes>,
    pub strides: Vec<usize>,
    pub pts: i64,
    pub duration: i64,
    pub timebase: Timebase,
}

impl MediaFrame {
    /// Sample count for an audio frame.
    #[must_use]
    pub fn nb_samples(&self) -> u32 {
        self.width
    }
}
