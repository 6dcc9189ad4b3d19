use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Closed set of codecs the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    H264,
    H265,
    Vp8,
    Opus,
    Aac,
}

impl CodecId {
    #[must_use]
    pub const fn media_type(self) -> MediaType {
        match self {
            Self::H264 | Self::H265 | Self::Vp8 => MediaType::Video,
            Self::Opus | Self::Aac => MediaType::Audio,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "H264"),
            Self::H265 => write!(f, "H265"),
            Self::Vp8 => write!(f, "VP8"),
            Self::Opus => write!(f, "OPUS"),
            Self::Aac => write!(f, "AAC"),
        }
    }
}

/// Rational timebase. A timestamp of `t` in this base spans `t * num / den`
/// seconds of wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    #[must_use]
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Multiplier that converts timestamps in `self` into timestamps in `output`.
    #[must_use]
    pub fn scale_to(&self, output: Timebase) -> f64 {
        (f64::from(self.num) * f64::from(output.den)) / (f64::from(self.den) * f64::from(output.num))
    }

    #[must_use]
    pub fn rescale(&self, ts: i64, output: Timebase) -> i64 {
        (ts as f64 * self.scale_to(output)).round() as i64
    }

    #[must_use]
    pub fn as_seconds(&self, ts: i64) -> f64 {
        ts as f64 * f64::from(self.num) / f64::from(self.den)
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new(1, 1000)
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Keyframe flag carried on every compressed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacketFlag {
    Key,
    Delta,
}

/// NAL-unit boundaries inside a compressed payload: `(offset, length)` pairs
/// in payload byte order. Packetizers consume this instead of re-scanning
/// the bitstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationHeader {
    pub fragments: Vec<(usize, usize)>,
}

impl FragmentationHeader {
    #[must_use]
    pub fn new(fragments: Vec<(usize, usize)>) -> Self {
        Self { fragments }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Timebase;

    #[test]
    fn test_rescale_to_rtp_clock() {
        // 1 second expressed in milliseconds lands on 90kHz ticks.
        let millis = Timebase::new(1, 1000);
        let rtp = Timebase::new(1, 90000);
        assert_eq!(millis.rescale(1000, rtp), 90000);
        assert_eq!(millis.rescale(0, rtp), 0);
        assert!((millis.scale_to(rtp) - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_roundtrip() {
        let a = Timebase::new(1, 48000);
        let b = Timebase::new(1, 1000);
        let scale = a.scale_to(b);
        let scale_inv = b.scale_to(a);
        assert!((scale * scale_inv - 1.0).abs() < 1e-9);
    }
}
