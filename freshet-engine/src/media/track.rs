use {
    super::define::{CodecId, MediaType, Timebase},
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

/// Audio channel layout advertised by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    #[must_use]
    pub const fn count(self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    #[must_use]
    pub const fn from_count(count: u8) -> Self {
        match count {
            2 => Self::Stereo,
            _ => Self::Mono,
        }
    }
}

/// One media substream inside a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: u32,
    pub media_type: MediaType,
    pub codec_id: CodecId,
    pub timebase: Timebase,
    /// Video only.
    pub framerate: f64,
    pub width: u32,
    pub height: u32,
    /// Audio only.
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub bitrate: u64,
    /// Codec private data (e.g. AVCC for H.264, AudioSpecificConfig for
    /// AAC). Travels base64-encoded when a track crosses a node boundary.
    #[serde(with = "extradata_serde", default)]
    pub extradata: Option<Bytes>,
}

mod extradata_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(|decoded| Some(Bytes::from(decoded)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

impl MediaTrack {
    #[must_use]
    pub fn video(id: u32, codec_id: CodecId, timebase: Timebase) -> Self {
        Self {
            id,
            media_type: MediaType::Video,
            codec_id,
            timebase,
            framerate: 0.0,
            width: 0,
            height: 0,
            sample_rate: 0,
            channel_layout: ChannelLayout::Mono,
            bitrate: 0,
            extradata: None,
        }
    }

    #[must_use]
    pub fn audio(id: u32, codec_id: CodecId, timebase: Timebase) -> Self {
        Self {
            id,
            media_type: MediaType::Audio,
            codec_id,
            timebase,
            framerate: 0.0,
            width: 0,
            height: 0,
            sample_rate: 0,
            channel_layout: ChannelLayout::Mono,
            bitrate: 0,
            extradata: None,
        }
    }
}
