use {crate::media::SharedMediaPacket, std::collections::VecDeque};

/// Frame-count cap on the cached group of pictures.
const MAX_PACKETS_PER_GOP: usize = 1500;

/// Byte cap on the cached group of pictures (32 MB).
const MAX_BYTES_PER_GOP: usize = 32 * 1024 * 1024;

/// Cache of the current group of pictures, replayed to observers that
/// attach mid-stream so they can start decoding immediately instead of
/// waiting for the next keyframe.
///
/// Video packets reset the cache on every keyframe; audio packets ride
/// along inside the current GOP. Holding `Arc`s keeps the replay O(1)
/// per packet.
#[derive(Default)]
pub struct GopCache {
    packets: VecDeque<SharedMediaPacket>,
    bytes: usize,
    has_video: bool,
}

impl GopCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, packet: &SharedMediaPacket) {
        use crate::media::MediaType;

        let is_video = packet.codec_id.media_type() == MediaType::Video;
        if is_video {
            self.has_video = true;
            if packet.is_key() {
                self.packets.clear();
                self.bytes = 0;
            }
        }

        // A stream without video keeps only a shallow audio tail.
        if !self.has_video && self.packets.len() >= 8 {
            if let Some(old) = self.packets.pop_front() {
                self.bytes -= old.data.len();
            }
        }

        if self.packets.len() >= MAX_PACKETS_PER_GOP
            || self.bytes + packet.data.len() > MAX_BYTES_PER_GOP
        {
            return;
        }

        self.bytes += packet.data.len();
        self.packets.push_back(packet.clone());
    }

    pub fn packets(&self) -> impl Iterator<Item = &SharedMediaPacket> {
        self.packets.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::GopCache;
    use crate::media::{CodecId, MediaPacket, PacketFlag, SharedMediaPacket, Timebase};
    use bytes::Bytes;
    use std::sync::Arc;

    fn video(pts: i64, key: bool) -> SharedMediaPacket {
        Arc::new(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::from_static(b"vvvv"),
            pts,
            dts: pts,
            duration: 33,
            timebase: Timebase::new(1, 1000),
            flag: if key { PacketFlag::Key } else { PacketFlag::Delta },
            fragmentation: None,
        })
    }

    #[test]
    fn test_keyframe_resets_cache() {
        let mut cache = GopCache::new();
        cache.append(&video(0, true));
        cache.append(&video(33, false));
        cache.append(&video(66, false));
        assert_eq!(cache.len(), 3);

        cache.append(&video(100, true));
        assert_eq!(cache.len(), 1);
        assert!(cache.packets().next().unwrap().is_key());
    }
}
