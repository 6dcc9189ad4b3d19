use {
    super::cache::{SegmentData, StreamStore},
    crate::codec::aac::AudioSpecificConfig,
    crate::media::{CodecId, MediaType, SharedMediaPacket, Timebase},
    crate::mpegts::{
        define::{pes_stream_id, stream_type, AUDIO_PID, VIDEO_PID},
        pmt::PmtStream,
        ts::TsMuxer,
    },
    crate::router::define::ObserverConnection,
    std::sync::Arc,
    std::time::Instant,
    tokio_util::sync::CancellationToken,
};

const MS_TIMEBASE: Timebase = Timebase { num: 1, den: 1000 };
const TS_TIMEBASE: Timebase = Timebase { num: 1, den: 90000 };

/// Packages one stream into MPEG-TS segments plus an HLS media playlist.
///
/// Segments cut on video keyframes once the target duration has elapsed
/// (plain duration cadence for audio-only streams).
pub struct HlsPackager {
    store: Arc<StreamStore>,
    segment_count: usize,
    segment_duration_ms: u64,
    muxer: TsMuxer,
    sequence: u64,
    segment_start_ms: Option<i64>,
    last_packet_ms: i64,
    has_video: bool,
    aac_config: Option<AudioSpecificConfig>,
}

impl HlsPackager {
    #[must_use]
    pub fn new(store: Arc<StreamStore>, segment_count: usize, segment_duration: u64) -> Self {
        let mut streams = Vec::new();
        let mut has_video = false;
        let mut aac_config = None;

        for track in store.info.tracks.values() {
            match track.media_type {
                MediaType::Video => {
                    has_video = true;
                    streams.push(PmtStream {
                        stream_type: if track.codec_id == CodecId::H265 {
                            stream_type::H265
                        } else {
                            stream_type::H264
                        },
                        pid: VIDEO_PID,
                    });
                }
                MediaType::Audio => {
                    if track.codec_id == CodecId::Aac {
                        if let Some(extradata) = &track.extradata {
                            aac_config = AudioSpecificConfig::parse(extradata).ok();
                        }
                        streams.push(PmtStream {
                            stream_type: stream_type::AAC,
                            pid: AUDIO_PID,
                        });
                    }
                }
            }
        }

        let pcr_pid = if has_video { VIDEO_PID } else { AUDIO_PID };
        Self {
            store,
            segment_count,
            segment_duration_ms: segment_duration * 1000,
            muxer: TsMuxer::new(streams, pcr_pid),
            sequence: 0,
            segment_start_ms: None,
            last_packet_ms: 0,
            has_video,
            aac_config,
        }
    }

    pub async fn run(mut self, connection: ObserverConnection, cancel: CancellationToken) {
        loop {
            tokio::select! {
                maybe = connection.recv() => {
                    let Some(packet) = maybe else { break };
                    self.on_packet(&packet);
                }
                () = cancel.cancelled() => break,
            }
        }
        // Flush whatever is in flight so the tail is visible.
        self.cut_segment();
        tracing::debug!("hls packager for {} ended", self.store.info.identifier());
    }

    fn on_packet(&mut self, packet: &SharedMediaPacket) {
        let dts_ms = packet.timebase.rescale(packet.dts, MS_TIMEBASE);
        let media_type = packet.codec_id.media_type();

        let boundary = if self.has_video {
            media_type == MediaType::Video && packet.is_key()
        } else {
            true
        };
        if boundary && self.elapsed_ms(dts_ms) >= self.segment_duration_ms as i64 {
            self.cut_segment();
        }

        if self.segment_start_ms.is_none() {
            // First packet of an HLS segment must open a fresh PSI pair.
            if self.has_video && !(media_type == MediaType::Video && packet.is_key()) {
                // Wait for a keyframe so the segment is decodable.
                return;
            }
            if self.muxer.write_psi().is_err() {
                return;
            }
            self.segment_start_ms = Some(dts_ms);
        }
        self.last_packet_ms = dts_ms;

        let pts90 = packet.timebase.rescale(packet.pts, TS_TIMEBASE);
        let dts90 = packet.timebase.rescale(packet.dts, TS_TIMEBASE);

        let result = match media_type {
            MediaType::Video => self.muxer.write_frame(
                VIDEO_PID,
                pes_stream_id::VIDEO,
                pts90,
                dts90,
                packet.is_key(),
                &packet.data,
            ),
            MediaType::Audio => {
                let Some(config) = &self.aac_config else { return };
                let framed = config.wrap_adts(&packet.data);
                self.muxer
                    .write_frame(AUDIO_PID, pes_stream_id::AUDIO, pts90, pts90, false, &framed)
            }
        };
        if let Err(err) = result {
            tracing::warn!("ts mux error (frame dropped): {err}");
        }
    }

    fn elapsed_ms(&self, now_ms: i64) -> i64 {
        self.segment_start_ms
            .map_or(0, |start| now_ms.saturating_sub(start))
    }

    fn cut_segment(&mut self) {
        if self.muxer.is_empty() {
            return;
        }
        let data = self.muxer.extract().freeze();
        let duration = self
            .elapsed_ms(self.last_packet_ms)
            .max(0) as u64;
        let segment = SegmentData {
            sequence_number: self.sequence,
            duration: duration.max(1),
            name: format!("{}.ts", self.sequence),
            data,
            created_at: Instant::now(),
        };
        self.sequence += 1;
        self.segment_start_ms = None;

        let mut window = self.store.segments();
        window.push(segment.clone());
        while window.len() > self.segment_count {
            window.remove(0);
        }
        let playlist = build_media_playlist(&window);
        self.store.push_segment(segment, playlist);
    }
}

/// HLS media playlist over the current window.
#[must_use]
pub fn build_media_playlist(segments: &[SegmentData]) -> String {
    let target = segments
        .iter()
        .map(|segment| segment.duration.div_ceil(1000))
        .max()
        .unwrap_or(1);
    let first_sequence = segments.first().map_or(0, |s| s.sequence_number);

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
    playlist.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{first_sequence}\n"));
    for segment in segments {
        playlist.push_str(&format!(
            "#EXTINF:{:.3},\n{}\n",
            segment.duration as f64 / 1000.0,
            segment.name
        ));
    }
    playlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        CodecId, MediaPacket, MediaTrack, PacketFlag, StreamInfo, StreamSourceType,
    };
    use bytes::Bytes;

    fn store_with_video() -> Arc<StreamStore> {
        let mut info = StreamInfo::new(1, 1, "live", "s", StreamSourceType::RtmpPush);
        info.add_track(MediaTrack::video(0, CodecId::H264, MS_TIMEBASE));
        StreamStore::new(Arc::new(info), 3)
    }

    fn packet(dts: i64, key: bool) -> SharedMediaPacket {
        Arc::new(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xAA]),
            pts: dts,
            dts,
            duration: 33,
            timebase: MS_TIMEBASE,
            flag: if key { PacketFlag::Key } else { PacketFlag::Delta },
            fragmentation: None,
        })
    }

    #[test]
    fn test_segments_cut_on_keyframe_after_duration() {
        let store = store_with_video();
        let mut packager = HlsPackager::new(store.clone(), 3, 5);

        // 6 seconds of frames with keyframes every second.
        for i in 0..180i64 {
            let dts = i * 33;
            packager.on_packet(&packet(dts, i % 30 == 0));
        }
        packager.cut_segment();

        let segments = store.segments();
        assert!(!segments.is_empty());
        // First cut lands on the first keyframe at or past 5s.
        assert!(segments[0].duration >= 4900);
        assert_eq!(segments[0].name, "0.ts");
        assert_eq!(segments[0].data[0], 0x47);
    }

    #[test]
    fn test_playlist_window_and_sequence() {
        let store = store_with_video();
        let mut packager = HlsPackager::new(store.clone(), 3, 1);

        for i in 0..300i64 {
            let dts = i * 33;
            packager.on_packet(&packet(dts, i % 30 == 0));
        }
        packager.cut_segment();

        let playlist = store.playlist().unwrap();
        assert!(playlist.starts_with("#EXTM3U"));
        let segments = store.segments();
        assert_eq!(segments.len(), 3);
        assert!(playlist.contains(&format!("#EXT-X-MEDIA-SEQUENCE:{}", segments[0].sequence_number)));
        for segment in &segments {
            assert!(playlist.contains(&segment.name));
        }
    }
}
