use {
    super::cache::{CmafChunk, SegmentData, StreamStore},
    crate::fmp4::{self, FragmentSample},
    crate::media::{MediaType, SharedMediaPacket, Timebase},
    crate::router::define::ObserverConnection,
    chrono::{DateTime, SecondsFormat, Utc},
    std::sync::Arc,
    std::time::Instant,
    tokio_util::sync::CancellationToken,
};

const MS_TIMEBASE: Timebase = Timebase { num: 1, den: 1000 };

/// fMP4 track ids inside the container (not pipeline track ids).
const VIDEO_FMP4_TRACK: u32 = 1;
const AUDIO_FMP4_TRACK: u32 = 2;

struct TrackPackager {
    representation: &'static str,
    fmp4_track_id: u32,
    timescale: u32,
    timebase: Timebase,
    samples: Vec<FragmentSample>,
    base_decode_time: u64,
    last_dts: Option<i64>,
}

impl TrackPackager {
    fn push(&mut self, packet: &SharedMediaPacket, data: bytes::Bytes) {
        let dts = packet.timebase.rescale(packet.dts, self.timebase);
        let pts = packet.timebase.rescale(packet.pts, self.timebase);
        if self.samples.is_empty() {
            self.base_decode_time = dts.max(0) as u64;
        }
        // Patch the previous sample's duration now that we know the gap.
        if let (Some(last_dts), Some(last)) = (self.last_dts, self.samples.last_mut()) {
            let gap = (dts - last_dts).max(1) as u32;
            if last.duration == 0 {
                last.duration = gap;
            }
        }
        self.last_dts = Some(dts);
        self.samples.push(FragmentSample {
            duration: if packet.duration > 0 {
                packet.timebase.rescale(packet.duration, self.timebase).max(1) as u32
            } else {
                0
            },
            data,
            keyframe: packet.is_key(),
            cts_offset: (pts - dts) as i32,
        });
    }

    fn finish(&mut self, sequence: u64) -> Option<(String, bytes::Bytes, u64)> {
        if self.samples.is_empty() {
            return None;
        }
        // Tail sample may still have an unknown duration.
        let default = self.default_duration();
        for sample in &mut self.samples {
            if sample.duration == 0 {
                sample.duration = default;
            }
        }
        let duration_ticks: u64 = self.samples.iter().map(|s| u64::from(s.duration)).sum();
        let duration_ms = duration_ticks * 1000 / u64::from(self.timescale);
        let name = format!("{}-{}.m4s", self.representation, sequence);
        let data = fmp4::build_media_segment(
            self.fmp4_track_id,
            sequence as u32,
            self.base_decode_time,
            &self.samples,
        );
        self.samples.clear();
        self.last_dts = None;
        Some((name, data, duration_ms))
    }

    fn default_duration(&self) -> u32 {
        // One frame at 30 fps or ~21 ms of audio, in timescale ticks.
        (self.timescale / 48).max(1)
    }
}

/// Packages one stream into fMP4 segments plus a DASH MPD. With
/// `low_latency` set it also feeds the CMAF chunk sink so mid-segment
/// clients can stream chunk-by-chunk.
pub struct DashPackager {
    store: Arc<StreamStore>,
    segment_count: usize,
    segment_duration_ms: u64,
    low_latency: bool,
    availability_start: DateTime<Utc>,
    sequence: u64,
    video: Option<TrackPackager>,
    audio: Option<TrackPackager>,
    segment_start_ms: Option<i64>,
    last_packet_ms: i64,
}

impl DashPackager {
    #[must_use]
    pub fn new(
        store: Arc<StreamStore>,
        segment_count: usize,
        segment_duration: u64,
        low_latency: bool,
    ) -> Self {
        let mut video = None;
        let mut audio = None;

        for track in store.info.tracks.values() {
            let timescale = fmp4::track_timescale(track);
            match track.media_type {
                MediaType::Video => {
                    store.set_file(
                        "video-init.mp4",
                        fmp4::build_init_segment(track, VIDEO_FMP4_TRACK),
                    );
                    video = Some(TrackPackager {
                        representation: "video",
                        fmp4_track_id: VIDEO_FMP4_TRACK,
                        timescale,
                        timebase: Timebase::new(1, timescale),
                        samples: Vec::new(),
                        base_decode_time: 0,
                        last_dts: None,
                    });
                }
                MediaType::Audio => {
                    store.set_file(
                        "audio-init.mp4",
                        fmp4::build_init_segment(track, AUDIO_FMP4_TRACK),
                    );
                    audio = Some(TrackPackager {
                        representation: "audio",
                        fmp4_track_id: AUDIO_FMP4_TRACK,
                        timescale,
                        timebase: Timebase::new(1, timescale),
                        samples: Vec::new(),
                        base_decode_time: 0,
                        last_dts: None,
                    });
                }
            }
        }

        Self {
            store,
            segment_count,
            segment_duration_ms: segment_duration * 1000,
            low_latency,
            availability_start: Utc::now(),
            sequence: 0,
            video,
            audio,
            segment_start_ms: None,
            last_packet_ms: 0,
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
        self.cut_segment();
        tracing::debug!("dash packager for {} ended", self.store.info.identifier());
    }

    fn on_packet(&mut self, packet: &SharedMediaPacket) {
        let dts_ms = packet.timebase.rescale(packet.dts, MS_TIMEBASE);
        let media_type = packet.codec_id.media_type();

        let boundary = if self.video.is_some() {
            media_type == MediaType::Video && packet.is_key()
        } else {
            true
        };
        if boundary
            && self.segment_start_ms.is_some()
            && dts_ms - self.segment_start_ms.unwrap_or(0) >= self.segment_duration_ms as i64
        {
            self.cut_segment();
        }

        if self.segment_start_ms.is_none() {
            if self.video.is_some() && !(media_type == MediaType::Video && packet.is_key()) {
                return;
            }
            self.segment_start_ms = Some(dts_ms);
            if self.low_latency {
                self.store
                    .push_chunk(CmafChunk {
                        segment_name: format!("video-{}.m4s", self.sequence),
                        data: bytes::Bytes::new(),
                        last: false,
                    });
            }
        }
        self.last_packet_ms = dts_ms;

        // fMP4 samples carry length-prefixed NAL units; rebuild them from
        // the fragmentation table when the payload arrived as Annex-B.
        let sample_data = match (&packet.fragmentation, media_type) {
            (Some(fragmentation), MediaType::Video) => {
                let mut out = bytes::BytesMut::with_capacity(packet.data.len());
                for &(offset, length) in &fragmentation.fragments {
                    out.extend_from_slice(&(length as u32).to_be_bytes());
                    out.extend_from_slice(&packet.data[offset..offset + length]);
                }
                out.freeze()
            }
            _ => packet.data.clone(),
        };

        let packager = match media_type {
            MediaType::Video => self.video.as_mut(),
            MediaType::Audio => self.audio.as_mut(),
        };
        let Some(packager) = packager else { return };
        packager.push(packet, sample_data.clone());

        if self.low_latency {
            // One chunk per sample: a self-contained moof+mdat pair.
            let chunk_data = fmp4::build_media_segment(
                packager.fmp4_track_id,
                self.sequence as u32,
                packager.base_decode_time,
                std::slice::from_ref(packager.samples.last().expect("just pushed")),
            );
            self.store.push_chunk(CmafChunk {
                segment_name: format!("{}-{}.m4s", packager.representation, self.sequence),
                data: chunk_data,
                last: false,
            });
        }
    }

    fn cut_segment(&mut self) {
        let sequence = self.sequence;
        let mut any = false;
        let mut duration_ms = 0u64;

        let mut finished = Vec::new();
        if let Some(video) = &mut self.video {
            if let Some(cut) = video.finish(sequence) {
                duration_ms = duration_ms.max(cut.2);
                finished.push(cut);
            }
        }
        if let Some(audio) = &mut self.audio {
            if let Some(cut) = audio.finish(sequence) {
                duration_ms = duration_ms.max(cut.2);
                finished.push(cut);
            }
        }

        for (name, data, _) in finished {
            any = true;
            if self.low_latency {
                self.store.push_chunk(CmafChunk {
                    segment_name: name.clone(),
                    data: bytes::Bytes::new(),
                    last: true,
                });
            }
            let segment = SegmentData {
                sequence_number: sequence,
                duration: duration_ms.max(1),
                name,
                data,
                created_at: Instant::now(),
            };
            let mut window = self.store.segments();
            window.push(segment.clone());
            // Each sequence may own up to two files (audio + video).
            while window.len() > self.segment_count * 2 {
                window.remove(0);
            }
            let manifest = self.build_mpd(&window);
            self.store.push_segment(segment, manifest);
        }

        if any {
            self.sequence += 1;
        }
        self.segment_start_ms = None;
    }

    fn build_mpd(&self, window: &[SegmentData]) -> String {
        let first_sequence = window.first().map_or(0, |s| s.sequence_number);
        let segment_seconds = self.segment_duration_ms as f64 / 1000.0;

        let mut mpd = String::new();
        mpd.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        mpd.push_str(&format!(
            "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" profiles=\"urn:mpeg:dash:profile:isoff-live:2011\" type=\"dynamic\" availabilityStartTime=\"{}\" minimumUpdatePeriod=\"PT{segment_seconds:.1}S\" minBufferTime=\"PT{segment_seconds:.1}S\">\n",
            self.availability_start.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        mpd.push_str("  <Period id=\"0\" start=\"PT0S\">\n");

        if self.video.is_some() {
            mpd.push_str("    <AdaptationSet mimeType=\"video/mp4\" segmentAlignment=\"true\">\n");
            mpd.push_str(&self.segment_template("video", first_sequence));
            mpd.push_str("      <Representation id=\"video\" bandwidth=\"2000000\"/>\n");
            mpd.push_str("    </AdaptationSet>\n");
        }
        if self.audio.is_some() {
            mpd.push_str("    <AdaptationSet mimeType=\"audio/mp4\" segmentAlignment=\"true\">\n");
            mpd.push_str(&self.segment_template("audio", first_sequence));
            mpd.push_str("      <Representation id=\"audio\" bandwidth=\"128000\"/>\n");
            mpd.push_str("    </AdaptationSet>\n");
        }

        mpd.push_str("  </Period>\n</MPD>\n");
        mpd
    }

    fn segment_template(&self, representation: &str, start_number: u64) -> String {
        let duration_ms = self.segment_duration_ms;
        let availability = if self.low_latency {
            // Chunks become available as they are produced.
            format!(
                " availabilityTimeOffset=\"{:.3}\" availabilityTimeComplete=\"false\"",
                (self.segment_duration_ms as f64 / 1000.0) - 0.5
            )
        } else {
            String::new()
        };
        format!(
            "      <SegmentTemplate timescale=\"1000\" duration=\"{duration_ms}\" startNumber=\"{start_number}\" initialization=\"{representation}-init.mp4\" media=\"{representation}-$Number$.m4s\"{availability}/>\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        CodecId, FragmentationHeader, MediaPacket, MediaTrack, PacketFlag, StreamInfo,
        StreamSourceType,
    };
    use bytes::Bytes;

    fn store() -> Arc<StreamStore> {
        let mut info = StreamInfo::new(1, 1, "live", "s", StreamSourceType::RtmpPush);
        let mut track = MediaTrack::video(0, CodecId::H264, MS_TIMEBASE);
        track.width = 1280;
        track.height = 720;
        info.add_track(track);
        StreamStore::new(Arc::new(info), 3)
    }

    fn packet(dts: i64, key: bool) -> SharedMediaPacket {
        // Annex-B payload with one 2-byte NAL unit at offset 4.
        Arc::new(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xAA]),
            pts: dts,
            dts,
            duration: 33,
            timebase: MS_TIMEBASE,
            flag: if key { PacketFlag::Key } else { PacketFlag::Delta },
            fragmentation: Some(FragmentationHeader::new(vec![(4, 2)])),
        })
    }

    #[test]
    fn test_init_segment_registered() {
        let store = store();
        let _packager = DashPackager::new(store.clone(), 3, 5, false);
        let init = store.segment("video-init.mp4").unwrap();
        assert_eq!(&init.data[4..8], b"ftyp");
    }

    #[test]
    fn test_mpd_advertises_cut_segments() {
        let store = store();
        let mut packager = DashPackager::new(store.clone(), 3, 1, false);
        for i in 0..120i64 {
            packager.on_packet(&packet(i * 33, i % 30 == 0));
        }
        packager.cut_segment();

        let mpd = store.playlist().unwrap();
        assert!(mpd.contains("type=\"dynamic\""));
        assert!(mpd.contains("video-init.mp4"));
        assert!(mpd.contains("video-$Number$.m4s"));

        let segments = store.segments();
        assert!(!segments.is_empty());
        assert!(segments[0].name.starts_with("video-"));
        // Samples are length-prefixed in the mdat.
        let segment = store.segment(&segments[0].name).unwrap();
        assert!(!segment.data.is_empty());
    }

    #[test]
    fn test_low_latency_mpd_has_availability_offset() {
        let store = store();
        let packager = DashPackager::new(store.clone(), 3, 5, true);
        let mpd = packager.build_mpd(&[]);
        assert!(mpd.contains("availabilityTimeOffset"));
        assert!(mpd.contains("availabilityTimeComplete=\"false\""));
    }
}
