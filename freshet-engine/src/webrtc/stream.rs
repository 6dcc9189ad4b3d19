use {
    super::{
        errors::{RtcError, RtcErrorValue},
        history::RtpSendHistory,
        ice::IceSession,
        packetizer::{
            PacketizerCodec, RtpPacketizer, PAYLOAD_TYPE_OFFSET, RED_PAYLOAD_TYPE,
            ULPFEC_PAYLOAD_TYPE,
        },
        rtp::RtpPacket,
        sdp::{MediaDescription, PayloadAttr, SdpMediaType, SessionDescription},
        session::RtcSession,
    },
    crate::codec::avc::AvcDecoderConfigurationRecord,
    crate::media::{ChannelLayout, CodecId, MediaType, SharedMediaPacket, StreamInfo, Timebase},
    base64::{engine::general_purpose::STANDARD, Engine},
    bytes::Bytes,
    dashmap::DashMap,
    parking_lot::Mutex,
    rand::distributions::Alphanumeric,
    rand::Rng,
    std::collections::HashMap,
    std::sync::atomic::{AtomicU64, Ordering},
    std::sync::Arc,
    uuid::Uuid,
};

const SEND_HISTORY_CAPACITY: usize = 512;

/// Per-SSRC outbound counters for sender reports.
#[derive(Default)]
pub struct SsrcCounters {
    pub packets: AtomicU64,
    pub octets: AtomicU64,
    pub last_rtp_timestamp: AtomicU64,
}

/// One WebRTC-published stream: the SDP offer template, a packetizer per
/// track, the per-SSRC send history, and the attached viewer sessions.
pub struct RtcStream {
    pub stream_info: Arc<StreamInfo>,
    offer_template: SessionDescription,
    packetizers: Mutex<HashMap<u32, RtpPacketizer>>,
    track_media: HashMap<u32, MediaType>,
    vp8_picture_id: Mutex<u16>,
    histories: Mutex<HashMap<u32, RtpSendHistory>>,
    pub counters: DashMap<u32, Arc<SsrcCounters>>,
    sessions: DashMap<Uuid, Arc<RtcSession>>,
    /// Broadcast class keys this stream produces.
    pub class_keys: Vec<u32>,
}

impl RtcStream {
    /// Build the offer and packetizers from the stream's tracks, in the
    /// fixed order: codec payloads first, then RED, then ULPFEC.
    pub fn new(stream_info: Arc<StreamInfo>, fingerprint: &str) -> Result<Arc<Self>, RtcError> {
        let mut offer = SessionDescription::new("Freshet", rand::thread_rng().gen());
        offer.fingerprint_value = fingerprint.to_string();

        let mut packetizers = HashMap::new();
        let mut track_media = HashMap::new();
        let mut class_keys = Vec::new();

        let mut video_media: Option<MediaDescription> = None;
        let mut audio_media: Option<MediaDescription> = None;
        let mut payload_type = PAYLOAD_TYPE_OFFSET;

        for track in stream_info.tracks.values() {
            match track.media_type {
                MediaType::Video => {
                    let codec = match track.codec_id {
                        CodecId::H264 => "H264",
                        CodecId::Vp8 => "VP8",
                        other => {
                            tracing::info!(
                                "unsupported webrtc video codec on track {}: {other}",
                                track.id
                            );
                            continue;
                        }
                    };

                    let mut payload = PayloadAttr::new(payload_type, codec, 90000);
                    if track.codec_id == CodecId::H264 {
                        payload.fmtp = Some(h264_fmtp(track.extradata.as_deref()));
                    }
                    payload.rtcp_fb.push("nack".to_string());

                    let media = video_media.get_or_insert_with(|| {
                        MediaDescription::new(
                            SdpMediaType::Video,
                            random_string(6),
                            rand::thread_rng().gen(),
                            random_string(16),
                        )
                    });
                    media.payloads.push(payload);

                    let mut packetizer = RtpPacketizer::new(
                        if track.codec_id == CodecId::Vp8 {
                            PacketizerCodec::Vp8
                        } else {
                            PacketizerCodec::H264
                        },
                        payload_type,
                        media.ssrc,
                    );
                    packetizer.set_ulpfec(RED_PAYLOAD_TYPE, ULPFEC_PAYLOAD_TYPE);
                    packetizers.insert(track.id, packetizer);
                    track_media.insert(track.id, MediaType::Video);

                    class_keys.push(
                        u32::from(RED_PAYLOAD_TYPE) | (u32::from(payload_type) << 8),
                    );
                    class_keys.push(
                        u32::from(RED_PAYLOAD_TYPE)
                            | (u32::from(ULPFEC_PAYLOAD_TYPE) << 8)
                            | (u32::from(payload_type) << 16),
                    );
                    payload_type += 1;
                }
                MediaType::Audio => {
                    if track.codec_id != CodecId::Opus {
                        tracing::info!(
                            "unsupported webrtc audio codec on track {}: {}",
                            track.id, track.codec_id
                        );
                        continue;
                    }
                    let mut payload =
                        PayloadAttr::new(payload_type, "OPUS", track.sample_rate.max(48000));
                    payload.channels = Some(u32::from(track.channel_layout.count()));
                    payload.fmtp = Some(if track.channel_layout == ChannelLayout::Stereo {
                        "stereo=1;useinbandfec=1;".to_string()
                    } else {
                        "useinbandfec=1;".to_string()
                    });

                    let media = audio_media.get_or_insert_with(|| {
                        MediaDescription::new(
                            SdpMediaType::Audio,
                            random_string(6),
                            rand::thread_rng().gen(),
                            random_string(16),
                        )
                    });
                    media.payloads.push(payload);

                    packetizers.insert(
                        track.id,
                        RtpPacketizer::new(PacketizerCodec::Opus, payload_type, media.ssrc),
                    );
                    track_media.insert(track.id, MediaType::Audio);
                    class_keys.push(u32::from(payload_type));
                    payload_type += 1;
                }
            }
        }

        if let Some(media) = &mut video_media {
            // RED and ULPFEC close the video payload list.
            media
                .payloads
                .push(PayloadAttr::new(RED_PAYLOAD_TYPE, "red", 90000));
            media
                .payloads
                .push(PayloadAttr::new(ULPFEC_PAYLOAD_TYPE, "ulpfec", 90000));
        }

        if let Some(media) = video_media {
            offer.media.push(media);
        }
        if let Some(media) = audio_media {
            offer.media.push(media);
        }
        if offer.media.is_empty() {
            return Err(RtcErrorValue::StreamNotFound.into());
        }

        let stream = Arc::new(Self {
            stream_info,
            offer_template: offer,
            packetizers: Mutex::new(packetizers),
            track_media,
            vp8_picture_id: Mutex::new(0x8000),
            histories: Mutex::new(HashMap::new()),
            counters: DashMap::new(),
            sessions: DashMap::new(),
            class_keys,
        });
        for media in &stream.offer_template.media {
            stream
                .counters
                .insert(media.ssrc, Arc::new(SsrcCounters::default()));
        }
        Ok(stream)
    }

    /// The offer handed to one viewer: the stream template with the
    /// session's ICE credentials and candidate lines stamped in.
    #[must_use]
    pub fn make_offer(&self, ice: &IceSession, candidate: &str) -> SessionDescription {
        let mut offer = self.offer_template.clone();
        for media in &mut offer.media {
            media.ice_ufrag = ice.local_ufrag.clone();
            media.ice_pwd = ice.local_pwd.clone();
            media.extra_attributes.push(candidate.to_string());
        }
        offer
    }

    pub fn add_session(&self, session: Arc<RtcSession>) {
        self.sessions.insert(session.id, session);
    }

    pub fn remove_session(&self, id: &Uuid) -> Option<Arc<RtcSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<Arc<RtcSession>> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    /// VP8 picture ids are 15-bit and never zero: on wrap they jump back
    /// to the initial 0x8000.
    fn allocate_vp8_picture_id(&self) -> u16 {
        let mut picture_id = self.vp8_picture_id.lock();
        *picture_id = picture_id.wrapping_add(1);
        if *picture_id == 0 {
            *picture_id = 0x8000;
        }
        *picture_id
    }

    /// Packetize one media packet and broadcast the resulting RTP
    /// datagrams to every attached session by class key.
    pub fn on_packet(&self, packet: &SharedMediaPacket) {
        let Some(media_type) = self.track_media.get(&packet.track_id) else {
            return;
        };

        let timestamp_ticks = match media_type {
            MediaType::Video => packet
                .timebase
                .rescale(packet.pts, Timebase::new(1, 90000)),
            MediaType::Audio => {
                let rate = self
                    .stream_info
                    .track(packet.track_id)
                    .map_or(48000, |track| track.sample_rate.max(1));
                packet.timebase.rescale(packet.pts, Timebase::new(1, rate))
            }
        };
        let timestamp = timestamp_ticks as u32;

        let picture_id = if packet.codec_id == CodecId::Vp8 {
            Some(self.allocate_vp8_picture_id())
        } else {
            None
        };

        let rtp_packets = {
            let mut packetizers = self.packetizers.lock();
            let Some(packetizer) = packetizers.get_mut(&packet.track_id) else {
                return;
            };
            packetizer.packetize(
                timestamp,
                &packet.data,
                packet.fragmentation.as_ref(),
                picture_id,
            )
        };

        for rtp in rtp_packets {
            let wire = rtp.marshal();
            {
                let mut histories = self.histories.lock();
                histories
                    .entry(rtp.ssrc)
                    .or_insert_with(|| RtpSendHistory::new(SEND_HISTORY_CAPACITY))
                    .record(rtp.sequence_number, wire.clone());
            }
            if let Some(counters) = self.counters.get(&rtp.ssrc) {
                counters.packets.fetch_add(1, Ordering::Relaxed);
                counters
                    .octets
                    .fetch_add(rtp.payload.len() as u64, Ordering::Relaxed);
                counters
                    .last_rtp_timestamp
                    .store(u64::from(rtp.timestamp), Ordering::Relaxed);
            }

            let key = class_key(&rtp);
            for session in self.sessions.iter() {
                session.on_broadcast_rtp(key, &wire);
            }
        }
    }

    /// Look up a previously sent packet for retransmission.
    #[must_use]
    pub fn retransmit_lookup(&self, ssrc: u32, sequence_number: u16) -> Option<Bytes> {
        self.histories
            .lock()
            .get(&ssrc)
            .and_then(|history| history.get(sequence_number))
    }
}

/// Broadcast class of one outbound packet:
/// `payload_type | red_block_pt << 8 | origin_pt_of_fec << 16`.
#[must_use]
pub fn class_key(packet: &RtpPacket) -> u32 {
    let payload_type = u32::from(packet.payload_type);
    if packet.payload_type == RED_PAYLOAD_TYPE {
        let block_pt = u32::from(packet.payload.first().copied().unwrap_or(0) & 0x7F);
        if packet.is_fec {
            payload_type | (block_pt << 8) | (u32::from(packet.origin_payload_type) << 16)
        } else {
            payload_type | (block_pt << 8)
        }
    } else {
        payload_type
    }
}

fn h264_fmtp(extradata: Option<&[u8]>) -> String {
    if let Some(extradata) = extradata {
        if let Ok(record) = AvcDecoderConfigurationRecord::parse(extradata) {
            if !record.sps.is_empty() && !record.pps.is_empty() && record.sps[0].len() >= 4 {
                let mut parameter_sets: Vec<String> = Vec::new();
                for sps in &record.sps {
                    parameter_sets.push(STANDARD.encode(sps));
                }
                for pps in &record.pps {
                    parameter_sets.push(STANDARD.encode(pps));
                }
                return format!(
                    "packetization-mode=1;profile-level-id={};sprop-parameter-sets={};level-asymmetry-allowed=1",
                    record.profile_level_id(),
                    parameter_sets.join(",")
                );
            }
        }
    }
    // Baseline level 3.1 when no usable extradata arrived.
    "packetization-mode=1;profile-level-id=42e01f;level-asymmetry-allowed=1".to_string()
}

fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, StreamInfo, StreamSourceType};

    fn stream_info() -> Arc<StreamInfo> {
        let mut info = StreamInfo::new(1, 1, "live", "s", StreamSourceType::RtmpPush);
        let mut video = MediaTrack::video(0, CodecId::H264, Timebase::new(1, 1000));
        video.width = 1920;
        video.height = 1080;
        info.add_track(video);
        let mut audio = MediaTrack::audio(1, CodecId::Opus, Timebase::new(1, 48000));
        audio.sample_rate = 48000;
        audio.channel_layout = ChannelLayout::Stereo;
        info.add_track(audio);
        Arc::new(info)
    }

    #[test]
    fn test_offer_payload_order_is_codec_red_ulpfec() {
        let stream = RtcStream::new(stream_info(), "AA:BB").unwrap();
        let ice = IceSession::new();
        let offer = stream.make_offer(&ice, "candidate:0 1 UDP 50 10.0.0.1 10000 typ host");

        let video = offer
            .media
            .iter()
            .find(|m| m.media_type == SdpMediaType::Video)
            .unwrap();
        let codecs: Vec<&str> = video.payloads.iter().map(|p| p.codec.as_str()).collect();
        assert_eq!(codecs, vec!["H264", "red", "ulpfec"]);
        assert_eq!(video.payloads[1].id, RED_PAYLOAD_TYPE);
        assert_eq!(video.payloads[2].id, ULPFEC_PAYLOAD_TYPE);
        assert_eq!(video.payloads[0].rtcp_fb, vec!["nack".to_string()]);
        assert_eq!(video.setup, "actpass");
        assert_eq!(video.direction, "sendonly");
        assert!(video.rtcp_mux);
        assert_eq!(video.ice_ufrag, ice.local_ufrag);

        let audio = offer
            .media
            .iter()
            .find(|m| m.media_type == SdpMediaType::Audio)
            .unwrap();
        assert_eq!(audio.payloads[0].fmtp.as_deref(), Some("stereo=1;useinbandfec=1;"));
    }

    #[test]
    fn test_default_h264_fmtp_without_extradata() {
        let fmtp = h264_fmtp(None);
        assert!(fmtp.contains("profile-level-id=42e01f"));
        assert!(fmtp.contains("packetization-mode=1"));
    }

    #[test]
    fn test_vp8_picture_id_wrap_jumps_to_0x8000() {
        let mut info = StreamInfo::new(1, 1, "live", "v", StreamSourceType::RtmpPush);
        info.add_track(MediaTrack::video(0, CodecId::Vp8, Timebase::new(1, 1000)));
        let stream = RtcStream::new(Arc::new(info), "AA").unwrap();

        *stream.vp8_picture_id.lock() = u16::MAX;
        assert_eq!(stream.allocate_vp8_picture_id(), 0x8000);
        assert_eq!(stream.allocate_vp8_picture_id(), 0x8001);
    }

    #[test]
    fn test_send_history_serves_retransmission() {
        use crate::media::{MediaPacket, PacketFlag};

        let stream = RtcStream::new(stream_info(), "AA").unwrap();
        let packet = Arc::new(MediaPacket {
            track_id: 0,
            codec_id: CodecId::H264,
            data: bytes::Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xAA, 0xBB]),
            pts: 33,
            dts: 33,
            duration: 33,
            timebase: Timebase::new(1, 1000),
            flag: PacketFlag::Key,
            fragmentation: Some(crate::media::FragmentationHeader::new(vec![(4, 3)])),
        });
        stream.on_packet(&packet);

        // Video is the first media section in the offer.
        let ssrc = stream.offer_template.media[0].ssrc;
        // The first media packet of the stream has sequence number 0.
        let wire = stream.retransmit_lookup(ssrc, 0).expect("history must hold seq 0");
        let parsed = RtpPacket::unmarshal(&wire).unwrap();
        assert_eq!(parsed.sequence_number, 0);
        assert!(stream.retransmit_lookup(ssrc, 999).is_none());
    }

    #[test]
    fn test_class_keys_cover_media_fec_and_audio() {
        let stream = RtcStream::new(stream_info(), "AA").unwrap();
        let video_pt = u32::from(PAYLOAD_TYPE_OFFSET);
        let audio_pt = video_pt + 1;
        assert!(stream
            .class_keys
            .contains(&(u32::from(RED_PAYLOAD_TYPE) | (video_pt << 8))));
        assert!(stream.class_keys.contains(
            &(u32::from(RED_PAYLOAD_TYPE)
                | (u32::from(ULPFEC_PAYLOAD_TYPE) << 8)
                | (video_pt << 16))
        ));
        assert!(stream.class_keys.contains(&audio_pt));
    }
}
