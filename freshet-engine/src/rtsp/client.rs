use {
    super::{
        depacketizer::H264Depacketizer,
        errors::{RtspError, RtspErrorValue},
    },
    crate::codec::avc::AvcDecoderConfigurationRecord,
    crate::media::{
        next_stream_id, CodecId, MediaPacket, MediaTrack, PacketFlag, StreamInfo,
        StreamSourceType, Timebase,
    },
    crate::orchestrator::Application,
    crate::router::{RouterHandle, StreamProducer},
    crate::webrtc::rtp::RtpPacket,
    crate::webrtc::sdp::{SdpMediaType, SessionDescription},
    base64::{engine::general_purpose::STANDARD, Engine},
    bytes::{Bytes, BytesMut},
    std::collections::HashMap,
    std::sync::Arc,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
};

const RTP_CLOCK: Timebase = Timebase { num: 1, den: 90000 };
const USER_AGENT: &str = "Freshet";

/// RTSP pull session: DESCRIBE → SETUP (interleaved) → PLAY, then the
/// interleaved RTP read loop feeding the router.
pub struct RtspPullSession {
    url: String,
    application: Arc<Application>,
    stream_name: String,
    router: RouterHandle,
    cseq: u32,
}

impl RtspPullSession {
    #[must_use]
    pub fn new(
        url: String,
        application: Arc<Application>,
        stream_name: String,
        router: RouterHandle,
    ) -> Self {
        Self {
            url,
            application,
            stream_name,
            router,
            cseq: 0,
        }
    }

    /// Run the handshake; returns once PLAY is accepted, leaving the
    /// media loop running as its own task.
    pub async fn start(mut self) -> Result<(), RtspError> {
        let address = address_from_url(&self.url)?;
        let mut stream = TcpStream::connect(&address).await?;

        let describe = self
            .request(&mut stream, "DESCRIBE", &[("Accept", "application/sdp")])
            .await?;
        let sdp = SessionDescription::unmarshal(&describe.body)
            .map_err(|err| RtspErrorValue::BadResponse(err.to_string()))?;

        let (stream_info, control) = self.stream_from_sdp(&sdp)?;

        let setup_url = if control.starts_with("rtsp://") {
            control
        } else {
            format!("{}/{}", self.url.trim_end_matches('/'), control)
        };
        self.request_url(
            &mut stream,
            "SETUP",
            &setup_url,
            &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
        )
        .await?;
        self.request(&mut stream, "PLAY", &[("Range", "npt=0.000-")])
            .await?;

        let stream_info = Arc::new(stream_info);
        let producer = self.router.publish(stream_info.clone()).await?;
        tracing::info!(
            "rtsp pull established: {} -> {}",
            self.url,
            stream_info.identifier()
        );

        let router = self.router.clone();
        tokio::spawn(async move {
            if let Err(err) = media_loop(stream, &producer).await {
                tracing::info!("rtsp pull ended: {err}");
            }
            // Grace period before teardown so rejoining players do not
            // thrash the orchestrator with new pull requests.
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            let _ = router.unpublish(producer.identifier().clone()).await;
        });

        Ok(())
    }

    fn stream_from_sdp(
        &self,
        sdp: &SessionDescription,
    ) -> Result<(StreamInfo, String), RtspError> {
        let mut info = StreamInfo::new(
            next_stream_id(),
            self.application.id,
            self.application.name.clone(),
            self.stream_name.clone(),
            StreamSourceType::RtspPull,
        );

        for media in &sdp.media {
            if media.media_type != SdpMediaType::Video {
                continue;
            }
            let Some(payload) = media
                .payloads
                .iter()
                .find(|payload| payload.codec.eq_ignore_ascii_case("H264"))
            else {
                continue;
            };

            let mut track = MediaTrack::video(0, CodecId::H264, RTP_CLOCK);
            if let Some(fmtp) = &payload.fmtp {
                if let Some(record) = record_from_fmtp(fmtp) {
                    if let Ok(sps) = crate::codec::avc::parse_sps(&record.sps[0]) {
                        track.width = sps.width;
                        track.height = sps.height;
                    }
                    track.extradata = Some(record.serialize());
                }
            }
            info.add_track(track);

            let control = media
                .extra_attributes
                .iter()
                .find_map(|attribute| attribute.strip_prefix("control:"))
                .unwrap_or("trackID=0")
                .to_string();
            return Ok((info, control));
        }

        Err(RtspErrorValue::NoMedia.into())
    }

    async fn request(
        &mut self,
        stream: &mut TcpStream,
        method: &str,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse, RtspError> {
        let url = self.url.clone();
        self.request_url(stream, method, &url, headers).await
    }

    async fn request_url(
        &mut self,
        stream: &mut TcpStream,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse, RtspError> {
        self.cseq += 1;
        let mut request = format!(
            "{method} {url} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: {USER_AGENT}\r\n",
            self.cseq
        );
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        let response = read_response(stream).await?;
        if response.status != 200 {
            return Err(RtspErrorValue::Status(response.status).into());
        }
        Ok(response)
    }
}

struct RtspResponse {
    status: u16,
    #[allow(dead_code)]
    headers: HashMap<String, String>,
    body: String,
}

async fn read_response(stream: &mut TcpStream) -> Result<RtspResponse, RtspError> {
    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; 2048];

    loop {
        if let Some(header_end) = find_header_end(&buffer) {
            let header_text = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let mut lines = header_text.lines();
            let status_line = lines
                .next()
                .ok_or_else(|| RtspErrorValue::BadResponse("empty response".to_string()))?;
            let status: u16 = status_line
                .split(' ')
                .nth(1)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| RtspErrorValue::BadResponse(status_line.to_string()))?;

            let mut headers = HashMap::new();
            for line in lines {
                if let Some((name, value)) = line.split_once(':') {
                    headers.insert(name.trim().to_lowercase(), value.trim().to_string());
                }
            }

            let content_length: usize = headers
                .get("content-length")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0);

            while buffer.len() < header_end + 4 + content_length {
                let read = stream.read(&mut chunk).await?;
                if read == 0 {
                    return Err(RtspErrorValue::BadResponse("eof in body".to_string()).into());
                }
                buffer.extend_from_slice(&chunk[..read]);
            }

            let body = String::from_utf8_lossy(
                &buffer[header_end + 4..header_end + 4 + content_length],
            )
            .to_string();
            return Ok(RtspResponse {
                status,
                headers,
                body,
            });
        }

        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(RtspErrorValue::BadResponse("eof in headers".to_string()).into());
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Interleaved read loop: `$` frames carry RTP on channel 0.
async fn media_loop(mut stream: TcpStream, producer: &StreamProducer) -> Result<(), RtspError> {
    let mut depacketizer = H264Depacketizer::new();
    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; 8192];
    let mut first_timestamp: Option<u32> = None;

    loop {
        while buffer.len() >= 4 && buffer[0] == b'$' {
            let channel = buffer[1];
            let length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
            if buffer.len() < 4 + length {
                break;
            }
            let frame = buffer.split_to(4 + length);
            if channel == 0 {
                if let Ok(packet) = RtpPacket::unmarshal(&frame[4..]) {
                    if let Some(reassembled) = depacketizer.push(&packet) {
                        let base = *first_timestamp.get_or_insert(reassembled.timestamp);
                        let pts = i64::from(reassembled.timestamp.wrapping_sub(base));
                        producer.push(MediaPacket {
                            track_id: 0,
                            codec_id: CodecId::H264,
                            data: reassembled.data,
                            pts,
                            dts: pts,
                            duration: 0,
                            timebase: RTP_CLOCK,
                            flag: if reassembled.keyframe {
                                PacketFlag::Key
                            } else {
                                PacketFlag::Delta
                            },
                            fragmentation: Some(reassembled.fragmentation),
                        });
                    }
                }
            }
        }

        // Skip any non-interleaved line (server keepalive responses).
        if !buffer.is_empty() && buffer[0] != b'$' {
            if let Some(position) = buffer.iter().position(|&byte| byte == b'$') {
                let _ = buffer.split_to(position);
            } else {
                buffer.clear();
            }
        }

        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// `sprop-parameter-sets` from an H.264 fmtp line back into an AVCC record.
fn record_from_fmtp(fmtp: &str) -> Option<AvcDecoderConfigurationRecord> {
    let sprop = fmtp
        .split(';')
        .find_map(|param| param.trim().strip_prefix("sprop-parameter-sets="))?;
    let mut sets = sprop.split(',');
    let sps = STANDARD.decode(sets.next()?).ok()?;
    let pps = STANDARD.decode(sets.next()?).ok()?;
    if sps.len() < 4 {
        return None;
    }
    Some(AvcDecoderConfigurationRecord {
        profile_indication: sps[1],
        profile_compatibility: sps[2],
        level_indication: sps[3],
        nalu_length_size: 4,
        sps: vec![Bytes::from(sps)],
        pps: vec![Bytes::from(pps)],
    })
}

fn address_from_url(url: &str) -> Result<String, RtspError> {
    let without_scheme = url
        .strip_prefix("rtsp://")
        .ok_or_else(|| RtspErrorValue::BadResponse(format!("not an rtsp url: {url}")))?;
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    if host_port.contains(':') {
        Ok(host_port.to_string())
    } else {
        Ok(format!("{host_port}:554"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_url() {
        assert_eq!(
            address_from_url("rtsp://cam.example.com/live/1").unwrap(),
            "cam.example.com:554"
        );
        assert_eq!(
            address_from_url("rtsp://10.0.0.5:8554/s").unwrap(),
            "10.0.0.5:8554"
        );
        assert!(address_from_url("http://nope").is_err());
    }

    #[test]
    fn test_record_from_fmtp() {
        // Matching SPS/PPS pair, base64-encoded.
        let sps = [0x67u8, 0x42, 0xC0, 0x28, 0xED];
        let pps = [0x68u8, 0xCB];
        let fmtp = format!(
            "packetization-mode=1;sprop-parameter-sets={},{}",
            STANDARD.encode(sps),
            STANDARD.encode(pps)
        );
        let record = record_from_fmtp(&fmtp).unwrap();
        assert_eq!(record.profile_indication, 0x42);
        assert_eq!(record.sps[0].len(), 5);
        assert_eq!(record.pps[0].len(), 2);
    }
}
