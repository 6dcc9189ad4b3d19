use {
    super::{
        chunk::{csid, packetizer::ChunkPacketizer, unpacketizer::ChunkUnpacketizer, ChunkInfo},
        errors::{SessionError, SessionErrorValue},
        handshake::HandshakeServer,
        messages::{msg_type_id, user_control_event, MessageParser, RtmpMessage},
    },
    crate::bytesio::bytes_writer::BytesWriter,
    crate::codec::{
        aac::AudioSpecificConfig,
        avc::{self, AvcDecoderConfigurationRecord},
    },
    crate::flv::{
        amf0::{Amf0Value, Amf0Writer},
        demuxer::{AudioTag, FlvTagDemuxer, VideoTag},
    },
    crate::media::{
        next_stream_id, ChannelLayout, CodecId, MediaPacket, MediaTrack, PacketFlag, StreamInfo,
        StreamSourceType, Timebase,
    },
    crate::orchestrator::{Application, Orchestrator},
    crate::router::{RouterHandle, StreamProducer},
    byteorder::BigEndian,
    bytes::BytesMut,
    std::collections::HashMap,
    std::net::SocketAddr,
    std::sync::Arc,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
};

const VIDEO_TRACK_ID: u32 = 0;
const AUDIO_TRACK_ID: u32 = 1;

/// The stream id handed out by createStream.
const PUBLISH_STREAM_ID: u32 = 1;

const OUTBOUND_CHUNK_SIZE: usize = 4096;
const ACK_WINDOW_SIZE: u32 = 2_500_000;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct MetadataInfo {
    width: u32,
    height: u32,
    framerate: f64,
    video_bitrate: u64,
    audio_bitrate: u64,
}

/// Everything the session learns about the inbound stream before and
/// after registration.
#[derive(Default)]
struct PublishContext {
    stream_info: Option<StreamInfo>,
    producer: Option<StreamProducer>,
    avc_config: Option<AvcDecoderConfigurationRecord>,
    metadata: MetadataInfo,
    saw_keyframe: bool,
}

/// One accepted RTMP connection: handshake, command exchange, then the
/// publishing message pump that feeds the router.
pub struct ServerSession {
    stream: TcpStream,
    remote_addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    handshake: HandshakeServer,
    unpacketizer: ChunkUnpacketizer,
    packetizer: ChunkPacketizer,
    pub app_name: String,
    pub stream_name: String,
    domain: String,
    application: Option<Arc<Application>>,
    publish: PublishContext,
    bytes_received: u64,
    last_acked: u64,
}

impl ServerSession {
    #[must_use]
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        router: RouterHandle,
    ) -> Self {
        Self {
            stream,
            remote_addr,
            orchestrator,
            router,
            handshake: HandshakeServer::new(),
            unpacketizer: ChunkUnpacketizer::new(),
            packetizer: ChunkPacketizer::new(),
            app_name: String::new(),
            stream_name: String::new(),
            domain: String::new(),
            application: None,
            publish: PublishContext::default(),
            bytes_received: 0,
            last_acked: 0,
        }
    }

    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.run_inner().await;
        self.cleanup().await;
        result
    }

    async fn run_inner(&mut self) -> Result<(), SessionError> {
        tokio::time::timeout(HANDSHAKE_TIMEOUT, self.do_handshake())
            .await
            .map_err(|_| SessionError {
                value: SessionErrorValue::HandshakeTimeout,
            })??;

        let mut buffer = [0u8; 8192];
        loop {
            let read = self.stream.read(&mut buffer).await?;
            if read == 0 {
                return Err(SessionErrorValue::ConnectionClosed.into());
            }
            self.bytes_received += read as u64;
            self.unpacketizer.extend_data(&buffer[..read]);

            let chunks = self.unpacketizer.update().map_err(SessionError::from)?;
            for chunk in chunks {
                let message = MessageParser::parse(chunk)?;
                self.handle_message(message).await?;
            }
            self.maybe_send_ack().await?;
        }
    }

    async fn do_handshake(&mut self) -> Result<(), SessionError> {
        let mut buffer = [0u8; 4096];
        loop {
            let read = self.stream.read(&mut buffer).await?;
            if read == 0 {
                return Err(SessionErrorValue::ConnectionClosed.into());
            }
            self.handshake.extend_data(&buffer[..read]);
            let response = self.handshake.handshake()?;
            if !response.is_empty() {
                self.stream.write_all(&response).await?;
            }
            if self.handshake.is_finished() {
                let leftover = self.handshake.extract_remaining_bytes();
                if !leftover.is_empty() {
                    self.unpacketizer.extend_data(&leftover);
                }
                return Ok(());
            }
        }
    }

    async fn handle_message(&mut self, message: RtmpMessage) -> Result<(), SessionError> {
        match message {
            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                others,
            } => {
                self.handle_command(&command_name, transaction_id, &command_object, others)
                    .await?;
            }
            RtmpMessage::Amf0Data { values } => self.handle_metadata(&values),
            RtmpMessage::Audio { timestamp, data } => self.handle_audio(timestamp, data).await?,
            RtmpMessage::Video { timestamp, data } => self.handle_video(timestamp, data).await?,
            RtmpMessage::SetChunkSize { chunk_size } => {
                self.unpacketizer.update_max_chunk_size(chunk_size as usize);
            }
            RtmpMessage::UserControl { event_type, data } => {
                if event_type == user_control_event::PING_REQUEST {
                    self.send_user_control(user_control_event::PING_RESPONSE, &data)
                        .await?;
                }
            }
            RtmpMessage::WindowAcknowledgementSize { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::SetPeerBandwidth { .. }
            | RtmpMessage::Abort
            | RtmpMessage::Unknown { .. } => {}
        }
        Ok(())
    }

    async fn handle_command(
        &mut self,
        name: &str,
        transaction_id: f64,
        command_object: &Amf0Value,
        others: Vec<Amf0Value>,
    ) -> Result<(), SessionError> {
        match name {
            "connect" => self.on_connect(transaction_id, command_object).await,
            "createStream" => self.on_create_stream(transaction_id).await,
            "publish" => self.on_publish(others).await,
            "deleteStream" | "FCUnpublish" => {
                self.cleanup().await;
                Ok(())
            }
            // Pre-publish chatter that needs no reply.
            "releaseStream" | "FCPublish" | "getStreamLength" => Ok(()),
            other => {
                tracing::debug!("ignoring rtmp command: {other}");
                Ok(())
            }
        }
    }

    async fn on_connect(
        &mut self,
        transaction_id: f64,
        command_object: &Amf0Value,
    ) -> Result<(), SessionError> {
        self.app_name = command_object
            .property("app")
            .and_then(Amf0Value::as_str)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        self.domain = command_object
            .property("tcUrl")
            .and_then(Amf0Value::as_str)
            .map(domain_from_tc_url)
            .unwrap_or_default();

        self.send_control_u32(msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE, ACK_WINDOW_SIZE)
            .await?;
        self.send_set_peer_bandwidth().await?;
        self.send_set_chunk_size().await?;

        let mut properties = HashMap::new();
        properties.insert(
            "fmsVer".to_string(),
            Amf0Value::UTF8String("FMS/3,0,1,123".to_string()),
        );
        properties.insert("capabilities".to_string(), Amf0Value::Number(31.0));

        let mut information = HashMap::new();
        information.insert(
            "level".to_string(),
            Amf0Value::UTF8String("status".to_string()),
        );
        information.insert(
            "code".to_string(),
            Amf0Value::UTF8String("NetConnection.Connect.Success".to_string()),
        );
        information.insert(
            "description".to_string(),
            Amf0Value::UTF8String("Connection succeeded.".to_string()),
        );
        information.insert("objectEncoding".to_string(), Amf0Value::Number(0.0));

        self.send_command(
            0,
            &[
                Amf0Value::UTF8String("_result".to_string()),
                Amf0Value::Number(transaction_id),
                Amf0Value::Object(properties),
                Amf0Value::Object(information),
            ],
        )
        .await
    }

    async fn on_create_stream(&mut self, transaction_id: f64) -> Result<(), SessionError> {
        self.send_command(
            0,
            &[
                Amf0Value::UTF8String("_result".to_string()),
                Amf0Value::Number(transaction_id),
                Amf0Value::Null,
                Amf0Value::Number(f64::from(PUBLISH_STREAM_ID)),
            ],
        )
        .await
    }

    async fn on_publish(&mut self, others: Vec<Amf0Value>) -> Result<(), SessionError> {
        let raw_name = others
            .first()
            .and_then(Amf0Value::as_str)
            .unwrap_or_default();
        // Strip any query part an encoder appends (auth tokens etc.).
        self.stream_name = raw_name.split('?').next().unwrap_or_default().to_string();

        if self.stream_name.is_empty() {
            self.send_publish_status("error", "NetStream.Publish.BadName", "Empty stream name")
                .await?;
            return Err(SessionErrorValue::PublishRejected("empty stream name".to_string()).into());
        }

        match self
            .orchestrator
            .resolve_application(&self.domain, &self.app_name)
        {
            Ok(application) => {
                if !application.config.providers.rtmp {
                    self.send_publish_status(
                        "error",
                        "NetStream.Publish.Denied",
                        "RTMP ingest disabled for this application",
                    )
                    .await?;
                    return Err(SessionErrorValue::PublishRejected(
                        "rtmp provider disabled".to_string(),
                    )
                    .into());
                }
                let info = StreamInfo::new(
                    next_stream_id(),
                    application.id,
                    application.name.clone(),
                    self.stream_name.clone(),
                    StreamSourceType::RtmpPush,
                );
                self.publish.stream_info = Some(info);
                self.application = Some(application);
            }
            Err(err) => {
                self.send_publish_status("error", "NetStream.Publish.BadName", &err.to_string())
                    .await?;
                return Err(SessionErrorValue::PublishRejected(err.to_string()).into());
            }
        }

        self.send_stream_begin().await?;
        self.send_publish_status("status", "NetStream.Publish.Start", "Start publishing")
            .await?;
        tracing::info!(
            "rtmp publish accepted: {}/{} from {}",
            self.app_name, self.stream_name, self.remote_addr
        );
        Ok(())
    }

    fn handle_metadata(&mut self, values: &[Amf0Value]) {
        // "@setDataFrame", "onMetaData", { ... }
        let Some(data) = values.iter().find(|v| v.property("width").is_some()) else {
            return;
        };
        let meta = &mut self.publish.metadata;
        if let Some(width) = data.property("width").and_then(Amf0Value::as_number) {
            meta.width = width as u32;
        }
        if let Some(height) = data.property("height").and_then(Amf0Value::as_number) {
            meta.height = height as u32;
        }
        if let Some(framerate) = data.property("framerate").and_then(Amf0Value::as_number) {
            meta.framerate = framerate;
        }
        if let Some(rate) = data.property("videodatarate").and_then(Amf0Value::as_number) {
            meta.video_bitrate = (rate * 1000.0) as u64;
        }
        if let Some(rate) = data.property("audiodatarate").and_then(Amf0Value::as_number) {
            meta.audio_bitrate = (rate * 1000.0) as u64;
        }
    }

    async fn handle_video(
        &mut self,
        timestamp: u32,
        data: BytesMut,
    ) -> Result<(), SessionError> {
        match FlvTagDemuxer::demux_video(data)? {
            VideoTag::SequenceHeader { codec_id, config } => {
                let codec = if codec_id == crate::flv::define::video_codec_id::HEVC {
                    CodecId::H265
                } else {
                    CodecId::H264
                };
                let mut track = MediaTrack::video(VIDEO_TRACK_ID, codec, Timebase::new(1, 1000));
                track.framerate = self.publish.metadata.framerate;
                track.bitrate = self.publish.metadata.video_bitrate;
                track.width = self.publish.metadata.width;
                track.height = self.publish.metadata.height;
                track.extradata = Some(config.clone());

                if codec == CodecId::H264 {
                    let record = AvcDecoderConfigurationRecord::parse(&config)?;
                    if let Ok(sps) = avc::parse_sps(&record.sps[0]) {
                        track.width = sps.width;
                        track.height = sps.height;
                    }
                    self.publish.avc_config = Some(record);
                }

                if let Some(info) = &mut self.publish.stream_info {
                    info.add_track(track);
                }
                Ok(())
            }
            VideoTag::Frame {
                codec_id,
                keyframe,
                cts,
                data,
            } => {
                let codec = if codec_id == crate::flv::define::video_codec_id::HEVC {
                    CodecId::H265
                } else {
                    CodecId::H264
                };
                let nalu_length_size = match (codec, &self.publish.avc_config) {
                    (CodecId::H264, Some(record)) => record.nalu_length_size,
                    // An AVC frame without its decoder configuration is useless.
                    (CodecId::H264, None) => return Ok(()),
                    // HVCC carries 4-byte NAL lengths.
                    _ => 4,
                };
                let (payload, fragmentation) = avc::avcc_to_annexb(&data, nalu_length_size)?;

                self.ensure_registered().await?;

                let dts = i64::from(timestamp);
                let packet = MediaPacket {
                    track_id: VIDEO_TRACK_ID,
                    codec_id: codec,
                    data: payload,
                    pts: dts + i64::from(cts),
                    dts,
                    duration: 0,
                    timebase: Timebase::new(1, 1000),
                    flag: if keyframe { PacketFlag::Key } else { PacketFlag::Delta },
                    fragmentation: Some(fragmentation),
                };

                if keyframe && !self.publish.saw_keyframe {
                    self.publish.saw_keyframe = true;
                    tracing::info!(
                        "stream published (first keyframe): {}/{}",
                        self.app_name, self.stream_name
                    );
                }

                if let Some(producer) = &self.publish.producer {
                    producer.push(packet);
                }
                Ok(())
            }
            VideoTag::EndOfSequence => Ok(()),
        }
    }

    async fn handle_audio(
        &mut self,
        timestamp: u32,
        data: BytesMut,
    ) -> Result<(), SessionError> {
        match FlvTagDemuxer::demux_audio(data)? {
            AudioTag::SequenceHeader { config } => {
                let parsed = AudioSpecificConfig::parse(&config)?;
                let mut track =
                    MediaTrack::audio(AUDIO_TRACK_ID, CodecId::Aac, Timebase::new(1, 1000));
                track.sample_rate = parsed.sample_rate;
                track.channel_layout = ChannelLayout::from_count(parsed.channel_configuration);
                track.bitrate = self.publish.metadata.audio_bitrate;
                track.extradata = Some(config);
                if let Some(info) = &mut self.publish.stream_info {
                    info.add_track(track);
                }
                Ok(())
            }
            AudioTag::Frame { data } => {
                self.ensure_registered().await?;
                let ts = i64::from(timestamp);
                let packet = MediaPacket {
                    track_id: AUDIO_TRACK_ID,
                    codec_id: CodecId::Aac,
                    data,
                    pts: ts,
                    dts: ts,
                    duration: 0,
                    timebase: Timebase::new(1, 1000),
                    flag: PacketFlag::Key,
                    fragmentation: None,
                };
                if let Some(producer) = &self.publish.producer {
                    producer.push(packet);
                }
                Ok(())
            }
        }
    }

    /// Register with the router on the first media frame, once at least
    /// one track is known.
    async fn ensure_registered(&mut self) -> Result<(), SessionError> {
        if self.publish.producer.is_some() {
            return Ok(());
        }
        let Some(info) = &self.publish.stream_info else {
            return Ok(());
        };
        if info.tracks.is_empty() {
            return Ok(());
        }
        let info = Arc::new(info.clone());
        let producer = self.router.publish(info).await?;
        self.publish.producer = Some(producer);
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(producer) = self.publish.producer.take() {
            let identifier = producer.identifier().clone();
            let _ = self.router.unpublish(identifier).await;
            tracing::info!(
                "rtmp stream removed: {}/{} ({})",
                self.app_name, self.stream_name, self.remote_addr
            );
        }
    }

    async fn maybe_send_ack(&mut self) -> Result<(), SessionError> {
        if self.bytes_received - self.last_acked >= u64::from(ACK_WINDOW_SIZE) {
            self.last_acked = self.bytes_received;
            self.send_control_u32(
                msg_type_id::ACKNOWLEDGEMENT,
                (self.bytes_received & 0xFFFF_FFFF) as u32,
            )
            .await?;
        }
        Ok(())
    }

    async fn send_control_u32(&mut self, msg_type: u8, value: u32) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(value)?;
        self.send_chunk(csid::PROTOCOL_CONTROL, msg_type, 0, writer.extract_current_bytes())
            .await
    }

    async fn send_set_peer_bandwidth(&mut self) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(ACK_WINDOW_SIZE)?;
        writer.write_u8(2)?; // dynamic limit
        self.send_chunk(
            csid::PROTOCOL_CONTROL,
            msg_type_id::SET_PEER_BANDWIDTH,
            0,
            writer.extract_current_bytes(),
        )
        .await
    }

    async fn send_set_chunk_size(&mut self) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        writer.write_u32::<BigEndian>(OUTBOUND_CHUNK_SIZE as u32)?;
        self.send_chunk(
            csid::PROTOCOL_CONTROL,
            msg_type_id::SET_CHUNK_SIZE,
            0,
            writer.extract_current_bytes(),
        )
        .await?;
        self.packetizer.update_max_chunk_size(OUTBOUND_CHUNK_SIZE);
        Ok(())
    }

    async fn send_stream_begin(&mut self) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        writer.write_u16::<BigEndian>(user_control_event::STREAM_BEGIN)?;
        writer.write_u32::<BigEndian>(PUBLISH_STREAM_ID)?;
        self.send_chunk(
            csid::PROTOCOL_CONTROL,
            msg_type_id::USER_CONTROL_EVENT,
            0,
            writer.extract_current_bytes(),
        )
        .await
    }

    async fn send_user_control(
        &mut self,
        event_type: u16,
        data: &[u8],
    ) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        writer.write_u16::<BigEndian>(event_type)?;
        writer.write(data)?;
        self.send_chunk(
            csid::PROTOCOL_CONTROL,
            msg_type_id::USER_CONTROL_EVENT,
            0,
            writer.extract_current_bytes(),
        )
        .await
    }

    async fn send_publish_status(
        &mut self,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<(), SessionError> {
        let mut information = HashMap::new();
        information.insert(
            "level".to_string(),
            Amf0Value::UTF8String(level.to_string()),
        );
        information.insert("code".to_string(), Amf0Value::UTF8String(code.to_string()));
        information.insert(
            "description".to_string(),
            Amf0Value::UTF8String(description.to_string()),
        );
        self.send_command(
            PUBLISH_STREAM_ID,
            &[
                Amf0Value::UTF8String("onStatus".to_string()),
                Amf0Value::Number(0.0),
                Amf0Value::Null,
                Amf0Value::Object(information),
            ],
        )
        .await
    }

    async fn send_command(
        &mut self,
        msg_stream_id: u32,
        values: &[Amf0Value],
    ) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        for value in values {
            Amf0Writer::write_any(&mut writer, value)?;
        }
        self.send_chunk(
            csid::COMMAND,
            msg_type_id::COMMAND_AMF0,
            msg_stream_id,
            writer.extract_current_bytes(),
        )
        .await
    }

    async fn send_chunk(
        &mut self,
        chunk_stream_id: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Result<(), SessionError> {
        let info = ChunkInfo::new(
            chunk_stream_id,
            0,
            0,
            payload.len() as u32,
            msg_type_id,
            msg_stream_id,
            payload,
        );
        let wire = self.packetizer.write_chunk(&info)?;
        self.stream.write_all(&wire).await?;
        Ok(())
    }
}

fn domain_from_tc_url(tc_url: &str) -> String {
    tc_url
        .split("://")
        .nth(1)
        .unwrap_or(tc_url)
        .split('/')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::domain_from_tc_url;

    #[test]
    fn test_domain_extraction() {
        assert_eq!(domain_from_tc_url("rtmp://host.example.com/live"), "host.example.com");
        assert_eq!(domain_from_tc_url("rtmp://10.0.0.1:1935/live"), "10.0.0.1");
        assert_eq!(domain_from_tc_url("garbage"), "garbage");
    }
}
