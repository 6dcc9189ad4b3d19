//! Per-stream transcoding graph: decoder → filter → encoder, one worker
//! thread per stage, bounded condvar queues between them. The graph is
//! created when a source stream appears and an application configures
//! output profiles; each profile yields one derived stream re-registered
//! with the router.

pub mod backend;
pub mod errors;
pub mod queue;

use {
    self::backend::{CodecLibrary, DecoderSpec, EncoderSpec},
    self::queue::StageQueue,
    std::collections::HashMap,
    std::sync::Arc,
    std::thread::JoinHandle,
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

use crate::{
    config::OutputProfileConfig,
    media::{
        next_stream_id, ChannelLayout, CodecId, MediaType, SharedMediaPacket, StreamIdentifier,
        StreamInfo, StreamSourceType,
    },
    orchestrator::Orchestrator,
    router::{
        define::{ObserverInfo, ObserverKind, TrackFilter},
        RouterHandle, StreamProducer,
    },
};

/// Stage queue depth (frames / packets).
const STAGE_QUEUE_CAPACITY: usize = 60;

/// How long a stage blocks for downstream space before evicting.
const STAGE_PUSH_BUDGET: Duration = Duration::from_millis(40);

/// One decode→filter→encode chain for a single input track.
struct TrackPipeline {
    packet_queue: Arc<StageQueue<SharedMediaPacket>>,
    frame_queue: Arc<StageQueue<crate::media::MediaFrame>>,
    encode_queue: Arc<StageQueue<crate::media::MediaFrame>>,
    threads: Vec<JoinHandle<()>>,
}

impl TrackPipeline {
    fn build(
        library: &dyn CodecLibrary,
        decoder_spec: &DecoderSpec,
        encoder_spec: &EncoderSpec,
        producer: Arc<StreamProducer>,
    ) -> Result<Self, errors::TranscodeError> {
        let mut decoder = library.create_decoder(decoder_spec)?;
        let mut filter = if encoder_spec.codec.media_type() == MediaType::Video {
            library.create_rescaler(decoder_spec, encoder_spec)?
        } else {
            library.create_resampler(decoder_spec, encoder_spec)?
        };
        let mut encoder = library.create_encoder(encoder_spec)?;

        let packet_queue = Arc::new(StageQueue::<SharedMediaPacket>::new(STAGE_QUEUE_CAPACITY));
        let frame_queue = Arc::new(StageQueue::new(STAGE_QUEUE_CAPACITY));
        let encode_queue = Arc::new(StageQueue::new(STAGE_QUEUE_CAPACITY));

        let mut threads = Vec::with_capacity(3);

        // Decoder stage. A failed frame is logged and dropped; the stage
        // itself keeps running.
        {
            let inbound = packet_queue.clone();
            let outbound = frame_queue.clone();
            threads.push(std::thread::spawn(move || {
                while let Some(packet) = inbound.pop() {
                    match decoder.decode(&packet) {
                        Ok(frames) => {
                            for frame in frames {
                                outbound.push_with_budget(frame, STAGE_PUSH_BUDGET);
                            }
                        }
                        Err(err) => {
                            tracing::debug!("decode error (frame dropped): {err}");
                        }
                    }
                }
                outbound.kill();
            }));
        }

        // Filter stage (rescale / resample).
        {
            let inbound = frame_queue.clone();
            let outbound = encode_queue.clone();
            threads.push(std::thread::spawn(move || {
                while let Some(frame) = inbound.pop() {
                    match filter.filter(frame) {
                        Ok(Some(filtered)) => {
                            outbound.push_with_budget(filtered, STAGE_PUSH_BUDGET);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::debug!("filter error (frame dropped): {err}");
                        }
                    }
                }
                outbound.kill();
            }));
        }

        // Encoder stage: pushes straight into the derived stream's
        // producer inlet (non-blocking by contract).
        {
            let inbound = encode_queue.clone();
            threads.push(std::thread::spawn(move || {
                while let Some(frame) = inbound.pop() {
                    match encoder.encode(&frame) {
                        Ok(packets) => {
                            for packet in packets {
                                producer.push(packet);
                            }
                        }
                        Err(err) => {
                            tracing::debug!("encode error (frame dropped): {err}");
                        }
                    }
                }
            }));
        }

        Ok(Self {
            packet_queue,
            frame_queue,
            encode_queue,
            threads,
        })
    }

    fn feed(&self, packet: SharedMediaPacket) {
        self.packet_queue.push_nonblocking(packet);
    }

    fn stop(&mut self) {
        self.packet_queue.kill();
        self.frame_queue.kill();
        self.encode_queue.kill();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A running derived stream: its pipelines plus the pump task feeding them.
pub struct TranscodeStream {
    pub derived_identifier: StreamIdentifier,
    cancel: CancellationToken,
    pump: Option<tokio::task::JoinHandle<()>>,
    pipelines: Arc<parking_lot::Mutex<HashMap<u32, TrackPipeline>>>,
}

impl TranscodeStream {
    /// Build the graph for `profile` over `source`, register the derived
    /// stream and start pumping. Construction-time codec failures remove
    /// the affected track; if nothing remains, the profile yields no
    /// stream and the error propagates.
    pub async fn start(
        source: Arc<StreamInfo>,
        profile: &OutputProfileConfig,
        library: Arc<dyn CodecLibrary>,
        router: RouterHandle,
    ) -> Result<Self, errors::TranscodeError> {
        let derived_name = derived_stream_name(&source.name, profile);
        let mut derived = StreamInfo::new(
            next_stream_id(),
            source.application_id,
            source.application_name.clone(),
            derived_name,
            StreamSourceType::Transcoder,
        );

        let mut specs: Vec<(u32, DecoderSpec, EncoderSpec)> = Vec::new();

        for track in source.tracks.values() {
            let decoder_spec = DecoderSpec {
                codec: track.codec_id,
                timebase: track.timebase,
                extradata: track.extradata.clone(),
                width: track.width,
                height: track.height,
                sample_rate: track.sample_rate,
                channel_layout: track.channel_layout,
            };

            match track.media_type {
                MediaType::Video => {
                    let Some(video) = &profile.video else { continue };
                    let codec = parse_video_codec(&video.codec)?;
                    let spec = EncoderSpec::video(
                        codec,
                        video.width,
                        video.height,
                        video.framerate,
                        video.bitrate,
                    );
                    let mut out = crate::media::MediaTrack::video(track.id, codec, spec.timebase);
                    out.width = video.width;
                    out.height = video.height;
                    out.framerate = video.framerate;
                    out.bitrate = video.bitrate;
                    if codec == track.codec_id {
                        out.extradata = track.extradata.clone();
                    }
                    derived.add_track(out);
                    specs.push((track.id, decoder_spec, spec));
                }
                MediaType::Audio => {
                    let Some(audio) = &profile.audio else { continue };
                    let codec = parse_audio_codec(&audio.codec)?;
                    let layout = if audio.channels >= 2 {
                        track.channel_layout
                    } else {
                        ChannelLayout::Mono
                    };
                    let spec = EncoderSpec::audio(codec, audio.samplerate, layout, audio.bitrate);
                    let mut out = crate::media::MediaTrack::audio(track.id, codec, spec.timebase);
                    out.sample_rate = audio.samplerate;
                    out.channel_layout = layout;
                    out.bitrate = audio.bitrate;
                    if codec == track.codec_id {
                        out.extradata = track.extradata.clone();
                    }
                    derived.add_track(out);
                    specs.push((track.id, decoder_spec, spec));
                }
            }
        }

        let bypass = profile.bypass;
        if bypass {
            // Bypass reuses the source's track table untouched.
            derived.tracks = source.tracks.clone();
        }

        if derived.tracks.is_empty() {
            return Err(errors::TranscodeErrorValue::ConfigurationInvalid(format!(
                "profile {} produces no tracks for {}",
                profile.name,
                source.identifier()
            ))
            .into());
        }

        let derived = Arc::new(derived);
        let derived_identifier = derived.identifier();
        let producer = Arc::new(
            router
                .publish(derived.clone())
                .await
                .map_err(|err| errors::TranscodeErrorValue::ConfigurationInvalid(err.to_string()))?,
        );

        let pipelines = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let mut no_tracks_transcodable = false;
        if !bypass {
            let mut map = pipelines.lock();
            for (track_id, decoder_spec, encoder_spec) in &specs {
                match TrackPipeline::build(library.as_ref(), decoder_spec, encoder_spec, producer.clone()) {
                    Ok(pipeline) => {
                        map.insert(*track_id, pipeline);
                    }
                    Err(err) => {
                        tracing::error!(
                            "track {track_id} of {} is not transcodable: {err}",
                            source.identifier()
                        );
                    }
                }
            }
            no_tracks_transcodable = map.is_empty();
        }
        if no_tracks_transcodable {
            let _ = router.unpublish(derived_identifier.clone()).await;
            return Err(errors::TranscodeErrorValue::CodecNotFound(format!(
                "no transcodable track for profile {}",
                profile.name
            ))
            .into());
        }

        // Pump: source observer -> pipelines (or straight through on bypass).
        let connection = router
            .subscribe(
                source.identifier(),
                ObserverInfo::new(ObserverKind::Transcoder, TrackFilter::All),
            )
            .await
            .map_err(|err| errors::TranscodeErrorValue::ConfigurationInvalid(err.to_string()))?;

        let cancel = CancellationToken::new();
        let pump = {
            let cancel = cancel.clone();
            let pipelines = pipelines.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe = connection.recv() => {
                            let Some(packet) = maybe else { break };
                            if bypass {
                                producer.push_shared(packet);
                            } else if let Some(pipeline) =
                                pipelines.lock().get(&packet.track_id)
                            {
                                pipeline.feed(packet);
                            }
                        }
                        () = cancel.cancelled() => break,
                    }
                }
            })
        };

        Ok(Self {
            derived_identifier,
            cancel,
            pump: Some(pump),
            pipelines,
        })
    }

    /// Idempotent: kills every stage queue, joins the worker threads and
    /// stops the pump.
    pub async fn stop(&mut self, router: &RouterHandle) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        let pipelines = self.pipelines.clone();
        tokio::task::spawn_blocking(move || {
            for pipeline in pipelines.lock().values_mut() {
                pipeline.stop();
            }
        })
        .await
        .ok();
        let _ = router.unpublish(self.derived_identifier.clone()).await;
    }
}

fn derived_stream_name(input: &str, profile: &OutputProfileConfig) -> String {
    let name = profile.output_stream_name.replace("{input}", input);
    if name == input {
        format!("{input}_{}", profile.name)
    } else {
        name
    }
}

fn parse_video_codec(name: &str) -> Result<CodecId, errors::TranscodeError> {
    match name.to_ascii_lowercase().as_str() {
        "h264" | "avc" => Ok(CodecId::H264),
        "h265" | "hevc" => Ok(CodecId::H265),
        "vp8" => Ok(CodecId::Vp8),
        other => {
            Err(errors::TranscodeErrorValue::CodecNotFound(other.to_string()).into())
        }
    }
}

fn parse_audio_codec(name: &str) -> Result<CodecId, errors::TranscodeError> {
    match name.to_ascii_lowercase().as_str() {
        "opus" => Ok(CodecId::Opus),
        "aac" => Ok(CodecId::Aac),
        other => {
            Err(errors::TranscodeErrorValue::CodecNotFound(other.to_string()).into())
        }
    }
}

/// Module entry point: watches the router for new source streams and
/// maintains one [`TranscodeStream`] per configured output profile.
pub struct Transcoder {
    router: RouterHandle,
    orchestrator: Arc<Orchestrator>,
    library: Arc<dyn CodecLibrary>,
    active: parking_lot::Mutex<HashMap<StreamIdentifier, Vec<TranscodeStream>>>,
    cancel: CancellationToken,
}

impl Transcoder {
    #[must_use]
    pub fn new(
        router: RouterHandle,
        orchestrator: Arc<Orchestrator>,
        library: Arc<dyn CodecLibrary>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            orchestrator,
            library,
            active: parking_lot::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self: Arc<Self>) {
        let mut events = self.router.subscribe_stream_events();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(crate::router::define::StreamEvent::Published { stream_info }) => {
                            self.on_stream_published(stream_info).await;
                        }
                        Ok(crate::router::define::StreamEvent::Unpublished { identifier }) => {
                            self.on_stream_unpublished(&identifier).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("transcoder lagged {skipped} stream events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                () = self.cancel.cancelled() => break,
            }
        }

        // Drain everything on shutdown.
        let identifiers: Vec<_> = self.active.lock().keys().cloned().collect();
        for identifier in identifiers {
            self.on_stream_unpublished(&identifier).await;
        }
    }

    async fn on_stream_published(&self, stream_info: Arc<StreamInfo>) {
        if stream_info.source_type == StreamSourceType::Transcoder {
            return;
        }
        let Some(application) = self.orchestrator.application_by_id(stream_info.application_id)
        else {
            return;
        };
        if application.config.output_profiles.is_empty() {
            return;
        }

        let mut streams = Vec::new();
        for profile in &application.config.output_profiles {
            match TranscodeStream::start(
                stream_info.clone(),
                profile,
                self.library.clone(),
                self.router.clone(),
            )
            .await
            {
                Ok(stream) => {
                    tracing::info!(
                        "transcode profile {} started: {} -> {}",
                        profile.name,
                        stream_info.identifier(),
                        stream.derived_identifier
                    );
                    streams.push(stream);
                }
                Err(err) => {
                    tracing::error!(
                        "transcode profile {} failed for {}: {err}",
                        profile.name,
                        stream_info.identifier()
                    );
                }
            }
        }
        if !streams.is_empty() {
            self.active.lock().insert(stream_info.identifier(), streams);
        }
    }

    async fn on_stream_unpublished(&self, identifier: &StreamIdentifier) {
        let streams = self.active.lock().remove(identifier);
        if let Some(mut streams) = streams {
            for stream in &mut streams {
                stream.stop(&self.router).await;
            }
        }
    }
}
