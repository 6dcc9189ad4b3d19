//! WebRTC delivery: SDP offers over WebSocket signaling, an ICE-Lite
//! UDP endpoint multiplexing STUN/DTLS/RTP-RTCP, RED+ULPFEC packetization
//! and NACK-driven retransmission.

pub mod certificate;
pub mod dtls;
pub mod errors;
pub mod history;
pub mod ice;
pub mod packetizer;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod srtp;
pub mod stream;
pub mod stun;
pub mod ulpfec;

use {
    self::certificate::Certificate,
    dashmap::DashMap,
    self::dtls::{looks_like_dtls, DtlsBackend, NullDtlsBackend},
    self::errors::{RtcError, RtcErrorValue},
    self::session::RtcSession,
    std::net::SocketAddr,
    std::sync::Arc,
    std::time::Duration,
    self::stream::RtcStream,
    self::stun::{looks_like_stun, StunMessage},
    tokio::net::UdpSocket,
    tokio_util::sync::CancellationToken,
    uuid::Uuid,
};

use crate::{
    media::{StreamInfo, StreamSourceType},
    orchestrator::Orchestrator,
    router::{
        define::{ObserverInfo, ObserverKind, StreamEvent, TrackFilter},
        RouterHandle,
    },
};

/// Classification for inbound RTP vs RTCP on the muxed socket.
fn looks_like_rtp_or_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (128..=191).contains(&data[0])
}

fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (192..=223).contains(&data[1])
}

/// The WebRTC publisher module: one UDP endpoint for all sessions, one
/// [`RtcStream`] per published stream.
pub struct WebRtcPublisher {
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    socket: Arc<UdpSocket>,
    dtls_backend: Arc<dyn DtlsBackend>,
    candidate_address: String,
    session_timeout: Duration,
    streams: DashMap<(String, String), Arc<RtcStream>>,
    sessions: DashMap<Uuid, SessionEntry>,
    sessions_by_ufrag: DashMap<String, Uuid>,
    sessions_by_addr: DashMap<SocketAddr, Uuid>,
    cancel: CancellationToken,
}

struct SessionEntry {
    session: Arc<RtcSession>,
    stream_key: (String, String),
}

impl WebRtcPublisher {
    /// Bind the ICE UDP endpoint and start the demultiplexer, stream
    /// watcher and housekeeping tasks.
    pub async fn start(
        orchestrator: Arc<Orchestrator>,
        router: RouterHandle,
        server_ip: &str,
        ice_port: u16,
        certificate: Option<Certificate>,
    ) -> Result<Arc<Self>, RtcError> {
        let socket = UdpSocket::bind(("0.0.0.0", ice_port)).await?;
        let certificate = certificate.unwrap_or_else(Certificate::ephemeral);

        let publisher = Arc::new(Self {
            orchestrator,
            router,
            socket: Arc::new(socket),
            dtls_backend: NullDtlsBackend::new(certificate),
            candidate_address: format!("{server_ip} {ice_port}"),
            session_timeout: Duration::from_secs(30),
            streams: DashMap::new(),
            sessions: DashMap::new(),
            sessions_by_ufrag: DashMap::new(),
            sessions_by_addr: DashMap::new(),
            cancel: CancellationToken::new(),
        });
        tracing::info!("webrtc ice endpoint on udp://0.0.0.0:{ice_port}");

        let demuxer = publisher.clone();
        tokio::spawn(async move { demuxer.demux_loop().await });
        let watcher = publisher.clone();
        tokio::spawn(async move { watcher.watch_streams().await });
        let sweeper = publisher.clone();
        tokio::spawn(async move { sweeper.housekeeping_loop().await });

        Ok(publisher)
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.dtls_backend.certificate().fingerprint().to_string()
    }

    /// Create a viewer session on `app/stream`; returns the session id,
    /// the SDP offer text and the host candidate line.
    pub fn create_session(
        &self,
        app_name: &str,
        stream_name: &str,
    ) -> Result<(Uuid, String, String), RtcError> {
        let key = (app_name.to_string(), stream_name.to_string());
        let stream = self
            .streams
            .get(&key)
            .map(|entry| entry.clone())
            .ok_or(RtcErrorValue::StreamNotFound)?;

        let session = RtcSession::new(&stream, self.socket.clone(), self.dtls_backend.clone());
        let candidate = format!(
            "candidate:0 1 UDP 2130706431 {} typ host",
            self.candidate_address
        );
        let offer = session
            .make_offer(&candidate)
            .ok_or(RtcErrorValue::StreamNotFound)?
            .marshal();

        self.sessions_by_ufrag
            .insert(session.local_ufrag(), session.id);
        stream.add_session(session.clone());
        let id = session.id;
        self.sessions.insert(
            id,
            SessionEntry {
                session,
                stream_key: key,
            },
        );
        tracing::info!("webrtc session {id} created for {app_name}/{stream_name}");
        Ok((id, offer, candidate))
    }

    /// Apply a viewer's SDP answer.
    pub fn apply_answer(&self, id: &Uuid, sdp_text: &str) -> Result<(), RtcError> {
        let answer = sdp::SessionDescription::unmarshal(sdp_text)?;
        let entry = self
            .sessions
            .get(id)
            .ok_or(RtcErrorValue::SessionNotFound)?;
        entry.session.set_answer(&answer);
        Ok(())
    }

    pub fn close_session(&self, id: &Uuid) {
        if let Some((_, entry)) = self.sessions.remove(id) {
            if let Some(stream) = self.streams.get(&entry.stream_key) {
                stream.remove_session(id);
            }
            self.sessions_by_ufrag
                .retain(|_, session_id| session_id != id);
            self.sessions_by_addr
                .retain(|_, session_id| session_id != id);
            tracing::info!("webrtc session {id} closed");
        }
    }

    async fn demux_loop(self: Arc<Self>) {
        let mut buffer = vec![0u8; 2048];
        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buffer) => received,
                () = self.cancel.cancelled() => break,
            };
            let (length, source) = match received {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!("ice socket recv error: {err}");
                    continue;
                }
            };
            let data = &buffer[..length];

            if looks_like_stun(data) {
                self.on_stun(data, source);
            } else if looks_like_dtls(data) {
                self.on_dtls(data, source);
            } else if looks_like_rtp_or_rtcp(data) {
                if is_rtcp(data) {
                    if let Some(session) = self.session_by_addr(source) {
                        session.on_rtcp(data);
                    }
                }
                // Inbound RTP is not expected on a send-only endpoint.
            }
        }
    }

    fn on_stun(&self, data: &[u8], source: SocketAddr) {
        let message = match StunMessage::parse(data) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!("stun parse error from {source}: {err}");
                return;
            }
        };
        let Some(username) = &message.username else {
            return;
        };
        let Some(local_ufrag) = username.split(':').next() else {
            return;
        };
        let Some(session_id) = self.sessions_by_ufrag.get(local_ufrag).map(|id| *id) else {
            tracing::debug!("stun request for unknown ufrag {local_ufrag}");
            return;
        };
        let Some(entry) = self.sessions.get(&session_id) else {
            return;
        };

        match entry.session.on_stun(&message, data, source) {
            Ok(response) => {
                self.sessions_by_addr.insert(source, session_id);
                let _ = self.socket.try_send_to(&response, source);
            }
            Err(err) => {
                tracing::debug!("stun binding rejected from {source}: {err}");
            }
        }
    }

    fn on_dtls(&self, data: &[u8], source: SocketAddr) {
        let Some(session) = self.session_by_addr(source) else {
            tracing::debug!("dtls datagram from unbound address {source}");
            return;
        };
        match session.on_dtls(data) {
            Ok(response) if !response.is_empty() => {
                let _ = self.socket.try_send_to(&response, source);
            }
            Ok(_) => {}
            Err(err) => tracing::debug!("dtls error from {source}: {err}"),
        }
    }

    fn session_by_addr(&self, source: SocketAddr) -> Option<Arc<RtcSession>> {
        let id = self.sessions_by_addr.get(&source).map(|id| *id)?;
        self.sessions.get(&id).map(|entry| entry.session.clone())
    }

    async fn watch_streams(&self) {
        let mut events = self.router.subscribe_stream_events();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = self.cancel.cancelled() => break,
            };
            match event {
                Ok(StreamEvent::Published { stream_info }) => {
                    self.on_stream_published(stream_info).await;
                }
                Ok(StreamEvent::Unpublished { identifier }) => {
                    let removed: Vec<(String, String)> = self
                        .streams
                        .iter()
                        .filter(|entry| entry.value().stream_info.identifier() == identifier)
                        .map(|entry| entry.key().clone())
                        .collect();
                    for key in removed {
                        if let Some((_, stream)) = self.streams.remove(&key) {
                            for session in stream.sessions() {
                                self.close_session(&session.id);
                            }
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("webrtc publisher lagged {skipped} stream events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_stream_published(&self, stream_info: Arc<StreamInfo>) {
        // WebRTC prefers the transcoded rendition; bypass/source streams
        // are eligible all the same when the application says so.
        let Some(application) = self
            .orchestrator
            .application_by_id(stream_info.application_id)
        else {
            return;
        };
        if !application.config.publishers.webrtc.enabled {
            return;
        }
        if stream_info.source_type != StreamSourceType::Transcoder
            && !application.config.output_profiles.is_empty()
        {
            // The derived rendition will arrive with WebRTC-ready codecs.
            return;
        }

        let stream = match RtcStream::new(stream_info.clone(), &self.fingerprint()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::info!(
                    "webrtc skipped stream {}: {err}",
                    stream_info.identifier()
                );
                return;
            }
        };

        let connection = match self
            .router
            .subscribe(
                stream_info.identifier(),
                ObserverInfo::new(ObserverKind::WebRtc, TrackFilter::All),
            )
            .await
        {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!(
                    "webrtc could not attach to {}: {err}",
                    stream_info.identifier()
                );
                return;
            }
        };

        let key = (
            stream_info.application_name.clone(),
            stream_info.name.clone(),
        );
        self.streams.insert(key, stream.clone());

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = connection.recv() => {
                        let Some(packet) = maybe else { break };
                        stream.on_packet(&packet);
                    }
                    () = cancel.cancelled() => break,
                }
            }
            tracing::debug!("webrtc pump for {} ended", stream.stream_info.identifier());
        });
    }

    /// Session expiry plus periodic sender reports.
    async fn housekeeping_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.cancel.cancelled() => break,
            }

            let expired: Vec<Uuid> = self
                .sessions
                .iter()
                .filter(|entry| entry.value().session.is_expired(self.session_timeout))
                .map(|entry| *entry.key())
                .collect();
            for id in expired {
                tracing::info!("webrtc session {id} timed out");
                self.close_session(&id);
            }

            // Sender reports per stream SSRC to every attached session.
            let now = chrono::Utc::now();
            let ntp_seconds = (now.timestamp() + 2_208_988_800) as u64;
            for stream in self.streams.iter() {
                for counter in stream.counters.iter() {
                    let report = rtcp::build_sender_report(
                        *counter.key(),
                        ntp_seconds,
                        0,
                        counter.last_rtp_timestamp.load(std::sync::atomic::Ordering::Relaxed)
                            as u32,
                        counter.packets.load(std::sync::atomic::Ordering::Relaxed) as u32,
                        counter.octets.load(std::sync::atomic::Ordering::Relaxed) as u32,
                    );
                    for session in stream.sessions() {
                        session.send_rtcp(&report);
                    }
                }
            }
        }
    }
}
