use {
    super::{
        dtls::{DtlsBackend, DtlsTransport},
        errors::RtcError,
        ice::IceSession,
        rtcp::{self, RtcpMessage},
        sdp::SessionDescription,
        srtp::SrtpContext,
        stream::RtcStream,
        stun::StunMessage,
    },
    bytes::Bytes,
    parking_lot::{Mutex, RwLock},
    std::collections::HashSet,
    std::net::SocketAddr,
    std::sync::{Arc, Weak},
    std::time::Instant,
    tokio::net::UdpSocket,
    uuid::Uuid,
};

/// One WebRTC viewer: ICE agent, DTLS transport, outbound SRTP context
/// and the broadcast classes it subscribed to.
pub struct RtcSession {
    pub id: Uuid,
    pub created_at: Instant,
    stream: Weak<RtcStream>,
    socket: Arc<UdpSocket>,
    ice: Mutex<IceSession>,
    dtls: Mutex<DtlsTransport>,
    srtp_out: Mutex<Option<SrtpContext>>,
    subscribed: RwLock<HashSet<u32>>,
}

impl RtcSession {
    #[must_use]
    pub fn new(
        stream: &Arc<RtcStream>,
        socket: Arc<UdpSocket>,
        dtls_backend: Arc<dyn DtlsBackend>,
    ) -> Arc<Self> {
        // Until the answer arrives, subscribe to everything the stream
        // broadcasts.
        let subscribed = stream.class_keys.iter().copied().collect();
        Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            stream: Arc::downgrade(stream),
            socket,
            ice: Mutex::new(IceSession::new()),
            dtls: Mutex::new(DtlsTransport::new(dtls_backend)),
            srtp_out: Mutex::new(None),
            subscribed: RwLock::new(subscribed),
        })
    }

    #[must_use]
    pub fn local_ufrag(&self) -> String {
        self.ice.lock().local_ufrag.clone()
    }

    #[must_use]
    pub fn with_ice<R>(&self, f: impl FnOnce(&IceSession) -> R) -> R {
        f(&self.ice.lock())
    }

    /// Build this session's offer from the stream template.
    #[must_use]
    pub fn make_offer(&self, candidate: &str) -> Option<SessionDescription> {
        let stream = self.stream.upgrade()?;
        Some(stream.make_offer(&self.ice.lock(), candidate))
    }

    /// Apply the viewer's SDP answer: remote ICE credentials, remote
    /// fingerprint, and the negotiated broadcast classes.
    pub fn set_answer(&self, answer: &SessionDescription) {
        if let Some(media) = answer.media.first() {
            if !media.ice_ufrag.is_empty() {
                self.ice
                    .lock()
                    .set_remote_credentials(media.ice_ufrag.clone(), media.ice_pwd.clone());
            }
        }
        if !answer.fingerprint_value.is_empty() {
            self.dtls
                .lock()
                .set_remote_fingerprint(answer.fingerprint_value.clone());
        }
        if let Some(stream) = self.stream.upgrade() {
            // Keep only classes whose payloads survived negotiation.
            let answered: HashSet<u8> = answer
                .media
                .iter()
                .flat_map(|media| media.payloads.iter().map(|payload| payload.id))
                .collect();
            if !answered.is_empty() {
                let keys: HashSet<u32> = stream
                    .class_keys
                    .iter()
                    .copied()
                    .filter(|key| answered.contains(&((key & 0xFF) as u8)))
                    .collect();
                if !keys.is_empty() {
                    *self.subscribed.write() = keys;
                }
            }
        }
    }

    /// Inbound STUN binding request already matched to this session.
    pub fn on_stun(
        &self,
        message: &StunMessage,
        raw: &[u8],
        source: SocketAddr,
    ) -> Result<Bytes, RtcError> {
        self.ice.lock().on_binding_request(message, raw, source)
    }

    /// Inbound DTLS datagram; returns the response flight, if any. On
    /// handshake completion the outbound SRTP context is installed.
    pub fn on_dtls(&self, data: &[u8]) -> Result<Bytes, RtcError> {
        let response = {
            let mut dtls = self.dtls.lock();
            let response = dtls.process(data)?;
            if dtls.is_connected() && self.srtp_out.lock().is_none() {
                if let Some(keys) = dtls.key_material() {
                    match SrtpContext::new(&keys.local_key, &keys.local_salt) {
                        Ok(context) => *self.srtp_out.lock() = Some(context),
                        Err(err) => tracing::error!("srtp context failed: {err}"),
                    }
                }
            }
            response
        };
        Ok(response)
    }

    /// Inbound RTCP (receiver reports, NACK). NACKed packets are
    /// retransmitted from the stream's send history.
    pub fn on_rtcp(&self, data: &[u8]) {
        let messages = match rtcp::parse_compound(data) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::debug!("rtcp parse error: {err}");
                return;
            }
        };
        for message in messages {
            match message {
                RtcpMessage::Nack(nack) => {
                    let Some(stream) = self.stream.upgrade() else { return };
                    for lost in &nack.lost_ids {
                        if let Some(wire) = stream.retransmit_lookup(nack.media_ssrc, *lost) {
                            tracing::debug!(
                                "retransmitting seq {lost} on ssrc {}",
                                nack.media_ssrc
                            );
                            self.send_protected(&wire);
                        }
                    }
                }
                RtcpMessage::ReceiverReport { .. } | RtcpMessage::Other { .. } => {}
            }
        }
    }

    /// Broadcast delivery: filter by class, protect, send. Never blocks;
    /// a full socket buffer drops the datagram.
    pub fn on_broadcast_rtp(&self, class_key: u32, wire: &Bytes) {
        if !self.subscribed.read().contains(&class_key) {
            return;
        }
        self.send_protected(wire);
    }

    fn send_protected(&self, wire: &Bytes) {
        let remote = {
            let ice = self.ice.lock();
            if !ice.is_connected() {
                return;
            }
            ice.remote_address
        };
        let Some(remote) = remote else { return };

        let mut srtp = self.srtp_out.lock();
        let Some(context) = srtp.as_mut() else { return };
        match context.protect(wire) {
            Ok(protected) => {
                let _ = self.socket.try_send_to(&protected, remote);
            }
            Err(err) => tracing::debug!("srtp protect failed: {err}"),
        }
    }

    /// Send a pre-built RTCP payload (sender reports).
    pub fn send_rtcp(&self, payload: &[u8]) {
        let remote = {
            let ice = self.ice.lock();
            if !ice.is_connected() {
                return;
            }
            ice.remote_address
        };
        if let Some(remote) = remote {
            let _ = self.socket.try_send_to(payload, remote);
        }
    }

    /// True when the session went quiet past the configured timeout or
    /// its DTLS handshake expired.
    #[must_use]
    pub fn is_expired(&self, idle: std::time::Duration) -> bool {
        if self.dtls.lock().check_timeout() {
            return true;
        }
        let ice = self.ice.lock();
        ice.last_activity.elapsed() > idle && ice.is_connected()
            || (!ice.is_connected() && self.created_at.elapsed() > idle)
    }
}
