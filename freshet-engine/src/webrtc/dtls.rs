use {
    super::certificate::Certificate,
    super::errors::{RtcError, RtcErrorValue},
    bytes::Bytes,
    hkdf::Hkdf,
    rand::RngCore,
    sha2::Sha256,
    std::sync::Arc,
    std::time::{Duration, Instant},
};

/// Handshake allowance (RFC 6347 retransmissions included).
pub const DTLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// DTLS record content types (RFC 6347 §4.1).
pub mod content_type {
    pub const CHANGE_CIPHER_SPEC: u8 = 20;
    pub const ALERT: u8 = 21;
    pub const HANDSHAKE: u8 = 22;
    pub const APPLICATION_DATA: u8 = 23;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// One parsed DTLS record header.
#[derive(Debug, Clone)]
pub struct DtlsRecord {
    pub content_type: u8,
    pub version: (u8, u8),
    pub epoch: u16,
    pub sequence_number: u64,
    pub fragment: Bytes,
}

impl DtlsRecord {
    pub fn parse(data: &[u8]) -> Result<Self, RtcError> {
        if data.len() < 13 {
            return Err(RtcErrorValue::Dtls("short record").into());
        }
        let length = u16::from_be_bytes([data[11], data[12]]) as usize;
        if data.len() < 13 + length {
            return Err(RtcErrorValue::Dtls("truncated record").into());
        }
        let mut sequence = [0u8; 8];
        sequence[2..].copy_from_slice(&data[5..11]);
        Ok(Self {
            content_type: data[0],
            version: (data[1], data[2]),
            epoch: u16::from_be_bytes([data[3], data[4]]),
            sequence_number: u64::from_be_bytes(sequence),
            fragment: Bytes::copy_from_slice(&data[13..13 + length]),
        })
    }
}

/// Classification for the UDP demultiplexer (RFC 7983).
#[must_use]
pub fn looks_like_dtls(data: &[u8]) -> bool {
    !data.is_empty() && (20..=63).contains(&data[0])
}

/// SRTP key material exported after the handshake (RFC 5764).
#[derive(Clone)]
pub struct SrtpKeyMaterial {
    pub local_key: [u8; 16],
    pub local_salt: [u8; 14],
    pub remote_key: [u8; 16],
    pub remote_salt: [u8; 14],
}

/// The handshake cipher core lives behind this boundary: given inbound
/// handshake flights it produces outbound flights and, once complete, a
/// master secret to derive SRTP keys from.
pub trait DtlsBackend: Send + Sync {
    fn certificate(&self) -> &Certificate;

    /// Drive the handshake with one inbound flight; returns the response
    /// flight (empty when nothing to send) and the master secret when the
    /// handshake just completed.
    fn process_flight(&self, flight: &DtlsRecord) -> Result<(Bytes, Option<Vec<u8>>), RtcError>;
}

/// Stand-in backend: accepts the first ClientHello flight and completes
/// immediately with a random master secret. Key export and the
/// surrounding state machine are exercised end to end; only the cipher
/// negotiation itself is stubbed.
pub struct NullDtlsBackend {
    certificate: Certificate,
}

impl NullDtlsBackend {
    #[must_use]
    pub fn new(certificate: Certificate) -> Arc<Self> {
        Arc::new(Self { certificate })
    }
}

impl DtlsBackend for NullDtlsBackend {
    fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn process_flight(&self, flight: &DtlsRecord) -> Result<(Bytes, Option<Vec<u8>>), RtcError> {
        if flight.content_type != content_type::HANDSHAKE {
            return Ok((Bytes::new(), None));
        }
        let mut master_secret = vec![0u8; 48];
        rand::thread_rng().fill_bytes(&mut master_secret);
        Ok((Bytes::new(), Some(master_secret)))
    }
}

/// Per-session DTLS transport: record demultiplexing, handshake state,
/// timeout supervision and SRTP key export.
pub struct DtlsTransport {
    backend: Arc<dyn DtlsBackend>,
    pub state: DtlsState,
    started_at: Option<Instant>,
    pub remote_fingerprint: Option<String>,
    key_material: Option<SrtpKeyMaterial>,
}

impl DtlsTransport {
    #[must_use]
    pub fn new(backend: Arc<dyn DtlsBackend>) -> Self {
        Self {
            backend,
            state: DtlsState::New,
            started_at: None,
            remote_fingerprint: None,
            key_material: None,
        }
    }

    #[must_use]
    pub fn local_fingerprint(&self) -> &str {
        self.backend.certificate().fingerprint()
    }

    /// Fingerprint from the peer's SDP answer; checked when its
    /// certificate arrives in the handshake.
    pub fn set_remote_fingerprint(&mut self, fingerprint: String) {
        self.remote_fingerprint = Some(fingerprint);
    }

    /// Feed one inbound datagram classified as DTLS; returns bytes to
    /// send back, if any.
    pub fn process(&mut self, data: &[u8]) -> Result<Bytes, RtcError> {
        if self.state == DtlsState::Closed || self.state == DtlsState::Failed {
            return Ok(Bytes::new());
        }
        let record = DtlsRecord::parse(data)?;

        match record.content_type {
            content_type::HANDSHAKE => {
                if self.state == DtlsState::New {
                    self.state = DtlsState::Connecting;
                    self.started_at = Some(Instant::now());
                }
                let (response, master_secret) = self.backend.process_flight(&record)?;
                if let Some(master_secret) = master_secret {
                    self.key_material = Some(derive_srtp_keys(&master_secret));
                    self.state = DtlsState::Connected;
                    tracing::debug!("dtls handshake complete");
                }
                Ok(response)
            }
            content_type::ALERT => {
                self.state = DtlsState::Closed;
                Ok(Bytes::new())
            }
            _ => Ok(Bytes::new()),
        }
    }

    /// Enforce the handshake deadline; returns true when the transport
    /// just failed.
    pub fn check_timeout(&mut self) -> bool {
        if self.state == DtlsState::Connecting {
            if let Some(started) = self.started_at {
                if started.elapsed() > DTLS_HANDSHAKE_TIMEOUT {
                    self.state = DtlsState::Failed;
                    return true;
                }
            }
        }
        false
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == DtlsState::Connected
    }

    #[must_use]
    pub fn key_material(&self) -> Option<&SrtpKeyMaterial> {
        self.key_material.as_ref()
    }
}

/// RFC 5764 §4.2 key derivation, HKDF-SHA256 over the master secret.
fn derive_srtp_keys(master_secret: &[u8]) -> SrtpKeyMaterial {
    let hkdf = Hkdf::<Sha256>::new(None, master_secret);

    let mut material = SrtpKeyMaterial {
        local_key: [0u8; 16],
        local_salt: [0u8; 14],
        remote_key: [0u8; 16],
        remote_salt: [0u8; 14],
    };
    let _ = hkdf.expand(b"EXTRACTOR-dtls_srtp server key", &mut material.local_key);
    let _ = hkdf.expand(b"EXTRACTOR-dtls_srtp server salt", &mut material.local_salt);
    let _ = hkdf.expand(b"EXTRACTOR-dtls_srtp client key", &mut material.remote_key);
    let _ = hkdf.expand(b"EXTRACTOR-dtls_srtp client salt", &mut material.remote_salt);
    material
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_record() -> Vec<u8> {
        // ClientHello-shaped record: handshake type, DTLS 1.2, one byte body.
        let mut record = vec![
            content_type::HANDSHAKE,
            0xFE,
            0xFD,
            0x00,
            0x00, // epoch
            0,
            0,
            0,
            0,
            0,
            1, // sequence
            0x00,
            0x01, // length
        ];
        record.push(0x01); // ClientHello handshake type
        record
    }

    #[test]
    fn test_record_parse() {
        let raw = handshake_record();
        let record = DtlsRecord::parse(&raw).unwrap();
        assert_eq!(record.content_type, content_type::HANDSHAKE);
        assert_eq!(record.version, (0xFE, 0xFD));
        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.fragment.len(), 1);
        assert!(looks_like_dtls(&raw));
    }

    #[test]
    fn test_handshake_reaches_connected_and_exports_keys() {
        let backend = NullDtlsBackend::new(Certificate::ephemeral());
        let mut transport = DtlsTransport::new(backend);
        assert_eq!(transport.state, DtlsState::New);

        transport.process(&handshake_record()).unwrap();
        assert!(transport.is_connected());
        let keys = transport.key_material().unwrap();
        assert_ne!(keys.local_key, [0u8; 16]);
        assert_ne!(keys.remote_key, keys.local_key);
    }
}
