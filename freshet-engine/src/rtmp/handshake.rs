use {
    crate::bytesio::bytes_reader::BytesReader,
    bytes::BytesMut,
    rand::RngCore,
};

pub const RTMP_VERSION: u8 = 3;
pub const RTMP_HANDSHAKE_SIZE: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    ReadC0C1,
    ReadC2,
    Finish,
}

/// Server side of the C0/C1/C2 exchange.
///
/// Echo-style handshake: S1 is server random, S2 echoes C1, and C2 is
/// accepted without digest verification (every mainstream encoder
/// interoperates with this).
pub struct HandshakeServer {
    reader: BytesReader,
    state: HandshakeState,
}

impl Default for HandshakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BytesReader::new(BytesMut::new()),
            state: HandshakeState::ReadC0C1,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.reader.extend_from_slice(data);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == HandshakeState::Finish
    }

    /// Drive the handshake; returns bytes to send to the client (empty
    /// when more input is needed).
    pub fn handshake(&mut self) -> Result<BytesMut, crate::bytesio::bytes_errors::BytesReadError> {
        let mut response = BytesMut::new();

        if self.state == HandshakeState::ReadC0C1 {
            if self.reader.len() < 1 + RTMP_HANDSHAKE_SIZE {
                return Ok(response);
            }
            let _version = self.reader.read_u8()?;
            let c1 = self.reader.read_bytes(RTMP_HANDSHAKE_SIZE)?;

            response.extend_from_slice(&[RTMP_VERSION]);

            // S1: zero time + zero version + random.
            let mut s1 = vec![0u8; RTMP_HANDSHAKE_SIZE];
            rand::thread_rng().fill_bytes(&mut s1[8..]);
            s1[..8].fill(0);
            response.extend_from_slice(&s1);

            // S2: echo of C1.
            response.extend_from_slice(&c1);

            self.state = HandshakeState::ReadC2;
        }

        if self.state == HandshakeState::ReadC2 && self.reader.len() >= RTMP_HANDSHAKE_SIZE {
            let _c2 = self.reader.read_bytes(RTMP_HANDSHAKE_SIZE)?;
            self.state = HandshakeState::Finish;
        }

        Ok(response)
    }

    /// Bytes that arrived after the handshake (the first chunk data).
    pub fn extract_remaining_bytes(&mut self) -> BytesMut {
        self.reader.extract_remaining_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_exchange() {
        let mut server = HandshakeServer::new();

        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend_from_slice(&[7u8; RTMP_HANDSHAKE_SIZE]);
        server.extend_data(&c0c1);

        let s0s1s2 = server.handshake().unwrap();
        assert_eq!(s0s1s2.len(), 1 + RTMP_HANDSHAKE_SIZE * 2);
        assert_eq!(s0s1s2[0], RTMP_VERSION);
        // S2 echoes C1.
        assert_eq!(&s0s1s2[1 + RTMP_HANDSHAKE_SIZE..], &[7u8; RTMP_HANDSHAKE_SIZE][..]);
        assert!(!server.is_finished());

        server.extend_data(&[0u8; RTMP_HANDSHAKE_SIZE]);
        let rest = server.handshake().unwrap();
        assert!(rest.is_empty());
        assert!(server.is_finished());
    }

    #[test]
    fn test_partial_c1_waits() {
        let mut server = HandshakeServer::new();
        server.extend_data(&[RTMP_VERSION, 1, 2, 3]);
        assert!(server.handshake().unwrap().is_empty());
        assert!(!server.is_finished());
    }
}
