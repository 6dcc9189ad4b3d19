use {
    super::errors::{RtcError, RtcErrorValue},
    aes_gcm::{
        aead::{Aead, KeyInit, Payload},
        Aes128Gcm, Nonce,
    },
    bytes::{BufMut, Bytes, BytesMut},
};

/// AES-128-GCM authentication tag length.
const TAG_LEN: usize = 16;

/// SRTP protection context for one direction (RFC 3711 framing with the
/// AEAD profile of RFC 7714): the RTP header stays clear and
/// authenticated, the payload is encrypted, the tag is appended.
pub struct SrtpContext {
    cipher: Aes128Gcm,
    salt: [u8; 14],
    rollover_counter: u32,
    highest_sequence: u16,
}

impl SrtpContext {
    pub fn new(key: &[u8; 16], salt: &[u8; 14]) -> Result<Self, RtcError> {
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|_| RtcErrorValue::Srtp("bad key length"))?;
        Ok(Self {
            cipher,
            salt: *salt,
            rollover_counter: 0,
            highest_sequence: 0,
        })
    }

    /// Protect one outbound RTP datagram (header || payload).
    pub fn protect(&mut self, packet: &[u8]) -> Result<Bytes, RtcError> {
        if packet.len() < 12 {
            return Err(RtcErrorValue::Srtp("short rtp packet").into());
        }
        let header_len = 12 + ((packet[0] & 0x0F) as usize) * 4;
        if packet.len() < header_len {
            return Err(RtcErrorValue::Srtp("short rtp header").into());
        }
        let sequence = u16::from_be_bytes([packet[2], packet[3]]);
        let ssrc = u32::from_be_bytes(packet[8..12].try_into().unwrap());
        self.track_rollover(sequence);

        let nonce_bytes = self.nonce(ssrc, sequence);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &packet[header_len..],
                    aad: &packet[..header_len],
                },
            )
            .map_err(|_| RtcErrorValue::Srtp("encrypt failed"))?;

        let mut out = BytesMut::with_capacity(header_len + ciphertext.len());
        out.put_slice(&packet[..header_len]);
        out.put_slice(&ciphertext);
        Ok(out.freeze())
    }

    /// Unprotect one inbound SRTP datagram.
    pub fn unprotect(&mut self, packet: &[u8]) -> Result<Bytes, RtcError> {
        if packet.len() < 12 + TAG_LEN {
            return Err(RtcErrorValue::Srtp("short srtp packet").into());
        }
        let header_len = 12 + ((packet[0] & 0x0F) as usize) * 4;
        if packet.len() < header_len + TAG_LEN {
            return Err(RtcErrorValue::Srtp("short srtp header").into());
        }
        let sequence = u16::from_be_bytes([packet[2], packet[3]]);
        let ssrc = u32::from_be_bytes(packet[8..12].try_into().unwrap());
        self.track_rollover(sequence);

        let nonce_bytes = self.nonce(ssrc, sequence);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &packet[header_len..],
                    aad: &packet[..header_len],
                },
            )
            .map_err(|_| RtcErrorValue::Srtp("auth failed"))?;

        let mut out = BytesMut::with_capacity(header_len + plaintext.len());
        out.put_slice(&packet[..header_len]);
        out.put_slice(&plaintext);
        Ok(out.freeze())
    }

    /// 12-byte AEAD nonce: salt XOR (ssrc || roc || seq) per RFC 7714 §8.1.
    fn nonce(&self, ssrc: u32, sequence: u16) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[2..6].copy_from_slice(&ssrc.to_be_bytes());
        nonce[6..10].copy_from_slice(&self.rollover_counter.to_be_bytes());
        nonce[10..12].copy_from_slice(&sequence.to_be_bytes());
        for (byte, salt) in nonce.iter_mut().zip(self.salt.iter()) {
            *byte ^= salt;
        }
        nonce
    }

    fn track_rollover(&mut self, sequence: u16) {
        if sequence < 0x1000 && self.highest_sequence > 0xF000 {
            self.rollover_counter = self.rollover_counter.wrapping_add(1);
        }
        if sequence > self.highest_sequence || self.highest_sequence.wrapping_sub(sequence) > 0x8000
        {
            self.highest_sequence = sequence;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rtp() -> Vec<u8> {
        let mut packet = vec![
            0x80, 0x61, 0x10, 0x01, // v2, pt 97, seq 0x1001
            0x00, 0x01, 0x5F, 0x90, // timestamp
            0xDE, 0xAD, 0xBE, 0xEF, // ssrc
        ];
        packet.extend_from_slice(b"media payload");
        packet
    }

    #[test]
    fn test_protect_unprotect_roundtrip() {
        let key = [7u8; 16];
        let salt = [3u8; 14];
        let mut sender = SrtpContext::new(&key, &salt).unwrap();
        let mut receiver = SrtpContext::new(&key, &salt).unwrap();

        let clear = sample_rtp();
        let protected = sender.protect(&clear).unwrap();
        assert_eq!(protected.len(), clear.len() + TAG_LEN);
        // Header stays clear, payload does not.
        assert_eq!(&protected[..12], &clear[..12]);
        assert_ne!(&protected[12..25], &clear[12..25]);

        let recovered = receiver.unprotect(&protected).unwrap();
        assert_eq!(&recovered[..], &clear[..]);
    }

    #[test]
    fn test_tamper_detection() {
        let key = [7u8; 16];
        let salt = [3u8; 14];
        let mut sender = SrtpContext::new(&key, &salt).unwrap();
        let mut receiver = SrtpContext::new(&key, &salt).unwrap();

        let mut protected = sender.protect(&sample_rtp()).unwrap().to_vec();
        let tail = protected.len() - 1;
        protected[tail] ^= 0xFF;
        assert!(receiver.unprotect(&protected).is_err());
    }
}
