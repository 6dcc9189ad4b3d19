use {
    base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine},
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    std::net::IpAddr,
};

type HmacSha256 = Hmac<Sha256>;

/// Decoded signed-URL token. Wire form is
/// `base64url(payload_json).base64url(hmac_sha256(key, payload_json))`,
/// carried in the vhost's configured query parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUrlToken {
    /// Canonical URL this token authorizes: path plus the query string
    /// with the token parameter removed. Compared case-insensitively.
    pub url: String,
    /// Exact IP or `a.b.c.d/len` CIDR the client must come from.
    pub allowed_ip: String,
    pub session_id: String,
    /// Unix milliseconds after which the token itself is stale.
    pub token_expired_time: u64,
    /// Unix milliseconds after which the stream window is closed.
    pub stream_expired_time: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SignedUrlError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
}

impl SignedUrlToken {
    pub fn encode(&self, crypto_key: &str) -> String {
        let payload = serde_json::to_vec(self).unwrap_or_default();
        let mut mac = HmacSha256::new_from_slice(crypto_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn decode(crypto_key: &str, token: &str) -> Result<Self, SignedUrlError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(SignedUrlError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SignedUrlError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| SignedUrlError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(crypto_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| SignedUrlError::BadSignature)?;

        serde_json::from_slice(&payload).map_err(|_| SignedUrlError::Malformed)
    }

    /// Evaluate every admission condition. `authorized_session` grants the
    /// token-expiry grace for sessions admitted earlier. Returns the full
    /// reason list on failure (logged server-side, never sent to clients).
    pub fn evaluate(
        &self,
        request_url: &str,
        client_ip: IpAddr,
        now_ms: u64,
        authorized_session: bool,
    ) -> Result<(), Vec<String>> {
        let mut reasons = Vec::new();

        if self.url.to_uppercase() != request_url.to_uppercase() {
            reasons.push(format!(
                "url mismatch: token has {}, request is {request_url}",
                self.url
            ));
        }
        if !ip_matches(&self.allowed_ip, client_ip) {
            reasons.push(format!(
                "client {client_ip} not allowed (expected {})",
                self.allowed_ip
            ));
        }
        if now_ms >= self.stream_expired_time {
            reasons.push(format!(
                "stream window closed at {} (now {now_ms})",
                self.stream_expired_time
            ));
        }
        if now_ms >= self.token_expired_time && !authorized_session {
            reasons.push(format!(
                "token expired at {} (now {now_ms})",
                self.token_expired_time
            ));
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}

/// Exact address or IPv4 CIDR match.
fn ip_matches(allowed: &str, client: IpAddr) -> bool {
    if let Some((network, prefix)) = allowed.split_once('/') {
        let (Ok(network), Ok(prefix)) = (network.parse::<IpAddr>(), prefix.parse::<u32>()) else {
            return false;
        };
        match (network, client) {
            (IpAddr::V4(network), IpAddr::V4(client)) => {
                if prefix == 0 {
                    return true;
                }
                if prefix > 32 {
                    return false;
                }
                let mask = u32::MAX << (32 - prefix);
                (u32::from(network) & mask) == (u32::from(client) & mask)
            }
            _ => false,
        }
    } else {
        allowed.parse::<IpAddr>().is_ok_and(|ip| ip == client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SignedUrlToken {
        SignedUrlToken {
            url: "/app/s/idx.m3u8".to_string(),
            allowed_ip: "1.2.3.4".to_string(),
            session_id: "sess-1".to_string(),
            token_expired_time: 60_000,
            stream_expired_time: 600_000,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let token = token();
        let encoded = token.encode("K");
        let decoded = SignedUrlToken::decode("K", &encoded).unwrap();
        assert_eq!(decoded.session_id, "sess-1");
        assert!(SignedUrlToken::decode("WRONG", &encoded).is_err());

        // Any flipped payload byte must break the signature.
        let mut tampered = encoded.clone().into_bytes();
        tampered[4] ^= 1;
        assert!(SignedUrlToken::decode("K", std::str::from_utf8(&tampered).unwrap()).is_err());
    }

    #[test]
    fn test_admission_matrix() {
        let token = token();
        let good_ip: IpAddr = "1.2.3.4".parse().unwrap();
        let bad_ip: IpAddr = "9.9.9.9".parse().unwrap();

        assert!(token.evaluate("/app/s/idx.m3u8", good_ip, 30_000, false).is_ok());
        // Case-insensitive URL compare.
        assert!(token.evaluate("/APP/S/IDX.M3U8", good_ip, 30_000, false).is_ok());
        assert!(token.evaluate("/app/other.m3u8", good_ip, 30_000, false).is_err());
        assert!(token.evaluate("/app/s/idx.m3u8", bad_ip, 30_000, false).is_err());
        // Token expired, no session grace.
        assert!(token.evaluate("/app/s/idx.m3u8", good_ip, 120_000, false).is_err());
        // Token expired but the session was previously authorized.
        assert!(token.evaluate("/app/s/idx.m3u8", good_ip, 120_000, true).is_ok());
        // Stream window closed: grace does not help.
        assert!(token.evaluate("/app/s/idx.m3u8", good_ip, 700_000, true).is_err());
    }

    #[test]
    fn test_cidr_match() {
        assert!(ip_matches("10.1.0.0/16", "10.1.200.7".parse().unwrap()));
        assert!(!ip_matches("10.1.0.0/16", "10.2.0.1".parse().unwrap()));
        assert!(ip_matches("0.0.0.0/0", "8.8.8.8".parse().unwrap()));
    }
}
