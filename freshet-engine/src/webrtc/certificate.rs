use {
    base64::{engine::general_purpose::STANDARD, Engine},
    rand::RngCore,
    sha2::{Digest, Sha256},
    std::fmt::Write as _,
};

/// The server's DTLS identity: DER certificate bytes plus the SHA-256
/// fingerprint advertised in every SDP offer. Immutable after load and
/// shared by reference across sessions.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    fingerprint: String,
}

impl Certificate {
    /// Load from a PEM file on disk.
    pub fn from_pem_file(path: &str) -> std::io::Result<Self> {
        let pem = std::fs::read_to_string(path)?;
        let der = pem_to_der(&pem).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "no certificate in pem")
        })?;
        Ok(Self::from_der(der))
    }

    /// Ephemeral identity handed to the DTLS backend when no certificate
    /// is configured.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut der = vec![0u8; 512];
        rand::thread_rng().fill_bytes(&mut der);
        Self::from_der(der)
    }

    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        let digest = Sha256::digest(&der);
        let mut fingerprint = String::with_capacity(digest.len() * 3);
        for (index, byte) in digest.iter().enumerate() {
            if index > 0 {
                fingerprint.push(':');
            }
            let _ = write!(fingerprint, "{byte:02X}");
        }
        Self { der, fingerprint }
    }

    /// Colon-separated upper-hex SHA-256 digest, as SDP wants it.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let body: String = pem
        .lines()
        .skip_while(|line| !line.contains("BEGIN CERTIFICATE"))
        .skip(1)
        .take_while(|line| !line.contains("END CERTIFICATE"))
        .collect();
    STANDARD.decode(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let certificate = Certificate::from_der(vec![1, 2, 3]);
        let fingerprint = certificate.fingerprint();
        assert_eq!(fingerprint.len(), 32 * 3 - 1);
        assert!(fingerprint
            .split(':')
            .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn test_pem_decode() {
        let pem = "-----BEGIN CERTIFICATE-----\nAQID\n-----END CERTIFICATE-----\n";
        assert_eq!(pem_to_der(pem), Some(vec![1, 2, 3]));
    }
}
