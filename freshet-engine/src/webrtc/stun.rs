use {
    super::errors::{RtcError, RtcErrorValue},
    bytes::{BufMut, Bytes, BytesMut},
    hmac::{Hmac, Mac},
    sha1::Sha1,
    std::net::SocketAddr,
};

type HmacSha1 = Hmac<Sha1>;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_SUCCESS: u16 = 0x0101;

mod attribute {
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const PRIORITY: u16 = 0x0024;
    pub const USE_CANDIDATE: u16 = 0x0025;
    pub const FINGERPRINT: u16 = 0x8028;
    pub const ICE_CONTROLLING: u16 = 0x802A;
}

/// Parsed STUN binding message (the subset an ICE-Lite responder needs).
#[derive(Debug, Clone)]
pub struct StunMessage {
    pub message_type: u16,
    pub transaction_id: [u8; 12],
    pub username: Option<String>,
    pub use_candidate: bool,
    pub priority: Option<u32>,
    /// Offset of the MESSAGE-INTEGRITY attribute, for verification.
    integrity_offset: Option<usize>,
}

/// Quick classification used by the UDP demultiplexer.
#[must_use]
pub fn looks_like_stun(data: &[u8]) -> bool {
    data.len() >= 20
        && data[0] < 4
        && u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == MAGIC_COOKIE
}

impl StunMessage {
    pub fn parse(data: &[u8]) -> Result<Self, RtcError> {
        if data.len() < 20 {
            return Err(RtcErrorValue::Stun("short message").into());
        }
        let message_type = u16::from_be_bytes([data[0], data[1]]);
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if u32::from_be_bytes(data[4..8].try_into().unwrap()) != MAGIC_COOKIE {
            return Err(RtcErrorValue::Stun("bad magic cookie").into());
        }
        if data.len() < 20 + length {
            return Err(RtcErrorValue::Stun("truncated attributes").into());
        }
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&data[8..20]);

        let mut message = Self {
            message_type,
            transaction_id,
            username: None,
            use_candidate: false,
            priority: None,
            integrity_offset: None,
        };

        let mut offset = 20;
        while offset + 4 <= 20 + length {
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let value_start = offset + 4;
            if value_start + attr_len > data.len() {
                return Err(RtcErrorValue::Stun("truncated attribute").into());
            }
            let value = &data[value_start..value_start + attr_len];

            match attr_type {
                attribute::USERNAME => {
                    message.username = std::str::from_utf8(value).ok().map(ToString::to_string);
                }
                attribute::USE_CANDIDATE => message.use_candidate = true,
                attribute::PRIORITY if attr_len == 4 => {
                    message.priority = Some(u32::from_be_bytes(value.try_into().unwrap()));
                }
                attribute::MESSAGE_INTEGRITY => {
                    message.integrity_offset = Some(offset);
                }
                attribute::ICE_CONTROLLING | attribute::FINGERPRINT => {}
                _ => {}
            }
            // Attributes are 32-bit aligned.
            offset = value_start + ((attr_len + 3) & !3);
        }

        Ok(message)
    }

    /// Verify MESSAGE-INTEGRITY with `password` (the local ice-pwd for
    /// inbound requests). The HMAC covers the message up to the attribute,
    /// with the length field rewritten to end at it.
    pub fn verify_integrity(&self, data: &[u8], password: &str) -> Result<(), RtcError> {
        let Some(offset) = self.integrity_offset else {
            return Err(RtcErrorValue::Stun("no message-integrity").into());
        };
        if offset + 24 > data.len() {
            return Err(RtcErrorValue::Stun("bad integrity attribute").into());
        }

        let mut covered = data[..offset].to_vec();
        let adjusted_len = (offset + 24 - 20) as u16;
        covered[2..4].copy_from_slice(&adjusted_len.to_be_bytes());

        let mut mac = HmacSha1::new_from_slice(password.as_bytes())
            .map_err(|_| RtcErrorValue::Stun("bad key"))?;
        mac.update(&covered);
        mac.verify_slice(&data[offset + 4..offset + 24])
            .map_err(|_| RtcErrorValue::BadIntegrity.into())
    }
}

/// Build a binding success response: XOR-MAPPED-ADDRESS, then
/// MESSAGE-INTEGRITY (HMAC-SHA1 with the local ice-pwd), then FINGERPRINT.
#[must_use]
pub fn build_binding_success(
    transaction_id: [u8; 12],
    mapped: SocketAddr,
    password: &str,
) -> Bytes {
    let mut attributes = BytesMut::new();

    // XOR-MAPPED-ADDRESS
    let (family, xored_address): (u8, Vec<u8>) = match mapped.ip() {
        std::net::IpAddr::V4(ip) => {
            let xored = u32::from(ip) ^ MAGIC_COOKIE;
            (0x01, xored.to_be_bytes().to_vec())
        }
        std::net::IpAddr::V6(ip) => {
            let mut xored = ip.octets();
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            key[4..].copy_from_slice(&transaction_id);
            for (byte, k) in xored.iter_mut().zip(key.iter()) {
                *byte ^= k;
            }
            (0x02, xored.to_vec())
        }
    };
    let xored_port = mapped.port() ^ (MAGIC_COOKIE >> 16) as u16;
    attributes.put_u16(attribute::XOR_MAPPED_ADDRESS);
    attributes.put_u16(4 + xored_address.len() as u16);
    attributes.put_u8(0);
    attributes.put_u8(family);
    attributes.put_u16(xored_port);
    attributes.put_slice(&xored_address);

    let build_header = |length: u16| -> [u8; 20] {
        let mut header = [0u8; 20];
        header[..2].copy_from_slice(&BINDING_SUCCESS.to_be_bytes());
        header[2..4].copy_from_slice(&length.to_be_bytes());
        header[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        header[8..20].copy_from_slice(&transaction_id);
        header
    };

    // MESSAGE-INTEGRITY covers header + attributes with the length set as
    // if the message ended at the integrity attribute.
    let integrity_len = (attributes.len() + 24) as u16;
    let mut covered = Vec::with_capacity(20 + attributes.len());
    covered.extend_from_slice(&build_header(integrity_len));
    covered.extend_from_slice(&attributes);

    let mut mac =
        HmacSha1::new_from_slice(password.as_bytes()).expect("hmac accepts any key length");
    mac.update(&covered);
    let digest = mac.finalize().into_bytes();

    attributes.put_u16(attribute::MESSAGE_INTEGRITY);
    attributes.put_u16(20);
    attributes.put_slice(&digest);

    // FINGERPRINT covers everything before it, length includes it.
    let final_len = (attributes.len() + 8) as u16;
    let mut message = Vec::with_capacity(20 + final_len as usize);
    message.extend_from_slice(&build_header(final_len));
    message.extend_from_slice(&attributes);

    let crc = crc32_ieee(&message) ^ 0x5354_554E;
    let mut out = BytesMut::from(&message[..]);
    out.put_u16(attribute::FINGERPRINT);
    out.put_u16(4);
    out.put_u32(crc);
    out.freeze()
}

/// Reflected CRC-32 (IEEE 802.3), as STUN FINGERPRINT requires.
#[must_use]
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }

    fn build_binding_request(username: &str, password: &str) -> Vec<u8> {
        let transaction_id = [7u8; 12];
        let mut attributes = BytesMut::new();
        attributes.put_u16(attribute::USERNAME);
        attributes.put_u16(username.len() as u16);
        attributes.put_slice(username.as_bytes());
        let padding = (4 - username.len() % 4) % 4;
        for _ in 0..padding {
            attributes.put_u8(0);
        }

        let integrity_len = (attributes.len() + 24) as u16;
        let mut covered = Vec::new();
        covered.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
        covered.extend_from_slice(&integrity_len.to_be_bytes());
        covered.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        covered.extend_from_slice(&transaction_id);
        covered.extend_from_slice(&attributes);

        let mut mac = HmacSha1::new_from_slice(password.as_bytes()).unwrap();
        mac.update(&covered);
        let digest = mac.finalize().into_bytes();

        let mut message = covered;
        message.extend_from_slice(&attribute::MESSAGE_INTEGRITY.to_be_bytes());
        message.extend_from_slice(&20u16.to_be_bytes());
        message.extend_from_slice(&digest);
        message
    }

    #[test]
    fn test_parse_and_verify_binding_request() {
        let wire = build_binding_request("localfrag:remotefrag", "secretpwd");
        assert!(looks_like_stun(&wire));

        let message = StunMessage::parse(&wire).unwrap();
        assert_eq!(message.message_type, BINDING_REQUEST);
        assert_eq!(message.username.as_deref(), Some("localfrag:remotefrag"));
        assert!(message.verify_integrity(&wire, "secretpwd").is_ok());
        assert!(message.verify_integrity(&wire, "wrong").is_err());
    }

    #[test]
    fn test_binding_success_roundtrip() {
        let response = build_binding_success(
            [9u8; 12],
            "192.168.1.50:40000".parse().unwrap(),
            "secretpwd",
        );
        assert!(looks_like_stun(&response));
        let message = StunMessage::parse(&response).unwrap();
        assert_eq!(message.message_type, BINDING_SUCCESS);
        assert!(message.verify_integrity(&response, "secretpwd").is_ok());
    }
}
