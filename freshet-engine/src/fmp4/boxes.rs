use bytes::{BufMut, Bytes, BytesMut};

/// ISO-BMFF box builder: accumulate the body, `finish` prepends the
/// 8-byte size + fourcc header.
pub struct BoxWriter {
    name: [u8; 4],
    body: BytesMut,
}

impl BoxWriter {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&name.as_bytes()[..4]);
        Self {
            name: fourcc,
            body: BytesMut::new(),
        }
    }

    /// A "full box": version byte plus 24-bit flags.
    #[must_use]
    pub fn full(name: &str, version: u8, flags: u32) -> Self {
        let mut writer = Self::new(name);
        writer.put_u8(version);
        writer.body.put_slice(&flags.to_be_bytes()[1..]);
        writer
    }

    pub fn put_u8(&mut self, value: u8) {
        self.body.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.body.put_u16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.body.put_u32(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.body.put_i32(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.body.put_u64(value);
    }

    pub fn put_slice(&mut self, value: &[u8]) {
        self.body.put_slice(value);
    }

    pub fn put_child(&mut self, child: Bytes) {
        self.body.put_slice(&child);
    }

    #[must_use]
    pub fn finish(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.body.len() + 8);
        out.put_u32(self.body.len() as u32 + 8);
        out.put_slice(&self.name);
        out.put_slice(&self.body);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::BoxWriter;

    #[test]
    fn test_box_header() {
        let mut writer = BoxWriter::new("mdat");
        writer.put_slice(b"abc");
        let bytes = writer.finish();
        assert_eq!(&bytes[..], &[0, 0, 0, 11, b'm', b'd', b'a', b't', b'a', b'b', b'c']);
    }

    #[test]
    fn test_full_box_version_flags() {
        let writer = BoxWriter::full("tfdt", 1, 0x000102);
        let bytes = writer.finish();
        assert_eq!(bytes[8], 1);
        assert_eq!(&bytes[9..12], &[0x00, 0x01, 0x02]);
    }
}
