use {
    super::bytes_errors::{BytesReadError, BytesReadErrorValue},
    byteorder::{ByteOrder, ReadBytesExt},
    bytes::{BufMut, BytesMut},
    std::io::Cursor,
};

/// Cursor-style reader over a growable byte buffer.
///
/// Protocol sessions append network reads with `extend_from_slice` and
/// consume complete units with the typed `read_*` calls; `advance_*`
/// variants peek without consuming.
pub struct BytesReader {
    buffer: BytesMut,
}

impl BytesReader {
    #[must_use]
    pub fn new(input: BytesMut) -> Self {
        Self { buffer: input }
    }

    pub fn extend_from_slice(&mut self, extend: &[u8]) {
        self.buffer.extend_from_slice(extend);
    }

    pub fn read_bytes(&mut self, bytes_num: usize) -> Result<BytesMut, BytesReadError> {
        if self.buffer.len() < bytes_num {
            return Err(BytesReadError {
                value: BytesReadErrorValue::NotEnoughBytes,
            });
        }
        Ok(self.buffer.split_to(bytes_num))
    }

    pub fn advance_bytes(&mut self, bytes_num: usize) -> Result<BytesMut, BytesReadError> {
        if self.buffer.len() < bytes_num {
            return Err(BytesReadError {
                value: BytesReadErrorValue::NotEnoughBytes,
            });
        }
        let mut copy = BytesMut::with_capacity(bytes_num);
        copy.put(&self.buffer[..bytes_num]);
        Ok(copy)
    }

    pub fn read_u8(&mut self) -> Result<u8, BytesReadError> {
        let mut cursor = Cursor::new(self.read_bytes(1)?);
        Ok(cursor.read_u8()?)
    }

    pub fn advance_u8(&mut self) -> Result<u8, BytesReadError> {
        let mut cursor = Cursor::new(self.advance_bytes(1)?);
        Ok(cursor.read_u8()?)
    }

    pub fn read_u16<T: ByteOrder>(&mut self) -> Result<u16, BytesReadError> {
        let mut cursor = Cursor::new(self.read_bytes(2)?);
        Ok(cursor.read_u16::<T>()?)
    }

    pub fn read_u24<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let mut cursor = Cursor::new(self.read_bytes(3)?);
        Ok(cursor.read_u24::<T>()?)
    }

    pub fn advance_u24<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let mut cursor = Cursor::new(self.advance_bytes(3)?);
        Ok(cursor.read_u24::<T>()?)
    }

    pub fn read_u32<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let mut cursor = Cursor::new(self.read_bytes(4)?);
        Ok(cursor.read_u32::<T>()?)
    }

    pub fn read_f64<T: ByteOrder>(&mut self) -> Result<f64, BytesReadError> {
        let mut cursor = Cursor::new(self.read_bytes(8)?);
        Ok(cursor.read_f64::<T>()?)
    }

    /// Remaining unread bytes, without consuming them.
    #[must_use]
    pub fn get_remaining_bytes(&self) -> BytesMut {
        self.buffer.clone()
    }

    pub fn extract_remaining_bytes(&mut self) -> BytesMut {
        self.buffer.split_to(self.buffer.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::BytesReader;
    use byteorder::BigEndian;
    use bytes::BytesMut;

    #[test]
    fn test_typed_reads() {
        let mut reader = BytesReader::new(BytesMut::from(
            &[0x01u8, 0x00, 0x02, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04][..],
        ));
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16::<BigEndian>().unwrap(), 2);
        assert_eq!(reader.read_u24::<BigEndian>().unwrap(), 3);
        assert_eq!(reader.read_u32::<BigEndian>().unwrap(), 4);
        assert!(reader.is_empty());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_advance_does_not_consume() {
        let mut reader = BytesReader::new(BytesMut::from(&[0xABu8, 0xCD][..]));
        assert_eq!(reader.advance_u8().unwrap(), 0xAB);
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
    }
}
