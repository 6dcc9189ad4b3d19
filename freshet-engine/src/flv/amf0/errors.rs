use crate::bytesio::bytes_errors::{BytesReadError, BytesWriteError};

#[derive(Debug, thiserror::Error)]
pub enum Amf0ErrorValue {
    #[error("unknown marker: {0}")]
    UnknownMarker(u8),
    #[error("wrong type")]
    WrongType,
    #[error("bytes read error: {0}")]
    BytesReadError(BytesReadError),
    #[error("bytes write error: {0}")]
    BytesWriteError(BytesWriteError),
    #[error("invalid utf8")]
    InvalidUtf8,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct Amf0Error {
    pub value: Amf0ErrorValue,
}

impl From<Amf0ErrorValue> for Amf0Error {
    fn from(value: Amf0ErrorValue) -> Self {
        Self { value }
    }
}

impl From<BytesReadError> for Amf0Error {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: Amf0ErrorValue::BytesReadError(error),
        }
    }
}

impl From<BytesWriteError> for Amf0Error {
    fn from(error: BytesWriteError) -> Self {
        Self {
            value: Amf0ErrorValue::BytesWriteError(error),
        }
    }
}
