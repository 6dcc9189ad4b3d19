use crate::bytesio::bytes_errors::BytesWriteError;

#[derive(Debug, thiserror::Error)]
pub enum MpegTsErrorValue {
    #[error("bytes write error: {0}")]
    BytesWriteError(BytesWriteError),
    #[error("no program registered")]
    NoProgram,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct MpegTsError {
    pub value: MpegTsErrorValue,
}

impl From<MpegTsErrorValue> for MpegTsError {
    fn from(value: MpegTsErrorValue) -> Self {
        Self { value }
    }
}

impl From<BytesWriteError> for MpegTsError {
    fn from(error: BytesWriteError) -> Self {
        Self {
            value: MpegTsErrorValue::BytesWriteError(error),
        }
    }
}
