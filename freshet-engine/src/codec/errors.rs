use crate::bytesio::bytes_errors::BytesReadError;

#[derive(Debug, thiserror::Error)]
pub enum CodecDataErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(BytesReadError),
    #[error("unsupported configuration version: {0}")]
    UnsupportedVersion(u8),
    #[error("no sequence parameter set present")]
    MissingSps,
    #[error("malformed parameter set")]
    MalformedParameterSet,
    #[error("invalid sampling frequency index: {0}")]
    InvalidSamplingFrequency(u8),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct CodecDataError {
    pub value: CodecDataErrorValue,
}

impl From<CodecDataErrorValue> for CodecDataError {
    fn from(value: CodecDataErrorValue) -> Self {
        Self { value }
    }
}

impl From<BytesReadError> for CodecDataError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: CodecDataErrorValue::BytesReadError(error),
        }
    }
}
