#[derive(Debug, thiserror::Error)]
pub enum TranscodeErrorValue {
    #[error("codec not found: {0}")]
    CodecNotFound(String),
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("filter failed: {0}")]
    FilterFailed(String),
    #[error("stage stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct TranscodeError {
    pub value: TranscodeErrorValue,
}

impl From<TranscodeErrorValue> for TranscodeError {
    fn from(value: TranscodeErrorValue) -> Self {
        Self { value }
    }
}
