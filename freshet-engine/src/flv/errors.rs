use crate::bytesio::bytes_errors::BytesReadError;

#[derive(Debug, thiserror::Error)]
pub enum FlvDemuxerErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(BytesReadError),
    #[error("unsupported sound format: {0}")]
    UnsupportedSoundFormat(u8),
    #[error("unsupported video codec id: {0}")]
    UnsupportedVideoCodec(u8),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct FlvDemuxerError {
    pub value: FlvDemuxerErrorValue,
}

impl From<FlvDemuxerErrorValue> for FlvDemuxerError {
    fn from(value: FlvDemuxerErrorValue) -> Self {
        Self { value }
    }
}

impl From<BytesReadError> for FlvDemuxerError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: FlvDemuxerErrorValue::BytesReadError(error),
        }
    }
}
