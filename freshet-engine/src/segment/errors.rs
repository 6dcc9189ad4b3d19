use crate::{mpegts::errors::MpegTsError, router::errors::RouterError};

#[derive(Debug, thiserror::Error)]
pub enum SegmentErrorValue {
    #[error("mpegts mux error: {0}")]
    MpegTsError(MpegTsError),
    #[error("router error: {0}")]
    RouterError(RouterError),
    #[error("stream has no usable tracks")]
    NoUsableTracks,
    #[error("bind failed: {0}")]
    BindError(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct SegmentError {
    pub value: SegmentErrorValue,
}

impl From<SegmentErrorValue> for SegmentError {
    fn from(value: SegmentErrorValue) -> Self {
        Self { value }
    }
}

impl From<MpegTsError> for SegmentError {
    fn from(error: MpegTsError) -> Self {
        Self {
            value: SegmentErrorValue::MpegTsError(error),
        }
    }
}

impl From<RouterError> for SegmentError {
    fn from(error: RouterError) -> Self {
        Self {
            value: SegmentErrorValue::RouterError(error),
        }
    }
}
