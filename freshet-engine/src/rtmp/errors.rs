use {
    super::chunk::errors::{PackError, UnpackError},
    crate::bytesio::bytes_errors::{BytesReadError, BytesWriteError},
    crate::codec::errors::CodecDataError,
    crate::flv::amf0::errors::Amf0Error,
    crate::flv::errors::FlvDemuxerError,
    crate::orchestrator::errors::OrchestratorError,
    crate::router::errors::RouterError,
    std::io,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionErrorValue {
    #[error("io error: {0}")]
    IO(#[source] io::Error),
    #[error("bytes read error: {0}")]
    BytesReadError(BytesReadError),
    #[error("bytes write error: {0}")]
    BytesWriteError(BytesWriteError),
    #[error("chunk unpack error: {0}")]
    UnpackError(UnpackError),
    #[error("chunk pack error: {0}")]
    PackError(PackError),
    #[error("amf0 error: {0}")]
    Amf0Error(Amf0Error),
    #[error("flv demux error: {0}")]
    FlvDemuxerError(FlvDemuxerError),
    #[error("codec data error: {0}")]
    CodecDataError(CodecDataError),
    #[error("router error: {0}")]
    RouterError(RouterError),
    #[error("orchestrator error: {0}")]
    OrchestratorError(OrchestratorError),
    #[error("publish rejected: {0}")]
    PublishRejected(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("handshake timed out")]
    HandshakeTimeout,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct SessionError {
    pub value: SessionErrorValue,
}

impl From<SessionErrorValue> for SessionError {
    fn from(value: SessionErrorValue) -> Self {
        Self { value }
    }
}

macro_rules! impl_from {
    ($from:ty, $variant:ident) => {
        impl From<$from> for SessionError {
            fn from(error: $from) -> Self {
                Self {
                    value: SessionErrorValue::$variant(error),
                }
            }
        }
    };
}

impl_from!(io::Error, IO);
impl_from!(BytesReadError, BytesReadError);
impl_from!(BytesWriteError, BytesWriteError);
impl_from!(UnpackError, UnpackError);
impl_from!(PackError, PackError);
impl_from!(Amf0Error, Amf0Error);
impl_from!(FlvDemuxerError, FlvDemuxerError);
impl_from!(CodecDataError, CodecDataError);
impl_from!(RouterError, RouterError);
impl_from!(OrchestratorError, OrchestratorError);
