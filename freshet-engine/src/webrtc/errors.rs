use crate::router::errors::RouterError;

#[derive(Debug, thiserror::Error)]
pub enum RtcErrorValue {
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    #[error("sdp parse error: {0}")]
    SdpParse(String),
    #[error("stun error: {0}")]
    Stun(&'static str),
    #[error("integrity check failed")]
    BadIntegrity,
    #[error("dtls error: {0}")]
    Dtls(&'static str),
    #[error("srtp error: {0}")]
    Srtp(&'static str),
    #[error("no such stream")]
    StreamNotFound,
    #[error("no such session")]
    SessionNotFound,
    #[error("router error: {0}")]
    RouterError(RouterError),
    #[error("io error: {0}")]
    IO(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct RtcError {
    pub value: RtcErrorValue,
}

impl From<RtcErrorValue> for RtcError {
    fn from(value: RtcErrorValue) -> Self {
        Self { value }
    }
}

impl From<RouterError> for RtcError {
    fn from(error: RouterError) -> Self {
        Self {
            value: RtcErrorValue::RouterError(error),
        }
    }
}

impl From<std::io::Error> for RtcError {
    fn from(error: std::io::Error) -> Self {
        Self {
            value: RtcErrorValue::IO(error),
        }
    }
}
