use crate::{orchestrator::errors::OrchestratorError, router::errors::RouterError};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RtspErrorValue {
    #[error("io error: {0}")]
    IO(#[source] io::Error),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("request failed with status {0}")]
    Status(u16),
    #[error("no compatible media in sdp")]
    NoMedia,
    #[error("router error: {0}")]
    RouterError(RouterError),
    #[error("handshake timed out")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct RtspError {
    pub value: RtspErrorValue,
}

impl From<RtspErrorValue> for RtspError {
    fn from(value: RtspErrorValue) -> Self {
        Self { value }
    }
}

impl From<io::Error> for RtspError {
    fn from(error: io::Error) -> Self {
        Self {
            value: RtspErrorValue::IO(error),
        }
    }
}

impl From<RouterError> for RtspError {
    fn from(error: RouterError) -> Self {
        Self {
            value: RtspErrorValue::RouterError(error),
        }
    }
}

impl From<RtspError> for OrchestratorError {
    fn from(error: RtspError) -> Self {
        crate::orchestrator::errors::OrchestratorErrorValue::PullFailed(error.to_string()).into()
    }
}
