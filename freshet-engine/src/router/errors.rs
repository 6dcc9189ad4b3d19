use tokio::sync::oneshot::error::RecvError;

#[derive(Debug, thiserror::Error)]
pub enum RouterErrorValue {
    #[error("stream already registered")]
    StreamExists,
    #[error("no such stream")]
    StreamNotFound,
    #[error("no such observer")]
    ObserverNotFound,
    #[error("send error")]
    SendError,
    #[error("oneshot recv error")]
    RecvError(RecvError),
    #[error("router stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct RouterError {
    pub value: RouterErrorValue,
}

impl From<RouterErrorValue> for RouterError {
    fn from(value: RouterErrorValue) -> Self {
        Self { value }
    }
}

impl From<RecvError> for RouterError {
    fn from(error: RecvError) -> Self {
        Self {
            value: RouterErrorValue::RecvError(error),
        }
    }
}
