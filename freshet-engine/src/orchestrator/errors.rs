#[derive(Debug, thiserror::Error)]
pub enum OrchestratorErrorValue {
    #[error("unknown virtual host for domain: {0}")]
    UnknownVirtualHost(String),
    #[error("unknown application: {0}")]
    UnknownApplication(String),
    #[error("no pull provider for scheme: {0}")]
    NoPullProvider(String),
    #[error("pull request failed: {0}")]
    PullFailed(String),
    #[error("pull request timed out")]
    PullTimeout,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct OrchestratorError {
    pub value: OrchestratorErrorValue,
}

impl From<OrchestratorErrorValue> for OrchestratorError {
    fn from(value: OrchestratorErrorValue) -> Self {
        Self { value }
    }
}
