pub mod client;
pub mod depacketizer;
pub mod errors;

use {
    crate::orchestrator::{errors::OrchestratorError, Application, PullProvider},
    crate::router::RouterHandle,
    async_trait::async_trait,
    self::client::RtspPullSession,
    dashmap::DashMap,
    std::sync::Arc,
};

/// Pull provider answering `rtsp://` requests from the orchestrator.
/// Concurrent requests for the same stream collapse into one session.
pub struct RtspPullProvider {
    router: RouterHandle,
    active: DashMap<(u32, String), ()>,
}

impl RtspPullProvider {
    #[must_use]
    pub fn new(router: RouterHandle) -> Arc<Self> {
        Arc::new(Self {
            router,
            active: DashMap::new(),
        })
    }
}

#[async_trait]
impl PullProvider for RtspPullProvider {
    fn scheme(&self) -> &'static str {
        "rtsp"
    }

    async fn pull(
        &self,
        application: Arc<Application>,
        stream_name: &str,
        url: &str,
    ) -> Result<(), OrchestratorError> {
        if !application.config.providers.rtsp_pull {
            return Err(crate::orchestrator::errors::OrchestratorErrorValue::PullFailed(
                "rtsp pull disabled for this application".to_string(),
            )
            .into());
        }

        let key = (application.id, stream_name.to_string());
        if self.active.contains_key(&key) {
            return Ok(());
        }
        self.active.insert(key.clone(), ());

        let session = RtspPullSession::new(
            url.to_string(),
            application,
            stream_name.to_string(),
            self.router.clone(),
        );
        let result = session.start().await;
        if result.is_err() {
            self.active.remove(&key);
        }
        result.map_err(OrchestratorError::from)
    }
}
