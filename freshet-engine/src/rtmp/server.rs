use {
    super::session::ServerSession,
    crate::orchestrator::Orchestrator,
    crate::router::RouterHandle,
    std::sync::atomic::{AtomicUsize, Ordering},
    std::sync::Arc,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
};

/// Connection cap; pushes beyond it are refused at accept.
const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// RTMP push provider: one TCP listener, one [`ServerSession`] task per
/// accepted encoder connection.
pub struct RtmpServer {
    address: String,
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    max_connections: usize,
    cancel: CancellationToken,
}

impl RtmpServer {
    #[must_use]
    pub fn new(address: String, orchestrator: Arc<Orchestrator>, router: RouterHandle) -> Self {
        Self {
            address,
            orchestrator,
            router,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.address).await?;
        let active = Arc::new(AtomicUsize::new(0));
        tracing::info!(
            "rtmp provider listening on tcp://{} (max connections: {})",
            self.address, self.max_connections
        );

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = self.cancel.cancelled() => {
                    tracing::info!("rtmp provider stopping");
                    return Ok(());
                }
            };
            let (stream, remote_addr) = accepted?;

            if active.load(Ordering::Relaxed) >= self.max_connections {
                tracing::warn!("rtmp connection from {remote_addr} refused: at capacity");
                drop(stream);
                continue;
            }
            active.fetch_add(1, Ordering::Relaxed);
            tracing::info!("rtmp client connected: {remote_addr}");

            let counter = active.clone();
            let mut session = ServerSession::new(
                stream,
                remote_addr,
                self.orchestrator.clone(),
                self.router.clone(),
            );
            tokio::spawn(async move {
                if let Err(err) = session.run().await {
                    tracing::info!(
                        "rtmp session ended: {}/{} from {remote_addr}: {err}",
                        session.app_name, session.stream_name
                    );
                }
                counter.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}
