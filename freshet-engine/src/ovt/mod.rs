//! OVT: the internal edge-forwarding protocol. An origin publishes every
//! stream over a TCP port; edge nodes pull with DESCRIBE/PLAY and receive
//! serialized media packets, re-registering them with their local router.

pub mod codec;

use {
    crate::media::{next_stream_id, StreamInfo, StreamSourceType},
    crate::orchestrator::{errors::OrchestratorError, Application, Orchestrator, PullProvider},
    crate::router::{
        define::{ObserverInfo, ObserverKind, TrackFilter},
        RouterHandle,
    },
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    self::codec::{message_type, OvtMessage},
    std::sync::Arc,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::{TcpListener, TcpStream},
    tokio_util::sync::CancellationToken,
};

/// Origin-side OVT endpoint: serves DESCRIBE/PLAY for any stream the
/// router knows.
pub struct OvtPublisher {
    address: String,
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    cancel: CancellationToken,
}

impl OvtPublisher {
    #[must_use]
    pub fn new(address: String, orchestrator: Arc<Orchestrator>, router: RouterHandle) -> Self {
        Self {
            address,
            orchestrator,
            router,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.address).await?;
        tracing::info!("ovt publisher listening on tcp://{}", self.address);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = self.cancel.cancelled() => return Ok(()),
            };
            let (stream, remote) = accepted?;
            tracing::info!("ovt edge connected: {remote}");

            let orchestrator = self.orchestrator.clone();
            let router = self.router.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_edge(stream, orchestrator, router, cancel).await {
                    tracing::info!("ovt edge session ended: {err}");
                }
            });
        }
    }
}

async fn serve_edge(
    mut stream: TcpStream,
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; 8192];
    let mut described: Option<Arc<StreamInfo>> = None;

    loop {
        let message = loop {
            match OvtMessage::unmarshal(&mut buffer) {
                Ok(Some(message)) => break message,
                Ok(None) => {}
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "bad ovt frame",
                    ))
                }
            }
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        match message.message_type {
            message_type::DESCRIBE => {
                // Payload: "app/stream" resolved against the default vhost.
                let target = String::from_utf8_lossy(&message.payload).to_string();
                let mut parts = target.splitn(2, '/');
                let app_name = parts.next().unwrap_or_default().to_string();
                let stream_name = parts.next().unwrap_or_default().to_string();

                let info = orchestrator
                    .resolve_application("*", &app_name)
                    .ok()
                    .and_then(|application| {
                        router.stream_info(&application.stream_identifier(&stream_name))
                    });

                match info {
                    Some(info) => {
                        let reply = serde_json::to_vec(info.as_ref()).unwrap_or_default();
                        described = Some(info);
                        let message = OvtMessage {
                            message_type: message_type::DESCRIBE_REPLY,
                            payload: Bytes::from(reply),
                        };
                        stream.write_all(&message.marshal()).await?;
                    }
                    None => {
                        let message = OvtMessage {
                            message_type: message_type::ERROR,
                            payload: Bytes::from_static(b"no such stream"),
                        };
                        stream.write_all(&message.marshal()).await?;
                    }
                }
            }
            message_type::PLAY => {
                let Some(info) = described.clone() else {
                    let message = OvtMessage {
                        message_type: message_type::ERROR,
                        payload: Bytes::from_static(b"play before describe"),
                    };
                    stream.write_all(&message.marshal()).await?;
                    continue;
                };

                let connection = router
                    .subscribe(
                        info.identifier(),
                        ObserverInfo::new(ObserverKind::Ovt, TrackFilter::All),
                    )
                    .await
                    .map_err(|err| {
                        std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string())
                    })?;

                loop {
                    let maybe = tokio::select! {
                        maybe = connection.recv() => maybe,
                        () = cancel.cancelled() => None,
                    };
                    let Some(packet) = maybe else { break };
                    let message = OvtMessage {
                        message_type: message_type::PACKET,
                        payload: codec::marshal_packet(&packet),
                    };
                    stream.write_all(&message.marshal()).await?;
                }
                return Ok(());
            }
            message_type::STOP => return Ok(()),
            _ => {}
        }
    }
}

/// Edge-side pull provider answering `ovt://` requests.
pub struct OvtPullProvider {
    router: RouterHandle,
}

impl OvtPullProvider {
    #[must_use]
    pub fn new(router: RouterHandle) -> Arc<Self> {
        Arc::new(Self { router })
    }
}

#[async_trait]
impl PullProvider for OvtPullProvider {
    fn scheme(&self) -> &'static str {
        "ovt"
    }

    async fn pull(
        &self,
        application: Arc<Application>,
        stream_name: &str,
        url: &str,
    ) -> Result<(), OrchestratorError> {
        let fail = |text: String| {
            OrchestratorError::from(
                crate::orchestrator::errors::OrchestratorErrorValue::PullFailed(text),
            )
        };

        if !application.config.providers.ovt {
            return Err(fail("ovt pull disabled for this application".to_string()));
        }

        let address = url
            .strip_prefix("ovt://")
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| fail(format!("bad ovt url: {url}")))?;
        let target = url
            .strip_prefix("ovt://")
            .and_then(|rest| rest.split_once('/'))
            .map(|(_, path)| path.to_string())
            .unwrap_or_else(|| format!("{}/{stream_name}", application.name));

        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|err| fail(err.to_string()))?;

        let describe = OvtMessage {
            message_type: message_type::DESCRIBE,
            payload: Bytes::from(target.into_bytes()),
        };
        stream
            .write_all(&describe.marshal())
            .await
            .map_err(|err| fail(err.to_string()))?;

        let reply = read_message(&mut stream)
            .await
            .map_err(|err| fail(err.to_string()))?;
        if reply.message_type != message_type::DESCRIBE_REPLY {
            return Err(fail(String::from_utf8_lossy(&reply.payload).to_string()));
        }
        let origin_info: StreamInfo = serde_json::from_slice(&reply.payload)
            .map_err(|err| fail(format!("bad describe reply: {err}")))?;

        // Re-home the stream under the local application.
        let mut info = StreamInfo::new(
            next_stream_id(),
            application.id,
            application.name.clone(),
            stream_name,
            StreamSourceType::OvtPull,
        );
        info.tracks = origin_info.tracks;
        let info = Arc::new(info);

        let play = OvtMessage {
            message_type: message_type::PLAY,
            payload: Bytes::new(),
        };
        stream
            .write_all(&play.marshal())
            .await
            .map_err(|err| fail(err.to_string()))?;

        let producer = self
            .router
            .publish(info.clone())
            .await
            .map_err(|err| fail(err.to_string()))?;
        tracing::info!("ovt pull established: {url} -> {}", info.identifier());

        let router = self.router.clone();
        tokio::spawn(async move {
            let mut buffer = BytesMut::new();
            let mut chunk = [0u8; 16384];
            loop {
                match OvtMessage::unmarshal(&mut buffer) {
                    Ok(Some(message)) if message.message_type == message_type::PACKET => {
                        if let Ok(packet) = codec::unmarshal_packet(&message.payload) {
                            producer.push(packet);
                        }
                        continue;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {}
                    Err(_) => break,
                }
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => buffer.extend_from_slice(&chunk[..read]),
                }
            }
            // Same grace period as other pull providers.
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            let _ = router.unpublish(producer.identifier().clone()).await;
        });

        Ok(())
    }
}

async fn read_message(stream: &mut TcpStream) -> Result<OvtMessage, std::io::Error> {
    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; 8192];
    loop {
        match OvtMessage::unmarshal(&mut buffer) {
            Ok(Some(message)) => return Ok(message),
            Ok(None) => {}
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "bad ovt frame",
                ))
            }
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof",
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}
