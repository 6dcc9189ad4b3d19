use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

use freshet_engine::{
    config::Config,
    orchestrator::Orchestrator,
    ovt::{OvtPublisher, OvtPullProvider},
    router::{MediaRouter, RouterHandle},
    rtmp::server::RtmpServer,
    rtsp::RtspPullProvider,
    segment::server::HttpServerManager,
    segment::SegmentPublisher,
    router::define::ObserverKind,
    transcode::{backend::NullCodecLibrary, Transcoder},
    webrtc::{signaling::SignalingServer, WebRtcPublisher},
};

/// The assembled origin server: every module wired onto one router.
pub struct FreshetServer {
    config: Config,
    router_handle: RouterHandle,
    orchestrator: Arc<Orchestrator>,
}

impl FreshetServer {
    pub fn new(config: Config) -> Self {
        let router = MediaRouter::new();
        let router_handle = router.handle();
        tokio::spawn(router.run());

        let orchestrator = Orchestrator::new(&config, router_handle.clone());

        Self {
            config,
            router_handle,
            orchestrator,
        }
    }

    /// Bring every module up. Bind failures are fatal; everything after
    /// is supervised by the modules themselves.
    pub async fn start(&self) -> anyhow::Result<()> {
        let bind = &self.config.server.bind;

        // Pull providers register with the orchestrator first so publisher
        // pull requests can resolve from the start.
        self.orchestrator
            .register_pull_provider(RtspPullProvider::new(self.router_handle.clone()));
        self.orchestrator
            .register_pull_provider(OvtPullProvider::new(self.router_handle.clone()));

        // Transcoder watches for new source streams.
        let transcoder = Transcoder::new(
            self.router_handle.clone(),
            self.orchestrator.clone(),
            Arc::new(NullCodecLibrary),
        );
        tokio::spawn(transcoder.run());

        // RTMP push ingest.
        let rtmp = RtmpServer::new(
            format!("{}:{}", self.config.server.ip, bind.providers.rtmp_port),
            self.orchestrator.clone(),
            self.router_handle.clone(),
        );
        tokio::spawn(async move {
            if let Err(err) = rtmp.run().await {
                error!("rtmp provider failed: {err}");
            }
        });

        // Segmenting publishers share HTTP listeners per port.
        let http_manager = HttpServerManager::new();
        let hls_server = http_manager.get_or_create(bind.publishers.hls_port, &self.orchestrator);
        SegmentPublisher::start(
            ObserverKind::Hls,
            self.orchestrator.clone(),
            self.router_handle.clone(),
            &hls_server,
        );
        let dash_server = http_manager.get_or_create(bind.publishers.dash_port, &self.orchestrator);
        SegmentPublisher::start(
            ObserverKind::Dash,
            self.orchestrator.clone(),
            self.router_handle.clone(),
            &dash_server,
        );
        let cmaf_server = http_manager.get_or_create(bind.publishers.cmaf_port, &self.orchestrator);
        SegmentPublisher::start(
            ObserverKind::Cmaf,
            self.orchestrator.clone(),
            self.router_handle.clone(),
            &cmaf_server,
        );

        // WebRTC: ICE/DTLS/RTP endpoint plus WebSocket signaling.
        let webrtc = WebRtcPublisher::start(
            self.orchestrator.clone(),
            self.router_handle.clone(),
            &self.config.server.ip,
            bind.publishers.ice_port,
            None,
        )
        .await
        .context("webrtc endpoint failed to bind")?;
        let signaling = SignalingServer::new(bind.publishers.signalling_port, webrtc);
        tokio::spawn(async move {
            if let Err(err) = signaling.run().await {
                error!("webrtc signaling failed: {err}");
            }
        });

        // OVT edge fan-out.
        let ovt = OvtPublisher::new(
            format!("{}:{}", self.config.server.ip, bind.publishers.ovt_port),
            self.orchestrator.clone(),
            self.router_handle.clone(),
        );
        tokio::spawn(async move {
            if let Err(err) = ovt.run().await {
                error!("ovt publisher failed: {err}");
            }
        });

        info!("freshet origin is up");
        Ok(())
    }
}
