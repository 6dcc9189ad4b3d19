//! Segmenting delivery: HLS (MPEG-TS), DASH (fMP4) and LL-DASH/CMAF
//! (chunked fMP4) publishers sharing one HTTP listener per port, with
//! signed-URL admission and session accounting.

pub mod cache;
pub mod cors;
pub mod dash;
pub mod errors;
pub mod hls;
pub mod server;
pub mod session_table;
pub mod signed_url;

use {
    async_trait::async_trait,
    axum::{
        body::Body,
        http::{header, StatusCode},
        response::{IntoResponse, Response},
    },
    self::cache::StreamStore,
    dashmap::DashMap,
    self::server::{SegmentInterceptor, SegmentRequest, SegmentStreamServer},
    self::session_table::{PlaylistRequestInfo, SegmentRequestInfo, SessionTable},
    self::signed_url::SignedUrlToken,
    std::sync::Arc,
    std::time::Instant,
    tokio_util::sync::CancellationToken,
};

use crate::{
    config::SignedUrlConfig,
    media::StreamInfo,
    orchestrator::Orchestrator,
    router::{
        define::{ObserverInfo, ObserverKind, TrackFilter},
        RouterHandle,
    },
    statlog,
};

/// One segmenting publisher (HLS, DASH or LL-DASH/CMAF).
pub struct SegmentPublisher {
    kind: ObserverKind,
    orchestrator: Arc<Orchestrator>,
    router: RouterHandle,
    stores: DashMap<(String, String), Arc<StreamStore>>,
    session_table: Arc<SessionTable>,
    cancel: CancellationToken,
}

impl SegmentPublisher {
    /// Create the publisher, bind it into the port-shared HTTP server and
    /// start its stream watcher and session sweeper.
    pub fn start(
        kind: ObserverKind,
        orchestrator: Arc<Orchestrator>,
        router: RouterHandle,
        server: &SegmentStreamServer,
    ) -> Arc<Self> {
        let publisher = Arc::new(Self {
            kind,
            orchestrator,
            router,
            stores: DashMap::new(),
            session_table: Arc::new(SessionTable::new()),
            cancel: CancellationToken::new(),
        });

        server.add_interceptor(publisher.clone());
        publisher
            .session_table
            .clone()
            .run_sweeper(publisher.cancel.clone());

        let watcher = publisher.clone();
        tokio::spawn(async move { watcher.watch_streams().await });

        publisher
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn watch_streams(&self) {
        let mut events = self.router.subscribe_stream_events();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = self.cancel.cancelled() => break,
            };
            match event {
                Ok(crate::router::define::StreamEvent::Published { stream_info }) => {
                    self.on_stream_published(stream_info).await;
                }
                Ok(crate::router::define::StreamEvent::Unpublished { identifier }) => {
                    self.stores.retain(|_, store| {
                        store.info.identifier() != identifier
                    });
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} publisher lagged {skipped} stream events", self.kind);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_stream_published(&self, stream_info: Arc<StreamInfo>) {
        let Some(application) = self
            .orchestrator
            .application_by_id(stream_info.application_id)
        else {
            return;
        };

        let (enabled, segment_count, segment_duration) = match self.kind {
            ObserverKind::Hls => {
                let config = &application.config.publishers.hls;
                (config.enabled, config.segment_count, config.segment_duration)
            }
            ObserverKind::Dash => {
                let config = &application.config.publishers.dash;
                (config.enabled, config.segment_count, config.segment_duration)
            }
            ObserverKind::Cmaf => {
                let config = &application.config.publishers.cmaf;
                (config.enabled, config.segment_count, config.segment_duration)
            }
            _ => (false, 0, 0),
        };
        if !enabled || stream_info.tracks.is_empty() {
            return;
        }

        // DASH keeps up to two files (audio + video) per sequence.
        let capacity = if self.kind == ObserverKind::Hls {
            segment_count
        } else {
            segment_count * 2
        };
        let store = StreamStore::new(stream_info.clone(), capacity);

        let connection = match self
            .router
            .subscribe(
                stream_info.identifier(),
                ObserverInfo::new(self.kind, TrackFilter::All),
            )
            .await
        {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!(
                    "{} publisher could not attach to {}: {err}",
                    self.kind,
                    stream_info.identifier()
                );
                return;
            }
        };

        let key = (
            stream_info.application_name.clone(),
            stream_info.name.clone(),
        );
        self.stores.insert(key, store.clone());

        let cancel = self.cancel.clone();
        match self.kind {
            ObserverKind::Hls => {
                let packager = hls::HlsPackager::new(store, segment_count, segment_duration);
                tokio::spawn(packager.run(connection, cancel));
            }
            ObserverKind::Dash | ObserverKind::Cmaf => {
                let packager = dash::DashPackager::new(
                    store,
                    segment_count,
                    segment_duration,
                    self.kind == ObserverKind::Cmaf,
                );
                tokio::spawn(packager.run(connection, cancel));
            }
            _ => {}
        }
    }

    fn store(&self, app_name: &str, stream_name: &str) -> Option<Arc<StreamStore>> {
        self.stores
            .get(&(app_name.to_string(), stream_name.to_string()))
            .map(|entry| entry.clone())
    }

    fn signed_url_config(&self, domain: &str) -> Option<SignedUrlConfig> {
        self.orchestrator
            .vhost_config(domain)
            .and_then(|vhost| vhost.signed_url)
            .filter(|signed| !signed.crypto_key.is_empty())
    }

    /// Signed-URL admission (spec'd conditions, opaque failure). Returns
    /// the admitted session id when a token was checked.
    fn admit_playlist(&self, request: &SegmentRequest) -> Result<Option<String>, Response> {
        let Some(signed) = self.signed_url_config(&request.domain) else {
            return Ok(None); // admission open
        };

        let forbidden = || StatusCode::FORBIDDEN.into_response();

        let Some(token_value) = request.query.get(&signed.query_string_key) else {
            tracing::warn!(
                "signed url: missing {} parameter from {}",
                signed.query_string_key, request.client_ip
            );
            return Err(forbidden());
        };
        let token = match SignedUrlToken::decode(&signed.crypto_key, token_value) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!("signed url: rejected token from {}: {err}", request.client_ip);
                return Err(forbidden());
            }
        };

        let candidate = PlaylistRequestInfo {
            publisher: self.kind,
            app_name: request.app_name.clone(),
            stream_name: request.stream_name.clone(),
            ip_address: request.client_ip,
            session_id: token.session_id.clone(),
            created_at: Instant::now(),
        };
        let authorized = self.session_table.is_authorized_session(&candidate);
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        if let Err(reasons) = token.evaluate(
            &request.canonical_url(&signed.query_string_key),
            request.client_ip,
            now_ms,
            authorized,
        ) {
            // The reasons stay server-side; the client only sees 403.
            tracing::warn!(
                "failed to authenticate client {}:\n    - {}",
                request.client_ip,
                reasons.join("\n    - ")
            );
            return Err(forbidden());
        }

        let session_id = candidate.session_id.clone();
        self.session_table.authorize_playlist(candidate);
        Ok(Some(session_id))
    }

    async fn handle_playlist(&self, request: SegmentRequest) -> Response {
        let session_id = match self.admit_playlist(&request) {
            Ok(session_id) => session_id,
            Err(response) => return response,
        };

        let mut store = self.store(&request.app_name, &request.stream_name);
        if store.is_none() {
            // Not live here: ask the orchestrator to pull it, retry once.
            let pull_url = request
                .query
                .get("rtspURI")
                .cloned()
                .unwrap_or_else(|| {
                    format!(
                        "rtsp://{}/{}/{}",
                        request.domain, request.app_name, request.stream_name
                    )
                });
            if let Err(err) = self
                .orchestrator
                .request_pull_stream(
                    &request.domain,
                    &request.app_name,
                    &request.stream_name,
                    &pull_url,
                )
                .await
            {
                tracing::error!(
                    "could not request pull stream for {}/{}: {err}",
                    request.app_name, request.stream_name
                );
                return StatusCode::NOT_ACCEPTABLE.into_response();
            }
            statlog::request(
                &format!("{}.SS", self.kind),
                &request.app_name,
                &pull_url,
                session_id.as_deref().unwrap_or("-"),
            );
            store = self.store(&request.app_name, &request.stream_name);
        }

        let Some(store) = store else {
            return StatusCode::NOT_FOUND.into_response();
        };
        match store.playlist() {
            Some(playlist) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type(&request.file_ext)),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                playlist,
            )
                .into_response(),
            // The stream exists but no segment is finished yet.
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    async fn handle_segment(&self, request: SegmentRequest) -> Response {
        let Some(store) = self.store(&request.app_name, &request.stream_name) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let file = format!("{}.{}", request.file_name, request.file_ext);

        if let Some(segment) = store.segment(&file) {
            if segment.data.is_empty() {
                return StatusCode::ACCEPTED.into_response();
            }
            if segment.duration > 0 {
                let statistics = self
                    .router
                    .statistics_handle(&store.info.identifier());
                self.session_table.update_segment_request(SegmentRequestInfo {
                    publisher: self.kind,
                    app_name: request.app_name.clone(),
                    stream_name: request.stream_name.clone(),
                    ip_address: request.client_ip,
                    last_sequence: segment.sequence_number,
                    duration: segment.duration,
                    count: 0,
                    last_seen: Instant::now(),
                    statistics,
                });
            }
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type(&request.file_ext))],
                segment.data,
            )
                .into_response();
        }

        // LL-DASH: a client may ask for the segment currently being
        // produced; stream it chunk-by-chunk as it materializes.
        if self.kind == ObserverKind::Cmaf
            && store.current_chunk_name().as_deref() == Some(file.as_str())
        {
            return chunked_response(&store, file, &request.file_ext);
        }

        StatusCode::NOT_FOUND.into_response()
    }
}

fn chunked_response(store: &Arc<StreamStore>, file: String, ext: &str) -> Response {
    let receiver = store.subscribe_chunks();
    let stream = futures::stream::unfold(receiver, move |mut receiver| {
        let file = file.clone();
        async move {
            loop {
                match receiver.recv().await {
                    Ok(chunk) if chunk.segment_name == file => {
                        if chunk.last {
                            return None;
                        }
                        if chunk.data.is_empty() {
                            continue;
                        }
                        return Some((Ok::<_, std::io::Error>(chunk.data), receiver));
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type(ext))],
        Body::from_stream(stream),
    )
        .into_response()
}

#[async_trait]
impl SegmentInterceptor for SegmentPublisher {
    fn is_match(&self, request: &SegmentRequest) -> bool {
        let ext_match = match self.kind {
            ObserverKind::Hls => matches!(request.file_ext.as_str(), "m3u8" | "ts"),
            ObserverKind::Dash | ObserverKind::Cmaf => {
                matches!(request.file_ext.as_str(), "mpd" | "m4s" | "mp4")
            }
            _ => false,
        };
        if !ext_match {
            return false;
        }
        // A live store binds the request here; otherwise only claim it if
        // this application enables this publisher (for the pull path).
        if self.store(&request.app_name, &request.stream_name).is_some() {
            return true;
        }
        self.orchestrator
            .resolve_application(&request.domain, &request.app_name)
            .map(|application| match self.kind {
                ObserverKind::Hls => application.config.publishers.hls.enabled,
                ObserverKind::Dash => application.config.publishers.dash.enabled,
                ObserverKind::Cmaf => application.config.publishers.cmaf.enabled,
                _ => false,
            })
            .unwrap_or(false)
    }

    async fn handle(&self, request: SegmentRequest) -> Response {
        match request.file_ext.as_str() {
            "m3u8" | "mpd" => self.handle_playlist(request).await,
            _ => self.handle_segment(request).await,
        }
    }
}

fn content_type(ext: &str) -> &'static str {
    match ext {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "mpd" => "application/dash+xml",
        "m4s" => "video/iso.segment",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
