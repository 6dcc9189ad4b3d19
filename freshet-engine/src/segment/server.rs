use {
    super::cors::CorsPolicy,
    crate::orchestrator::Orchestrator,
    async_trait::async_trait,
    axum::{
        body::Body,
        extract::{ConnectInfo, State},
        http::{header, HeaderMap, Request, StatusCode, Uri},
        response::{IntoResponse, Response},
    },
    parking_lot::{Mutex, RwLock},
    std::collections::HashMap,
    std::net::{IpAddr, SocketAddr},
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
};

/// HTTP keep-alive idle allowance (hyper's default keep-alive is
/// unbounded; requests re-parse on the same connection per HTTP/1.1).
pub const KEEP_ALIVE_IDLE: std::time::Duration = std::time::Duration::from_secs(30);

/// One parsed segment-delivery request: `…/<app>/<stream>/<file>.<ext>`.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub domain: String,
    pub app_name: String,
    pub stream_name: String,
    pub file_name: String,
    pub file_ext: String,
    pub client_ip: IpAddr,
    /// Path plus full query, as received.
    pub path_and_query: String,
    pub query: HashMap<String, String>,
}

impl SegmentRequest {
    /// The canonical URL a signed token must cover: path plus the query
    /// string with `token_key` removed.
    #[must_use]
    pub fn canonical_url(&self, token_key: &str) -> String {
        let path = self
            .path_and_query
            .split('?')
            .next()
            .unwrap_or(&self.path_and_query);
        let mut rest: Vec<String> = self
            .query
            .iter()
            .filter(|(key, _)| key.as_str() != token_key)
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        rest.sort();
        if rest.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{}", rest.join("&"))
        }
    }
}

/// A publisher that can answer segment-delivery requests. The first
/// matching interceptor is bound to the request.
#[async_trait]
pub trait SegmentInterceptor: Send + Sync {
    fn is_match(&self, request: &SegmentRequest) -> bool;
    async fn handle(&self, request: SegmentRequest) -> Response;
}

/// One HTTP listener shared by every segment publisher on the port
/// (HLS + DASH + CMAF coexist here).
pub struct SegmentStreamServer {
    port: u16,
    orchestrator: Arc<Orchestrator>,
    interceptors: RwLock<Vec<Arc<dyn SegmentInterceptor>>>,
    cancel: CancellationToken,
}

impl SegmentStreamServer {
    #[must_use]
    pub fn new(port: u16, orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            port,
            orchestrator,
            interceptors: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn SegmentInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self: Arc<Self>) -> Result<(), std::io::Error> {
        let address = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(address).await?;
        tracing::info!("segment publisher listening on http://{address}");

        let cancel = self.cancel.clone();
        let app = axum::Router::new()
            .fallback(dispatch)
            .with_state(self.clone());

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
        Ok(())
    }
}

async fn dispatch(
    State(server): State<Arc<SegmentStreamServer>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request<Body>,
) -> Response {
    let uri = request.uri().clone();
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string();
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let cors = server
        .orchestrator
        .vhost_config(&host)
        .map(|vhost| CorsPolicy::new(&vhost.cross_domains))
        .unwrap_or_default();

    let mut response = route(&server, &host, remote.ip(), &uri, &cors).await;

    if let Some(origin) = origin {
        if let Some(allowed) = cors.allow_origin(&origin) {
            if let Ok(value) = allowed.parse() {
                response
                    .headers_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
    response
        .headers_mut()
        .insert(header::SERVER, header::HeaderValue::from_static("Freshet"));
    response
}

async fn route(
    server: &Arc<SegmentStreamServer>,
    host: &str,
    client_ip: IpAddr,
    uri: &Uri,
    cors: &CorsPolicy,
) -> Response {
    let path = uri.path();

    if path.ends_with("crossdomain.xml") {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/x-cross-domain-policy")],
            cors.crossdomain_xml().to_string(),
        )
            .into_response();
    }

    let Some(request) = parse_request(host, client_ip, uri) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let interceptor = {
        let interceptors = server.interceptors.read();
        interceptors
            .iter()
            .find(|interceptor| interceptor.is_match(&request))
            .cloned()
    };

    match interceptor {
        Some(interceptor) => interceptor.handle(request).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `…/<app>/<stream>/<file>.<ext>`; the last three path segments count.
fn parse_request(host: &str, client_ip: IpAddr, uri: &Uri) -> Option<SegmentRequest> {
    let path = uri.path();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 3 {
        return None;
    }
    let file = segments[segments.len() - 1];
    let (file_name, file_ext) = file.rsplit_once('.')?;

    let query: HashMap<String, String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();

    Some(SegmentRequest {
        domain: host.to_string(),
        app_name: segments[segments.len() - 3].to_string(),
        stream_name: segments[segments.len() - 2].to_string(),
        file_name: file_name.to_string(),
        file_ext: file_ext.to_string(),
        client_ip,
        path_and_query: uri
            .path_and_query()
            .map_or_else(|| path.to_string(), ToString::to_string),
        query,
    })
}

/// Port map so HLS and DASH publishers share one listener per port.
#[derive(Default)]
pub struct HttpServerManager {
    servers: Mutex<HashMap<u16, Arc<SegmentStreamServer>>>,
}

impl HttpServerManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the server bound to `port`, creating and starting it on
    /// first use.
    pub fn get_or_create(
        &self,
        port: u16,
        orchestrator: &Arc<Orchestrator>,
    ) -> Arc<SegmentStreamServer> {
        let mut servers = self.servers.lock();
        if let Some(server) = servers.get(&port) {
            return server.clone();
        }
        let server = SegmentStreamServer::new(port, orchestrator.clone());
        servers.insert(port, server.clone());
        let runner = server.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run().await {
                tracing::error!("segment http server on :{port} failed: {err}");
            }
        });
        server
    }

    pub fn stop_all(&self) {
        for server in self.servers.lock().values() {
            server.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_url_shape() {
        let uri: Uri = "/live/cam1/index.m3u8?t=abc&x=1".parse().unwrap();
        let request = parse_request("host", "1.2.3.4".parse().unwrap(), &uri).unwrap();
        assert_eq!(request.app_name, "live");
        assert_eq!(request.stream_name, "cam1");
        assert_eq!(request.file_name, "index");
        assert_eq!(request.file_ext, "m3u8");
        assert_eq!(request.query.get("t").map(String::as_str), Some("abc"));

        // Canonical URL drops the token parameter, keeps the rest sorted.
        assert_eq!(request.canonical_url("t"), "/live/cam1/index.m3u8?x=1");
    }

    #[test]
    fn test_parse_request_rejects_short_paths() {
        let uri: Uri = "/index.m3u8".parse().unwrap();
        assert!(parse_request("host", "1.2.3.4".parse().unwrap(), &uri).is_none());
    }
}
