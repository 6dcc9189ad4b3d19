use {
    super::WebRtcPublisher,
    axum::{
        extract::{
            ws::{Message, WebSocket, WebSocketUpgrade},
            Path, State,
        },
        response::Response,
        routing::get,
        Router,
    },
    serde_json::{json, Value},
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
};

/// WebSocket signaling server: `ws://host:port/<app>/<stream>`, JSON
/// commands `request_offer` / `answer` / `candidate` / `stop`.
pub struct SignalingServer {
    port: u16,
    publisher: Arc<WebRtcPublisher>,
    cancel: CancellationToken,
}

impl SignalingServer {
    #[must_use]
    pub fn new(port: u16, publisher: Arc<WebRtcPublisher>) -> Self {
        Self {
            port,
            publisher,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let app = Router::new()
            .route("/:app/:stream", get(upgrade))
            .with_state(self.publisher.clone());

        let address = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(address).await?;
        tracing::info!("webrtc signaling listening on ws://{address}");

        let cancel = self.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path((app_name, stream_name)): Path<(String, String)>,
    State(publisher): State<Arc<WebRtcPublisher>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_name, stream_name, publisher))
}

async fn handle_socket(
    mut socket: WebSocket,
    app_name: String,
    stream_name: String,
    publisher: Arc<WebRtcPublisher>,
) {
    let mut session_id: Option<uuid::Uuid> = None;

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(err) => {
                let _ = send_error(&mut socket, &format!("malformed request: {err}")).await;
                continue;
            }
        };

        match request.get("command").and_then(Value::as_str) {
            Some("request_offer") => {
                match publisher.create_session(&app_name, &stream_name) {
                    Ok((id, offer, candidate)) => {
                        session_id = Some(id);
                        let reply = json!({
                            "command": "offer",
                            "id": id.to_string(),
                            "sdp": { "type": "offer", "sdp": offer },
                            "candidates": [
                                { "candidate": candidate, "sdpMLineIndex": 0 }
                            ],
                        });
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = send_error(&mut socket, &err.to_string()).await;
                    }
                }
            }
            Some("answer") => {
                let sdp_text = request
                    .get("sdp")
                    .and_then(|sdp| sdp.get("sdp"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let id = request
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| id.parse().ok())
                    .or(session_id);
                match id {
                    Some(id) => {
                        if let Err(err) = publisher.apply_answer(&id, sdp_text) {
                            let _ = send_error(&mut socket, &err.to_string()).await;
                        }
                    }
                    None => {
                        let _ = send_error(&mut socket, "answer before request_offer").await;
                    }
                }
            }
            // Trickle candidates are unnecessary against an ICE-Lite peer.
            Some("candidate") => {}
            Some("stop") => break,
            other => {
                let _ = send_error(&mut socket, &format!("unknown command: {other:?}")).await;
            }
        }
    }

    if let Some(id) = session_id {
        publisher.close_session(&id);
    }
}

async fn send_error(socket: &mut WebSocket, error: &str) -> Result<(), axum::Error> {
    let reply = json!({ "command": "error", "error": error });
    socket.send(Message::Text(reply.to_string())).await
}
