use crate::auth::ReqwestApi;
use crate::signaling::{ConnectErrorReason, SignalingError, SignalingTransport, WireEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::COOKIE};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Default)]
struct Connection {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
}

/// JSON-over-WebSocket transport. The session cookie held by the API client
/// is forwarded on the handshake so both channels share one account session.
pub struct WsSignalingTransport {
    url: Url,
    api: Option<Arc<ReqwestApi>>,
    connection: Mutex<Connection>,
}

impl WsSignalingTransport {
    pub fn new(url: &str, api: Option<Arc<ReqwestApi>>) -> Result<Self, SignalingError> {
        let url = Url::parse(url)
            .map_err(|e| SignalingError::Connect(format!("invalid signaling url {url}: {e}")))?;
        Ok(Self {
            url,
            api,
            connection: Mutex::new(Connection::default()),
        })
    }

    fn cookie_header(&self) -> Option<HeaderValue> {
        let api = self.api.as_ref()?;
        // Cookie jars only release HttpOnly cookies to http(s) urls.
        let mut lookup = self.url.clone();
        let scheme = if self.url.scheme() == "wss" { "https" } else { "http" };
        lookup.set_scheme(scheme).ok()?;
        let cookie = api.cookie_header(&lookup)?;
        HeaderValue::from_str(&cookie).ok()
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingTransport {
    async fn open(&self, inbound: mpsc::UnboundedSender<WireEvent>) -> Result<(), SignalingError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SignalingError::Connect(e.to_string()))?;
        if let Some(cookie) = self.cookie_header() {
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (stream, _) = connect_async(request).await.map_err(|e| match e {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                SignalingError::Unauthorized
            }
            other => SignalingError::Connect(other.to_string()),
        })?;
        info!("Signaling websocket connected: {}", self.url);

        let (mut ws_write, mut ws_read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_write.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if inbound.send(WireEvent::Text(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => {
                            let _ = inbound.send(WireEvent::Text(text));
                        }
                        Err(_) => debug!("Ignoring non-utf8 binary signaling frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                    Err(e) => {
                        warn!("Signaling websocket error: {}", e);
                        let _ = inbound.send(WireEvent::Error(ConnectErrorReason::Transport(
                            e.to_string(),
                        )));
                        break;
                    }
                }
            }
            let _ = inbound.send(WireEvent::Closed);
        });

        let mut connection = self.connection.lock().await;
        if let Some(stale) = connection.reader.replace(reader) {
            stale.abort();
        }
        connection.outbound = Some(out_tx);
        Ok(())
    }

    async fn send(&self, text: String) -> Result<(), SignalingError> {
        let connection = self.connection.lock().await;
        let Some(outbound) = &connection.outbound else {
            return Err(SignalingError::NotConnected);
        };
        outbound
            .send(Message::Text(text))
            .map_err(|_| SignalingError::NotConnected)
    }

    async fn close(&self) {
        let mut connection = self.connection.lock().await;
        // Dropping the sender lets the writer send a close frame and exit.
        connection.outbound = None;
        if let Some(reader) = connection.reader.take() {
            reader.abort();
        }
        info!("Signaling websocket closed: {}", self.url);
    }
}
