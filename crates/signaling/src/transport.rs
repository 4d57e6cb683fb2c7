//! 传输层适配
//!
//! The core only sees [`TransportAdapter`]: open, non-blocking send, close.
//! Connection progress comes back as [`TransportEvent`]s on the channel the
//! adapter was built with, so everything is handled on the signaling loop.

use crate::error::TransportError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Text(String),
    /// The connection ended, with the peer's close reason if it sent one
    Closed {
        reason: Option<String>,
    },
    Error(String),
}

pub trait TransportAdapter {
    /// Start connecting; completion is reported as [`TransportEvent::Opened`]
    fn open(&mut self, url: &str, subprotocols: &[String]) -> Result<(), TransportError>;

    /// Queue a text frame without waiting for the write
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Start a graceful close; completion is reported as [`TransportEvent::Closed`]
    fn close(&mut self);
}

/// tokio-tungstenite 实现
pub struct WsTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            outgoing: None,
            task: None,
        }
    }

    fn build_request(url: &str, subprotocols: &[String]) -> Result<Request, TransportError> {
        let mut request = url.into_client_request()?;
        if !subprotocols.is_empty() {
            let value = HeaderValue::from_str(&subprotocols.join(", ")).map_err(|e| {
                TransportError::Open {
                    url: url.to_string(),
                    message: format!("invalid subprotocol header: {e}"),
                }
            })?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(request)
    }
}

impl TransportAdapter for WsTransport {
    fn open(&mut self, url: &str, subprotocols: &[String]) -> Result<(), TransportError> {
        if self.outgoing.is_some() {
            return Err(TransportError::Open {
                url: url.to_string(),
                message: "transport already opened".to_string(),
            });
        }

        let request = Self::build_request(url, subprotocols)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);

        info!("🔌 连接 Janus 网关: {}", url);
        self.task = Some(tokio::spawn(run_connection(
            url.to_string(),
            request,
            rx,
            self.events.clone(),
        )));
        Ok(())
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Send("connection task has exited".to_string()))
    }

    fn close(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Message::Close(None));
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // a transport closed via `close()` is left to finish the handshake
        if let Some(task) = self.task.take()
            && self.outgoing.is_some()
        {
            task.abort();
        }
    }
}

async fn run_connection(
    url: String,
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (ws_stream, response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(format!(
                "failed to connect to {url}: {e}"
            )));
            return;
        }
    };

    let negotiated = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>")
        .to_string();
    info!("✅ WebSocket 已连接: {} (subprotocol={})", url, negotiated);
    let _ = events.send(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut writing = true;

    loop {
        tokio::select! {
            frame = outgoing.recv(), if writing => {
                let frame = frame.unwrap_or(Message::Close(None));
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = write.send(frame).await {
                    let _ = events.send(TransportEvent::Error(format!("send failed: {e}")));
                    return;
                }
                if closing {
                    debug!("已发送 Close 帧，等待对端确认");
                    writing = false;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    let _ = events.send(TransportEvent::Closed { reason });
                    return;
                }
                // tungstenite queues the Pong itself and flushes it on the next write
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Binary(data))) => {
                    debug!("忽略 {} 字节的 Binary 帧", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(format!("receive failed: {e}")));
                    return;
                }
                None => {
                    warn!("WebSocket 流已结束，未收到 Close 帧");
                    let _ = events.send(TransportEvent::Closed { reason: None });
                    return;
                }
            }
        }
    }
}
