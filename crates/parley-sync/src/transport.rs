use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { reason: String },
}

/// Raw framed channel to the backend. Implementations move text frames and
/// report connection loss; retry, ordering, and protocol concerns live in the
/// engine.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self);
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError>;
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

pub struct WsTransport {
    url: Url,
    connect_timeout: Duration,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            stream: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let attempt = connect_async(self.url.as_str());
        let (stream, _) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| TransportError::Connect("connect timed out".to_string()))?
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(TransportEvent::Frame(text)),
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    let reason = match frame {
                        Some(close) if !close.reason.is_empty() => close.reason.into_owned(),
                        _ => "closed by peer".to_string(),
                    };
                    return Some(TransportEvent::Closed { reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    self.stream = None;
                    return Some(TransportEvent::Closed {
                        reason: err.to_string(),
                    });
                }
                None => {
                    self.stream = None;
                    return Some(TransportEvent::Closed {
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }
}
