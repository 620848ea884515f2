//! 시그널링 전송 계층

use crate::error::ClientError;
use crate::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub trait SignalingTransport: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError>;
    fn is_connected(&self) -> bool;
}

/// 연결된 전송 계층과 그 수신 채널
pub type SignalingLink = (
    Arc<dyn SignalingTransport>,
    mpsc::UnboundedReceiver<ServerMessage>,
);

/// 새 시그널링 연결을 여는 쪽. 끊긴 뒤 재접속할 때마다 다시 호출된다.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self) -> Result<SignalingLink, ClientError>;
}

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self) -> Result<SignalingLink, ClientError> {
        let (transport, inbound) = WebSocketTransport::connect(&self.url).await?;
        Ok((Arc::new(transport), inbound))
    }
}

/// tokio-tungstenite 기반 WebSocket 전송
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// 서버에 연결하고, 수신 메시지 채널을 함께 반환
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let connected = Arc::new(AtomicBool::new(true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

        // 송신 태스크
        let writer_connected = connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode client message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        // 수신 태스크
        let reader_connected = connected.clone();
        tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Unrecognized server message"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            tracing::info!("Signaling connection closed");
        });

        tracing::info!(url = %url, "Connected to signaling server");

        Ok((
            Self {
                outbound: outbound_tx,
                connected,
            },
            inbound_rx,
        ))
    }
}

impl SignalingTransport for WebSocketTransport {
    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.outbound
            .send(message)
            .map_err(|_| ClientError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
