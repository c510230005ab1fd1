use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use skiff_signal::ServerFrame;

use super::{Connector, Endpoint, EndpointEvent, TransportError};

/// WebSocket control connection to a skiff-pier relay.
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// `server_url` is the relay base URL; `http(s)` schemes are rewritten
    /// to `ws(s)` and the signaling path is appended.
    pub fn new(server_url: &str) -> Self {
        Self {
            url: control_url(server_url),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn control_url(server_url: &str) -> String {
    let base = server_url.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    format!("{ws_base}/ws")
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<EndpointEvent>,
    ) -> Result<Endpoint, TransportError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let (mut sink, mut stream) = ws_stream.split();
            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        let Some(frame) = outbound else { break };
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    inbound = stream.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => forward_frame(text.as_bytes(), &events),
                            Some(Ok(Message::Binary(data))) => forward_frame(&data, &events),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                debug!(error = %err, "websocket read error");
                                break;
                            }
                        }
                    }
                }
            }
            let _ = events.send(EndpointEvent::Closed);
        });

        Ok(Endpoint::new(tx, task))
    }
}

/// Malformed inbound frames are dropped here, never fatal to the connection.
fn forward_frame(raw: &[u8], events: &mpsc::UnboundedSender<EndpointEvent>) {
    match serde_json::from_slice::<ServerFrame>(raw) {
        Ok(frame) => {
            let _ = events.send(EndpointEvent::Frame(frame));
        }
        Err(err) => debug!(error = %err, "dropping unparseable frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn control_url_rewrites_http_schemes() {
        assert_eq!(control_url("http://pier.local:3003"), "ws://pier.local:3003/ws");
        assert_eq!(control_url("https://pier.local"), "wss://pier.local/ws");
        assert_eq!(control_url("ws://pier.local:3003/"), "ws://pier.local:3003/ws");
        assert_eq!(control_url("pier.local:3003"), "ws://pier.local:3003/ws");
    }
}
