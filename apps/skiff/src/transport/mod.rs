use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use skiff_signal::{ClientFrame, ServerFrame};

pub mod mock;
pub mod websocket;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("endpoint closed")]
    Closed,
}

/// Events one live endpoint pushes to its owner. Frames arrive in receive
/// order; `Closed` fires once when the connection dies.
#[derive(Debug)]
pub enum EndpointEvent {
    Frame(ServerFrame),
    Closed,
}

/// Sending half of one live control connection. Dropping it tears the
/// connection down.
pub struct Endpoint {
    tx: mpsc::UnboundedSender<ClientFrame>,
    task: JoinHandle<()>,
}

impl Endpoint {
    pub fn new(tx: mpsc::UnboundedSender<ClientFrame>, task: JoinHandle<()>) -> Self {
        Self { tx, task }
    }

    /// Queue a frame for transmission. Fails once the connection has died.
    pub fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Tear the connection down and stop its bridge task.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Creates one live endpoint per call. The reconnection manager is the only
/// caller and the sole authority over endpoint lifetime; everything else
/// reaches the relay through the `Endpoint` it hands out.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, resolving once it is ready to carry frames.
    /// Inbound events flow into `events` until the connection dies.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<EndpointEvent>,
    ) -> Result<Endpoint, TransportError>;
}
