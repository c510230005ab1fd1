use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use skiff_signal::{ClientFrame, ServerFrame};

use super::{Connector, Endpoint, EndpointEvent, TransportError};

/// In-process connector for exercising the session engine without sockets.
/// The paired `MockRemote` plays the relay: it sees every frame the engine
/// sends, can inject server frames, kill the live link, or refuse connection
/// attempts.
pub struct MockConnector {
    shared: Arc<Mutex<MockShared>>,
}

pub struct MockRemote {
    shared: Arc<Mutex<MockShared>>,
    outbound: mpsc::UnboundedReceiver<ClientFrame>,
    connections: mpsc::UnboundedReceiver<u64>,
}

struct MockShared {
    refuse: usize,
    connects: u64,
    link: Option<LiveLink>,
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    connections_tx: mpsc::UnboundedSender<u64>,
}

struct LiveLink {
    events: mpsc::UnboundedSender<EndpointEvent>,
    stop: Option<oneshot::Sender<()>>,
}

pub fn pair() -> (MockConnector, MockRemote) {
    let (outbound_tx, outbound) = mpsc::unbounded_channel();
    let (connections_tx, connections) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(MockShared {
        refuse: 0,
        connects: 0,
        link: None,
        outbound_tx,
        connections_tx,
    }));
    (
        MockConnector {
            shared: shared.clone(),
        },
        MockRemote {
            shared,
            outbound,
            connections,
        },
    )
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<EndpointEvent>,
    ) -> Result<Endpoint, TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let outbound = {
            let mut shared = self.shared.lock().expect("mock state poisoned");
            if shared.refuse > 0 {
                shared.refuse -= 1;
                return Err(TransportError::Connect("mock connect refused".to_string()));
            }
            shared.connects += 1;
            shared.link = Some(LiveLink {
                events: events.clone(),
                stop: Some(stop_tx),
            });
            let _ = shared.connections_tx.send(shared.connects);
            shared.outbound_tx.clone()
        };

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        let _ = events.send(EndpointEvent::Closed);
                        break;
                    }
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        let _ = outbound.send(frame);
                    }
                }
            }
        });

        Ok(Endpoint::new(tx, task))
    }
}

impl MockRemote {
    /// Next frame the engine put on the wire, across all connections.
    pub async fn next_outbound(&mut self) -> Option<ClientFrame> {
        self.outbound.recv().await
    }

    /// Wait for the engine's next successful connection; returns its ordinal
    /// (1 for the first).
    pub async fn wait_for_connection(&mut self) -> Option<u64> {
        self.connections.recv().await
    }

    /// Deliver a server frame over the current link, if one is up.
    pub fn inject(&self, frame: ServerFrame) {
        let shared = self.shared.lock().expect("mock state poisoned");
        if let Some(link) = shared.link.as_ref() {
            let _ = link.events.send(EndpointEvent::Frame(frame));
        }
    }

    /// Kill the current link; the engine observes a close.
    pub fn drop_link(&self) {
        let mut shared = self.shared.lock().expect("mock state poisoned");
        if let Some(mut link) = shared.link.take() {
            if let Some(stop) = link.stop.take() {
                let _ = stop.send(());
            }
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn refuse_next_connects(&self, count: usize) {
        self.shared.lock().expect("mock state poisoned").refuse = count;
    }
}
