use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use skiff_signal::ServerFrame;

/// One queued item for an endpoint's writer task. `Close` tells the writer
/// to shut the connection down from the server side.
#[derive(Debug)]
pub enum Envelope {
    Deliver(ServerFrame),
    Close,
}

#[derive(Debug, Error)]
#[error("endpoint {0} is closed")]
pub struct ClosedEndpoint(pub String);

/// Sending half of one connected endpoint. Envelopes are drained by the
/// writer task in the order they were queued, so delivery to a single
/// endpoint is FIFO.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    endpoint_id: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EndpointHandle {
    pub fn new(endpoint_id: String, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { endpoint_id, tx }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Queue a frame for this endpoint. Fails once its writer task is gone.
    pub fn deliver(&self, frame: ServerFrame) -> Result<(), ClosedEndpoint> {
        self.tx
            .send(Envelope::Deliver(frame))
            .map_err(|_| ClosedEndpoint(self.endpoint_id.clone()))
    }

    /// Ask the writer task to close the connection.
    pub fn close(&self) {
        let _ = self.tx.send(Envelope::Close);
    }
}

#[derive(Default)]
struct RegistryInner {
    by_short_id: HashMap<String, EndpointHandle>,
    short_id_by_endpoint: HashMap<String, String>,
}

/// Identifier registry. Both mapping directions live behind one lock so a
/// registration or disconnect updates them atomically. Nothing awaits while
/// the guard is held; all deliveries are non-blocking channel sends issued
/// after the guard drops.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `short_id` to `handle`. Newest registration wins: a different
    /// endpoint already holding the identifier is dropped from both maps and
    /// closed, without notice. Re-registering the same endpoint is a no-op
    /// upsert. Returns the evicted endpoint id, if any.
    pub fn register(&self, short_id: &str, handle: EndpointHandle) -> Option<String> {
        let evicted = {
            let mut inner = self.lock();
            let evicted = match inner.by_short_id.get(short_id) {
                Some(existing) if existing.endpoint_id() != handle.endpoint_id() => {
                    let old = existing.clone();
                    inner.short_id_by_endpoint.remove(old.endpoint_id());
                    Some(old)
                }
                _ => None,
            };
            if let Some(previous) = inner
                .short_id_by_endpoint
                .insert(handle.endpoint_id().to_string(), short_id.to_string())
            {
                // The endpoint changed identifiers; drop the stale binding.
                if previous != short_id {
                    inner.by_short_id.remove(&previous);
                }
            }
            inner.by_short_id.insert(short_id.to_string(), handle);
            evicted
        };
        evicted.map(|old| {
            debug!(endpoint = %old.endpoint_id(), %short_id, "evicting superseded registration");
            old.close();
            old.endpoint_id().to_string()
        })
    }

    pub fn lookup(&self, short_id: &str) -> Option<EndpointHandle> {
        self.lock().by_short_id.get(short_id).cloned()
    }

    /// Remove whatever identifier `endpoint_id` owns. Returns it, if any.
    pub fn remove(&self, endpoint_id: &str) -> Option<String> {
        let mut inner = self.lock();
        let short_id = inner.short_id_by_endpoint.remove(endpoint_id)?;
        // Only drop the forward entry while it still points at this endpoint;
        // a newer registration may have taken the identifier over already.
        if inner
            .by_short_id
            .get(&short_id)
            .is_some_and(|h| h.endpoint_id() == endpoint_id)
        {
            inner.by_short_id.remove(&short_id);
        }
        Some(short_id)
    }

    /// Every registered endpoint other than `endpoint_id`.
    pub fn peers_of(&self, endpoint_id: &str) -> Vec<EndpointHandle> {
        self.lock()
            .by_short_id
            .values()
            .filter(|h| h.endpoint_id() != endpoint_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_short_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("registry lock poisoned")
    }
}
