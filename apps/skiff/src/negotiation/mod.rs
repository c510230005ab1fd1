use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod stub;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("negotiator construction failed: {0}")]
    Create(String),
    #[error("remote blob rejected: {0}")]
    Remote(String),
}

/// Events the transport-negotiation capability reports for one attempt.
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// The local offer or answer blob is ready to ship to the counterparty.
    LocalBlob(Value),
    /// The direct data channel is up.
    ChannelReady,
    /// Negotiation failed; the current attempt cannot recover.
    Failed(String),
}

/// One in-flight transport negotiation. Dropping it discards the attempt.
pub trait Negotiator: Send {
    /// Feed the counterparty's offer or answer blob.
    fn feed_remote(&mut self, blob: Value) -> Result<(), NegotiationError>;
}

/// Creates negotiators. Implementations wrap whatever engine actually
/// punches the direct channel; the session layer treats the blobs as opaque
/// payloads to relay.
pub trait NegotiatorFactory: Send + Sync {
    fn create(
        &self,
        initiator: bool,
        events: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> Result<Box<dyn Negotiator>, NegotiationError>;
}
